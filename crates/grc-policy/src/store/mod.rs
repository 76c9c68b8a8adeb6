//! Policy document store with hot reload.
//!
//! The store owns the current [`PolicyDocument`] and replaces it atomically.
//! Readers take a snapshot (`Arc<PolicyDocument>`) and keep using it for the
//! whole evaluation, so a concurrent reload never exposes a partially loaded
//! document.
//!
//! # Reload semantics
//!
//! - Missing source document: the default allow-all document is installed.
//! - Parse or validation failure: the previous document stays active.
//! - Success: the document is swapped, the version is bumped and a
//!   [`PolicyReloaded`] event is broadcast.
//!
//! Reloads are serialized; at most one runs at a time.
//!
//! # Example
//!
//! ```ignore
//! use grc_policy::store::PolicyStore;
//!
//! let store = Arc::new(PolicyStore::from_path("etc/policies/grc-baseline.yml"));
//! let document = store.get_policy().await?;
//!
//! let watcher = store.watch(&StoreConfig::default(), CancellationToken::new())?;
//! // ...
//! watcher.stop().await;
//! ```

mod source;
mod watcher;

pub use source::{FilePolicySource, PolicySource, SourceDocument, StaticPolicySource};
pub use watcher::WatchHandle;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::{ArcSwap, ArcSwapOption};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

use crate::config::StoreConfig;
use crate::document::PolicyDocument;
use crate::error::PolicyError;
use crate::validation::validate_document;

/// Default capacity of the reload notification channel.
const DEFAULT_NOTIFY_CAPACITY: usize = 64;

// =============================================================================
// Reload Events
// =============================================================================

/// What caused a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadTrigger {
    /// First access to the store.
    Initial,
    /// Explicit call to [`PolicyStore::reload_policy`].
    Manual,
    /// The watched file changed.
    FileChange,
}

/// Broadcast after a document is installed.
#[derive(Debug, Clone)]
pub struct PolicyReloaded {
    pub document: Arc<PolicyDocument>,
    /// Monotonic document version, starting at 1.
    pub version: u64,
    pub trigger: ReloadTrigger,
}

// =============================================================================
// Reload Status
// =============================================================================

/// Snapshot of the store's reload history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadStatus {
    /// Version of the active document. Zero if none is loaded.
    pub version: u64,
    pub loaded: bool,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_failure_at: Option<OffsetDateTime>,
    /// Message of the most recent failed reload, cleared on success.
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct LastReload {
    success_at: Option<OffsetDateTime>,
    failure_at: Option<OffsetDateTime>,
    error: Option<String>,
}

// =============================================================================
// Policy Store
// =============================================================================

/// Holds the active policy document and reloads it from its source.
pub struct PolicyStore {
    source: Arc<dyn PolicySource>,
    current: ArcSwapOption<PolicyDocument>,
    reload_lock: Mutex<()>,
    notifier: broadcast::Sender<PolicyReloaded>,
    version: AtomicU64,
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    last: ArcSwap<LastReload>,
}

impl PolicyStore {
    /// Creates a store over any source.
    #[must_use]
    pub fn new(source: Arc<dyn PolicySource>) -> Self {
        Self::with_capacity(source, DEFAULT_NOTIFY_CAPACITY)
    }

    /// Creates a store with a custom notification channel capacity.
    #[must_use]
    pub fn with_capacity(source: Arc<dyn PolicySource>, capacity: usize) -> Self {
        let (notifier, _) = broadcast::channel(capacity.max(1));
        Self {
            source,
            current: ArcSwapOption::empty(),
            reload_lock: Mutex::new(()),
            notifier,
            version: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            last: ArcSwap::from_pointee(LastReload::default()),
        }
    }

    /// Creates a store backed by a YAML or JSON file.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FilePolicySource::new(path)))
    }

    /// Creates a file-backed store from configuration.
    #[must_use]
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::with_capacity(
            Arc::new(FilePolicySource::new(config.path.clone())),
            config.notify_capacity,
        )
    }

    /// The backing source.
    pub fn source(&self) -> &dyn PolicySource {
        self.source.as_ref()
    }

    /// Description of the backing source.
    #[must_use]
    pub fn source_name(&self) -> String {
        self.source.name()
    }

    /// Returns the active document, loading it on first access.
    pub async fn get_policy(&self) -> Result<Arc<PolicyDocument>, PolicyError> {
        if let Some(document) = self.current.load_full() {
            return Ok(document);
        }

        let _guard = self.reload_lock.lock().await;
        // Another caller may have finished the first load while we waited.
        if let Some(document) = self.current.load_full() {
            return Ok(document);
        }
        self.reload_locked(ReloadTrigger::Initial).await
    }

    /// The active document without triggering a load.
    #[must_use]
    pub fn current(&self) -> Option<Arc<PolicyDocument>> {
        self.current.load_full()
    }

    /// Version of the active document. Zero if none is loaded.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Reloads the document from its source.
    ///
    /// On failure the previous document stays active and the error is
    /// returned.
    pub async fn reload_policy(&self) -> Result<Arc<PolicyDocument>, PolicyError> {
        let _guard = self.reload_lock.lock().await;
        self.reload_locked(ReloadTrigger::Manual).await
    }

    /// Reloads the document unless `cancel` fires first.
    ///
    /// A cancelled reload returns [`PolicyError::Cancelled`] and leaves the
    /// active document untouched.
    pub async fn reload_policy_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<PolicyDocument>, PolicyError> {
        self.reload_triggered(ReloadTrigger::Manual, cancel).await
    }

    pub(crate) async fn reload_triggered(
        &self,
        trigger: ReloadTrigger,
        cancel: &CancellationToken,
    ) -> Result<Arc<PolicyDocument>, PolicyError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(?trigger, "Policy reload cancelled");
                Err(PolicyError::Cancelled)
            }
            result = async {
                let _guard = self.reload_lock.lock().await;
                self.reload_locked(trigger).await
            } => result,
        }
    }

    /// Checks a document and logs every finding.
    ///
    /// Returns `true` if the document has no hard errors.
    pub fn validate_policy(&self, document: &PolicyDocument) -> bool {
        let report = validate_document(document);
        for warning in &report.warnings {
            tracing::warn!(source = %self.source.name(), warning = %warning, "Policy validation warning");
        }
        for error in &report.errors {
            tracing::error!(source = %self.source.name(), error = %error, "Policy validation error");
        }
        report.is_valid()
    }

    /// Subscribes to reload events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PolicyReloaded> {
        self.notifier.subscribe()
    }

    /// Number of active reload subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.notifier.receiver_count()
    }

    /// Snapshot of the reload history.
    #[must_use]
    pub fn reload_status(&self) -> ReloadStatus {
        let last = self.last.load();
        ReloadStatus {
            version: self.version(),
            loaded: self.current.load().is_some(),
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            last_success_at: last.success_at,
            last_failure_at: last.failure_at,
            last_error: last.error.clone(),
        }
    }

    /// Watches the backing file and reloads on change.
    ///
    /// Fails if the source is not file-backed or the watcher cannot start.
    pub fn watch(
        self: &Arc<Self>,
        config: &StoreConfig,
        cancel: CancellationToken,
    ) -> Result<WatchHandle, PolicyError> {
        watcher::spawn(Arc::clone(self), config, cancel)
    }

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------

    /// Loads and installs the document. Caller must hold `reload_lock`.
    async fn reload_locked(&self, trigger: ReloadTrigger) -> Result<Arc<PolicyDocument>, PolicyError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);

        match self.load_document().await {
            Ok(document) => {
                let document = Arc::new(document);
                self.current.store(Some(Arc::clone(&document)));
                let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
                self.successes.fetch_add(1, Ordering::Relaxed);
                let previous = self.last.load();
                self.last.store(Arc::new(LastReload {
                    success_at: Some(OffsetDateTime::now_utc()),
                    failure_at: previous.failure_at,
                    error: None,
                }));

                tracing::info!(
                    source = %self.source.name(),
                    version,
                    ?trigger,
                    name = %document.metadata.name,
                    rules = document.rules().len(),
                    "Policy document loaded"
                );

                let _ = self.notifier.send(PolicyReloaded {
                    document: Arc::clone(&document),
                    version,
                    trigger,
                });
                Ok(document)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                let previous = self.last.load();
                self.last.store(Arc::new(LastReload {
                    success_at: previous.success_at,
                    failure_at: Some(OffsetDateTime::now_utc()),
                    error: Some(e.to_string()),
                }));

                tracing::error!(
                    source = %self.source.name(),
                    ?trigger,
                    category = %e.category(),
                    error = %e,
                    keeping_version = self.version(),
                    "Policy reload failed"
                );
                Err(e)
            }
        }
    }

    async fn load_document(&self) -> Result<PolicyDocument, PolicyError> {
        let source_name = self.source.name();

        let document = match self.source.load().await? {
            Some(raw) => PolicyDocument::parse(&raw.content, raw.format)
                .map_err(|e| PolicyError::load(&source_name, e.to_string()))?
                .with_load_defaults(),
            None => {
                tracing::info!(source = %source_name, "No policy document found, using default allow policy");
                PolicyDocument::default_allow()
            }
        };

        let report = validate_document(&document);
        for warning in &report.warnings {
            tracing::warn!(source = %source_name, warning = %warning, "Policy validation warning");
        }
        if !report.is_valid() {
            return Err(PolicyError::validation(report.errors));
        }

        Ok(document)
    }
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("source", &self.source.name())
            .field("version", &self.version())
            .finish()
    }
}
