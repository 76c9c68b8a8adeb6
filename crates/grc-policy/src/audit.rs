//! Audit trail for policy decisions.
//!
//! Every decision is emitted as a structured event on the [`AUDIT_TARGET`]
//! tracing target and, optionally, written to one or more [`AuditSink`]s.
//! Audit failures are logged and swallowed. They never affect the decision.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AuditConfig;
use crate::context::PolicyContext;
use crate::decision::EvaluationOutcome;
use crate::document::Effect;

/// Tracing target of audit events.
pub const AUDIT_TARGET: &str = "grc_policy::audit";

// =============================================================================
// Audit Record
// =============================================================================

/// One audited decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub correlation_id: String,
    pub tenant_id: Option<String>,
    pub principal_id: Option<String>,
    pub resource_type: String,
    pub action: String,
    pub environment: String,
    pub effect: Effect,
    pub matched_rule_id: Option<String>,
    /// Ids of every rule whose conditions passed.
    pub matched_rules: Vec<String>,
    pub message: Option<String>,
    pub remediation_hint: Option<String>,
    pub mutations_applied: usize,
    pub mutation_failures: usize,
    pub engine_error: Option<String>,
    pub policy_version: Option<u64>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl AuditRecord {
    #[must_use]
    pub fn from_outcome(context: &PolicyContext, outcome: &EvaluationOutcome) -> Self {
        let final_decision = &outcome.final_decision;
        Self {
            id: Uuid::new_v4(),
            timestamp: OffsetDateTime::now_utc(),
            correlation_id: context.correlation_id.clone(),
            tenant_id: context.tenant_id.clone(),
            principal_id: context.principal_id.clone(),
            resource_type: context.resource_type.clone(),
            action: context.action.clone(),
            environment: context.environment.clone(),
            effect: final_decision.effect,
            matched_rule_id: final_decision.matched_rule_id.clone(),
            matched_rules: outcome.matched_rule_ids().map(str::to_string).collect(),
            message: final_decision.message.clone(),
            remediation_hint: final_decision.remediation_hint.clone(),
            mutations_applied: outcome.mutations.applied,
            mutation_failures: outcome.mutations.failures.len(),
            engine_error: outcome.engine_error.clone(),
            policy_version: outcome.policy_version,
            elapsed: outcome.elapsed,
        }
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Errors writing an audit record.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize audit record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    fn name(&self) -> &str;

    async fn write(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Keeps records in memory. Useful for tests and inspection.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record written so far.
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

/// Appends records to a file, one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesAuditSink {
    path: PathBuf,
    name: String,
    file: Mutex<Option<tokio::fs::File>>,
}

impl JsonLinesAuditSink {
    /// The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("jsonl:{}", path.display()),
            path,
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonLinesAuditSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *guard = Some(file);
        }

        if let Some(file) = guard.as_mut() {
            file.write_all(&line).await?;
            file.flush().await?;
        }
        Ok(())
    }
}

// =============================================================================
// Audit Logger
// =============================================================================

/// Records every decision for compliance traceability.
pub struct AuditLogger {
    enabled: bool,
    sinks: Vec<Arc<dyn AuditSink>>,
    write_timeout: Duration,
    cancel: CancellationToken,
}

impl AuditLogger {
    /// Logger emitting tracing events only.
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(&AuditConfig::default())
    }

    /// Logger configured from `[audit]`, with a JSON-lines sink if a file is set.
    #[must_use]
    pub fn from_config(config: &AuditConfig) -> Self {
        let mut logger = Self {
            enabled: config.enabled,
            sinks: Vec::new(),
            write_timeout: config.write_timeout,
            cancel: CancellationToken::new(),
        };
        if let Some(file) = &config.file {
            logger = logger.with_sink(Arc::new(JsonLinesAuditSink::new(file)));
        }
        logger
    }

    /// Logger that records nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Uses `cancel` to abort in-flight sink writes, e.g. on shutdown.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Stops all further sink writes.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Records a decision. Never fails.
    pub async fn log_decision(&self, context: &PolicyContext, outcome: &EvaluationOutcome) {
        if !self.enabled {
            return;
        }

        let record = AuditRecord::from_outcome(context, outcome);
        emit(&record);

        if self.cancel.is_cancelled() {
            return;
        }
        for sink in &self.sinks {
            self.write_to_sink(sink, &record).await;
        }
    }

    /// Runs the write on its own task so a timeout or shutdown only stops
    /// the wait. The sink always finishes the record it started.
    async fn write_to_sink(&self, sink: &Arc<dyn AuditSink>, record: &AuditRecord) {
        let write = {
            let sink = Arc::clone(sink);
            let record = record.clone();
            tokio::spawn(async move { sink.write(&record).await })
        };

        tokio::select! {
            _ = self.cancel.cancelled() => {
                tracing::debug!(sink = %sink.name(), "Audit write detached on shutdown");
            }
            result = tokio::time::timeout(self.write_timeout, write) => match result {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    tracing::warn!(sink = %sink.name(), correlation_id = %record.correlation_id, error = %e, "Audit write failed");
                }
                Ok(Err(e)) => {
                    tracing::error!(sink = %sink.name(), correlation_id = %record.correlation_id, error = %e, "Audit sink task failed");
                }
                Err(_) => {
                    tracing::warn!(
                        sink = %sink.name(),
                        correlation_id = %record.correlation_id,
                        timeout = ?self.write_timeout,
                        "Audit write timed out, finishing in background"
                    );
                }
            }
        }
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("enabled", &self.enabled)
            .field("sinks", &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

fn emit(record: &AuditRecord) {
    tracing::info!(
        target: AUDIT_TARGET,
        correlation_id = %record.correlation_id,
        effect = %record.effect,
        resource_type = %record.resource_type,
        action = %record.action,
        environment = %record.environment,
        principal_id = record.principal_id.as_deref().unwrap_or("anonymous"),
        tenant_id = record.tenant_id.as_deref().unwrap_or(""),
        matched_rules = record.matched_rules.len(),
        matched_rule_id = record.matched_rule_id.as_deref().unwrap_or(""),
        mutations_applied = record.mutations_applied,
        "Policy decision"
    );

    if record.effect == Effect::Deny {
        tracing::warn!(
            target: AUDIT_TARGET,
            correlation_id = %record.correlation_id,
            rule_id = record.matched_rule_id.as_deref().unwrap_or("unknown"),
            message = record.message.as_deref().unwrap_or(""),
            remediation_hint = record.remediation_hint.as_deref().unwrap_or(""),
            "Policy denied request"
        );
    }

    if let Some(error) = &record.engine_error {
        tracing::error!(
            target: AUDIT_TARGET,
            correlation_id = %record.correlation_id,
            error = %error,
            "Policy engine failed, request allowed"
        );
    }
}
