//! File watcher driving hot reload.
//!
//! Watches the parent directory of the policy file (so that editors which
//! replace the file atomically are still seen), filters events by file name,
//! and reloads the store with retry and exponential backoff.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{PolicyStore, ReloadTrigger};
use crate::config::StoreConfig;
use crate::error::PolicyError;

/// Handle for a running policy watcher.
#[derive(Debug)]
pub struct WatchHandle {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl WatchHandle {
    /// Stops the watcher and waits for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }

    /// Returns `true` if the watcher task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Starts watching the store's backing file.
///
/// The watcher exits when `cancel` fires or the returned handle is stopped.
pub(super) fn spawn(
    store: Arc<PolicyStore>,
    config: &StoreConfig,
    cancel: CancellationToken,
) -> Result<WatchHandle, PolicyError> {
    let path = store
        .source()
        .watch_path()
        .map(|p| p.to_path_buf())
        .ok_or_else(|| PolicyError::watch(format!("source '{}' cannot be watched", store.source_name())))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| PolicyError::watch(format!("'{}' is not a file path", path.display())))?;
    let watch_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let (notify_tx, notify_rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer(config.debounce, notify_tx)
        .map_err(|e| PolicyError::watch(format!("failed to create file watcher: {e}")))?;
    debouncer
        .watcher()
        .watch(&watch_dir, RecursiveMode::NonRecursive)
        .map_err(|e| PolicyError::watch(format!("failed to watch {}: {e}", watch_dir.display())))?;

    info!(path = %path.display(), "Started watching policy file");

    let poll_interval = config.poll_interval;
    let retry = RetryPolicy {
        attempts: config.reload_retries.max(1),
        backoff: config.retry_backoff,
    };
    let task_cancel = cancel.clone();

    let handle = tokio::spawn(async move {
        // Keep the debouncer alive for the lifetime of the task.
        let _debouncer = debouncer;

        loop {
            tokio::select! {
                _ = task_cancel.cancelled() => {
                    info!(path = %path.display(), "Policy watcher shutting down");
                    break;
                }
                _ = tokio::time::sleep(poll_interval) => {
                    let mut changed = false;
                    while let Ok(result) = notify_rx.try_recv() {
                        match result {
                            Ok(events) => {
                                changed |= events
                                    .iter()
                                    .any(|event| event.path.file_name() == Some(file_name.as_os_str()));
                            }
                            Err(e) => error!(error = ?e, "Policy watcher error"),
                        }
                    }

                    if changed {
                        debug!(path = %path.display(), "Policy file changed");
                        reload_with_retry(&store, retry, &task_cancel).await;
                    }
                }
            }
        }
    });

    Ok(WatchHandle { handle, cancel })
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: usize,
    backoff: Duration,
}

async fn reload_with_retry(store: &PolicyStore, retry: RetryPolicy, cancel: &CancellationToken) {
    let mut backoff = retry.backoff;

    for attempt in 1..=retry.attempts {
        match store.reload_triggered(ReloadTrigger::FileChange, cancel).await {
            Ok(document) => {
                info!(
                    version = store.version(),
                    rules = document.rules().len(),
                    "Policy reloaded after file change"
                );
                return;
            }
            Err(e) if e.is_cancelled() => return,
            Err(e) if attempt < retry.attempts => {
                warn!(attempt, error = %e, "Policy reload failed, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = backoff.saturating_mul(2);
            }
            Err(e) => {
                error!(
                    attempts = attempt,
                    error = %e,
                    "Policy reload failed, keeping current policy"
                );
            }
        }
    }
}
