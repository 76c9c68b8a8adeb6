use std::time::Duration;

use anyhow::{Context, Result, bail};
use grc_policy::config::ENV_POLICY_WATCH;
use grc_policy::{EngineConfig, PolicyEngine};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::output::{print_error, print_success, print_warning};

/// How often reload failures are checked for.
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run(config: &EngineConfig) -> Result<()> {
    if !config.store.watch {
        bail!("store.watch is disabled; enable it in the config or set {ENV_POLICY_WATCH}=true");
    }

    let (engine, watcher) = PolicyEngine::start(config, CancellationToken::new())
        .await
        .context("Failed to load policy")?;
    let watcher = watcher.context("Policy watcher did not start")?;
    let store = engine.store();

    let document = store.get_policy().await?;
    print_success(&format!(
        "Loaded {} {} ({} rules) from {}",
        document.metadata.name,
        document.metadata.version,
        document.rules().len(),
        store.source_name()
    ));

    let mut events = store.subscribe();
    println!("Watching for changes, press Ctrl+C to stop");

    let mut status_tick = tokio::time::interval(STATUS_INTERVAL);
    let mut seen_failures = store.reload_status().failures;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_success(&format!(
                    "Reloaded version {} ({} rules)",
                    event.version,
                    event.document.rules().len()
                )),
                Err(RecvError::Lagged(skipped)) => {
                    print_warning(&format!("Missed {skipped} reload notification(s)"));
                }
                Err(RecvError::Closed) => break,
            },
            _ = status_tick.tick() => {
                let status = store.reload_status();
                if status.failures > seen_failures {
                    seen_failures = status.failures;
                    print_error(&format!(
                        "Reload failed, keeping version {}: {}",
                        status.version,
                        status.last_error.as_deref().unwrap_or("unknown error")
                    ));
                }
            }
        }
    }

    watcher.stop().await;
    Ok(())
}
