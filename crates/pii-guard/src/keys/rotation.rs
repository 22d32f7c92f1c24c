//! Background key rotation.

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::manager::{KeyManager, RotationReport};

/// Spawn a task that rotates aged keys and flushes usage counts every
/// `interval` until `shutdown` is cancelled.
///
/// The first scan runs immediately so keys that aged while the process was
/// down are rotated at startup. A failed scan is logged and retried on the
/// next tick; buffered usage is flushed once more on shutdown.
pub fn rotation_task(
    manager: Arc<KeyManager>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    run_pass(&manager).await;
                }
            }
        }
        let flushed = manager.flush_usage().await;
        info!(flushed, "key rotation task stopped");
    })
}

/// One scan: rotate what is due, then persist usage counts.
pub async fn run_pass(manager: &KeyManager) -> Option<RotationReport> {
    let report = match manager.rotate_expired_keys().await {
        Ok(report) => Some(report),
        Err(e) => {
            warn!(error = %e, "rotation scan failed; retrying next interval");
            None
        }
    };
    let flushed = manager.flush_usage().await;
    debug!(flushed, "usage counts flushed");
    report
}
