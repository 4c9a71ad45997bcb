//! Periodic teardown of idle connections.
//!
//! A connection whose topic set has been empty for longer than the idle
//! timeout is closed on the next sweep (timeout-sweep policy, so a quick
//! unsubscribe/resubscribe never flaps the socket).

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::connection::Command;
use crate::routing::ConnectionKey;

use super::Inner;

pub(super) async fn run(inner: Arc<Inner>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut timer = tokio::time::interval(inner.config.sweep());
    // Skip immediate first tick
    timer.tick().await;

    tracing::debug!(
        sweep_interval_secs = inner.config.sweep_interval,
        idle_timeout_secs = inner.config.idle_timeout,
        "Idle sweep started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::debug!("Idle sweep received shutdown signal");
                break;
            }
            _ = timer.tick() => {
                sweep_idle(&inner).await;
            }
        }
    }
}

async fn sweep_idle(inner: &Inner) {
    let idle_timeout = inner.config.idle();
    let candidates: Vec<ConnectionKey> = inner
        .connections
        .iter()
        .filter(|entry| entry.shared.idle_longer_than(idle_timeout))
        .map(|entry| *entry.key())
        .collect();

    for key in candidates {
        // Re-check under the map lock; a subscriber may have arrived since.
        if let Some((_, conn)) = inner
            .connections
            .remove_if(&key, |_, c| c.shared.idle_longer_than(idle_timeout))
        {
            tracing::info!(key = %key, "Closing idle connection");
            let _ = conn.cmd_tx.send(Command::Shutdown).await;
        }
    }
}
