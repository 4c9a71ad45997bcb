//! One managed connection: a handle plus the background task that owns the
//! physical transport, its state machine, heartbeat, reconnect scheduler
//! and outbound queue.

mod queue;
mod task;
mod types;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ManagerConfig;
use crate::dispatch::Dispatcher;
use crate::routing::ConnectionKey;
use crate::transport::Connector;

pub use types::ConnectionState;

pub(crate) use task::{Command, Retired};
pub(crate) use types::ConnectionShared;

const COMMAND_BUFFER: usize = 64;

/// Handle to a live connection task.
pub(crate) struct ManagedConnection {
    pub shared: Arc<ConnectionShared>,
    pub cmd_tx: mpsc::Sender<Command>,
    pub task: JoinHandle<()>,
}

impl ManagedConnection {
    /// Spawn the background task for `key`; it starts connecting right away.
    pub fn spawn(
        key: ConnectionKey,
        config: Arc<ManagerConfig>,
        connector: Arc<dyn Connector>,
        dispatcher: Dispatcher,
        retired_tx: mpsc::UnboundedSender<Retired>,
    ) -> Self {
        let shared = Arc::new(ConnectionShared::new(key));
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

        let ctx = task::TaskContext {
            config,
            connector,
            dispatcher,
            shared: shared.clone(),
            retired_tx,
        };
        let task = tokio::spawn(task::run(ctx, cmd_rx));
        tracing::info!(key = %key, "Connection created");

        Self {
            shared,
            cmd_tx,
            task,
        }
    }
}
