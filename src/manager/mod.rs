//! The process-wide coordinator.
//!
//! Explicitly constructed (inject a reference instead of importing a
//! global) so tests get isolation via fresh instances. Owns the
//! key → connection map, enforces the pool bound, and runs the idle sweep
//! and the retired-connection reaper in the background until
//! [`ConnectionManager::disconnect_all`] is called.

mod info;
mod sweep;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ManagerConfig;
use crate::connection::{Command, ConnectionShared, ConnectionState, ManagedConnection, Retired};
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::registry::SubscriptionRegistry;
use crate::routing::{route, ConnectionKey};
use crate::transport::{Connector, WsConnector};
use crate::wire::Frame;

pub use info::ConnectionInfo;

/// How long to wait for a connection task to exit before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct ConnectionManager {
    inner: Arc<Inner>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

pub(crate) struct Inner {
    pub(crate) config: Arc<ManagerConfig>,
    connector: Arc<dyn Connector>,
    registry: Arc<SubscriptionRegistry>,
    pub(crate) connections: DashMap<ConnectionKey, ManagedConnection>,
    /// Serializes connection creation so the pool bound check and the
    /// insert act as one step.
    creation_lock: Mutex<()>,
    /// Serializes topic membership changes against last-subscriber
    /// teardown; pairs `subscribe` with `Subscription::cancel`.
    membership_lock: Mutex<()>,
    retired_tx: mpsc::UnboundedSender<Retired>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionManager {
    /// Create a manager backed by real WebSockets.
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Create a manager with a custom [`Connector`] (used by tests to drive
    /// the state machine with an in-memory transport).
    pub fn with_connector(config: ManagerConfig, connector: Arc<dyn Connector>) -> Self {
        let (retired_tx, retired_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        let inner = Arc::new(Inner {
            config: Arc::new(config),
            connector,
            registry: Arc::new(SubscriptionRegistry::new()),
            connections: DashMap::new(),
            creation_lock: Mutex::new(()),
            membership_lock: Mutex::new(()),
            retired_tx,
            shutdown_tx,
        });

        let reaper = tokio::spawn(reaper(
            inner.clone(),
            retired_rx,
            inner.shutdown_tx.subscribe(),
        ));
        let sweeper = tokio::spawn(sweep::run(inner.clone(), inner.shutdown_tx.subscribe()));

        Self {
            inner,
            background: Mutex::new(vec![reaper, sweeper]),
        }
    }

    /// Register `handler` for every `update` frame on `topic`.
    ///
    /// Ensures a connection exists for the topic's slot (failing fast with
    /// [`Error::PoolExhausted`] when the pool is at capacity) and announces
    /// the topic once per physical connection. Cancel via the returned
    /// [`Subscription`] handle.
    pub async fn subscribe<F>(&self, topic: &str, handler: F) -> Result<Subscription>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let key = route(topic, self.inner.config.pool_size);
        let (cmd_tx, shared, instance) = self.inner.ensure_connection(key)?;

        let (id, newly_owned) = {
            let _guard = self
                .inner
                .membership_lock
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let (id, _) = self.inner.registry.add(topic, Arc::new(handler));
            (id, shared.add_topic(topic))
        };
        if newly_owned
            && cmd_tx
                .send(Command::TopicAdded(topic.to_string()))
                .await
                .is_err()
        {
            // The task retired between lookup and send; roll back.
            self.inner.registry.remove(topic, id);
            shared.remove_topic(topic);
            self.inner.remove_if_instance(key, instance);
            return Err(Error::ConnectionClosed);
        }

        tracing::info!(topic = %topic, key = %key, subscription_id = %id, "Subscribed");
        Ok(Subscription {
            topic: topic.to_string(),
            id,
            inner: Arc::downgrade(&self.inner),
            cancelled: AtomicBool::new(false),
        })
    }

    /// Send an `update` frame on `topic`, routed to its slot. Queued
    /// transparently while the connection is down.
    pub async fn send(&self, topic: &str, data: Value) -> Result<()> {
        let key = route(topic, self.inner.config.pool_size);
        let (cmd_tx, _, instance) = self.inner.ensure_connection(key)?;

        if cmd_tx
            .send(Command::Send(Frame::update(topic, data)))
            .await
            .is_err()
        {
            self.inner.remove_if_instance(key, instance);
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    /// Send an `update` frame to every currently connected pool member,
    /// bypassing routing (for non-topic-scoped system messages).
    pub async fn broadcast(&self, topic: &str, data: Value) {
        let frame = Frame::update(topic, data);
        let targets: Vec<mpsc::Sender<Command>> = self
            .inner
            .connections
            .iter()
            .filter(|entry| entry.shared.state() == ConnectionState::Connected)
            .map(|entry| entry.cmd_tx.clone())
            .collect();

        tracing::debug!(topic = %topic, connections = targets.len(), "Broadcasting");
        for cmd_tx in targets {
            let _ = cmd_tx.send(Command::Send(frame.clone())).await;
        }
    }

    /// State of the connection owning `topic`; `Disconnected` if none does.
    pub fn connection_state(&self, topic: &str) -> ConnectionState {
        let key = route(topic, self.inner.config.pool_size);
        self.inner
            .connections
            .get(&key)
            .map(|entry| entry.shared.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Snapshot of every pooled connection, for monitoring UIs.
    pub fn connections_info(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .inner
            .connections
            .iter()
            .map(|entry| ConnectionInfo {
                key: entry.shared.key.to_string(),
                state: entry.shared.state(),
                topics: entry.shared.topic_snapshot(),
                last_activity: entry.shared.last_activity(),
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    /// Stop everything: cancels reconnect and heartbeat timers, closes all
    /// sockets, clears all subscriptions, and stops the sweep/reaper tasks.
    /// The only way to fully stop background activity.
    pub async fn disconnect_all(&self) {
        tracing::info!("Disconnecting all connections");
        let _ = self.inner.shutdown_tx.send(());

        let keys: Vec<ConnectionKey> = self
            .inner
            .connections
            .iter()
            .map(|entry| *entry.key())
            .collect();
        for key in keys {
            if let Some((_, conn)) = self.inner.connections.remove(&key) {
                let _ = conn.cmd_tx.try_send(Command::Shutdown);
                join_with_grace(conn.task).await;
            }
        }
        self.inner.registry.clear();

        let background: Vec<JoinHandle<()>> = {
            let mut guard = self.background.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for task in background {
            join_with_grace(task).await;
        }
    }
}

async fn join_with_grace(mut task: JoinHandle<()>) {
    if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
        task.abort();
    }
}

impl Inner {
    /// Look up or create the connection for `key`, enforcing the pool bound.
    fn ensure_connection(
        &self,
        key: ConnectionKey,
    ) -> Result<(mpsc::Sender<Command>, Arc<ConnectionShared>, Uuid)> {
        if let Some(entry) = self.connections.get(&key) {
            return Ok((
                entry.cmd_tx.clone(),
                entry.shared.clone(),
                entry.shared.instance,
            ));
        }

        // Creation is serialized so the bound check and the insert act as
        // one step; a concurrent creator re-checks the map under the lock.
        let _guard = self
            .creation_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = self.connections.get(&key) {
            return Ok((
                entry.cmd_tx.clone(),
                entry.shared.clone(),
                entry.shared.instance,
            ));
        }
        if self.connections.len() >= self.config.max_connections {
            tracing::warn!(
                key = %key,
                max = self.config.max_connections,
                "Refusing new connection, pool exhausted"
            );
            return Err(Error::PoolExhausted {
                max: self.config.max_connections,
            });
        }

        let entry = self.connections.entry(key).or_insert_with(|| {
            ManagedConnection::spawn(
                key,
                self.config.clone(),
                self.connector.clone(),
                Dispatcher::new(self.registry.clone()),
                self.retired_tx.clone(),
            )
        });
        Ok((
            entry.cmd_tx.clone(),
            entry.shared.clone(),
            entry.shared.instance,
        ))
    }

    /// Remove the entry for `key` only if it is still the same instance
    /// (a replacement spawned on the same key must survive).
    fn remove_if_instance(&self, key: ConnectionKey, instance: Uuid) {
        if self
            .connections
            .remove_if(&key, |_, conn| conn.shared.instance == instance)
            .is_some()
        {
            tracing::info!(key = %key, "Connection removed");
        }
    }
}

/// Removes connections whose tasks terminated (reconnect budget exhausted
/// or dropped with nothing referencing them).
async fn reaper(
    inner: Arc<Inner>,
    mut retired_rx: mpsc::UnboundedReceiver<Retired>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            retired = retired_rx.recv() => match retired {
                Some(Retired { key, instance }) => inner.remove_if_instance(key, instance),
                None => break,
            },
        }
    }
}

/// Cancellation token for one subscription.
///
/// `cancel()` is the only way to remove the subscription; it is synchronous
/// and idempotent. When the last subscriber of a topic cancels, the topic
/// is withdrawn from its connection and the connection becomes eligible
/// for idle teardown.
pub struct Subscription {
    topic: String,
    id: Uuid,
    inner: Weak<Inner>,
    cancelled: AtomicBool,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(inner) = self.inner.upgrade() else {
            return;
        };

        let outcome = inner.registry.remove(&self.topic, self.id);
        if !outcome.removed || !outcome.topic_empty {
            return;
        }

        // Last subscriber gone: detach the topic from its connection. The
        // socket itself stays up until the idle sweep claims it. Re-check
        // under the membership lock; a fresh `subscribe` may have
        // registered since the removal above reported the topic empty.
        let key = route(&self.topic, inner.config.pool_size);
        {
            let _guard = inner
                .membership_lock
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if inner.registry.subscriber_count(&self.topic) > 0 {
                return;
            }
            if let Some(entry) = inner.connections.get(&key) {
                entry.shared.remove_topic(&self.topic);
                let _ = entry
                    .cmd_tx
                    .try_send(Command::TopicRemoved(self.topic.clone()));
            }
        }
        tracing::info!(topic = %self.topic, subscription_id = %self.id, "Last subscriber left topic");
    }
}
