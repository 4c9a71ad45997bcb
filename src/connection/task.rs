//! Background task owning one physical transport.
//!
//! Lifecycle:
//! 1. Connect (state `connecting`)
//! 2. On open: reset attempts, announce owned topics, flush the queue FIFO,
//!    start the heartbeat, enter the connected loop
//! 3. On drop: schedule a reconnect with exponential backoff while the
//!    connection is still referenced and the attempt budget lasts
//! 4. On exhaustion: mark `error` and retire (the manager removes it)

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::backoff::{backoff_delay, with_jitter};
use crate::config::ManagerConfig;
use crate::dispatch::Dispatcher;
use crate::routing::ConnectionKey;
use crate::transport::{Connector, Transport};
use crate::wire::Frame;

use super::queue::MessageQueue;
use super::types::{ConnectionShared, ConnectionState};

/// Reconnect delays get up to 20% of random jitter.
const JITTER_FACTOR: f64 = 0.2;

/// Commands from the manager to the connection task.
pub(crate) enum Command {
    /// Transmit now or queue while not connected.
    Send(Frame),
    /// Topic joined this connection; announce it if currently connected.
    TopicAdded(String),
    /// Last subscriber left the topic; withdraw it if currently connected.
    TopicRemoved(String),
    /// Close the transport and stop all timers.
    Shutdown,
}

/// Notification that a connection task has terminated on its own.
pub(crate) struct Retired {
    pub key: ConnectionKey,
    pub instance: Uuid,
}

pub(crate) struct TaskContext {
    pub config: Arc<ManagerConfig>,
    pub connector: Arc<dyn Connector>,
    pub dispatcher: Dispatcher,
    pub shared: Arc<ConnectionShared>,
    pub retired_tx: mpsc::UnboundedSender<Retired>,
}

enum Exit {
    Shutdown,
    Dropped,
}

pub(crate) async fn run(ctx: TaskContext, mut cmd_rx: mpsc::Receiver<Command>) {
    let mut queue = MessageQueue::new(ctx.config.message_queue_size);

    loop {
        ctx.shared.set_state(ConnectionState::Connecting);
        match ctx
            .connector
            .connect(&ctx.config.url, &ctx.config.protocols)
            .await
        {
            Ok(mut transport) => {
                match on_open(&ctx, transport.as_mut(), &mut queue).await {
                    Ok(mut announced) => {
                        let exit = connected_loop(
                            &ctx,
                            transport.as_mut(),
                            &mut cmd_rx,
                            &mut queue,
                            &mut announced,
                        )
                        .await;
                        transport.close().await;
                        ctx.shared.set_state(ConnectionState::Disconnected);
                        if matches!(exit, Exit::Shutdown) {
                            tracing::info!(key = %ctx.shared.key, "Connection shut down");
                            return;
                        }
                    }
                    Err(()) => {
                        // Open succeeded but the resync writes failed.
                        transport.close().await;
                        ctx.shared.set_state(ConnectionState::Disconnected);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(key = %ctx.shared.key, error = %e, "Connection attempt failed");
                ctx.shared.set_state(ConnectionState::Disconnected);
            }
        }

        // Reconnect only while something still references this connection:
        // an owned topic or undelivered queued messages.
        if !ctx.shared.has_topics() && queue.is_empty() {
            tracing::info!(key = %ctx.shared.key, "Connection dropped with no topics, retiring");
            retire(&ctx, ConnectionState::Disconnected);
            return;
        }

        let attempt = ctx.shared.bump_attempts();
        if attempt > ctx.config.max_reconnect_attempts {
            tracing::warn!(
                key = %ctx.shared.key,
                attempts = attempt - 1,
                "Reconnect attempts exhausted, retiring connection"
            );
            retire(&ctx, ConnectionState::Error);
            return;
        }

        let delay = with_jitter(
            backoff_delay(
                attempt,
                ctx.config.base_delay(),
                ctx.config.max_delay(),
                ctx.config.reconnect_decay,
            ),
            JITTER_FACTOR,
        );
        tracing::info!(
            key = %ctx.shared.key,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        if !wait_backoff(delay, &mut cmd_rx, &mut queue).await {
            ctx.shared.set_state(ConnectionState::Disconnected);
            tracing::info!(key = %ctx.shared.key, "Connection shut down during backoff");
            return;
        }
    }
}

/// Post-open resync: announce every owned topic, then flush the queue in
/// FIFO order. Subscribe frames always precede queued payloads.
async fn on_open(
    ctx: &TaskContext,
    transport: &mut dyn Transport,
    queue: &mut MessageQueue,
) -> Result<HashSet<String>, ()> {
    ctx.shared.reset_attempts();
    ctx.shared.set_state(ConnectionState::Connected);
    ctx.shared.touch();
    tracing::info!(key = %ctx.shared.key, "Connection established");

    let topics = ctx.shared.topic_snapshot();
    let mut announced = HashSet::with_capacity(topics.len());
    for topic in topics {
        transmit(transport, &Frame::subscribe(topic.clone())).await?;
        announced.insert(topic);
    }

    let queued = queue.len();
    while let Some(frame) = queue.pop() {
        if transmit(transport, &frame).await.is_err() {
            queue.requeue_front(frame);
            return Err(());
        }
    }
    if queued > 0 {
        tracing::info!(key = %ctx.shared.key, flushed = queued, "Flushed queued messages");
    }

    Ok(announced)
}

async fn connected_loop(
    ctx: &TaskContext,
    transport: &mut dyn Transport,
    cmd_rx: &mut mpsc::Receiver<Command>,
    queue: &mut MessageQueue,
    announced: &mut HashSet<String>,
) -> Exit {
    let mut heartbeat = tokio::time::interval(ctx.config.heartbeat());
    // Skip immediate first tick
    heartbeat.tick().await;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(frame)) => {
                    // Transmit failure falls back to the queue; the frame is
                    // not lost, it leads the flush after reconnect.
                    if transmit(transport, &frame).await.is_err() {
                        queue.push(frame);
                        return Exit::Dropped;
                    }
                    ctx.shared.touch();
                }
                // Membership may have changed again since the command was
                // queued, so current ownership decides, not command order.
                Some(Command::TopicAdded(topic)) => {
                    if ctx.shared.owns_topic(&topic)
                        && announced.insert(topic.clone())
                        && transmit(transport, &Frame::subscribe(topic)).await.is_err()
                    {
                        return Exit::Dropped;
                    }
                }
                Some(Command::TopicRemoved(topic)) => {
                    if !ctx.shared.owns_topic(&topic)
                        && announced.remove(&topic)
                        && transmit(transport, &Frame::unsubscribe(topic)).await.is_err()
                    {
                        return Exit::Dropped;
                    }
                }
                Some(Command::Shutdown) | None => return Exit::Shutdown,
            },
            inbound = transport.recv() => match inbound {
                Some(Ok(raw)) => {
                    if let Some(reply) = ctx.dispatcher.dispatch(&raw, &ctx.shared) {
                        if transmit(transport, &reply).await.is_err() {
                            return Exit::Dropped;
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(key = %ctx.shared.key, error = %e, "Transport error");
                    return Exit::Dropped;
                }
                None => {
                    tracing::info!(key = %ctx.shared.key, "Transport closed by peer");
                    return Exit::Dropped;
                }
            },
            _ = heartbeat.tick() => {
                if transmit(transport, &Frame::ping()).await.is_err() {
                    return Exit::Dropped;
                }
                ctx.shared.touch();
            }
        }
    }
}

/// Sleep out the backoff delay while still absorbing commands. Sends are
/// queued; topic changes only update bookkeeping (the reconnect resyncs
/// them). Returns `false` if shutdown was requested.
async fn wait_backoff(
    delay: std::time::Duration,
    cmd_rx: &mut mpsc::Receiver<Command>,
    queue: &mut MessageQueue,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(frame)) => queue.push(frame),
                Some(Command::TopicAdded(_)) | Some(Command::TopicRemoved(_)) => {}
                Some(Command::Shutdown) | None => return false,
            },
        }
    }
}

async fn transmit(transport: &mut dyn Transport, frame: &Frame) -> Result<(), ()> {
    let text = match frame.to_json() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize frame");
            return Ok(());
        }
    };
    transport.send(text).await.map_err(|e| {
        tracing::warn!(error = %e, "Transport send failed");
    })
}

fn retire(ctx: &TaskContext, state: ConnectionState) {
    ctx.shared.set_state(state);
    let _ = ctx.retired_tx.send(Retired {
        key: ctx.shared.key,
        instance: ctx.shared.instance,
    });
}
