//! In-memory transport for driving the connection state machine without a
//! live server. Each accepted connect hands the test a [`MockLink`]: the
//! peer's view of that transport.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;

use wsmux::{Connector, Error, Result, Transport};

const WAIT: Duration = Duration::from_secs(60);

pub enum Inbound {
    Text(String),
    Error(String),
}

/// The server side of one mock transport.
pub struct MockLink {
    sent: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl MockLink {
    /// Next frame the client transmitted, heartbeat pings skipped.
    pub async fn recv_frame(&mut self) -> Value {
        loop {
            let raw = timeout(WAIT, self.sent.recv())
                .await
                .expect("timed out waiting for outbound frame")
                .expect("transport closed while waiting for a frame");
            let frame: Value = serde_json::from_str(&raw).expect("outbound frame is not JSON");
            if frame["type"] != "ping" {
                return frame;
            }
        }
    }

    /// Inject an inbound frame.
    pub fn push_json(&self, frame: Value) {
        self.inbound
            .send(Inbound::Text(frame.to_string()))
            .expect("connection task gone");
    }

    /// Inject raw inbound text (for malformed-frame cases).
    pub fn push_text(&self, raw: &str) {
        self.inbound
            .send(Inbound::Text(raw.to_string()))
            .expect("connection task gone");
    }

    /// Inject a transport-level error.
    pub fn push_error(&self, message: &str) {
        let _ = self.inbound.send(Inbound::Error(message.to_string()));
    }

    /// Close from the server side.
    pub fn close(self) {
        drop(self.inbound);
    }

    /// Stop accepting outbound frames while keeping the inbound side open,
    /// so the client's next send hits a transport error.
    pub fn break_outbound(&mut self) {
        self.sent.close();
    }

    /// Wait until the client dropped its end, skipping any frames (e.g.
    /// pings) still in flight.
    pub async fn wait_closed(mut self) {
        loop {
            match timeout(WAIT, self.sent.recv())
                .await
                .expect("timed out waiting for transport close")
            {
                Some(_) => continue,
                None => return,
            }
        }
    }
}

/// Scriptable connector: a FIFO plan of accept/refuse decisions, falling
/// back to accept (or refuse, after `refuse_remaining`) when the plan runs
/// dry. Every accepted connect emits a [`MockLink`] on the side channel.
pub struct MockConnector {
    plan: Mutex<VecDeque<bool>>,
    refuse_rest: AtomicBool,
    attempts: AtomicUsize,
    links: mpsc::UnboundedSender<MockLink>,
}

/// Opt-in log output, e.g. `RUST_LOG=wsmux=debug cargo test -- --nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn mock_connector() -> (Arc<MockConnector>, mpsc::UnboundedReceiver<MockLink>) {
    init_tracing();
    let (links_tx, links_rx) = mpsc::unbounded_channel();
    (
        Arc::new(MockConnector {
            plan: Mutex::new(VecDeque::new()),
            refuse_rest: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
            links: links_tx,
        }),
        links_rx,
    )
}

impl MockConnector {
    /// Refuse the next `n` connect attempts.
    pub fn refuse_next(&self, n: usize) {
        let mut plan = self.plan.lock().unwrap();
        for _ in 0..n {
            plan.push_back(false);
        }
    }

    /// Refuse every connect attempt once the plan is exhausted.
    pub fn refuse_remaining(&self) {
        self.refuse_rest.store(true, Ordering::SeqCst);
    }

    /// Total connect attempts observed.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str, _protocols: &[String]) -> Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let accept = match self.plan.lock().unwrap().pop_front() {
            Some(decision) => decision,
            None => !self.refuse_rest.load(Ordering::SeqCst),
        };
        if !accept {
            return Err(Error::Transport("connection refused".to_string()));
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let _ = self.links.send(MockLink {
            sent: sent_rx,
            inbound: inbound_tx,
        });
        Ok(Box::new(MockTransport {
            sent: sent_tx,
            inbound: inbound_rx,
        }))
    }
}

struct MockTransport {
    sent: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.sent
            .send(text)
            .map_err(|_| Error::Transport("peer closed".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        match self.inbound.recv().await {
            Some(Inbound::Text(text)) => Some(Ok(text)),
            Some(Inbound::Error(message)) => Some(Err(Error::Transport(message))),
            None => None,
        }
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}
