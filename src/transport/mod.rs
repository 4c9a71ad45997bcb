//! Transport abstraction over the physical socket.
//!
//! The connection task only ever sees these traits, so tests can drive the
//! state machine with an in-memory transport instead of a live server.

mod ws;

use async_trait::async_trait;

use crate::error::Result;

pub use ws::WsConnector;

/// A connected, bidirectional text-frame transport.
#[async_trait]
pub trait Transport: Send {
    /// Transmit one serialized frame.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Receive the next inbound frame.
    ///
    /// `None` means the peer closed the transport; `Some(Err(_))` is a
    /// transport-level error (both drive the disconnect path).
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Close the transport cleanly. Best effort.
    async fn close(&mut self);
}

/// Factory that establishes transports, one per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str, protocols: &[String]) -> Result<Box<dyn Transport>>;
}
