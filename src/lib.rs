//! Multiplexed WebSocket connection manager.
//!
//! Carries many independent logical topics over a small, bounded pool of
//! physical WebSocket connections. Handles:
//!
//! - Deterministic topic → connection routing (stable hash over the pool)
//! - Per-connection state machine (connecting → connected → disconnected/error)
//! - Automatic reconnection with exponential backoff and jitter
//! - Heartbeat pings and activity tracking
//! - Bounded FIFO queueing of messages sent while disconnected
//! - Topic-based fan-out to any number of independent subscribers
//!
//! Collaborators interact through [`ConnectionManager`]: `subscribe`,
//! `send`, `broadcast`, `connection_state`, `connections_info` and
//! `disconnect_all`.

// Pure leaves
pub mod backoff;
pub mod routing;
pub mod wire;

// Infrastructure
pub mod config;
pub mod error;
pub mod transport;

// Core
pub mod connection;
pub mod dispatch;
pub mod manager;
pub mod registry;

pub use config::ManagerConfig;
pub use connection::ConnectionState;
pub use error::{Error, Result};
pub use manager::{ConnectionInfo, ConnectionManager, Subscription};
pub use routing::{route, ConnectionKey};
pub use transport::{Connector, Transport};
pub use wire::{Frame, FrameKind};
