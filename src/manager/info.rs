//! Introspection structures for monitoring UIs.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::connection::ConnectionState;

/// Snapshot of one pooled connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub key: String,
    pub state: ConnectionState,
    pub topics: Vec<String>,
    pub last_activity: DateTime<Utc>,
}
