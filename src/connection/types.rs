//! Shared connection state, readable from outside the connection task.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use crate::routing::ConnectionKey;

/// Lifecycle state of a managed connection.
///
/// Transitions happen only on socket lifecycle events or explicit
/// disconnects; `Error` marks a connection that exhausted its reconnect
/// budget and is about to be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Connected => 1,
            Self::Disconnected => 2,
            Self::Error => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Connected,
            2 => Self::Disconnected,
            _ => Self::Error,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// State shared between a connection's background task and the manager.
pub(crate) struct ConnectionShared {
    pub key: ConnectionKey,
    /// Distinguishes this instance from a replacement spawned on the same key.
    pub instance: Uuid,
    state: AtomicU8,
    /// Last activity timestamp (Unix seconds) - using AtomicI64 for lock-free updates
    last_activity: AtomicI64,
    reconnect_attempts: AtomicU32,
    topics: RwLock<HashSet<String>>,
    /// When the topic set last became (or started out) empty. Read by the
    /// idle sweep; `None` while the connection owns at least one topic.
    empty_since: Mutex<Option<Instant>>,
}

impl ConnectionShared {
    pub fn new(key: ConnectionKey) -> Self {
        Self {
            key,
            instance: Uuid::new_v4(),
            state: AtomicU8::new(ConnectionState::Connecting.as_u8()),
            last_activity: AtomicI64::new(Utc::now().timestamp()),
            reconnect_attempts: AtomicU32::new(0),
            topics: RwLock::new(HashSet::new()),
            empty_since: Mutex::new(Some(Instant::now())),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, next: ConnectionState) {
        let previous = ConnectionState::from_u8(self.state.swap(next.as_u8(), Ordering::SeqCst));
        if previous != next {
            tracing::debug!(key = %self.key, from = %previous, to = %next, "Connection state changed");
        }
    }

    pub fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    /// Record a failed connect attempt; returns the new attempt count.
    pub fn bump_attempts(&self) -> u32 {
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reset_attempts(&self) {
        self.reconnect_attempts.store(0, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Add a topic to this connection. Returns `true` if it was not
    /// already present.
    pub fn add_topic(&self, topic: &str) -> bool {
        let inserted = self
            .topics
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(topic.to_string());
        if inserted {
            *self.empty_since.lock().unwrap_or_else(|e| e.into_inner()) = None;
        }
        inserted
    }

    /// Remove a topic. Returns `true` if the topic set is now empty, which
    /// also stamps the idle marker for the sweep.
    pub fn remove_topic(&self, topic: &str) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        topics.remove(topic);
        let now_empty = topics.is_empty();
        drop(topics);
        if now_empty {
            *self.empty_since.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        }
        now_empty
    }

    pub fn topic_snapshot(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .topics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        topics.sort();
        topics
    }

    pub fn owns_topic(&self, topic: &str) -> bool {
        self.topics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(topic)
    }

    pub fn has_topics(&self) -> bool {
        !self
            .topics
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// Whether the topic set has been empty for longer than `timeout`.
    pub fn idle_longer_than(&self, timeout: Duration) -> bool {
        self.empty_since
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|since| since.elapsed() > timeout)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::route;

    #[test]
    fn test_state_round_trip() {
        let shared = ConnectionShared::new(route("metrics", 3));
        assert_eq!(shared.state(), ConnectionState::Connecting);
        shared.set_state(ConnectionState::Connected);
        assert_eq!(shared.state(), ConnectionState::Connected);
        shared.set_state(ConnectionState::Error);
        assert_eq!(shared.state(), ConnectionState::Error);
    }

    #[test]
    fn test_topic_membership_drives_idle_marker() {
        let shared = ConnectionShared::new(route("metrics", 3));
        // Starts empty, so it is already idle-eligible.
        assert!(shared.idle_longer_than(Duration::ZERO));

        assert!(shared.add_topic("metrics"));
        assert!(!shared.add_topic("metrics"));
        assert!(shared.owns_topic("metrics"));
        assert!(!shared.idle_longer_than(Duration::ZERO));

        assert!(shared.remove_topic("metrics"));
        assert!(!shared.owns_topic("metrics"));
        assert!(shared.idle_longer_than(Duration::ZERO));
    }

    #[test]
    fn test_attempt_counter() {
        let shared = ConnectionShared::new(route("metrics", 3));
        assert_eq!(shared.bump_attempts(), 1);
        assert_eq!(shared.bump_attempts(), 2);
        shared.reset_attempts();
        assert_eq!(shared.attempts(), 0);
    }
}
