//! Topic to connection-slot routing.
//!
//! A pure rolling hash of the topic string modulo the pool size, so the
//! same topic always lands on the same slot and unrelated topics spread
//! uniformly across the pool.

use std::fmt;

/// Identifier of a connection slot in the pool, rendered as `conn_{i}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey(usize);

impl ConnectionKey {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Route a topic to a connection slot.
///
/// Deterministic, total, and always in `[0, pool_size)`.
pub fn route(topic: &str, pool_size: usize) -> ConnectionKey {
    let slots = pool_size.max(1) as u64;
    let mut hash: u64 = 0;
    for byte in topic.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(u64::from(byte));
    }
    ConnectionKey((hash % slots) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_is_deterministic() {
        for topic in ["metrics", "alerts", "agent-status", "workflow-updates", ""] {
            assert_eq!(route(topic, 3), route(topic, 3));
        }
    }

    #[test]
    fn test_route_stays_in_range() {
        let topics = [
            "metrics",
            "alerts",
            "agent-status",
            "workflow-updates",
            "chat",
            "",
            "a",
            "long-topic-name-with-many-segments/and/slashes",
            "топик",
        ];
        for pool_size in 1..=8 {
            for topic in topics {
                assert!(route(topic, pool_size).index() < pool_size);
            }
        }
    }

    #[test]
    fn test_route_spreads_topics() {
        // Not a statistical test; just make sure more than one slot is used.
        let hit: std::collections::HashSet<usize> = (0..100)
            .map(|i| route(&format!("topic-{i}"), 3).index())
            .collect();
        assert!(hit.len() > 1);
    }

    #[test]
    fn test_zero_pool_size_is_clamped() {
        assert_eq!(route("metrics", 0).index(), 0);
    }

    #[test]
    fn test_key_display() {
        assert_eq!(route("x", 1).to_string(), "conn_0");
    }
}
