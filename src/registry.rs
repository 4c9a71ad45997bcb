//! Per-topic subscriber registry.
//!
//! Tracks the handler callbacks registered for each topic and reports
//! first-subscriber / last-subscriber transitions so the manager can keep
//! each connection's topic set in step.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use smallvec::SmallVec;
use uuid::Uuid;

/// Application callback invoked with the `data` payload of every `update`
/// frame on its topic.
pub type Handler = Arc<dyn Fn(Value) + Send + Sync>;

struct Subscriber {
    id: Uuid,
    handler: Handler,
}

/// Outcome of removing one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RemoveOutcome {
    /// The subscription was present and has been removed.
    pub removed: bool,
    /// No subscribers remain for the topic.
    pub topic_empty: bool,
}

pub(crate) struct SubscriptionRegistry {
    topics: DashMap<String, SmallVec<[Subscriber; 2]>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
        }
    }

    /// Register a handler. Returns the subscription id and whether this is
    /// the first subscriber for the topic.
    pub fn add(&self, topic: &str, handler: Handler) -> (Uuid, bool) {
        let id = Uuid::new_v4();
        let mut entry = self.topics.entry(topic.to_string()).or_default();
        let first = entry.is_empty();
        entry.push(Subscriber { id, handler });
        tracing::debug!(topic = %topic, subscription_id = %id, "Subscription registered");
        (id, first)
    }

    /// Remove one subscription. Idempotent: removing an unknown id reports
    /// `removed: false` and leaves the topic untouched.
    pub fn remove(&self, topic: &str, id: Uuid) -> RemoveOutcome {
        let Some(mut entry) = self.topics.get_mut(topic) else {
            return RemoveOutcome {
                removed: false,
                topic_empty: true,
            };
        };

        let before = entry.len();
        entry.retain(|s| s.id != id);
        let removed = entry.len() < before;
        let topic_empty = entry.is_empty();
        drop(entry);

        if topic_empty {
            self.topics.remove_if(topic, |_, subs| subs.is_empty());
        }
        if removed {
            tracing::debug!(topic = %topic, subscription_id = %id, "Subscription removed");
        }
        RemoveOutcome {
            removed,
            topic_empty,
        }
    }

    /// Invoke every handler registered for `topic`, in registration order.
    ///
    /// Each handler runs isolated: a panicking handler is logged and never
    /// blocks delivery to the others.
    pub fn dispatch(&self, topic: &str, data: &Value) {
        let handlers: Vec<Handler> = match self.topics.get(topic) {
            Some(entry) => entry.iter().map(|s| s.handler.clone()).collect(),
            None => {
                tracing::trace!(topic = %topic, "No subscribers for inbound frame");
                return;
            }
        };

        for handler in handlers {
            let payload = data.clone();
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(topic = %topic, reason = %reason, "Subscriber handler panicked");
            }
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|e| e.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        self.topics.clear();
    }
}
