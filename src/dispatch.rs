//! Inbound frame dispatch.
//!
//! Parses each raw frame, keeps heartbeat traffic below the application
//! layer, and fans `update` payloads out to the registry. Malformed frames
//! are logged and dropped, never surfaced to subscribers.

use std::sync::Arc;

use serde_json::Value;

use crate::connection::ConnectionShared;
use crate::registry::SubscriptionRegistry;
use crate::wire::{Frame, FrameKind};

#[derive(Clone)]
pub(crate) struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// Handle one inbound frame. Returns a reply frame when the protocol
    /// requires one (a `pong` for an inbound `ping`).
    pub fn dispatch(&self, raw: &str, shared: &ConnectionShared) -> Option<Frame> {
        let frame: Frame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(key = %shared.key, error = %e, "Dropping malformed inbound frame");
                return None;
            }
        };

        shared.touch();

        match frame.kind {
            // Heartbeat replies only refresh activity; never forwarded.
            FrameKind::Pong => None,
            FrameKind::Ping => Some(Frame::pong()),
            // Control echoes from the server carry nothing for subscribers.
            FrameKind::Subscribe | FrameKind::Unsubscribe => None,
            FrameKind::Update => {
                self.registry
                    .dispatch(&frame.topic, frame.data.as_ref().unwrap_or(&Value::Null));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::json;

    use crate::routing::route;

    fn fixture() -> (Dispatcher, ConnectionShared, Arc<Mutex<Vec<Value>>>) {
        let registry = Arc::new(SubscriptionRegistry::new());
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        registry.add(
            "metrics",
            Arc::new(move |data| sink.lock().unwrap().push(data)),
        );
        let shared = ConnectionShared::new(route("metrics", 3));
        (Dispatcher::new(registry), shared, received)
    }

    #[test]
    fn test_update_reaches_handlers() {
        let (dispatcher, shared, received) = fixture();
        let raw = r#"{"topic":"metrics","type":"update","data":{"cpu":0.9}}"#;
        assert!(dispatcher.dispatch(raw, &shared).is_none());
        assert_eq!(*received.lock().unwrap(), vec![json!({"cpu": 0.9})]);
    }

    #[test]
    fn test_pong_is_never_forwarded() {
        let (dispatcher, shared, received) = fixture();
        assert!(dispatcher
            .dispatch(r#"{"topic":"metrics","type":"pong"}"#, &shared)
            .is_none());
        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_inbound_ping_gets_pong_reply() {
        let (dispatcher, shared, _) = fixture();
        let reply = dispatcher.dispatch(r#"{"type":"ping"}"#, &shared).unwrap();
        assert_eq!(reply.kind, FrameKind::Pong);
    }

    #[test]
    fn test_malformed_frame_is_dropped_silently() {
        let (dispatcher, shared, received) = fixture();
        assert!(dispatcher.dispatch("{broken", &shared).is_none());
        assert!(dispatcher.dispatch(r#"{"type":"???"}"#, &shared).is_none());
        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_update_without_topic_uses_default() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        registry.add(
            "default",
            Arc::new(move |data| sink.lock().unwrap().push(data)),
        );
        let dispatcher = Dispatcher::new(registry);
        let shared = ConnectionShared::new(route("default", 3));

        dispatcher.dispatch(r#"{"type":"update","data":1}"#, &shared);
        assert_eq!(*received.lock().unwrap(), vec![json!(1)]);
    }
}
