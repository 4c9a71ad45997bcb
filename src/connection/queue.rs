//! Bounded FIFO queue for outbound frames while a connection is down.
//!
//! Acts as a circular buffer: when full, the oldest frame is dropped to
//! make room, so a long outage bounds memory instead of failing sends.

use std::collections::VecDeque;

use crate::wire::Frame;

pub(crate) struct MessageQueue {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue at the back, dropping the oldest frame on overflow.
    pub fn push(&mut self, frame: Frame) {
        if self.frames.len() >= self.capacity {
            if let Some(dropped) = self.frames.pop_front() {
                tracing::debug!(
                    topic = %dropped.topic,
                    queue_size = self.frames.len(),
                    "Dropped oldest queued message from full queue"
                );
            }
        }
        self.frames.push_back(frame);
    }

    /// Dequeue the oldest frame.
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// Put a frame back at the front after a failed flush, preserving FIFO
    /// order for the next attempt.
    pub fn requeue_front(&mut self, frame: Frame) {
        if self.frames.len() >= self.capacity {
            self.frames.pop_back();
        }
        self.frames.push_front(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn numbered(i: usize) -> Frame {
        Frame::update("metrics", json!({ "seq": i }))
    }

    fn seq(frame: &Frame) -> u64 {
        frame.data.as_ref().unwrap()["seq"].as_u64().unwrap()
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = MessageQueue::new(10);
        for i in 0..5 {
            queue.push(numbered(i));
        }
        for i in 0..5 {
            assert_eq!(seq(&queue.pop().unwrap()), i);
        }
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut queue = MessageQueue::new(3);
        for i in 0..5 {
            queue.push(numbered(i));
        }
        assert_eq!(queue.len(), 3);
        // 0 and 1 were dropped.
        assert_eq!(seq(&queue.pop().unwrap()), 2);
        assert_eq!(seq(&queue.pop().unwrap()), 3);
        assert_eq!(seq(&queue.pop().unwrap()), 4);
    }

    #[test]
    fn test_requeue_front_restores_order() {
        let mut queue = MessageQueue::new(10);
        queue.push(numbered(0));
        queue.push(numbered(1));

        let head = queue.pop().unwrap();
        queue.requeue_front(head);

        assert_eq!(seq(&queue.pop().unwrap()), 0);
        assert_eq!(seq(&queue.pop().unwrap()), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut queue = MessageQueue::new(0);
        queue.push(numbered(0));
        assert_eq!(queue.len(), 1);
    }
}
