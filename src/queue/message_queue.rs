use std::time::Duration;
use tokio::time::Instant;
use crate::config::{ClassQueueConfig, QueueDiscipline};
use crate::message::message::Message;
use crate::queue::priority_queue::PriorityQueue;
use crate::queue::simple_queue::SimpleQueue;

/// A bounded single-class queue. All variants share the same contract:
///
/// * `add` never fails, but may evict an older / lower value message, which is counted as dropped
/// * `remove_next` returns at most `cycle_size` messages between calls to `reset_cycle`, and
///    never returns a message older than the configured timeout - expired messages are
///    discarded (and counted as dropped) transparently
/// * `reset_dropped_count` returns and clears the number of messages dropped since its last call
pub enum MessageQueue {
    Simple(SimpleQueue),
    Priority(PriorityQueue),
}

impl MessageQueue {
    pub fn new(config: &ClassQueueConfig) -> MessageQueue {
        match config.discipline {
            QueueDiscipline::Fifo | QueueDiscipline::Lifo => MessageQueue::Simple(SimpleQueue::new(config)),
            QueueDiscipline::Priority => MessageQueue::Priority(PriorityQueue::new(config)),
        }
    }

    pub fn add(&mut self, message: Message) {
        match self {
            MessageQueue::Simple(q) => q.add(message),
            MessageQueue::Priority(q) => q.add(message),
        }
    }

    pub fn remove_next(&mut self) -> Option<Message> {
        let now = Instant::now();
        match self {
            MessageQueue::Simple(q) => q.remove_next(now),
            MessageQueue::Priority(q) => q.remove_next(now),
        }
    }

    pub fn reset_cycle(&mut self) {
        match self {
            MessageQueue::Simple(q) => q.reset_cycle(),
            MessageQueue::Priority(q) => q.reset_cycle(),
        }
    }

    pub fn reset_dropped_count(&mut self) -> usize {
        match self {
            MessageQueue::Simple(q) => q.reset_dropped_count(),
            MessageQueue::Priority(q) => q.reset_dropped_count(),
        }
    }

    /// discards all messages without counting them as dropped
    pub fn clear(&mut self) {
        match self {
            MessageQueue::Simple(q) => q.clear(),
            MessageQueue::Priority(q) => q.clear(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MessageQueue::Simple(q) => q.len(),
            MessageQueue::Priority(q) => q.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn is_expired(message: &Message, timeout: Option<Duration>, now: Instant) -> bool {
    match timeout {
        Some(timeout) => now.saturating_duration_since(message.created_at) > timeout,
        None => false,
    }
}
