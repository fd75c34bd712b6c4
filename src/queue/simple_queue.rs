use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;
use crate::config::{ClassQueueConfig, QueueDiscipline};
use crate::message::message::Message;
use crate::queue::bucket::Bucket;
use crate::queue::message_queue::is_expired;

/// A queue without internal prioritization, backed by a single [Bucket]. Extraction is either
///  oldest-first (FIFO) or newest-first (LIFO). When full, adding evicts the oldest message.
pub struct SimpleQueue {
    bucket: Bucket<Message>,
    lifo: bool,
    cycle_size: usize,
    left_in_cycle: usize,
    timeout: Option<Duration>,
    dropped: usize,
}

impl SimpleQueue {
    pub fn new(config: &ClassQueueConfig) -> SimpleQueue {
        SimpleQueue {
            bucket: Bucket::new(config.capacity),
            lifo: config.discipline == QueueDiscipline::Lifo,
            cycle_size: config.cycle_size,
            left_in_cycle: config.cycle_size,
            timeout: config.timeout,
            dropped: 0,
        }
    }

    pub fn add(&mut self, message: Message) {
        if let Some(evicted) = self.bucket.push_front(message) {
            trace!("queue full - evicting {:?}", evicted);
            self.dropped += 1;
        }
    }

    pub fn remove_next(&mut self, now: Instant) -> Option<Message> {
        if self.left_in_cycle == 0 {
            return None;
        }

        loop {
            let candidate = if self.lifo {
                self.bucket.pop_front()
            }
            else {
                self.bucket.pop_back()
            }?;

            if is_expired(&candidate, self.timeout, now) {
                trace!("discarding expired message {:?}", candidate);
                self.dropped += 1;
                continue;
            }

            self.left_in_cycle -= 1;
            return Some(candidate);
        }
    }

    pub fn reset_cycle(&mut self) {
        self.left_in_cycle = self.cycle_size;
    }

    pub fn reset_dropped_count(&mut self) -> usize {
        std::mem::take(&mut self.dropped)
    }

    pub fn clear(&mut self) {
        self.bucket.clear();
    }

    pub fn len(&self) -> usize {
        self.bucket.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rstest::rstest;
    use crate::message::message::{Guid, MessageKind};

    fn message(n: u8) -> Message {
        Message::new(Guid([n; 16]), MessageKind::Other, 1, 1, Bytes::new())
    }

    #[rstest]
    #[case::fifo(QueueDiscipline::Fifo, vec![1, 2, 3])]
    #[case::lifo(QueueDiscipline::Lifo, vec![3, 2, 1])]
    fn test_order(#[case] discipline: QueueDiscipline, #[case] expected: Vec<u8>) {
        let mut queue = SimpleQueue::new(&ClassQueueConfig { discipline, cycle_size: 10, timeout: None, capacity: 10 });
        for n in 1..=3 {
            queue.add(message(n));
        }

        let now = Instant::now();
        let actual = std::iter::from_fn(|| queue.remove_next(now))
            .map(|m| m.guid.0[0])
            .collect::<Vec<_>>();
        assert_eq!(actual, expected);
    }

    #[rstest]
    #[case::fifo(QueueDiscipline::Fifo, 3)]
    #[case::lifo(QueueDiscipline::Lifo, 5)]
    fn test_evicts_oldest_when_full(#[case] discipline: QueueDiscipline, #[case] expected_first: u8) {
        let mut queue = SimpleQueue::new(&ClassQueueConfig { discipline, cycle_size: 10, timeout: None, capacity: 3 });
        for n in 1..=5 {
            queue.add(message(n));
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.reset_dropped_count(), 2);
        assert_eq!(queue.remove_next(Instant::now()).unwrap().guid.0[0], expected_first);
    }
}
