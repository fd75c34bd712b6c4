use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;
use crate::config::ClassQueueConfig;
use crate::message::message::{Message, MessageKind};
use crate::queue::bucket::Bucket;
use crate::queue::message_queue::is_expired;

pub const NUM_PRIORITIES: usize = 8;
const MAX_PRIORITY: usize = NUM_PRIORITIES - 1;

/// Upper bounds (exclusive) of the reply volume bands for query replies. Volumes have a long
///  tail, so the bands are roughly logarithmic; a reply for a query with no results routed yet
///  gets the highest priority.
const REPLY_VOLUME_BANDS: [u32; 6] = [1_000, 5_000, 10_000, 20_000, 30_000, 40_000];

/// The priority (0..=7, higher is sent first) of a message within its class
pub fn calculate_priority(message: &Message) -> usize {
    let hops = (message.hops as usize).min(MAX_PRIORITY);

    match message.kind {
        MessageKind::QueryReply => {
            if message.reply_volume == 0 {
                return MAX_PRIORITY;
            }
            let band = REPLY_VOLUME_BANDS.iter()
                .position(|&upper| message.reply_volume < upper)
                .unwrap_or(REPLY_VOLUME_BANDS.len());
            MAX_PRIORITY - 1 - band
        }
        // replies that travelled further advertise hosts we are less likely to know already
        MessageKind::PingReply => hops,
        _ => MAX_PRIORITY - hops,
    }
}

/// A queue of eight priority levels, each backed by a [Bucket]. Capacity is shared across all
///  levels. When the queue overflows, the oldest message of the lowest non-empty level is
///  evicted - even if that level is the one just inserted into.
///
/// Messages are removed from the highest non-empty level, newest first.
pub struct PriorityQueue {
    buckets: Vec<Bucket<Message>>,
    capacity: usize,
    size: usize,
    cycle_size: usize,
    left_in_cycle: usize,
    timeout: Option<Duration>,
    dropped: usize,
}

impl PriorityQueue {
    pub fn new(config: &ClassQueueConfig) -> PriorityQueue {
        PriorityQueue {
            buckets: (0..NUM_PRIORITIES)
                .map(|_| Bucket::new(config.capacity))
                .collect(),
            capacity: config.capacity,
            size: 0,
            cycle_size: config.cycle_size,
            left_in_cycle: config.cycle_size,
            timeout: config.timeout,
            dropped: 0,
        }
    }

    pub fn add(&mut self, message: Message) {
        let priority = calculate_priority(&message);

        // a level can only be full if it holds every message in the queue
        if let Some(evicted) = self.buckets[priority].push_front(message) {
            trace!("priority level {} full - evicting {:?}", priority, evicted);
            self.dropped += 1;
            return;
        }
        self.size += 1;

        if self.size > self.capacity {
            if let Some(evicted) = self.buckets.iter_mut()
                .find(|b| !b.is_empty())
                .and_then(|b| b.pop_back())
            {
                trace!("queue full - evicting lowest priority message {:?}", evicted);
                self.dropped += 1;
                self.size -= 1;
            }
        }
    }

    pub fn remove_next(&mut self, now: Instant) -> Option<Message> {
        if self.left_in_cycle == 0 {
            return None;
        }

        loop {
            let candidate = self.buckets.iter_mut()
                .rev()
                .find(|b| !b.is_empty())
                .and_then(|b| b.pop_front())?;
            self.size -= 1;

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
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.size = 0;
    }

    pub fn len(&self) -> usize {
        self.size
    }
}
