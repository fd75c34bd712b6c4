//! The SACHRIFC flow control algorithm: outgoing messages are split into nine classes, each with
//!  its own bounded queue, timeout and per-cycle quota. The scheduler visits the classes in a
//!  round robin that is biased by the quotas, so classes with a larger quota get a bigger share
//!  of the bandwidth, and no class can starve the others no matter how much traffic it has
//!  queued up.
//!
//! Under overload the individual queues drop messages (oldest / lowest priority first), so the
//!  total amount of buffered data per connection is bounded.

use tracing::{trace, warn};
use crate::config::SchedulerConfig;
use crate::message::message::{Message, MessageKind};
use crate::queue::message_queue::MessageQueue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SchedulerClass {
    Control = 0,
    /// zero-hop pings and pongs with minimal TTL, used for liveness probing
    Watchdog = 1,
    Push = 2,
    QueryReply = 3,
    Query = 4,
    PingReply = 5,
    Ping = 6,
    Other = 7,
    /// queries this node authored
    OriginatedQuery = 8,
}

impl SchedulerClass {
    pub const NUM_CLASSES: usize = 9;

    pub const ALL: [SchedulerClass; Self::NUM_CLASSES] = [
        SchedulerClass::Control,
        SchedulerClass::Watchdog,
        SchedulerClass::Push,
        SchedulerClass::QueryReply,
        SchedulerClass::Query,
        SchedulerClass::PingReply,
        SchedulerClass::Ping,
        SchedulerClass::Other,
        SchedulerClass::OriginatedQuery,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn calculate(message: &Message) -> SchedulerClass {
        match message.kind {
            MessageKind::VendorControl => SchedulerClass::Control,
            MessageKind::Query if message.originated => SchedulerClass::OriginatedQuery,
            MessageKind::Query => SchedulerClass::Query,
            MessageKind::QueryReply => SchedulerClass::QueryReply,
            MessageKind::PingReply if message.hops == 0 && message.ttl <= 2 => SchedulerClass::Watchdog,
            MessageKind::PingReply => SchedulerClass::PingReply,
            MessageKind::Ping if message.hops == 0 && message.ttl == 1 => SchedulerClass::Watchdog,
            MessageKind::Ping => SchedulerClass::Ping,
            MessageKind::Push => SchedulerClass::Push,
            MessageKind::Other => SchedulerClass::Other,
        }
    }
}

pub struct CompositeScheduler {
    queues: Vec<MessageQueue>,
    current_class: usize,
    class_hint: usize,
    /// set when the previous call to `remove_next` found nothing to send; the next call then
    ///  starts a new lap at `class_hint`
    cycled: bool,
    /// always equal to the sum of the class queues' sizes
    total_queued: usize,
    dropped: usize,
}

impl CompositeScheduler {
    pub fn new(config: &SchedulerConfig) -> CompositeScheduler {
        CompositeScheduler {
            queues: SchedulerClass::ALL.iter()
                .map(|&class| MessageQueue::new(&config.get_effective_class_config(class)))
                .collect(),
            current_class: 0,
            class_hint: 0,
            cycled: true,
            total_queued: 0,
            dropped: 0,
        }
    }

    pub fn add(&mut self, message: Message) {
        let class = SchedulerClass::calculate(&message);
        trace!("queueing {:?} as {:?}", message, class);

        let queue = &mut self.queues[class.index()];
        queue.add(message);
        let dropped = queue.reset_dropped_count();

        self.dropped += dropped;
        self.total_queued = self.total_queued + 1 - dropped;
        self.class_hint = class.index();
    }

    /// Returns the next message to send, or `None` if there is nothing eligible to send
    ///  right now.
    pub fn remove_next(&mut self) -> Option<Message> {
        if self.cycled {
            self.cycled = false;
            self.current_class = self.class_hint;
            self.queues[self.current_class].reset_cycle();
        }

        let mut unproductive_visits = 0;
        while self.total_queued > 0 {
            let queue = &mut self.queues[self.current_class];
            let message = queue.remove_next();
            let dropped = queue.reset_dropped_count();

            self.dropped += dropped;
            self.total_queued -= dropped + usize::from(message.is_some());

            if message.is_some() {
                return message;
            }

            self.current_class = (self.current_class + 1) % SchedulerClass::NUM_CLASSES;
            self.queues[self.current_class].reset_cycle();

            // every class was reset during the last lap, so a non-empty one must have produced
            //  a message by now
            unproductive_visits += 1;
            if unproductive_visits > SchedulerClass::NUM_CLASSES {
                let actual = self.queues.iter().map(|q| q.len()).sum();
                warn!("scheduler queue count {} is inconsistent with queue sizes {} - resynchronizing", self.total_queued, actual);
                self.total_queued = actual;
                break;
            }
        }

        self.cycled = true;
        None
    }

    pub fn reset_dropped_count(&mut self) -> usize {
        std::mem::take(&mut self.dropped)
    }

    pub fn len(&self) -> usize {
        self.total_queued
    }

    pub fn is_empty(&self) -> bool {
        self.total_queued == 0
    }

    pub fn class_len(&self, class: SchedulerClass) -> usize {
        self.queues[class.index()].len()
    }

    /// discards all queued messages, e.g. when the connection is closed
    pub fn clear(&mut self) {
        let num_discarded = self.total_queued;
        for queue in &mut self.queues {
            queue.clear();
        }
        self.total_queued = 0;
        trace!("discarded {} queued messages", num_discarded);
    }
}
