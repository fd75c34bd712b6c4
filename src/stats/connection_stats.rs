use std::sync::atomic::{AtomicU64, Ordering};
use crate::message::message::MessageKind;
use crate::util::safe_converter::SafeCast;

/// Message counters of a single connection
#[derive(Default)]
pub struct ConnectionStats {
    sent: AtomicU64,
    /// messages the send queue discarded because of overflow or age
    sent_dropped: AtomicU64,
    received: AtomicU64,
    /// messages that were framed correctly but could not be deserialized
    received_dropped: AtomicU64,
    queries_received: AtomicU64,
    query_replies_received: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStatsSnapshot {
    pub sent: u64,
    pub sent_dropped: u64,
    pub received: u64,
    pub received_dropped: u64,
    pub queries_received: u64,
    pub query_replies_received: u64,
}

impl ConnectionStats {
    pub fn add_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_sent_dropped(&self, num_dropped: usize) {
        if num_dropped > 0 {
            self.sent_dropped.fetch_add(num_dropped.safe_cast(), Ordering::Relaxed);
        }
    }

    pub fn add_received(&self, kind: MessageKind) {
        self.received.fetch_add(1, Ordering::Relaxed);
        match kind {
            MessageKind::Query => { self.queries_received.fetch_add(1, Ordering::Relaxed); }
            MessageKind::QueryReply => { self.query_replies_received.fetch_add(1, Ordering::Relaxed); }
            _ => {}
        }
    }

    pub fn add_received_dropped(&self) {
        self.received_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnectionStatsSnapshot {
        ConnectionStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            sent_dropped: self.sent_dropped.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            received_dropped: self.received_dropped.load(Ordering::Relaxed),
            queries_received: self.queries_received.load(Ordering::Relaxed),
            query_replies_received: self.query_replies_received.load(Ordering::Relaxed),
        }
    }
}
