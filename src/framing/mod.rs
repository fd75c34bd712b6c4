pub mod buffer_pool;
pub mod deflate;
pub mod frame_reader;
pub mod frame_writer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use crate::framing::buffer_pool::BufferPool;
use crate::message::codec::MessageCodec;
use crate::stats::bandwidth::BandwidthStatistics;
use crate::stats::connection_stats::ConnectionStats;

/// The per-connection state that the frame reader and writer share
#[derive(Clone)]
pub struct FramingContext {
    pub codec: Arc<dyn MessageCodec>,
    pub pool: Arc<BufferPool>,
    pub stats: Arc<ConnectionStats>,
    pub bandwidth: Arc<BandwidthStatistics>,
    /// set when the connection is closed; no callbacks are delivered afterwards
    pub closed: Arc<AtomicBool>,
}

impl FramingContext {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
