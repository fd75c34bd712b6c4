use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::time::Instant;
#[cfg(test)] use mockall::automock;
use crate::util::safe_converter::SafeCast;

/// Byte counts of a transport layer below the connection, e.g. a TLS session. 'Wire' bytes are
///  what actually went over the socket, 'plain' bytes what was exchanged with the layer above.
#[cfg_attr(test, automock)]
pub trait BandwidthTracker: Send + Sync + 'static {
    fn wire_bytes_read(&self) -> u64;
    fn plain_bytes_read(&self) -> u64;
    fn wire_bytes_written(&self) -> u64;
    fn plain_bytes_written(&self) -> u64;
}

struct BandwidthMeter {
    last_bytes: u64,
    last_time: Instant,
    /// KiB/s
    last_rate: f32,
}

impl BandwidthMeter {
    fn new() -> BandwidthMeter {
        BandwidthMeter {
            last_bytes: 0,
            last_time: Instant::now(),
            last_rate: 0.0,
        }
    }

    fn measure(&mut self, total_bytes: u64) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_time).as_secs_f32();
        if elapsed > 0.0 {
            self.last_rate = total_bytes.saturating_sub(self.last_bytes) as f32 / 1024.0 / elapsed;
        }
        self.last_bytes = total_bytes;
        self.last_time = now;
    }
}

/// Passive byte counters for one connection. The frame reader and writer report 'protocol'
///  bytes (serialized message sizes) and 'stream' bytes (what they exchanged with the transport,
///  after compression). Compression counters are fed by the deflate transforms, and the TLS
///  overhead comes from an optional [BandwidthTracker] the transport supplies.
pub struct BandwidthStatistics {
    protocol_bytes_read: AtomicU64,
    protocol_bytes_written: AtomicU64,
    stream_bytes_read: AtomicU64,
    stream_bytes_written: AtomicU64,

    compressed_bytes_read: AtomicU64,
    decompressed_bytes_read: AtomicU64,
    uncompressed_bytes_written: AtomicU64,
    compressed_bytes_written: AtomicU64,

    tls_tracker: RwLock<Option<Arc<dyn BandwidthTracker>>>,

    upstream: Mutex<BandwidthMeter>,
    downstream: Mutex<BandwidthMeter>,
}

impl BandwidthStatistics {
    pub fn new() -> BandwidthStatistics {
        BandwidthStatistics {
            protocol_bytes_read: Default::default(),
            protocol_bytes_written: Default::default(),
            stream_bytes_read: Default::default(),
            stream_bytes_written: Default::default(),
            compressed_bytes_read: Default::default(),
            decompressed_bytes_read: Default::default(),
            uncompressed_bytes_written: Default::default(),
            compressed_bytes_written: Default::default(),
            tls_tracker: RwLock::new(None),
            upstream: Mutex::new(BandwidthMeter::new()),
            downstream: Mutex::new(BandwidthMeter::new()),
        }
    }

    pub fn set_tls_tracker(&self, tracker: Arc<dyn BandwidthTracker>) {
        *self.tls_tracker.write().unwrap() = Some(tracker);
    }

    pub fn add_protocol_read(&self, num_bytes: usize) {
        self.protocol_bytes_read.fetch_add(num_bytes.safe_cast(), Ordering::Relaxed);
    }
    pub fn add_protocol_written(&self, num_bytes: usize) {
        self.protocol_bytes_written.fetch_add(num_bytes.safe_cast(), Ordering::Relaxed);
    }
    pub fn add_stream_read(&self, num_bytes: usize) {
        self.stream_bytes_read.fetch_add(num_bytes.safe_cast(), Ordering::Relaxed);
    }
    pub fn add_stream_written(&self, num_bytes: usize) {
        self.stream_bytes_written.fetch_add(num_bytes.safe_cast(), Ordering::Relaxed);
    }

    pub fn add_inflated(&self, compressed: usize, decompressed: usize) {
        self.compressed_bytes_read.fetch_add(compressed.safe_cast(), Ordering::Relaxed);
        self.decompressed_bytes_read.fetch_add(decompressed.safe_cast(), Ordering::Relaxed);
    }
    pub fn add_deflated(&self, uncompressed: usize, compressed: usize) {
        self.uncompressed_bytes_written.fetch_add(uncompressed.safe_cast(), Ordering::Relaxed);
        self.compressed_bytes_written.fetch_add(compressed.safe_cast(), Ordering::Relaxed);
    }

    pub fn protocol_bytes_read(&self) -> u64 {
        self.protocol_bytes_read.load(Ordering::Relaxed)
    }
    pub fn protocol_bytes_written(&self) -> u64 {
        self.protocol_bytes_written.load(Ordering::Relaxed)
    }
    pub fn stream_bytes_read(&self) -> u64 {
        self.stream_bytes_read.load(Ordering::Relaxed)
    }
    pub fn stream_bytes_written(&self) -> u64 {
        self.stream_bytes_written.load(Ordering::Relaxed)
    }

    /// bytes read from the network, including TLS overhead if a TLS tracker is present
    pub fn wire_bytes_read(&self) -> u64 {
        match self.tls_tracker() {
            Some(tls) => tls.wire_bytes_read(),
            None => self.stream_bytes_read(),
        }
    }

    /// bytes written to the network, including TLS overhead if a TLS tracker is present
    pub fn wire_bytes_written(&self) -> u64 {
        match self.tls_tracker() {
            Some(tls) => tls.wire_bytes_written(),
            None => self.stream_bytes_written(),
        }
    }

    /// percentage of incoming data saved by compression
    pub fn read_saved_from_compression(&self) -> f32 {
        saved_percentage(
            self.decompressed_bytes_read.load(Ordering::Relaxed),
            self.compressed_bytes_read.load(Ordering::Relaxed),
        )
    }

    /// percentage of outgoing data saved by compression
    pub fn sent_saved_from_compression(&self) -> f32 {
        saved_percentage(
            self.uncompressed_bytes_written.load(Ordering::Relaxed),
            self.compressed_bytes_written.load(Ordering::Relaxed),
        )
    }

    /// percentage of incoming wire traffic that was TLS overhead
    pub fn read_lost_from_tls(&self) -> f32 {
        match self.tls_tracker() {
            Some(tls) => lost_percentage(tls.wire_bytes_read(), tls.plain_bytes_read()),
            None => 0.0,
        }
    }

    /// percentage of outgoing wire traffic that was TLS overhead
    pub fn sent_lost_from_tls(&self) -> f32 {
        match self.tls_tracker() {
            Some(tls) => lost_percentage(tls.wire_bytes_written(), tls.plain_bytes_written()),
            None => 0.0,
        }
    }

    /// Samples the wire byte counters; the bandwidth accessors report the average rate between
    ///  the two most recent calls.
    pub fn measure_bandwidth(&self) {
        self.upstream.lock().unwrap().measure(self.wire_bytes_written());
        self.downstream.lock().unwrap().measure(self.wire_bytes_read());
    }

    /// KiB/s
    pub fn measured_upstream_bandwidth(&self) -> f32 {
        self.upstream.lock().unwrap().last_rate
    }

    /// KiB/s
    pub fn measured_downstream_bandwidth(&self) -> f32 {
        self.downstream.lock().unwrap().last_rate
    }

    fn tls_tracker(&self) -> Option<Arc<dyn BandwidthTracker>> {
        self.tls_tracker.read().unwrap().clone()
    }
}

impl Default for BandwidthStatistics {
    fn default() -> Self {
        Self::new()
    }
}

fn saved_percentage(original: u64, reduced: u64) -> f32 {
    if original == 0 {
        return 0.0;
    }
    (1.0 - reduced as f64 / original as f64) as f32 * 100.0
}

fn lost_percentage(wire: u64, plain: u64) -> f32 {
    if wire == 0 || plain > wire {
        return 0.0;
    }
    ((wire - plain) as f64 / wire as f64) as f32 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0, 0.0)]
    #[case(1000, 1000, 0.0)]
    #[case(1000, 250, 75.0)]
    #[case(1000, 0, 100.0)]
    fn test_saved_from_compression(#[case] uncompressed: usize, #[case] compressed: usize, #[case] expected: f32) {
        let stats = BandwidthStatistics::new();
        stats.add_deflated(uncompressed, compressed);
        stats.add_inflated(compressed, uncompressed);

        assert!((stats.sent_saved_from_compression() - expected).abs() < 0.001);
        assert!((stats.read_saved_from_compression() - expected).abs() < 0.001);
    }

    #[test]
    fn test_no_tls() {
        let stats = BandwidthStatistics::new();
        stats.add_stream_read(100);
        stats.add_stream_written(200);

        assert_eq!(stats.read_lost_from_tls(), 0.0);
        assert_eq!(stats.sent_lost_from_tls(), 0.0);
        assert_eq!(stats.wire_bytes_read(), 100);
        assert_eq!(stats.wire_bytes_written(), 200);
    }

    #[test]
    fn test_tls_overhead() {
        let mut tracker = MockBandwidthTracker::new();
        tracker.expect_wire_bytes_read().return_const(1000u64);
        tracker.expect_plain_bytes_read().return_const(900u64);
        tracker.expect_wire_bytes_written().return_const(2000u64);
        tracker.expect_plain_bytes_written().return_const(1500u64);

        let stats = BandwidthStatistics::new();
        stats.set_tls_tracker(Arc::new(tracker));

        assert!((stats.read_lost_from_tls() - 10.0).abs() < 0.001);
        assert!((stats.sent_lost_from_tls() - 25.0).abs() < 0.001);
        assert_eq!(stats.wire_bytes_read(), 1000);
        assert_eq!(stats.wire_bytes_written(), 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_measure_bandwidth() {
        let stats = BandwidthStatistics::new();
        stats.measure_bandwidth();

        stats.add_stream_written(4096);
        stats.add_stream_read(1024);
        tokio::time::advance(Duration::from_secs(2)).await;
        stats.measure_bandwidth();

        assert!((stats.measured_upstream_bandwidth() - 2.0).abs() < 0.001);
        assert!((stats.measured_downstream_bandwidth() - 0.5).abs() < 0.001);
    }
}
