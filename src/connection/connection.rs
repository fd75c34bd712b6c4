use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace};
use crate::config::ConnectionConfig;
use crate::connection::capabilities::ConnectionCapabilities;
use crate::connection::observer::{ConnectionListener, MessageReceiver};
use crate::error::{CloseReason, FramingError, HandshakeError};
use crate::framing::buffer_pool::BufferPool;
use crate::framing::frame_reader::FrameReader;
use crate::framing::frame_writer::FrameWriter;
use crate::framing::FramingContext;
use crate::handshake::headers::HandshakeHeaders;
use crate::message::codec::MessageCodec;
use crate::message::message::Message;
use crate::queue::composite::CompositeScheduler;
use crate::stats::bandwidth::BandwidthStatistics;
use crate::stats::connection_stats::{ConnectionStats, ConnectionStatsSnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Initialized,
    Failed,
}

/// whole seconds a connection must have been up to count as stable
const STABLE_AFTER_SECS: u64 = 5;
const PING_INTERVAL: Duration = Duration::from_millis(2500);
const PONG_INTERVAL_YOUNG: Duration = Duration::from_millis(300);
const PONG_INTERVAL: Duration = Duration::from_millis(12000);
const YOUNG_CONNECTION: Duration = Duration::from_secs(10);

#[derive(Default)]
struct FloodControl {
    next_ping: Option<Instant>,
    next_pong: Option<Instant>,
}

/// A single Gnutella connection. It is created before the handshake (see
///  [HandshakeCoordinator](crate::handshake::coordinator::HandshakeCoordinator)), and once the
///  handshake succeeds it runs a reader task and a writer task until it is closed or the
///  transport fails.
///
/// [Connection::send] never blocks on the network: messages go into the connection's
///  [CompositeScheduler], and the writer task takes them from there when the transport can
///  accept data.
pub struct Connection {
    direction: Direction,
    remote_addr: SocketAddr,
    tls: bool,
    config: Arc<ConnectionConfig>,
    receiver: Arc<dyn MessageReceiver>,
    listener: Arc<dyn ConnectionListener>,

    state: Mutex<ConnectionState>,
    capabilities: RwLock<Option<Arc<ConnectionCapabilities>>>,
    connected_at: OnceLock<Instant>,
    closed: Arc<AtomicBool>,

    scheduler: Arc<Mutex<CompositeScheduler>>,
    write_wakeup: Arc<Notify>,
    stats: Arc<ConnectionStats>,
    bandwidth: Arc<BandwidthStatistics>,
    pool: Arc<BufferPool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    flood_control: Mutex<FloodControl>,
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Connection{{{:?} {:?}}}", self.direction, self.remote_addr)
    }
}

impl Connection {
    pub fn new(
        direction: Direction,
        remote_addr: SocketAddr,
        tls: bool,
        config: Arc<ConnectionConfig>,
        receiver: Arc<dyn MessageReceiver>,
        listener: Arc<dyn ConnectionListener>,
    ) -> anyhow::Result<Arc<Connection>> {
        config.validate()?;

        let scheduler = CompositeScheduler::new(&config.scheduler);
        let pool = BufferPool::new(config.read_buffer_size.max(config.write_buffer_size), config.buffer_pool_size);

        Ok(Arc::new(Connection {
            direction,
            remote_addr,
            tls,
            config,
            receiver,
            listener,
            state: Mutex::new(ConnectionState::Connecting),
            capabilities: RwLock::new(None),
            connected_at: OnceLock::new(),
            closed: Default::default(),
            scheduler: Arc::new(Mutex::new(scheduler)),
            write_wakeup: Arc::new(Notify::new()),
            stats: Default::default(),
            bandwidth: Default::default(),
            pool: Arc::new(pool),
            tasks: Default::default(),
            flood_control: Default::default(),
        }))
    }

    /// Queues a message for sending. Messages sent to a closed connection are discarded
    ///  silently, as are messages the scheduler drops to make room.
    pub fn send(&self, message: Message) {
        if self.closed.load(Ordering::Acquire) {
            trace!("{:?} is closed - discarding {:?}", self, message);
            return;
        }

        let num_dropped = {
            let mut scheduler = self.scheduler.lock().unwrap();
            scheduler.add(message);
            scheduler.reset_dropped_count()
        };
        self.stats.add_sent_dropped(num_dropped);
        self.write_wakeup.notify_one();
    }

    pub fn close(&self) {
        self.close_with(CloseReason::Requested);
    }

    /// Closes the connection if it is not closed yet. Only the first call has an effect, and
    ///  only that call's reason is reported to the listener.
    pub fn close_with(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::AcqRel) {
            trace!("{:?} already closed", self);
            return;
        }
        info!("closing {:?}: {:?}", self, reason);

        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.scheduler.lock().unwrap().clear();

        self.listener.on_connection_closed(&reason);
    }

    pub(crate) fn begin_handshake(&self) -> Result<(), HandshakeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HandshakeError::Closed);
        }
        *self.state.lock().unwrap() = ConnectionState::Handshaking;
        Ok(())
    }

    pub(crate) fn fail(&self, e: &HandshakeError) {
        debug!("handshake with {:?} failed: {}", self.remote_addr, e);
        *self.state.lock().unwrap() = ConnectionState::Failed;
        self.close_with(e.into());
    }

    /// Switches to message traffic after a successful handshake: the stream is split into a
    ///  read half and a write half, each served by its own task. `leftover` is data the peer
    ///  sent right after its last handshake line.
    pub(crate) fn start_messaging<S>(self: &Arc<Self>, stream: S, leftover: Bytes, capabilities: ConnectionCapabilities, codec: Arc<dyn MessageCodec>)
    where S: AsyncRead + AsyncWrite + Send + 'static
    {
        let read_deflated = capabilities.read_deflated;
        let write_deflated = capabilities.write_deflated;

        let _ = self.connected_at.set(Instant::now());
        *self.capabilities.write().unwrap() = Some(Arc::new(capabilities));
        *self.state.lock().unwrap() = ConnectionState::Initialized;
        info!("{:?} initialized (deflate read: {}, write: {})", self, read_deflated, write_deflated);

        let ctx = FramingContext {
            codec,
            pool: self.pool.clone(),
            stats: self.stats.clone(),
            bandwidth: self.bandwidth.clone(),
            closed: self.closed.clone(),
        };
        let reader = FrameReader::new(ctx.clone(), self.receiver.clone(), self.config.max_message_size, read_deflated);
        let writer = FrameWriter::new(ctx, self.scheduler.clone(), self.listener.clone(), self.write_wakeup.clone(), write_deflated);

        let (read_half, write_half) = tokio::io::split(stream);

        let connection = self.clone();
        let read_task = tokio::spawn(async move {
            if let Err(e) = reader.run(read_half, leftover).await {
                connection.on_framing_error("reading", &e);
            }
        });
        let connection = self.clone();
        let write_task = tokio::spawn(async move {
            if let Err(e) = writer.run(write_half).await {
                connection.on_framing_error("writing", &e);
            }
        });

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(read_task);
        tasks.push(write_task);
        if self.closed.load(Ordering::Acquire) {
            // closed while the handshake was finishing
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }

    fn on_framing_error(&self, activity: &str, e: &FramingError) {
        debug!("error {} {:?}: {}", activity, self, e);
        self.close_with(e.into());
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The port the peer accepts connections on: the port it announced in its handshake, or
    ///  for outgoing connections the port we dialed
    pub fn listening_port(&self) -> Option<u16> {
        if let Some(port) = self.capabilities().and_then(|c| c.listening_port()) {
            return Some(port);
        }
        match self.direction {
            Direction::Outgoing => Some(self.remote_addr.port()),
            Direction::Incoming => None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    pub fn capabilities(&self) -> Option<Arc<ConnectionCapabilities>> {
        self.capabilities.read().unwrap().clone()
    }

    pub fn is_read_deflated(&self) -> bool {
        self.capabilities().map(|c| c.read_deflated).unwrap_or(false)
    }

    pub fn is_write_deflated(&self) -> bool {
        self.capabilities().map(|c| c.write_deflated).unwrap_or(false)
    }

    pub fn is_tls_encoded(&self) -> bool {
        self.tls
    }

    /// when the handshake completed
    pub fn connection_time(&self) -> Option<Instant> {
        self.connected_at.get().copied()
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.state() == ConnectionState::Initialized
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ConnectionStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn bandwidth(&self) -> &Arc<BandwidthStatistics> {
        &self.bandwidth
    }

    pub fn queued_messages(&self) -> usize {
        self.scheduler.lock().unwrap().len()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_stable(&self) -> bool {
        self.is_stable_at(Instant::now())
    }

    fn is_stable_at(&self, now: Instant) -> bool {
        self.connection_time()
            .map(|t| now.saturating_duration_since(t).as_secs() > STABLE_AFTER_SECS)
            .unwrap_or(false)
    }

    /// Flood control for forwarding pings: true at most once per interval, and only on stable
    ///  connections
    pub fn allow_new_pings(&self) -> bool {
        let now = Instant::now();
        if !self.is_stable_at(now) {
            return false;
        }

        let mut flood_control = self.flood_control.lock().unwrap();
        if flood_control.next_ping.map(|t| now < t).unwrap_or(false) {
            return false;
        }
        flood_control.next_ping = Some(now + PING_INTERVAL);
        true
    }

    /// Flood control for forwarding pongs. Young connections get pongs more often to fill
    ///  the peer's host cache.
    pub fn allow_new_pongs(&self) -> bool {
        let now = Instant::now();
        if !self.is_stable_at(now) {
            return false;
        }

        let mut flood_control = self.flood_control.lock().unwrap();
        if flood_control.next_pong.map(|t| now < t).unwrap_or(false) {
            return false;
        }

        let age = self.connection_time()
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default();
        let interval = if age < YOUNG_CONNECTION { PONG_INTERVAL_YOUNG } else { PONG_INTERVAL };
        flood_control.next_pong = Some(now + interval);
        true
    }

    /// the TTL limit for messages relayed to this peer
    pub fn soft_max_ttl(&self) -> u8 {
        let is_good_peer = self.capabilities()
            .map(|c| c.is_good_ultrapeer() || c.is_good_leaf())
            .unwrap_or(false);
        if is_good_peer {
            self.config.soft_max_ttl.saturating_add(1)
        }
        else {
            self.config.soft_max_ttl
        }
    }

    /// merges headers the peer announced after the handshake
    pub fn apply_header_update(&self, headers: &HandshakeHeaders) {
        let mut capabilities = self.capabilities.write().unwrap();
        match capabilities.as_ref() {
            Some(current) => {
                debug!("{:?} updated headers: {:?}", self, headers);
                *capabilities = Some(Arc::new(current.with_header_update(headers)));
            }
            None => debug!("{:?} is not initialized - ignoring header update", self),
        }
    }
}
