use std::time::Duration;
use anyhow::bail;
use rustc_hash::FxHashMap;
use crate::queue::composite::SchedulerClass;

pub struct ConnectionConfig {
    /// Messages declaring a payload longer than this are a framing error that terminates the
    ///  connection. Gnutella servents conventionally accept up to 64 KiB.
    pub max_message_size: usize,

    /// size of the buffer used for a single read from the transport
    pub read_buffer_size: usize,
    /// initial capacity of the buffers messages are serialized into. Messages bigger than this
    ///  grow the buffer.
    pub write_buffer_size: usize,
    /// This is the number of buffers that will be pooled at a given time - buffers in excess of this
    ///  number are discarded when they are returned.
    pub buffer_pool_size: usize,

    pub connect_timeout: Duration,
    /// upper bound for the entire header exchange, starting after the socket is connected
    pub handshake_timeout: Duration,
    /// number of 'unauthorized' rounds an outgoing handshake goes through before giving up
    pub max_handshake_rounds: usize,
    pub max_header_lines: usize,
    pub max_header_line_len: usize,

    /// advertise that we can read deflated data
    pub accept_deflate: bool,
    /// deflate outgoing data if the peer accepts it
    pub encode_deflate: bool,

    pub user_agent: String,
    /// the port this node listens on, used for advertising and for detecting connections to self
    pub listen_port: u16,

    /// TTL limit for messages relayed over this connection. Good ultrapeers and leaves are
    ///  granted one extra hop.
    pub soft_max_ttl: u8,

    pub scheduler: SchedulerConfig,
}

impl ConnectionConfig {
    pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

    pub fn default_config() -> ConnectionConfig {
        ConnectionConfig {
            max_message_size: Self::DEFAULT_MAX_MESSAGE_SIZE,
            read_buffer_size: 8192,
            write_buffer_size: 1024,
            buffer_pool_size: 16,
            connect_timeout: Duration::from_secs(6),
            handshake_timeout: Duration::from_secs(8),
            max_handshake_rounds: 5,
            max_header_lines: 100,
            max_header_line_len: 4096,
            accept_deflate: true,
            encode_deflate: true,
            user_agent: format!("gnutella-connection/{}", env!("CARGO_PKG_VERSION")),
            listen_port: 6346,
            soft_max_ttl: 3,
            scheduler: SchedulerConfig::default(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_message_size > u32::MAX as usize {
            bail!("maximum message size must fit into the header's 32 bit length field");
        }
        if self.read_buffer_size == 0 {
            bail!("read buffer size must be positive");
        }
        if self.write_buffer_size == 0 {
            bail!("write buffer size must be positive");
        }
        if self.max_handshake_rounds == 0 {
            bail!("at least one handshake round is required");
        }
        if self.max_header_line_len < 32 {
            bail!("maximum header line length is too small");
        }

        self.scheduler.validate()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueDiscipline {
    Fifo,
    Lifo,
    Priority,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassQueueConfig {
    pub discipline: QueueDiscipline,
    /// maximum number of messages the class can emit before other classes get their turn
    pub cycle_size: usize,
    /// messages older than this are never sent
    pub timeout: Option<Duration>,
    pub capacity: usize,
}

/// Parameters of the nine scheduling classes. The defaults distinguish 'large' classes (long
///  timeout) from 'normal' ones; individual classes can be overridden completely through
///  `specific_class_configs`.
pub struct SchedulerConfig {
    pub large_timeout: Duration,
    pub normal_timeout: Duration,
    pub large_capacity: usize,
    pub normal_capacity: usize,

    pub specific_class_configs: FxHashMap<SchedulerClass, ClassQueueConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            large_timeout: Duration::from_secs(10),
            normal_timeout: Duration::from_secs(5),
            large_capacity: 100,
            normal_capacity: 100,
            specific_class_configs: FxHashMap::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for class in SchedulerClass::ALL {
            let config = self.get_effective_class_config(class);
            if config.capacity == 0 {
                bail!("capacity for {:?} must be positive", class);
            }
            if config.cycle_size == 0 {
                bail!("cycle size for {:?} must be positive", class);
            }
        }
        Ok(())
    }

    pub fn get_effective_class_config(&self, class: SchedulerClass) -> ClassQueueConfig {
        if let Some(specific) = self.specific_class_configs.get(&class) {
            return specific.clone();
        }

        use QueueDiscipline::*;
        let (discipline, cycle_size, timeout, capacity) = match class {
            SchedulerClass::Control =>         (Fifo,     10, None,                      self.large_capacity),
            SchedulerClass::Watchdog =>        (Lifo,     1,  None,                      self.large_capacity),
            SchedulerClass::Push =>            (Priority, 6,  Some(self.large_timeout),  self.large_capacity),
            SchedulerClass::QueryReply =>      (Priority, 6,  Some(self.large_timeout),  self.large_capacity),
            SchedulerClass::Query =>           (Priority, 3,  Some(self.normal_timeout), self.large_capacity),
            SchedulerClass::PingReply =>       (Priority, 1,  Some(self.normal_timeout), self.normal_capacity),
            SchedulerClass::Ping =>            (Priority, 1,  Some(self.normal_timeout), self.normal_capacity),
            SchedulerClass::Other =>           (Fifo,     1,  None,                      self.large_capacity),
            SchedulerClass::OriginatedQuery => (Priority, 10, Some(self.large_timeout),  self.large_capacity),
        };

        ClassQueueConfig {
            discipline,
            cycle_size,
            timeout,
            capacity,
        }
    }
}
