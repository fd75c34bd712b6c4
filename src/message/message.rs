use std::fmt::{Debug, Formatter};
use bytes::Bytes;
use rand::RngCore;
use tokio::time::Instant;

/// A Gnutella message id. Apart from the markers set for freshly generated ids, the bytes are
///  opaque and used for correlating replies with requests.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    pub const LEN: usize = 16;

    /// Generates a random id with the markers modern servents put into their ids (byte 8 is
    ///  0xff, byte 15 is 0x00)
    pub fn random() -> Guid {
        let mut bytes = [0u8; Self::LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes[8] = 0xff;
        bytes[15] = 0x00;
        Guid(bytes)
    }
}

impl Debug for Guid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for b in self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

/// The closed set of message kinds the connection pipeline distinguishes. Everything the
///  scheduler needs is derived from the kind plus a few numeric fields on [Message].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ping,
    PingReply,
    Query,
    QueryReply,
    Push,
    VendorControl,
    Other,
}

impl MessageKind {
    pub const FUNCTION_PING: u8 = 0x00;
    pub const FUNCTION_PING_REPLY: u8 = 0x01;
    pub const FUNCTION_BYE: u8 = 0x02;
    pub const FUNCTION_ROUTE_TABLE_UPDATE: u8 = 0x30;
    pub const FUNCTION_VENDOR: u8 = 0x31;
    pub const FUNCTION_VENDOR_STANDARD: u8 = 0x32;
    pub const FUNCTION_PUSH: u8 = 0x40;
    pub const FUNCTION_QUERY: u8 = 0x80;
    pub const FUNCTION_QUERY_REPLY: u8 = 0x81;

    pub fn from_function(function: u8) -> Option<MessageKind> {
        match function {
            Self::FUNCTION_PING => Some(MessageKind::Ping),
            Self::FUNCTION_PING_REPLY => Some(MessageKind::PingReply),
            Self::FUNCTION_BYE | Self::FUNCTION_ROUTE_TABLE_UPDATE => Some(MessageKind::Other),
            Self::FUNCTION_VENDOR | Self::FUNCTION_VENDOR_STANDARD => Some(MessageKind::VendorControl),
            Self::FUNCTION_PUSH => Some(MessageKind::Push),
            Self::FUNCTION_QUERY => Some(MessageKind::Query),
            Self::FUNCTION_QUERY_REPLY => Some(MessageKind::QueryReply),
            _ => None,
        }
    }

    /// the canonical function code for a kind - [MessageKind::Other] and
    ///  [MessageKind::VendorControl] cover several codes, and messages carry their actual code
    pub fn default_function(&self) -> u8 {
        match self {
            MessageKind::Ping => Self::FUNCTION_PING,
            MessageKind::PingReply => Self::FUNCTION_PING_REPLY,
            MessageKind::Query => Self::FUNCTION_QUERY,
            MessageKind::QueryReply => Self::FUNCTION_QUERY_REPLY,
            MessageKind::Push => Self::FUNCTION_PUSH,
            MessageKind::VendorControl => Self::FUNCTION_VENDOR,
            MessageKind::Other => Self::FUNCTION_ROUTE_TABLE_UPDATE,
        }
    }
}

/// An immutable protocol message. Once handed to a queue, the queue may discard it silently;
///  drops are only observable through counters.
#[derive(Clone)]
pub struct Message {
    pub guid: Guid,
    pub kind: MessageKind,
    pub function: u8,
    pub ttl: u8,
    pub hops: u8,
    pub payload: Bytes,
    pub created_at: Instant,
    /// true if this node is the author of the (query) message
    pub originated: bool,
    /// bytes of reply payload already routed for this message's guid - only meaningful for
    ///  query replies
    pub reply_volume: u32,
}

impl Message {
    pub fn new(guid: Guid, kind: MessageKind, ttl: u8, hops: u8, payload: Bytes) -> Message {
        Message {
            guid,
            kind,
            function: kind.default_function(),
            ttl,
            hops,
            payload,
            created_at: Instant::now(),
            originated: false,
            reply_volume: 0,
        }
    }

    pub fn with_originated(mut self, originated: bool) -> Message {
        self.originated = originated;
        self
    }

    pub fn with_reply_volume(mut self, reply_volume: u32) -> Message {
        self.reply_volume = reply_volume;
        self
    }

    /// length on the wire including the fixed size header
    pub fn total_len(&self) -> usize {
        crate::message::codec::MessageHeader::SERIALIZED_LEN + self.payload.len()
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        // created_at is local scheduling metadata and deliberately not part of equality
        self.guid == other.guid
            && self.kind == other.kind
            && self.function == other.function
            && self.ttl == other.ttl
            && self.hops == other.hops
            && self.payload == other.payload
            && self.originated == other.originated
            && self.reply_volume == other.reply_volume
    }
}
impl Eq for Message {}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{:?} ttl={} hops={} len={}]", self.kind, self.guid, self.ttl, self.hops, self.payload.len())
    }
}
