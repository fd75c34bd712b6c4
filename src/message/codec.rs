use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
#[cfg(test)] use mockall::automock;
use tokio::time::Instant;
use crate::message::message::{Guid, Message, MessageKind};
use crate::util::safe_converter::PrecheckedCast;

/// The fixed size header preceding every message on the wire:
///
/// ```ascii
///  0: message id / guid (16 bytes)
/// 16: function code (u8)
/// 17: TTL (u8)
/// 18: hops (u8)
/// 19: payload length (u32 LE)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub guid: Guid,
    pub function: u8,
    pub ttl: u8,
    pub hops: u8,
    pub payload_len: u32,
}

impl MessageHeader {
    pub const SERIALIZED_LEN: usize = 23;
    pub const PAYLOAD_LEN_OFFSET: usize = 19;

    pub fn for_message(message: &Message) -> MessageHeader {
        MessageHeader {
            guid: message.guid,
            function: message.function,
            ttl: message.ttl,
            hops: message.hops,
            payload_len: message.payload.len().prechecked_cast(),
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.guid.0);
        buf.put_u8(self.function);
        buf.put_u8(self.ttl);
        buf.put_u8(self.hops);
        buf.put_u32_le(self.payload_len);
    }

    /// parses a header from a complete header buffer
    pub fn from_bytes(buf: &[u8; Self::SERIALIZED_LEN]) -> MessageHeader {
        let mut guid = [0u8; Guid::LEN];
        guid.copy_from_slice(&buf[..Guid::LEN]);

        MessageHeader {
            guid: Guid(guid),
            function: buf[16],
            ttl: buf[17],
            hops: buf[18],
            payload_len: u32::from_le_bytes([buf[19], buf[20], buf[21], buf[22]]),
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Self> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            bail!("message header requires {} bytes, only {} available", Self::SERIALIZED_LEN, buf.remaining());
        }

        let mut guid = [0u8; Guid::LEN];
        buf.copy_to_slice(&mut guid);
        let function = buf.get_u8();
        let ttl = buf.get_u8();
        let hops = buf.get_u8();
        let payload_len = buf.get_u32_le();

        Ok(MessageHeader {
            guid: Guid(guid),
            function,
            ttl,
            hops,
            payload_len,
        })
    }
}

/// Converts between [Message]s and their wire representation. Deserialization failures affect
///  only the single message and are not fatal to the connection.
#[cfg_attr(test, automock)]
pub trait MessageCodec: Send + Sync + 'static {
    fn serialize(&self, message: &Message, buf: &mut BytesMut);

    fn deserialize(&self, header: &MessageHeader, payload: Bytes) -> anyhow::Result<Message>;
}

/// The codec for plain Gnutella 0.6 messages. Payloads are treated as opaque apart from
///  minimum length checks for the message kinds that have a fixed-size prefix.
#[derive(Default)]
pub struct GnutellaCodec {}

impl GnutellaCodec {
    const MIN_PING_REPLY_LEN: usize = 14;
    const MIN_PUSH_LEN: usize = 26;
    const MIN_QUERY_LEN: usize = 3;
    const MIN_QUERY_REPLY_LEN: usize = 27;

    fn min_payload_len(kind: MessageKind) -> usize {
        match kind {
            MessageKind::PingReply => Self::MIN_PING_REPLY_LEN,
            MessageKind::Push => Self::MIN_PUSH_LEN,
            MessageKind::Query => Self::MIN_QUERY_LEN,
            MessageKind::QueryReply => Self::MIN_QUERY_REPLY_LEN,
            _ => 0,
        }
    }
}

impl MessageCodec for GnutellaCodec {
    fn serialize(&self, message: &Message, buf: &mut BytesMut) {
        buf.reserve(message.total_len());
        MessageHeader::for_message(message).ser(buf);
        buf.put_slice(&message.payload);
    }

    fn deserialize(&self, header: &MessageHeader, payload: Bytes) -> anyhow::Result<Message> {
        let kind = match MessageKind::from_function(header.function) {
            Some(kind) => kind,
            None => bail!("unknown function code 0x{:02x}", header.function),
        };

        let min_len = Self::min_payload_len(kind);
        if payload.len() < min_len {
            bail!("{:?} payload of {} bytes is shorter than the minimum of {} bytes", kind, payload.len(), min_len);
        }

        Ok(Message {
            guid: header.guid,
            kind,
            function: header.function,
            ttl: header.ttl,
            hops: header.hops,
            payload,
            created_at: Instant::now(),
            originated: false,
            reply_volume: 0,
        })
    }
}
