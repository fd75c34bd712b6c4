use bytes::{Bytes, BytesMut};
use crate::message::codec::{GnutellaCodec, MessageCodec};
use crate::message::message::{Guid, Message, MessageKind};

/// a payload of the minimum length the codec accepts for `kind`, filled with a recognizable
///  byte pattern
pub fn payload_for(kind: MessageKind) -> Bytes {
    let len = match kind {
        MessageKind::Ping => 0,
        MessageKind::PingReply => 14,
        MessageKind::Query => 8,
        MessageKind::QueryReply => 27,
        MessageKind::Push => 26,
        MessageKind::VendorControl => 8,
        MessageKind::Other => 4,
    };
    (0..len).map(|i| i as u8).collect::<Vec<u8>>().into()
}

pub fn test_message(kind: MessageKind, ttl: u8, hops: u8) -> Message {
    Message::new(Guid::random(), kind, ttl, hops, payload_for(kind))
}

pub fn query(hops: u8) -> Message {
    test_message(MessageKind::Query, 3, hops)
}

pub fn originated_query() -> Message {
    test_message(MessageKind::Query, 3, 0)
        .with_originated(true)
}

pub fn query_reply(hops: u8, reply_volume: u32) -> Message {
    test_message(MessageKind::QueryReply, 3, hops)
        .with_reply_volume(reply_volume)
}

/// the wire representation of `messages`, back to back
pub fn serialized(messages: &[Message]) -> BytesMut {
    let codec = GnutellaCodec::default();
    let mut buf = BytesMut::new();
    for m in messages {
        codec.serialize(m, &mut buf);
    }
    buf
}
