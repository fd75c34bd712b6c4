use std::cmp::min;
use std::mem;
use std::sync::Arc;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};
use crate::connection::observer::MessageReceiver;
use crate::error::FramingError;
use crate::framing::deflate::Inflater;
use crate::framing::FramingContext;
use crate::message::codec::MessageHeader;
use crate::message::message::Message;
use crate::util::safe_converter::SafeCast;

/// upper bound for the data inflated in one go, so a small compressed read can not expand
///  into an arbitrarily large buffer
const MAX_INFLATE_STEP: usize = 16 * 1024;

enum ReadState {
    AwaitingHeader,
    AwaitingPayload(MessageHeader),
    MessageReady(MessageHeader, Bytes),
}

/// Turns the incoming byte stream into messages. Data is processed as it arrives, so headers
///  and payloads can be split across any number of reads:
///
/// ```ascii
/// AwaitingHeader --(23 bytes)--> AwaitingPayload --(payload_len bytes)--> MessageReady
///       ^                                                                      |
///       +------------------------- deserialize + dispatch ---------------------+
/// ```
///
/// The declared payload length is checked before any payload buffer is allocated, and a
///  violation is fatal. A message that is framed correctly but fails to deserialize is dropped
///  and counted, and reading continues.
pub struct FrameReader {
    ctx: FramingContext,
    receiver: Arc<dyn MessageReceiver>,
    max_message_size: usize,

    state: ReadState,
    header_buf: [u8; MessageHeader::SERIALIZED_LEN],
    header_filled: usize,
    payload: BytesMut,

    inflater: Option<Inflater>,
    inflated: BytesMut,
    read_buf: Option<BytesMut>,
}

impl FrameReader {
    pub fn new(ctx: FramingContext, receiver: Arc<dyn MessageReceiver>, max_message_size: usize, inflate: bool) -> FrameReader {
        FrameReader {
            ctx,
            receiver,
            max_message_size,
            state: ReadState::AwaitingHeader,
            header_buf: [0; MessageHeader::SERIALIZED_LEN],
            header_filled: 0,
            payload: BytesMut::new(),
            inflater: if inflate { Some(Inflater::new()) } else { None },
            inflated: BytesMut::new(),
            read_buf: None,
        }
    }

    /// Reads until the stream fails. Bytes that were read past the end of the handshake are
    ///  passed in as `initial`.
    pub async fn run<R: AsyncRead + Unpin>(mut self, mut channel: R, initial: Bytes) -> Result<(), FramingError> {
        if !initial.is_empty() {
            trace!("handling {} bytes buffered during the handshake", initial.len());
            self.ctx.bandwidth.add_stream_read(initial.len());
            self.handle_buffered(&initial).await?;
        }

        loop {
            self.handle_read(&mut channel).await?;
        }
    }

    /// One read from the channel, followed by processing of whatever it returned. End of stream
    ///  is an error regardless of the state the reader is in.
    pub async fn handle_read<R: AsyncRead + Unpin>(&mut self, channel: &mut R) -> Result<(), FramingError> {
        let mut read_buf = match self.read_buf.take() {
            Some(buf) => buf,
            None => self.ctx.pool.get_from_pool(),
        };
        read_buf.clear();
        if read_buf.capacity() == 0 {
            read_buf.reserve(self.ctx.pool.buf_size().max(1));
        }

        let result = match channel.read_buf(&mut read_buf).await {
            Ok(0) => Err(FramingError::EndOfStream(self.state_description())),
            Ok(num_read) => {
                self.ctx.bandwidth.add_stream_read(num_read);
                self.handle_buffered(&read_buf[..num_read]).await
            }
            Err(e) => Err(e.into()),
        };

        self.read_buf = Some(read_buf);
        result
    }

    /// Processes bytes as they came from the channel, i.e. still compressed if the connection
    ///  is deflated. Compressed data is inflated in bounded steps, and messages are dispatched
    ///  after each step.
    pub async fn handle_buffered(&mut self, mut data: &[u8]) -> Result<(), FramingError> {
        loop {
            let mut messages = Vec::new();
            let result = self.process_step(&mut data, &mut messages);

            // messages that were complete before a framing error are still delivered
            self.dispatch(messages).await;
            if !result? {
                return Ok(());
            }
        }
    }

    /// Returns true if there is more data to process
    fn process_step(&mut self, data: &mut &[u8], messages: &mut Vec<Message>) -> Result<bool, FramingError> {
        let Some(inflater) = self.inflater.as_mut() else {
            let input = mem::take(data);
            self.deframe(input, messages)?;
            return Ok(false);
        };

        self.inflated.clear();
        let input: &[u8] = *data;
        let (consumed, produced) = inflater.inflate(input, &mut self.inflated, MAX_INFLATE_STEP)?;
        *data = &input[consumed..];
        self.ctx.bandwidth.add_inflated(consumed, produced);

        let inflated = mem::take(&mut self.inflated);
        let result = self.deframe(&inflated, messages);
        self.inflated = inflated;
        result?;

        let progressed = consumed > 0 || produced > 0;
        Ok(progressed && (!data.is_empty() || produced == MAX_INFLATE_STEP))
    }

    fn deframe(&mut self, mut input: &[u8], messages: &mut Vec<Message>) -> Result<(), FramingError> {
        loop {
            match mem::replace(&mut self.state, ReadState::AwaitingHeader) {
                ReadState::AwaitingHeader => {
                    if input.is_empty() {
                        return Ok(());
                    }

                    let num_copied = min(input.len(), MessageHeader::SERIALIZED_LEN - self.header_filled);
                    self.header_buf[self.header_filled..self.header_filled + num_copied].copy_from_slice(&input[..num_copied]);
                    self.header_filled += num_copied;
                    input = &input[num_copied..];

                    if self.header_filled < MessageHeader::SERIALIZED_LEN {
                        continue;
                    }
                    self.header_filled = 0;

                    let header = MessageHeader::from_bytes(&self.header_buf);
                    let payload_len: usize = header.payload_len.safe_cast();
                    if payload_len > self.max_message_size {
                        debug!("message header {:?} exceeds maximum message size", header);
                        return Err(FramingError::PayloadTooLarge { declared: header.payload_len, max: self.max_message_size });
                    }

                    if header.payload_len == 0 {
                        self.state = ReadState::MessageReady(header, Bytes::new());
                    }
                    else {
                        self.payload = BytesMut::with_capacity(payload_len);
                        self.state = ReadState::AwaitingPayload(header);
                    }
                }
                ReadState::AwaitingPayload(header) => {
                    if input.is_empty() {
                        self.state = ReadState::AwaitingPayload(header);
                        return Ok(());
                    }

                    let missing = SafeCast::<usize>::safe_cast(header.payload_len) - self.payload.len();
                    let num_copied = min(missing, input.len());
                    self.payload.extend_from_slice(&input[..num_copied]);
                    input = &input[num_copied..];

                    self.state = if num_copied == missing {
                        ReadState::MessageReady(header, mem::take(&mut self.payload).freeze())
                    }
                    else {
                        ReadState::AwaitingPayload(header)
                    };
                }
                ReadState::MessageReady(header, payload) => {
                    self.ctx.bandwidth.add_protocol_read(MessageHeader::SERIALIZED_LEN + payload.len());

                    match self.ctx.codec.deserialize(&header, payload) {
                        Ok(message) => messages.push(message),
                        Err(e) => {
                            debug!("dropping message {:?}: {}", header, e);
                            self.ctx.stats.add_received_dropped();
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(&self, messages: Vec<Message>) {
        for message in messages {
            if self.ctx.is_closed() {
                debug!("connection closed - discarding received message {:?}", message);
                return;
            }

            trace!("received {:?}", message);
            self.ctx.stats.add_received(message.kind);
            self.receiver.on_message_received(message).await;
        }
    }

    fn state_description(&self) -> &'static str {
        match self.state {
            ReadState::AwaitingHeader if self.header_filled == 0 => "awaiting header",
            ReadState::AwaitingHeader => "reading header",
            _ => "reading payload",
        }
    }
}

impl Drop for FrameReader {
    fn drop(&mut self) {
        if let Some(buf) = self.read_buf.take() {
            self.ctx.pool.return_to_pool(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use bytes::BufMut;
    use rstest::rstest;
    use tokio::io::{duplex, AsyncWriteExt};
    use tokio::sync::mpsc::UnboundedReceiver;
    use crate::framing::buffer_pool::BufferPool;
    use crate::framing::deflate::Deflater;
    use crate::message::codec::GnutellaCodec;
    use crate::message::message::{Guid, MessageKind};
    use crate::stats::bandwidth::BandwidthStatistics;
    use crate::stats::connection_stats::ConnectionStats;
    use crate::test_util::message::{serialized, test_message};
    use crate::test_util::observer::ChannelReceiver;

    fn context() -> FramingContext {
        FramingContext {
            codec: Arc::new(GnutellaCodec::default()),
            pool: Arc::new(BufferPool::new(64, 4)),
            stats: Arc::new(ConnectionStats::default()),
            bandwidth: Arc::new(BandwidthStatistics::new()),
            closed: Default::default(),
        }
    }

    fn reader(ctx: &FramingContext, inflate: bool) -> (FrameReader, UnboundedReceiver<Message>) {
        let (receiver, rx) = ChannelReceiver::new();
        (FrameReader::new(ctx.clone(), Arc::new(receiver), 1000, inflate), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<Message> {
        let mut result = Vec::new();
        while let Ok(m) = rx.try_recv() {
            result.push(m);
        }
        result
    }

    fn sample_messages() -> Vec<Message> {
        vec![
            test_message(MessageKind::Query, 3, 1),
            test_message(MessageKind::Ping, 1, 0),
            test_message(MessageKind::QueryReply, 2, 4),
            test_message(MessageKind::PingReply, 2, 4),
        ]
    }

    #[rstest]
    #[case::byte_by_byte(1)]
    #[case::small(7)]
    #[case::header_size(23)]
    #[case::odd(41)]
    #[case::everything(10_000)]
    #[tokio::test]
    async fn test_split_reads(#[case] chunk_size: usize) {
        let ctx = context();
        let (mut reader, mut rx) = reader(&ctx, false);

        let messages = sample_messages();
        let buf = serialized(&messages);
        for chunk in buf.chunks(chunk_size) {
            reader.handle_buffered(chunk).await.unwrap();
        }

        assert_eq!(drain(&mut rx), messages);
        assert_eq!(ctx.stats.snapshot().received, 4);
        assert_eq!(ctx.stats.snapshot().queries_received, 1);
        assert_eq!(ctx.bandwidth.protocol_bytes_read(), buf.len() as u64);
    }

    #[tokio::test]
    async fn test_zero_length_payload() {
        let ctx = context();
        let (mut reader, mut rx) = reader(&ctx, false);

        let ping = Message::new(Guid([1; 16]), MessageKind::Ping, 1, 0, Bytes::new());
        reader.handle_buffered(&serialized(&[ping.clone()])).await.unwrap();

        let received = drain(&mut rx);
        assert_eq!(received, vec![ping]);
        assert!(received[0].payload.is_empty());
    }

    #[tokio::test]
    async fn test_payload_too_large() {
        let ctx = context();
        let (mut reader, mut rx) = reader(&ctx, false);

        let first = test_message(MessageKind::Query, 3, 1);
        let mut buf = serialized(&[first.clone()]);
        buf.put_slice(&[5; 16]);
        buf.put_u8(MessageKind::FUNCTION_QUERY);
        buf.put_u8(1);
        buf.put_u8(0);
        buf.put_u32_le(1001);

        match reader.handle_buffered(&buf).await {
            Err(FramingError::PayloadTooLarge { declared, max }) => {
                assert_eq!(declared, 1001);
                assert_eq!(max, 1000);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(drain(&mut rx), vec![first]);
    }

    #[tokio::test]
    async fn test_bad_message_is_not_fatal() {
        let ctx = context();
        let (mut reader, mut rx) = reader(&ctx, false);

        let mut buf = BytesMut::new();
        buf.put_slice(&[5; 16]);
        buf.put_u8(0x99);
        buf.put_u8(1);
        buf.put_u8(0);
        buf.put_u32_le(3);
        buf.put_slice(&[1, 2, 3]);
        let valid = test_message(MessageKind::Push, 2, 2);
        buf.extend_from_slice(&serialized(&[valid.clone()]));

        reader.handle_buffered(&buf).await.unwrap();

        assert_eq!(drain(&mut rx), vec![valid]);
        assert_eq!(ctx.stats.snapshot().received_dropped, 1);
        assert_eq!(ctx.stats.snapshot().received, 1);
    }

    #[tokio::test]
    async fn test_inflate() {
        let ctx = context();
        let (mut reader, mut rx) = reader(&ctx, true);

        let messages = sample_messages();
        let plain = serialized(&messages);
        let mut compressed = BytesMut::new();
        let mut deflater = Deflater::new();
        deflater.deflate(&plain, &mut compressed).unwrap();
        deflater.sync_flush(&mut compressed).unwrap();

        for chunk in compressed.chunks(10) {
            reader.handle_buffered(chunk).await.unwrap();
        }

        assert_eq!(drain(&mut rx), messages);
        assert_eq!(ctx.bandwidth.protocol_bytes_read(), plain.len() as u64);
    }

    #[tokio::test]
    async fn test_inflate_is_bounded_per_step() {
        let ctx = context();
        let (mut reader, mut rx) = reader(&ctx, true);

        let messages: Vec<Message> = (0..200)
            .map(|_| Message::new(Guid::random(), MessageKind::Query, 3, 1, Bytes::from(vec![0u8; 900])))
            .collect();
        let plain = serialized(&messages);
        let mut compressed = BytesMut::new();
        let mut deflater = Deflater::new();
        deflater.deflate(&plain, &mut compressed).unwrap();
        deflater.sync_flush(&mut compressed).unwrap();
        assert!(compressed.len() * 10 < plain.len());

        // a single small read that expands to far more than one step
        reader.handle_buffered(&compressed).await.unwrap();

        assert_eq!(drain(&mut rx), messages);
        assert!(reader.inflated.capacity() <= 2 * MAX_INFLATE_STEP);
        assert_eq!(ctx.bandwidth.protocol_bytes_read(), plain.len() as u64);
    }

    #[tokio::test]
    async fn test_corrupt_compressed_stream() {
        let ctx = context();
        let (mut reader, _rx) = reader(&ctx, true);

        assert!(matches!(reader.handle_buffered(&[0xff; 40]).await, Err(FramingError::Decompression(_))));
    }

    #[tokio::test]
    async fn test_end_of_stream() {
        let ctx = context();
        let (mut reader, _rx) = reader(&ctx, false);

        let (mut remote, mut local) = duplex(1024);
        remote.write_all(&[1, 2, 3, 4, 5]).await.unwrap();
        drop(remote);

        reader.handle_read(&mut local).await.unwrap();
        assert_eq!(ctx.bandwidth.stream_bytes_read(), 5);

        match reader.handle_read(&mut local).await {
            Err(FramingError::EndOfStream(state)) => assert_eq!(state, "reading header"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_end_of_stream_between_messages() {
        let ctx = context();
        let (mut reader, _rx) = reader(&ctx, false);

        let (remote, mut local) = duplex(1024);
        drop(remote);

        assert!(matches!(reader.handle_read(&mut local).await, Err(FramingError::EndOfStream("awaiting header"))));
    }

    #[tokio::test]
    async fn test_no_dispatch_after_close() {
        let ctx = context();
        let (mut reader, mut rx) = reader(&ctx, false);

        ctx.closed.store(true, Ordering::Release);
        reader.handle_buffered(&serialized(&sample_messages())).await.unwrap();

        assert!(drain(&mut rx).is_empty());
        assert_eq!(ctx.stats.snapshot().received, 0);
    }

    #[tokio::test]
    async fn test_run_with_buffered_handshake_bytes() {
        let ctx = context();
        let (reader, mut rx) = reader(&ctx, false);

        let messages = sample_messages();
        let buf = serialized(&messages);
        let (initial, rest) = buf.split_at(30);

        let (mut remote, local) = duplex(16);
        let handle = tokio::spawn(reader.run(local, Bytes::copy_from_slice(initial)));

        remote.write_all(rest).await.unwrap();
        for expected in &messages {
            assert_eq!(&rx.recv().await.unwrap(), expected);
        }

        drop(remote);
        assert!(matches!(handle.await.unwrap(), Err(FramingError::EndOfStream(_))));
        assert_eq!(ctx.pool.num_pooled(), 1);
    }
}
