use std::io;
use std::mem;
use std::sync::{Arc, Mutex};
use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tracing::{debug, trace};
use crate::connection::observer::ConnectionListener;
use crate::error::FramingError;
use crate::framing::deflate::Deflater;
use crate::framing::FramingContext;
use crate::message::message::Message;
use crate::queue::composite::CompositeScheduler;

/// uncompressed bytes after which a sync flush is emitted even if more messages are waiting
const DEFLATE_FLUSH_THRESHOLD: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteInterest {
    /// there is data that the channel did not accept yet
    Interested,
    /// the scheduler is empty and everything was written
    NotInterested,
}

/// Serialized bytes on their way to the channel, together with the messages that count as
///  sent once the last byte is written
struct PendingWrite {
    buf: BytesMut,
    written: usize,
    messages: Vec<Message>,
}

/// Pulls messages from the connection's scheduler, serializes them (deflating if negotiated)
///  and writes them to the channel. The writer holds at most one buffer's worth of data
///  outside the scheduler, so prioritization and dropping stay effective while the peer reads
///  slowly.
///
/// With deflate, message bytes go through the compressor without flushing. A sync flush makes
///  everything written so far decodable by the peer, and the messages compressed since the
///  previous flush are reported as sent once it is written. Flushes happen when the scheduler
///  runs dry, and after every [DEFLATE_FLUSH_THRESHOLD] uncompressed bytes so that a peer
///  under sustained load still gets decodable data.
pub struct FrameWriter {
    ctx: FramingContext,
    scheduler: Arc<Mutex<CompositeScheduler>>,
    listener: Arc<dyn ConnectionListener>,
    wakeup: Arc<Notify>,

    pending: Option<PendingWrite>,
    deflater: Option<Deflater>,
    awaiting_flush: Vec<Message>,
    deflated_since_flush: usize,
}

impl FrameWriter {
    pub fn new(ctx: FramingContext, scheduler: Arc<Mutex<CompositeScheduler>>, listener: Arc<dyn ConnectionListener>, wakeup: Arc<Notify>, deflate: bool) -> FrameWriter {
        FrameWriter {
            ctx,
            scheduler,
            listener,
            wakeup,
            pending: None,
            deflater: if deflate { Some(Deflater::new()) } else { None },
            awaiting_flush: Vec::new(),
            deflated_since_flush: 0,
        }
    }

    /// Writes until the channel fails. The writer sleeps whenever it has nothing to write, and
    ///  is woken through the [Notify] it was created with.
    pub async fn run<W: AsyncWrite + Unpin>(mut self, mut channel: W) -> Result<(), FramingError> {
        loop {
            match self.handle_write(&mut channel).await? {
                WriteInterest::Interested => {}
                WriteInterest::NotInterested => {
                    channel.flush().await?;
                    trace!("send queue drained - waiting for messages");
                    self.wakeup.notified().await;
                }
            }
        }
    }

    /// One write pass: first the remainder of earlier data, then freshly staged messages
    ///  until either the channel accepts less than it was offered or there is nothing left to send.
    pub async fn handle_write<W: AsyncWrite + Unpin>(&mut self, channel: &mut W) -> Result<WriteInterest, FramingError> {
        loop {
            if let Some(mut pending) = self.pending.take() {
                if pending.written < pending.buf.len() {
                    let num_written = match channel.write(&pending.buf[pending.written..]).await {
                        Ok(0) => {
                            self.pending = Some(pending);
                            return Err(io::Error::from(io::ErrorKind::WriteZero).into());
                        }
                        Ok(n) => n,
                        Err(e) => {
                            self.pending = Some(pending);
                            return Err(e.into());
                        }
                    };
                    self.ctx.bandwidth.add_stream_written(num_written);
                    pending.written += num_written;

                    if pending.written < pending.buf.len() {
                        trace!("partial write: {} of {} bytes", pending.written, pending.buf.len());
                        self.pending = Some(pending);
                        return Ok(WriteInterest::Interested);
                    }
                }

                for message in mem::take(&mut pending.messages) {
                    self.on_sent(&message);
                }
                self.ctx.pool.return_to_pool(pending.buf);
                continue;
            }

            if self.deflated_since_flush >= DEFLATE_FLUSH_THRESHOLD && self.stage_sync_flush()? {
                continue;
            }

            match self.next_message() {
                Some(message) => self.stage(message)?,
                None => {
                    if !self.stage_sync_flush()? {
                        return Ok(WriteInterest::NotInterested);
                    }
                }
            }
        }
    }

    fn next_message(&self) -> Option<Message> {
        let (next, num_dropped) = {
            let mut scheduler = self.scheduler.lock().unwrap();
            let next = scheduler.remove_next();
            (next, scheduler.reset_dropped_count())
        };
        if num_dropped > 0 {
            debug!("send queue dropped {} messages", num_dropped);
        }
        self.ctx.stats.add_sent_dropped(num_dropped);
        next
    }

    fn stage(&mut self, message: Message) -> Result<(), FramingError> {
        trace!("sending {:?}", message);
        let mut buf = self.ctx.pool.get_from_pool();
        self.ctx.codec.serialize(&message, &mut buf);
        self.ctx.bandwidth.add_protocol_written(buf.len());

        let Some(deflater) = self.deflater.as_mut() else {
            self.pending = Some(PendingWrite {
                buf,
                written: 0,
                messages: vec![message],
            });
            return Ok(());
        };

        let mut compressed = self.ctx.pool.get_from_pool();
        let num_compressed = deflater.deflate(&buf, &mut compressed)?;
        self.ctx.bandwidth.add_deflated(buf.len(), num_compressed);
        self.deflated_since_flush += buf.len();
        self.ctx.pool.return_to_pool(buf);

        self.awaiting_flush.push(message);
        self.stage_bytes(compressed, Vec::new());
        Ok(())
    }

    /// Returns false if there was nothing to flush
    fn stage_sync_flush(&mut self) -> Result<bool, FramingError> {
        if self.awaiting_flush.is_empty() {
            return Ok(false);
        }
        let Some(deflater) = self.deflater.as_mut() else {
            return Ok(false);
        };

        let mut flushed = self.ctx.pool.get_from_pool();
        let num_flushed = deflater.sync_flush(&mut flushed)?;
        self.ctx.bandwidth.add_deflated(0, num_flushed);
        trace!("sync flush after {} messages", self.awaiting_flush.len());

        let messages = mem::take(&mut self.awaiting_flush);
        self.deflated_since_flush = 0;
        self.stage_bytes(flushed, messages);
        Ok(true)
    }

    fn stage_bytes(&mut self, buf: BytesMut, messages: Vec<Message>) {
        if buf.is_empty() && messages.is_empty() {
            // the compressor kept everything for later
            self.ctx.pool.return_to_pool(buf);
            return;
        }
        self.pending = Some(PendingWrite {
            buf,
            written: 0,
            messages,
        });
    }

    fn on_sent(&self, message: &Message) {
        self.ctx.stats.add_sent();
        if !self.ctx.is_closed() {
            self.listener.on_message_sent(message);
        }
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.ctx.pool.return_to_pool(pending.buf);
        }
    }
}
