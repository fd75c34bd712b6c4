use bytes::BytesMut;
use std::sync::Mutex;
use tracing::{debug, trace};

/// Pool of serialization / read buffers shared by a connection's reader and writer. A buffer is
///  checked out for the lifetime of one frame (or one read) and returned afterward, so steady
///  state traffic does not allocate per message.
pub struct BufferPool {
    buf_size: usize,
    buffers: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    pub fn new(buf_size: usize, max_pool_size: usize) -> Self {
        BufferPool {
            buf_size,
            buffers: Mutex::new(Vec::with_capacity(max_pool_size)),
        }
    }

    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    pub fn get_from_pool(&self) -> BytesMut {
        {
            let mut buffers = self.buffers.lock().unwrap();
            if let Some(buffer) = buffers.pop() {
                trace!("returning buffer from pool");
                return buffer;
            }
        }

        debug!("no buffer in pool: creating new buffer");
        BytesMut::with_capacity(self.buf_size)
    }

    pub fn return_to_pool(&self, mut buffer: BytesMut) {
        if buffer.capacity() < self.buf_size {
            // part of the buffer was split off and frozen, e.g. into a message payload
            debug!("returned buffer has capacity {} < {}: discarding", buffer.capacity(), self.buf_size);
            return;
        }

        buffer.clear();

        let mut buffers = self.buffers.lock().unwrap();
        if buffers.capacity() > buffers.len() {
            trace!("returning buffer to pool");
            buffers.push(buffer);
        }
        else {
            debug!("pool is full: discarding returned buffer");
        }
    }

    pub fn num_pooled(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use super::*;

    #[test]
    fn test_clear() {
        let pool = BufferPool::new(10, 10);

        let mut buf = BytesMut::with_capacity(10);
        buf.put_u8(1);

        pool.return_to_pool(buf);

        assert!(pool.get_from_pool().is_empty());
    }

    #[test]
    fn test_reuse() {
        let pool = BufferPool::new(16, 2);
        let a = pool.get_from_pool();
        let b = pool.get_from_pool();
        let c = pool.get_from_pool();
        assert_eq!(pool.num_pooled(), 0);

        pool.return_to_pool(a);
        pool.return_to_pool(b);
        pool.return_to_pool(c);
        assert_eq!(pool.num_pooled(), 2);

        let _ = pool.get_from_pool();
        assert_eq!(pool.num_pooled(), 1);
    }

    #[test]
    fn test_discards_shrunk_buffer() {
        let pool = BufferPool::new(16, 2);
        let mut buf = pool.get_from_pool();
        buf.put_slice(&[1; 16]);
        let _frozen = buf.split_to(10).freeze();

        pool.return_to_pool(buf);
        assert_eq!(pool.num_pooled(), 0);
    }

    #[test]
    fn test_keeps_grown_buffer() {
        let pool = BufferPool::new(4, 2);
        let mut buf = pool.get_from_pool();
        buf.put_slice(&[1; 100]);

        pool.return_to_pool(buf);
        assert_eq!(pool.num_pooled(), 1);
        assert!(pool.get_from_pool().capacity() >= 100);
    }
}
