//! Stream compression for connections that negotiated `Content-Encoding: deflate`. Both
//!  directions use a single zlib stream for the lifetime of the connection. The writer emits a
//!  sync flush when it runs out of messages and after a bounded amount of input, so the peer
//!  can decode everything reported as sent.

use std::cmp::min;
use bytes::BytesMut;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use crate::error::FramingError;

const CHUNK_SIZE: usize = 4096;

pub struct Inflater {
    inner: Decompress,
}

impl Inflater {
    pub fn new() -> Inflater {
        Inflater {
            inner: Decompress::new(true),
        }
    }

    /// Decompresses `input` until it is used up or `max_out` bytes were appended to `out`,
    ///  whichever comes first. Returns the number of input bytes consumed and the number of
    ///  bytes appended.
    pub fn inflate(&mut self, mut input: &[u8], out: &mut BytesMut, max_out: usize) -> Result<(usize, usize), FramingError> {
        let initial_in = input.len();
        let initial_len = out.len();

        loop {
            let room = max_out - (out.len() - initial_len);
            if room == 0 {
                break;
            }
            let chunk_size = min(room, CHUNK_SIZE);

            let start = out.len();
            out.resize(start + chunk_size, 0);

            let before_in = self.inner.total_in();
            let before_out = self.inner.total_out();
            let status = self.inner.decompress(input, &mut out[start..], FlushDecompress::None);
            let consumed = (self.inner.total_in() - before_in) as usize;
            let produced = (self.inner.total_out() - before_out) as usize;
            out.truncate(start + produced);

            let status = status.map_err(|e| FramingError::Decompression(e.to_string()))?;
            input = &input[consumed..];

            if status == Status::StreamEnd {
                if !input.is_empty() {
                    return Err(FramingError::Decompression("data after end of compressed stream".to_string()));
                }
                break;
            }
            if input.is_empty() && produced < chunk_size {
                break;
            }
            if consumed == 0 && produced == 0 {
                break;
            }
        }

        Ok((initial_in - input.len(), out.len() - initial_len))
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Deflater {
    inner: Compress,
}

impl Deflater {
    pub fn new() -> Deflater {
        Deflater {
            inner: Compress::new(Compression::default(), true),
        }
    }

    /// Compresses `input`, appending whatever output the compressor produces to `out`. Output
    ///  may be held back until the next [Deflater::sync_flush].
    pub fn deflate(&mut self, input: &[u8], out: &mut BytesMut) -> Result<usize, FramingError> {
        self.run(input, out, FlushCompress::None)
    }

    /// Emits all pending output, terminated at a byte boundary the peer can decode up to.
    pub fn sync_flush(&mut self, out: &mut BytesMut) -> Result<usize, FramingError> {
        self.run(&[], out, FlushCompress::Sync)
    }

    fn run(&mut self, mut input: &[u8], out: &mut BytesMut, flush: FlushCompress) -> Result<usize, FramingError> {
        let initial_len = out.len();

        loop {
            let start = out.len();
            out.resize(start + CHUNK_SIZE, 0);

            let before_in = self.inner.total_in();
            let before_out = self.inner.total_out();
            let result = self.inner.compress(input, &mut out[start..], flush);
            let consumed = (self.inner.total_in() - before_in) as usize;
            let produced = (self.inner.total_out() - before_out) as usize;
            out.truncate(start + produced);

            result.map_err(|e| FramingError::Compression(e.to_string()))?;
            input = &input[consumed..];

            // output space left over means the compressor has nothing more to say for now
            if input.is_empty() && produced < CHUNK_SIZE {
                break;
            }
        }

        Ok(out.len() - initial_len)
    }
}

impl Default for Deflater {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_with_sync_flush() {
        let mut deflater = Deflater::new();
        let mut inflater = Inflater::new();

        let original: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();

        let mut compressed = BytesMut::new();
        deflater.deflate(&original[..12_000], &mut compressed).unwrap();
        deflater.deflate(&original[12_000..], &mut compressed).unwrap();
        deflater.sync_flush(&mut compressed).unwrap();
        assert!(compressed.len() < original.len());

        // feed the compressed data in small pieces
        let mut decompressed = BytesMut::new();
        for chunk in compressed.chunks(100) {
            inflater.inflate(chunk, &mut decompressed, usize::MAX).unwrap();
        }
        assert_eq!(&decompressed[..], &original[..]);
    }

    #[test]
    fn test_sync_flush_makes_data_available() {
        let mut deflater = Deflater::new();
        let mut inflater = Inflater::new();

        let mut compressed = BytesMut::new();
        deflater.deflate(b"hello", &mut compressed).unwrap();
        deflater.sync_flush(&mut compressed).unwrap();

        let mut decompressed = BytesMut::new();
        let (consumed, produced) = inflater.inflate(&compressed, &mut decompressed, usize::MAX).unwrap();
        assert_eq!(consumed, compressed.len());
        assert_eq!(produced, 5);
        assert_eq!(&decompressed[..], b"hello");

        // the stream continues after a sync flush
        let mut compressed = BytesMut::new();
        deflater.deflate(b" world", &mut compressed).unwrap();
        deflater.sync_flush(&mut compressed).unwrap();
        inflater.inflate(&compressed, &mut decompressed, usize::MAX).unwrap();
        assert_eq!(&decompressed[..], b"hello world");
    }

    #[test]
    fn test_corrupt_input() {
        let mut inflater = Inflater::new();
        let mut out = BytesMut::new();
        assert!(inflater.inflate(&[0xff; 64], &mut out, usize::MAX).is_err());
    }

    #[test]
    fn test_output_limit() {
        let mut deflater = Deflater::new();
        let mut inflater = Inflater::new();

        let original = vec![7u8; 100_000];
        let mut compressed = BytesMut::new();
        deflater.deflate(&original, &mut compressed).unwrap();
        deflater.sync_flush(&mut compressed).unwrap();

        let mut input = &compressed[..];
        let mut decompressed = BytesMut::new();
        loop {
            let mut step = BytesMut::new();
            let (consumed, produced) = inflater.inflate(input, &mut step, 10_000).unwrap();
            assert!(produced <= 10_000);
            assert_eq!(step.len(), produced);
            input = &input[consumed..];
            decompressed.extend_from_slice(&step);

            if input.is_empty() && produced < 10_000 {
                break;
            }
        }
        assert_eq!(decompressed.len(), original.len());
        assert_eq!(&decompressed[..], &original[..]);
    }
}
