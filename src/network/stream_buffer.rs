use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use crate::{AppError, AppResult};

pub const DEFAULT_READ_CHUNK_SIZE: usize = 4 * 1024;
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Accumulates bytes read from a stream until they form whole frames.
///
/// Unconsumed bytes live in `data[start..end]`. Before a read the live
/// region is moved to the front, and only if that does not leave room for
/// a full chunk is the backing array doubled, up to `max_size`.
#[derive(Debug)]
pub struct StreamBuffer {
    data: Vec<u8>,
    start: usize,
    end: usize,
    chunk_size: usize,
    max_size: usize,
}

impl Default for StreamBuffer {
    fn default() -> Self {
        StreamBuffer::new(DEFAULT_READ_CHUNK_SIZE, DEFAULT_MAX_BUFFER_SIZE)
    }
}

impl StreamBuffer {
    pub fn new(chunk_size: usize, max_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let max_size = max_size.max(chunk_size);
        StreamBuffer {
            data: vec![0; chunk_size],
            start: 0,
            end: 0,
            chunk_size,
            max_size,
        }
    }

    /// Reads at most one chunk from `reader`.
    ///
    /// A reader at end of stream yields `UnexpectedEof`, other I/O errors
    /// are passed through.
    pub async fn fill<R>(&mut self, reader: &mut R) -> AppResult<usize>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.reserve_chunk()?;
        let limit = self.end + self.chunk_size;
        let read = reader.read(&mut self.data[self.end..limit]).await?;
        if read == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream").into());
        }
        self.end += read;
        trace!("stream buffer filled {} bytes, {} buffered", read, self.len());
        Ok(read)
    }

    fn reserve_chunk(&mut self) -> AppResult<()> {
        if self.end + self.chunk_size <= self.data.len() {
            return Ok(());
        }
        self.compact();
        let needed = self.end + self.chunk_size;
        if needed > self.max_size {
            debug!(
                "stream buffer needs {} bytes, ceiling is {}",
                needed, self.max_size
            );
            return Err(AppError::BufferOverflow(self.max_size));
        }
        if needed > self.data.len() {
            let mut capacity = self.data.len().max(1);
            while capacity < needed {
                capacity *= 2;
            }
            self.data.resize(capacity.min(self.max_size), 0);
        }
        Ok(())
    }

    fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        self.data.copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.start = 0;
    }

    /// The unconsumed bytes.
    pub fn peek(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// Drops `n` bytes from the front of the unconsumed region.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `n` bytes are buffered.
    pub fn consume(&mut self, n: usize) {
        assert!(
            n <= self.len(),
            "consume {} bytes with only {} buffered",
            n,
            self.len()
        );
        self.start += n;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn check_invariant(buffer: &StreamBuffer) {
        assert!(buffer.start <= buffer.end);
        assert!(buffer.end <= buffer.data.len());
        assert!(buffer.data.len() <= buffer.max_size);
    }

    #[tokio::test]
    async fn test_fill_peek_consume() {
        let mut buffer = StreamBuffer::new(4, 64);
        let mut reader: &[u8] = b"abcdefghij";

        assert_eq!(buffer.fill(&mut reader).await.unwrap(), 4);
        assert_eq!(buffer.peek(), b"abcd");
        buffer.consume(3);
        assert_eq!(buffer.peek(), b"d");
        check_invariant(&buffer);

        assert_eq!(buffer.fill(&mut reader).await.unwrap(), 4);
        assert_eq!(buffer.peek(), b"defgh");
        check_invariant(&buffer);

        assert_eq!(buffer.fill(&mut reader).await.unwrap(), 2);
        assert_eq!(buffer.peek(), b"defghij");
        buffer.consume(7);
        assert!(buffer.is_empty());
        check_invariant(&buffer);
    }

    #[tokio::test]
    async fn test_compact_before_grow() {
        let mut buffer = StreamBuffer::new(4, 64);
        let mut reader: &[u8] = b"0123456789";
        buffer.fill(&mut reader).await.unwrap();
        buffer.fill(&mut reader).await.unwrap();
        assert_eq!(buffer.capacity(), 8);
        buffer.consume(6);
        // "67" moves to the front, which leaves room for a chunk
        buffer.fill(&mut reader).await.unwrap();
        assert_eq!(buffer.capacity(), 8);
        assert_eq!(buffer.peek(), b"6789");
        check_invariant(&buffer);
    }

    #[tokio::test]
    async fn test_growth_doubles() {
        let mut buffer = StreamBuffer::new(4, 64);
        let data = vec![7u8; 20];
        let mut reader: &[u8] = &data;
        while buffer.len() < 20 {
            buffer.fill(&mut reader).await.unwrap();
            check_invariant(&buffer);
        }
        assert_eq!(buffer.capacity(), 32);
        assert_eq!(buffer.peek(), &data[..]);
    }

    #[tokio::test]
    async fn test_growth_ceiling() {
        let mut buffer = StreamBuffer::new(4, 8);
        let mut reader: &[u8] = &[1; 16];
        buffer.fill(&mut reader).await.unwrap();
        buffer.fill(&mut reader).await.unwrap();
        assert!(matches!(
            buffer.fill(&mut reader).await,
            Err(AppError::BufferOverflow(8))
        ));
        // consuming frees room again
        buffer.consume(4);
        assert_eq!(buffer.fill(&mut reader).await.unwrap(), 4);
        check_invariant(&buffer);
    }

    #[tokio::test]
    async fn test_end_of_stream() {
        let mut buffer = StreamBuffer::default();
        let mut reader: &[u8] = &[];
        match buffer.fill(&mut reader).await {
            Err(e) => assert!(e.is_eof()),
            Ok(n) => panic!("read {} bytes from an empty stream", n),
        }
    }

    #[rstest]
    #[case(0, 3)]
    #[case(2, 1)]
    #[case(3, 0)]
    fn test_consume_within_bounds(#[case] consume: usize, #[case] left: usize) {
        let mut buffer = StreamBuffer::new(4, 8);
        buffer.data[..3].copy_from_slice(b"xyz");
        buffer.end = 3;
        buffer.consume(consume);
        assert_eq!(buffer.len(), left);
        check_invariant(&buffer);
    }

    #[test]
    #[should_panic(expected = "consume 4 bytes")]
    fn test_consume_past_end_panics() {
        let mut buffer = StreamBuffer::new(4, 8);
        buffer.end = 3;
        buffer.consume(4);
    }
}
