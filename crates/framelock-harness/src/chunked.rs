//! Partial-read simulation.

use std::io::{self, Read};

/// Reader that returns at most one chunk per `read`, cycling through the
/// configured chunk sizes.
#[derive(Debug, Clone)]
pub struct ChunkedReader {
    data: Vec<u8>,
    pos: usize,
    chunks: Vec<usize>,
    next: usize,
}

impl ChunkedReader {
    /// Serve `data` in chunks of `chunks[0]`, `chunks[1]`, ... (cycled).
    /// Zero-sized entries are treated as one byte.
    pub fn new(data: impl Into<Vec<u8>>, chunks: impl Into<Vec<usize>>) -> Self {
        let mut chunks = chunks.into();
        if chunks.is_empty() {
            chunks.push(1);
        }
        Self { data: data.into(), pos: 0, chunks, next: 0 }
    }

    /// One byte per read.
    pub fn byte_at_a_time(data: impl Into<Vec<u8>>) -> Self {
        Self::new(data, vec![1])
    }

    /// Bytes not yet handed out
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let chunk = self.chunks[self.next % self.chunks.len()].max(1);
        self.next += 1;

        let len = chunk.min(buf.len()).min(self.remaining());
        buf[..len].copy_from_slice(&self.data[self.pos..self.pos + len]);
        self.pos += len;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn honours_chunk_sizes() {
        let mut reader = ChunkedReader::new(vec![1, 2, 3, 4, 5, 6], vec![1, 3]);
        let mut buf = [0u8; 16];

        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(reader.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[2, 3, 4]);
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
