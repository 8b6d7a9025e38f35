//! State codecs for tests.

use std::sync::{Arc, Mutex, PoisonError};

use framelock_core::{StateCodec, StateError, StateReader, StateWriter};

/// Authority codec writing 0, 1, 2, ... as one `i32` per frame.
#[derive(Debug, Default)]
pub struct CounterCodec {
    next: i32,
}

impl CounterCodec {
    /// Counter starting at `first`.
    pub fn starting_at(first: i32) -> Self {
        Self { next: first }
    }
}

impl StateCodec for CounterCodec {
    fn encode(&mut self, writer: &mut StateWriter<'_>) {
        writer.write_i32(self.next);
        self.next += 1;
    }

    fn decode(&mut self, reader: &mut StateReader<'_>) -> Result<(), StateError> {
        self.next = reader.read_i32()?;
        Ok(())
    }
}

/// Follower codec recording every decoded `i32`.
#[derive(Debug, Clone, Default)]
pub struct RecordingCodec {
    values: Arc<Mutex<Vec<i32>>>,
}

impl RecordingCodec {
    /// Codec plus a handle sharing its record.
    pub fn new() -> (Self, Self) {
        let codec = Self::default();
        (codec.clone(), codec)
    }

    /// Values decoded so far
    pub fn values(&self) -> Vec<i32> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl StateCodec for RecordingCodec {
    fn encode(&mut self, _writer: &mut StateWriter<'_>) {}

    fn decode(&mut self, reader: &mut StateReader<'_>) -> Result<(), StateError> {
        let value = reader.read_i32()?;
        self.values.lock().unwrap_or_else(PoisonError::into_inner).push(value);
        Ok(())
    }
}

/// Codec carrying a blob of fixed size, recording received lengths.
#[derive(Debug, Clone, Default)]
pub struct BlobCodec {
    size: usize,
    received: Arc<Mutex<Vec<usize>>>,
}

impl BlobCodec {
    /// Encodes `size` bytes per frame.
    pub fn new(size: usize) -> Self {
        Self { size, received: Arc::default() }
    }

    /// Lengths of blobs decoded so far
    pub fn received(&self) -> Vec<usize> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl StateCodec for BlobCodec {
    fn encode(&mut self, writer: &mut StateWriter<'_>) {
        writer.write_bytes(&vec![0xA5; self.size]);
    }

    fn decode(&mut self, reader: &mut StateReader<'_>) -> Result<(), StateError> {
        let blob = reader.read_bytes()?;
        self.received.lock().unwrap_or_else(PoisonError::into_inner).push(blob.len());
        Ok(())
    }
}
