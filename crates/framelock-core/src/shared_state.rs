//! Per-frame application state buffer.
//!
//! The authority's render thread fills the buffer through its [`StateCodec`]
//! once per frame; a follower's reader thread refills it from the received
//! payload and runs the same codec's `decode`. Values are written in a fixed
//! order with no per-field tags, so `encode` and `decode` must visit fields
//! in the same order. A decoder that reads past the end gets
//! [`StateError::UnexpectedEnd`] rather than garbage.
//!
//! All numbers are little-endian. Strings and blobs carry a `u32` length
//! prefix.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::StateError;

/// Application hook that serializes its per-frame state.
pub trait StateCodec: Send {
    /// Append this frame's state (authority only).
    fn encode(&mut self, writer: &mut StateWriter<'_>);

    /// Apply a received frame's state (followers only).
    fn decode(&mut self, reader: &mut StateReader<'_>) -> Result<(), StateError>;
}

/// Growable buffer holding one frame of application state.
#[derive(Debug, Default)]
pub struct SharedState {
    buf: BytesMut,
    pos: usize,
}

impl SharedState {
    /// Empty buffer with room for `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self { buf: BytesMut::with_capacity(capacity), pos: 0 }
    }

    /// Replace the contents with the codec's encoding of the current frame.
    pub fn encode(&mut self, codec: &mut dyn StateCodec) -> &[u8] {
        self.buf.clear();
        self.pos = 0;
        codec.encode(&mut StateWriter { buf: &mut self.buf });
        &self.buf
    }

    /// Copy in a received payload and run the codec over it.
    ///
    /// Grows the backing storage when `data` exceeds the current capacity;
    /// never shrinks it.
    pub fn decode(&mut self, data: &[u8], codec: &mut dyn StateCodec) -> Result<(), StateError> {
        self.reserve(data.len());
        self.buf.clear();
        self.buf.extend_from_slice(data);

        let mut reader = StateReader::new(&self.buf);
        let result = codec.decode(&mut reader);
        self.pos = reader.position();
        result
    }

    /// Make room for at least `capacity` bytes.
    pub fn reserve(&mut self, capacity: usize) {
        if capacity > self.buf.capacity() {
            let before = self.buf.capacity();
            self.buf.reserve(capacity - self.buf.len());
            tracing::debug!(from = before, to = self.buf.capacity(), "grew shared state buffer");
        }
    }

    /// Current contents
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Length of the current contents
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the buffer holds no state
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Allocated capacity
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Read cursor after the last decode
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Typed append access used by [`StateCodec::encode`].
#[derive(Debug)]
pub struct StateWriter<'a> {
    buf: &'a mut BytesMut,
}

impl<'a> StateWriter<'a> {
    /// Writer appending to `buf`.
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf }
    }

    /// Append a little-endian `f32`.
    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    /// Append a little-endian `f64`.
    pub fn write_f64(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    /// Append a little-endian `i32`.
    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    /// Append a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Append a little-endian `u32`.
    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    /// Append a little-endian `i64`.
    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    /// Append a little-endian `u64`.
    pub fn write_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    /// Written as one byte, 0 or 1.
    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    /// Length-prefixed UTF-8.
    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// Length-prefixed blob. Blobs over `u32::MAX` bytes are truncated to
    /// that length.
    pub fn write_bytes(&mut self, value: &[u8]) {
        let len = u32::try_from(value.len()).unwrap_or(u32::MAX);
        self.buf.put_u32_le(len);
        self.buf.put_slice(&value[..len as usize]);
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Typed cursor access used by [`StateCodec::decode`].
#[derive(Debug, Clone)]
pub struct StateReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StateReader<'a> {
    /// Reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], StateError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(StateError::UnexpectedEnd { needed, remaining });
        }
        let slice = &self.data[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    /// Read a little-endian `f32`.
    pub fn read_f32(&mut self) -> Result<f32, StateError> {
        Ok(self.take(4)?.get_f32_le())
    }

    /// Read a little-endian `f64`.
    pub fn read_f64(&mut self) -> Result<f64, StateError> {
        Ok(self.take(8)?.get_f64_le())
    }

    /// Read a little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, StateError> {
        Ok(self.take(4)?.get_i32_le())
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, StateError> {
        Ok(self.take(1)?[0])
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, StateError> {
        Ok(self.take(4)?.get_u32_le())
    }

    /// Read a little-endian `i64`.
    pub fn read_i64(&mut self) -> Result<i64, StateError> {
        Ok(self.take(8)?.get_i64_le())
    }

    /// Read a little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, StateError> {
        Ok(self.take(8)?.get_u64_le())
    }

    /// Any non-zero byte is `true`.
    pub fn read_bool(&mut self) -> Result<bool, StateError> {
        Ok(self.read_u8()? != 0)
    }

    /// Length-prefixed UTF-8.
    pub fn read_str(&mut self) -> Result<&'a str, StateError> {
        let start = self.pos;
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| StateError::InvalidUtf8 { offset: start + 4 })
    }

    /// Borrowed blob; no copy.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], StateError> {
        let start = self.pos;
        let len = self.read_u32()? as usize;
        self.take(len).inspect_err(|_| self.pos = start)
    }

    /// Cursor offset from the start of the state
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the cursor
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}
