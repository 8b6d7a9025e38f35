//! Streaming frame decoder.
//!
//! Turns an arbitrarily chunked byte stream back into messages. Bytes are
//! appended with [`FrameDecoder::extend`] as they arrive from the socket and
//! complete frames are drained with [`FrameDecoder::decode`]:
//!
//! ```text
//! read() ──> extend() ──> [ hdr | payload... | hdr | pay ]
//!                           └── decode() ──┘  └ partial, kept for next read
//! ```
//!
//! The buffer holds exactly the bytes received toward the current message
//! (plus any that follow it). A message is only yielded once `5 + length`
//! bytes are present; leftover bytes stay buffered as the start of the next
//! one. The buffer grows on demand and never shrinks below what it has
//! reserved.

use bytes::BytesMut;

use crate::{Frame, FrameHeader, MessageTag, ProtocolError, Result};

/// Incremental decoder for one connection's receive direction.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_payload: usize,
}

impl FrameDecoder {
    /// Create a decoder.
    ///
    /// # Arguments
    /// * `initial_capacity` - Receive buffer capacity to start with
    /// * `max_payload` - Largest declared payload accepted before the stream
    ///   is considered corrupt
    pub fn new(initial_capacity: usize, max_payload: usize) -> Self {
        Self { buf: BytesMut::with_capacity(initial_capacity), max_payload }
    }

    /// Append bytes received from the transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if one is buffered.
    ///
    /// Call repeatedly until it returns `Ok(None)`: a single read may carry
    /// several messages.
    ///
    /// # Errors
    /// Any header validation failure. The decoder must be discarded after an
    /// error since the stream is no longer aligned.
    pub fn decode(&mut self) -> Result<Option<Frame>> {
        if self.buf.len() < FrameHeader::SIZE {
            return Ok(None);
        }

        let header = FrameHeader::from_bytes(&self.buf, self.max_payload)?;
        let total = FrameHeader::SIZE + header.payload_len();

        if self.buf.len() < total {
            // Partial message: make room for the rest up front so the
            // remaining reads append without reallocating.
            self.buf.reserve(total - self.buf.len());
            return Ok(None);
        }

        let tag =
            header.tag().ok_or_else(|| ProtocolError::UnknownTag(header.tag_byte()))?;
        let mut message = self.buf.split_to(total);
        let payload = message.split_off(FrameHeader::SIZE).freeze();

        Frame::new(tag, payload).map(Some)
    }

    /// Grow the receive buffer ahead of a large message.
    ///
    /// Requests above the payload maximum are clamped: a size hint is an
    /// optimization and must not be able to force a huge allocation.
    pub fn reserve(&mut self, capacity: usize) {
        let target = capacity.min(self.max_payload + FrameHeader::SIZE);
        if target > self.buf.capacity() {
            self.buf.reserve(target - self.buf.len());
        }
    }

    /// Bytes received toward messages not yet decoded
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Current receive buffer capacity
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Largest payload this decoder accepts
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Whether a partial header is buffered whose tag is already known.
    ///
    /// Used for diagnostics when a peer disconnects mid-message.
    pub fn pending_tag(&self) -> Option<MessageTag> {
        self.buf.first().and_then(|byte| MessageTag::from_u8(*byte))
    }
}
