//! Fixed 5-byte message header.
//!
//! The header is a zero-copy view: parsing is a bounds-checked reinterpretation
//! of the first five bytes, with the layout verified at compile time by
//! `zerocopy`. Validation (known tag, sane length) happens in
//! [`FrameHeader::from_bytes`]; a header that made it out of there is safe to
//! act on.

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, byteorder::little_endian::I32,
};

use crate::{MessageTag, ProtocolError, Result};

/// Message header: tag byte followed by a little-endian `i32` payload length.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
#[repr(C)]
pub struct FrameHeader {
    tag: u8,
    length: I32,
}

impl FrameHeader {
    /// Encoded header size in bytes
    pub const SIZE: usize = 5;

    /// Build a header for a payload of `payload_len` bytes.
    ///
    /// # Errors
    /// `PayloadTooLarge` if the length does not fit the signed 32-bit field.
    pub fn new(tag: MessageTag, payload_len: usize) -> Result<Self> {
        let length = i32::try_from(payload_len).map_err(|_| ProtocolError::PayloadTooLarge {
            size: payload_len,
            max: i32::MAX as usize,
        })?;

        Ok(Self { tag: tag.to_u8(), length: I32::new(length) })
    }

    /// Parse and validate a header from the start of `bytes`.
    ///
    /// # Arguments
    /// * `bytes` - At least [`Self::SIZE`] bytes; extra bytes are ignored
    /// * `max_payload` - Largest payload length this receiver accepts
    ///
    /// # Errors
    /// - `Truncated` if fewer than five bytes are available
    /// - `UnknownTag` for a tag byte outside [`MessageTag`]
    /// - `NegativeLength` / `PayloadTooLarge` for an untrustworthy length
    pub fn from_bytes(bytes: &[u8], max_payload: usize) -> Result<Self> {
        let (header, _) = Self::read_from_prefix(bytes).map_err(|_| ProtocolError::Truncated {
            context: "frame header",
            expected: Self::SIZE,
            actual: bytes.len(),
        })?;

        if MessageTag::from_u8(header.tag).is_none() {
            return Err(ProtocolError::UnknownTag(header.tag));
        }

        let length = header.length.get();
        if length < 0 {
            return Err(ProtocolError::NegativeLength(length));
        }
        if length as usize > max_payload {
            return Err(ProtocolError::PayloadTooLarge { size: length as usize, max: max_payload });
        }

        Ok(header)
    }

    /// Header bytes as written on the wire.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Message tag. `None` only for headers that bypassed validation.
    pub fn tag(&self) -> Option<MessageTag> {
        MessageTag::from_u8(self.tag)
    }

    /// Raw tag byte
    pub fn tag_byte(&self) -> u8 {
        self.tag
    }

    /// Declared payload length in bytes
    pub fn payload_len(&self) -> usize {
        self.length.get().max(0) as usize
    }
}
