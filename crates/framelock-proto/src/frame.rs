//! Protocol frames.
//!
//! A [`Frame`] is one complete message: its tag plus the payload bytes. The
//! header is derived from those two on encode, so a `Frame` can never carry a
//! length that disagrees with its payload.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{FrameHeader, MessageTag, Result};

/// A complete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    tag: MessageTag,
    payload: Bytes,
}

impl Frame {
    /// Create a frame with an arbitrary payload.
    ///
    /// # Errors
    /// `PayloadTooLarge` if the payload length does not fit the header.
    pub fn new(tag: MessageTag, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        FrameHeader::new(tag, payload.len())?;
        Ok(Self { tag, payload })
    }

    /// Sync message: frame number followed by the application state bytes.
    ///
    /// # Errors
    /// `PayloadTooLarge` if the state does not fit a single message.
    pub fn sync(frame_number: i32, state: &[u8]) -> Result<Self> {
        let mut payload = BytesMut::with_capacity(4 + state.len());
        payload.put_i32_le(frame_number);
        payload.extend_from_slice(state);
        Self::new(MessageTag::Sync, payload.freeze())
    }

    /// Acknowledgement: a sync message carrying no state.
    pub fn acknowledge(frame_number: i32) -> Self {
        Self { tag: MessageTag::Sync, payload: Bytes::copy_from_slice(&frame_number.to_le_bytes()) }
    }

    /// Data-transfer package: package id followed by the data bytes.
    ///
    /// # Errors
    /// `PayloadTooLarge` if the data does not fit a single message.
    pub fn data_package(package_id: i32, data: &[u8]) -> Result<Self> {
        let mut payload = BytesMut::with_capacity(4 + data.len());
        payload.put_i32_le(package_id);
        payload.extend_from_slice(data);
        Self::new(MessageTag::Sync, payload.freeze())
    }

    /// Receipt for a data-transfer package.
    pub fn package_ack(package_id: i32) -> Self {
        Self { tag: MessageTag::Ack, payload: Bytes::copy_from_slice(&package_id.to_le_bytes()) }
    }

    /// Size hint announcing a receive buffer of at least `size` bytes.
    pub fn size_hint(size: u32) -> Self {
        Self { tag: MessageTag::Size, payload: Bytes::copy_from_slice(&size.to_le_bytes()) }
    }

    /// Cluster-connected marker.
    pub fn connected() -> Self {
        Self { tag: MessageTag::Connected, payload: Bytes::new() }
    }

    /// Graceful session shutdown marker.
    pub fn disconnect() -> Self {
        Self { tag: MessageTag::Disconnect, payload: Bytes::new() }
    }

    /// Message tag
    pub fn tag(&self) -> MessageTag {
        self.tag
    }

    /// Payload bytes (without header)
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the frame, returning its payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Total bytes on the wire, header included
    pub fn encoded_len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }

    /// Append header and payload to `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        // Length was checked at construction, so the header cannot fail here.
        let length = self.payload.len() as i32;
        dst.put_u8(self.tag.to_u8());
        dst.put_i32_le(length);
        dst.put_slice(&self.payload);
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_matches_header_layout() {
        let frame = Frame::new(MessageTag::Sync, vec![1u8, 2, 3]).unwrap();
        let bytes = frame.to_bytes();

        let header = FrameHeader::from_bytes(&bytes, 1024).unwrap();
        assert_eq!(header.tag(), Some(MessageTag::Sync));
        assert_eq!(header.payload_len(), 3);
        assert_eq!(&bytes[FrameHeader::SIZE..], &[1, 2, 3]);
        assert_eq!(bytes.len(), frame.encoded_len());
    }

    #[test]
    fn sync_frame_prefixes_frame_number() {
        let frame = Frame::sync(7, &[0xAB, 0xCD]).unwrap();
        assert_eq!(frame.tag(), MessageTag::Sync);
        assert_eq!(frame.payload().as_ref(), &[7, 0, 0, 0, 0xAB, 0xCD]);
    }

    #[test]
    fn acknowledge_is_sync_without_state() {
        let frame = Frame::acknowledge(9999);
        assert_eq!(frame, Frame::sync(9999, &[]).unwrap());
    }

    #[test]
    fn control_frames_have_empty_payloads() {
        assert!(Frame::connected().payload().is_empty());
        assert!(Frame::disconnect().payload().is_empty());
        assert_eq!(Frame::connected().encoded_len(), FrameHeader::SIZE);
    }
}
