//! Typed views over frame payloads.
//!
//! [`MessageTag::Sync`](crate::MessageTag::Sync) carries a frame on sync
//! connections and a package on data-transfer connections.
//! [`MessageTag::Size`](crate::MessageTag::Size) and
//! [`MessageTag::Ack`](crate::MessageTag::Ack) carry one integer each;
//! `Connected` and `Disconnect` are bare markers.

use bytes::{Buf, Bytes};

use crate::{ProtocolError, Result};

/// Payload of a sync message.
///
/// ```text
/// +---------------------+--------------------------+
/// | frame number i32 LE | application state bytes  |
/// +---------------------+--------------------------+
/// ```
///
/// An empty state is an acknowledgement from a follower.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPayload {
    /// Frame number the state belongs to
    pub frame_number: i32,
    /// Opaque application state (zero-copy slice of the frame payload)
    pub state: Bytes,
}

impl SyncPayload {
    /// Parse a sync payload.
    ///
    /// # Errors
    /// - `Truncated` if the frame number is missing
    /// - `NegativeFrameNumber` for frame numbers below zero
    pub fn parse(payload: &Bytes) -> Result<Self> {
        if payload.len() < 4 {
            return Err(ProtocolError::Truncated {
                context: "sync frame number",
                expected: 4,
                actual: payload.len(),
            });
        }

        let mut cursor = payload.clone();
        let frame_number = cursor.get_i32_le();
        if frame_number < 0 {
            return Err(ProtocolError::NegativeFrameNumber(frame_number));
        }

        Ok(Self { frame_number, state: cursor })
    }

    /// Whether this is a bare acknowledgement
    pub fn is_acknowledge(&self) -> bool {
        self.state.is_empty()
    }
}

/// Payload of a data-transfer message.
///
/// ```text
/// +--------------------+-----------------+
/// | package id i32 LE  | data bytes      |
/// +--------------------+-----------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPackage {
    /// Application-chosen package id
    pub package_id: i32,
    /// Package contents (zero-copy slice of the frame payload)
    pub data: Bytes,
}

impl DataPackage {
    /// Parse a data-transfer payload.
    ///
    /// # Errors
    /// - `Truncated` if the package id is missing
    /// - `NegativePackageId` for ids below zero
    pub fn parse(payload: &Bytes) -> Result<Self> {
        let (package_id, data) = split_package_id(payload, "data package id")?;
        Ok(Self { package_id, data })
    }
}

/// Payload of an [`Ack`](crate::MessageTag::Ack) message: the id of the
/// package received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageAck {
    /// Package id being acknowledged
    pub package_id: i32,
}

impl PackageAck {
    /// Parse an acknowledgement payload. Trailing bytes are ignored.
    ///
    /// # Errors
    /// - `Truncated` if the package id is missing
    /// - `NegativePackageId` for ids below zero
    pub fn parse(payload: &Bytes) -> Result<Self> {
        let (package_id, _) = split_package_id(payload, "package ack")?;
        Ok(Self { package_id })
    }
}

fn split_package_id(payload: &Bytes, context: &'static str) -> Result<(i32, Bytes)> {
    if payload.len() < 4 {
        return Err(ProtocolError::Truncated { context, expected: 4, actual: payload.len() });
    }

    let mut cursor = payload.clone();
    let package_id = cursor.get_i32_le();
    if package_id < 0 {
        return Err(ProtocolError::NegativePackageId(package_id));
    }
    Ok((package_id, cursor))
}

/// Payload of a size message.
///
/// A four-byte little-endian capacity request, or nothing at all when the
/// sender has no data yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeHint {
    /// Requested receive capacity; `None` for the "no data yet" placeholder
    pub size: Option<u32>,
}

impl SizeHint {
    /// Parse a size payload.
    ///
    /// # Errors
    /// `Truncated` for payloads that are neither empty nor four bytes long.
    pub fn parse(payload: &Bytes) -> Result<Self> {
        match payload.len() {
            0 => Ok(Self { size: None }),
            4 => {
                let mut cursor = payload.clone();
                Ok(Self { size: Some(cursor.get_u32_le()) })
            },
            actual => {
                Err(ProtocolError::Truncated { context: "size hint", expected: 4, actual })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Frame;

    #[test]
    fn parse_sync_payload() {
        let frame = Frame::sync(42, b"state").unwrap();
        let payload = SyncPayload::parse(frame.payload()).unwrap();
        assert_eq!(payload.frame_number, 42);
        assert_eq!(payload.state.as_ref(), b"state");
        assert!(!payload.is_acknowledge());
    }

    #[test]
    fn parse_acknowledge() {
        let frame = Frame::acknowledge(3);
        let payload = SyncPayload::parse(frame.payload()).unwrap();
        assert_eq!(payload.frame_number, 3);
        assert!(payload.is_acknowledge());
    }

    #[test]
    fn reject_short_sync_payload() {
        let result = SyncPayload::parse(&Bytes::from_static(&[1, 2]));
        assert!(matches!(result, Err(ProtocolError::Truncated { expected: 4, actual: 2, .. })));
    }

    #[test]
    fn reject_negative_frame_number() {
        let result = SyncPayload::parse(&Bytes::from_static(&[0xFE, 0xFF, 0xFF, 0xFF]));
        assert_eq!(result, Err(ProtocolError::NegativeFrameNumber(-2)));
    }

    #[test]
    fn parse_data_package() {
        let frame = Frame::data_package(7, b"mesh").unwrap();
        let package = DataPackage::parse(frame.payload()).unwrap();
        assert_eq!(package.package_id, 7);
        assert_eq!(package.data.as_ref(), b"mesh");
    }

    #[test]
    fn package_ack_carries_id() {
        let frame = Frame::package_ack(12);
        assert_eq!(frame.tag(), crate::MessageTag::Ack);
        assert_eq!(PackageAck::parse(frame.payload()).unwrap().package_id, 12);
    }

    #[test]
    fn reject_negative_package_id() {
        let result = DataPackage::parse(&Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF, 1]));
        assert_eq!(result, Err(ProtocolError::NegativePackageId(-1)));
        let result = PackageAck::parse(&Bytes::from_static(&[1]));
        assert!(matches!(result, Err(ProtocolError::Truncated { actual: 1, .. })));
    }

    #[test]
    fn empty_size_hint_means_no_data() {
        assert_eq!(SizeHint::parse(&Bytes::new()).unwrap(), SizeHint { size: None });
    }

    #[test]
    fn size_hint_roundtrip() {
        let frame = Frame::size_hint(65_536);
        assert_eq!(SizeHint::parse(frame.payload()).unwrap().size, Some(65_536));
    }

    #[test]
    fn reject_malformed_size_hint() {
        let result = SizeHint::parse(&Bytes::from_static(&[1, 2, 3]));
        assert!(matches!(result, Err(ProtocolError::Truncated { actual: 3, .. })));
    }
}
