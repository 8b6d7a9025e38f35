//! Message tags.
//!
//! The tag is the first byte of every message. Values come from the ASCII
//! control range (ACK plus 17-20); since the receiver always reads a complete
//! 5-byte header before any payload, they only need to be distinct.

/// Message kind carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageTag {
    /// Application state snapshot (or acknowledgement) for one frame
    Sync = 17,
    /// Buffer-size hint sent ahead of a larger sync payload
    Size = 18,
    /// Every node of the cluster is connected (no payload)
    Connected = 19,
    /// Peer is shutting the session down (no payload)
    Disconnect = 20,
    /// Receipt of a data-transfer package
    Ack = 6,
}

impl MessageTag {
    /// Parse a tag byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            17 => Some(Self::Sync),
            18 => Some(Self::Size),
            19 => Some(Self::Connected),
            20 => Some(Self::Disconnect),
            6 => Some(Self::Ack),
            _ => None,
        }
    }

    /// Tag byte as written on the wire.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable name for logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Size => "size",
            Self::Connected => "connected",
            Self::Disconnect => "disconnect",
            Self::Ack => "ack",
        }
    }
}
