//! Wire format for the framelock protocol.
//!
//! Every message on a framelock TCP stream is a fixed 5-byte header followed
//! by a variable-length payload:
//!
//! ```text
//! +--------+------------------------+---------------------+
//! | tag u8 | payload length i32 LE  | payload (N bytes)   |
//! +--------+------------------------+---------------------+
//! ```
//!
//! TCP gives us an ordered byte stream with no message boundaries, so the
//! receiver accumulates bytes in a [`FrameDecoder`] and only yields a
//! [`Frame`] once the header and all `N` payload bytes have arrived. Partial
//! reads and several messages in one read are both normal.
//!
//! # Security
//!
//! The length field is attacker-controlled. Parsing rejects negative lengths
//! and any length above the configured maximum before a single payload byte
//! is buffered, so a corrupt header can never drive an unbounded allocation.
//!
//! # Byte order
//!
//! All multi-byte integers are little-endian regardless of host byte order.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod decoder;
pub mod errors;
pub mod frame;
pub mod header;
pub mod payloads;
pub mod tag;

pub use decoder::FrameDecoder;
pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use payloads::{DataPackage, PackageAck, SizeHint, SyncPayload};
pub use tag::MessageTag;
