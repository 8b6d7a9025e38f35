//! Error types for framelock core.

use framelock_proto::{MessageTag, ProtocolError};
use thiserror::Error;

use crate::session::{ConnectionKind, SessionState};

/// Errors raised by the sync session state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Operation not valid in the current session state
    #[error("invalid state {state:?} for operation {operation}")]
    InvalidState {
        /// State the session was in
        state: SessionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Operation only valid for the other side of the connection
    #[error("{operation} is not valid on the {side} side")]
    WrongSide {
        /// Operation that was attempted
        operation: &'static str,
        /// `"authority"` or `"follower"`
        side: &'static str,
    },

    /// Operation only valid on another connection kind
    #[error("{operation} is not valid on a {kind:?} connection")]
    WrongKind {
        /// Operation that was attempted
        operation: &'static str,
        /// Kind of the connection it was attempted on
        kind: ConnectionKind,
    },

    /// Message that makes no sense for this connection kind or side
    #[error("unexpected {tag:?} message on {kind:?} connection")]
    UnexpectedMessage {
        /// Tag of the offending message
        tag: MessageTag,
        /// Connection kind it arrived on
        kind: ConnectionKind,
    },

    /// Malformed payload
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors reading typed values out of the shared state buffer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// Decoder asked for more bytes than the frame carried
    #[error("state buffer exhausted: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd {
        /// Bytes the read required
        needed: usize,
        /// Bytes left after the cursor
        remaining: usize,
    },

    /// String field was not valid UTF-8
    #[error("string field at offset {offset} is not valid UTF-8")]
    InvalidUtf8 {
        /// Cursor position of the string body
        offset: usize,
    },
}

/// Invalid sync or cluster configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Cluster has no nodes
    #[error("cluster configuration has no nodes")]
    NoNodes,

    /// Master address is empty
    #[error("master address is empty")]
    EmptyMasterAddress,

    /// A node has an empty address
    #[error("node {node} has an empty address")]
    EmptyAddress {
        /// Node index
        node: usize,
    },

    /// A port is zero
    #[error("{what} port must not be zero")]
    ZeroPort {
        /// Which port (`"sync"`, `"data transfer"` or `"external control"`)
        what: &'static str,
    },

    /// Two connections would share one port
    #[error("port {port} is used by more than one connection")]
    DuplicatePort {
        /// The repeated port
        port: u16,
    },

    /// Explicit node index outside the node list
    #[error("node index {index} out of range (cluster has {count} nodes)")]
    UnknownNode {
        /// Requested index
        index: usize,
        /// Number of configured nodes
        count: usize,
    },

    /// Local network modes need an explicit node index
    #[error("{mode} mode requires an explicit node index")]
    MissingNodeIndex {
        /// Mode name
        mode: &'static str,
    },

    /// None of the configured node addresses belong to this host
    #[error("this host ({host}) does not match any configured node address")]
    NodeNotFound {
        /// Host name used for matching
        host: String,
    },

    /// A sync tuning value is out of range
    #[error("invalid {field}: {reason}")]
    InvalidSetting {
        /// Field name
        field: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },
}

/// Errors on the ASCII external-control channel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// Peer sent a line longer than the configured limit
    #[error("control line exceeds {max} bytes")]
    LineTooLong {
        /// Limit in bytes
        max: usize,
    },
}
