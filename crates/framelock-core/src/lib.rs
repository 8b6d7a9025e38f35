//! Framelock protocol core logic
//!
//! Pure logic for cluster frame synchronization, decoupled from sockets and
//! threads. Everything here takes time as a parameter and returns actions or
//! values; the `framelock-net` runtime owns the I/O.
//!
//! # Components
//!
//! - [`counters`]: send/receive frame counters shared by every connection
//! - [`session`]: per-connection sync state machine (action-based)
//! - [`shared_state`]: the per-frame application state buffer and codec trait
//! - [`config`]: sync tuning and cluster topology
//! - [`host`]: self-identification of this process within the cluster
//! - [`external`]: line decoding for the ASCII external-control channel
//! - [`error`]: error types

pub mod config;
pub mod counters;
pub mod error;
pub mod external;
pub mod host;
pub mod session;
pub mod shared_state;

pub use config::{
    ClusterConfig, ExternalControlConfig, ExternalFormat, LocalRole, NetworkMode, NodeConfig,
    SyncConfig, SyncMode,
};
pub use counters::FrameCounters;
pub use error::{ConfigError, ControlError, SessionError, StateError};
pub use external::{ControlLine, LineDecoder};
pub use host::HostIdentity;
pub use session::{ConnectionKind, SessionAction, SessionState, SyncSession};
pub use shared_state::{SharedState, StateCodec, StateReader, StateWriter};
