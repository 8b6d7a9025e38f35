//! Runtime error types.

use std::{io, time::Duration};

use framelock_core::{ConfigError, SessionError, StateError};
use framelock_proto::ProtocolError;
use thiserror::Error;

/// How an error affects the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Startup cannot continue; the application should exit
    FatalSetup,
    /// Expected condition worth retrying (slow peer, startup race)
    Transient,
    /// One connection is finished; the process carries on
    ConnectionTerminal,
}

/// Errors from the socket runtime
#[derive(Debug, Error)]
pub enum NetError {
    /// Configuration is unusable
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Host identity could not be determined
    #[error("failed to determine host identity: {0}")]
    HostInfo(#[source] io::Error),

    /// Peer address did not resolve
    #[error("failed to resolve {address}: {source}")]
    Resolve {
        /// Address as configured
        address: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Listener could not bind
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Bind address
        address: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Socket option could not be applied
    #[error("failed to set {option}: {source}")]
    SocketOption {
        /// Option name
        option: &'static str,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Thread could not be spawned
    #[error("failed to spawn thread {name}: {source}")]
    Spawn {
        /// Thread name
        name: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Connect retry loop was cancelled
    #[error("connecting to {address} was cancelled")]
    Cancelled {
        /// Target address
        address: String,
    },

    /// Connect retry loop ran out of time
    #[error("could not connect to {address} within {elapsed:?}")]
    ConnectTimeout {
        /// Target address
        address: String,
        /// Time spent retrying
        elapsed: Duration,
    },

    /// Listen called on a connecting side or the other way round
    #[error("{operation} is not valid for connection {id}")]
    WrongRole {
        /// Connection id
        id: usize,
        /// Attempted operation
        operation: &'static str,
    },

    /// No session is established
    #[error("connection {id} is not connected")]
    NotConnected {
        /// Connection id
        id: usize,
    },

    /// No data-transfer connection has this id
    #[error("no data transfer connection {id}")]
    UnknownConnection {
        /// Requested connection id
        id: usize,
    },

    /// Writing to the socket failed; the session is shut down
    #[error("send on connection {id} failed: {source}")]
    Send {
        /// Connection id
        id: usize,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// No external-control connection is configured
    #[error("no external control connection configured")]
    NoExternalControl,

    /// Frame barrier waited too long
    #[error("sync timed out after {waited:?} waiting for {waiting_for}")]
    SyncTimeout {
        /// Time spent waiting
        waited: Duration,
        /// Who was not ready
        waiting_for: String,
    },

    /// Session state machine rejected an operation
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Message could not be built
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Application state could not be decoded
    #[error(transparent)]
    State(#[from] StateError),
}

impl NetError {
    /// Map onto the fatal / transient / terminal taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_)
            | Self::HostInfo(_)
            | Self::Resolve { .. }
            | Self::Bind { .. }
            | Self::SocketOption { .. }
            | Self::Spawn { .. }
            | Self::Cancelled { .. }
            | Self::ConnectTimeout { .. }
            | Self::WrongRole { .. }
            | Self::NoExternalControl => ErrorKind::FatalSetup,
            Self::SyncTimeout { .. } => ErrorKind::Transient,
            Self::NotConnected { .. }
            | Self::UnknownConnection { .. }
            | Self::Send { .. }
            | Self::Session(_)
            | Self::Protocol(_)
            | Self::State(_) => ErrorKind::ConnectionTerminal,
        }
    }

    /// Whether startup should abort
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::FatalSetup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy() {
        let bind = NetError::Bind {
            address: "0.0.0.0:1".to_owned(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert_eq!(bind.kind(), ErrorKind::FatalSetup);
        assert!(bind.is_fatal());

        let timeout =
            NetError::SyncTimeout { waited: Duration::from_secs(1), waiting_for: "master".into() };
        assert_eq!(timeout.kind(), ErrorKind::Transient);

        let send = NetError::Send { id: 0, source: io::Error::from(io::ErrorKind::BrokenPipe) };
        assert_eq!(send.kind(), ErrorKind::ConnectionTerminal);

        let config = NetError::from(ConfigError::NoNodes);
        assert_eq!(config.kind(), ErrorKind::FatalSetup);
    }

    #[test]
    fn messages_name_the_connection() {
        let err = NetError::NotConnected { id: 3 };
        assert_eq!(err.to_string(), "connection 3 is not connected");
    }
}
