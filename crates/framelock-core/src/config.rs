//! Sync tuning and cluster topology.

use std::{collections::HashSet, time::Duration};

use crate::{error::ConfigError, host::HostIdentity};

/// Loopback address used for every peer in the local network modes
pub const LOCALHOST: &str = "127.0.0.1";

/// Address authority-side sync listeners bind to
pub const WILDCARD_ADDRESS: &str = "0.0.0.0";

/// How strictly the render loops are locked together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Authority waits for every acknowledgement before swapping; followers
    /// wait for the next frame before drawing.
    #[default]
    Firm,
    /// Authority never waits; followers only wait for data newer than their
    /// last acknowledgement.
    Loose,
}

/// Tuning for the sync runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Frame numbers wrap modulo this value
    pub frame_ceiling: i32,
    /// Largest accepted payload; bigger declared lengths close the connection
    pub max_payload_size: usize,
    /// Initial capacity of receive and shared state buffers
    pub initial_buffer_size: usize,
    /// Bytes requested per socket read
    pub read_chunk_size: usize,
    /// Pause between connect attempts
    pub connect_retry_interval: Duration,
    /// Give up connecting after this long; `None` retries until cancelled
    pub connect_timeout: Option<Duration>,
    /// Fail a barrier wait after this long
    pub sync_timeout: Duration,
    /// Log a progress line once per second while the barrier waits
    pub print_sync_message: bool,
    /// How often a listener checks for shutdown while no client is pending
    pub accept_poll_interval: Duration,
    /// Firm or loose frame lock
    pub mode: SyncMode,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            frame_ceiling: 10_000,
            max_payload_size: 64 * 1024 * 1024,
            initial_buffer_size: 1024,
            read_chunk_size: 64 * 1024,
            connect_retry_interval: Duration::from_millis(250),
            connect_timeout: None,
            sync_timeout: Duration::from_secs(60),
            print_sync_message: true,
            accept_poll_interval: Duration::from_millis(50),
            mode: SyncMode::Firm,
        }
    }
}

impl SyncConfig {
    /// Frame numbers wrap at `ceiling`; values below 2 fail validation.
    pub fn with_frame_ceiling(mut self, ceiling: i32) -> Self {
        self.frame_ceiling = ceiling;
        self
    }

    /// Largest accepted payload in bytes.
    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Starting receive buffer capacity.
    pub fn with_initial_buffer_size(mut self, size: usize) -> Self {
        self.initial_buffer_size = size;
        self
    }

    /// Bytes requested per socket read.
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    /// Pause between follower connection attempts.
    pub fn with_connect_retry_interval(mut self, interval: Duration) -> Self {
        self.connect_retry_interval = interval;
        self
    }

    /// Give up connecting after `timeout`.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Longest a barrier wait may block.
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Log barrier stalls while waiting.
    pub fn with_print_sync_message(mut self, enabled: bool) -> Self {
        self.print_sync_message = enabled;
        self
    }

    /// How often a listener checks for cancellation.
    pub fn with_accept_poll_interval(mut self, interval: Duration) -> Self {
        self.accept_poll_interval = interval;
        self
    }

    /// Firm or loose barrier.
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_ceiling < 2 {
            return Err(ConfigError::InvalidSetting {
                field: "frame_ceiling",
                reason: "must be at least 2",
            });
        }
        if self.max_payload_size == 0 || i32::try_from(self.max_payload_size).is_err() {
            return Err(ConfigError::InvalidSetting {
                field: "max_payload_size",
                reason: "must be between 1 and i32::MAX",
            });
        }
        if self.read_chunk_size == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "read_chunk_size",
                reason: "must not be zero",
            });
        }
        if self.accept_poll_interval.is_zero() {
            return Err(ConfigError::InvalidSetting {
                field: "accept_poll_interval",
                reason: "must not be zero",
            });
        }
        Ok(())
    }
}

/// One rendering node of the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Address as the operating system reports it (exact match)
    pub address: String,
    /// Port the authority listens on for this node
    pub sync_port: u16,
    /// Port for the node's data-transfer connection, if it has one
    pub data_transfer_port: Option<u16>,
}

impl NodeConfig {
    /// Node reachable at `address`, synced over `sync_port`.
    pub fn new(address: impl Into<String>, sync_port: u16) -> Self {
        Self { address: address.into(), sync_port, data_transfer_port: None }
    }

    /// Also open a data-transfer connection on `port`.
    pub fn with_data_transfer_port(mut self, port: u16) -> Self {
        self.data_transfer_port = Some(port);
        self
    }
}

/// Framing used on the external-control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExternalFormat {
    /// Same 5-byte framing as sync traffic; each sync payload is one command
    #[default]
    Framed,
    /// CR-LF terminated text lines, answered with `OK`
    Ascii,
}

/// Optional loopback side channel for out-of-band commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalControlConfig {
    /// Loopback port to listen on
    pub port: u16,
    /// Line or framed protocol
    pub format: ExternalFormat,
}

/// Role selection.
///
/// `Remote` derives the role from the host's addresses. The local modes
/// force it so a whole cluster can run on one machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkMode {
    /// Authority iff this host matches the master address
    #[default]
    Remote,
    /// Authority on loopback
    LocalServer,
    /// Follower on loopback
    LocalClient,
}

impl NetworkMode {
    /// Whether every peer lives on this machine
    pub fn is_local(self) -> bool {
        matches!(self, Self::LocalServer | Self::LocalClient)
    }

    fn name(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::LocalServer => "local server",
            Self::LocalClient => "local client",
        }
    }
}

/// Where this process sits in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalRole {
    /// Authority (listens, sends state) or follower (connects, applies state)
    pub is_server: bool,
    /// Index into [`ClusterConfig::nodes`]; `None` for an authority that is
    /// not itself a rendering node
    pub this_node: Option<usize>,
}

/// Cluster topology as far as synchronization cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Address of the authority
    pub master_address: String,
    /// Rendering nodes in configuration order
    pub nodes: Vec<NodeConfig>,
    /// Optional external-control channel
    pub external_control: Option<ExternalControlConfig>,
    /// Explicit identity of this process; required in local modes
    pub this_node: Option<usize>,
}

impl ClusterConfig {
    /// Cluster led by `master_address` with no external control.
    pub fn new(master_address: impl Into<String>, nodes: Vec<NodeConfig>) -> Self {
        Self { master_address: master_address.into(), nodes, external_control: None, this_node: None }
    }

    /// Serve external control on `port` using `format`.
    pub fn with_external_control(mut self, port: u16, format: ExternalFormat) -> Self {
        self.external_control = Some(ExternalControlConfig { port, format });
        self
    }

    /// Pin this process to node `index`.
    pub fn with_this_node(mut self, index: usize) -> Self {
        self.this_node = Some(index);
        self
    }

    /// Reject configurations that cannot produce a working cluster.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.master_address.is_empty() {
            return Err(ConfigError::EmptyMasterAddress);
        }
        if self.nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }

        let mut ports = HashSet::new();
        for (index, node) in self.nodes.iter().enumerate() {
            if node.address.is_empty() {
                return Err(ConfigError::EmptyAddress { node: index });
            }
            if node.sync_port == 0 {
                return Err(ConfigError::ZeroPort { what: "sync" });
            }
            if !ports.insert(node.sync_port) {
                return Err(ConfigError::DuplicatePort { port: node.sync_port });
            }
            if let Some(port) = node.data_transfer_port {
                if port == 0 {
                    return Err(ConfigError::ZeroPort { what: "data transfer" });
                }
                if !ports.insert(port) {
                    return Err(ConfigError::DuplicatePort { port });
                }
            }
        }

        if let Some(external) = &self.external_control {
            if external.port == 0 {
                return Err(ConfigError::ZeroPort { what: "external control" });
            }
            if !ports.insert(external.port) {
                return Err(ConfigError::DuplicatePort { port: external.port });
            }
        }

        if let Some(index) = self.this_node
            && index >= self.nodes.len()
        {
            return Err(ConfigError::UnknownNode { index, count: self.nodes.len() });
        }

        Ok(())
    }

    /// Decide authority/follower and which node this process is.
    ///
    /// Remote mode: authority iff `host` matches the master address; the node
    /// index is the explicit one or else the first node whose address matches
    /// `host`. A follower must find itself; an authority need not be a
    /// rendering node.
    pub fn resolve(&self, mode: NetworkMode, host: &HostIdentity) -> Result<LocalRole, ConfigError> {
        match mode {
            NetworkMode::LocalServer | NetworkMode::LocalClient => {
                let index = self
                    .this_node
                    .ok_or(ConfigError::MissingNodeIndex { mode: mode.name() })?;
                self.node(index)?;
                Ok(LocalRole {
                    is_server: mode == NetworkMode::LocalServer,
                    this_node: Some(index),
                })
            },
            NetworkMode::Remote => {
                let is_server = host.match_address(&self.master_address);
                let this_node = match self.this_node {
                    Some(index) => Some(self.node(index).map(|_| index)?),
                    None => self.nodes.iter().position(|node| host.match_address(&node.address)),
                };

                if !is_server && this_node.is_none() {
                    return Err(ConfigError::NodeNotFound { host: host.host_name().to_owned() });
                }

                Ok(LocalRole { is_server, this_node })
            },
        }
    }

    /// Address a follower connects to.
    pub fn remote_address(&self, mode: NetworkMode) -> &str {
        if mode.is_local() { LOCALHOST } else { &self.master_address }
    }

    /// Node by index.
    pub fn node(&self, index: usize) -> Result<&NodeConfig, ConfigError> {
        self.nodes.get(index).ok_or(ConfigError::UnknownNode { index, count: self.nodes.len() })
    }
}
