//! Loopback cluster fixture.
//!
//! Node 0 is the authority and runs in [`NetworkMode::LocalServer`]; nodes
//! `1..=followers` run in [`NetworkMode::LocalClient`]. Every node gets a
//! fresh port on 127.0.0.1, so several clusters can run in parallel tests.

use std::time::Duration;

use framelock_core::{
    ClusterConfig, ExternalFormat, HostIdentity, NetworkMode, NodeConfig, StateCodec, SyncConfig,
    SyncMode, config::LOCALHOST,
};
use framelock_net::{ConnectionManager, NetError};
use tracing::debug;

use crate::free_port;

/// Builder for [`LoopbackCluster`].
#[derive(Debug, Clone)]
pub struct LoopbackClusterBuilder {
    followers: usize,
    external: Option<ExternalFormat>,
    data_transfer: bool,
    sync: SyncConfig,
}

impl Default for LoopbackClusterBuilder {
    fn default() -> Self {
        Self {
            followers: 1,
            external: None,
            data_transfer: false,
            sync: SyncConfig::default()
                .with_connect_retry_interval(Duration::from_millis(20))
                .with_connect_timeout(Duration::from_secs(10))
                .with_accept_poll_interval(Duration::from_millis(10))
                .with_sync_timeout(Duration::from_secs(10))
                .with_print_sync_message(false),
        }
    }
}

impl LoopbackClusterBuilder {
    /// Number of follower nodes (default 1)
    pub fn followers(mut self, count: usize) -> Self {
        self.followers = count;
        self
    }

    /// Firm or loose lock
    pub fn mode(mut self, mode: SyncMode) -> Self {
        self.sync = self.sync.with_mode(mode);
        self
    }

    /// Enable the external-control listener on the authority.
    pub fn external(mut self, format: ExternalFormat) -> Self {
        self.external = Some(format);
        self
    }

    /// Give every follower a data-transfer connection.
    pub fn data_transfer(mut self) -> Self {
        self.data_transfer = true;
        self
    }

    /// Adjust the sync runtime configuration.
    pub fn sync_config(mut self, adjust: impl FnOnce(SyncConfig) -> SyncConfig) -> Self {
        self.sync = adjust(self.sync);
        self
    }

    /// Allocate ports and produce the fixture.
    pub fn build(self) -> LoopbackCluster {
        let nodes = (0..=self.followers)
            .map(|index| {
                let node = NodeConfig::new(LOCALHOST, free_port());
                if self.data_transfer && index > 0 {
                    node.with_data_transfer_port(free_port())
                } else {
                    node
                }
            })
            .collect();
        let mut cluster = ClusterConfig::new(LOCALHOST, nodes);
        if let Some(format) = self.external {
            cluster = cluster.with_external_control(free_port(), format);
        }
        debug!(nodes = cluster.nodes.len(), "built loopback cluster");

        LoopbackCluster { cluster, sync: self.sync }
    }
}

/// A cluster whose nodes all live on 127.0.0.1.
#[derive(Debug, Clone)]
pub struct LoopbackCluster {
    cluster: ClusterConfig,
    sync: SyncConfig,
}

impl LoopbackCluster {
    /// Start building.
    pub fn builder() -> LoopbackClusterBuilder {
        LoopbackClusterBuilder::default()
    }

    /// Shared configuration
    pub fn config(&self) -> &ClusterConfig {
        &self.cluster
    }

    /// Runtime configuration handed to every manager
    pub fn sync_config(&self) -> &SyncConfig {
        &self.sync
    }

    /// Port node `index` syncs on.
    pub fn sync_port(&self, index: usize) -> u16 {
        self.cluster.nodes.get(index).map_or(0, |node| node.sync_port)
    }

    /// Data-transfer port of node `index`, if it has one
    pub fn data_port(&self, index: usize) -> Option<u16> {
        self.cluster.nodes.get(index).and_then(|node| node.data_transfer_port)
    }

    /// External-control port, if enabled
    pub fn external_port(&self) -> Option<u16> {
        self.cluster.external_control.as_ref().map(|external| external.port)
    }

    /// Start the authority manager (node 0).
    ///
    /// # Errors
    /// Whatever [`ConnectionManager::init_with_host`] reports.
    pub fn authority(&self, codec: impl StateCodec + 'static) -> Result<ConnectionManager, NetError> {
        self.start(NetworkMode::LocalServer, 0, codec)
    }

    /// Start follower `index` (1-based). Blocks until it has connected.
    ///
    /// # Errors
    /// Whatever [`ConnectionManager::init_with_host`] reports.
    pub fn follower(
        &self,
        index: usize,
        codec: impl StateCodec + 'static,
    ) -> Result<ConnectionManager, NetError> {
        self.start(NetworkMode::LocalClient, index, codec)
    }

    fn start(
        &self,
        mode: NetworkMode,
        index: usize,
        codec: impl StateCodec + 'static,
    ) -> Result<ConnectionManager, NetError> {
        let cluster = self.cluster.clone().with_this_node(index);
        ConnectionManager::init_with_host(
            &cluster,
            mode,
            self.sync.clone(),
            codec,
            HostIdentity::loopback(),
        )
    }
}
