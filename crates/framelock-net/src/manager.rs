//! Cluster-wide connection management.
//!
//! The [`ConnectionManager`] owns every connection of this process, the
//! shared application state and the application's [`StateCodec`]. It decides
//! at startup whether this process is the authority, creates the listening
//! or connecting connections accordingly, and keeps the cluster status
//! (running, connected counts, all-nodes-connected) current as sessions come
//! and go.
//!
//! Nodes configured with a data-transfer port get a second connection that
//! carries acknowledged application packages outside the frame barrier.
//!
//! Connections report back through [`ConnectionObserver`], implemented on the
//! manager's shared interior and held weakly by each connection.

use std::{
    mem,
    sync::{Arc, Condvar, Mutex, RwLock, Weak},
    time::Duration,
};

use bytes::Bytes;
use framelock_core::{
    ClusterConfig, ConfigError, ConnectionKind, HostIdentity, NetworkMode, SharedState,
    StateCodec, StateError, SyncConfig, config::WILDCARD_ADDRESS,
};
use framelock_proto::Frame;
use tracing::{debug, info, trace, warn};

use crate::{
    NetError,
    barrier::LoopTimes,
    connection::{Connection, ConnectionObserver, Endpoint},
    host, lock, read, write,
};

type ExternalHandler = Box<dyn FnMut(usize, &str) + Send>;
type DataHandler = Box<dyn FnMut(usize, i32, &[u8]) + Send>;
type DataAckHandler = Box<dyn FnMut(usize, i32) + Send>;
type DataStatusHandler = Box<dyn FnMut(usize, bool) + Send>;

#[derive(Default)]
struct DataHandlers {
    package: Option<DataHandler>,
    acknowledged: Option<DataAckHandler>,
    status: Option<DataStatusHandler>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ClusterStatus {
    pub(crate) running: bool,
    pub(crate) all_nodes_connected: bool,
    pub(crate) active_connections: usize,
    pub(crate) active_sync_connections: usize,
    pub(crate) active_data_connections: usize,
}

pub(crate) struct ManagerShared {
    pub(crate) config: SyncConfig,
    pub(crate) is_server: bool,
    this_node: Option<usize>,
    host: HostIdentity,
    connections: RwLock<Vec<Connection>>,
    pub(crate) status: Mutex<ClusterStatus>,
    pub(crate) status_changed: Condvar,
    state: Mutex<SharedState>,
    codec: Mutex<Box<dyn StateCodec>>,
    external_handler: Mutex<Option<ExternalHandler>>,
    data_handlers: Mutex<DataHandlers>,
}

/// Owner of every connection of this process.
///
/// Dropping the manager closes it.
pub struct ConnectionManager {
    pub(crate) shared: Arc<ManagerShared>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("is_server", &self.shared.is_server)
            .field("this_node", &self.shared.this_node)
            .field("status", &*lock(&self.shared.status))
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Detect this host and establish the cluster connections.
    ///
    /// A follower blocks here until the authority accepts (or
    /// `connect_timeout` elapses).
    ///
    /// # Errors
    /// Any [`NetError`] of kind `FatalSetup`: bad configuration, no host
    /// identity, bind failure, connect timeout.
    pub fn init(
        cluster: &ClusterConfig,
        mode: NetworkMode,
        config: SyncConfig,
        codec: impl StateCodec + 'static,
    ) -> Result<Self, NetError> {
        let host = host::detect()?;
        Self::init_with_host(cluster, mode, config, codec, host)
    }

    /// [`init`](Self::init) with an explicit host identity.
    pub fn init_with_host(
        cluster: &ClusterConfig,
        mode: NetworkMode,
        config: SyncConfig,
        codec: impl StateCodec + 'static,
        mut host: HostIdentity,
    ) -> Result<Self, NetError> {
        config.validate()?;
        cluster.validate()?;

        let role = cluster.resolve(mode, &host)?;
        if mode.is_local()
            && let Some(index) = role.this_node
        {
            host.add_address(cluster.node(index)?.address.clone());
        }

        info!(
            is_server = role.is_server,
            this_node = ?role.this_node,
            host = host.host_name(),
            ?mode,
            "resolved cluster role"
        );

        let codec: Box<dyn StateCodec> = Box::new(codec);
        let manager = Self {
            shared: Arc::new(ManagerShared {
                state: Mutex::new(SharedState::new(config.initial_buffer_size)),
                config,
                is_server: role.is_server,
                this_node: role.this_node,
                host,
                connections: RwLock::new(Vec::new()),
                status: Mutex::new(ClusterStatus {
                    running: true,
                    all_nodes_connected: false,
                    active_connections: 0,
                    active_sync_connections: 0,
                    active_data_connections: 0,
                }),
                status_changed: Condvar::new(),
                codec: Mutex::new(codec),
                external_handler: Mutex::new(None),
                data_handlers: Mutex::new(DataHandlers::default()),
            }),
        };

        let weak: Weak<ManagerShared> = Arc::downgrade(&manager.shared);
        let observer: Weak<dyn ConnectionObserver> = weak;
        let config = &manager.shared.config;
        let mut next_id = 0;

        if role.is_server {
            for (index, node) in cluster.nodes.iter().enumerate() {
                if Some(index) == role.this_node {
                    continue;
                }
                let connection = Connection::server(
                    Endpoint::sync(next_id, WILDCARD_ADDRESS, node.sync_port),
                    config.clone(),
                    observer.clone(),
                );
                next_id += 1;
                manager.shared.add(connection.clone());
                connection.listen()?;

                if let Some(port) = node.data_transfer_port {
                    let connection = Connection::server(
                        Endpoint::data_transfer(next_id, WILDCARD_ADDRESS, port),
                        config.clone(),
                        observer.clone(),
                    );
                    next_id += 1;
                    manager.shared.add(connection.clone());
                    connection.listen()?;
                }
            }
        } else {
            let index = role
                .this_node
                .ok_or_else(|| ConfigError::NodeNotFound {
                    host: manager.shared.host.host_name().to_owned(),
                })?;
            let node = cluster.node(index)?;
            let connection = Connection::client(
                Endpoint::sync(next_id, cluster.remote_address(mode), node.sync_port),
                config.clone(),
                observer.clone(),
            );
            next_id += 1;
            manager.shared.add(connection.clone());
            connection.connect()?;

            if let Some(port) = node.data_transfer_port {
                let connection = Connection::client(
                    Endpoint::data_transfer(next_id, cluster.remote_address(mode), port),
                    config.clone(),
                    observer.clone(),
                );
                next_id += 1;
                manager.shared.add(connection.clone());
                connection.connect()?;
            }
        }

        if let Some(external) = cluster.external_control {
            let connection = Connection::server(
                Endpoint::external(next_id, external.port, external.format),
                config.clone(),
                observer,
            );
            manager.shared.add(connection.clone());
            connection.listen()?;
        }

        manager.update_connection_status();
        Ok(manager)
    }

    /// Route external-control commands to `handler(connection, command)`.
    pub fn set_external_handler(&self, handler: impl FnMut(usize, &str) + Send + 'static) {
        *lock(&self.shared.external_handler) = Some(Box::new(handler));
    }

    /// Route received data-transfer packages to
    /// `handler(connection, package_id, data)`.
    ///
    /// Called on the connection's reader thread before the receipt goes out.
    pub fn set_data_handler(&self, handler: impl FnMut(usize, i32, &[u8]) + Send + 'static) {
        lock(&self.shared.data_handlers).package = Some(Box::new(handler));
    }

    /// Report package receipts from peers to `handler(connection, package_id)`.
    pub fn set_data_ack_handler(&self, handler: impl FnMut(usize, i32) + Send + 'static) {
        lock(&self.shared.data_handlers).acknowledged = Some(Box::new(handler));
    }

    /// Report data-transfer sessions starting and ending to
    /// `handler(connection, connected)`.
    pub fn set_data_status_handler(&self, handler: impl FnMut(usize, bool) + Send + 'static) {
        lock(&self.shared.data_handlers).status = Some(Box::new(handler));
    }

    /// Send a package on every connected data-transfer connection.
    ///
    /// Failures end that peer's session and are logged; the remaining peers
    /// are still served. Returns the number of peers the package went to.
    pub fn transfer_data(&self, package_id: i32, data: &[u8]) -> usize {
        let mut sent = 0;
        for connection in self.shared.data_connections() {
            if !connection.is_connected() {
                continue;
            }
            match connection.transfer_data(package_id, data) {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!(connection = connection.id(), package = package_id, error = %e, "failed to transfer data");
                },
            }
        }
        debug!(package = package_id, bytes = data.len(), peers = sent, "data package sent");
        sent
    }

    /// Send a package on one data-transfer connection.
    ///
    /// # Errors
    /// `UnknownConnection` when `connection` is not a data-transfer
    /// connection; otherwise as [`Connection::transfer_data`].
    pub fn transfer_data_to(
        &self,
        connection: usize,
        package_id: i32,
        data: &[u8],
    ) -> Result<(), NetError> {
        self.shared
            .data_connections()
            .into_iter()
            .find(|candidate| candidate.id() == connection)
            .ok_or(NetError::UnknownConnection { id: connection })?
            .transfer_data(package_id, data)
    }

    /// Send this frame's state (authority) or acknowledge the applied frame
    /// (follower).
    ///
    /// The authority encodes the shared state through the codec and sends it
    /// to every connected sync peer, announcing a larger size first when the
    /// state grew. Send failures end that peer's session and are logged; the
    /// remaining peers are still served.
    ///
    /// Returns the min/max round trip across peers (authority only).
    pub fn sync(&self) -> Result<Option<LoopTimes>, NetError> {
        self.shared.sync()
    }

    /// Whether every connected sync peer satisfies the barrier.
    pub fn is_sync_complete(&self) -> bool {
        self.shared.is_sync_complete()
    }

    /// Publish newly received frame numbers on every sync connection.
    pub fn swap_data(&self) {
        for connection in self.shared.sync_connections() {
            connection.swap_frames();
        }
    }

    /// Recompute connected counts, `running` and all-nodes-connected.
    pub fn update_connection_status(&self) {
        self.shared.update_connection_status();
    }

    /// False once a follower has lost its authority, or after `close`
    pub fn is_running(&self) -> bool {
        lock(&self.shared.status).running
    }

    /// Whether the whole cluster is connected
    pub fn are_all_nodes_connected(&self) -> bool {
        lock(&self.shared.status).all_nodes_connected
    }

    /// Whether this process is the authority
    pub fn is_server(&self) -> bool {
        self.shared.is_server
    }

    /// Index of this process in the node list
    pub fn this_node(&self) -> Option<usize> {
        self.shared.this_node
    }

    /// Whether `name` is this host's name
    pub fn match_host_name(&self, name: &str) -> bool {
        self.shared.host.match_host_name(name)
    }

    /// Whether `address` belongs to this host
    pub fn match_address(&self, address: &str) -> bool {
        self.shared.host.match_address(address)
    }

    /// Connected sessions of any kind
    pub fn active_connections(&self) -> usize {
        lock(&self.shared.status).active_connections
    }

    /// Connected sync sessions
    pub fn sync_connections_count(&self) -> usize {
        lock(&self.shared.status).active_sync_connections
    }

    /// Connected data-transfer sessions
    pub fn data_transfer_connections_count(&self) -> usize {
        lock(&self.shared.status).active_data_connections
    }

    /// Handles to every connection
    pub fn connections(&self) -> Vec<Connection> {
        self.shared.snapshot()
    }

    /// Send a message to the external-control client.
    ///
    /// # Errors
    /// `NoExternalControl` when none is configured, `NotConnected` when no
    /// client is attached.
    pub fn send_external(&self, message: &str) -> Result<(), NetError> {
        self.shared
            .snapshot()
            .into_iter()
            .find(|connection| connection.kind() == ConnectionKind::ExternalControl)
            .ok_or(NetError::NoExternalControl)?
            .send_external(message)
    }

    /// Run `f` against the shared state buffer.
    pub fn with_state<R>(&self, f: impl FnOnce(&SharedState) -> R) -> R {
        f(&lock(&self.shared.state))
    }

    /// Stop running, say goodbye to every peer and join all threads.
    ///
    /// Idempotent.
    pub fn close(&self) {
        {
            let mut status = lock(&self.shared.status);
            status.running = false;
            self.shared.status_changed.notify_all();
        }

        let connections = mem::take(&mut *write(&self.shared.connections));
        if connections.is_empty() {
            return;
        }
        for connection in &connections {
            connection.shutdown();
        }
        info!(connections = connections.len(), "connection manager closed");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl ManagerShared {
    fn add(&self, connection: Connection) {
        write(&self.connections).push(connection);
    }

    pub(crate) fn snapshot(&self) -> Vec<Connection> {
        read(&self.connections).clone()
    }

    pub(crate) fn sync_connections(&self) -> Vec<Connection> {
        let mut connections = self.snapshot();
        connections.retain(|connection| connection.kind() == ConnectionKind::Sync);
        connections
    }

    fn data_connections(&self) -> Vec<Connection> {
        let mut connections = self.snapshot();
        connections.retain(|connection| connection.kind() == ConnectionKind::DataTransfer);
        connections
    }

    pub(crate) fn is_sync_complete(&self) -> bool {
        let mut active = 0;
        let mut updated = 0;
        for connection in self.sync_connections() {
            if connection.is_connected() {
                active += 1;
                if connection.is_updated() {
                    updated += 1;
                }
            }
        }
        updated == active
    }

    pub(crate) fn sync(&self) -> Result<Option<LoopTimes>, NetError> {
        if !self.is_server {
            for connection in self.sync_connections() {
                if connection.is_connected()
                    && let Err(e) = connection.acknowledge()
                {
                    warn!(connection = connection.id(), error = %e, "failed to acknowledge frame");
                }
            }
            return Ok(None);
        }

        let state = {
            let mut state = lock(&self.state);
            let mut codec = lock(&self.codec);
            Bytes::copy_from_slice(state.encode(&mut **codec))
        };

        let mut times: Option<LoopTimes> = None;
        for connection in self.sync_connections() {
            if !connection.is_connected() {
                continue;
            }
            if let Err(e) = connection.sync_state(&state) {
                warn!(connection = connection.id(), error = %e, "failed to send frame");
                continue;
            }
            if let Some(loop_time) = connection.loop_time() {
                times = Some(LoopTimes::record(times, loop_time));
            }
        }

        trace!(bytes = state.len(), "frame sent");
        Ok(times)
    }

    pub(crate) fn update_connection_status(&self) {
        let connections = self.snapshot();
        let mut active = 0;
        let mut sync_total = 0;
        let mut sync_active = 0;
        let mut data_total = 0;
        let mut data_active = 0;
        for connection in &connections {
            let connected = connection.is_connected();
            active += usize::from(connected);
            match connection.kind() {
                ConnectionKind::Sync => {
                    sync_total += 1;
                    sync_active += usize::from(connected);
                },
                ConnectionKind::DataTransfer => {
                    data_total += 1;
                    data_active += usize::from(connected);
                },
                ConnectionKind::ExternalControl => {},
            }
        }

        let broadcast = {
            let mut status = lock(&self.status);
            status.active_connections = active;
            status.active_sync_connections = sync_active;
            status.active_data_connections = data_active;

            let mut broadcast = false;
            if self.is_server {
                let all = sync_active == sync_total && data_active == data_total;
                broadcast = all && sync_total > 0 && !status.all_nodes_connected;
                status.all_nodes_connected = all;
            } else if sync_active == 0 {
                if status.running {
                    info!("lost connection to master; stopping");
                }
                status.running = false;
                status.all_nodes_connected = false;
            }

            self.status_changed.notify_all();
            broadcast
        };

        debug!(active, sync_active, sync_total, data_active, data_total, "connection status updated");

        if broadcast {
            info!(nodes = sync_total, "all nodes connected");
            for connection in connections {
                if connection.kind() != ConnectionKind::ExternalControl
                    && connection.is_connected()
                    && let Err(e) = connection.send_frame(&Frame::connected())
                {
                    warn!(connection = connection.id(), error = %e, "failed to announce cluster");
                }
            }
        }
    }

    pub(crate) fn waiting_for(&self) -> String {
        if !self.is_server {
            return "master".to_owned();
        }
        let pending: Vec<String> = self
            .sync_connections()
            .iter()
            .filter(|connection| connection.is_connected() && !connection.is_updated())
            .map(|connection| connection.id().to_string())
            .collect();
        format!("node connection(s) {}", pending.join(", "))
    }

    fn notify(&self) {
        let _status = lock(&self.status);
        self.status_changed.notify_all();
    }
}

impl ConnectionObserver for ManagerShared {
    fn on_status_changed(&self, connection: usize) {
        self.update_connection_status();

        let data = self.data_connections().into_iter().find(|candidate| candidate.id() == connection);
        if let Some(data) = data
            && let Some(handler) = lock(&self.data_handlers).status.as_mut()
        {
            handler(connection, data.is_connected());
        }
    }

    fn on_decode(
        &self,
        _connection: usize,
        _frame_number: i32,
        state: &[u8],
    ) -> Result<(), StateError> {
        let mut shared = lock(&self.state);
        let mut codec = lock(&self.codec);
        shared.decode(state, &mut **codec)
    }

    fn on_frame_published(&self, _connection: usize, _frame_number: i32) {
        self.notify();
    }

    fn on_acknowledged(&self, _connection: usize, _frame_number: i32, _loop_time: Option<Duration>) {
        self.notify();
    }

    fn on_cluster_connected(&self, _connection: usize) {
        let data_total = self.data_connections().len();
        let mut status = lock(&self.status);
        status.all_nodes_connected =
            status.active_sync_connections == 1 && status.active_data_connections == data_total;
        info!(all_nodes_connected = status.all_nodes_connected, "cluster connected");
        self.status_changed.notify_all();
    }

    fn on_size_hint(&self, _connection: usize, capacity: usize) {
        lock(&self.state).reserve(capacity);
    }

    fn on_command(&self, connection: usize, command: &str) {
        match lock(&self.external_handler).as_mut() {
            Some(handler) => handler(connection, command),
            None => debug!(connection, command, "no external handler installed; dropping command"),
        }
    }

    fn on_data_package(&self, connection: usize, package_id: i32, data: &[u8]) {
        match lock(&self.data_handlers).package.as_mut() {
            Some(handler) => handler(connection, package_id, data),
            None => debug!(connection, package = package_id, "no data handler installed; dropping package"),
        }
    }

    fn on_data_acknowledged(&self, connection: usize, package_id: i32) {
        if let Some(handler) = lock(&self.data_handlers).acknowledged.as_mut() {
            handler(connection, package_id);
        }
    }
}
