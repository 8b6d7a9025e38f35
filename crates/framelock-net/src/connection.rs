//! One peer connection.
//!
//! A [`Connection`] owns a socket's lifecycle and the [`SyncSession`] that
//! tracks its frame counters. Authority-side connections listen and accept
//! one client at a time; when that client's session ends they accept the
//! next. Follower-side connections retry `connect` until the authority is
//! up, then read until the session ends for good.
//!
//! ```text
//! accept thread ──accept──> session ──spawn──> reader thread ──join──┐
//!      ^                                                             │
//!      └─────────────────────────re-accept───────────────────────────┘
//! ```
//!
//! The reader thread reports everything that matters to the cluster through
//! a [`ConnectionObserver`]. Connections hold the observer weakly so the
//! manager that owns them can be dropped.

use std::{
    io::{self, Read, Write},
    mem,
    net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    ops::ControlFlow,
    sync::{Arc, Mutex, Weak},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use framelock_core::{
    ConnectionKind, ControlLine, ExternalFormat, LineDecoder, SessionAction, StateError,
    SyncConfig, SyncSession,
    external::{GREETING, REPLY_OK},
};
use framelock_proto::{Frame, FrameDecoder, MessageTag};
use tracing::{debug, error, info, trace, warn};

use crate::{
    NetError,
    cancel::CancellationToken,
    lock,
    reader::{ReadOutcome, read_frames},
};

/// Where a connection listens or connects, and what it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Connection index, stable for the connection's lifetime
    pub id: usize,
    /// Sync, data transfer or external control
    pub kind: ConnectionKind,
    /// Bind address (listening side) or peer address (connecting side)
    pub address: String,
    /// Port
    pub port: u16,
    /// Framing for external control; sync connections are always framed
    pub format: ExternalFormat,
}

impl Endpoint {
    /// Sync endpoint.
    pub fn sync(id: usize, address: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            kind: ConnectionKind::Sync,
            address: address.into(),
            port,
            format: ExternalFormat::Framed,
        }
    }

    /// Data-transfer endpoint.
    pub fn data_transfer(id: usize, address: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            kind: ConnectionKind::DataTransfer,
            address: address.into(),
            port,
            format: ExternalFormat::Framed,
        }
    }

    /// External-control endpoint on loopback.
    pub fn external(id: usize, port: u16, format: ExternalFormat) -> Self {
        Self {
            id,
            kind: ConnectionKind::ExternalControl,
            address: framelock_core::config::LOCALHOST.to_owned(),
            port,
            format,
        }
    }

    fn target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Callbacks from a connection's background threads.
///
/// Every method is called without any connection lock held.
pub trait ConnectionObserver: Send + Sync {
    /// A session started or ended
    fn on_status_changed(&self, _connection: usize) {}

    /// Apply a received frame's state
    fn on_decode(
        &self,
        _connection: usize,
        _frame_number: i32,
        _state: &[u8],
    ) -> Result<(), StateError> {
        Ok(())
    }

    /// A received frame was applied and its number published
    fn on_frame_published(&self, _connection: usize, _frame_number: i32) {}

    /// The peer acknowledged a frame
    fn on_acknowledged(
        &self,
        _connection: usize,
        _frame_number: i32,
        _loop_time: Option<Duration>,
    ) {
    }

    /// The authority reported every node connected
    fn on_cluster_connected(&self, _connection: usize) {}

    /// The peer announced a larger state size
    fn on_size_hint(&self, _connection: usize, _capacity: usize) {}

    /// External-control command
    fn on_command(&self, _connection: usize, _command: &str) {}

    /// Data-transfer package, called before its receipt is sent
    fn on_data_package(&self, _connection: usize, _package_id: i32, _data: &[u8]) {}

    /// The peer received a data-transfer package
    fn on_data_acknowledged(&self, _connection: usize, _package_id: i32) {}
}

struct Inner {
    endpoint: Endpoint,
    is_server: bool,
    config: SyncConfig,
    session: Mutex<SyncSession>,
    /// Write half of the current session; one whole message per lock
    writer: Mutex<Option<TcpStream>>,
    local_addr: Mutex<Option<SocketAddr>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    observer: Weak<dyn ConnectionObserver>,
}

/// Handle to one peer connection. Clones share the connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.inner.endpoint)
            .field("is_server", &self.inner.is_server)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Authority-side connection; call [`listen`](Self::listen) next.
    pub fn server(
        endpoint: Endpoint,
        config: SyncConfig,
        observer: Weak<dyn ConnectionObserver>,
    ) -> Self {
        Self::new(endpoint, true, config, observer)
    }

    /// Follower-side connection; call [`connect`](Self::connect) next.
    pub fn client(
        endpoint: Endpoint,
        config: SyncConfig,
        observer: Weak<dyn ConnectionObserver>,
    ) -> Self {
        Self::new(endpoint, false, config, observer)
    }

    fn new(
        endpoint: Endpoint,
        is_server: bool,
        config: SyncConfig,
        observer: Weak<dyn ConnectionObserver>,
    ) -> Self {
        let session = SyncSession::new(
            endpoint.kind,
            is_server,
            config.mode,
            config.frame_ceiling,
            config.max_payload_size,
        );
        Self {
            inner: Arc::new(Inner {
                endpoint,
                is_server,
                config,
                session: Mutex::new(session),
                writer: Mutex::new(None),
                local_addr: Mutex::new(None),
                threads: Mutex::new(Vec::new()),
                cancel: CancellationToken::new(),
                observer,
            }),
        }
    }

    /// Bind, listen and start the accept thread.
    ///
    /// # Errors
    /// `Bind`, `SocketOption` or `Spawn` (all fatal for setup); `WrongRole`
    /// on a follower-side connection.
    pub fn listen(&self) -> Result<(), NetError> {
        let inner = &self.inner;
        if !inner.is_server {
            return Err(NetError::WrongRole { id: inner.endpoint.id, operation: "listen" });
        }

        let target = inner.endpoint.target();
        let listener = TcpListener::bind((inner.endpoint.address.as_str(), inner.endpoint.port))
            .map_err(|source| NetError::Bind { address: target.clone(), source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| NetError::SocketOption { option: "O_NONBLOCK", source })?;
        let local = listener.local_addr().ok();
        *lock(&inner.local_addr) = local;

        info!(
            connection = inner.endpoint.id,
            kind = ?inner.endpoint.kind,
            address = %target,
            "listening"
        );

        let name = format!("framelock-accept-{}", inner.endpoint.id);
        let accept = Arc::clone(inner);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || accept.accept_loop(&listener))
            .map_err(|source| NetError::Spawn { name, source })?;
        lock(&inner.threads).push(handle);
        Ok(())
    }

    /// Connect to the authority, retrying until it answers.
    ///
    /// Blocks the calling thread. Each failed attempt is logged and retried
    /// after `connect_retry_interval`; the loop ends on success, on
    /// [`shutdown`](Self::shutdown) from another thread, or when
    /// `connect_timeout` elapses.
    ///
    /// # Errors
    /// `Resolve`, `Cancelled`, `ConnectTimeout`, `SocketOption`, `Spawn`;
    /// `WrongRole` on an authority-side connection.
    pub fn connect(&self) -> Result<(), NetError> {
        let inner = &self.inner;
        if inner.is_server {
            return Err(NetError::WrongRole { id: inner.endpoint.id, operation: "connect" });
        }

        let target = inner.endpoint.target();
        let addresses: Vec<SocketAddr> = (inner.endpoint.address.as_str(), inner.endpoint.port)
            .to_socket_addrs()
            .map_err(|source| NetError::Resolve { address: target.clone(), source })?
            .collect();
        if addresses.is_empty() {
            return Err(NetError::Resolve {
                address: target,
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
            });
        }

        info!(connection = inner.endpoint.id, address = %target, "connecting");
        let started = Instant::now();
        let mut attempt = 0u32;

        let stream = loop {
            if inner.cancel.is_cancelled() {
                return Err(NetError::Cancelled { address: target });
            }

            attempt += 1;
            match TcpStream::connect(&addresses[..]) {
                Ok(stream) => break stream,
                Err(e) => debug!(
                    connection = inner.endpoint.id,
                    address = %target,
                    attempt,
                    error = %e,
                    "connect failed; retrying"
                ),
            }

            if let Some(limit) = inner.config.connect_timeout
                && started.elapsed() >= limit
            {
                return Err(NetError::ConnectTimeout { address: target, elapsed: started.elapsed() });
            }
            if inner.cancel.wait_timeout(inner.config.connect_retry_interval) {
                return Err(NetError::Cancelled { address: target });
            }
        };

        prepare_stream(&stream)?;
        *lock(&inner.local_addr) = stream.local_addr().ok();
        let handle = inner.start_session(stream, target)?;
        lock(&inner.threads).push(handle);
        Ok(())
    }

    /// Connection index
    pub fn id(&self) -> usize {
        self.inner.endpoint.id
    }

    /// Sync, data transfer or external control
    pub fn kind(&self) -> ConnectionKind {
        self.inner.endpoint.kind
    }

    /// Endpoint this connection was created with
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Whether this process listens on this connection
    pub fn is_server(&self) -> bool {
        self.inner.is_server
    }

    /// Whether a session is established
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.session).is_connected()
    }

    /// Current (or last) session number; 0 before the first session
    pub fn session_number(&self) -> u64 {
        lock(&self.inner.session).session_number()
    }

    /// Bound listener address, or local address of the connected socket
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.inner.local_addr)
    }

    /// Token that interrupts this connection's retry and accept loops
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Write one message.
    ///
    /// # Errors
    /// `NotConnected` without a session; `Send` if the write fails, which
    /// also shuts the session down.
    pub fn send_frame(&self, frame: &Frame) -> Result<(), NetError> {
        self.inner.write_raw(&frame.to_bytes())
    }

    /// Send this frame's state (authority side).
    pub fn sync_state(&self, state: &[u8]) -> Result<(), NetError> {
        let actions = lock(&self.inner.session).prepare_sync(state, Instant::now())?;
        self.inner.send_actions(actions)
    }

    /// Acknowledge the last applied frame (follower side).
    pub fn acknowledge(&self) -> Result<(), NetError> {
        let actions = lock(&self.inner.session).prepare_acknowledge()?;
        self.inner.send_actions(actions)
    }

    /// Send one package on a data-transfer connection (either side).
    pub fn transfer_data(&self, package_id: i32, data: &[u8]) -> Result<(), NetError> {
        let actions = lock(&self.inner.session).prepare_data(package_id, data)?;
        self.inner.send_actions(actions)
    }

    /// Advance the send counter; see [`framelock_core::FrameCounters`].
    pub fn iterate_frame_counter(&self) -> i32 {
        lock(&self.inner.session).counters_mut().iterate_frame_counter(self.inner.is_server)
    }

    /// Whether the last published receive matches the last send
    pub fn compare_frames(&self) -> bool {
        lock(&self.inner.session).counters().compare_frames()
    }

    /// Publish the in-flight receive frame number
    pub fn swap_frames(&self) {
        lock(&self.inner.session).counters_mut().swap_frames();
    }

    /// `(send, [published, in-flight])` frame numbers
    pub fn frame_numbers(&self) -> (i32, [i32; 2]) {
        let session = lock(&self.inner.session);
        (session.counters().send_frame(), session.counters().recv_frames())
    }

    /// Announce a larger state size to the peer if `len` outgrew the last
    /// announcement.
    pub fn check_if_buffer_needs_resizing(&self, len: usize) -> Result<(), NetError> {
        let actions = lock(&self.inner.session).check_if_buffer_needs_resizing(len);
        self.inner.send_actions(actions)
    }

    /// Whether this connection satisfies the frame barrier
    pub fn is_updated(&self) -> bool {
        lock(&self.inner.session).is_updated()
    }

    /// Last send-to-acknowledge round trip
    pub fn loop_time(&self) -> Option<Duration> {
        lock(&self.inner.session).loop_time()
    }

    /// Send a message on an external-control connection.
    ///
    /// ASCII connections get the text plus CR-LF; framed connections get one
    /// sync message carrying the text.
    pub fn send_external(&self, message: &str) -> Result<(), NetError> {
        match self.inner.endpoint.format {
            ExternalFormat::Ascii => {
                let mut line = Vec::with_capacity(message.len() + 2);
                line.extend_from_slice(message.as_bytes());
                line.extend_from_slice(b"\r\n");
                self.inner.write_raw(&line)
            },
            ExternalFormat::Framed => {
                self.send_frame(&Frame::new(MessageTag::Sync, message.as_bytes().to_vec())?)
            },
        }
    }

    /// Say goodbye, stop background threads and close the socket.
    ///
    /// Idempotent. Joins the accept and reader threads.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        let framed = inner.endpoint.format == ExternalFormat::Framed
            || inner.endpoint.kind != ConnectionKind::ExternalControl;

        if framed && self.is_connected() {
            if let Err(e) = self.send_frame(&Frame::disconnect()) {
                debug!(connection = inner.endpoint.id, error = %e, "could not send disconnect");
            }
        }

        inner.cancel.cancel();
        inner.close_writer();

        let handles = mem::take(&mut *lock(&inner.threads));
        for handle in handles {
            if handle.thread().id() == thread::current().id() {
                continue;
            }
            if handle.join().is_err() {
                warn!(connection = inner.endpoint.id, "connection thread panicked");
            }
        }

        lock(&inner.session).close();
        debug!(connection = inner.endpoint.id, "connection shut down");
    }
}

impl Inner {
    fn observer(&self) -> Option<Arc<dyn ConnectionObserver>> {
        self.observer.upgrade()
    }

    fn accept_loop(self: Arc<Self>, listener: &TcpListener) {
        let id = self.endpoint.id;

        while !self.cancel.is_cancelled() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = prepare_stream(&stream) {
                        warn!(connection = id, %peer, error = %e, "rejecting client");
                        continue;
                    }
                    match self.start_session(stream, peer.to_string()) {
                        Ok(reader) => {
                            if reader.join().is_err() {
                                warn!(connection = id, "reader thread panicked");
                            }
                        },
                        Err(e) => warn!(connection = id, error = %e, "failed to start session"),
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.cancel.wait_timeout(self.config.accept_poll_interval);
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => {
                    warn!(connection = id, error = %e, "accept failed");
                    self.cancel.wait_timeout(self.config.accept_poll_interval);
                },
            }
        }

        debug!(connection = id, "accept loop stopped");
    }

    fn start_session(
        self: &Arc<Self>,
        stream: TcpStream,
        peer: String,
    ) -> Result<JoinHandle<()>, NetError> {
        let id = self.endpoint.id;
        let reader = stream
            .try_clone()
            .map_err(|source| NetError::SocketOption { option: "try_clone", source })?;

        let session = lock(&self.session).on_connected(Instant::now())?;
        *lock(&self.writer) = Some(stream);
        info!(connection = id, session, %peer, kind = ?self.endpoint.kind, "session established");

        if self.endpoint.kind == ConnectionKind::ExternalControl
            && self.endpoint.format == ExternalFormat::Ascii
            && let Err(e) = self.write_raw(GREETING)
        {
            debug!(connection = id, error = %e, "could not greet control client");
        }

        if let Some(observer) = self.observer() {
            observer.on_status_changed(id);
        }

        let name = format!("framelock-reader-{id}");
        let this = Arc::clone(self);
        thread::Builder::new().name(name.clone()).spawn(move || this.read_loop(reader, session)).map_err(
            |source| {
                self.end_session(session, "reader thread failed to start");
                NetError::Spawn { name, source }
            },
        )
    }

    fn read_loop(self: Arc<Self>, mut stream: TcpStream, session: u64) {
        let id = self.endpoint.id;

        let reason = if self.endpoint.kind == ConnectionKind::ExternalControl
            && self.endpoint.format == ExternalFormat::Ascii
        {
            self.read_lines(&mut stream)
        } else {
            let mut decoder =
                FrameDecoder::new(self.config.initial_buffer_size, self.config.max_payload_size);
            let outcome = read_frames(
                &mut stream,
                &mut decoder,
                self.config.read_chunk_size,
                |frame, decoder| self.dispatch(&frame, decoder),
            );

            match outcome {
                ReadOutcome::PeerClosed if decoder.buffered_len() > 0 => {
                    warn!(
                        connection = id,
                        session,
                        pending = ?decoder.pending_tag(),
                        bytes = decoder.buffered_len(),
                        "peer closed mid-message"
                    );
                    "connection closed mid-message".to_owned()
                },
                ReadOutcome::PeerClosed => "connection closed".to_owned(),
                ReadOutcome::Failed(_) if self.cancel.is_cancelled() => "shut down".to_owned(),
                ReadOutcome::Failed(e) => {
                    error!(connection = id, session, error = %e, "read failed");
                    format!("read failed: {e}")
                },
                ReadOutcome::Protocol(e) => {
                    error!(connection = id, session, error = %e, "protocol violation; closing connection");
                    e.to_string()
                },
                ReadOutcome::Stopped(reason) => reason,
            }
        };

        self.end_session(session, &reason);
    }

    fn read_lines(&self, stream: &mut TcpStream) -> String {
        let id = self.endpoint.id;
        let mut decoder = LineDecoder::new(self.config.read_chunk_size);
        let mut chunk = [0u8; 1024];

        loop {
            let read = match stream.read(&mut chunk) {
                Ok(0) => return "connection closed".to_owned(),
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return format!("read failed: {e}"),
            };
            decoder.extend(&chunk[..read]);

            loop {
                match decoder.next_line() {
                    Ok(Some(ControlLine::Command(command))) => {
                        debug!(connection = id, %command, "control command");
                        if let Some(observer) = self.observer() {
                            observer.on_command(id, &command);
                        }
                        if let Err(e) = self.write_raw(REPLY_OK) {
                            return e.to_string();
                        }
                    },
                    Ok(Some(ControlLine::Terminate)) => return "control client logged out".to_owned(),
                    Ok(None) => break,
                    Err(e) => {
                        warn!(connection = id, error = %e, "closing control connection");
                        return e.to_string();
                    },
                }
            }
        }
    }

    fn dispatch(&self, frame: &Frame, decoder: &mut FrameDecoder) -> ControlFlow<String> {
        let id = self.endpoint.id;
        let actions = match lock(&self.session).handle_frame(frame, Instant::now()) {
            Ok(actions) => actions,
            Err(e) => {
                warn!(connection = id, tag = frame.tag().name(), error = %e, "rejecting message");
                return ControlFlow::Break(e.to_string());
            },
        };

        let observer = self.observer();
        for action in actions {
            match action {
                SessionAction::SendFrame(frame) => {
                    if let Err(e) = self.write_raw(&frame.to_bytes()) {
                        return ControlFlow::Break(e.to_string());
                    }
                },
                SessionAction::Deliver { frame_number, state } => {
                    if let Some(observer) = &observer
                        && let Err(e) = observer.on_decode(id, frame_number, &state)
                    {
                        error!(connection = id, frame = frame_number, error = %e, "failed to decode frame state");
                    }
                    lock(&self.session).finish_delivery(frame_number);
                    trace!(connection = id, frame = frame_number, bytes = state.len(), "frame applied");
                    if let Some(observer) = &observer {
                        observer.on_frame_published(id, frame_number);
                    }
                },
                SessionAction::Acknowledged { frame_number, loop_time } => {
                    trace!(connection = id, frame = frame_number, ?loop_time, "frame acknowledged");
                    if let Some(observer) = &observer {
                        observer.on_acknowledged(id, frame_number, loop_time);
                    }
                },
                SessionAction::DataPackage { package_id, data } => {
                    debug!(connection = id, package = package_id, bytes = data.len(), "data package received");
                    if let Some(observer) = &observer {
                        observer.on_data_package(id, package_id, &data);
                    }
                },
                SessionAction::PackageAcknowledged { package_id } => {
                    trace!(connection = id, package = package_id, "data package acknowledged");
                    if let Some(observer) = &observer {
                        observer.on_data_acknowledged(id, package_id);
                    }
                },
                SessionAction::ResizeBuffer(capacity) => {
                    debug!(connection = id, capacity, "peer announced larger state");
                    decoder.reserve(capacity);
                    if let Some(observer) = &observer {
                        observer.on_size_hint(id, capacity);
                    }
                },
                SessionAction::ClusterConnected => {
                    if let Some(observer) = &observer {
                        observer.on_cluster_connected(id);
                    }
                },
                SessionAction::Command(command) => {
                    if let Some(observer) = &observer {
                        observer.on_command(id, &String::from_utf8_lossy(&command));
                    }
                },
                SessionAction::Close { reason } => return ControlFlow::Break(reason),
            }
        }

        ControlFlow::Continue(())
    }

    fn end_session(&self, session: u64, reason: &str) {
        {
            let mut state = lock(&self.session);
            if state.session_number() == session {
                state.close();
            }
        }
        self.close_writer();

        info!(connection = self.endpoint.id, session, reason, "session ended");
        if let Some(observer) = self.observer() {
            observer.on_status_changed(self.endpoint.id);
        }
    }

    /// Outbound actions from the render thread only ever send frames.
    fn send_actions(&self, actions: Vec<SessionAction>) -> Result<(), NetError> {
        for action in actions {
            if let SessionAction::SendFrame(frame) = action {
                self.write_raw(&frame.to_bytes())?;
            }
        }
        Ok(())
    }

    fn write_raw(&self, bytes: &[u8]) -> Result<(), NetError> {
        let id = self.endpoint.id;
        let mut writer = lock(&self.writer);
        let stream = writer.as_mut().ok_or(NetError::NotConnected { id })?;

        if let Err(source) = stream.write_all(bytes) {
            warn!(connection = id, error = %source, "send failed; closing session");
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!(connection = id, error = %e, "socket already closed");
            }
            return Err(NetError::Send { id, source });
        }
        Ok(())
    }

    fn close_writer(&self) {
        if let Some(stream) = lock(&self.writer).take()
            && let Err(e) = stream.shutdown(Shutdown::Both)
        {
            trace!(connection = self.endpoint.id, error = %e, "socket already closed");
        }
    }
}

/// Blocking mode with Nagle disabled.
fn prepare_stream(stream: &TcpStream) -> Result<(), NetError> {
    stream
        .set_nonblocking(false)
        .map_err(|source| NetError::SocketOption { option: "O_NONBLOCK", source })?;
    stream
        .set_nodelay(true)
        .map_err(|source| NetError::SocketOption { option: "TCP_NODELAY", source })
}
