//! Per-connection sync session state machine.
//!
//! # Architecture: Action-Based State Machine
//!
//! - Methods accept time as a parameter (no stored clock)
//! - Methods return `Result<Vec<SessionAction>, SessionError>`
//! - The driver (socket runtime or test) executes the actions
//!
//! One `SyncSession` lives as long as its connection. Every accepted or
//! connected socket is a new session inside it:
//!
//! ```text
//! ┌──────┐ on_connected ┌───────────┐ close / Disconnect ┌────────┐
//! │ Idle │─────────────>│ Connected │───────────────────>│ Closed │
//! └──────┘              └───────────┘                    └────────┘
//!                             ^        on_connected           │
//!                             └───────(authority only)────────┘
//! ```
//!
//! A follower's `Closed` is terminal: losing the authority ends the run. An
//! authority re-accepts, starting a new session number.
//!
//! # Frame flow
//!
//! ```text
//! authority                                follower
//! prepare_sync ──── Sync(n, state) ──────> handle_frame -> Deliver
//!                                          finish_delivery (recv = n)
//! handle_frame <─── Sync(n, empty) ─────── prepare_acknowledge
//! (recv = n, compare_frames holds)
//! ```
//!
//! Data-transfer connections carry application packages in either direction
//! and stay out of the frame barrier. Every package is answered with an
//! `Ack` carrying its id:
//!
//! ```text
//! prepare_data ──── Sync(id, data) ──────> handle_frame -> DataPackage, SendFrame(Ack)
//! handle_frame <─── Ack(id) ──────────────
//! -> PackageAcknowledged
//! ```

use std::time::{Duration, Instant};

use bytes::Bytes;
use framelock_proto::{DataPackage, Frame, MessageTag, PackageAck, SizeHint, SyncPayload};

use crate::{config::SyncMode, counters::FrameCounters, error::SessionError};

/// What a connection carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// Per-frame state between authority and follower
    Sync,
    /// Out-of-band commands from a local tool
    ExternalControl,
    /// Acknowledged application packages outside the frame barrier
    DataTransfer,
}

/// Actions returned by the session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Write this frame to the peer
    SendFrame(Frame),

    /// Decode this frame's state into the shared buffer, then call
    /// [`SyncSession::finish_delivery`]
    Deliver {
        /// Frame number the state belongs to
        frame_number: i32,
        /// Application state bytes
        state: Bytes,
    },

    /// Peer acknowledged a frame
    Acknowledged {
        /// Acknowledged frame number
        frame_number: i32,
        /// Send-to-acknowledge round trip, when the frame was the latest sent
        loop_time: Option<Duration>,
    },

    /// Data-transfer package received
    DataPackage {
        /// Id chosen by the sender
        package_id: i32,
        /// Package contents
        data: Bytes,
    },

    /// Peer received a data-transfer package
    PackageAcknowledged {
        /// Id of the received package
        package_id: i32,
    },

    /// Peer will send up to this many bytes; pre-grow receive buffers
    ResizeBuffer(usize),

    /// Authority reports every node connected
    ClusterConnected,

    /// External-control command payload
    Command(Bytes),

    /// End the session
    Close {
        /// Reason for closing
        reason: String,
    },
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No socket yet
    Idle,
    /// Socket established, frames flowing
    Connected,
    /// Socket gone
    Closed,
}

/// Sync session state machine.
///
/// Pure state: no sockets, no clock. The owning connection holds it behind a
/// mutex that is never held across socket I/O.
#[derive(Debug, Clone)]
pub struct SyncSession {
    kind: ConnectionKind,
    is_server: bool,
    mode: SyncMode,
    max_payload: usize,
    state: SessionState,
    session: u64,
    counters: FrameCounters,
    /// Loose mode: frame delivered since the last acknowledgement
    updated: bool,
    /// Largest state size announced to the peer this session
    size_hint: usize,
    sent_at: Option<Instant>,
    loop_time: Option<Duration>,
}

impl SyncSession {
    /// Create an idle session.
    ///
    /// # Arguments
    /// * `kind` - Sync or external control
    /// * `is_server` - This process listens (authority side)
    /// * `mode` - Firm or loose frame lock
    /// * `frame_ceiling` - Frame counter wrap value
    /// * `max_payload` - Largest size hint honoured
    pub fn new(
        kind: ConnectionKind,
        is_server: bool,
        mode: SyncMode,
        frame_ceiling: i32,
        max_payload: usize,
    ) -> Self {
        Self {
            kind,
            is_server,
            mode,
            max_payload,
            state: SessionState::Idle,
            session: 0,
            counters: FrameCounters::for_side(frame_ceiling, is_server),
            updated: false,
            size_hint: 0,
            sent_at: None,
            loop_time: None,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Connection kind
    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    /// Whether this side listens
    pub fn is_server(&self) -> bool {
        self.is_server
    }

    /// Number of the current (or last) session, starting at 1
    pub fn session_number(&self) -> u64 {
        self.session
    }

    /// Whether a socket is established
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Frame counters
    pub fn counters(&self) -> &FrameCounters {
        &self.counters
    }

    /// Mutable frame counters, for drivers that step them directly
    pub fn counters_mut(&mut self) -> &mut FrameCounters {
        &mut self.counters
    }

    /// Last measured send-to-acknowledge round trip
    pub fn loop_time(&self) -> Option<Duration> {
        self.loop_time
    }

    /// A socket was established.
    ///
    /// Returns the new session number.
    ///
    /// # Errors
    /// `InvalidState` if already connected, or if a follower's session has
    /// already closed.
    pub fn on_connected(&mut self, now: Instant) -> Result<u64, SessionError> {
        let allowed = match self.state {
            SessionState::Idle => true,
            SessionState::Closed => self.is_server,
            SessionState::Connected => false,
        };
        if !allowed {
            return Err(SessionError::InvalidState { state: self.state, operation: "on_connected" });
        }

        self.state = SessionState::Connected;
        self.session += 1;
        self.counters.resynchronize(self.is_server);
        self.updated = false;
        self.size_hint = 0;
        self.sent_at = None;
        self.loop_time = None;

        tracing::trace!(session = self.session, ?now, "session connected");
        Ok(self.session)
    }

    /// Stamp and emit this frame's state (authority only).
    ///
    /// Emits a size hint first when the state outgrew what the peer was last
    /// told.
    ///
    /// # Errors
    /// - `WrongSide` on a follower
    /// - `InvalidState` when not connected
    /// - `Protocol` when the state is too large for one message
    pub fn prepare_sync(
        &mut self,
        state: &[u8],
        now: Instant,
    ) -> Result<Vec<SessionAction>, SessionError> {
        if !self.is_server {
            return Err(SessionError::WrongSide { operation: "prepare_sync", side: "follower" });
        }
        self.require_connected("prepare_sync")?;

        let mut actions = self.check_if_buffer_needs_resizing(state.len());
        let frame_number = self.counters.iterate_frame_counter(true);
        actions.push(SessionAction::SendFrame(Frame::sync(frame_number, state)?));
        self.sent_at = Some(now);

        Ok(actions)
    }

    /// Acknowledge the last applied frame (follower only).
    ///
    /// # Errors
    /// - `WrongSide` on the authority
    /// - `InvalidState` when not connected
    pub fn prepare_acknowledge(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        if self.is_server {
            return Err(SessionError::WrongSide {
                operation: "prepare_acknowledge",
                side: "authority",
            });
        }
        self.require_connected("prepare_acknowledge")?;
        if !self.counters.has_received() {
            return Ok(Vec::new());
        }

        let frame_number = self.counters.iterate_frame_counter(false);
        self.updated = false;
        Ok(vec![SessionAction::SendFrame(Frame::acknowledge(frame_number))])
    }

    /// Send one data-transfer package (either side).
    ///
    /// # Errors
    /// - `WrongKind` on anything but a data-transfer connection
    /// - `InvalidState` when not connected
    /// - `Protocol` when the package is too large for one message
    pub fn prepare_data(
        &mut self,
        package_id: i32,
        data: &[u8],
    ) -> Result<Vec<SessionAction>, SessionError> {
        if self.kind != ConnectionKind::DataTransfer {
            return Err(SessionError::WrongKind { operation: "prepare_data", kind: self.kind });
        }
        self.require_connected("prepare_data")?;

        Ok(vec![SessionAction::SendFrame(Frame::data_package(package_id, data)?)])
    }

    /// Size hint for the peer when `len` exceeds the last announced size.
    pub fn check_if_buffer_needs_resizing(&mut self, len: usize) -> Vec<SessionAction> {
        if len <= self.size_hint {
            return Vec::new();
        }

        tracing::debug!(from = self.size_hint, to = len, "announcing larger state size");
        self.size_hint = len;
        let size = u32::try_from(len).unwrap_or(u32::MAX);
        vec![SessionAction::SendFrame(Frame::size_hint(size))]
    }

    /// Handle a message from the peer.
    ///
    /// # Errors
    /// - `InvalidState` when not connected
    /// - `UnexpectedMessage` for tags that make no sense on this side
    /// - `Protocol` for malformed payloads
    pub fn handle_frame(
        &mut self,
        frame: &Frame,
        now: Instant,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.require_connected("handle_frame")?;

        match (frame.tag(), self.kind) {
            (MessageTag::Sync, ConnectionKind::ExternalControl) => {
                Ok(vec![SessionAction::Command(frame.payload().clone())])
            },
            (MessageTag::Sync, ConnectionKind::Sync) if self.is_server => {
                let payload = SyncPayload::parse(frame.payload())?;
                if !payload.is_acknowledge() {
                    tracing::warn!(
                        frame = payload.frame_number,
                        bytes = payload.state.len(),
                        "follower sent state with its acknowledgement; ignoring state"
                    );
                }
                Ok(vec![self.acknowledge(payload.frame_number, now)])
            },
            (MessageTag::Sync, ConnectionKind::Sync) => {
                let payload = SyncPayload::parse(frame.payload())?;
                Ok(vec![SessionAction::Deliver {
                    frame_number: payload.frame_number,
                    state: payload.state,
                }])
            },
            (MessageTag::Sync, ConnectionKind::DataTransfer) => {
                let package = DataPackage::parse(frame.payload())?;
                if package.data.is_empty() {
                    tracing::debug!(package = package.package_id, "ignoring empty data package");
                    return Ok(Vec::new());
                }
                let ack = Frame::package_ack(package.package_id);
                Ok(vec![
                    SessionAction::DataPackage { package_id: package.package_id, data: package.data },
                    SessionAction::SendFrame(ack),
                ])
            },
            (MessageTag::Ack, ConnectionKind::DataTransfer) => {
                let ack = PackageAck::parse(frame.payload())?;
                Ok(vec![SessionAction::PackageAcknowledged { package_id: ack.package_id }])
            },
            (MessageTag::Size, _) => {
                let hint = SizeHint::parse(frame.payload())?;
                Ok(hint
                    .size
                    .map(|size| SessionAction::ResizeBuffer((size as usize).min(self.max_payload)))
                    .into_iter()
                    .collect())
            },
            (MessageTag::Connected, ConnectionKind::Sync | ConnectionKind::DataTransfer)
                if !self.is_server =>
            {
                Ok(vec![SessionAction::ClusterConnected])
            },
            (MessageTag::Disconnect, _) => {
                self.close();
                Ok(vec![SessionAction::Close { reason: "peer disconnected".to_owned() }])
            },
            (tag, kind) => Err(SessionError::UnexpectedMessage { tag, kind }),
        }
    }

    /// Publish a delivered frame once its state has been applied.
    pub fn finish_delivery(&mut self, frame_number: i32) {
        self.counters.begin_receive(frame_number);
        self.counters.swap_frames();
        self.updated = true;
    }

    /// Whether this connection is ready for the barrier.
    ///
    /// Authority: firm waits for the acknowledgement of the last sent frame,
    /// loose never waits. Follower: a frame newer than the last
    /// acknowledgement has been applied.
    pub fn is_updated(&self) -> bool {
        match (self.mode, self.is_server) {
            (SyncMode::Firm, true) => self.counters.compare_frames(),
            (SyncMode::Firm, false) => !self.counters.compare_frames(),
            (SyncMode::Loose, true) => true,
            (SyncMode::Loose, false) => self.updated,
        }
    }

    /// End the session.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    fn acknowledge(&mut self, frame_number: i32, now: Instant) -> SessionAction {
        self.counters.begin_receive(frame_number);
        self.counters.swap_frames();

        let loop_time = match self.sent_at {
            Some(sent) if frame_number == self.counters.send_frame() => {
                let elapsed = now.saturating_duration_since(sent);
                self.loop_time = Some(elapsed);
                Some(elapsed)
            },
            _ => None,
        };

        SessionAction::Acknowledged { frame_number, loop_time }
    }

    fn require_connected(&self, operation: &'static str) -> Result<(), SessionError> {
        if self.state == SessionState::Connected {
            Ok(())
        } else {
            Err(SessionError::InvalidState { state: self.state, operation })
        }
    }
}
