//! Frame lock.
//!
//! The render loop brackets every frame with two calls:
//!
//! ```text
//! authority                         follower
//! pre_stage:  encode + send N       pre_stage:  wait for N, apply, ack N
//!   draw                              draw
//! post_stage: wait for ack N        post_stage: -
//!   swap buffers                      swap buffers
//! ```
//!
//! In firm mode the authority never encodes frame N+1 before every follower
//! has acknowledged N, and no follower draws before it has applied the
//! frame it is about to show. Loose mode drops the authority's wait.
//!
//! Waiting uses the manager's condition variable; connections signal it on
//! every published frame, acknowledgement and status change.

use std::time::{Duration, Instant};

use framelock_core::SyncMode;
use tracing::info;

use crate::{NetError, lock, manager::ConnectionManager};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Send-to-acknowledge round trip across the authority's peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTimes {
    /// Fastest peer
    pub min: Duration,
    /// Slowest peer
    pub max: Duration,
}

impl LoopTimes {
    /// Fold one peer's round trip into the running min/max.
    pub fn record(times: Option<Self>, loop_time: Duration) -> Self {
        match times {
            None => Self { min: loop_time, max: loop_time },
            Some(times) => Self { min: times.min.min(loop_time), max: times.max.max(loop_time) },
        }
    }
}

impl ConnectionManager {
    /// Block until [`is_sync_complete`](Self::is_sync_complete) holds or the
    /// cluster stops running.
    ///
    /// Logs who it is waiting for once per second when
    /// `print_sync_message` is set.
    ///
    /// # Errors
    /// `SyncTimeout` after `sync_timeout`.
    pub fn wait_for_sync(&self) -> Result<(), NetError> {
        let shared = &self.shared;
        let timeout = shared.config.sync_timeout;
        let started = Instant::now();
        let mut next_report = started + REPORT_INTERVAL;

        let mut status = lock(&shared.status);
        loop {
            if !status.running || shared.is_sync_complete() {
                return Ok(());
            }

            let now = Instant::now();
            let waited = now.duration_since(started);
            if waited >= timeout {
                return Err(NetError::SyncTimeout { waited, waiting_for: shared.waiting_for() });
            }

            if now >= next_report {
                if shared.config.print_sync_message {
                    info!(waited_ms = waited.as_millis(), "waiting for {}", shared.waiting_for());
                }
                next_report = now + REPORT_INTERVAL;
            }

            let pause = (timeout - waited).min(next_report.saturating_duration_since(now));
            status = match shared.status_changed.wait_timeout(status, pause) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Start-of-frame half of the frame lock.
    ///
    /// Authority: encode and send this frame. Follower: wait until the next
    /// frame has been applied, publish it and acknowledge it.
    ///
    /// Returns the authority's loop times.
    pub fn pre_stage(&self) -> Result<Option<LoopTimes>, NetError> {
        if self.is_server() {
            return self.sync();
        }
        if !self.is_running() {
            return Ok(None);
        }

        self.wait_for_sync()?;
        self.swap_data();
        self.sync()
    }

    /// End-of-frame half of the frame lock.
    ///
    /// A firm authority with connected followers waits for every
    /// acknowledgement of the frame sent in `pre_stage`.
    pub fn post_stage(&self) -> Result<(), NetError> {
        if self.is_server()
            && self.shared.config.mode == SyncMode::Firm
            && self.sync_connections_count() > 0
        {
            self.wait_for_sync()?;
        }
        Ok(())
    }
}
