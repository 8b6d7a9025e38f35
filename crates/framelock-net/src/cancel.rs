//! Cancellation token for blocking loops.
//!
//! The connect-retry loop, the accept poll and the barrier all pause between
//! attempts. Pausing on a token instead of sleeping lets shutdown interrupt
//! the pause immediately.

use std::{
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

use crate::lock;

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Cloneable, thread-safe cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel and wake every waiter. Idempotent.
    pub fn cancel(&self) {
        *lock(&self.inner.cancelled) = true;
        self.inner.wake.notify_all();
    }

    /// Whether `cancel` has been called
    pub fn is_cancelled(&self) -> bool {
        *lock(&self.inner.cancelled)
    }

    /// Pause for up to `timeout`, returning early on cancellation.
    ///
    /// Returns `true` if the token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = lock(&self.inner.cancelled);
        let (guard, _) = self
            .inner
            .wake
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard
    }
}
