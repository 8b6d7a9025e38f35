//! Framelock socket runtime
//!
//! Drives the sans-IO pieces of `framelock-core` over blocking TCP sockets
//! and OS threads:
//!
//! - one accept thread per authority-side [`Connection`], re-accepting after
//!   each session ends
//! - one reader thread per session, blocking in `read` and feeding a
//!   [`FrameDecoder`](framelock_proto::FrameDecoder)
//! - the render thread, which calls into [`ConnectionManager`] once per frame
//!   (`pre_stage` / `post_stage`)
//!
//! Counter and status locks are held only around in-memory updates, never
//! across a blocking socket call. The per-connection writer lock is held for
//! exactly one message so frames never interleave.
//!
//! # Components
//!
//! - [`connection`]: socket lifecycle for one peer
//! - [`manager`]: cluster-wide view and the render-loop control surface
//! - [`barrier`]: the frame lock built on top of the manager
//! - [`reader`]: blocking read loop shared by every connection
//! - [`cancel`]: cancellation token for retry and accept loops
//! - [`host`]: host identity detection
//! - [`error`]: error types

pub mod barrier;
pub mod cancel;
pub mod connection;
pub mod error;
pub mod host;
pub mod manager;
pub mod reader;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use barrier::LoopTimes;
pub use cancel::CancellationToken;
pub use connection::{Connection, ConnectionObserver, Endpoint};
pub use error::{ErrorKind, NetError};
pub use manager::ConnectionManager;
pub use reader::{ReadOutcome, read_frames};

/// Lock, recovering the data if another thread panicked while holding it.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T: ?Sized>(rwlock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rwlock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T: ?Sized>(rwlock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rwlock.write().unwrap_or_else(PoisonError::into_inner)
}
