//! Loopback test harness for framelock.
//!
//! Real sockets on 127.0.0.1, real threads, no mocks: a whole cluster runs
//! inside one test process using the local network modes.
//!
//! - [`ChunkedReader`]: a `Read` that hands out bytes in chosen chunk sizes
//!   to simulate partial TCP reads
//! - [`LoopbackCluster`]: free ports plus authority/follower managers
//! - [`codecs`]: state codecs that count, record or pad
//! - [`RecordingObserver`]: captures connection callbacks for
//!   connection-level tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chunked;
pub mod cluster;
pub mod codecs;
pub mod observer;

use std::{
    net::TcpListener,
    time::{Duration, Instant},
};

pub use chunked::ChunkedReader;
pub use cluster::{LoopbackCluster, LoopbackClusterBuilder};
use framelock_net::CancellationToken;
pub use observer::{ObservedEvent, RecordingObserver};

/// Generous upper bound for anything a loopback test waits on
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|address| address.port())
        .unwrap_or(0)
}

/// Poll `condition` every few milliseconds until it holds or `timeout`
/// passes. Returns the final result.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let pause = CancellationToken::new();
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        pause.wait_timeout(Duration::from_millis(5));
    }
    condition()
}
