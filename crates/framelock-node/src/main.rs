//! Framelock node binary.
//!
//! Joins the cluster described on the command line and runs a paced demo
//! render loop under the frame lock until the cluster stops or the frame
//! limit is reached.

mod cli;
mod demo;

use std::time::Instant;

use clap::Parser;
use cli::Cli;
use demo::SceneCodec;
use framelock_net::{CancellationToken, ConnectionManager, ErrorKind};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let interval = cli.frame_interval();
    let manager = ConnectionManager::init(
        &cli.cluster(),
        cli.network_mode(),
        cli.sync_config(),
        SceneCodec::new(interval),
    )?;
    manager.set_external_handler(|connection, command| {
        info!(connection, command, "external command");
    });
    manager.set_data_handler(|connection, package, data| {
        info!(connection, package, bytes = data.len(), "data package received");
    });
    manager.set_data_ack_handler(|connection, package| {
        debug!(connection, package, "data package acknowledged");
    });

    info!(
        is_server = manager.is_server(),
        this_node = ?manager.this_node(),
        "waiting for the cluster"
    );
    let pause = CancellationToken::new();
    while manager.is_running() && !manager.are_all_nodes_connected() {
        pause.wait_timeout(interval);
    }

    let started = Instant::now();
    let mut frames = 0u64;
    while manager.is_running() && cli.frames.is_none_or(|limit| frames < limit) {
        let frame_started = Instant::now();

        match manager.pre_stage() {
            Ok(Some(times)) if frames % 600 == 0 => {
                info!(frames, min = ?times.min, max = ?times.max, "loop time");
            },
            Ok(_) => {},
            Err(e) if e.kind() == ErrorKind::Transient => {
                warn!(error = %e, "frame not synchronized");
            },
            Err(e) => {
                error!(error = %e, "frame lock failed");
                manager.close();
                return Err(e.into());
            },
        }

        // Stand-in for drawing.
        pause.wait_timeout(interval.saturating_sub(frame_started.elapsed()));

        if let Err(e) = manager.post_stage() {
            warn!(error = %e, "acknowledgements missing");
        }
        frames += 1;
    }

    info!(frames, elapsed = ?started.elapsed(), "render loop finished");
    manager.close();
    Ok(())
}
