//! Command-line arguments.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use framelock_core::{
    ClusterConfig, ExternalFormat, NetworkMode, NodeConfig, SyncConfig, SyncMode,
};

/// Run one node of a frame-locked cluster.
#[derive(Parser, Debug)]
#[command(name = "framelock-node")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// How this process picks its role
    #[arg(long, value_enum, default_value_t = Mode::Remote)]
    pub mode: Mode,

    /// Address of the authority
    #[arg(long, default_value = "127.0.0.1")]
    pub master: String,

    /// Rendering node as ADDRESS:PORT[/DATA_PORT], in cluster order
    /// (repeatable); DATA_PORT adds a data-transfer connection
    #[arg(long = "node", required = true, value_parser = parse_node)]
    pub nodes: Vec<NodeConfig>,

    /// Index of this process in the node list (required in local modes)
    #[arg(long)]
    pub this_node: Option<usize>,

    /// Port of the external-control listener on the authority
    #[arg(long)]
    pub external_port: Option<u16>,

    /// External-control protocol
    #[arg(long, value_enum, default_value_t = ControlFormat::Ascii)]
    pub external_format: ControlFormat,

    /// Stop after this many frames; runs until the cluster stops otherwise
    #[arg(long)]
    pub frames: Option<u64>,

    /// Target frame rate of the demo loop
    #[arg(long, default_value_t = 60)]
    pub fps: u32,

    /// Loose frame lock: the authority never waits for acknowledgements
    #[arg(long)]
    pub loose: bool,

    /// Seconds a barrier may wait before the frame is abandoned
    #[arg(long, default_value_t = 60)]
    pub sync_timeout: u64,

    /// Seconds a follower keeps retrying the authority; forever if unset
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Role selection, mirrored from [`NetworkMode`].
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum Mode {
    /// Authority iff this host matches `--master`
    #[default]
    Remote,
    /// Authority on loopback
    LocalServer,
    /// Follower on loopback
    LocalClient,
}

/// External-control protocol, mirrored from [`ExternalFormat`].
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum ControlFormat {
    /// CR-LF text lines
    #[default]
    Ascii,
    /// Sync-framed messages
    Framed,
}

impl Cli {
    /// Role this process plays.
    pub fn network_mode(&self) -> NetworkMode {
        match self.mode {
            Mode::Remote => NetworkMode::Remote,
            Mode::LocalServer => NetworkMode::LocalServer,
            Mode::LocalClient => NetworkMode::LocalClient,
        }
    }

    /// Cluster layout from the node list and control flags.
    pub fn cluster(&self) -> ClusterConfig {
        let mut cluster = ClusterConfig::new(self.master.clone(), self.nodes.clone());
        if let Some(port) = self.external_port {
            let format = match self.external_format {
                ControlFormat::Ascii => ExternalFormat::Ascii,
                ControlFormat::Framed => ExternalFormat::Framed,
            };
            cluster = cluster.with_external_control(port, format);
        }
        if let Some(index) = self.this_node {
            cluster = cluster.with_this_node(index);
        }
        cluster
    }

    /// Barrier settings from the command line.
    pub fn sync_config(&self) -> SyncConfig {
        let mut config = SyncConfig::default()
            .with_mode(if self.loose { SyncMode::Loose } else { SyncMode::Firm })
            .with_sync_timeout(Duration::from_secs(self.sync_timeout));
        if let Some(seconds) = self.connect_timeout {
            config = config.with_connect_timeout(Duration::from_secs(seconds));
        }
        config
    }

    /// Duration of one demo frame.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

fn parse_node(value: &str) -> Result<NodeConfig, String> {
    let (endpoint, data_port) = match value.split_once('/') {
        Some((endpoint, data_port)) => (endpoint, Some(data_port)),
        None => (value, None),
    };
    let (address, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| format!("expected ADDRESS:PORT, got `{value}`"))?;
    if address.is_empty() {
        return Err(format!("missing address in `{value}`"));
    }
    let port = port.parse::<u16>().map_err(|e| format!("bad port in `{value}`: {e}"))?;
    let node = NodeConfig::new(address, port);

    match data_port {
        Some(data_port) => {
            let data_port = data_port
                .parse::<u16>()
                .map_err(|e| format!("bad data transfer port in `{value}`: {e}"))?;
            Ok(node.with_data_transfer_port(data_port))
        },
        None => Ok(node),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_local_cluster() {
        let cli = Cli::parse_from([
            "framelock-node",
            "--mode",
            "local-client",
            "--node",
            "127.0.0.1:20401",
            "--node",
            "127.0.0.1:20402",
            "--this-node",
            "1",
            "--external-port",
            "20500",
            "--loose",
        ]);

        assert_eq!(cli.network_mode(), NetworkMode::LocalClient);
        let cluster = cli.cluster();
        assert_eq!(cluster.nodes[1], NodeConfig::new("127.0.0.1", 20402));
        assert_eq!(cluster.this_node, Some(1));
        assert_eq!(cluster.external_control.map(|e| e.format), Some(ExternalFormat::Ascii));
        assert_eq!(cli.sync_config().mode, SyncMode::Loose);
    }

    #[test]
    fn rejects_node_without_port() {
        assert!(parse_node("10.0.0.1").is_err());
        assert!(parse_node(":80").is_err());
        assert!(parse_node("10.0.0.1:http").is_err());
        assert_eq!(parse_node("render-3:20403").unwrap(), NodeConfig::new("render-3", 20403));
    }

    #[test]
    fn node_may_carry_data_transfer_port() {
        assert_eq!(
            parse_node("render-3:20403/20503").unwrap(),
            NodeConfig::new("render-3", 20403).with_data_transfer_port(20503)
        );
        assert!(parse_node("render-3:20403/").is_err());
        assert!(parse_node("render-3/20503").is_err());
    }

    #[test]
    fn frame_interval_tracks_fps() {
        let cli = Cli::parse_from(["framelock-node", "--node", "a:1", "--fps", "50"]);
        assert_eq!(cli.frame_interval(), Duration::from_millis(20));
    }
}
