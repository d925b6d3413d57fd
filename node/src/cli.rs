//! # CLI Interface
//!
//! Command-line arguments for `quill-node`, via `clap` derive. Every `run`
//! flag can also come from the environment.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use quill_protocol::config::{
    DEFAULT_HTTP_PORT, DEFAULT_METRICS_PORT, DEFAULT_P2P_PORT, GOSSIP_INTERVAL,
};

use crate::logging::LogFormat;

/// Quill ledger node.
///
/// Holds a hash-linked chain of posts, serves it over HTTP, and keeps it
/// in sync with peers over WebSockets.
#[derive(Parser, Debug)]
#[command(
    name = "quill-node",
    about = "Quill ledger node",
    version,
    propagate_version = true
)]
pub struct QuillNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Create the data directory and the node wallet, then print the
    /// wallet's public key.
    Init(InitArgs),
    /// Query the status of a running node over HTTP.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the chain database and the wallet key.
    #[arg(long, short = 'd', env = "QUILL_DATA_DIR", default_value = "./quill-data")]
    pub data_dir: PathBuf,

    /// Port for the HTTP API.
    #[arg(long, env = "HTTP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    pub http_port: u16,

    /// Port for the peer WebSocket listener.
    #[arg(long, env = "WS_PORT", default_value_t = DEFAULT_P2P_PORT)]
    pub p2p_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "QUILL_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Peers to dial at startup, as comma-separated `ws://host:port` URLs.
    #[arg(long, env = "PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Seconds between full-chain gossip rounds.
    #[arg(
        long,
        env = "QUILL_GOSSIP_INTERVAL_SECS",
        default_value_t = GOSSIP_INTERVAL.as_secs()
    )]
    pub gossip_interval_secs: u64,

    /// Log output format.
    #[arg(long, env = "QUILL_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl RunArgs {
    pub fn gossip_interval(&self) -> Duration {
        Duration::from_secs(self.gossip_interval_secs.max(1))
    }

    /// Peer URLs with surrounding whitespace and empty entries removed.
    pub fn peer_urls(&self) -> Vec<String> {
        self.peers
            .iter()
            .map(|peer| peer.trim())
            .filter(|peer| !peer.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Data directory to initialize.
    #[arg(long, short = 'd', env = "QUILL_DATA_DIR", default_value = "./quill-data")]
    pub data_dir: PathBuf,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// HTTP address (`host:port`) of the running node.
    #[arg(long, default_value = "127.0.0.1:3000")]
    pub http_addr: String,
}
