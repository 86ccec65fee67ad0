// CLI entry point for a linkchat relay node.
//
// Starts one node of the chain and blocks until the process is killed.
// Every node of a chain should be given the same topology file; the
// position picks this node's row.
//
// Usage:
//   relay --position <N> [OPTIONS]
//     --topology <FILE>        JSON chain topology (default: built-in
//                              three-node localhost chain)
//     --port <PORT>            Listen port override (default: topology's)
//     --bind <HOST>            Bind address (default: 0.0.0.0)
//     --sync-interval-ms <MS>  Roster sync cadence (default: 250)
//
// Log verbosity follows RUST_LOG (default `info`).

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use linkchat_protocol::ChainPosition;
use linkchat_relay::config::{ChainTopology, ServerConfig};
use linkchat_relay::server::start_server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "relay", about = "Run one node of a linkchat relay chain")]
struct Args {
    /// Chain position of this node (0 is the leftmost).
    #[arg(long, short)]
    position: u8,

    /// JSON topology file shared by every node in the chain.
    #[arg(long)]
    topology: Option<PathBuf>,

    /// Listen port, overriding the topology entry for this position.
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind the UDP socket to.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Milliseconds between roster pushes to neighbors.
    #[arg(long, default_value_t = 250)]
    sync_interval_ms: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let topology = match &args.topology {
        Some(path) => match ChainTopology::load(path) {
            Ok(topology) => topology,
            Err(e) => {
                error!(error = %e, "failed to load topology");
                return ExitCode::FAILURE;
            }
        },
        None => ChainTopology::default(),
    };

    let config = ServerConfig {
        port: args.port,
        bind_host: args.bind,
        sync_interval: Duration::from_millis(args.sync_interval_ms),
        ..ServerConfig::for_position(topology, ChainPosition(args.position))
    };

    let (handle, addr) = match start_server(config) {
        Ok(started) => started,
        Err(e) => {
            error!(error = %e, "failed to start relay");
            return ExitCode::FAILURE;
        }
    };

    info!(
        node = handle.name(),
        position = %handle.position(),
        %addr,
        "listening; Ctrl+C to stop"
    );
    handle.wait();
    ExitCode::SUCCESS
}
