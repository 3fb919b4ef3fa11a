//! Command line interface for the `sockframe` demo server.
//!
//! Also consumed by the build script to render the manual page.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `sockframe` binary.
#[derive(Debug, Parser)]
#[command(
    name = "sockframe",
    version,
    about = "Demo server speaking Fast RPC and WebSocket"
)]
pub struct Cli {
    /// Address of the Fast RPC echo listener.
    #[arg(long, default_value = "127.0.0.1:7100")]
    pub fast: SocketAddr,
    /// Address of the WebSocket echo listener.
    #[arg(long, default_value = "127.0.0.1:7101")]
    pub ws: SocketAddr,
    /// Accept tasks per listener; defaults to the number of CPU cores.
    #[arg(short, long)]
    pub workers: Option<usize>,
    /// JSON file with server settings.
    #[arg(short, long)]
    pub config: Option<std::path::PathBuf>,
    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    pub metrics: Option<SocketAddr>,
}
