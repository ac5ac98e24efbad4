//! Server configuration from flags or `SKIFF_*` environment variables

use std::path::PathBuf;

use clap::Parser;

/// skiff distribution server
#[derive(Parser, Debug)]
#[command(name = "skiff-server", version)]
#[command(about = "Distributes versioned file bundles to fleet clients")]
pub struct Config {
    /// Path to the JSON definition file (group → {origin: dest})
    #[arg(long, env = "SKIFF_DEFINITION_PATH")]
    pub definition_path: PathBuf,

    /// Directory for the persistent hash cache
    #[arg(long, env = "SKIFF_CACHE_PATH")]
    pub cache_path: PathBuf,

    /// HTTP listen address (file bytes, /sets, /reload)
    #[arg(long, env = "SKIFF_HTTP_LISTEN_ADDR", default_value = "0.0.0.0:50080")]
    pub http_listen_addr: String,

    /// TCP listen address for the client event stream
    #[arg(long, env = "SKIFF_RPC_LISTEN_ADDR", default_value = "0.0.0.0:50081")]
    pub rpc_listen_addr: String,

    /// Hashing worker count for definition scans
    #[arg(long, env = "SKIFF_WORKERS", default_value_t = 10)]
    pub workers: usize,
}
