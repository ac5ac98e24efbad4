//! Client configuration from flags or `SKIFF_*` environment variables

use std::path::PathBuf;

use clap::Parser;

/// skiff fleet client
#[derive(Parser, Debug)]
#[command(name = "skiff-client", version)]
#[command(about = "Keeps local files in sync with the distribution server")]
pub struct Config {
    /// Groups to subscribe to, comma separated
    #[arg(long, env = "SKIFF_GROUPS", value_delimiter = ',', required = true)]
    pub groups: Vec<String>,

    /// Device serial number, reported upstream
    #[arg(long, env = "SKIFF_SERIAL", default_value = "")]
    pub serial: String,

    /// Primary hardware address, reported upstream
    #[arg(long, env = "SKIFF_HARDWARE_ADDR", default_value = "")]
    pub hardware_addr: String,

    /// Physical location label, reported upstream
    #[arg(long, env = "SKIFF_LOCATION", default_value = "")]
    pub location: String,

    /// Base URL of the server's HTTP byte endpoint
    #[arg(long, env = "SKIFF_HTTP_SERVER", default_value = "http://127.0.0.1:50080")]
    pub http_server: String,

    /// Address of the server's TCP event stream
    #[arg(long, env = "SKIFF_RPC_SERVER", default_value = "127.0.0.1:50081")]
    pub rpc_server: String,

    /// Directory for the persistent hash cache
    #[arg(long, env = "SKIFF_CACHE_PATH")]
    pub cache_path: PathBuf,

    /// Seconds between status reports on the event stream
    #[arg(long, env = "SKIFF_REPORT_INTERVAL", default_value_t = 60)]
    pub report_interval_secs: u64,

    /// Seconds between polling checks against the server
    #[arg(long, env = "SKIFF_CHECK_INTERVAL", default_value_t = 600)]
    pub check_interval_secs: u64,
}
