use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hls_stats_engine::DEFAULT_USER_AGENT;

#[derive(Parser, Debug)]
#[command(
    name = "hls-stats",
    author,
    version,
    about = "Simulate live HLS viewers and report latency, throughput and playback failures",
    long_about = None
)]
pub struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Follow every playlist of a config file with one viewer each
    Monitor(MonitorArgs),

    /// Run many concurrent viewers against one playlist and print throughput summaries
    LoadGen(LoadGenArgs),
}

#[derive(clap::Args, Debug)]
pub struct MonitorArgs {
    /// JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Write events to InfluxDB (influx* keys of the config file)
    #[arg(long)]
    pub influx: bool,

    /// Do not print successful downloads
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(clap::Args, Debug)]
pub struct LoadGenArgs {
    /// Do not print successful downloads, only statistics
    #[arg(short, long)]
    pub quiet: bool,

    /// Number of parallel viewers
    #[arg(long, default_value_t = 10)]
    pub instances: usize,

    /// Number of segments away from the live edge to start playback
    #[arg(long, default_value_t = 1)]
    pub buffer: usize,

    /// HTTP(S) or SOCKS5 proxy, e.g. http://host:port
    #[arg(long)]
    pub proxy: Option<String>,

    /// Value of the User-Agent header
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    pub useragent: String,

    /// Seconds between throughput summaries
    #[arg(long, default_value_t = 10)]
    pub print_interval: u64,

    /// Start a new viewer whenever one terminates
    #[arg(long)]
    pub respawn: bool,

    /// Media playlist URL, including the protocol
    pub url: Option<String>,
}
