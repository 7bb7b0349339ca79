use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "service-skeleton")]
#[command(about = "Background service runner with a replicated Redis cache client")]
#[command(
    long_about = "Runs service units against a replica set of Redis backends: writes go to every backend in order, reads fall back across them"
)]
#[command(version)]
pub struct Cli {
    /// Configuration file path (JSON format)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Redis backend address; repeat to add replicas, the first is the primary
    #[arg(short, long = "redis", value_name = "ADDR")]
    pub redis: Vec<String>,

    /// Serve Prometheus metrics
    #[arg(short, long)]
    pub metrics: bool,

    /// Metrics endpoint host
    #[arg(long)]
    pub metrics_host: Option<String>,

    /// Metrics endpoint port
    #[arg(long)]
    pub metrics_port: Option<u16>,

    /// Key pattern counted by the keyspace reporter
    #[arg(long)]
    pub scan_pattern: Option<String>,

    /// Seconds between keyspace reports
    #[arg(long)]
    pub report_interval_secs: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Print example usage
    pub fn print_examples() {
        println!("Examples:");
        println!("  # Single standalone backend");
        println!("  {} --redis 127.0.0.1:6379", env!("CARGO_PKG_NAME"));
        println!();

        println!("  # Primary plus one replica, metrics on :9090");
        println!(
            "  {} --redis 10.0.0.1:6379 --redis 10.0.0.2:6379 --metrics",
            env!("CARGO_PKG_NAME")
        );
        println!();

        println!("  # Backends from a configuration file");
        println!("  {} --config ./service.json", env!("CARGO_PKG_NAME"));
        println!();

        println!("Environment:");
        println!("  REDIS_HOST, REDIS_NAME, REDIS_PASSWORD, REDIS_SENTINEL_PRIMARY, METRICS_ENABLED, ...");
    }
}
