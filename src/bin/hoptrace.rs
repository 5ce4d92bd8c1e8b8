//! hoptrace: per-hop latency and loss via the platform traceroute.

use clap::Parser;
use linkprobe::trace::{self, TraceRequest};
use std::time::Duration;
use tracing::{error, info};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "hoptrace")]
#[command(version = "0.1.0")]
#[command(about = "Trace the route to a host and summarise each hop", long_about = None)]
struct CliArgs {
    /// Host or address to trace
    target: String,

    /// Maximum number of hops
    #[arg(short = 'm', long, default_value_t = 30)]
    max_hops: u8,

    /// Per-hop timeout in milliseconds
    #[arg(short = 'w', long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();
    linkprobe::init_logging(&cli.log_level);

    let request = TraceRequest {
        target: cli.target,
        max_hops: cli.max_hops,
        timeout: Duration::from_millis(cli.timeout_ms),
    };
    info!(host = %request.target, max_hops = request.max_hops, "Tracing route");

    match trace::run(&request).await {
        Ok(hops) => {
            print!("{}", trace::render_table(&hops));
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Trace failed");
            Err(e.into())
        }
    }
}
