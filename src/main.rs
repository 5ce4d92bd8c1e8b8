//! linkprobe: network latency and throughput probe
//!
//! Run `linkprobe server` on one host and `linkprobe <host>` on another.
//! The initiator measures:
//! - Round-trip latency (min/avg/max over N echoes)
//! - Download throughput (responder to initiator)
//! - Upload throughput (initiator to responder, flow-controlled)
//!
//! Configuration via CLI arguments or TOML file.

use linkprobe::config::{Config, Role};
use linkprobe::session::{self, Responder};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    linkprobe::init_logging(&config.log_level);

    match config.role.clone() {
        Role::Responder => run_responder(config).await,
        Role::Initiator { host } => run_initiator(config, &host).await,
    }
}

/// Serve until interrupted.
async fn run_responder(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        listen = %config.listen,
        max_sessions = config.max_sessions,
        total_bytes = config.total_bytes,
        chunk_size = config.chunk_size,
        "Starting linkprobe responder"
    );

    let responder = Responder::bind(config)?;
    let handle = responder.shutdown_handle();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received");
                handle.shutdown();
            }
            Err(e) => error!(error = %e, "Failed to listen for interrupt"),
        }
    });

    responder.run().await?;
    Ok(())
}

/// Run the scripted sequence once and print the report.
async fn run_initiator(config: Config, host: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        host,
        port = config.port,
        total_bytes = config.total_bytes,
        latency = config.latency_enabled,
        "Starting speed test"
    );

    match session::run_initiator(&config, host).await {
        Ok(report) => {
            println!("{report}");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Speed test failed");
            Err(e.into())
        }
    }
}
