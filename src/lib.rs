//! linkprobe: measure the path between two endpoints over one TCP connection.
//!
//! The initiator connects to a responder and runs, in order, a latency probe,
//! a download and an upload, then quits. Only one operation is in flight on
//! a connection at a time.
//!
//! Features:
//! - Line-based handshake tokens with raw filler payload
//! - Upload flow control via per-MiB acks
//! - Latency probing over the open connection, with loss accounting
//! - Responder with one task per client and abortive shutdown
//! - A bundled traceroute wrapper (`trace`)

pub mod config;
pub mod error;
pub mod latency;
pub mod protocol;
pub mod session;
pub mod stats;
pub mod trace;
pub mod transfer;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{Initiator, Responder, ShutdownHandle};
pub use stats::{LatencyOutcome, LatencySummary, Report, Throughput};

use tracing_subscriber::EnvFilter;

/// Initialize logging. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
