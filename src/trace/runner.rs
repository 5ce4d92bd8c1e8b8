//! Runs the platform traceroute command.

use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time;
use tracing::debug;

use super::parser::{parse_output, Hop};

/// Traceroute errors
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: &'static str,
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: &'static str,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{program} did not finish within {timeout:?}")]
    TimedOut {
        program: &'static str,
        timeout: Duration,
    },
}

/// What to trace and how patiently.
#[derive(Debug, Clone)]
pub struct TraceRequest {
    pub target: String,
    pub max_hops: u8,
    /// Per-hop reply timeout.
    pub timeout: Duration,
}

impl TraceRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            max_hops: 30,
            timeout: Duration::from_secs(1),
        }
    }

    /// Program and arguments for this platform.
    pub fn program_and_args(&self) -> (&'static str, Vec<String>) {
        if cfg!(windows) {
            (
                "tracert",
                vec![
                    "-d".to_string(),
                    "-h".to_string(),
                    self.max_hops.to_string(),
                    "-w".to_string(),
                    self.timeout.as_millis().to_string(),
                    self.target.clone(),
                ],
            )
        } else {
            (
                "traceroute",
                vec![
                    "-n".to_string(),
                    "-m".to_string(),
                    self.max_hops.to_string(),
                    "-w".to_string(),
                    format!("{:.1}", self.timeout.as_secs_f64()),
                    self.target.clone(),
                ],
            )
        }
    }

    /// Upper bound on a full run: three probes per hop, each waiting at most
    /// the per-hop timeout, plus slack for name resolution.
    pub fn overall_timeout(&self) -> Duration {
        self.timeout * 3 * u32::from(self.max_hops) + Duration::from_secs(5)
    }
}

/// Run the trace and parse its hops.
pub async fn run(request: &TraceRequest) -> Result<Vec<Hop>, TraceError> {
    let (program, args) = request.program_and_args();
    debug!(program, ?args, "Running traceroute");

    let overall = request.overall_timeout();
    let output = time::timeout(
        overall,
        Command::new(program).args(&args).kill_on_drop(true).output(),
    )
    .await
    .map_err(|_| TraceError::TimedOut {
        program,
        timeout: overall,
    })?
    .map_err(|source| TraceError::Spawn { program, source })?;

    if !output.status.success() && output.stdout.is_empty() {
        return Err(TraceError::Failed {
            program,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(parse_output(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line() {
        let request = TraceRequest {
            target: "8.8.8.8".to_string(),
            max_hops: 12,
            timeout: Duration::from_millis(1500),
        };
        let (program, args) = request.program_and_args();
        if cfg!(windows) {
            assert_eq!(program, "tracert");
            assert_eq!(args, ["-d", "-h", "12", "-w", "1500", "8.8.8.8"]);
        } else {
            assert_eq!(program, "traceroute");
            assert_eq!(args, ["-n", "-m", "12", "-w", "1.5", "8.8.8.8"]);
        }
    }

    #[test]
    fn test_overall_timeout() {
        let request = TraceRequest::new("example.com");
        assert_eq!(request.overall_timeout(), Duration::from_secs(95));
    }
}
