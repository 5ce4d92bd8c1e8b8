//! Latency prober.
//!
//! Round trips run over the already-open connection so connection setup
//! cost never shows up in a sample. Each probe is a timestamp line prefixed
//! with its sequence number; the responder echoes it verbatim. A probe whose
//! echo does not come back within the echo timeout counts as lost, and a late
//! echo that shows up afterwards is skipped.
//!
//! The responder answers `ping_done` with `done`, which lets the initiator
//! drain any late echoes before the next operation starts.

use chrono::{SecondsFormat, Utc};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::{Channel, Token};
use crate::stats::LatencyOutcome;

/// Probe schedule for the initiator side.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub samples: usize,
    /// Pause between consecutive probes.
    pub interval: Duration,
    /// How long to wait for one echo before counting it lost.
    pub echo_timeout: Duration,
    pub io_timeout: Duration,
}

/// Run a full latency probe: `ping`, N echoes, `ping_done`.
pub async fn probe<S>(channel: &mut Channel<S>, settings: &ProbeSettings) -> Result<LatencyOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    channel.write_token(&Token::Ping, settings.io_timeout).await?;

    let mut rtts = Vec::with_capacity(settings.samples);
    let mut lost = 0;

    for seq in 0..settings.samples {
        if seq > 0 {
            time::sleep(settings.interval).await;
        }

        let payload = stamp(seq);
        let sent = Instant::now();
        channel
            .write_token(&Token::Echo(payload.clone()), settings.io_timeout)
            .await?;

        match await_echo(channel, &payload, settings.echo_timeout).await {
            Ok(()) => {
                let rtt = sent.elapsed();
                trace!(seq, rtt_us = rtt.as_micros() as u64, "Echo received");
                rtts.push(rtt);
            }
            Err(Error::TransferStalled { .. }) => {
                debug!(seq, "Echo lost");
                lost += 1;
            }
            Err(e) => return Err(e),
        }
    }

    channel
        .write_token(&Token::PingDone, settings.io_timeout)
        .await?;
    drain_until_done(channel, settings.io_timeout).await?;

    Ok(LatencyOutcome::from_samples(&rtts, lost))
}

/// Responder side: echo every probe line until `ping_done`.
///
/// Returns the number of probes echoed.
pub async fn echo<S>(channel: &mut Channel<S>, io_timeout: Duration) -> Result<usize>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut echoed = 0;

    loop {
        match channel.read_token(io_timeout).await? {
            Token::Echo(payload) => {
                channel
                    .write_token(&Token::Echo(payload), io_timeout)
                    .await?;
                echoed += 1;
            }
            Token::PingDone => {
                channel.write_token(&Token::Done, io_timeout).await?;
                return Ok(echoed);
            }
            other => return Err(Error::violation("echo or ping_done", other.to_string())),
        }
    }
}

/// Build the probe payload for sample `seq`.
fn stamp(seq: usize) -> Vec<u8> {
    format!(
        "{seq}-{}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
    )
    .into_bytes()
}

async fn await_echo<S>(channel: &mut Channel<S>, payload: &[u8], timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let deadline = time::Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(time::Instant::now());
        if remaining.is_zero() {
            return Err(Error::stalled("echo", timeout));
        }

        match channel.read_token(remaining).await {
            Ok(Token::Echo(echoed)) if echoed == payload => return Ok(()),
            Ok(Token::Echo(stale)) => {
                trace!(stale = %String::from_utf8_lossy(&stale), "Skipping late echo");
            }
            Ok(other) => return Err(Error::violation("echo", other.to_string())),
            Err(Error::TransferStalled { .. }) => return Err(Error::stalled("echo", timeout)),
            Err(e) => return Err(e),
        }
    }
}

async fn drain_until_done<S>(channel: &mut Channel<S>, timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match channel.read_token(timeout).await? {
            Token::Done => return Ok(()),
            Token::Echo(_) => {}
            other => return Err(Error::violation("done", other.to_string())),
        }
    }
}
