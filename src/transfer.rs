//! Bulk transfer engine.
//!
//! Moves exactly `total_bytes` of filler in one direction, in chunks of at
//! most `chunk_size`. Payload content is never inspected, only counted.
//!
//! ## Flow control
//!
//! With an [`AckPolicy`], the sender stops at every multiple of the ack
//! interval and waits for the receiver's `ack` before writing past it.

use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::{Channel, Token};
use crate::stats::Throughput;

/// Filler byte written as payload.
const FILLER: u8 = b'x';

/// Per-operation transfer counters. Never shared across operations.
#[derive(Debug, Clone)]
pub struct TransferState {
    stage: &'static str,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    started: Option<Instant>,
}

impl TransferState {
    pub fn new(stage: &'static str, total_bytes: u64) -> Self {
        Self {
            stage,
            bytes_transferred: 0,
            total_bytes,
            started: None,
        }
    }

    /// Start the stopwatch if it is not already running.
    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    pub fn record(&mut self, n: usize) {
        self.bytes_transferred += n as u64;
    }

    pub fn remaining(&self) -> u64 {
        self.total_bytes - self.bytes_transferred
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_transferred >= self.total_bytes
    }

    /// Stop the stopwatch and reduce to a throughput figure.
    pub fn finish(&self) -> Throughput {
        let elapsed = self
            .started
            .map(|started| started.elapsed())
            .unwrap_or(Duration::ZERO);
        Throughput::new(self.bytes_transferred, elapsed)
    }

    fn fault(&self, err: Error) -> Error {
        err.at(self.stage, self.bytes_transferred, self.total_bytes)
    }

    fn closed(&self) -> Error {
        Error::closed(self.stage, self.bytes_transferred, self.total_bytes)
    }
}

/// Progress-ack throttle for the sending side.
#[derive(Debug, Clone, Copy)]
pub struct AckPolicy {
    /// Bytes between checkpoints.
    pub interval: u64,
    /// How long to wait for each ack.
    pub timeout: Duration,
}

/// Send `state.total_bytes` of filler.
pub async fn send_bulk<S>(
    channel: &mut Channel<S>,
    state: &mut TransferState,
    chunk_size: usize,
    ack: Option<AckPolicy>,
    io_timeout: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let filler = vec![FILLER; chunk_size];
    let mut next_checkpoint = ack.map(|policy| policy.interval);

    state.start();

    while !state.is_complete() {
        let mut limit = state.remaining();
        if let Some(checkpoint) = next_checkpoint {
            limit = limit.min(checkpoint - state.bytes_transferred);
        }
        let len = (chunk_size as u64).min(limit) as usize;

        let n = channel
            .write_payload(&filler[..len], io_timeout)
            .await
            .map_err(|e| state.fault(e))?;
        if n == 0 {
            return Err(state.closed());
        }
        state.record(n);

        if let (Some(policy), Some(checkpoint)) = (ack, next_checkpoint) {
            if state.bytes_transferred == checkpoint {
                channel
                    .flush(io_timeout)
                    .await
                    .map_err(|e| state.fault(e))?;
                wait_for_ack(channel, policy.timeout)
                    .await
                    .map_err(|e| state.fault(e))?;
                trace!(bytes = state.bytes_transferred, "Checkpoint acknowledged");
                next_checkpoint = Some(checkpoint + policy.interval);
            }
        }
    }

    channel.flush(io_timeout).await.map_err(|e| state.fault(e))
}

/// Receive `state.total_bytes` of payload, acking every `ack_interval` bytes
/// when one is given.
pub async fn recv_bulk<S>(
    channel: &mut Channel<S>,
    state: &mut TransferState,
    chunk_size: usize,
    ack_interval: Option<u64>,
    io_timeout: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; chunk_size];
    let mut next_checkpoint = ack_interval;

    state.start();

    while !state.is_complete() {
        let len = (chunk_size as u64).min(state.remaining()) as usize;

        let n = channel
            .read_payload(&mut buf[..len], io_timeout)
            .await
            .map_err(|e| state.fault(e))?;
        if n == 0 {
            return Err(state.closed());
        }
        state.record(n);

        while let (Some(interval), Some(checkpoint)) = (ack_interval, next_checkpoint) {
            if state.bytes_transferred < checkpoint {
                break;
            }
            channel
                .write_token(&Token::Ack, io_timeout)
                .await
                .map_err(|e| state.fault(e))?;
            next_checkpoint = Some(checkpoint + interval);
        }
    }

    Ok(())
}

async fn wait_for_ack<S>(channel: &mut Channel<S>, timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match channel.expect(Token::Ack, timeout).await {
        Err(Error::TransferStalled { timeout, .. }) => Err(Error::stalled("ack", timeout)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    const T: Duration = Duration::from_secs(5);

    async fn run_pair(
        total: u64,
        chunk_size: usize,
        ack_interval: Option<u64>,
    ) -> (Result<TransferState>, Result<TransferState>) {
        let (a, b) = duplex(64 * 1024);
        let mut sender = Channel::new(a);
        let mut receiver = Channel::new(b);
        let ack = ack_interval.map(|interval| AckPolicy {
            interval,
            timeout: T,
        });

        let send = async {
            let mut state = TransferState::new("send", total);
            let result = send_bulk(&mut sender, &mut state, chunk_size, ack, T).await;
            result.map(|_| state)
        };
        let recv = async {
            let mut state = TransferState::new("recv", total);
            let result = recv_bulk(&mut receiver, &mut state, chunk_size, ack_interval, T).await;
            result.map(|_| state)
        };
        tokio::join!(send, recv)
    }

    #[tokio::test]
    async fn test_exact_byte_count() {
        for (total, chunk) in [(1u64, 1usize), (1000, 7), (65_537, 8192), (8192 * 4, 8192)] {
            let (sent, received) = run_pair(total, chunk, None).await;
            assert_eq!(sent.unwrap().bytes_transferred, total);
            assert_eq!(received.unwrap().bytes_transferred, total);
        }
    }

    #[tokio::test]
    async fn test_exact_byte_count_with_acks() {
        // Ends on a checkpoint and between checkpoints.
        for total in [4096u64, 4000, 1023] {
            let (sent, received) = run_pair(total, 300, Some(1024)).await;
            assert_eq!(sent.unwrap().bytes_transferred, total);
            assert_eq!(received.unwrap().bytes_transferred, total);
        }
    }

    #[tokio::test]
    async fn test_zero_bytes_completes_immediately() {
        let (sent, received) = run_pair(0, 8192, Some(1024)).await;
        assert_eq!(sent.unwrap().bytes_transferred, 0);
        let received = received.unwrap();
        assert_eq!(received.bytes_transferred, 0);
        assert!(received.finish().mbps().map_or(true, |mbps| mbps == 0.0));
    }

    #[tokio::test]
    async fn test_early_close_is_peer_closed() {
        let (a, b) = duplex(64 * 1024);
        let mut receiver = Channel::new(b);

        let send = async move {
            let mut sender = Channel::new(a);
            let mut state = TransferState::new("send", 4096);
            send_bulk(&mut sender, &mut state, 512, None, T).await.unwrap();
            // sender dropped here, closing its half
        };
        let recv = async {
            let mut state = TransferState::new("download", 8192);
            let result = recv_bulk(&mut receiver, &mut state, 512, None, T).await;
            (result, state)
        };

        let (_, (result, state)) = tokio::join!(send, recv);
        match result {
            Err(Error::PeerClosed {
                stage,
                transferred,
                expected,
            }) => {
                assert_eq!(stage, "download");
                assert_eq!(transferred, 4096);
                assert_eq!(expected, 8192);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!state.is_complete());
    }

    #[tokio::test]
    async fn test_missing_ack_is_stalled() {
        let (a, b) = duplex(64 * 1024);
        let mut sender = Channel::new(a);
        let mut receiver = Channel::new(b);
        let ack = AckPolicy {
            interval: 1024,
            timeout: Duration::from_millis(50),
        };

        let send = async {
            let mut state = TransferState::new("upload", 4096);
            send_bulk(&mut sender, &mut state, 512, Some(ack), T).await
        };
        // Receiver that never acks.
        let recv = async {
            let mut state = TransferState::new("recv", 4096);
            recv_bulk(&mut receiver, &mut state, 512, None, Duration::from_millis(200)).await
        };

        let (sent, _) = tokio::join!(send, recv);
        match sent {
            Err(Error::TransferStalled { waiting_for, .. }) => assert_eq!(waiting_for, "ack"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sender_holds_at_checkpoint_until_ack() {
        use tokio::io::AsyncReadExt;

        let (a, mut peer) = duplex(64 * 1024);
        let mut sender = Channel::new(a);
        let ack = AckPolicy {
            interval: 1024,
            timeout: Duration::from_millis(100),
        };

        let mut state = TransferState::new("upload", 4096);
        let result = send_bulk(&mut sender, &mut state, 300, Some(ack), T).await;
        match result {
            Err(Error::TransferStalled { waiting_for, .. }) => assert_eq!(waiting_for, "ack"),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(state.bytes_transferred, 1024);
        drop(sender);

        // Nothing past the first checkpoint reached the wire.
        let mut observed = Vec::new();
        peer.read_to_end(&mut observed).await.unwrap();
        assert_eq!(observed.len(), 1024);
        assert!(observed.iter().all(|&b| b == FILLER));
    }

    #[tokio::test]
    async fn test_receiver_acks_once_per_interval() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (a, mut peer) = duplex(64 * 1024);
        let mut receiver = Channel::new(a);
        peer.write_all(&[FILLER; 3 * 1024]).await.unwrap();

        let mut state = TransferState::new("upload", 3 * 1024);
        recv_bulk(&mut receiver, &mut state, 300, Some(1024), T)
            .await
            .unwrap();
        assert_eq!(state.bytes_transferred, 3 * 1024);
        drop(receiver);

        let mut acks = Vec::new();
        peer.read_to_end(&mut acks).await.unwrap();
        assert_eq!(acks, b"ack\r\nack\r\nack\r\n");
    }
}
