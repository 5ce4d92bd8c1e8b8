//! Initiator: connects and drives the scripted operation sequence.

use chrono::Local;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::latency::{self, ProbeSettings};
use crate::protocol::{Channel, Token, ACK_INTERVAL};
use crate::stats::{LatencyOutcome, Report, Throughput};
use crate::transfer::{self, AckPolicy, TransferState};

/// An open connection to a responder.
pub struct Initiator {
    channel: Channel<TcpStream>,
    config: Config,
    peer: SocketAddr,
}

impl Initiator {
    /// Connect to `host` on the configured port.
    pub async fn connect(config: &Config, host: &str) -> Result<Self> {
        let stream = time::timeout(config.io_timeout, TcpStream::connect((host, config.port)))
            .await
            .map_err(|_| Error::stalled("connect", config.io_timeout))??;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        info!(peer = %peer, "Connected");

        Ok(Self {
            channel: Channel::new(stream),
            config: config.clone(),
            peer,
        })
    }

    /// Measure round-trip latency over this connection.
    pub async fn latency(&mut self) -> Result<LatencyOutcome> {
        let settings = ProbeSettings {
            samples: self.config.latency_samples,
            interval: self.config.latency_interval,
            echo_timeout: self.config.echo_timeout,
            io_timeout: self.config.io_timeout,
        };
        let outcome = latency::probe(&mut self.channel, &settings).await?;
        info!(peer = %self.peer, latency = %outcome, "Latency measured");
        Ok(outcome)
    }

    /// Receive the responder's announced byte count.
    pub async fn download(&mut self) -> Result<Throughput> {
        let io_timeout = self.config.io_timeout;

        self.channel.write_token(&Token::Download, io_timeout).await?;
        let total = match self.channel.read_token(io_timeout).await? {
            Token::Size(n) if n <= self.config.max_transfer_bytes => n,
            Token::Size(n) => {
                return Err(Error::violation(
                    format!("size <= {}", self.config.max_transfer_bytes),
                    n.to_string(),
                ))
            }
            other => return Err(Error::violation("size", other.to_string())),
        };
        debug!(total, "Download announced");
        self.channel.write_token(&Token::Ready, io_timeout).await?;

        let mut state = TransferState::new("download", total);
        transfer::recv_bulk(
            &mut self.channel,
            &mut state,
            self.config.chunk_size,
            None,
            io_timeout,
        )
        .await?;
        self.channel
            .write_token(&Token::Done, io_timeout)
            .await
            .map_err(|e| e.at("download", state.bytes_transferred, total))?;

        let throughput = state.finish();
        info!(peer = %self.peer, result = %throughput, "Download complete");
        Ok(throughput)
    }

    /// Send `total` bytes, pausing at every ack checkpoint.
    pub async fn upload(&mut self, total: u64) -> Result<Throughput> {
        let io_timeout = self.config.io_timeout;
        let ack = AckPolicy {
            interval: ACK_INTERVAL,
            timeout: self.config.ack_timeout,
        };

        self.channel.write_token(&Token::Upload, io_timeout).await?;
        self.channel.write_token(&Token::Size(total), io_timeout).await?;
        self.channel.expect(Token::Ready, io_timeout).await?;

        let mut state = TransferState::new("upload", total);
        transfer::send_bulk(
            &mut self.channel,
            &mut state,
            self.config.chunk_size,
            Some(ack),
            io_timeout,
        )
        .await?;

        match self.channel.expect(Token::Done, self.config.ack_timeout).await {
            Ok(()) => {}
            Err(Error::TransferStalled { timeout, .. }) => {
                return Err(Error::stalled("done", timeout));
            }
            Err(e) => return Err(e.at("upload", state.bytes_transferred, total)),
        }

        let throughput = state.finish();
        info!(peer = %self.peer, result = %throughput, "Upload complete");
        Ok(throughput)
    }

    /// Send `quit` and close the connection.
    pub async fn quit(self) -> Result<()> {
        let mut channel = self.channel;
        channel
            .write_token(&Token::Quit, self.config.io_timeout)
            .await?;

        let mut stream = channel.into_inner();
        stream.shutdown().await?;
        debug!(peer = %self.peer, "Connection closed");
        Ok(())
    }
}

/// Run the full sequence against `host`: connect, latency (if enabled),
/// download, upload, quit.
///
/// The first failure aborts the rest; the connection is closed on every
/// exit path.
pub async fn run(config: &Config, host: &str) -> Result<Report> {
    let started = Local::now();
    let mut initiator = Initiator::connect(config, host).await?;

    let latency = if config.latency_enabled {
        Some(initiator.latency().await?)
    } else {
        None
    };
    let download = initiator.download().await?;
    let upload = initiator.upload(config.total_bytes).await?;
    initiator.quit().await?;

    Ok(Report {
        target: host.to_string(),
        started,
        latency,
        download,
        upload,
    })
}
