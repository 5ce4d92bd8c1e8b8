//! Responder: accepts connections and serves operations.
//!
//! Each accepted connection runs in its own task, looping over operation
//! tokens until `quit`, a hangup, or a fault. Faults end that session only.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::registry::{Rejected, SessionRegistry};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::latency;
use crate::protocol::{Channel, Token, ACK_INTERVAL};
use crate::transfer::{self, TransferState};

/// Listening responder.
pub struct Responder {
    config: Arc<Config>,
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    stop: Arc<watch::Sender<bool>>,
}

/// Stops a running [`Responder`] from any task.
#[derive(Clone)]
pub struct ShutdownHandle {
    stop: Arc<watch::Sender<bool>>,
    registry: Arc<SessionRegistry>,
}

impl ShutdownHandle {
    /// Stop accepting, abort every live session, then let `run` release the
    /// listener.
    pub fn shutdown(&self) {
        self.stop.send_replace(true);
        let aborted = self.registry.abort_all();
        info!(sessions = aborted, "Responder stopping");
    }
}

impl Responder {
    /// Bind the listening socket.
    pub fn bind(config: Config) -> Result<Self> {
        let addr: SocketAddr = config
            .listen
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let listener = TcpListener::from_std(create_listener(addr)?)?;
        let local_addr = listener.local_addr()?;
        let registry = Arc::new(SessionRegistry::new(config.max_sessions));
        let (stop, _) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            listener,
            local_addr,
            registry,
            stop: Arc::new(stop),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            stop: Arc::clone(&self.stop),
            registry: Arc::clone(&self.registry),
        }
    }

    /// Accept connections until shutdown.
    pub async fn run(self) -> Result<()> {
        let mut stop = self.stop.subscribe();
        info!(address = %self.local_addr, "Responder listening");

        loop {
            let accepted = tokio::select! {
                _ = stop.wait_for(|stopped| *stopped) => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => self.spawn_session(stream, peer),
                Err(e) => error!(error = %e, "Failed to accept connection"),
            }
        }

        drop(self.listener);
        info!(address = %self.local_addr, "Responder stopped");
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        let id = match self.registry.register(peer, &stream) {
            Ok(id) => id,
            Err(Rejected::Full) => {
                let max = self.registry.capacity();
                warn!(peer = %peer, max, "Session limit reached, refusing connection");
                return;
            }
            Err(Rejected::Closed) => {
                debug!(peer = %peer, "Refusing connection during shutdown");
                return;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Failed to register session");
                return;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }
        info!(peer = %peer, "Connection accepted");

        let config = Arc::clone(&self.config);
        let registry = Arc::clone(&self.registry);
        let stop = self.stop.subscribe();

        tokio::spawn(async move {
            let mut session = Session {
                channel: Channel::new(stream),
                config,
                peer,
            };
            let result = session.serve().await;
            let lifetime = registry.remove(id).map(|entry| entry.opened.elapsed());

            match result {
                Ok(()) => info!(peer = %peer, ?lifetime, "Connection closed"),
                Err(e) if *stop.borrow() => {
                    debug!(peer = %peer, error = %e, "Session ended by shutdown")
                }
                Err(e) => warn!(peer = %peer, error = %e, "Session failed"),
            }
        });
    }
}

/// One accepted connection.
struct Session {
    channel: Channel<TcpStream>,
    config: Arc<Config>,
    peer: SocketAddr,
}

impl Session {
    async fn serve(&mut self) -> Result<()> {
        loop {
            let token = match self.channel.read_token(self.config.idle_timeout).await {
                Ok(token) => token,
                // Hangup between operations is a normal close.
                Err(e) if e.is_peer_closed() && self.channel.buffered() == 0 => return Ok(()),
                Err(e) => return Err(e),
            };

            match token {
                Token::Download => self.serve_download().await?,
                Token::Upload => self.serve_upload().await?,
                Token::Ping => {
                    let echoed = latency::echo(&mut self.channel, self.config.io_timeout).await?;
                    debug!(peer = %self.peer, probes = echoed, "Latency probe served");
                }
                Token::Quit => {
                    debug!(peer = %self.peer, "Quit received");
                    return Ok(());
                }
                other => {
                    return Err(Error::violation(
                        "download, upload, ping or quit",
                        other.to_string(),
                    ))
                }
            }
        }
    }

    async fn serve_download(&mut self) -> Result<()> {
        let io_timeout = self.config.io_timeout;
        let total = self.config.total_bytes;

        self.channel.write_token(&Token::Size(total), io_timeout).await?;
        self.channel.expect(Token::Ready, io_timeout).await?;

        let mut state = TransferState::new("download", total);
        transfer::send_bulk(
            &mut self.channel,
            &mut state,
            self.config.chunk_size,
            None,
            io_timeout,
        )
        .await?;
        self.channel
            .expect(Token::Done, self.config.ack_timeout)
            .await
            .map_err(|e| e.at("download", state.bytes_transferred, total))?;

        let throughput = state.finish();
        info!(
            peer = %self.peer,
            bytes = throughput.bytes,
            mbps = throughput.mbps().unwrap_or(0.0),
            "Download served"
        );
        Ok(())
    }

    async fn serve_upload(&mut self) -> Result<()> {
        let io_timeout = self.config.io_timeout;

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
        self.channel.write_token(&Token::Ready, io_timeout).await?;

        let mut state = TransferState::new("upload", total);
        transfer::recv_bulk(
            &mut self.channel,
            &mut state,
            self.config.chunk_size,
            Some(ACK_INTERVAL),
            io_timeout,
        )
        .await?;
        self.channel.write_token(&Token::Done, io_timeout).await?;

        let throughput = state.finish();
        info!(
            peer = %self.peer,
            bytes = throughput.bytes,
            mbps = throughput.mbps().unwrap_or(0.0),
            "Upload received"
        );
        Ok(())
    }
}

/// Create a TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
