//! Registry of live responder sessions.
//!
//! The accept loop adds an entry per connection, each session task removes
//! its own entry on exit, and shutdown aborts and removes them all. Every
//! mutation happens under one lock.

use parking_lot::Mutex;
use slab::Slab;
use socket2::{SockRef, Socket};
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

/// A registered session.
#[derive(Debug)]
pub struct SessionEntry {
    pub peer: SocketAddr,
    pub opened: Instant,
    /// Duplicate handle on the session's socket, used only to abort it.
    socket: Socket,
}

impl SessionEntry {
    /// Abortive close: drop lingering data so blocked reads and writes on
    /// the session's own handle fail immediately.
    fn abort(&self) -> io::Result<()> {
        self.socket.set_linger(Some(Duration::ZERO))?;
        self.socket.shutdown(Shutdown::Both)
    }
}

/// Why a session could not be registered.
#[derive(Debug, Error)]
pub enum Rejected {
    #[error("session limit reached")]
    Full,
    #[error("registry closed by shutdown")]
    Closed,
    #[error("failed to duplicate socket: {0}")]
    Io(#[from] io::Error),
}

struct Inner {
    sessions: Slab<SessionEntry>,
    closed: bool,
}

/// Set of live sessions, shared between the accept loop, session tasks and
/// the shutdown path.
pub struct SessionRegistry {
    inner: Mutex<Inner>,
    max_sessions: usize,
}

impl SessionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sessions: Slab::with_capacity(max_sessions.min(1024)),
                closed: false,
            }),
            max_sessions,
        }
    }

    /// Register the session running on `stream`.
    pub fn register(&self, peer: SocketAddr, stream: &TcpStream) -> Result<usize, Rejected> {
        let socket = SockRef::from(stream).try_clone()?;

        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Rejected::Closed);
        }
        if inner.sessions.len() >= self.max_sessions {
            return Err(Rejected::Full);
        }
        Ok(inner.sessions.insert(SessionEntry {
            peer,
            opened: Instant::now(),
            socket,
        }))
    }

    /// Remove a session. Returns `None` if shutdown already removed it.
    pub fn remove(&self, id: usize) -> Option<SessionEntry> {
        self.inner.lock().sessions.try_remove(id)
    }

    /// Abort every live session and refuse new ones.
    ///
    /// Returns the number of sessions aborted.
    pub fn abort_all(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.closed = true;

        let count = inner.sessions.len();
        for entry in inner.sessions.drain() {
            if let Err(e) = entry.abort() {
                debug!(peer = %entry.peer, error = %e, "Abort failed, peer likely gone");
            }
        }
        count
    }

    pub fn contains(&self, id: usize) -> bool {
        self.inner.lock().sessions.contains(id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Peers of all live sessions.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.inner
            .lock()
            .sessions
            .iter()
            .map(|(_, entry)| entry.peer)
            .collect()
    }

    pub fn capacity(&self) -> usize {
        self.max_sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_register_and_remove() {
        let registry = SessionRegistry::new(2);
        let (_c1, s1) = pair().await;
        let (_c2, s2) = pair().await;
        let (_c3, s3) = pair().await;

        let id1 = registry.register(s1.peer_addr().unwrap(), &s1).unwrap();
        let id2 = registry.register(s2.peer_addr().unwrap(), &s2).unwrap();

        // At capacity
        assert!(matches!(
            registry.register(s3.peer_addr().unwrap(), &s3),
            Err(Rejected::Full)
        ));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.peers().len(), 2);

        let entry = registry.remove(id1).unwrap();
        assert_eq!(entry.peer, s1.peer_addr().unwrap());
        assert!(entry.opened.elapsed() < Duration::from_secs(5));
        assert!(!registry.contains(id1));
        assert!(registry.remove(id1).is_none());
        assert!(registry.contains(id2));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_abort_all_unblocks_reader() {
        let registry = SessionRegistry::new(4);
        let (_client, mut server) = pair().await;
        let id = registry
            .register(server.peer_addr().unwrap(), &server)
            .unwrap();

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            server.read(&mut buf).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.abort_all(), 1);

        let result = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .expect("reader stayed blocked")
            .unwrap();
        assert!(matches!(result, Ok(0) | Err(_)));

        assert!(registry.is_empty());
        assert!(registry.remove(id).is_none());
    }

    #[tokio::test]
    async fn test_closed_registry_rejects() {
        let registry = SessionRegistry::new(4);
        registry.abort_all();
        assert!(registry.is_closed());

        let (_client, server) = pair().await;
        assert!(matches!(
            registry.register(server.peer_addr().unwrap(), &server),
            Err(Rejected::Closed)
        ));
    }
}
