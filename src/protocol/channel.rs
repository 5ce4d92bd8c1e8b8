//! Buffered token channel over a byte stream.
//!
//! Tokens and raw payload share one stream. Bytes read past the end of a
//! token line stay in the read buffer and are handed out first by
//! [`Channel::read_payload`], so a payload that arrives in the same segment
//! as its handshake is never lost or counted twice.

use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time;
use tracing::trace;

use super::token::{self, ParseResult, Token, MAX_LINE_LENGTH};
use crate::error::{Error, Result};

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// A connection end that speaks handshake tokens and raw payload.
#[derive(Debug)]
pub struct Channel<S> {
    stream: S,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(BUFFER_SIZE),
            write_buf: BytesMut::with_capacity(MAX_LINE_LENGTH + 2),
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }

    /// Read the next token, waiting at most `timeout` for it to complete.
    pub async fn read_token(&mut self, timeout: Duration) -> Result<Token> {
        let deadline = time::Instant::now() + timeout;

        loop {
            match token::parse(&self.read_buf) {
                ParseResult::Complete(token, consumed) => {
                    self.read_buf.advance(consumed);
                    trace!(token = %token, "Received token");
                    return Ok(token);
                }
                ParseResult::Error(line) => {
                    return Err(Error::violation(
                        "token",
                        String::from_utf8_lossy(&line).into_owned(),
                    ));
                }
                ParseResult::Incomplete => {}
            }

            let n = time::timeout_at(deadline, self.stream.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| Error::stalled("token", timeout))??;
            if n == 0 {
                return Err(Error::closed("handshake", 0, 0));
            }
        }
    }

    /// Read the next token and require it to be `expected`.
    pub async fn expect(&mut self, expected: Token, timeout: Duration) -> Result<()> {
        let got = self.read_token(timeout).await?;
        if got == expected {
            Ok(())
        } else {
            Err(Error::violation(expected.name(), got.to_string()))
        }
    }

    /// Write one token and flush it.
    pub async fn write_token(&mut self, token: &Token, timeout: Duration) -> Result<()> {
        self.write_buf.clear();
        token.encode(&mut self.write_buf);

        let stream = &mut self.stream;
        let frame = &self.write_buf[..];
        time::timeout(timeout, async move {
            stream.write_all(frame).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| Error::stalled("token write", timeout))??;

        trace!(token = %token, "Sent token");
        Ok(())
    }

    /// Read raw payload into `buf`, draining already-buffered bytes first.
    ///
    /// Returns 0 only when the peer has closed its side.
    pub async fn read_payload(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.read_buf.is_empty() {
            let n = buf.len().min(self.read_buf.len());
            buf[..n].copy_from_slice(&self.read_buf[..n]);
            self.read_buf.advance(n);
            return Ok(n);
        }

        let n = time::timeout(timeout, self.stream.read(buf))
            .await
            .map_err(|_| Error::stalled("payload", timeout))??;
        Ok(n)
    }

    /// Write as much of `buf` as the stream accepts in one call.
    pub async fn write_payload(&mut self, buf: &[u8], timeout: Duration) -> Result<usize> {
        let n = time::timeout(timeout, self.stream.write(buf))
            .await
            .map_err(|_| Error::stalled("payload write", timeout))??;
        Ok(n)
    }

    pub async fn flush(&mut self, timeout: Duration) -> Result<()> {
        time::timeout(timeout, self.stream.flush())
            .await
            .map_err(|_| Error::stalled("flush", timeout))??;
        Ok(())
    }
}
