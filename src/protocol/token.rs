//! Handshake token parser.

use bytes::BytesMut;
use std::fmt;

/// Longest token line accepted, excluding the trailing `\r\n`.
pub const MAX_LINE_LENGTH: usize = 64;

/// A handshake token exchanged between bulk transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Initiator selects a download (responder sends).
    Download,
    /// Initiator selects an upload (initiator sends).
    Upload,
    /// Initiator selects a latency probe.
    Ping,
    /// Ends the latency probe's echo loop.
    PingDone,
    /// Close the connection, no reply expected.
    Quit,
    /// Receiver is ready for the payload.
    Ready,
    /// Operation complete.
    Done,
    /// Upload progress checkpoint.
    Ack,
    /// Declared total byte count of a transfer.
    Size(u64),
    /// Latency probe payload, echoed verbatim.
    Echo(Vec<u8>),
}

/// Parse result.
#[derive(Debug)]
pub enum ParseResult {
    /// Successfully parsed token with bytes consumed.
    Complete(Token, usize),
    /// Need more data.
    Incomplete,
    /// The buffered line is not a token.
    Error(Vec<u8>),
}

impl Token {
    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Token::Download => "download",
            Token::Upload => "upload",
            Token::Ping => "ping",
            Token::PingDone => "ping_done",
            Token::Quit => "quit",
            Token::Ready => "ready",
            Token::Done => "done",
            Token::Ack => "ack",
            Token::Size(_) => "size",
            Token::Echo(_) => "echo",
        }
    }

    /// Append the wire form of this token to `output`.
    pub fn encode(&self, output: &mut BytesMut) {
        match self {
            Token::Size(n) => output.extend_from_slice(n.to_string().as_bytes()),
            Token::Echo(payload) => output.extend_from_slice(payload),
            other => output.extend_from_slice(other.name().as_bytes()),
        }
        output.extend_from_slice(b"\r\n");
    }

    /// Parse one line, without its line ending.
    pub fn from_line(line: &[u8]) -> Option<Token> {
        let token = match line {
            b"download" => Token::Download,
            b"upload" => Token::Upload,
            b"ping" => Token::Ping,
            b"ping_done" => Token::PingDone,
            b"quit" => Token::Quit,
            b"ready" => Token::Ready,
            b"done" => Token::Done,
            b"ack" => Token::Ack,
            _ if !line.is_empty() && line.iter().all(u8::is_ascii_digit) => {
                let digits = std::str::from_utf8(line).ok()?;
                Token::Size(digits.parse().ok()?)
            }
            // Echo payloads start with a digit so they never collide with a keyword.
            [first, ..] if first.is_ascii_digit() && line.iter().all(u8::is_ascii_graphic) => {
                Token::Echo(line.to_vec())
            }
            _ => return None,
        };
        Some(token)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Size(n) => write!(f, "{n}"),
            Token::Echo(payload) => write!(f, "{}", String::from_utf8_lossy(payload)),
            other => f.write_str(other.name()),
        }
    }
}

/// Parse a token from the front of the input buffer.
pub fn parse(input: &[u8]) -> ParseResult {
    let line_end = match find_crlf(input) {
        Some(pos) => pos,
        None if input.len() > MAX_LINE_LENGTH + 1 => {
            return ParseResult::Error(input[..MAX_LINE_LENGTH].to_vec())
        }
        None => return ParseResult::Incomplete,
    };

    let line = &input[..line_end];
    if line.len() > MAX_LINE_LENGTH {
        return ParseResult::Error(line[..MAX_LINE_LENGTH].to_vec());
    }

    match Token::from_line(line) {
        Some(token) => ParseResult::Complete(token, line_end + 2),
        None => ParseResult::Error(line.to_vec()),
    }
}

/// Find \r\n in buffer, returning the position of \r.
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    (0..buffer.len().saturating_sub(1)).find(|&i| buffer[i] == b'\r' && buffer[i + 1] == b'\n')
}
