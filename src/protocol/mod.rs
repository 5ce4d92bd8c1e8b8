//! Probe wire protocol.
//!
//! Control messages are short ASCII lines terminated by `\r\n`; bulk payload
//! is raw filler with no framing. The exchange per operation:
//!
//! ```text
//! download:  I: download   R: <size>   I: ready   R: <size bytes>   I: done
//! upload:    I: upload     I: <size>   R: ready   I: <size bytes>   R: done
//!            (R sends `ack` each time it has received another ack interval)
//! ping:      I: ping   { I: <stamp>   R: <stamp> } x N   I: ping_done
//! quit:      I: quit   (no reply, connection closes)
//! ```
//!
//! Any line that is not the token expected at that point is a protocol
//! violation and ends the connection.

pub mod channel;
pub mod token;

pub use channel::Channel;
pub use token::Token;

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 5000;

/// Upload receivers ack every time this many more bytes have arrived.
/// Both ends must agree on it, so it is fixed by the protocol.
pub const ACK_INTERVAL: u64 = 1024 * 1024;
