//! Session controllers for both ends of a probe connection.
//!
//! - `responder`: listens, runs one task per accepted connection, and
//!   aborts all live sessions on shutdown.
//! - `initiator`: connects and runs one operation at a time in a fixed order.

pub mod initiator;
pub mod registry;
pub mod responder;

pub use initiator::{run as run_initiator, Initiator};
pub use registry::SessionRegistry;
pub use responder::{Responder, ShutdownHandle};
