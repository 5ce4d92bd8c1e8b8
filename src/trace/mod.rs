//! Traceroute wrapper.
//!
//! A standalone diagnostic, unrelated to the probe protocol: runs the
//! platform's `traceroute`/`tracert`, parses each hop line, and renders a
//! per-hop min/avg/max latency and loss table.

pub mod parser;
pub mod report;
pub mod runner;

pub use parser::{parse_line, parse_output, Hop};
pub use report::render_table;
pub use runner::{run, TraceError, TraceRequest};
