//! Traceroute output parser.
//!
//! Handles both the Unix `traceroute -n` layout
//!
//! ```text
//!  1  192.168.1.1  0.512 ms  0.488 ms  0.470 ms
//!  2  * * *
//! ```
//!
//! and the Windows `tracert -d` layout
//!
//! ```text
//!   1    <1 ms    <1 ms    <1 ms  192.168.1.1
//!   2     *        *        *     Request timed out.
//! ```

use std::net::Ipv4Addr;

/// One hop of a traceroute.
#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    pub index: u32,
    /// First address that replied, `None` when every probe timed out.
    pub address: Option<Ipv4Addr>,
    /// Round-trip times in milliseconds.
    pub rtts: Vec<f64>,
    /// Probes that got no reply.
    pub lost: usize,
}

impl Hop {
    pub fn min(&self) -> Option<f64> {
        self.rtts.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.rtts.iter().copied().reduce(f64::max)
    }

    pub fn avg(&self) -> Option<f64> {
        if self.rtts.is_empty() {
            return None;
        }
        Some(self.rtts.iter().sum::<f64>() / self.rtts.len() as f64)
    }

    pub fn probes(&self) -> usize {
        self.rtts.len() + self.lost
    }

    pub fn loss_percent(&self) -> f64 {
        if self.probes() == 0 {
            return 0.0;
        }
        self.lost as f64 * 100.0 / self.probes() as f64
    }
}

/// Parse one line of traceroute output. Header and banner lines yield `None`.
pub fn parse_line(line: &str) -> Option<Hop> {
    let mut tokens = line.split_whitespace().peekable();
    let index = tokens.next()?.parse::<u32>().ok()?;

    let mut hop = Hop {
        index,
        address: None,
        rtts: Vec::new(),
        lost: 0,
    };

    while let Some(token) = tokens.next() {
        if token == "*" {
            hop.lost += 1;
        } else if let Some(value) = token.strip_suffix("ms").and_then(parse_rtt) {
            // "0.512ms"
            hop.rtts.push(value);
        } else if let Some(value) = parse_rtt(token) {
            if tokens.peek() == Some(&"ms") {
                tokens.next();
                hop.rtts.push(value);
            }
        } else if hop.address.is_none() {
            let trimmed = token.trim_start_matches('(').trim_end_matches(')');
            hop.address = trimmed.parse().ok();
        }
    }

    Some(hop)
}

/// Parse every hop line in a full traceroute output.
pub fn parse_output(output: &str) -> Vec<Hop> {
    output.lines().filter_map(parse_line).collect()
}

/// A latency value; Windows reports sub-millisecond replies as `<1`, which
/// is taken at its upper bound.
fn parse_rtt(token: &str) -> Option<f64> {
    let token = token.strip_prefix('<').unwrap_or(token);
    if token.is_empty() {
        return None;
    }
    let value: f64 = token.parse().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_line() {
        let hop = parse_line(" 1  192.168.1.1  0.512 ms  0.488 ms  0.470 ms").unwrap();
        assert_eq!(hop.index, 1);
        assert_eq!(hop.address, Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(hop.rtts, vec![0.512, 0.488, 0.470]);
        assert_eq!(hop.lost, 0);
        assert_eq!(hop.min(), Some(0.470));
        assert_eq!(hop.max(), Some(0.512));
    }

    #[test]
    fn test_unix_partial_loss() {
        let hop = parse_line(" 4  10.0.0.1  12.100 ms *  11.900 ms").unwrap();
        assert_eq!(hop.rtts.len(), 2);
        assert_eq!(hop.lost, 1);
        assert!((hop.avg().unwrap() - 12.0).abs() < 1e-9);
        assert!((hop.loss_percent() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_lost() {
        let hop = parse_line(" 2  * * *").unwrap();
        assert_eq!(hop.address, None);
        assert_eq!(hop.lost, 3);
        assert_eq!(hop.avg(), None);
        assert_eq!(hop.loss_percent(), 100.0);
    }

    #[test]
    fn test_windows_lines() {
        let hop = parse_line("  1    <1 ms    <1 ms     2 ms  192.168.1.1").unwrap();
        assert_eq!(hop.address, Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(hop.rtts, vec![1.0, 1.0, 2.0]);

        let hop = parse_line("  2     *        *        *     Request timed out.").unwrap();
        assert_eq!(hop.index, 2);
        assert_eq!(hop.address, None);
        assert_eq!(hop.lost, 3);
    }

    #[test]
    fn test_named_hop_with_parenthesised_address() {
        let hop = parse_line(" 3  router.lan (10.1.2.3)  1.2 ms").unwrap();
        assert_eq!(hop.address, Some(Ipv4Addr::new(10, 1, 2, 3)));
        assert_eq!(hop.rtts, vec![1.2]);
    }

    #[test]
    fn test_banner_lines_are_skipped() {
        let output = "traceroute to 8.8.8.8 (8.8.8.8), 30 hops max, 60 byte packets\n\
                      \x20 1  192.168.1.1  0.5 ms  0.4 ms  0.4 ms\n\
                      \n\
                      Tracing route to 8.8.8.8 over a maximum of 30 hops\n\
                      \x20 2  * * *\n";
        let hops = parse_output(output);
        assert_eq!(hops.len(), 2);
        assert_eq!(hops[0].index, 1);
        assert_eq!(hops[1].index, 2);
    }
}
