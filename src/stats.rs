//! Throughput and latency reduction, and the human-readable run report.

use chrono::{DateTime, Local};
use std::fmt;
use std::time::Duration;

/// Bytes moved over a measured interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl Throughput {
    pub fn new(bytes: u64, elapsed: Duration) -> Self {
        Self { bytes, elapsed }
    }

    /// Megabits per second, `None` when no time elapsed.
    pub fn mbps(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return None;
        }
        Some((self.bytes as f64 * 8.0) / (1_000_000.0 * secs))
    }

    /// Bits per second, `None` when no time elapsed.
    pub fn bits_per_sec(&self) -> Option<u64> {
        self.mbps().map(|mbps| (mbps * 1_000_000.0) as u64)
    }
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bits_per_sec() {
            Some(bps) => write!(
                f,
                "{} in {:.3}s ({})",
                format_bytes(self.bytes),
                self.elapsed.as_secs_f64(),
                format_bandwidth(bps)
            ),
            None => write!(f, "{} (rate undefined)", format_bytes(self.bytes)),
        }
    }
}

/// Min/avg/max round-trip time over the samples that returned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub min: Duration,
    pub avg: Duration,
    pub max: Duration,
    /// Probes sent, including lost ones.
    pub sent: usize,
    pub lost: usize,
}

impl LatencySummary {
    /// Reduce a sample set. Returns `None` when every probe was lost.
    pub fn from_samples(samples: &[Duration], lost: usize) -> Option<Self> {
        let min = samples.iter().min().copied()?;
        let max = samples.iter().max().copied()?;
        let total: Duration = samples.iter().sum();
        let avg = total / samples.len() as u32;

        Some(Self {
            min,
            avg,
            max,
            sent: samples.len() + lost,
            lost,
        })
    }

    pub fn loss_percent(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        self.lost as f64 * 100.0 / self.sent as f64
    }
}

impl fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min {} / avg {} / max {} ({:.0}% loss)",
            format_rtt(self.min),
            format_rtt(self.avg),
            format_rtt(self.max),
            self.loss_percent()
        )
    }
}

/// Summary of one initiator run.
#[derive(Debug, Clone)]
pub struct Report {
    pub target: String,
    pub started: DateTime<Local>,
    /// `None` when the latency probe was skipped.
    pub latency: Option<LatencyOutcome>,
    pub download: Throughput,
    pub upload: Throughput,
}

/// Outcome of a latency probe: a summary, or unavailable when all samples
/// were lost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LatencyOutcome {
    Measured(LatencySummary),
    Unavailable { sent: usize },
}

impl LatencyOutcome {
    pub fn from_samples(samples: &[Duration], lost: usize) -> Self {
        match LatencySummary::from_samples(samples, lost) {
            Some(summary) => LatencyOutcome::Measured(summary),
            None => LatencyOutcome::Unavailable { sent: lost },
        }
    }
}

impl fmt::Display for LatencyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LatencyOutcome::Measured(summary) => write!(f, "{summary}"),
            LatencyOutcome::Unavailable { sent } => {
                write!(f, "unavailable ({sent} probes lost)")
            }
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Speed test against {} at {}",
            self.target,
            self.started.format("%Y-%m-%d %H:%M:%S")
        )?;
        if let Some(latency) = &self.latency {
            writeln!(f, "  Latency:  {latency}")?;
        }
        writeln!(f, "  Download: {}", self.download)?;
        write!(f, "  Upload:   {}", self.upload)
    }
}

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GiB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MiB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KiB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format bandwidth in human-readable form
pub fn format_bandwidth(bps: u64) -> String {
    const KBPS: u64 = 1000;
    const MBPS: u64 = KBPS * 1000;
    const GBPS: u64 = MBPS * 1000;

    if bps >= GBPS {
        format!("{:.2} Gbps", bps as f64 / GBPS as f64)
    } else if bps >= MBPS {
        format!("{:.2} Mbps", bps as f64 / MBPS as f64)
    } else if bps >= KBPS {
        format!("{:.2} Kbps", bps as f64 / KBPS as f64)
    } else {
        format!("{} bps", bps)
    }
}

/// Format a round-trip time in milliseconds.
pub fn format_rtt(rtt: Duration) -> String {
    format!("{:.2} ms", rtt.as_secs_f64() * 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mbps() {
        let t = Throughput::new(8_388_608, Duration::from_secs(1));
        let mbps = t.mbps().unwrap();
        assert!((mbps - 67.108864).abs() < 1e-9);
    }

    #[test]
    fn test_mbps_undefined_without_elapsed_time() {
        assert_eq!(Throughput::new(1024, Duration::ZERO).mbps(), None);
        assert_eq!(Throughput::new(0, Duration::ZERO).bits_per_sec(), None);
    }

    #[test]
    fn test_zero_bytes_is_zero_rate() {
        let t = Throughput::new(0, Duration::from_millis(3));
        assert_eq!(t.mbps(), Some(0.0));
    }

    #[test]
    fn test_latency_ordering() {
        let samples = [
            Duration::from_millis(12),
            Duration::from_millis(3),
            Duration::from_millis(40),
            Duration::from_millis(7),
        ];
        let s = LatencySummary::from_samples(&samples, 1).unwrap();
        assert_eq!(s.min, Duration::from_millis(3));
        assert_eq!(s.max, Duration::from_millis(40));
        assert!(s.min <= s.avg && s.avg <= s.max);
        assert_eq!(s.avg, Duration::from_millis(62) / 4);
        assert_eq!(s.sent, 5);
        assert!((s.loss_percent() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_identical_samples_average() {
        let samples = [Duration::from_millis(25); 10];
        let s = LatencySummary::from_samples(&samples, 0).unwrap();
        assert_eq!(s.avg, Duration::from_millis(25));
        assert_eq!(s.min, s.max);
    }

    #[test]
    fn test_all_lost_is_unavailable() {
        assert!(LatencySummary::from_samples(&[], 10).is_none());
        assert_eq!(
            LatencyOutcome::from_samples(&[], 10),
            LatencyOutcome::Unavailable { sent: 10 }
        );
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(2048), "2.00 KiB");
        assert_eq!(format_bytes(8 * 1024 * 1024), "8.00 MiB");
    }

    #[test]
    fn test_format_bandwidth() {
        assert_eq!(format_bandwidth(500), "500 bps");
        assert_eq!(format_bandwidth(10_000), "10.00 Kbps");
        assert_eq!(format_bandwidth(67_108_864), "67.11 Mbps");
    }

    #[test]
    fn test_format_rtt() {
        assert_eq!(format_rtt(Duration::from_micros(1500)), "1.50 ms");
    }
}
