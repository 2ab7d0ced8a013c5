use crate::config::Mode;
use crate::reporter::ThroughputSample;
use crate::Result;
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;

/// Host the measurement was taken on.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub version: String,
    pub system_info: String,
    pub timestamp: i64,
    pub timestamp_str: String,
}

pub fn get_system_info() -> SystemInfo {
    let now = chrono::Utc::now();
    SystemInfo {
        version: format!("rudpperf {}", env!("CARGO_PKG_VERSION")),
        system_info: format!(
            "{} {} {}",
            std::env::consts::OS,
            std::env::consts::ARCH,
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string())
        ),
        timestamp_str: now.to_rfc2822(),
        timestamp: now.timestamp(),
    }
}

/// Final numbers of one session, as seen by one side.
///
/// Sender-only fields (`messages`, `gate_waits`) are `None` on the server and
/// receiver-only fields (`reads`, `verified_reads`) are `None` on the client.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub role: Mode,
    pub network: String,
    pub remote: SocketAddr,
    /// Ordering and reliability of the data channel, if any
    pub channel: Option<String>,
    pub bytes: u64,
    pub duration_secs: f64,
    pub bits_per_second: f64,
    pub messages: Option<u64>,
    pub gate_waits: Option<u64>,
    pub reads: Option<u64>,
    pub verified_reads: Option<u64>,
    pub samples: Vec<ThroughputSample>,
    pub system: SystemInfo,
}

impl SessionSummary {
    pub fn new(role: Mode, network: String, remote: SocketAddr, bytes: u64, duration: Duration) -> Self {
        let secs = duration.as_secs_f64();
        let bits_per_second = if secs > 0.0 {
            bytes as f64 * 8.0 / secs
        } else {
            0.0
        };

        Self {
            role,
            network,
            remote,
            channel: None,
            bytes,
            duration_secs: secs,
            bits_per_second,
            messages: None,
            gate_waits: None,
            reads: None,
            verified_reads: None,
            samples: Vec::new(),
            system: get_system_info(),
        }
    }
}

/// Scales a byte count to KBytes, MBytes or GBytes.
pub fn format_transfer(bytes: u64) -> (f64, &'static str) {
    if bytes >= 1_000_000_000 {
        (bytes as f64 / 1_000_000_000.0, "GBytes")
    } else if bytes >= 1_000_000 {
        (bytes as f64 / 1_000_000.0, "MBytes")
    } else {
        (bytes as f64 / 1_000.0, "KBytes")
    }
}

/// Scales a rate to Mbits/sec or Gbits/sec.
pub fn format_bitrate(bits_per_second: f64) -> (f64, &'static str) {
    if bits_per_second >= 1_000_000_000.0 {
        (bits_per_second / 1_000_000_000.0, "Gbits/sec")
    } else {
        (bits_per_second / 1_000_000.0, "Mbits/sec")
    }
}

/// Prints the summary to stdout, either as a table line or as JSON.
pub fn print_summary(summary: &SessionSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    let (transfer_val, transfer_unit) = format_transfer(summary.bytes);
    let (bitrate_val, bitrate_unit) = format_bitrate(summary.bits_per_second);
    let role = match summary.role {
        Mode::Client => "sender",
        Mode::Server => "receiver",
    };

    println!("- - - - - - - - - - - - - - - - - - - - - - - - -");
    println!("Interval           Transfer        Bitrate");
    println!(
        "{:4.2}-{:4.2}  sec  {:6.2} {:>7}  {:6.1} {:>10}  {} ({} {})",
        0.0,
        summary.duration_secs,
        transfer_val,
        transfer_unit,
        bitrate_val,
        bitrate_unit,
        role,
        summary.network,
        summary.remote
    );
    if let (Some(messages), Some(waits)) = (summary.messages, summary.gate_waits) {
        println!("messages: {}  flow-control waits: {}", messages, waits);
    }
    if let (Some(reads), Some(verified)) = (summary.reads, summary.verified_reads) {
        println!("reads: {}  verified: {}", reads, verified);
    }
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_transfer() {
        assert_eq!(format_transfer(500), (0.5, "KBytes"));
        assert_eq!(format_transfer(2_500_000), (2.5, "MBytes"));
        assert_eq!(format_transfer(3_000_000_000), (3.0, "GBytes"));
    }

    #[test]
    fn test_format_bitrate() {
        assert_eq!(format_bitrate(5_000_000.0), (5.0, "Mbits/sec"));
        assert_eq!(format_bitrate(2_000_000_000.0), (2.0, "Gbits/sec"));
    }

    #[test]
    fn test_summary_rate_and_json() {
        let remote: SocketAddr = "127.0.0.1:40916".parse().unwrap();
        let mut summary = SessionSummary::new(
            Mode::Server,
            "tcp4".to_string(),
            remote,
            1_000_000,
            Duration::from_secs(2),
        );
        summary.reads = Some(10);
        assert_eq!(summary.bits_per_second, 4_000_000.0);

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["role"], "Server");
        assert_eq!(value["bytes"], 1_000_000);
        assert_eq!(value["reads"], 10);
        assert!(value["messages"].is_null());
        assert!(value["system"]["version"].as_str().unwrap().starts_with("rudpperf"));
    }

    #[test]
    fn test_zero_duration_rate() {
        let summary = SessionSummary::new(
            Mode::Client,
            "udp4".to_string(),
            "127.0.0.1:1".parse().unwrap(),
            100,
            Duration::ZERO,
        );
        assert_eq!(summary.bits_per_second, 0.0);
    }
}
