//! Centralized runtime constants and CLI flags for Pi-Track.
//!
//! All tunable intervals, thresholds, and counts are collected here so they can
//! be found and adjusted in a single place rather than scattered across modules.

use clap::Parser;

/// Number of packets buffered before the persistence batch-writer flushes. (C5)
pub const BATCH_FLUSH_THRESHOLD: usize = 100;

/// Interval at which the persistence batch-writer flushes even if the threshold isn't met (seconds).
pub const BATCH_FLUSH_TICKER_SECS: u64 = 5;

/// SQLite busy timeout: how long a writer/reader waits on a locked database (seconds).
pub const DB_BUSY_TIMEOUT_SECS: u64 = 5;

/// Interval at which the stats-ticker reads a C4 snapshot and broadcasts it (seconds).
pub const STATS_TICKER_INTERVAL_SECS: u64 = 1;

/// Interval at which the process tracker rebuilds the port→PID map (milliseconds).
pub const PROCESS_TRACKER_REFRESH_MS: u64 = 2000;

/// Width of the live-store sliding rate window (seconds).
pub const RATE_WINDOW_SECS: u64 = 5;

/// Capacity of each client's outbound broadcast queue (messages).
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

/// Per-request timeout for the GeoIP HTTP lookup (seconds).
pub const GEOIP_TIMEOUT_SECS: u64 = 2;

/// Maximum `limit` accepted by `GET /api/history`.
pub const MAX_HISTORY_LIMIT: i64 = 1000;

/// Default `limit` for `GET /api/history` when unspecified.
pub const DEFAULT_HISTORY_LIMIT: i64 = 100;

/// Number of live packets returned by `GET /api/packets`.
pub const LIVE_PACKETS_PAGE_SIZE: usize = 500;

/// Number of entries returned by `recentPackets` at WS-connect time (the `init` message).
pub const INIT_PACKETS_COUNT: usize = 100;

/// Number of top talkers kept by `LiveStore::stats()`.
pub const TOP_TALKERS_COUNT: usize = 10;

/// Number of top connections kept by `LiveStore::connections()`.
pub const TOP_CONNECTIONS_COUNT: usize = 100;

/// Default TCP port the HTTP/WS surface listens on.
pub const DEFAULT_PORT: u16 = 25565;

/// Default maximum size of the live-store packet ring.
pub const DEFAULT_MAX_PACKETS: usize = 10000;

/// Default database path; an empty `--db` value disables persistence entirely.
pub const DEFAULT_DB_PATH: &str = "pitrack.db";

/// Command-line flags (§6 External Interfaces: all four are optional).
#[derive(Debug, Parser, Clone)]
#[command(name = "pitrack", about = "Passive network traffic monitor")]
pub struct Cli {
    /// TCP port the HTTP/WS surface binds to.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Capture interface name. Defaults to the first non-loopback device with an address.
    #[arg(long)]
    pub interface: Option<String>,

    /// Maximum number of recent packets retained in the live store.
    #[arg(long = "max-packets", default_value_t = DEFAULT_MAX_PACKETS)]
    pub max_packets: usize,

    /// SQLite database path. An empty string disables persistence.
    #[arg(long, default_value = DEFAULT_DB_PATH)]
    pub db: String,
}

/// Well-known (port, application-name) table, consulted by the decoder (C1)
/// when a packet's application field is still empty after protocol-specific
/// detection.
pub const WELL_KNOWN_PORTS: &[(u16, &str)] = &[
    (20, "FTP-Data"),
    (21, "FTP"),
    (22, "SSH"),
    (23, "Telnet"),
    (25, "SMTP"),
    (53, "DNS"),
    (67, "DHCP"),
    (68, "DHCP"),
    (80, "HTTP"),
    (110, "POP3"),
    (123, "NTP"),
    (143, "IMAP"),
    (443, "HTTPS"),
    (465, "SMTPS"),
    (587, "SMTP"),
    (993, "IMAPS"),
    (995, "POP3S"),
    (1194, "OpenVPN"),
    (1883, "MQTT"),
    (3306, "MySQL"),
    (3389, "RDP"),
    (5432, "PostgreSQL"),
    (5900, "VNC"),
    (6379, "Redis"),
    (8080, "HTTP-Proxy"),
    (8443, "HTTPS-Alt"),
    (8883, "MQTT-TLS"),
    (27017, "MongoDB"),
];

/// Look up the well-known application name for a port, if any.
pub fn well_known_app(port: u16) -> Option<&'static str> {
    WELL_KNOWN_PORTS
        .iter()
        .find(|(p, _)| *p == port)
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_intervals_and_caps_positive() {
        assert!(BATCH_FLUSH_THRESHOLD > 0);
        assert!(BATCH_FLUSH_TICKER_SECS > 0);
        assert!(DB_BUSY_TIMEOUT_SECS > 0);
        assert!(STATS_TICKER_INTERVAL_SECS > 0);
        assert!(PROCESS_TRACKER_REFRESH_MS > 0);
        assert!(RATE_WINDOW_SECS > 0);
        assert!(CLIENT_QUEUE_CAPACITY > 0);
        assert!(GEOIP_TIMEOUT_SECS > 0);
        assert!(MAX_HISTORY_LIMIT > 0);
        assert!(DEFAULT_HISTORY_LIMIT > 0);
        assert!(LIVE_PACKETS_PAGE_SIZE > 0);
    }

    #[test]
    fn test_default_history_limit_within_max() {
        assert!(DEFAULT_HISTORY_LIMIT <= MAX_HISTORY_LIMIT);
    }

    #[test]
    fn test_well_known_ports_cover_dns_and_https() {
        assert_eq!(well_known_app(53), Some("DNS"));
        assert_eq!(well_known_app(443), Some("HTTPS"));
        assert_eq!(well_known_app(1), None);
    }

    #[test]
    fn test_well_known_ports_table_has_27_entries() {
        assert_eq!(WELL_KNOWN_PORTS.len(), 27);
    }
}
