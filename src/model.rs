//! Core data model shared by the decoder, live store, persistence, and the
//! HTTP/WS surface.

use serde::{Deserialize, Serialize};

/// The fundamental record produced by the decoder (C1) and consumed by
/// every downstream component. Immutable once committed to the live store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    /// Assigned at store-ingest time; strictly increasing, unique per process lifetime.
    pub id: u64,
    /// Wall-clock capture timestamp, RFC3339.
    pub timestamp: String,
    pub src_ip: String,
    pub dst_ip: String,
    /// 0 means absent.
    pub src_port: u16,
    /// 0 means absent.
    pub dst_port: u16,
    pub protocol: String,
    pub length: u32,
    pub info: String,
    pub src_mac: String,
    pub dst_mac: String,
    pub application: String,
    pub src_hostname: String,
    pub dst_hostname: String,
    pub src_country: String,
    pub dst_country: String,
    pub process_name: String,
}

/// Running totals maintained by the live store (C4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub total_packets: u64,
    pub total_bytes: u64,
    pub protocol_stats: std::collections::HashMap<String, u64>,
    pub application_stats: std::collections::HashMap<String, u64>,
    pub country_stats: std::collections::HashMap<String, u64>,
    pub start_timestamp: String,
    pub packets_per_sec: f64,
    pub bytes_per_sec: f64,
    pub talkers: Vec<Talker>,
}

/// A per-source-IP traffic summary, derived on demand from the live store's
/// internal `ip -> (packets, bytes)` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Talker {
    pub ip: String,
    pub packets: u64,
    pub bytes: u64,
    pub hostname: String,
    pub country: String,
}

/// Keyed by the 5-tuple (src-ip, src-port, dst-ip, dst-port, protocol).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
    pub protocol: String,
    pub packets: u64,
    pub bytes: u64,
    pub first_seen: String,
    pub last_seen: String,
    pub state: String,
}

/// (hostname, country), each optional; one entry per IP, created empty on
/// first sighting and filled asynchronously by C2.
#[derive(Debug, Clone, Default)]
pub struct IpInfo {
    pub hostname: String,
    pub country: String,
}

/// A summary row used by `/api/history/stats` and `/api/stats` top-IP lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpByteSummary {
    pub ip: String,
    pub bytes: u64,
    pub hostname: String,
    pub country: String,
}

/// A summary row for top protocols by packet count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolCountSummary {
    pub protocol: String,
    pub count: u64,
}

/// `/api/database` response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged, rename_all = "camelCase")]
pub enum DatabaseInfo {
    Disabled {
        enabled: bool,
    },
    Enabled {
        enabled: bool,
        path: String,
        total_packets: u64,
        earliest_packet: Option<String>,
        latest_packet: Option<String>,
        database_size: u64,
    },
}

/// `/api/interfaces` response row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceInfo {
    pub name: String,
    pub description: String,
    pub addresses: Vec<String>,
    pub active: bool,
}
