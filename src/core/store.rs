//! C4 — the live store: a bounded ring of recent packets, running
//! aggregates, the connection table, and the sliding rate window. Guarded
//! by exactly one RW mutex (R1): readers use a read lock, writers a write
//! lock.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::core::ip_cache::IpInfoCache;
use crate::model::{AggregateStats, Connection, Packet, Talker};

struct RateSample {
    at: Instant,
    length: u64,
}

struct Inner {
    next_id: u64,
    max_packets: usize,
    ring: VecDeque<Packet>,
    total_packets: u64,
    total_bytes: u64,
    protocol_stats: HashMap<String, u64>,
    application_stats: HashMap<String, u64>,
    country_stats: HashMap<String, u64>,
    ip_stats: HashMap<String, (u64, u64)>,
    connections: HashMap<(String, u16, String, u16, String), Connection>,
    rate_window: VecDeque<RateSample>,
    start_timestamp: String,
    max_connections: usize,
}

pub struct LiveStore {
    inner: RwLock<Inner>,
}

impl LiveStore {
    pub fn new(max_packets: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: 1,
                max_packets,
                ring: VecDeque::with_capacity(max_packets),
                total_packets: 0,
                total_bytes: 0,
                protocol_stats: HashMap::new(),
                application_stats: HashMap::new(),
                country_stats: HashMap::new(),
                ip_stats: HashMap::new(),
                connections: HashMap::new(),
                rate_window: VecDeque::new(),
                start_timestamp: chrono::Utc::now().to_rfc3339(),
                // Open Question 2 (SPEC_FULL.md §9): cap connection table
                // growth at the same order of magnitude as the packet ring,
                // evicted LRU-by-lastSeen rather than left unbounded.
                max_connections: max_packets,
            }),
        }
    }

    /// Assign an id and append to the ring, dropping the oldest entry on
    /// overflow (I2). Updates every running counter and the sliding rate
    /// window (I3, I4, I5). Returns the assigned id.
    pub fn add(&self, mut packet: Packet) -> u64 {
        let mut inner = self.inner.write().expect("live store lock poisoned");

        let id = inner.next_id;
        inner.next_id += 1;
        packet.id = id;

        if packet.protocol.is_empty() {
            packet.protocol = "Unknown".into();
        }

        inner.total_packets += 1;
        inner.total_bytes += packet.length as u64;
        *inner.protocol_stats.entry(packet.protocol.clone()).or_insert(0) += 1;
        if !packet.application.is_empty() {
            *inner
                .application_stats
                .entry(packet.application.clone())
                .or_insert(0) += 1;
        }
        if !packet.src_country.is_empty() {
            *inner
                .country_stats
                .entry(packet.src_country.clone())
                .or_insert(0) += packet.length as u64;
        }
        if !packet.dst_country.is_empty() {
            *inner
                .country_stats
                .entry(packet.dst_country.clone())
                .or_insert(0) += packet.length as u64;
        }
        if !packet.src_ip.is_empty() {
            let entry = inner.ip_stats.entry(packet.src_ip.clone()).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += packet.length as u64;
        }

        if packet.src_port != 0 || packet.dst_port != 0 {
            let key = (
                packet.src_ip.clone(),
                packet.src_port,
                packet.dst_ip.clone(),
                packet.dst_port,
                packet.protocol.clone(),
            );
            let now = packet.timestamp.clone();
            inner
                .connections
                .entry(key)
                .and_modify(|c| {
                    c.packets += 1;
                    c.bytes += packet.length as u64;
                    c.last_seen = now.clone();
                })
                .or_insert_with(|| Connection {
                    src_ip: packet.src_ip.clone(),
                    src_port: packet.src_port,
                    dst_ip: packet.dst_ip.clone(),
                    dst_port: packet.dst_port,
                    protocol: packet.protocol.clone(),
                    packets: 1,
                    bytes: packet.length as u64,
                    first_seen: now.clone(),
                    last_seen: now,
                    state: "active".into(),
                });

            if inner.connections.len() > inner.max_connections {
                evict_oldest_connection(&mut inner.connections);
            }
        }

        let now = Instant::now();
        inner.rate_window.push_back(RateSample {
            at: now,
            length: packet.length as u64,
        });
        let window = Duration::from_secs(crate::config::RATE_WINDOW_SECS);
        while let Some(front) = inner.rate_window.front() {
            if now.duration_since(front.at) > window {
                inner.rate_window.pop_front();
            } else {
                break;
            }
        }

        inner.ring.push_back(packet);
        while inner.ring.len() > inner.max_packets {
            inner.ring.pop_front();
        }

        id
    }

    /// Scalar counters plus a freshly-built, sorted, top-10 talkers list.
    /// `country_stats` is the incrementally-maintained double-credit counter
    /// (SPEC_FULL.md §9 open-question decision #1) — not recomputed here.
    pub fn stats(&self, cache: &IpInfoCache) -> AggregateStats {
        let inner = self.inner.read().expect("live store lock poisoned");

        let window_secs = crate::config::RATE_WINDOW_SECS as f64;
        let packets_per_sec = inner.rate_window.len() as f64 / window_secs;
        let bytes_per_sec =
            inner.rate_window.iter().map(|s| s.length).sum::<u64>() as f64 / window_secs;

        let mut talkers: Vec<Talker> = inner
            .ip_stats
            .iter()
            .map(|(ip, (packets, bytes))| {
                let info = cache.lookup(ip.parse().unwrap_or_else(|_| "0.0.0.0".parse().unwrap()));
                Talker {
                    ip: ip.clone(),
                    packets: *packets,
                    bytes: *bytes,
                    hostname: info.hostname,
                    country: info.country,
                }
            })
            .collect();
        talkers.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.ip.cmp(&b.ip)));
        talkers.truncate(crate::config::TOP_TALKERS_COUNT);

        AggregateStats {
            total_packets: inner.total_packets,
            total_bytes: inner.total_bytes,
            protocol_stats: inner.protocol_stats.clone(),
            application_stats: inner.application_stats.clone(),
            country_stats: inner.country_stats.clone(),
            start_timestamp: inner.start_timestamp.clone(),
            packets_per_sec,
            bytes_per_sec,
            talkers,
        }
    }

    /// A copy of the last `limit` ring entries, most-recent last.
    pub fn recent_packets(&self, limit: usize) -> Vec<Packet> {
        let inner = self.inner.read().expect("live store lock poisoned");
        let len = inner.ring.len();
        let start = len.saturating_sub(limit);
        inner.ring.iter().skip(start).cloned().collect()
    }

    /// A copy of the connection table sorted by bytes desc, truncated to
    /// `TOP_CONNECTIONS_COUNT`, ties broken by the 5-tuple lexicographically.
    pub fn connections(&self) -> Vec<Connection> {
        let inner = self.inner.read().expect("live store lock poisoned");
        let mut conns: Vec<Connection> = inner.connections.values().cloned().collect();
        conns.sort_by(|a, b| {
            b.bytes.cmp(&a.bytes).then_with(|| {
                (&a.src_ip, a.src_port, &a.dst_ip, a.dst_port, &a.protocol).cmp(&(
                    &b.src_ip, b.src_port, &b.dst_ip, b.dst_port, &b.protocol,
                ))
            })
        });
        conns.truncate(crate::config::TOP_CONNECTIONS_COUNT);
        conns
    }
}

fn evict_oldest_connection(
    connections: &mut HashMap<(String, u16, String, u16, String), Connection>,
) {
    if let Some(key) = connections
        .iter()
        .min_by(|a, b| a.1.last_seen.cmp(&b.1.last_seen))
        .map(|(k, _)| k.clone())
    {
        connections.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_packet(src_ip: &str, dst_ip: &str, src_port: u16, dst_port: u16, length: u32) -> Packet {
        Packet {
            id: 0,
            timestamp: chrono::Utc::now().to_rfc3339(),
            src_ip: src_ip.into(),
            dst_ip: dst_ip.into(),
            src_port,
            dst_port,
            protocol: "TCP".into(),
            length,
            info: String::new(),
            src_mac: String::new(),
            dst_mac: String::new(),
            application: String::new(),
            src_hostname: String::new(),
            dst_hostname: String::new(),
            src_country: String::new(),
            dst_country: String::new(),
            process_name: String::new(),
        }
    }

    #[test]
    fn test_add_increments_totals() {
        let store = LiveStore::new(1000);
        store.add(make_packet("1.1.1.1", "2.2.2.2", 1, 2, 100));
        let cache = IpInfoCache::new();
        let stats = store.stats(&cache);
        assert_eq!(stats.total_packets, 1);
        assert_eq!(stats.total_bytes, 100);
    }

    #[test]
    fn test_ids_are_monotonically_increasing() {
        let store = LiveStore::new(1000);
        let id1 = store.add(make_packet("1.1.1.1", "2.2.2.2", 1, 2, 10));
        let id2 = store.add(make_packet("1.1.1.1", "2.2.2.2", 1, 2, 10));
        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
    }

    #[test]
    fn test_ring_bound_drops_oldest() {
        let store = LiveStore::new(1000);
        for _ in 0..1500 {
            store.add(make_packet("1.1.1.1", "2.2.2.2", 1, 2, 10));
        }
        let packets = store.recent_packets(usize::MAX);
        assert_eq!(packets.len(), 1000);
        assert_eq!(packets.first().unwrap().id, 501);
        assert_eq!(packets.last().unwrap().id, 1500);
    }

    #[test]
    fn test_empty_protocol_recorded_as_unknown() {
        let store = LiveStore::new(10);
        let mut pkt = make_packet("1.1.1.1", "2.2.2.2", 1, 2, 10);
        pkt.protocol = String::new();
        store.add(pkt);
        let packets = store.recent_packets(10);
        assert_eq!(packets[0].protocol, "Unknown");
    }

    #[test]
    fn test_zero_ports_contribute_no_connection() {
        let store = LiveStore::new(10);
        store.add(make_packet("1.1.1.1", "2.2.2.2", 0, 0, 10));
        assert!(store.connections().is_empty());
    }

    #[test]
    fn test_country_stats_double_credits() {
        let store = LiveStore::new(10);
        let mut pkt = make_packet("127.0.0.1", "127.0.0.1", 1, 2, 84);
        pkt.src_country = "Local".into();
        pkt.dst_country = "Local".into();
        for _ in 0..5 {
            store.add(pkt.clone());
        }
        let cache = IpInfoCache::new();
        let stats = store.stats(&cache);
        assert_eq!(stats.country_stats.get("Local"), Some(&(84 * 2 * 5)));
    }

    #[test]
    fn test_connections_sorted_by_bytes_desc() {
        let store = LiveStore::new(100);
        store.add(make_packet("1.1.1.1", "2.2.2.2", 1, 2, 10));
        store.add(make_packet("3.3.3.3", "4.4.4.4", 1, 2, 1000));
        let conns = store.connections();
        assert_eq!(conns[0].src_ip, "3.3.3.3");
    }

    #[test]
    fn test_connection_updates_last_seen_not_before_first_seen() {
        let store = LiveStore::new(100);
        store.add(make_packet("1.1.1.1", "2.2.2.2", 1, 2, 10));
        store.add(make_packet("1.1.1.1", "2.2.2.2", 1, 2, 10));
        let conns = store.connections();
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].packets, 2);
        assert!(conns[0].last_seen >= conns[0].first_seen);
    }
}
