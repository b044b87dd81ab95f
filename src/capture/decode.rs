//! C1 — the frame decoder.
//!
//! Converts one raw link-layer frame into a structured [`Packet`]. Must never
//! block on I/O and must never acquire a store lock (§4.1); enrichment is a
//! synchronous, non-blocking `IpInfoCache::lookup` plus a fire-and-forget
//! `resolve` on miss.

use std::net::IpAddr;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use etherparse::{IpHeader, PacketHeaders, TransportHeader};

use crate::config;
use crate::core::ip_cache::IpInfoCache;
use crate::model::Packet;

use super::Frame;

const ETHER_TYPE_ARP: u16 = 0x0806;

/// Decode one captured frame, enriching endpoint hostname/country from
/// whatever `cache` already knows and firing an async resolution on miss.
pub fn decode(frame: &Frame, cache: &IpInfoCache) -> Packet {
    let mut pkt = Packet {
        id: 0,
        timestamp: system_time_to_rfc3339(frame.captured_at),
        src_ip: String::new(),
        dst_ip: String::new(),
        src_port: 0,
        dst_port: 0,
        protocol: String::new(),
        length: frame.data.len() as u32,
        info: String::new(),
        src_mac: String::new(),
        dst_mac: String::new(),
        application: String::new(),
        src_hostname: String::new(),
        dst_hostname: String::new(),
        src_country: String::new(),
        dst_country: String::new(),
        process_name: String::new(),
    };

    let headers = match PacketHeaders::from_ethernet_slice(&frame.data) {
        Ok(h) => h,
        Err(_) => {
            pkt.protocol = "Unknown".into();
            return pkt;
        }
    };

    if let Some(eth) = &headers.link {
        pkt.src_mac = format_mac(&eth.source);
        pkt.dst_mac = format_mac(&eth.destination);

        if eth.ether_type.0 == ETHER_TYPE_ARP {
            decode_arp(headers.payload, &mut pkt);
            enrich_endpoints(&mut pkt, cache);
            return pkt;
        }
    }

    match &headers.ip {
        Some(IpHeader::Version4(ipv4, _)) => {
            pkt.src_ip = IpAddr::from(ipv4.source).to_string();
            pkt.dst_ip = IpAddr::from(ipv4.destination).to_string();
            pkt.protocol = ip_number_name(ipv4.protocol.0);
        }
        Some(IpHeader::Version6(ipv6, _)) => {
            pkt.src_ip = IpAddr::from(ipv6.source).to_string();
            pkt.dst_ip = IpAddr::from(ipv6.destination).to_string();
            pkt.protocol = ip_number_name(ipv6.next_header.0);
        }
        None => {}
    }

    match &headers.transport {
        Some(TransportHeader::Tcp(tcp)) => {
            pkt.src_port = tcp.source_port;
            pkt.dst_port = tcp.destination_port;
            pkt.protocol = "TCP".into();
            pkt.info = format_tcp_info(
                tcp.source_port,
                tcp.destination_port,
                tcp.syn,
                tcp.ack,
                tcp.fin,
                tcp.rst,
                tcp.psh,
                tcp.sequence_number,
                tcp.acknowledgment_number,
                tcp.window_size,
            );
        }
        Some(TransportHeader::Udp(udp)) => {
            pkt.src_port = udp.source_port;
            pkt.dst_port = udp.destination_port;
            pkt.protocol = "UDP".into();
            pkt.info = format!(
                "{} → {} Len={}",
                udp.source_port, udp.destination_port, udp.length
            );
            if udp.source_port == 53 || udp.destination_port == 53 {
                if let Some((app, info)) = decode_dns(headers.payload) {
                    pkt.application = app;
                    pkt.info = info;
                }
            }
        }
        Some(TransportHeader::Icmpv4(icmp)) => {
            pkt.protocol = "ICMP".into();
            pkt.info = format!(
                "Type={} Code={}",
                icmp.icmp_type.type_u8(),
                icmp.icmp_type.code_u8()
            );
        }
        _ => {}
    }

    if pkt.application.is_empty() {
        if let Some(app) = config::well_known_app(pkt.src_port)
            .or_else(|| config::well_known_app(pkt.dst_port))
        {
            pkt.application = app.into();
        }
    }

    if pkt.protocol.is_empty() {
        pkt.protocol = "Unknown".into();
    }

    enrich_endpoints(&mut pkt, cache);
    pkt
}

fn enrich_endpoints(pkt: &mut Packet, cache: &IpInfoCache) {
    for ip_str in [pkt.src_ip.clone(), pkt.dst_ip.clone()] {
        if ip_str.is_empty() {
            continue;
        }
        let Ok(ip) = ip_str.parse::<IpAddr>() else {
            continue;
        };
        let info = cache.lookup(ip);
        if !info.hostname.is_empty() || !info.country.is_empty() {
            if ip_str == pkt.src_ip {
                pkt.src_hostname = info.hostname.clone();
                pkt.src_country = info.country.clone();
            }
            if ip_str == pkt.dst_ip {
                pkt.dst_hostname = info.hostname;
                pkt.dst_country = info.country;
            }
        } else {
            cache.resolve(ip);
        }
    }
}

fn format_mac(bytes: &[u8; 6]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn ip_number_name(proto: u8) -> String {
    match proto {
        1 => "ICMP".into(),
        2 => "IGMP".into(),
        6 => "TCP".into(),
        17 => "UDP".into(),
        41 => "IPv6".into(),
        58 => "ICMPv6".into(),
        _ => proto.to_string(),
    }
}

#[allow(clippy::too_many_arguments)]
fn format_tcp_info(
    src_port: u16,
    dst_port: u16,
    syn: bool,
    ack: bool,
    fin: bool,
    rst: bool,
    psh: bool,
    seq: u32,
    ack_num: u32,
    win: u16,
) -> String {
    let mut flags = String::new();
    if syn {
        flags.push_str("SYN ");
    }
    if ack {
        flags.push_str("ACK ");
    }
    if fin {
        flags.push_str("FIN ");
    }
    if rst {
        flags.push_str("RST ");
    }
    if psh {
        flags.push_str("PSH ");
    }
    format!(
        "{} → {} [{}] Seq={} Ack={} Win={}",
        src_port, dst_port, flags, seq, ack_num, win
    )
}

/// Hand-parsed IPv4 ARP (etherparse does not decode ARP payloads).
fn decode_arp(payload: &[u8], pkt: &mut Packet) {
    pkt.protocol = "ARP".into();
    // Ethernet/IPv4 ARP: hw_type(2) proto_type(2) hw_len(1) proto_len(1) op(2)
    // sha(6) spa(4) tha(6) tpa(4) = 28 bytes.
    if payload.len() < 28 {
        return;
    }
    let op = u16::from_be_bytes([payload[6], payload[7]]);
    let sha = format_mac(&payload[8..14].try_into().unwrap());
    let spa = IpAddr::from([payload[14], payload[15], payload[16], payload[17]]);
    let tpa = IpAddr::from([payload[24], payload[25], payload[26], payload[27]]);

    pkt.src_ip = spa.to_string();
    pkt.dst_ip = tpa.to_string();

    pkt.info = if op == 1 {
        format!("Who has {}? Tell {}", tpa, spa)
    } else {
        format!("{} is at {}", spa, sha)
    };
}

/// Minimal DNS header + first-question parser, enough to satisfy §4.1's
/// "DNS Query: <name>" / "DNS Response: N answers" requirement.
fn decode_dns(payload: &[u8]) -> Option<(String, String)> {
    if payload.len() < 12 {
        return None;
    }
    let flags = u16::from_be_bytes([payload[2], payload[3]]);
    let is_response = flags & 0x8000 != 0;
    let qdcount = u16::from_be_bytes([payload[4], payload[5]]);
    let ancount = u16::from_be_bytes([payload[6], payload[7]]);

    if is_response {
        return Some(("DNS".into(), format!("DNS Response: {} answers", ancount)));
    }

    if qdcount == 0 {
        return Some(("DNS".into(), "DNS Query: ".into()));
    }

    let name = parse_dns_name(&payload[12..]);
    Some(("DNS".into(), format!("DNS Query: {}", name)))
}

/// Parse a DNS name in label-length-prefixed wire format starting at `data`.
fn parse_dns_name(data: &[u8]) -> String {
    let mut labels = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let len = data[i] as usize;
        if len == 0 {
            break;
        }
        i += 1;
        if i + len > data.len() {
            break;
        }
        labels.push(String::from_utf8_lossy(&data[i..i + len]).into_owned());
        i += len;
    }
    let mut name = labels.join(".");
    name.push('.');
    name
}

fn system_time_to_rfc3339(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Frame;
    use crate::core::ip_cache::IpInfoCache;

    fn cache() -> IpInfoCache {
        IpInfoCache::new()
    }

    fn eth_header(ether_type: u16) -> Vec<u8> {
        let mut h = vec![0u8; 14];
        h[0..6].copy_from_slice(&[0xaa; 6]); // dst mac
        h[6..12].copy_from_slice(&[0xbb; 6]); // src mac
        h[12] = (ether_type >> 8) as u8;
        h[13] = (ether_type & 0xff) as u8;
        h
    }

    fn ipv4_header(protocol: u8, payload_len: usize, src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
        let total_len = 20 + payload_len;
        let mut h = vec![0u8; 20];
        h[0] = 0x45;
        h[2] = (total_len >> 8) as u8;
        h[3] = (total_len & 0xff) as u8;
        h[8] = 64; // ttl
        h[9] = protocol;
        h[12..16].copy_from_slice(&src);
        h[16..20].copy_from_slice(&dst);
        h
    }

    fn build_icmp_frame(src: [u8; 4], dst: [u8; 4]) -> Frame {
        let icmp_payload = vec![8u8, 0, 0, 0, 0, 0, 0, 0]; // type=8 (echo), code=0
        let mut data = eth_header(0x0800);
        data.extend(ipv4_header(1, icmp_payload.len(), src, dst));
        data.extend(icmp_payload);
        Frame {
            captured_at: SystemTime::now(),
            data,
        }
    }

    fn build_tcp_frame(src_port: u16, dst_port: u16) -> Frame {
        let mut tcp = vec![0u8; 20];
        tcp[0] = (src_port >> 8) as u8;
        tcp[1] = (src_port & 0xff) as u8;
        tcp[2] = (dst_port >> 8) as u8;
        tcp[3] = (dst_port & 0xff) as u8;
        tcp[4..8].copy_from_slice(&1000u32.to_be_bytes()); // seq
        tcp[12] = 5 << 4; // data offset
        tcp[13] = 0x02; // SYN
        tcp[14] = 0xff;
        tcp[15] = 0xff; // window 65535

        let mut data = eth_header(0x0800);
        data.extend(ipv4_header(6, tcp.len(), [10, 0, 0, 2], [10, 0, 0, 3]));
        data.extend(tcp);
        Frame {
            captured_at: SystemTime::now(),
            data,
        }
    }

    fn build_dns_query_frame(name: &str) -> Frame {
        let mut qname = Vec::new();
        for label in name.trim_end_matches('.').split('.') {
            qname.push(label.len() as u8);
            qname.extend(label.as_bytes());
        }
        qname.push(0);
        qname.extend([0, 1]); // QTYPE A
        qname.extend([0, 1]); // QCLASS IN

        let mut dns = vec![0u8; 12];
        dns[5] = 1; // qdcount = 1
        dns.extend(qname);

        let mut udp = vec![0u8; 8];
        udp[0] = 0xc0;
        udp[1] = 0x00; // random src port
        udp[2] = 0;
        udp[3] = 53;
        let udp_len = 8 + dns.len();
        udp[4] = (udp_len >> 8) as u8;
        udp[5] = (udp_len & 0xff) as u8;
        udp.extend(dns);

        let mut data = eth_header(0x0800);
        data.extend(ipv4_header(17, udp.len(), [10, 0, 0, 5], [10, 0, 0, 1]));
        data.extend(udp);
        Frame {
            captured_at: SystemTime::now(),
            data,
        }
    }

    fn build_arp_request(spa: [u8; 4], tpa: [u8; 4]) -> Frame {
        let mut data = eth_header(0x0806);
        let mut arp = vec![0u8; 28];
        arp[0] = 0;
        arp[1] = 1; // hw type ethernet
        arp[2] = 8;
        arp[3] = 0; // proto type ipv4
        arp[4] = 6; // hw len
        arp[5] = 4; // proto len
        arp[7] = 1; // op = request
        arp[8..14].copy_from_slice(&[0xbb; 6]); // sha
        arp[14..18].copy_from_slice(&spa);
        arp[18..24].copy_from_slice(&[0; 6]); // tha unknown
        arp[24..28].copy_from_slice(&tpa);
        data.extend(arp);
        Frame {
            captured_at: SystemTime::now(),
            data,
        }
    }

    fn build_arp_reply(sha: [u8; 6], spa: [u8; 4], tha: [u8; 6], tpa: [u8; 4]) -> Frame {
        let mut data = eth_header(0x0806);
        let mut arp = vec![0u8; 28];
        arp[0] = 0;
        arp[1] = 1; // hw type ethernet
        arp[2] = 8;
        arp[3] = 0; // proto type ipv4
        arp[4] = 6; // hw len
        arp[5] = 4; // proto len
        arp[7] = 2; // op = reply
        arp[8..14].copy_from_slice(&sha);
        arp[14..18].copy_from_slice(&spa);
        arp[18..24].copy_from_slice(&tha);
        arp[24..28].copy_from_slice(&tpa);
        data.extend(arp);
        Frame {
            captured_at: SystemTime::now(),
            data,
        }
    }

    #[test]
    fn test_decode_empty_frame_is_unknown() {
        let frame = Frame {
            captured_at: SystemTime::now(),
            data: vec![],
        };
        let pkt = decode(&frame, &cache());
        assert_eq!(pkt.protocol, "Unknown");
        assert_eq!(pkt.length, 0);
    }

    #[test]
    fn test_decode_icmp_loopback_ping() {
        let frame = build_icmp_frame([127, 0, 0, 1], [127, 0, 0, 1]);
        let pkt = decode(&frame, &cache());
        assert_eq!(pkt.protocol, "ICMP");
        assert_eq!(pkt.src_ip, "127.0.0.1");
        assert_eq!(pkt.dst_ip, "127.0.0.1");
        assert_eq!(pkt.info, "Type=8 Code=0");
    }

    #[test]
    fn test_decode_tcp_syn_info_and_application() {
        let frame = build_tcp_frame(54321, 443);
        let pkt = decode(&frame, &cache());
        assert_eq!(pkt.protocol, "TCP");
        assert_eq!(pkt.src_port, 54321);
        assert_eq!(pkt.dst_port, 443);
        assert_eq!(pkt.info, "54321 → 443 [SYN ] Seq=1000 Ack=0 Win=65535");
        assert_eq!(pkt.application, "HTTPS");
    }

    #[test]
    fn test_decode_dns_query() {
        let frame = build_dns_query_frame("example.com.");
        let pkt = decode(&frame, &cache());
        assert_eq!(pkt.application, "DNS");
        assert_eq!(pkt.info, "DNS Query: example.com.");
    }

    #[test]
    fn test_decode_arp_request() {
        let frame = build_arp_request([192, 168, 1, 1], [192, 168, 1, 254]);
        let pkt = decode(&frame, &cache());
        assert_eq!(pkt.protocol, "ARP");
        assert_eq!(pkt.info, "Who has 192.168.1.254? Tell 192.168.1.1");
    }

    #[test]
    fn test_decode_arp_reply() {
        // The replier (192.168.1.254) answers with its own MAC (sha), not
        // the original requester's MAC (tha).
        let frame = build_arp_reply(
            [0xcc; 6],
            [192, 168, 1, 254],
            [0xbb; 6],
            [192, 168, 1, 1],
        );
        let pkt = decode(&frame, &cache());
        assert_eq!(pkt.protocol, "ARP");
        assert_eq!(pkt.info, "192.168.1.254 is at cc:cc:cc:cc:cc:cc");
    }

    #[test]
    fn test_decode_enriches_from_existing_cache_entry() {
        let c = cache();
        c.resolve("127.0.0.1".parse().unwrap());
        let frame = build_icmp_frame([127, 0, 0, 1], [127, 0, 0, 1]);
        let pkt = decode(&frame, &c);
        assert_eq!(pkt.src_country, "Local");
        assert_eq!(pkt.dst_country, "Local");
    }
}
