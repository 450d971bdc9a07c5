// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! BitTorrent UDP tracker protocol (BEP-15) analyzer, the donor's
//! `modules/bt/bt.cpp` + `udpTrackerSession.{h,cpp}`. Tracks CONNECT/
//! ANNOUNCE/SCRAPE request-response pairs over UDP by connection-id and
//! transaction-id, and also subscribes to the HTTP analyzer's completed
//! sessions to flag `.torrent` downloads and HTTP-based tracker traffic.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::address::text_ip;
use crate::alert::Alerter;
use crate::config::AnalyzerConfig;
use crate::error::Result;
use crate::flow::FlowId;
use crate::packet::{Packet, IPPROTO_UDP};
use crate::session_table::SessionTable;
use crate::slab::Slab;
use crate::time::{unix_now, Timestamp};

use super::http::HttpSession;
use super::warn_once;
use super::Analyzer;

/// Magic connection-id a client sends in its very first CONNECT request,
/// before the tracker has assigned one, per BEP-15.
const INITIAL_CONNECTION_ID: u64 = 0x0000_0417_2710_1980;

const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_SCRAPE: u32 = 2;

#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub time: Timestamp,
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub downloaded: u64,
    pub left: u64,
    pub uploaded: u64,
    pub event: u32,
    pub ip: u32,
    pub key: u32,
    pub peers: u32,
    pub port: u16,
}

impl AnnounceRequest {
    /// `payload.len() >= 98` is the caller's responsibility.
    fn parse(payload: &[u8], time: Timestamp) -> Self {
        AnnounceRequest {
            time,
            info_hash: payload[16..36].try_into().unwrap(),
            peer_id: payload[36..56].try_into().unwrap(),
            downloaded: u64::from_be_bytes(payload[56..64].try_into().unwrap()),
            left: u64::from_be_bytes(payload[64..72].try_into().unwrap()),
            uploaded: u64::from_be_bytes(payload[72..80].try_into().unwrap()),
            event: u32::from_be_bytes(payload[80..84].try_into().unwrap()),
            ip: u32::from_be_bytes(payload[84..88].try_into().unwrap()),
            key: u32::from_be_bytes(payload[88..92].try_into().unwrap()),
            peers: u32::from_be_bytes(payload[92..96].try_into().unwrap()),
            port: u16::from_be_bytes(payload[96..98].try_into().unwrap()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    pub time: Timestamp,
    pub interval: u32,
    pub leechers: u32,
    pub seeders: u32,
    pub peers: Vec<(u32, u16)>,
}

impl AnnounceResponse {
    /// `payload.len() >= 20` is the caller's responsibility.
    fn parse(payload: &[u8], time: Timestamp) -> Self {
        let mut peers = Vec::new();
        let mut offset = 20;
        while payload.len() - offset >= 6 {
            let ip = u32::from_be_bytes(payload[offset..offset + 4].try_into().unwrap());
            let port = u16::from_be_bytes(payload[offset + 4..offset + 6].try_into().unwrap());
            peers.push((ip, port));
            offset += 6;
        }
        AnnounceResponse {
            time,
            interval: u32::from_be_bytes(payload[8..12].try_into().unwrap()),
            leechers: u32::from_be_bytes(payload[12..16].try_into().unwrap()),
            seeders: u32::from_be_bytes(payload[16..20].try_into().unwrap()),
            peers,
        }
    }
}

/// Unverified against a live tracker — the donor's own source marks the
/// SCRAPE path `/* XXX untested. */`.
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub time: Timestamp,
    pub info_hashes: Vec<[u8; 20]>,
}

impl ScrapeRequest {
    /// `payload.len() >= 36` is the caller's responsibility.
    fn parse(payload: &[u8], time: Timestamp) -> Self {
        let mut info_hashes = Vec::new();
        let mut offset = 16;
        while payload.len() - offset >= 20 {
            info_hashes.push(payload[offset..offset + 20].try_into().unwrap());
            offset += 20;
        }
        ScrapeRequest { time, info_hashes }
    }
}

/// Unverified against a live tracker — the donor's own source marks the
/// SCRAPE path `/* XXX untested. */`.
#[derive(Debug, Clone)]
pub struct ScrapeResponse {
    pub time: Timestamp,
    pub entries: Vec<(u32, u32, u32)>,
}

impl ScrapeResponse {
    /// `payload.len() >= 20` is the caller's responsibility. Each entry is
    /// `(seeders, completed, leechers)`.
    fn parse(payload: &[u8], time: Timestamp) -> Self {
        let mut entries = Vec::new();
        let mut offset = 8;
        while payload.len() - offset >= 12 {
            let seeders = u32::from_be_bytes(payload[offset..offset + 4].try_into().unwrap());
            let completed = u32::from_be_bytes(payload[offset + 4..offset + 8].try_into().unwrap());
            let leechers = u32::from_be_bytes(payload[offset + 8..offset + 12].try_into().unwrap());
            entries.push((seeders, completed, leechers));
            offset += 12;
        }
        ScrapeResponse { time, entries }
    }
}

struct TrackerInner {
    client_mac: [u8; 6],
    server_mac: [u8; 6],
    client_ip: u32,
    server_ip: u32,
    client_port: u16,
    server_port: u16,
    transaction_id: u32,
    connection_id: u64,
    announce_requests: Vec<AnnounceRequest>,
    announce_responses: Vec<AnnounceResponse>,
    scrape_requests: Vec<ScrapeRequest>,
    scrape_responses: Vec<ScrapeResponse>,
}

pub struct UdpTrackerSession {
    inner: Mutex<TrackerInner>,
    last_update: AtomicU32,
    creation_time: Timestamp,
}

impl UdpTrackerSession {
    fn new(packet: &Packet<'_>) -> Self {
        UdpTrackerSession {
            creation_time: packet.time(),
            last_update: AtomicU32::new(packet.time().seconds),
            inner: Mutex::new(TrackerInner {
                client_mac: packet.source_mac(),
                server_mac: packet.destination_mac(),
                client_ip: packet.source_ip(),
                server_ip: packet.destination_ip(),
                client_port: packet.source_port(),
                server_port: packet.destination_port(),
                transaction_id: 0,
                connection_id: 0,
                announce_requests: Vec::new(),
                announce_responses: Vec::new(),
                scrape_requests: Vec::new(),
                scrape_responses: Vec::new(),
            }),
        }
    }

    fn last_update(&self) -> u32 {
        self.last_update.load(Ordering::SeqCst)
    }

    fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.announce_requests.is_empty() && inner.announce_responses.is_empty()
    }
}

pub struct UdpTrackerAnalyzer {
    name: String,
    filter_expr: String,
    timeout_secs: u32,
    table: SessionTable<FlowId, UdpTrackerSession>,
    slab: Slab,
    warned: AtomicBool,
    alerter: Arc<dyn Alerter>,
}

impl UdpTrackerAnalyzer {
    pub fn new(conf: &AnalyzerConfig, bucket_count: usize, alerter: Arc<dyn Alerter>) -> Result<Self> {
        Ok(UdpTrackerAnalyzer {
            name: conf.name.clone(),
            filter_expr: conf.filter.clone(),
            timeout_secs: conf.timeout_secs,
            table: SessionTable::new(bucket_count),
            slab: Slab::new(conf.max_sessions),
            warned: AtomicBool::new(false),
            alerter,
        })
    }

    /// HTTP subscription, the donor's `bt.cpp::processHTTP`: flags requests
    /// whose path ends in `.torrent` or whose query string mentions an
    /// `info_hash`, i.e. HTTP traffic that is itself tracker- or torrent-
    /// related rather than the UDP tracker protocol this analyzer otherwise
    /// watches.
    pub fn on_http_session(&self, session: &Arc<HttpSession>) {
        session.with_inner(|inner| {
            for request in &inner.requests {
                let path = request.message.get(1).map(String::as_str).unwrap_or("");
                let query = request.message.get(2).map(String::as_str).unwrap_or("");
                if path.to_ascii_lowercase().ends_with(".torrent") {
                    let subject = format!("Torrent file download by {}", text_ip(inner.client_ip));
                    let body = format!(
                        "{} downloaded {} from {}",
                        text_ip(inner.client_ip),
                        path,
                        text_ip(inner.server_ip)
                    );
                    let _ = self.alerter.send(&subject, &body);
                } else if query.to_ascii_lowercase().contains("info_hash") {
                    let subject = format!("HTTP tracker communication by {}", text_ip(inner.client_ip));
                    let body = format!(
                        "{} queried {} on {}: {}",
                        text_ip(inner.client_ip),
                        path,
                        text_ip(inner.server_ip),
                        query
                    );
                    let _ = self.alerter.send(&subject, &body);
                }
            }
        });
    }
}

impl Analyzer for UdpTrackerAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture_filter(&self) -> &str {
        &self.filter_expr
    }

    fn matches(&self, packet: &Packet<'_>) -> bool {
        packet.protocol() == IPPROTO_UDP && packet.payload_size() >= 16 && !packet.fragmented()
    }

    fn process_packet(&self, packet: &Packet<'_>) {
        let payload = packet.payload();
        let time = packet.time();

        let forward = FlowId::new(
            packet.protocol(),
            packet.source_ip(),
            packet.destination_ip(),
            packet.source_port(),
            packet.destination_port(),
        );
        let reverse = forward.reverse();

        let result = self.table.find_or_open(
            forward,
            reverse,
            |session, is_request| {
                session.last_update.store(time.seconds, Ordering::SeqCst);
                let mut inner = session.inner.lock();
                if is_request {
                    let connection_id = u64::from_be_bytes(payload[0..8].try_into().unwrap());
                    let action = u32::from_be_bytes(payload[8..12].try_into().unwrap());
                    inner.transaction_id = u32::from_be_bytes(payload[12..16].try_into().unwrap());
                    if connection_id == inner.connection_id {
                        match action {
                            ACTION_ANNOUNCE if payload.len() >= 98 => {
                                inner.announce_requests.push(AnnounceRequest::parse(payload, time));
                            }
                            ACTION_SCRAPE if payload.len() >= 36 => {
                                inner.scrape_requests.push(ScrapeRequest::parse(payload, time));
                            }
                            _ => {}
                        }
                    }
                } else {
                    let transaction_id = u32::from_be_bytes(payload[4..8].try_into().unwrap());
                    if transaction_id == inner.transaction_id {
                        let action = u32::from_be_bytes(payload[0..4].try_into().unwrap());
                        match action {
                            ACTION_CONNECT if payload.len() >= 16 => {
                                inner.connection_id = u64::from_be_bytes(payload[8..16].try_into().unwrap());
                            }
                            ACTION_ANNOUNCE if payload.len() >= 20 => {
                                inner.announce_responses.push(AnnounceResponse::parse(payload, time));
                            }
                            ACTION_SCRAPE if payload.len() >= 20 => {
                                inner.scrape_responses.push(ScrapeResponse::parse(payload, time));
                            }
                            _ => {}
                        }
                    }
                }
            },
            || {
                let connection_id = u64::from_be_bytes(payload[0..8].try_into().unwrap());
                let action = u32::from_be_bytes(payload[8..12].try_into().unwrap());
                if connection_id == INITIAL_CONNECTION_ID && action == ACTION_CONNECT {
                    Some(UdpTrackerSession::new(packet))
                } else {
                    None
                }
            },
            &self.slab,
        );

        if result.is_none() {
            warn_once(&self.warned, &self.name);
        }
    }

    fn flush(&self) {
        self.warned.store(false, Ordering::SeqCst);
        let now = unix_now();
        self.table.sweep(
            self.timeout_secs,
            now,
            UdpTrackerSession::last_update,
            |_flow, session| {
                if !session.is_empty() {
                    let inner = session.inner.lock();
                    let subject = format!("UDP tracker communication by {}", text_ip(inner.client_ip));
                    let body = format!(
                        "client {}:{} -> tracker {}:{}\nstart {}\n{} announce request(s), {} announce response(s)\n{} scrape request(s), {} scrape response(s)",
                        text_ip(inner.client_ip),
                        inner.client_port,
                        text_ip(inner.server_ip),
                        inner.server_port,
                        session.creation_time.to_local_string(),
                        inner.announce_requests.len(),
                        inner.announce_responses.len(),
                        inner.scrape_requests.len(),
                        inner.scrape_responses.len(),
                    );
                    drop(inner);
                    let _ = self.alerter.send(&subject, &body);
                }
                self.slab.release();
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::NullAlerter;

    fn frame(payload: &[u8], reversed: bool, src_port: u16, dst_port: u16) -> Vec<u8> {
        let mut frame = vec![0u8; 14];
        let mut ip = vec![0x45, 0, 0, 0, 0, 0, 0, 0, 64, IPPROTO_UDP, 0, 0];
        let (src, dst) = if reversed {
            ([10, 0, 0, 2], [10, 0, 0, 1])
        } else {
            ([10, 0, 0, 1], [10, 0, 0, 2])
        };
        ip.extend_from_slice(&src);
        ip.extend_from_slice(&dst);
        frame.extend_from_slice(&ip);
        let mut udp = Vec::new();
        udp.extend_from_slice(&src_port.to_be_bytes());
        udp.extend_from_slice(&dst_port.to_be_bytes());
        udp.extend_from_slice(&[0, 0, 0, 0]);
        frame.extend_from_slice(&udp);
        frame.extend_from_slice(payload);
        frame
    }

    fn make_config() -> AnalyzerConfig {
        AnalyzerConfig {
            name: "bittorrent".into(),
            filter: "udp".into(),
            timeout_secs: 300,
            max_sessions: 16,
            data: None,
            dependencies: Vec::new(),
            smtp_server: None,
            smtp_auth: false,
            smtp_user: None,
            smtp_password: None,
            sender_name: None,
            sender_address: None,
            recipients: Vec::new(),
            threshold: None,
            mail_interval_secs: None,
            addresses: Vec::new(),
            num_packets: None,
        }
    }

    fn connect_request() -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&INITIAL_CONNECTION_ID.to_be_bytes());
        p.extend_from_slice(&ACTION_CONNECT.to_be_bytes());
        p.extend_from_slice(&1234u32.to_be_bytes()); // transaction id
        p
    }

    fn connect_response(transaction_id: u32, connection_id: u64) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&ACTION_CONNECT.to_be_bytes());
        p.extend_from_slice(&transaction_id.to_be_bytes());
        p.extend_from_slice(&connection_id.to_be_bytes());
        p
    }

    fn announce_request(connection_id: u64, transaction_id: u32) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&connection_id.to_be_bytes());
        p.extend_from_slice(&ACTION_ANNOUNCE.to_be_bytes());
        p.extend_from_slice(&transaction_id.to_be_bytes());
        p.extend_from_slice(&[0u8; 20]); // info_hash
        p.extend_from_slice(&[0u8; 20]); // peer_id
        p.extend_from_slice(&0u64.to_be_bytes()); // downloaded
        p.extend_from_slice(&1000u64.to_be_bytes()); // left
        p.extend_from_slice(&0u64.to_be_bytes()); // uploaded
        p.extend_from_slice(&0u32.to_be_bytes()); // event
        p.extend_from_slice(&0u32.to_be_bytes()); // ip
        p.extend_from_slice(&0u32.to_be_bytes()); // key
        p.extend_from_slice(&50u32.to_be_bytes()); // peers wanted
        p.extend_from_slice(&6881u16.to_be_bytes()); // port
        assert_eq!(p.len(), 98);
        p
    }

    /// Scenario 4: a CONNECT request/response followed by an ANNOUNCE
    /// request opens and populates a tracker session.
    #[test]
    fn connect_then_announce_populates_session() {
        let analyzer = UdpTrackerAnalyzer::new(&make_config(), 4, Arc::new(NullAlerter::default())).unwrap();

        let req = frame(&connect_request(), false, 3000, 80);
        let pkt = Packet::initialize(Timestamp::new(1, 0), req.len() as u16, &req).unwrap();
        analyzer.process_packet(&pkt);
        assert_eq!(analyzer.table.len(), 1);

        let resp_bytes = frame(&connect_response(1234, 0xdead_beef_cafe_0001), true, 80, 3000);
        let resp = Packet::initialize(Timestamp::new(1, 0), resp_bytes.len() as u16, &resp_bytes).unwrap();
        analyzer.process_packet(&resp);

        let announce_bytes = frame(&announce_request(0xdead_beef_cafe_0001, 1234), false, 3000, 80);
        let announce = Packet::initialize(Timestamp::new(2, 0), announce_bytes.len() as u16, &announce_bytes).unwrap();
        analyzer.process_packet(&announce);

        let forward = FlowId::new(IPPROTO_UDP, 0x0a000001, 0x0a000002, 3000, 80);
        let session = analyzer.table.find(&forward).unwrap();
        assert!(!session.is_empty());
        assert_eq!(session.inner.lock().announce_requests.len(), 1);
    }

    #[test]
    fn non_sentinel_first_packet_does_not_open_a_session() {
        let analyzer = UdpTrackerAnalyzer::new(&make_config(), 4, Arc::new(NullAlerter::default())).unwrap();
        let bogus = frame(&announce_request(0, 1), false, 3000, 80);
        let pkt = Packet::initialize(Timestamp::new(1, 0), bogus.len() as u16, &bogus).unwrap();
        analyzer.process_packet(&pkt);
        assert!(analyzer.table.is_empty());
    }
}
