// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! PJL (Printer Job Language) analyzer, the donor's `modules/pjl/pjl.cpp` +
//! `pjlSession.h`. Unlike HTTP and the BitTorrent tracker, a print job is
//! one-directional — the session is keyed by the packet's own flow-id with
//! no reverse-flow fallback, since only the client-to-printer stream carries
//! PJL commands.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::config::AnalyzerConfig;
use crate::error::{Result, SensorError};
use crate::flow::FlowId;
use crate::packet::{Packet, IPPROTO_TCP};
use crate::record::RecordBuilder;
use crate::session_table::SessionTable;
use crate::slab::Slab;
use crate::time::{unix_now, Timestamp};
use crate::writer::{self, WriterHandle};

use super::warn_once;
use super::Analyzer;

struct PjlInner {
    client_mac: [u8; 6],
    server_mac: [u8; 6],
    client_ip: u32,
    server_ip: u32,
    client_port: u16,
    server_port: u16,
    size: u32,
    line: String,
    computer: String,
    user: String,
    title: String,
    pages: u16,
    out_of_memory: u8,
}

pub struct PjlSession {
    inner: Mutex<PjlInner>,
    last_update: AtomicU32,
    start_time: Timestamp,
}

impl PjlSession {
    fn new(packet: &Packet<'_>) -> Self {
        PjlSession {
            start_time: packet.time(),
            last_update: AtomicU32::new(packet.time().seconds),
            inner: Mutex::new(PjlInner {
                client_mac: packet.source_mac(),
                server_mac: packet.destination_mac(),
                client_ip: packet.source_ip(),
                server_ip: packet.destination_ip(),
                client_port: packet.source_port(),
                server_port: packet.destination_port(),
                size: 0,
                line: String::new(),
                computer: String::new(),
                user: String::new(),
                title: String::new(),
                pages: 0,
                out_of_memory: 0,
            }),
        }
    }

    fn last_update(&self) -> u32 {
        self.last_update.load(Ordering::SeqCst)
    }

    /// Appends `payload` to the session's running line buffer, parsing (and
    /// clearing) every complete line it finds. A chunk that ends mid-line is
    /// carried over for the next packet, matching the donor's `memchr`-driven
    /// split loop in `pjl.cpp::processPacket`.
    fn feed(&self, packet: &Packet<'_>) {
        let payload = packet.payload();
        self.last_update.store(packet.time().seconds, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        inner.size += payload.len() as u32;
        let mut start = 0usize;
        while let Some(rel) = payload[start..].iter().position(|&b| b == b'\n') {
            let end = start + rel;
            inner.line.push_str(&String::from_utf8_lossy(&payload[start..end]));
            parse_line(&mut inner);
            inner.line.clear();
            start = end + 1;
        }
        if start < payload.len() {
            inner.line.push_str(&String::from_utf8_lossy(&payload[start..]));
        }
    }

    pub fn write_record(&self, rb: &mut RecordBuilder) {
        let inner = self.inner.lock();
        rb.u8(1)
            .u32(self.start_time.seconds)
            .u32(self.start_time.microseconds)
            .raw(&inner.client_mac)
            .raw(&inner.server_mac)
            .u32(inner.client_ip)
            .u32(inner.server_ip)
            .u16(inner.client_port)
            .u16(inner.server_port)
            .bytes16(inner.computer.as_bytes())
            .bytes16(inner.user.as_bytes())
            .bytes16(inner.title.as_bytes())
            .u32(inner.size)
            .u16(inner.pages)
            .u8(inner.out_of_memory);
    }
}

/// Extracts `@PJL SET <name>="value"` — the donor's `variable()` helper.
/// Returns `None` if the line doesn't start with the expected prefix, or has
/// no closing quote.
fn extract_variable(line: &str, name: &str) -> Option<String> {
    let prefix = format!("@PJL SET {name}=\"");
    if !line.starts_with(&prefix) {
        return None;
    }
    let rest = &line[prefix.len()..];
    let end = rest.rfind('"')?;
    Some(rest[..end].to_string())
}

/// One line's worth of PJL/PostScript parsing, the donor's `pjl.cpp::parse`:
/// computer name, then username, then job title, then page count — the
/// first field still empty wins each line, so a later line never overwrites
/// an already-populated field.
fn parse_line(inner: &mut PjlInner) {
    if inner.computer.is_empty() {
        if let Some(v) = extract_variable(&inner.line, "PCNAME") {
            inner.computer = v;
            return;
        }
    }
    if inner.user.is_empty() {
        if let Some(v) = extract_variable(&inner.line, "USERNAME") {
            inner.user = v;
            return;
        }
    }
    if inner.title.is_empty() && inner.line.starts_with("%%Title:") && inner.line.len() >= 9 {
        inner.title = inner.line[9..].to_string();
        return;
    }
    if inner.line.starts_with("%%Page:") {
        inner.pages = inner.pages.saturating_add(1);
    }
}

pub struct PjlAnalyzer {
    name: String,
    filter_expr: String,
    timeout_secs: u32,
    table: SessionTable<FlowId, PjlSession>,
    slab: Slab,
    warned: AtomicBool,
    writer: WriterHandle<PjlSession>,
}

impl PjlAnalyzer {
    pub fn new(conf: &AnalyzerConfig, bucket_count: usize) -> Result<Self> {
        let root = conf
            .data
            .clone()
            .ok_or_else(|| SensorError::Config("pjl analyzer requires a 'data' directory".into()))?;
        let (writer, _join) = writer::spawn(root, "pjl", conf.timeout_secs, |rb, session: &PjlSession| {
            session.write_record(rb)
        })?;
        Ok(PjlAnalyzer {
            name: conf.name.clone(),
            filter_expr: conf.filter.clone(),
            timeout_secs: conf.timeout_secs,
            table: SessionTable::new(bucket_count),
            slab: Slab::new(conf.max_sessions),
            warned: AtomicBool::new(false),
            writer,
        })
    }
}

impl Analyzer for PjlAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture_filter(&self) -> &str {
        &self.filter_expr
    }

    fn matches(&self, packet: &Packet<'_>) -> bool {
        packet.protocol() == IPPROTO_TCP && packet.payload_size() > 0 && !packet.fragmented()
    }

    fn process_packet(&self, packet: &Packet<'_>) {
        let key = FlowId::new(
            packet.protocol(),
            packet.source_ip(),
            packet.destination_ip(),
            packet.source_port(),
            packet.destination_port(),
        );
        let result = self.table.find_or_insert(
            key,
            |session| session.feed(packet),
            || Some(PjlSession::new(packet)),
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
            PjlSession::last_update,
            |_flow, session| {
                {
                    let mut inner = session.inner.lock();
                    if !inner.line.is_empty() {
                        parse_line(&mut inner);
                        inner.line.clear();
                    }
                }
                let bucket_time = session.start_time.seconds;
                self.writer.write(session, bucket_time);
                self.slab.release();
            },
        );
    }

    fn finish(&self) {
        self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth_ipv4_tcp(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; 14];
        let mut ip = vec![0x45, 0, 0, 0, 0, 0, 0, 0, 64, IPPROTO_TCP, 0, 0];
        ip.extend_from_slice(&[10, 0, 0, 1]);
        ip.extend_from_slice(&[10, 0, 0, 2]);
        frame.extend_from_slice(&ip);
        let mut tcp = vec![0x0c, 0x1c, 0x27, 0x0f]; // ports: 3100 -> 9999
        tcp.extend_from_slice(&[0, 0, 0, 0]); // seq
        tcp.extend_from_slice(&[0, 0, 0, 0]); // ack
        tcp.push(0x50); // data offset 5 (20-byte header), no options
        tcp.push(0x18); // flags
        tcp.extend_from_slice(&[0, 0]); // window
        tcp.extend_from_slice(&[0, 0]); // checksum
        tcp.extend_from_slice(&[0, 0]); // urgent
        frame.extend_from_slice(&tcp);
        frame.extend_from_slice(payload);
        frame
    }

    /// Scenario 5: a PJL line stream with a username, a title, and two
    /// pages parses into a populated session, split across two packets to
    /// exercise the carried-over partial-line buffer.
    #[test]
    fn parses_username_title_and_page_count_across_packets() {
        let dir = tempfile::tempdir().unwrap();
        let conf = AnalyzerConfig {
            name: "pjl".into(),
            filter: "tcp port 9100".into(),
            timeout_secs: 300,
            max_sessions: 16,
            data: Some(dir.path().to_path_buf()),
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
        };
        let analyzer = PjlAnalyzer::new(&conf, 4).unwrap();

        let frame1 = eth_ipv4_tcp(b"@PJL SET USERNAME=\"alice\"\n%%Title: ");
        let pkt1 = Packet::initialize(Timestamp::new(1, 0), frame1.len() as u16, &frame1).unwrap();
        analyzer.process_packet(&pkt1);

        let frame2 = eth_ipv4_tcp(b"test\n%%Page:\n%%Page:\n");
        let pkt2 = Packet::initialize(Timestamp::new(2, 0), frame2.len() as u16, &frame2).unwrap();
        analyzer.process_packet(&pkt2);

        let key = FlowId::new(IPPROTO_TCP, 0x0a000001, 0x0a000002, 3100, 9999);
        let session = analyzer.table.find(&key).unwrap();
        let inner = session.inner.lock();
        assert_eq!(inner.user, "alice");
        assert_eq!(inner.title, "test");
        assert_eq!(inner.pages, 2);
    }

    #[test]
    fn extracts_pcname_variable() {
        assert_eq!(
            extract_variable("@PJL SET PCNAME=\"workstation1\"", "PCNAME"),
            Some("workstation1".to_string())
        );
        assert_eq!(extract_variable("@PJL SET PCNAME=\"unterminated", "PCNAME"), None);
        assert_eq!(extract_variable("not a pjl line", "PCNAME"), None);
    }
}
