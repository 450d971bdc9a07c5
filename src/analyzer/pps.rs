// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Per-IP packet-rate analyzer, the donor's `modules/pps/pps.cpp`: tracks
//! incoming/outgoing packet and byte counters per internal IP address and
//! raises an SMTP alert, with a `tcpdump` sample attached, whenever either
//! rate crosses a configured packets-per-second threshold.
//!
//! Unlike every other analyzer, PPS inspects *every* session on every flush
//! pass (not just the idle ones) to compute a rate over the elapsed
//! interval, so it drives [`SessionTable::for_each_mut`] rather than
//! [`SessionTable::sweep`].

use std::net::Ipv4Addr;
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::error;

use crate::address::{text_ip, CidrSet};
use crate::alert::Alerter;
use crate::config::AnalyzerConfig;
use crate::dns::reverse_lookup;
use crate::error::Result;
use crate::packet::Packet;
use crate::session_table::SessionTable;
use crate::slab::Slab;
use crate::time::unix_now;

use super::warn_once;
use super::Analyzer;

struct PpsInner {
    incoming_packets: u64,
    outgoing_packets: u64,
    incoming_bytes: u64,
    outgoing_bytes: u64,
    last_email: u32,
}

pub struct PpsSession {
    inner: Mutex<PpsInner>,
    last_update: AtomicU32,
}

impl PpsSession {
    fn new(now: u32) -> Self {
        PpsSession {
            last_update: AtomicU32::new(now),
            inner: Mutex::new(PpsInner {
                incoming_packets: 0,
                outgoing_packets: 0,
                incoming_bytes: 0,
                outgoing_bytes: 0,
                last_email: 0,
            }),
        }
    }
}

struct AlertRequest {
    ip: u32,
    incoming_pps: u64,
    outgoing_pps: u64,
    incoming_bytes: u64,
    outgoing_bytes: u64,
    threshold: u64,
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// `numPackets` captured with `tcpdump -n -i <interface> host <ip>` and
/// appended to the alert body, the donor's popen'd `tcpdump` invocation in
/// `pps.cpp::flush`. Any failure (missing binary, no capture permission)
/// yields an empty sample rather than failing the alert.
fn capture_sample(interface: &str, num_packets: u32, ip: u32) -> String {
    let output = Command::new("tcpdump")
        .args([
            "-c",
            &num_packets.to_string(),
            "-n",
            "-i",
            interface,
            "host",
            &text_ip(ip),
        ])
        .output();
    match output {
        Ok(out) => String::from_utf8_lossy(&out.stdout).into_owned(),
        Err(e) => {
            error!(error = %e, "tcpdump invocation failed");
            String::new()
        }
    }
}

async fn alert_worker(
    mut rx: mpsc::UnboundedReceiver<AlertRequest>,
    alerter: Arc<dyn Alerter>,
    interface: String,
    num_packets: u32,
) {
    while let Some(req) = rx.recv().await {
        let ptr_records = reverse_lookup(Ipv4Addr::from(req.ip)).await;
        let names = if ptr_records.is_empty() {
            String::new()
        } else {
            format!(" ({})", ptr_records.join(", "))
        };
        let subject = format!(
            "{} Packets/s Threshold Exceeded ({} packets/s in, {} packets/s out) by {}{}",
            req.threshold, req.incoming_pps, req.outgoing_pps, text_ip(req.ip), names
        );
        let mut body = format!(
            "incoming: {} packets/s, {}/s\noutgoing: {} packets/s, {}/s\n",
            req.incoming_pps,
            human_size(req.incoming_bytes),
            req.outgoing_pps,
            human_size(req.outgoing_bytes),
        );
        let sample = capture_sample(&interface, num_packets, req.ip);
        if !sample.is_empty() {
            body.push('\n');
            body.push_str(&sample);
        }
        if let Err(e) = alerter.send(&subject, &body) {
            error!(error = %e, "pps alert send failed");
        }
    }
}

pub struct PpsAnalyzer {
    name: String,
    filter_expr: String,
    timeout_secs: u32,
    threshold: u64,
    mail_interval_secs: u32,
    internal: CidrSet,
    table: SessionTable<u32, PpsSession>,
    slab: Slab,
    warned: std::sync::atomic::AtomicBool,
    last_flush: AtomicU32,
    alert_tx: mpsc::UnboundedSender<AlertRequest>,
}

impl PpsAnalyzer {
    pub fn new(conf: &AnalyzerConfig, interface: String, alerter: Arc<dyn Alerter>) -> Result<Self> {
        let threshold = conf.threshold.unwrap_or(u64::MAX);
        let mail_interval_secs = conf.mail_interval_secs.unwrap_or(3600) as u32;
        let num_packets = conf.num_packets.unwrap_or(10);
        let internal = CidrSet::from_strings(&conf.addresses);

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(alert_worker(rx, alerter, interface, num_packets));

        Ok(PpsAnalyzer {
            name: conf.name.clone(),
            filter_expr: conf.filter.clone(),
            timeout_secs: conf.timeout_secs,
            threshold,
            mail_interval_secs,
            internal,
            table: SessionTable::new(super::bucket_count_for(conf.max_sessions)),
            slab: Slab::new(conf.max_sessions),
            warned: std::sync::atomic::AtomicBool::new(false),
            last_flush: AtomicU32::new(unix_now()),
            alert_tx: tx,
        })
    }
}

impl Analyzer for PpsAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture_filter(&self) -> &str {
        &self.filter_expr
    }

    fn matches(&self, _packet: &Packet<'_>) -> bool {
        true
    }

    /// Only one direction is credited per packet: a source-internal address
    /// always wins, so traffic between two internal hosts is counted only
    /// as the source's outgoing traffic, never also as the destination's
    /// incoming traffic — an asymmetry carried over unchanged from the
    /// donor's `if (internal(src)) ... else if (internal(dst)) ...` chain.
    fn process_packet(&self, packet: &Packet<'_>) {
        let (key, outgoing) = if self.internal.contains(packet.source_ip()) {
            (packet.source_ip(), true)
        } else if self.internal.contains(packet.destination_ip()) {
            (packet.destination_ip(), false)
        } else {
            return;
        };

        let now = packet.time().seconds;
        let bytes = packet.captured_size() as u64;
        let result = self.table.find_or_insert(
            key,
            |session| {
                session.last_update.store(now, Ordering::SeqCst);
                let mut inner = session.inner.lock();
                if outgoing {
                    inner.outgoing_packets += 1;
                    inner.outgoing_bytes += bytes;
                } else {
                    inner.incoming_packets += 1;
                    inner.incoming_bytes += bytes;
                }
            },
            || Some(PpsSession::new(now)),
            &self.slab,
        );
        if result.is_none() {
            warn_once(&self.warned, &self.name);
        }
    }

    fn flush(&self) {
        self.warned.store(false, Ordering::SeqCst);
        let now = unix_now();
        let last_flush = self.last_flush.swap(now, Ordering::SeqCst);
        let elapsed = now.saturating_sub(last_flush).max(1) as u64;
        let timeout_secs = self.timeout_secs;
        let threshold = self.threshold;
        let mail_interval_secs = self.mail_interval_secs;
        let alert_tx = &self.alert_tx;

        self.table.for_each_mut(|ip, session| {
            let idle = now.saturating_sub(session.last_update.load(Ordering::SeqCst)) >= timeout_secs;
            let mut inner = session.inner.lock();
            let incoming_pps = inner.incoming_packets / elapsed;
            let outgoing_pps = inner.outgoing_packets / elapsed;
            if (incoming_pps >= threshold || outgoing_pps >= threshold)
                && now.saturating_sub(inner.last_email) >= mail_interval_secs
            {
                let _ = alert_tx.send(AlertRequest {
                    ip,
                    incoming_pps,
                    outgoing_pps,
                    incoming_bytes: inner.incoming_bytes,
                    outgoing_bytes: inner.outgoing_bytes,
                    threshold,
                });
                inner.last_email = now;
            }
            inner.incoming_packets = 0;
            inner.outgoing_packets = 0;
            inner.incoming_bytes = 0;
            inner.outgoing_bytes = 0;
            if idle {
                self.slab.release();
            }
            idle
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::NullAlerter;
    use crate::packet::IPPROTO_UDP;
    use crate::time::Timestamp;

    fn frame(src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
        let mut frame = vec![0u8; 14];
        let mut ip = vec![0x45, 0, 0, 0, 0, 0, 0, 0, 64, IPPROTO_UDP, 0, 0];
        ip.extend_from_slice(&src);
        ip.extend_from_slice(&dst);
        frame.extend_from_slice(&ip);
        frame.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]); // UDP header, no payload
        frame
    }

    fn make_config() -> AnalyzerConfig {
        AnalyzerConfig {
            name: "pps".into(),
            filter: "ip".into(),
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
            threshold: Some(1000),
            mail_interval_secs: Some(60),
            addresses: vec!["10.0.0.0/24".to_string()],
            num_packets: Some(5),
        }
    }

    #[tokio::test]
    async fn credits_only_the_source_when_both_endpoints_are_internal() {
        let analyzer = PpsAnalyzer::new(&make_config(), "eth0".into(), Arc::new(NullAlerter::default())).unwrap();
        let frame = frame([10, 0, 0, 1], [10, 0, 0, 2]);
        let pkt = Packet::initialize(Timestamp::new(1, 0), frame.len() as u16, &frame).unwrap();
        analyzer.process_packet(&pkt);

        let src_session = analyzer.table.find(&0x0a000001).unwrap();
        assert_eq!(src_session.inner.lock().outgoing_packets, 1);
        assert!(analyzer.table.find(&0x0a000002).is_none());
    }

    #[tokio::test]
    async fn external_to_internal_counts_as_incoming() {
        let analyzer = PpsAnalyzer::new(&make_config(), "eth0".into(), Arc::new(NullAlerter::default())).unwrap();
        let frame = frame([203, 0, 113, 5], [10, 0, 0, 2]);
        let pkt = Packet::initialize(Timestamp::new(1, 0), frame.len() as u16, &frame).unwrap();
        analyzer.process_packet(&pkt);

        let session = analyzer.table.find(&0x0a000002).unwrap();
        assert_eq!(session.inner.lock().incoming_packets, 1);
    }

    #[test]
    fn human_size_formats_units() {
        assert_eq!(human_size(512), "512.00 B");
        assert_eq!(human_size(2048), "2.00 KiB");
    }
}
