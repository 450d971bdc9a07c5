// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! End-to-end pipeline test: a captured HTTP request flows through
//! [`netsensor::analyzer::AnalyzerHost`]'s capture loop, the HTTP analyzer's
//! session table, the httplog subscriber, and the background writer, and
//! lands as a record in the per-hour store on disk — the full data flow
//! §2 describes, minus an actual NIC (fed via a [`FrameListSource`] instead
//! of `LiveCapture`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeZone;
use netsensor::analyzer::AnalyzerHost;
use netsensor::capture::{CapturedFrame, FrameListSource};
use netsensor::config::{AnalyzerConfig, Config};
use netsensor::store;
use netsensor::time::Timestamp;

fn http_request_frame(time_secs: u32) -> CapturedFrame {
    let mut frame = vec![0u8; 14];
    let mut ip = vec![0x45, 0, 0, 0, 0, 0, 0, 0, 64, 6, 0, 0];
    ip.extend_from_slice(&[10, 0, 0, 1]);
    ip.extend_from_slice(&[10, 0, 0, 2]);
    frame.extend_from_slice(&ip);
    let mut tcp = vec![0x04, 0x01, 0x00, 0x50]; // 1025 -> 80
    tcp.extend_from_slice(&[0, 0, 0, 0]); // seq
    tcp.extend_from_slice(&[0, 0, 0, 0]); // ack
    tcp.push(5 << 4); // data offset
    tcp.push(0x18);
    tcp.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
    frame.extend_from_slice(&tcp);
    frame.extend_from_slice(b"GET /report.csv HTTP/1.1\r\nHost: example.com\r\n\r\n");
    CapturedFrame {
        time: Timestamp::new(time_secs, 0),
        captured_len: frame.len() as u16,
        bytes: frame,
    }
}

fn analyzer_config(name: &str, filter: &str, data: Option<std::path::PathBuf>, dependencies: Vec<String>) -> AnalyzerConfig {
    AnalyzerConfig {
        name: name.to_string(),
        filter: filter.to_string(),
        timeout_secs: 0,
        max_sessions: 64,
        data,
        dependencies,
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

#[tokio::test]
async fn captured_http_request_is_persisted_through_the_full_pipeline() {
    let dir = tempfile::tempdir().unwrap();

    let config = Config {
        logging: true,
        log: None,
        interface: "lo".to_string(),
        flush_interval_secs: 1,
        analyzers: vec![
            analyzer_config("http", "tcp", None, Vec::new()),
            analyzer_config("httplog", "", Some(dir.path().to_path_buf()), vec!["http".to_string()]),
        ],
    };

    let host = Arc::new(AnalyzerHost::build(&config).unwrap());
    assert_eq!(host.filter_expression(), "(tcp)");

    let capture_time = 1_700_000_000u32;
    let source = FrameListSource::new(vec![http_request_frame(capture_time)]);

    let shutdown = Arc::new(AtomicBool::new(false));
    let run_shutdown = shutdown.clone();
    let run_handle = tokio::spawn(host.clone().run(Box::new(source), run_shutdown));

    // Give the capture loop a moment to dispatch the one frame, then let
    // the flush loop's periodic pass (idle timeout 0) sweep and persist it.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    shutdown.store(true, Ordering::SeqCst);
    run_handle.await.unwrap().unwrap();

    // The writer task runs independently of `run`'s own join; give its
    // queue a moment to drain the final flush before reading the file back.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let dt = chrono::Local
        .timestamp_opt((capture_time - capture_time % 3600) as i64, 0)
        .unwrap();
    let path = dir
        .path()
        .join(format!("{:04}", dt.format("%Y")))
        .join(format!("{:02}", dt.format("%m")))
        .join(format!("{:02}", dt.format("%d")))
        .join(format!("http_{:02}", dt.format("%H")));

    let records = store::read_all(&path).unwrap();
    assert_eq!(records.len(), 1);
    // version(1) + 2 MACs(12) + 2 ips(8) + 2 ports(4) + compression(1) = 26
    // bytes before the message count; just assert the method landed somewhere
    // in the record bytes as a sanity check on the on-disk layout.
    let haystack = String::from_utf8_lossy(&records[0].1);
    assert!(haystack.contains("GET"));
    assert!(haystack.contains("/report.csv"));
    assert!(haystack.contains("example.com"));
}
