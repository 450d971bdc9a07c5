// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HTTP record sink, the donor's `modules/httpLog/httpLog.cpp`: the only
//! thing this analyzer does is subscribe to [`super::http::HttpAnalyzer`]'s
//! completed sessions and push each one to a [`crate::writer`] background
//! writer, keyed by the record layout §6 specifies (`session.time.seconds`,
//! i.e. the session's creation time). It never looks at raw packets itself
//! — `capture_filter` is empty and `matches` always rejects — matching the
//! donor's split of parsing (`http`) from persistence (`httpLog`) into two
//! separate modules wired together by the `dependencies` mechanism in
//! §4.G.

use std::sync::Arc;

use crate::config::AnalyzerConfig;
use crate::error::{Result, SensorError};
use crate::packet::Packet;
use crate::writer::{self, WriterHandle};

use super::http::HttpSession;
use super::Analyzer;

pub struct HttpLogAnalyzer {
    name: String,
    writer: WriterHandle<HttpSession>,
}

impl HttpLogAnalyzer {
    pub fn new(conf: &AnalyzerConfig) -> Result<Self> {
        let root = conf
            .data
            .clone()
            .ok_or_else(|| SensorError::Config("httplog analyzer requires a 'data' directory".into()))?;
        let (writer, _join) = writer::spawn(root, "http", conf.timeout_secs, |rb, session: &HttpSession| {
            session.write_record(rb)
        })?;
        Ok(HttpLogAnalyzer {
            name: conf.name.clone(),
            writer,
        })
    }

    /// Invoked by the HTTP analyzer's flush pass for every session that
    /// reached idle timeout with at least one request or response.
    pub fn on_http_session(&self, session: Arc<HttpSession>) {
        let bucket_time = session.creation_time_seconds();
        self.writer.write(session, bucket_time);
    }
}

impl Analyzer for HttpLogAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture_filter(&self) -> &str {
        ""
    }

    fn matches(&self, _packet: &Packet<'_>) -> bool {
        false
    }

    fn process_packet(&self, _packet: &Packet<'_>) {
        unreachable!("httplog never matches a raw packet")
    }

    fn flush(&self) {
        self.writer.flush();
    }

    fn finish(&self) {
        self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::time::Timestamp;

    fn config(dir: &std::path::Path) -> AnalyzerConfig {
        AnalyzerConfig {
            name: "httplog".into(),
            filter: "".into(),
            timeout_secs: 300,
            max_sessions: 16,
            data: Some(dir.to_path_buf()),
            dependencies: vec!["http".into()],
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
    async fn persists_a_subscribed_session_to_the_http_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = HttpLogAnalyzer::new(&config(dir.path())).unwrap();

        let session = Arc::new(HttpSession::new(Timestamp::new(1_700_000_000, 0)));
        analyzer.on_http_session(session);
        analyzer.finish();

        // Give the writer task a moment to drain; flush() already waits for
        // the queue to empty before syncing, but the task itself still runs
        // on its own schedule.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let dt = chrono::Local
            .timestamp_opt(1_700_000_000i64 - (1_700_000_000i64 % 3600), 0)
            .unwrap();
        let path = dir
            .path()
            .join(format!("{:04}", dt.format("%Y")))
            .join(format!("{:02}", dt.format("%m")))
            .join(format!("{:02}", dt.format("%d")))
            .join(format!("http_{:02}", dt.format("%H")));
        assert!(path.exists());
    }
}
