// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The analyzer host, §4.G: loads the configured analyzers, composes their
//! capture filters into one union filter, dispatches every captured packet
//! to whichever analyzers want it, and drives the periodic flush pass.
//!
//! The donor loads each module from a `dlopen`'d shared object named by its
//! `modules` config entry (`modules/http/http.so`, `modules/bt/bt.so`, ...).
//! This crate has no plugin boundary to cross, so [`build`] matches the same
//! config-entry names against a fixed, closed set of concrete analyzer types
//! instead of resolving a symbol table. Declared `dependencies` are wired
//! the same way: rather than a generic subscriber registry keyed by `TypeId`
//! (overkill for the one supported edge — the BitTorrent tracker watching
//! HTTP's completed sessions), [`build`] keeps each analyzer's concrete
//! handle around while constructing the set and calls its subscriber method
//! directly.

pub mod http;
pub mod httplog;
pub mod pjl;
pub mod pps;
pub mod tracker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::warn;

use crate::alert::SmtpAlerter;
use crate::capture::PacketSource;
use crate::config::Config;
use crate::error::{Result, SensorError};
use crate::packet::Packet;

use http::HttpAnalyzer;
use httplog::HttpLogAnalyzer;
use pjl::PjlAnalyzer;
use pps::PpsAnalyzer;
use tracker::UdpTrackerAnalyzer;

/// One protocol analyzer. `capture_filter`/`matches` split the pcap-level
/// filter (what a packet must look like at the wire to reach any analyzer
/// at all) from the in-process dispatch predicate (which *configured*
/// analyzer this particular packet belongs to) — the host compiles the
/// union of every `capture_filter()` once, at startup, and then re-checks
/// `matches()` itself per packet per analyzer, rather than re-evaluating
/// compiled BPF per analyzer per packet.
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    /// A pcap filter expression, folded into the host's union filter. An
    /// analyzer that never looks at raw packets (httplog, which only
    /// subscribes to HTTP's completed sessions) returns `""`.
    fn capture_filter(&self) -> &str;

    /// Whether this specific analyzer wants this specific packet.
    fn matches(&self, packet: &Packet<'_>) -> bool;

    fn process_packet(&self, packet: &Packet<'_>);

    /// Invoked once per flush interval (4.E/4.F's periodic sweep).
    fn flush(&self);

    /// Invoked once at shutdown, after the capture loop has stopped and one
    /// final flush has run. Most analyzers have nothing extra to do here;
    /// the default is a no-op.
    fn finish(&self) {}
}

fn bucket_count_for(max_sessions: usize) -> usize {
    (max_sessions / 8).max(16)
}

/// Owns every configured analyzer and drives capture + flush.
pub struct AnalyzerHost {
    analyzers: Vec<Arc<dyn Analyzer>>,
    filter_expr: String,
    flush_interval_secs: u64,
}

impl AnalyzerHost {
    /// Builds every analyzer named in `config.analyzers`, then wires
    /// declared `dependencies` between them. Fails per §7 kind-1 conditions:
    /// an analyzer naming itself as a dependency, naming an analyzer that
    /// isn't configured, naming a dependency that exports no callback at
    /// all, or a dependent that doesn't implement the one subscription path
    /// this host understands.
    pub fn build(config: &Config) -> Result<Self> {
        let mut http: Option<Arc<HttpAnalyzer>> = None;
        let mut httplog: Option<Arc<HttpLogAnalyzer>> = None;
        let mut bittorrent: Option<Arc<UdpTrackerAnalyzer>> = None;
        let mut analyzers: Vec<Arc<dyn Analyzer>> = Vec::new();
        let mut names: Vec<String> = Vec::new();

        for ac in &config.analyzers {
            let analyzer: Arc<dyn Analyzer> = match ac.name.as_str() {
                "http" => {
                    let a = Arc::new(HttpAnalyzer::new(ac, bucket_count_for(ac.max_sessions))?);
                    http = Some(a.clone());
                    a
                }
                "httplog" => {
                    let a = Arc::new(HttpLogAnalyzer::new(ac)?);
                    httplog = Some(a.clone());
                    a
                }
                "bittorrent" => {
                    let alerter = Arc::new(SmtpAlerter::from_config(ac)?);
                    let a = Arc::new(UdpTrackerAnalyzer::new(
                        ac,
                        bucket_count_for(ac.max_sessions),
                        alerter,
                    )?);
                    bittorrent = Some(a.clone());
                    a
                }
                "pjl" => Arc::new(PjlAnalyzer::new(ac, bucket_count_for(ac.max_sessions))?),
                "pps" => {
                    let alerter = Arc::new(SmtpAlerter::from_config(ac)?);
                    Arc::new(PpsAnalyzer::new(ac, config.interface.clone(), alerter)?)
                }
                other => {
                    return Err(SensorError::Config(format!("unknown analyzer kind '{other}'")));
                }
            };
            names.push(ac.name.clone());
            analyzers.push(analyzer);
        }

        for ac in &config.analyzers {
            for dep in &ac.dependencies {
                if dep == "packet" {
                    continue;
                }
                if dep == &ac.name {
                    return Err(SensorError::Startup(format!(
                        "analyzer '{}' depends on itself",
                        ac.name
                    )));
                }
                if !names.iter().any(|n| n == dep) {
                    return Err(SensorError::Startup(format!(
                        "analyzer '{}' depends on unconfigured analyzer '{}'",
                        ac.name, dep
                    )));
                }
                match (ac.name.as_str(), dep.as_str()) {
                    ("httplog", "http") => {
                        let http = http.clone().ok_or_else(|| {
                            SensorError::Startup("httplog depends on http, but http did not build".into())
                        })?;
                        let log = httplog.clone().ok_or_else(|| {
                            SensorError::Startup("httplog failed to build before wiring".into())
                        })?;
                        http.register_subscriber(move |session| log.on_http_session(session));
                    }
                    ("bittorrent", "http") => {
                        let http = http.clone().ok_or_else(|| {
                            SensorError::Startup("bittorrent depends on http, but http did not build".into())
                        })?;
                        let bt = bittorrent.clone().ok_or_else(|| {
                            SensorError::Startup("bittorrent failed to build before wiring".into())
                        })?;
                        http.register_subscriber(move |session| bt.on_http_session(&session));
                    }
                    (_, "http") => {
                        return Err(SensorError::Startup(format!(
                            "analyzer '{}' depends on 'http', but does not implement an http subscriber",
                            ac.name
                        )));
                    }
                    (_, other) => {
                        return Err(SensorError::Startup(format!(
                            "analyzer '{}' depends on '{}', which exports no callback",
                            ac.name, other
                        )));
                    }
                }
            }
        }

        let filter_expr = analyzers
            .iter()
            .map(|a| a.capture_filter())
            .filter(|f| !f.is_empty())
            .map(|f| format!("({f})"))
            .collect::<Vec<_>>()
            .join(" or ");

        Ok(AnalyzerHost {
            analyzers,
            filter_expr,
            flush_interval_secs: config.flush_interval_secs,
        })
    }

    /// The union capture filter every subscribing analyzer contributed to,
    /// for installing on the live capture before the capture loop starts.
    /// Empty when no configured analyzer looks at raw packets at all.
    pub fn filter_expression(&self) -> &str {
        &self.filter_expr
    }

    fn dispatch(&self, packet: &Packet<'_>) {
        for analyzer in &self.analyzers {
            if analyzer.matches(packet) {
                analyzer.process_packet(packet);
            }
        }
    }

    fn flush_all(&self) {
        for analyzer in &self.analyzers {
            analyzer.flush();
        }
    }

    fn finish_all(&self) {
        for analyzer in &self.analyzers {
            analyzer.finish();
        }
    }

    /// Runs the capture loop (on a blocking thread, since `PacketSource` is
    /// a synchronous, blocking interface like libpcap itself) alongside the
    /// async flush loop, until `shutdown` is set. Mirrors §5's two threads:
    /// one blocked in `pcap_next`, one sleeping `flush_interval_secs` at a
    /// time.
    pub async fn run(self: Arc<Self>, mut source: Box<dyn PacketSource>, shutdown: Arc<AtomicBool>) -> Result<()> {
        let flush_host = self.clone();
        let flush_shutdown = shutdown.clone();
        let flush_task = tokio::spawn(async move {
            flush_host.flush_loop(flush_shutdown).await;
        });

        let capture_host = self.clone();
        let capture_shutdown = shutdown.clone();
        let capture_result = tokio::task::spawn_blocking(move || {
            capture_host.capture_loop(source.as_mut(), capture_shutdown)
        })
        .await;

        shutdown.store(true, Ordering::SeqCst);
        let _ = flush_task.await;
        self.finish_all();

        match capture_result {
            Ok(inner) => inner,
            Err(e) => Err(SensorError::Startup(format!("capture thread panicked: {e}"))),
        }
    }

    fn capture_loop(&self, source: &mut dyn PacketSource, shutdown: Arc<AtomicBool>) -> Result<()> {
        while !shutdown.load(Ordering::SeqCst) {
            match source.next()? {
                Some(frame) => {
                    if let Some(packet) = Packet::initialize(frame.time, frame.captured_len, &frame.bytes) {
                        self.dispatch(&packet);
                    }
                }
                None => continue,
            }
        }
        Ok(())
    }

    async fn flush_loop(&self, shutdown: Arc<AtomicBool>) {
        let interval = Duration::from_secs(self.flush_interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.flush_all();
        }
        // One last flush so sessions idle at shutdown still get recorded.
        self.flush_all();
    }
}

pub(crate) fn warn_once(already_warned: &AtomicBool, analyzer: &str) {
    if !already_warned.swap(true, Ordering::SeqCst) {
        warn!(analyzer, "session table is full; dropping packet");
    }
}
