// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HTTP/1.x session reconstruction, §4.H scenario group 1. Grounded on the
//! donor's `sensor/modules/http/http.cpp`.
//!
//! The donor parses request and response streams with two independent
//! `http_parser` instances per session and hangs a hand-rolled state machine
//! off four callbacks (`url`, `path`, `queryString`, `fragment`) that a
//! patched `http_parser` provides. The `http_muncher` binding used here only
//! exposes the stock callback set (`on_url` delivers the whole request
//! target, not pre-split into path/query/fragment), so the path/query/
//! fragment split happens in this module instead, in [`split_target`], once
//! the whole target string has been buffered across however many `on_url`
//! chunks it arrived in.
//!
//! This module only *parses* HTTP and hands completed sessions to
//! subscribers — it persists nothing itself. [`super::httplog`] is the
//! subscriber that serializes sessions to disk, matching the donor's split
//! between `modules/http` and `modules/httpLog`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use http_muncher::{Parser, ParserHandler};
use parking_lot::Mutex;

use crate::config::AnalyzerConfig;
use crate::error::Result;
use crate::flow::FlowId;
use crate::packet::{Packet, IPPROTO_TCP};
use crate::record::RecordBuilder;
use crate::session_table::SessionTable;
use crate::slab::Slab;
use crate::time::{unix_now, Timestamp};

use super::{warn_once, Analyzer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageKind {
    Request,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderState {
    Idle,
    Field,
    Value,
}

/// One parsed request or response. `message` holds the per-kind component
/// list §6 expects: `[method, path, query, fragment, "M.m"]` for a request,
/// `["M.m", status]` for a response.
pub(crate) struct HttpMessage {
    pub(crate) kind: MessageKind,
    pub(crate) time: Timestamp,
    pub(crate) message: Vec<String>,
    pub(crate) headers: Vec<(String, String)>,
}

impl HttpMessage {
    fn new(kind: MessageKind, time: Timestamp) -> Self {
        HttpMessage {
            kind,
            time,
            message: Vec::new(),
            headers: Vec::new(),
        }
    }
}

pub(crate) struct HttpInner {
    pub(crate) client_mac: [u8; 6],
    pub(crate) server_mac: [u8; 6],
    pub(crate) client_ip: u32,
    pub(crate) server_ip: u32,
    pub(crate) client_port: u16,
    pub(crate) server_port: u16,
    addressed: bool,
    request_header_state: HeaderState,
    response_header_state: HeaderState,
    request_url_buf: String,
    pub(crate) requests: Vec<HttpMessage>,
    pub(crate) responses: Vec<HttpMessage>,
}

impl Default for HttpInner {
    fn default() -> Self {
        HttpInner {
            client_mac: [0; 6],
            server_mac: [0; 6],
            client_ip: 0,
            server_ip: 0,
            client_port: 0,
            server_port: 0,
            addressed: false,
            request_header_state: HeaderState::Idle,
            response_header_state: HeaderState::Idle,
            request_url_buf: String::new(),
            requests: Vec::new(),
            responses: Vec::new(),
        }
    }
}

/// A reconstructed client/server HTTP conversation. The two directions get
/// their own `http_muncher` parser (each behind its own lock, independent of
/// `inner`, so a request packet and a response packet never contend on the
/// same mutex).
pub struct HttpSession {
    request_parser: Mutex<Parser>,
    response_parser: Mutex<Parser>,
    inner: Mutex<HttpInner>,
    last_update: AtomicU32,
    creation_time: Timestamp,
}

impl HttpSession {
    pub(crate) fn new(time: Timestamp) -> Self {
        HttpSession {
            request_parser: Mutex::new(Parser::request()),
            response_parser: Mutex::new(Parser::response()),
            inner: Mutex::new(HttpInner::default()),
            last_update: AtomicU32::new(time.seconds),
            creation_time: time,
        }
    }

    pub(crate) fn last_update(&self) -> u32 {
        self.last_update.load(Ordering::SeqCst)
    }

    pub(crate) fn creation_time_seconds(&self) -> u32 {
        self.creation_time.seconds
    }

    pub(crate) fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.requests.is_empty() && inner.responses.is_empty()
    }

    pub(crate) fn with_inner<R>(&self, f: impl FnOnce(&HttpInner) -> R) -> R {
        f(&self.inner.lock())
    }

    /// Serializes to the §6 HTTP record layout: fixed header, then every
    /// request followed by every response, each as
    /// `type, seconds, micros, numComponents, components[], numHeaders,
    /// (field, value)[]`.
    pub fn write_record(&self, rb: &mut RecordBuilder) {
        let inner = self.inner.lock();
        rb.u8(1)
            .raw(&inner.client_mac)
            .raw(&inner.server_mac)
            .u32(inner.client_ip)
            .u32(inner.server_ip)
            .u16(inner.client_port)
            .u16(inner.server_port)
            .u8(0)
            .u32((inner.requests.len() + inner.responses.len()) as u32);
        for m in inner.requests.iter().chain(inner.responses.iter()) {
            rb.u8(match m.kind {
                MessageKind::Request => 0,
                MessageKind::Response => 1,
            })
            .u32(m.time.seconds)
            .u32(m.time.microseconds)
            .u32(m.message.len() as u32);
            for component in &m.message {
                rb.bytes32(component.as_bytes());
            }
            rb.u32(m.headers.len() as u32);
            for (field, value) in &m.headers {
                rb.bytes32(field.as_bytes());
                rb.bytes32(value.as_bytes());
            }
        }
    }

    /// Feeds one packet's payload through the direction's parser.
    /// `is_request` is the table's forward/reverse hit flag: a forward hit
    /// (or a freshly opened session) is always the request direction, since
    /// every session's key is taken from its opening, client-to-server
    /// packet. Returns whether the parser consumed the entire payload.
    fn feed(&self, packet: &Packet<'_>, is_request: bool) -> bool {
        self.last_update.store(packet.time().seconds, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        let payload = packet.payload();
        if is_request {
            let mut parser = self.request_parser.lock();
            let mut handler = Handler {
                inner: &mut inner,
                is_request: true,
                packet,
            };
            parser.parse(&mut handler, payload) == payload.len()
        } else {
            let mut parser = self.response_parser.lock();
            let mut handler = Handler {
                inner: &mut inner,
                is_request: false,
                packet,
            };
            parser.parse(&mut handler, payload) == payload.len()
        }
    }
}

struct Handler<'a, 'p> {
    inner: &'a mut HttpInner,
    is_request: bool,
    packet: &'a Packet<'p>,
}

fn split_target(target: &str) -> (String, String, String) {
    let (rest, fragment) = match target.split_once('#') {
        Some((r, f)) => (r, f),
        None => (target, ""),
    };
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, q),
        None => (rest, ""),
    };
    (path.to_string(), query.to_string(), fragment.to_string())
}

impl<'a, 'p> ParserHandler for Handler<'a, 'p> {
    fn on_message_begin(&mut self, _parser: &mut Parser) -> bool {
        if self.is_request {
            if !self.inner.addressed {
                self.inner.client_mac = self.packet.source_mac();
                self.inner.server_mac = self.packet.destination_mac();
                self.inner.client_ip = self.packet.source_ip();
                self.inner.server_ip = self.packet.destination_ip();
                self.inner.client_port = self.packet.source_port();
                self.inner.server_port = self.packet.destination_port();
                self.inner.addressed = true;
            }
            self.inner.request_url_buf.clear();
            self.inner.request_header_state = HeaderState::Idle;
            self.inner.requests.push(HttpMessage::new(MessageKind::Request, self.packet.time()));
        } else {
            // No request was ever observed on this flow: take addressing
            // from the response direction instead, reversed.
            if self.inner.requests.is_empty() && self.inner.responses.is_empty() {
                self.inner.client_mac = self.packet.destination_mac();
                self.inner.server_mac = self.packet.source_mac();
                self.inner.client_ip = self.packet.destination_ip();
                self.inner.server_ip = self.packet.source_ip();
                self.inner.client_port = self.packet.destination_port();
                self.inner.server_port = self.packet.source_port();
                self.inner.addressed = true;
            }
            self.inner.response_header_state = HeaderState::Idle;
            self.inner.responses.push(HttpMessage::new(MessageKind::Response, self.packet.time()));
        }
        true
    }

    fn on_url(&mut self, _parser: &mut Parser, data: &[u8]) -> bool {
        self.inner.request_url_buf.push_str(&String::from_utf8_lossy(data));
        true
    }

    fn on_header_field(&mut self, _parser: &mut Parser, data: &[u8]) -> bool {
        let text = String::from_utf8_lossy(data).into_owned();
        let (state, message) = if self.is_request {
            (&mut self.inner.request_header_state, self.inner.requests.last_mut())
        } else {
            (&mut self.inner.response_header_state, self.inner.responses.last_mut())
        };
        let Some(message) = message else { return true };
        match *state {
            HeaderState::Field => {
                if let Some(last) = message.headers.last_mut() {
                    last.0.push_str(&text);
                }
            }
            HeaderState::Idle | HeaderState::Value => {
                message.headers.push((text, String::new()));
            }
        }
        *state = HeaderState::Field;
        true
    }

    fn on_header_value(&mut self, _parser: &mut Parser, data: &[u8]) -> bool {
        let text = String::from_utf8_lossy(data).into_owned();
        let (state, message) = if self.is_request {
            (&mut self.inner.request_header_state, self.inner.requests.last_mut())
        } else {
            (&mut self.inner.response_header_state, self.inner.responses.last_mut())
        };
        let Some(message) = message else { return true };
        match *state {
            HeaderState::Field => {
                if let Some(last) = message.headers.last_mut() {
                    last.1 = text;
                }
            }
            HeaderState::Value => {
                if let Some(last) = message.headers.last_mut() {
                    last.1.push_str(&text);
                }
            }
            HeaderState::Idle => {}
        }
        *state = HeaderState::Value;
        true
    }

    fn on_headers_complete(&mut self, parser: &mut Parser) -> bool {
        let (major, minor) = parser.http_version();
        if self.is_request {
            let method = parser.http_method().to_string();
            let (path, query, fragment) = split_target(&self.inner.request_url_buf);
            if let Some(message) = self.inner.requests.last_mut() {
                message.message = vec![method, path, query, fragment, format!("{major}.{minor}")];
            }
        } else {
            let status = parser.status_code();
            if let Some(message) = self.inner.responses.last_mut() {
                message.message = vec![format!("{major}.{minor}"), status.to_string()];
            }
        }
        true
    }
}

pub struct HttpAnalyzer {
    name: String,
    filter_expr: String,
    timeout_secs: u32,
    table: SessionTable<FlowId, HttpSession>,
    slab: Slab,
    warned: AtomicBool,
    subscribers: Mutex<Vec<Box<dyn Fn(Arc<HttpSession>) + Send + Sync>>>,
}

impl HttpAnalyzer {
    pub fn new(conf: &AnalyzerConfig, bucket_count: usize) -> Result<Self> {
        Ok(HttpAnalyzer {
            name: conf.name.clone(),
            filter_expr: conf.filter.clone(),
            timeout_secs: conf.timeout_secs,
            table: SessionTable::new(bucket_count),
            slab: Slab::new(conf.max_sessions),
            warned: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Registers a callback invoked with every session that reaches idle
    /// timeout with at least one request or response recorded — the
    /// donor's `consumers.consume(session)` in `http.cpp`'s `flush()`.
    pub fn register_subscriber(&self, f: impl Fn(Arc<HttpSession>) + Send + Sync + 'static) {
        self.subscribers.lock().push(Box::new(f));
    }
}

impl Analyzer for HttpAnalyzer {
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
        let forward = FlowId::new(
            packet.protocol(),
            packet.source_ip(),
            packet.destination_ip(),
            packet.source_port(),
            packet.destination_port(),
        );
        let reverse = forward.reverse();

        let mut matched_forward = true;
        let mut rejected = false;
        let result = self.table.find_or_open(
            forward,
            reverse,
            |session, is_forward| {
                matched_forward = is_forward;
                if !session.feed(packet, is_forward) {
                    rejected = true;
                }
            },
            || Some(HttpSession::new(packet.time())),
            &self.slab,
        );

        match result {
            None => warn_once(&self.warned, &self.name),
            Some(()) if rejected => {
                let key = if matched_forward { forward } else { reverse };
                if self.table.remove(&key).is_some() {
                    self.slab.release();
                }
            }
            Some(()) => {}
        }
    }

    fn flush(&self) {
        self.warned.store(false, Ordering::SeqCst);
        let now = unix_now();
        let subs = self.subscribers.lock();
        self.table.sweep(
            self.timeout_secs,
            now,
            |s| s.last_update(),
            |_flow, session| {
                if !session.is_empty() {
                    for sub in subs.iter() {
                        sub(session.clone());
                    }
                }
                self.slab.release();
            },
        );
    }
}
