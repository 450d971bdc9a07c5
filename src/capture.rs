// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Live capture, behind a small trait so the host's dispatch logic (4.G) is
//! exercised by tests without a NIC. Grounded on the donor's direct
//! `libpcap` usage (`sensor/sensor.cpp`: `pcap_open_live`, `pcap_compile` /
//! `pcap_setfilter` per analyzer filter union, `pcap_next` in the capture
//! loop) via the `pcap` crate, the idiomatic Rust libpcap binding.

use crate::error::{Result, SensorError};
use crate::time::Timestamp;

/// One captured frame, owned rather than borrowed from a libpcap buffer so
/// it can cross the trait boundary into a `Vec`-backed test source too.
pub struct CapturedFrame {
    pub time: Timestamp,
    pub captured_len: u16,
    pub bytes: Vec<u8>,
}

/// Abstracts over where raw frames come from: a live interface, or a fixed
/// `Vec` of frames for tests.
pub trait PacketSource: Send {
    /// Blocks until the next frame is available, or returns `Ok(None)` when
    /// the source is exhausted (test sources only; a live interface never
    /// returns `None` under normal operation).
    fn next(&mut self) -> Result<Option<CapturedFrame>>;

    /// Installs the compiled union of every subscribing analyzer's filter
    /// expression as the live capture filter (4.G "Filter composition").
    /// A no-op for non-live sources.
    fn set_filter(&mut self, expression: &str) -> Result<()>;
}

/// Live capture over a named interface via `libpcap`.
pub struct LiveCapture {
    capture: pcap::Capture<pcap::Active>,
}

impl LiveCapture {
    pub fn open(interface: &str) -> Result<Self> {
        let capture = pcap::Capture::from_device(interface)
            .map_err(|e| SensorError::Capture(e.to_string()))?
            .promisc(true)
            .snaplen(65535)
            .timeout(1000)
            .open()
            .map_err(|e| SensorError::Capture(e.to_string()))?;
        Ok(LiveCapture { capture })
    }
}

impl PacketSource for LiveCapture {
    fn next(&mut self) -> Result<Option<CapturedFrame>> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let ts = packet.header.ts;
                Ok(Some(CapturedFrame {
                    time: Timestamp::new(ts.tv_sec as u32, ts.tv_usec as u32),
                    captured_len: packet.header.caplen as u16,
                    bytes: packet.data.to_vec(),
                }))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(e) => Err(SensorError::Capture(e.to_string())),
        }
    }

    fn set_filter(&mut self, expression: &str) -> Result<()> {
        self.capture
            .filter(expression, true)
            .map_err(|e| SensorError::Capture(format!("filter '{expression}': {e}")))
    }
}

/// A fixed sequence of frames, for exercising the host's dispatch logic
/// (filter matching, per-analyzer routing) without a live interface.
pub struct FrameListSource {
    frames: std::vec::IntoIter<CapturedFrame>,
}

impl FrameListSource {
    pub fn new(frames: Vec<CapturedFrame>) -> Self {
        FrameListSource {
            frames: frames.into_iter(),
        }
    }
}

impl PacketSource for FrameListSource {
    fn next(&mut self) -> Result<Option<CapturedFrame>> {
        Ok(self.frames.next())
    }

    fn set_filter(&mut self, _expression: &str) -> Result<()> {
        Ok(())
    }
}
