// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Zero-copy accessors over a captured Ethernet/IPv4/{ICMP,TCP,UDP} frame.
//!
//! Mirrors the donor's raw-pointer-cast `Packet` class, re-architected per
//! the redesign notes as explicit big-endian reads over an immutable byte
//! slice rather than pointer casts into the capture buffer. A `Packet` never
//! outlives the slice it was built from.

use crate::time::Timestamp;

const ETHER_HEADER_LEN: usize = 14;
const IPV4_HEADER_LEN: usize = 20;
const ICMP_HEADER_LEN: usize = 8;
const UDP_HEADER_LEN: usize = 8;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// Immutable, zero-copy view over one captured frame.
///
/// Built once per captured frame and handed to every analyzer whose filter
/// matches; never retained beyond that dispatch call, since it borrows the
/// capture buffer.
pub struct Packet<'a> {
    time: Timestamp,
    captured_len: u16,
    bytes: &'a [u8],
    fragmented: bool,
    payload_offset: usize,
    payload_size: u16,
}

impl<'a> Packet<'a> {
    /// Builds a view over `bytes`, a captured frame of `captured_len` bytes
    /// (which may be less than `bytes.len()` if the caller over-allocated).
    /// Returns `None` for a malformed packet whose claimed header size would
    /// exceed the captured length — the dispatcher drops such frames.
    pub fn initialize(time: Timestamp, captured_len: u16, bytes: &'a [u8]) -> Option<Self> {
        let caplen = captured_len as usize;
        if bytes.len() < caplen || caplen < ETHER_HEADER_LEN + IPV4_HEADER_LEN {
            return None;
        }
        let ip_header = &bytes[ETHER_HEADER_LEN..ETHER_HEADER_LEN + IPV4_HEADER_LEN];
        let ip_off = u16::from_be_bytes([ip_header[6], ip_header[7]]);
        let fragmented = (ip_off & 0x2000) != 0 || (ip_off & 0x1fff) != 0;

        let (payload_offset, payload_size) = if fragmented {
            let hdr = ETHER_HEADER_LEN + IPV4_HEADER_LEN;
            (hdr, caplen.checked_sub(hdr)?)
        } else {
            let protocol = ip_header[9];
            match protocol {
                IPPROTO_ICMP => {
                    let hdr = ETHER_HEADER_LEN + IPV4_HEADER_LEN + ICMP_HEADER_LEN;
                    if hdr > caplen {
                        return None;
                    }
                    (hdr, caplen - hdr)
                }
                IPPROTO_TCP => {
                    if ETHER_HEADER_LEN + IPV4_HEADER_LEN + 12 >= caplen {
                        return None;
                    }
                    let data_offset = bytes[ETHER_HEADER_LEN + IPV4_HEADER_LEN + 12] >> 4;
                    let tcp_hdr_len = (data_offset as usize) * 4;
                    let hdr = ETHER_HEADER_LEN + IPV4_HEADER_LEN + tcp_hdr_len;
                    if hdr > caplen {
                        return None;
                    }
                    (hdr, caplen - hdr)
                }
                IPPROTO_UDP => {
                    let hdr = ETHER_HEADER_LEN + IPV4_HEADER_LEN + UDP_HEADER_LEN;
                    if hdr > caplen {
                        return None;
                    }
                    (hdr, caplen - hdr)
                }
                // Other protocols on unfragmented packets: payload size is
                // left undefined per 4.B; the dispatcher may still deliver
                // the packet based on filter match, but payload() must not
                // be called.
                _ => (ETHER_HEADER_LEN + IPV4_HEADER_LEN, 0),
            }
        };

        Some(Packet {
            time,
            captured_len,
            bytes: &bytes[..caplen],
            fragmented,
            payload_offset,
            payload_size: payload_size as u16,
        })
    }

    pub fn time(&self) -> Timestamp {
        self.time
    }

    pub fn captured_size(&self) -> u16 {
        self.captured_len
    }

    pub fn fragmented(&self) -> bool {
        self.fragmented
    }

    /// Raw bytes of the captured frame (Ethernet header onward).
    pub fn raw(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn source_mac(&self) -> [u8; 6] {
        self.bytes[6..12].try_into().unwrap()
    }

    pub fn destination_mac(&self) -> [u8; 6] {
        self.bytes[0..6].try_into().unwrap()
    }

    fn ip_header(&self) -> &'a [u8] {
        &self.bytes[ETHER_HEADER_LEN..ETHER_HEADER_LEN + IPV4_HEADER_LEN]
    }

    pub fn ttl(&self) -> u8 {
        self.ip_header()[8]
    }

    pub fn protocol(&self) -> u8 {
        self.ip_header()[9]
    }

    /// Network-order (numerically equal to wire order) source IPv4 address.
    pub fn source_ip(&self) -> u32 {
        u32::from_be_bytes(self.ip_header()[12..16].try_into().unwrap())
    }

    /// Network-order destination IPv4 address.
    pub fn destination_ip(&self) -> u32 {
        u32::from_be_bytes(self.ip_header()[16..20].try_into().unwrap())
    }

    fn l4_header(&self) -> &'a [u8] {
        &self.bytes[ETHER_HEADER_LEN + IPV4_HEADER_LEN..]
    }

    pub fn icmp_type(&self) -> u8 {
        self.l4_header()[0]
    }

    pub fn icmp_code(&self) -> u8 {
        self.l4_header()[1]
    }

    /// Network-order source port (TCP/UDP only).
    pub fn source_port(&self) -> u16 {
        u16::from_be_bytes(self.l4_header()[0..2].try_into().unwrap())
    }

    /// Network-order destination port (TCP/UDP only).
    pub fn destination_port(&self) -> u16 {
        u16::from_be_bytes(self.l4_header()[2..4].try_into().unwrap())
    }

    pub fn tcp_flags(&self) -> u8 {
        self.l4_header()[13]
    }

    pub fn payload_size(&self) -> u16 {
        self.payload_size
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[self.payload_offset..self.payload_offset + self.payload_size as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth_ipv4_udp(payload: &[u8], src_port: u16, dst_port: u16) -> Vec<u8> {
        let mut frame = vec![0u8; 14];
        // IPv4 header
        let mut ip = vec![0x45, 0, 0, 0, 0, 0, 0, 0, 64, IPPROTO_UDP, 0, 0];
        ip.extend_from_slice(&[10, 0, 0, 1]);
        ip.extend_from_slice(&[10, 0, 0, 2]);
        frame.extend_from_slice(&ip);
        let mut udp = vec![];
        udp.extend_from_slice(&src_port.to_be_bytes());
        udp.extend_from_slice(&dst_port.to_be_bytes());
        udp.extend_from_slice(&[0, 0, 0, 0]);
        frame.extend_from_slice(&udp);
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn unfragmented_udp_payload_offset() {
        let frame = eth_ipv4_udp(b"hello", 1025, 80);
        let len = frame.len() as u16;
        let pkt = Packet::initialize(Timestamp::new(1, 0), len, &frame).unwrap();
        assert!(!pkt.fragmented());
        assert_eq!(pkt.payload(), b"hello");
        assert_eq!(pkt.source_port(), 1025);
        assert_eq!(pkt.destination_port(), 80);
        assert_eq!(pkt.protocol(), IPPROTO_UDP);
    }

    /// A `caplen` of exactly 47 reaches `bytes[46]` (the TCP data-offset
    /// byte, `ETHER_HEADER_LEN + IPV4_HEADER_LEN + 12`) but no further; the
    /// guard must accept this rather than demanding one extra byte it never
    /// reads.
    #[test]
    fn tcp_header_byte_readable_exactly_at_caplen_47() {
        let mut frame = vec![0u8; 14];
        let mut ip = vec![0x45, 0, 0, 0, 0, 0, 0, 0, 64, IPPROTO_TCP, 0, 0];
        ip.extend_from_slice(&[10, 0, 0, 1]);
        ip.extend_from_slice(&[10, 0, 0, 2]);
        frame.extend_from_slice(&ip);
        let mut tcp = vec![0u8; 12];
        tcp.push(3 << 4); // data offset = 3 (12-byte header), at the last readable byte
        frame.extend_from_slice(&tcp);
        assert_eq!(frame.len(), 47);

        let pkt = Packet::initialize(Timestamp::new(1, 0), 47, &frame).unwrap();
        assert!(!pkt.fragmented());
        assert_eq!(pkt.payload_size(), 1);
    }

    #[test]
    fn truncated_udp_header_is_dropped() {
        let mut frame = eth_ipv4_udp(b"", 1025, 80);
        frame.truncate(14 + 20 + 4); // short of the 8-byte UDP header
        let len = frame.len() as u16;
        assert!(Packet::initialize(Timestamp::new(1, 0), len, &frame).is_none());
    }

    #[test]
    fn fragmented_packet_payload_starts_after_ip_header() {
        let mut frame = eth_ipv4_udp(b"fragment-data", 1025, 80);
        // Set the MF flag in the IP header's fragment-offset field.
        frame[14 + 6] = 0x20;
        let len = frame.len() as u16;
        let pkt = Packet::initialize(Timestamp::new(1, 0), len, &frame).unwrap();
        assert!(pkt.fragmented());
        // Payload includes the UDP header bytes too, since fragmentation
        // skips L4 header parsing entirely.
        assert_eq!(pkt.payload_size() as usize, frame.len() - 34);
    }
}
