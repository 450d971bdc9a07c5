// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Typed record appender, the Rust reading of the donor's `Writer<Flow>::Record`
//! (`sensor/include/writer.hpp`). Builds a contiguous big-endian byte string
//! with length-prefixed byte fields, per §3/§6.

use byteorder::{BigEndian, WriteBytesExt};

/// Accumulates a record's on-disk bytes. All multi-byte integers are
/// big-endian per §6; length-prefixed fields write a `u32` length followed
/// by the raw bytes.
#[derive(Default)]
pub struct RecordBuilder {
    buf: Vec<u8>,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.write_u16::<BigEndian>(v).unwrap();
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.write_u32::<BigEndian>(v).unwrap();
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.write_u64::<BigEndian>(v).unwrap();
        self
    }

    /// Raw bytes, no length prefix (used for fixed-width fields like MACs
    /// and wire-order addresses, whose length is implicit in the layout).
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// `u32` length prefix followed by `bytes`, per §6's `{ u32 len; bytes[len] }`.
    pub fn bytes32(&mut self, bytes: &[u8]) -> &mut Self {
        self.u32(bytes.len() as u32);
        self.raw(bytes);
        self
    }

    /// `u16` length prefix followed by `bytes`, used by the PJL layout.
    pub fn bytes16(&mut self, bytes: &[u8]) -> &mut Self {
        self.u16(bytes.len() as u16);
        self.raw(bytes);
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads fields back out of a record's bytes in the order they were written.
/// Used by the record-layout round-trip tests and would back the offline
/// dump utilities described in §1 as external collaborators.
pub struct RecordReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        RecordReader { buf, pos: 0 }
    }

    pub fn u8(&mut self) -> u8 {
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }

    pub fn u16(&mut self) -> u16 {
        let v = u16::from_be_bytes(self.buf[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        v
    }

    pub fn u32(&mut self) -> u32 {
        let v = u32::from_be_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    pub fn raw(&mut self, len: usize) -> &'a [u8] {
        let v = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        v
    }

    pub fn bytes32(&mut self) -> &'a [u8] {
        let len = self.u32() as usize;
        self.raw(len)
    }

    pub fn bytes16(&mut self) -> &'a [u8] {
        let len = self.u16() as usize;
        self.raw(len)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_fields() {
        let mut rb = RecordBuilder::new();
        rb.u8(1).u32(42).bytes32(b"GET").u16(7).bytes16(b"alice");
        let bytes = rb.into_vec();

        let mut rr = RecordReader::new(&bytes);
        assert_eq!(rr.u8(), 1);
        assert_eq!(rr.u32(), 42);
        assert_eq!(rr.bytes32(), b"GET");
        assert_eq!(rr.u16(), 7);
        assert_eq!(rr.bytes16(), b"alice");
        assert_eq!(rr.remaining(), 0);
    }
}
