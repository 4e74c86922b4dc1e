//! Generic Thread TLV (`type(1) | length(1) | value`) reader/writer,
//! shared by the Address Resolver's CoAP payloads and the Network
//! Data Leader's TLV store, per spec §6.
//!
//! Follows the teacher crate's `byte`/`byteorder` idiom for wire
//! structures rather than a derive-based framework.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use crate::error::{Result, ThreadError};

/// Thread TLV type identifiers carried in the Address Resolver's
/// CoAP payloads (spec §6). The low bit of the type byte is the
/// "stable" flag, carried separately.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TlvType {
    Target = 0,
    ExtMacAddress = 1,
    Rloc16 = 2,
    MeshLocalEid = 3,
    Status = 4,
    LastTransactionTime = 6,
}

/// Network Data sub-TLV identifiers (spec §3/§6), a distinct type
/// space from [`TlvType`] -- both happen to start numbering at 0.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetworkDataTlvType {
    HasRoute = 0,
    Prefix = 1,
    BorderRouter = 2,
    Context = 3,
}

/// One decoded TLV: its raw type byte (stable bit included) and value
/// slice borrowed from the source buffer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Tlv<'a> {
    pub raw_type: u8,
    pub value: &'a [u8],
}

impl<'a> Tlv<'a> {
    /// The TLV type with the stable bit masked off.
    pub fn kind(&self) -> u8 {
        self.raw_type & !STABLE_BIT
    }

    pub fn stable(&self) -> bool {
        self.raw_type & STABLE_BIT != 0
    }
}

const STABLE_BIT: u8 = 0b0000_0001;

/// Iterates `type | length | value` records out of a byte buffer,
/// stopping (without error) at the first malformed trailer so a
/// caller can treat a truncated buffer as "no more TLVs".
pub struct TlvIter<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> TlvIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }
}

impl<'a> Iterator for TlvIter<'a> {
    type Item = Tlv<'a>;

    fn next(&mut self) -> Option<Tlv<'a>> {
        if self.offset + 2 > self.buf.len() {
            return None;
        }
        let raw_type = self.buf[self.offset];
        let len = self.buf[self.offset + 1] as usize;
        let start = self.offset + 2;
        if start + len > self.buf.len() {
            return None;
        }
        let value = &self.buf[start..start + len];
        self.offset = start + len;
        Some(Tlv { raw_type, value })
    }
}

/// Appends one TLV record to `buf` at `offset`, returning the new
/// offset. Fails with `NoBufs` if the value (255 bytes max, plus the
/// 2-byte header) would not fit.
pub fn write_tlv(buf: &mut [u8], offset: usize, raw_type: u8, value: &[u8]) -> Result<usize> {
    if value.len() > u8::MAX as usize {
        return Err(ThreadError::InvalidArgs);
    }
    let end = offset + 2 + value.len();
    if end > buf.len() {
        return Err(ThreadError::NoBufs);
    }
    buf[offset] = raw_type;
    buf[offset + 1] = value.len() as u8;
    buf[offset + 2..end].copy_from_slice(value);
    Ok(end)
}

/// Finds the first TLV of the given (stable-bit-masked) kind.
pub fn find<'a>(buf: &'a [u8], kind: u8) -> Option<Tlv<'a>> {
    TlvIter::new(buf).find(|t| t.kind() == kind)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip_two_tlvs() {
        let mut buf = [0u8; 64];
        let mut off = 0;
        off = write_tlv(&mut buf, off, TlvType::Target as u8, &[1, 2, 3, 4]).unwrap();
        off = write_tlv(&mut buf, off, TlvType::Rloc16 as u8, &[0xab, 0xcd]).unwrap();

        let tlvs: heapless::Vec<Tlv, 4> = TlvIter::new(&buf[..off]).collect();
        assert_eq!(tlvs.len(), 2);
        assert_eq!(tlvs[0].kind(), TlvType::Target as u8);
        assert_eq!(tlvs[0].value, &[1, 2, 3, 4]);
        assert_eq!(tlvs[1].kind(), TlvType::Rloc16 as u8);
        assert_eq!(tlvs[1].value, &[0xab, 0xcd]);
    }

    #[test]
    fn stable_bit_separated_from_kind() {
        let mut buf = [0u8; 16];
        write_tlv(&mut buf, 0, (NetworkDataTlvType::Prefix as u8) | 1, &[0xaa]).unwrap();
        let t = TlvIter::new(&buf).next().unwrap();
        assert_eq!(t.kind(), NetworkDataTlvType::Prefix as u8);
        assert!(t.stable());
    }

    #[test]
    fn find_locates_by_kind() {
        let mut buf = [0u8; 32];
        let mut off = 0;
        off = write_tlv(&mut buf, off, TlvType::Status as u8, &[1]).unwrap();
        write_tlv(&mut buf, off, TlvType::Target as u8, &[9, 9]).unwrap();
        let t = find(&buf, TlvType::Target as u8).unwrap();
        assert_eq!(t.value, &[9, 9]);
    }

    #[test]
    fn overflow_fails_with_nobufs() {
        let mut buf = [0u8; 3];
        assert_eq!(
            write_tlv(&mut buf, 0, 0, &[1, 2, 3]),
            Err(ThreadError::NoBufs)
        );
    }
}
