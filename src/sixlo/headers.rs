//! 6LoWPAN dispatch bytes and the mesh/fragmentation header layouts
//! they introduce, per spec §4.5/§6 ("Mesh header `0b10xxxxxx` with
//! hops-left in low 4 bits; fragment headers `0xC0` (first) and `0xE0`
//! (subsequent)").
//!
//! Thread mesh-routes exclusively by Rloc16 (no extended-address mesh
//! hops), so unlike the general RFC4944 mesh header this one carries
//! two fixed 16-bit short addresses rather than a variable-length V/F
//! pair.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use byteorder::{BigEndian, ByteOrder};

use crate::addr::ShortAddress;
use crate::error::{Result, ThreadError};

/// Top-bits discriminator for a 6LoWPAN frame's leading dispatch byte.
///
/// This only classifies the byte a received frame *starts* with. The
/// NHC extension-header and UDP sub-dispatches (`0b1110xxxx` /
/// `0b1111_0xxx`) share the `FragN` range or only ever occur nested
/// inside an IPHC payload, never as a frame's first byte, so they have
/// no variant here; [`crate::sixlo::decompress`] parses them once it
/// already knows it is inside an IPHC payload.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dispatch {
    /// Not a LoWPAN frame; discard.
    Nalp,
    Mesh,
    Frag1,
    FragN,
    Iphc,
    Unknown,
}

pub fn classify(first_byte: u8) -> Dispatch {
    if first_byte & 0b1100_0000 == 0b1000_0000 {
        Dispatch::Mesh
    } else if first_byte == 0xc0 || (first_byte & 0b1111_1000) == 0xc0 {
        Dispatch::Frag1
    } else if (first_byte & 0b1111_1000) == 0xe0 {
        Dispatch::FragN
    } else if (first_byte & 0b1110_0000) == 0b0110_0000 {
        Dispatch::Iphc
    } else if first_byte == 0 {
        Dispatch::Nalp
    } else {
        Dispatch::Unknown
    }
}

/// Mesh header per spec §4.5: `{hopsLeft, source, destination}`, all
/// Rloc16 (short) addresses.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MeshHeader {
    pub hops_left: u8,
    pub origin: ShortAddress,
    pub destination: ShortAddress,
}

pub const MESH_HEADER_LEN: usize = 5;

impl MeshHeader {
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < MESH_HEADER_LEN {
            return Err(ThreadError::NoBufs);
        }
        buf[0] = 0b1000_0000 | (self.hops_left & 0x0f);
        BigEndian::write_u16(&mut buf[1..3], self.origin.0);
        BigEndian::write_u16(&mut buf[3..5], self.destination.0);
        Ok(MESH_HEADER_LEN)
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < MESH_HEADER_LEN {
            return Err(ThreadError::Parse);
        }
        if buf[0] & 0b1100_0000 != 0b1000_0000 {
            return Err(ThreadError::Parse);
        }
        let hops_left = buf[0] & 0x0f;
        let origin = ShortAddress(BigEndian::read_u16(&buf[1..3]));
        let destination = ShortAddress(BigEndian::read_u16(&buf[3..5]));
        Ok((Self { hops_left, origin, destination }, MESH_HEADER_LEN))
    }
}

/// Fragmentation header per spec §4.5: 4 bytes for the first fragment
/// (`{dispatch, totalSize, tag}`), 5 for subsequent ones (adds
/// `offsetInEighths`).
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FragHeader {
    /// Size of the full, unfragmented (compressed) datagram, in bytes.
    pub datagram_size: u16,
    pub datagram_tag: u16,
    /// `None` for the first fragment; `Some(offset / 8)` for later ones.
    pub offset_eighths: Option<u8>,
}

impl FragHeader {
    pub fn encoded_len(&self) -> usize {
        if self.offset_eighths.is_some() {
            5
        } else {
            4
        }
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let len = self.encoded_len();
        if buf.len() < len {
            return Err(ThreadError::NoBufs);
        }
        if self.datagram_size > 0x07ff {
            return Err(ThreadError::InvalidArgs);
        }
        let dispatch: u16 = if self.offset_eighths.is_some() { 0xe000 } else { 0xc000 };
        BigEndian::write_u16(&mut buf[0..2], dispatch | self.datagram_size);
        BigEndian::write_u16(&mut buf[2..4], self.datagram_tag);
        if let Some(off) = self.offset_eighths {
            buf[4] = off;
        }
        Ok(len)
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 4 {
            return Err(ThreadError::Parse);
        }
        let first = BigEndian::read_u16(&buf[0..2]);
        let is_subsequent = (buf[0] & 0b1111_1000) == 0xe0;
        let datagram_size = first & 0x07ff;
        let datagram_tag = BigEndian::read_u16(&buf[2..4]);
        if is_subsequent {
            if buf.len() < 5 {
                return Err(ThreadError::Parse);
            }
            Ok((
                Self { datagram_size, datagram_tag, offset_eighths: Some(buf[4]) },
                5,
            ))
        } else {
            Ok((Self { datagram_size, datagram_tag, offset_eighths: None }, 4))
        }
    }
}
