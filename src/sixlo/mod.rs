//! 6LoWPAN IPHC compression/decompression, spec §4.4.
//!
//! Mirrors OpenThread's `Lowpan::Compress`/`Lowpan::Decompress`: a
//! single pass over a plain [`Ipv6Header`] (plus an optional
//! [`UdpHeader`]) producing the `0b011`-dispatched LOWPAN_IPHC byte
//! sequence, and its inverse. Both directions need the link-layer
//! source/destination addresses to derive or confirm elided IIDs, via
//! the same [`crate::addr::compute_iid`] used by the rest of the core.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

pub mod context;
pub mod headers;

use heapless::Vec;

use crate::addr::{compute_iid, MacAddress, V6Addr};
use crate::error::{Result, ThreadError};
use context::ContextTable;

/// Next-header value for UDP (IANA protocol 17).
pub const PROTO_UDP: u8 = 17;
/// Next-header value for the IPv6 Hop-by-Hop Options header.
pub const PROTO_HOP_OPTS: u8 = 0;

/// Max inline option bytes carried in an extension-header NHC encoding.
pub const MAX_EXT_HEADER_OPTIONS: usize = 16;

const IPHC_DISPATCH: u8 = 0b0110_0000;
const UDP_NHC_DISPATCH: u8 = 0b1111_0000;
const EXT_HEADER_NHC_DISPATCH: u8 = 0b1110_0000;
const EXT_HEADER_EID_HOP_BY_HOP: u8 = 0;

/// Plain (uncompressed) IPv6 header fields the codec operates on.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ipv6Header {
    pub traffic_class: u8,
    pub flow_label: u32,
    pub next_header: u8,
    pub hop_limit: u8,
    pub src: V6Addr,
    pub dst: V6Addr,
}

/// Plain (uncompressed) UDP header fields.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub checksum: u16,
}

/// An IPv6 extension header (currently only Hop-by-Hop Options is
/// compressed via NHC; anything else is carried inline as `next_header`
/// on the enclosing [`Ipv6Header`]).
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExtHeader {
    /// Next header value following this extension header, uncompressed.
    pub next_header: u8,
    pub options: Vec<u8, MAX_EXT_HEADER_OPTIONS>,
}

struct Cursor<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn push(&mut self, byte: u8) -> Result<()> {
        let slot = self.buf.get_mut(self.pos).ok_or(ThreadError::NoBufs)?;
        *slot = byte;
        self.pos += 1;
        Ok(())
    }

    fn push_slice(&mut self, bytes: &[u8]) -> Result<()> {
        if self.pos + bytes.len() > self.buf.len() {
            return Err(ThreadError::NoBufs);
        }
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }
}

/// Compresses `ip` (and, if present, `ext` and/or `udp`) into `out`,
/// using `contexts` for any non-link-local address shortcuts and
/// `mac_src`/`mac_dst` to decide how much of each address's IID can be
/// elided.
///
/// `ext` is only compressed when `ip.next_header` is
/// [`PROTO_HOP_OPTS`]; `udp` is only compressed when the header
/// immediately following IPHC (`ip.next_header`, or `ext.next_header`
/// when an extension header is present) is [`PROTO_UDP`]. Any other
/// combination falls back to an inline next-header byte.
///
/// Returns the number of bytes written.
pub fn compress(
    ip: &Ipv6Header,
    ext: Option<&ExtHeader>,
    udp: Option<&UdpHeader>,
    mac_src: MacAddress,
    mac_dst: MacAddress,
    contexts: &ContextTable,
    out: &mut [u8],
) -> Result<usize> {
    let mut cur = Cursor::new(out);
    cur.push(0)?; // byte0 placeholder
    cur.push(0)?; // byte1 placeholder
    let mut byte0 = IPHC_DISPATCH;
    let mut byte1 = 0u8;

    let src_ctx = contexts.find_for(&ip.src);
    let dst_ctx = if ip.dst.is_multicast() { None } else { contexts.find_for(&ip.dst) };
    let cid_src = src_ctx.map(|(id, _)| id).unwrap_or(0);
    let cid_dst = dst_ctx.map(|(id, _)| id).unwrap_or(0);
    if cid_src != 0 || cid_dst != 0 {
        byte1 |= 0b1000_0000;
        cur.push((cid_src << 4) | cid_dst)?;
    }

    // Traffic class / flow label (spec §4.4: elide TC iff its top 4 bits
    // are zero, elide FL iff the 20-bit label is zero, independently).
    let tc_zero = (ip.traffic_class & 0xf0) == 0;
    let fl_zero = ip.flow_label & 0x000f_ffff == 0;
    match (tc_zero, fl_zero) {
        (true, true) => byte0 |= 0b0001_1000, // TF=11
        (true, false) => {
            byte0 |= 0b0000_1000; // TF=01
            let v = ip.flow_label & 0x000f_ffff;
            cur.push_slice(&[(v >> 16) as u8, (v >> 8) as u8, v as u8])?;
        }
        (false, true) => {
            byte0 |= 0b0001_0000; // TF=10
            cur.push(ip.traffic_class)?;
        }
        (false, false) => {
            // TF=00: traffic class byte, then 4 pad bits + 20-bit FL.
            let v = ip.flow_label & 0x000f_ffff;
            cur.push(ip.traffic_class)?;
            cur.push_slice(&[(v >> 16) as u8, (v >> 8) as u8, v as u8])?;
        }
    }

    let nh_is_ext = ext.is_some() && ip.next_header == PROTO_HOP_OPTS;
    let nh_is_udp = !nh_is_ext && udp.is_some() && ip.next_header == PROTO_UDP;
    let nh_compressed = nh_is_ext || nh_is_udp;
    if nh_compressed {
        byte0 |= 0b0000_0100;
    } else {
        cur.push(ip.next_header)?;
    }

    match ip.hop_limit {
        1 => byte0 |= 0b0000_0001,
        64 => byte0 |= 0b0000_0010,
        255 => byte0 |= 0b0000_0011,
        other => cur.push(other)?,
    }

    encode_source_addr(ip, mac_src, src_ctx.is_some(), &mut byte1, &mut cur)?;
    encode_dest_addr(ip, mac_dst, dst_ctx.is_some(), &mut byte1, &mut cur)?;

    if nh_is_ext {
        let ext = ext.expect("nh_is_ext implies ext");
        encode_ext_header(ext, udp, &mut cur)?;
    } else if nh_is_udp {
        let udp = udp.expect("nh_is_udp implies udp");
        encode_udp(udp, &mut cur)?;
    }

    cur.buf[0] = byte0;
    cur.buf[1] = byte1;
    Ok(cur.pos)
}

fn encode_source_addr(
    ip: &Ipv6Header,
    mac_src: MacAddress,
    has_context: bool,
    byte1: &mut u8,
    cur: &mut Cursor,
) -> Result<()> {
    if ip.src.is_unspecified() {
        *byte1 |= 0b0100_0000; // SAC=1, SAM=00: unspecified address
        return Ok(());
    }
    let allow_compression = has_context || ip.src.is_link_local();
    if has_context {
        *byte1 |= 0b0100_0000; // SAC=1
    }
    if !allow_compression {
        cur.push_slice(&ip.src.0)?; // SAM=00, full address
        return Ok(());
    }
    let derived = compute_iid(mac_src);
    let iid = ip.src.iid();
    if iid == derived {
        *byte1 |= 0b0011_0000; // SAM=11, 0 bytes
    } else if iid[0..6] == derived[0..6] {
        *byte1 |= 0b0010_0000; // SAM=10, 2 bytes
        cur.push_slice(&iid[6..8])?;
    } else {
        *byte1 |= 0b0001_0000; // SAM=01, 8 bytes
        cur.push_slice(&iid)?;
    }
    Ok(())
}

fn encode_dest_addr(
    ip: &Ipv6Header,
    mac_dst: MacAddress,
    has_context: bool,
    byte1: &mut u8,
    cur: &mut Cursor,
) -> Result<()> {
    if ip.dst.is_multicast() {
        *byte1 |= 0b0000_1000; // M=1
        let a = &ip.dst.0;
        if a[1] == 0x02 && a[2..15] == [0u8; 13] {
            *byte1 |= 0b0000_0011; // DAM=11, 1 byte
            cur.push(a[15])?;
        } else if a[2..11] == [0u8; 9] {
            *byte1 |= 0b0000_0010; // DAM=10, 4 bytes
            cur.push(a[1])?;
            cur.push_slice(&a[13..16])?;
        } else if a[2..9] == [0u8; 7] {
            *byte1 |= 0b0000_0001; // DAM=01, 6 bytes
            cur.push(a[1])?;
            cur.push_slice(&a[9..16])?;
        } else {
            cur.push_slice(a)?; // DAM=00, full address
        }
        return Ok(());
    }

    let allow_compression = has_context || ip.dst.is_link_local();
    if has_context {
        *byte1 |= 0b0000_0100; // DAC=1
    }
    if !allow_compression {
        cur.push_slice(&ip.dst.0)?; // DAM=00, full address
        return Ok(());
    }
    let derived = compute_iid(mac_dst);
    let iid = ip.dst.iid();
    if iid == derived {
        *byte1 |= 0b0000_0011; // DAM=11
    } else if iid[0..6] == derived[0..6] {
        *byte1 |= 0b0000_0010; // DAM=10
        cur.push_slice(&iid[6..8])?;
    } else {
        *byte1 |= 0b0000_0001; // DAM=01
        cur.push_slice(&iid)?;
    }
    Ok(())
}

/// Encodes `ext` as a Hop-by-Hop extension-header NHC: a `1110_eid_nh`
/// dispatch byte, a length byte, the raw option bytes, then either the
/// compressed UDP header (if `nh`=1) or a plain next-header byte.
fn encode_ext_header(ext: &ExtHeader, udp: Option<&UdpHeader>, cur: &mut Cursor) -> Result<()> {
    let inner_is_udp = udp.is_some() && ext.next_header == PROTO_UDP;
    let nh_bit = if inner_is_udp { 1 } else { 0 };
    cur.push(EXT_HEADER_NHC_DISPATCH | (EXT_HEADER_EID_HOP_BY_HOP << 1) | nh_bit)?;
    if ext.options.len() > u8::MAX as usize {
        return Err(ThreadError::InvalidArgs);
    }
    cur.push(ext.options.len() as u8)?;
    cur.push_slice(&ext.options)?;
    if inner_is_udp {
        encode_udp(udp.expect("inner_is_udp implies udp"), cur)
    } else {
        cur.push(ext.next_header)
    }
}

fn encode_udp(udp: &UdpHeader, cur: &mut Cursor) -> Result<()> {
    let src_short = (0xf0b0..=0xf0bf).contains(&udp.src_port);
    let dst_short = (0xf0b0..=0xf0bf).contains(&udp.dst_port);
    if src_short && dst_short {
        cur.push(UDP_NHC_DISPATCH | 0b0000_0011)?;
        cur.push((((udp.src_port & 0xf) as u8) << 4) | (udp.dst_port & 0xf) as u8)?;
    } else if dst_short {
        cur.push(UDP_NHC_DISPATCH | 0b0000_0001)?;
        cur.push_slice(&udp.src_port.to_be_bytes())?;
        cur.push((udp.dst_port & 0xf) as u8)?;
    } else if src_short {
        cur.push(UDP_NHC_DISPATCH | 0b0000_0010)?;
        cur.push((udp.src_port & 0xf) as u8)?;
        cur.push_slice(&udp.dst_port.to_be_bytes())?;
    } else {
        cur.push(UDP_NHC_DISPATCH)?;
        cur.push_slice(&udp.src_port.to_be_bytes())?;
        cur.push_slice(&udp.dst_port.to_be_bytes())?;
    }
    cur.push_slice(&udp.checksum.to_be_bytes())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn byte(&mut self) -> Result<u8> {
        let b = *self.buf.get(self.pos).ok_or(ThreadError::Parse)?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(ThreadError::Parse);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }
}

/// Decompresses a LOWPAN_IPHC-prefixed buffer back into an
/// [`Ipv6Header`], the extension header it carried (if any), and
/// `Some(UdpHeader)` when the innermost next header was compressed.
/// Returns `(ip, ext, udp, bytes_consumed)`.
pub fn decompress(
    buf: &[u8],
    mac_src: MacAddress,
    mac_dst: MacAddress,
    contexts: &ContextTable,
) -> Result<(Ipv6Header, Option<ExtHeader>, Option<UdpHeader>, usize)> {
    let mut r = Reader::new(buf);
    let byte0 = r.byte()?;
    if byte0 & 0b1110_0000 != IPHC_DISPATCH {
        return Err(ThreadError::Parse);
    }
    let byte1 = r.byte()?;

    let mut cid_src = 0u8;
    let mut cid_dst = 0u8;
    if byte1 & 0b1000_0000 != 0 {
        let cid = r.byte()?;
        cid_src = cid >> 4;
        cid_dst = cid & 0x0f;
    }

    let tf = (byte0 >> 3) & 0b11;
    let (traffic_class, flow_label) = match tf {
        0b11 => (0u8, 0u32),
        0b01 => {
            let b = r.take(3)?;
            (0u8, ((b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32) & 0x000f_ffff)
        }
        0b10 => (r.byte()?, 0u32),
        _ => {
            let tc = r.byte()?;
            let b = r.take(3)?;
            (tc, ((b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32) & 0x000f_ffff)
        }
    };

    let nh_compressed = byte0 & 0b0000_0100 != 0;
    let next_header_inline = if nh_compressed { None } else { Some(r.byte()?) };

    let hop_limit = match byte0 & 0b11 {
        0b01 => 1,
        0b10 => 64,
        0b11 => 255,
        _ => r.byte()?,
    };

    let sac = byte1 & 0b0100_0000 != 0;
    let sam = (byte1 >> 4) & 0b11;
    let src = decode_addr(&mut r, sac, sam, mac_src, cid_src, contexts)?;

    let m = byte1 & 0b0000_1000 != 0;
    let dac = byte1 & 0b0000_0100 != 0;
    let dam = byte1 & 0b11;
    let dst = if m {
        decode_multicast(&mut r, dam)?
    } else {
        decode_addr(&mut r, dac, dam, mac_dst, cid_dst, contexts)?
    };

    let (next_header, ext, udp) = if nh_compressed {
        decode_nhc(&mut r)?
    } else {
        (next_header_inline.expect("not nh_compressed implies inline next header was read"), None, None)
    };

    let ip = Ipv6Header { traffic_class, flow_label, next_header, hop_limit, src, dst };

    Ok((ip, ext, udp, r.pos))
}

/// Dispatches the byte following an elided next-header field to either
/// the extension-header NHC decoder or plain UDP NHC decoder, based on
/// the `1110` vs `1111_0` top-bit pattern. The two ranges never overlap
/// once already nested inside an IPHC payload, unlike at the frame
/// dispatch level where the extension-header range collides with
/// `FragN`.
fn decode_nhc(r: &mut Reader) -> Result<(u8, Option<ExtHeader>, Option<UdpHeader>)> {
    let dispatch = *r.buf.get(r.pos).ok_or(ThreadError::Parse)?;
    if dispatch & 0b1111_0000 == EXT_HEADER_NHC_DISPATCH {
        let (ext, udp) = decode_ext_header(r)?;
        Ok((PROTO_HOP_OPTS, Some(ext), udp))
    } else {
        let udp = decode_udp(r)?;
        Ok((PROTO_UDP, None, Some(udp)))
    }
}

/// Decodes a Hop-by-Hop extension-header NHC: dispatch byte, length
/// byte, raw option bytes, then either a nested compressed UDP header
/// or a plain next-header byte.
fn decode_ext_header(r: &mut Reader) -> Result<(ExtHeader, Option<UdpHeader>)> {
    let dispatch = r.byte()?;
    let eid = (dispatch >> 1) & 0b111;
    if eid != EXT_HEADER_EID_HOP_BY_HOP {
        return Err(ThreadError::Parse);
    }
    let nh_bit = dispatch & 1;
    let len = r.byte()? as usize;
    let bytes = r.take(len)?;
    let mut options: Vec<u8, MAX_EXT_HEADER_OPTIONS> = Vec::new();
    options.extend_from_slice(bytes).map_err(|_| ThreadError::NoBufs)?;
    if nh_bit != 0 {
        let udp = decode_udp(r)?;
        Ok((ExtHeader { next_header: PROTO_UDP, options }, Some(udp)))
    } else {
        let next_header = r.byte()?;
        Ok((ExtHeader { next_header, options }, None))
    }
}

fn context_prefix(contexts: &ContextTable, id: u8) -> Result<[u8; 8]> {
    let ctx = contexts.get(id).ok_or(ThreadError::Parse)?;
    let mut p = [0u8; 8];
    p.copy_from_slice(&ctx.prefix[0..8]);
    Ok(p)
}

fn decode_addr(
    r: &mut Reader,
    ac: bool,
    am: u8,
    mac: MacAddress,
    cid: u8,
    contexts: &ContextTable,
) -> Result<V6Addr> {
    if ac && am == 0 {
        return Ok(V6Addr::UNSPECIFIED);
    }
    let prefix = if ac { context_prefix(contexts, cid)? } else { [0xfe, 0x80, 0, 0, 0, 0, 0, 0] };
    let derived = compute_iid(mac);
    let iid = match am {
        0b00 => {
            let full = r.take(16)?;
            let mut a = [0u8; 16];
            a.copy_from_slice(full);
            return Ok(V6Addr(a));
        }
        0b01 => {
            let b = r.take(8)?;
            let mut iid = [0u8; 8];
            iid.copy_from_slice(b);
            iid
        }
        0b10 => {
            let b = r.take(2)?;
            let mut iid = derived;
            iid[6] = b[0];
            iid[7] = b[1];
            iid
        }
        _ => derived,
    };
    Ok(V6Addr::with_iid(prefix, iid))
}

fn decode_multicast(r: &mut Reader, dam: u8) -> Result<V6Addr> {
    let mut a = [0u8; 16];
    a[0] = 0xff;
    match dam {
        0b00 => {
            let full = r.take(16)?;
            a.copy_from_slice(full);
        }
        0b01 => {
            let b = r.take(6)?;
            a[1] = b[0];
            a[9..16].copy_from_slice(&b[1..6]);
        }
        0b10 => {
            let b = r.take(4)?;
            a[1] = b[0];
            a[13..16].copy_from_slice(&b[1..4]);
        }
        _ => {
            let b = r.take(1)?;
            a[1] = 0x02;
            a[15] = b[0];
        }
    }
    Ok(V6Addr(a))
}

fn decode_udp(r: &mut Reader) -> Result<UdpHeader> {
    let dispatch = r.byte()?;
    if dispatch & 0b1111_1000 != UDP_NHC_DISPATCH {
        return Err(ThreadError::Parse);
    }
    let (src_port, dst_port) = match dispatch & 0b11 {
        0b11 => {
            let b = r.byte()?;
            (0xf0b0u16 | (b >> 4) as u16, 0xf0b0u16 | (b & 0xf) as u16)
        }
        0b01 => {
            let src = u16::from_be_bytes(r.take(2)?.try_into().unwrap());
            let dst = 0xf0b0u16 | r.byte()? as u16;
            (src, dst)
        }
        0b10 => {
            let src = 0xf0b0u16 | r.byte()? as u16;
            let dst = u16::from_be_bytes(r.take(2)?.try_into().unwrap());
            (src, dst)
        }
        _ => {
            let src = u16::from_be_bytes(r.take(2)?.try_into().unwrap());
            let dst = u16::from_be_bytes(r.take(2)?.try_into().unwrap());
            (src, dst)
        }
    };
    let checksum = u16::from_be_bytes(r.take(2)?.try_into().unwrap());
    Ok(UdpHeader { src_port, dst_port, checksum })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::addr::{MacAddress, ShortAddress};

    fn link_local(short: u16) -> V6Addr {
        let iid = compute_iid(MacAddress::Short(ShortAddress(short)));
        V6Addr::with_iid([0xfe, 0x80, 0, 0, 0, 0, 0, 0], iid)
    }

    /// spec §8 scenario 4: IPv6(src=fe80::AABB, dst=fe80::CCDD,
    /// nextHeader=UDP) + UDP(0xf0b1 -> 0xf0b2) over matching link-local
    /// MAC addresses. byte1 matches the scenario's literal `0x33`
    /// exactly; byte0 here is `0x7C` (TF=11, NH=1, HLIM=00/inline),
    /// which is what TF-both-elided + NH-compressed + hop-limit-inline
    /// actually encodes to under this bit layout. The scenario's
    /// literal `0x7A` has NH=0 and HLIM=64, which contradicts its own
    /// "next-header compressed" / "hop-limit inline" wording, so this
    /// implementation follows the internally-consistent encoding.
    #[test]
    fn udp_compression_scenario() {
        let ip = Ipv6Header {
            traffic_class: 0,
            flow_label: 0,
            next_header: PROTO_UDP,
            hop_limit: 42, // HLIM inline per the scenario text; any non-1/64/255 value
            src: link_local(0xaabb),
            dst: link_local(0xccdd),
        };
        let udp = UdpHeader { src_port: 0xf0b1, dst_port: 0xf0b2, checksum: 0x1234 };
        let mac_src = MacAddress::Short(ShortAddress(0xaabb));
        let mac_dst = MacAddress::Short(ShortAddress(0xccdd));
        let contexts = ContextTable::new();

        let mut out = [0u8; 32];
        let n = compress(&ip, None, Some(&udp), mac_src, mac_dst, &contexts, &mut out).unwrap();

        assert_eq!(out[0], 0x7c);
        assert_eq!(out[1], 0x33);
        assert_eq!(out[2], 42); // hop limit byte, inline
        assert_eq!(out[3], 0xf3); // UDP NHC dispatch, both ports 4-bit
        assert_eq!(out[4], 0x12); // ports nibble byte
        assert_eq!(&out[5..7], &[0x12, 0x34]); // checksum
        assert_eq!(n, 7);
    }

    #[test]
    fn udp_round_trip_matches_scenario_bytes() {
        let ip = Ipv6Header {
            traffic_class: 0,
            flow_label: 0,
            next_header: PROTO_UDP,
            hop_limit: 64,
            src: link_local(0xaabb),
            dst: link_local(0xccdd),
        };
        let udp = UdpHeader { src_port: 0xf0b1, dst_port: 0xf0b2, checksum: 0x1234 };
        let mac_src = MacAddress::Short(ShortAddress(0xaabb));
        let mac_dst = MacAddress::Short(ShortAddress(0xccdd));
        let contexts = ContextTable::new();

        let mut out = [0u8; 32];
        let n = compress(&ip, None, Some(&udp), mac_src, mac_dst, &contexts, &mut out).unwrap();
        let (ip2, ext2, udp2, consumed) = decompress(&out[..n], mac_src, mac_dst, &contexts).unwrap();

        assert_eq!(consumed, n);
        assert_eq!(ip2.src, ip.src);
        assert_eq!(ip2.dst, ip.dst);
        assert_eq!(ip2.next_header, PROTO_UDP);
        assert_eq!(ip2.hop_limit, ip.hop_limit);
        assert!(ext2.is_none());
        assert_eq!(udp2.unwrap(), udp);
    }

    #[test]
    fn full_inline_fallback_round_trips() {
        let mut src = [0u8; 16];
        src[0] = 0x20;
        src[15] = 0x01;
        let mut dst = [0u8; 16];
        dst[0] = 0x20;
        dst[15] = 0x02;
        let ip = Ipv6Header {
            traffic_class: 0x20,
            flow_label: 0x1234,
            next_header: 58, // ICMPv6, not UDP: inline
            hop_limit: 30,
            src: V6Addr(src),
            dst: V6Addr(dst),
        };
        let mac_src = MacAddress::Extended(crate::addr::ExtendedAddress(1));
        let mac_dst = MacAddress::Extended(crate::addr::ExtendedAddress(2));
        let contexts = ContextTable::new();

        let mut out = [0u8; 64];
        let n = compress(&ip, None, None, mac_src, mac_dst, &contexts, &mut out).unwrap();
        let (ip2, ext2, udp2, consumed) = decompress(&out[..n], mac_src, mac_dst, &contexts).unwrap();

        assert_eq!(consumed, n);
        assert!(ext2.is_none());
        assert!(udp2.is_none());
        assert_eq!(ip2, ip);
    }

    #[test]
    fn multicast_compact_form_round_trips() {
        let mut dst = [0u8; 16];
        dst[0] = 0xff;
        dst[1] = 0x02;
        dst[15] = 0x01;
        let ip = Ipv6Header {
            traffic_class: 0,
            flow_label: 0,
            next_header: 58,
            hop_limit: 255,
            src: link_local(0x1111),
            dst: V6Addr(dst),
        };
        let mac_src = MacAddress::Short(ShortAddress(0x1111));
        let mac_dst = MacAddress::Short(ShortAddress(0xffff));
        let contexts = ContextTable::new();

        let mut out = [0u8; 32];
        let n = compress(&ip, None, None, mac_src, mac_dst, &contexts, &mut out).unwrap();
        let (ip2, _, _, consumed) = decompress(&out[..n], mac_src, mac_dst, &contexts).unwrap();
        assert_eq!(consumed, n);
        assert_eq!(ip2.dst, ip.dst);
    }

    #[test]
    fn context_compression_round_trips() {
        let mut prefix = [0u8; 16];
        prefix[0] = 0x20;
        prefix[1] = 0x01;
        let mut contexts = ContextTable::new();
        contexts.set(3, context::Context { prefix, prefix_len: 64, compress: true });

        let mac_src = MacAddress::Short(ShortAddress(0x2222));
        let mac_dst = MacAddress::Short(ShortAddress(0x3333));
        let src = V6Addr::with_iid([0x20, 0x01, 0, 0, 0, 0, 0, 0], compute_iid(mac_src));
        let dst = V6Addr::with_iid([0x20, 0x01, 0, 0, 0, 0, 0, 0], compute_iid(mac_dst));
        let ip = Ipv6Header {
            traffic_class: 0,
            flow_label: 0,
            next_header: 58,
            hop_limit: 255,
            src,
            dst,
        };

        let mut out = [0u8; 32];
        let n = compress(&ip, None, None, mac_src, mac_dst, &contexts, &mut out).unwrap();
        assert_eq!(out[1] & 0b1000_0000, 0b1000_0000); // CID present
        assert_eq!(out[2], (3 << 4) | 3); // src ctx 3, dst ctx 3

        let (ip2, _, _, consumed) = decompress(&out[..n], mac_src, mac_dst, &contexts).unwrap();
        assert_eq!(consumed, n);
        assert_eq!(ip2.src, ip.src);
        assert_eq!(ip2.dst, ip.dst);
    }

    #[test]
    fn hop_by_hop_ext_header_round_trips() {
        let ip = Ipv6Header {
            traffic_class: 0,
            flow_label: 0,
            next_header: PROTO_HOP_OPTS,
            hop_limit: 64,
            src: link_local(0x1111),
            dst: link_local(0x2222),
        };
        let mut options: Vec<u8, MAX_EXT_HEADER_OPTIONS> = Vec::new();
        options.extend_from_slice(&[0x01, 0x02, 0x03, 0x04]).unwrap();
        let ext = ExtHeader { next_header: 58, options };
        let mac_src = MacAddress::Short(ShortAddress(0x1111));
        let mac_dst = MacAddress::Short(ShortAddress(0x2222));
        let contexts = ContextTable::new();

        let mut out = [0u8; 32];
        let n = compress(&ip, Some(&ext), None, mac_src, mac_dst, &contexts, &mut out).unwrap();
        assert_eq!(out[1] & 0b0000_0100, 0b0000_0100); // NH bit set, ext compressed

        let (ip2, ext2, udp2, consumed) = decompress(&out[..n], mac_src, mac_dst, &contexts).unwrap();
        assert_eq!(consumed, n);
        assert_eq!(ip2.next_header, PROTO_HOP_OPTS);
        assert!(udp2.is_none());
        assert_eq!(ext2.unwrap(), ext);
    }

    #[test]
    fn hop_by_hop_ext_header_with_nested_udp_round_trips() {
        let ip = Ipv6Header {
            traffic_class: 0,
            flow_label: 0,
            next_header: PROTO_HOP_OPTS,
            hop_limit: 64,
            src: link_local(0x3333),
            dst: link_local(0x4444),
        };
        let mut options: Vec<u8, MAX_EXT_HEADER_OPTIONS> = Vec::new();
        options.extend_from_slice(&[0xaa, 0xbb]).unwrap();
        let ext = ExtHeader { next_header: PROTO_UDP, options };
        let udp = UdpHeader { src_port: 0xf0b1, dst_port: 0xf0b2, checksum: 0xbeef };
        let mac_src = MacAddress::Short(ShortAddress(0x3333));
        let mac_dst = MacAddress::Short(ShortAddress(0x4444));
        let contexts = ContextTable::new();

        let mut out = [0u8; 32];
        let n = compress(&ip, Some(&ext), Some(&udp), mac_src, mac_dst, &contexts, &mut out).unwrap();

        let (ip2, ext2, udp2, consumed) = decompress(&out[..n], mac_src, mac_dst, &contexts).unwrap();
        assert_eq!(consumed, n);
        assert_eq!(ip2.next_header, PROTO_HOP_OPTS);
        let ext2 = ext2.unwrap();
        assert_eq!(ext2.next_header, PROTO_UDP);
        assert_eq!(ext2.options, ext.options);
        assert_eq!(udp2.unwrap(), udp);
    }
}
