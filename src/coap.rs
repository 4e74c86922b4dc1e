//! Minimal CoAP message codec: just enough of RFC 7252 to carry the
//! four URIs the core originates/consumes (`a/aq`, `a/an`, `a/ae`,
//! `n/sd`), per SPEC_FULL §4.6/§4.7. Block-wise transfer, Observe and
//! retransmission queues beyond the resolver/leader's own timeout
//! model are out of scope.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use heapless::Vec;

use crate::error::{Result, ThreadError};

pub const MAX_OPTIONS: usize = 4;
pub const MAX_PAYLOAD: usize = 256;
pub const MAX_PATH_LEN: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CoapType {
    Confirmable = 0,
    NonConfirmable = 1,
    Acknowledgement = 2,
    Reset = 3,
}

impl CoapType {
    fn from_bits(b: u8) -> Result<Self> {
        Ok(match b {
            0 => CoapType::Confirmable,
            1 => CoapType::NonConfirmable,
            2 => CoapType::Acknowledgement,
            3 => CoapType::Reset,
            _ => return Err(ThreadError::Parse),
        })
    }
}

/// `class.detail`, e.g. `2.05` (Content) or `0.01` (GET, as a request code).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CoapCode {
    pub class: u8,
    pub detail: u8,
}

impl CoapCode {
    pub const POST: CoapCode = CoapCode { class: 0, detail: 2 };
    pub const CHANGED: CoapCode = CoapCode { class: 2, detail: 4 };
    pub const CONTENT: CoapCode = CoapCode { class: 2, detail: 5 };

    fn to_byte(self) -> u8 {
        (self.class << 5) | (self.detail & 0x1f)
    }

    fn from_byte(b: u8) -> Self {
        Self {
            class: b >> 5,
            detail: b & 0x1f,
        }
    }
}

/// One path segment of a Uri-Path option sequence, e.g. `["a", "aq"]`
/// for `a/aq`.
pub type Path = Vec<&'static str, 4>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoapMessage<'a> {
    pub msg_type: CoapType,
    pub code: CoapCode,
    pub message_id: u16,
    pub token: Vec<u8, 8>,
    pub uri_path: Vec<&'a str, 4>,
    pub payload: &'a [u8],
}

const VERSION: u8 = 1;
/// Option number for Uri-Path (RFC 7252 §5.10).
const OPT_URI_PATH: u16 = 11;
const PAYLOAD_MARKER: u8 = 0xff;

impl<'a> CoapMessage<'a> {
    pub fn new(msg_type: CoapType, code: CoapCode, message_id: u16) -> Self {
        Self {
            msg_type,
            code,
            message_id,
            token: Vec::new(),
            uri_path: Vec::new(),
            payload: &[],
        }
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < 4 {
            return Err(ThreadError::NoBufs);
        }
        let tkl = self.token.len() as u8;
        buf[0] = (VERSION << 6) | ((self.msg_type as u8) << 4) | tkl;
        buf[1] = self.code.to_byte();
        buf[2] = (self.message_id >> 8) as u8;
        buf[3] = self.message_id as u8;
        let mut offset = 4;

        if offset + self.token.len() > buf.len() {
            return Err(ThreadError::NoBufs);
        }
        buf[offset..offset + self.token.len()].copy_from_slice(&self.token);
        offset += self.token.len();

        let mut last_opt = 0u16;
        for seg in &self.uri_path {
            let delta = OPT_URI_PATH - last_opt;
            last_opt = OPT_URI_PATH;
            let len = seg.len();
            if len > 12 || delta > 12 {
                // Thread's path segments are short ("a", "aq", "sd", ...);
                // extended option encodings aren't needed here.
                return Err(ThreadError::InvalidArgs);
            }
            if offset + 1 + len > buf.len() {
                return Err(ThreadError::NoBufs);
            }
            buf[offset] = ((delta as u8) << 4) | (len as u8);
            offset += 1;
            buf[offset..offset + len].copy_from_slice(seg.as_bytes());
            offset += len;
        }

        if !self.payload.is_empty() {
            if offset + 1 + self.payload.len() > buf.len() {
                return Err(ThreadError::NoBufs);
            }
            buf[offset] = PAYLOAD_MARKER;
            offset += 1;
            buf[offset..offset + self.payload.len()].copy_from_slice(self.payload);
            offset += self.payload.len();
        }

        Ok(offset)
    }

    pub fn decode(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < 4 {
            return Err(ThreadError::Parse);
        }
        let version = buf[0] >> 6;
        if version != VERSION {
            return Err(ThreadError::Parse);
        }
        let msg_type = CoapType::from_bits((buf[0] >> 4) & 0x3)?;
        let tkl = (buf[0] & 0x0f) as usize;
        let code = CoapCode::from_byte(buf[1]);
        let message_id = ((buf[2] as u16) << 8) | buf[3] as u16;
        let mut offset = 4;

        if offset + tkl > buf.len() || tkl > 8 {
            return Err(ThreadError::Parse);
        }
        let mut token = Vec::new();
        token.extend_from_slice(&buf[offset..offset + tkl]).ok();
        offset += tkl;

        let mut uri_path = Vec::new();
        let mut last_opt = 0u16;
        while offset < buf.len() && buf[offset] != PAYLOAD_MARKER {
            let delta = (buf[offset] >> 4) as u16;
            let len = (buf[offset] & 0x0f) as usize;
            offset += 1;
            if delta > 12 || offset + len > buf.len() {
                return Err(ThreadError::Parse);
            }
            let opt_num = last_opt + delta;
            last_opt = opt_num;
            let value = core::str::from_utf8(&buf[offset..offset + len]).map_err(|_| ThreadError::Parse)?;
            offset += len;
            if opt_num == OPT_URI_PATH {
                uri_path.push(value).map_err(|_| ThreadError::Parse)?;
            }
        }

        let payload = if offset < buf.len() && buf[offset] == PAYLOAD_MARKER {
            &buf[offset + 1..]
        } else {
            &buf[offset..offset]
        };

        Ok(Self {
            msg_type,
            code,
            message_id,
            token,
            uri_path,
            payload,
        })
    }

    /// True iff the decoded Uri-Path matches `segments` exactly, e.g.
    /// `msg.path_is(&["a", "aq"])`.
    pub fn path_is(&self, segments: &[&str]) -> bool {
        self.uri_path.len() == segments.len()
            && self.uri_path.iter().zip(segments).all(|(a, b)| a == b)
    }
}
