//! Address types shared by the MAC, 6LoWPAN, forwarder and resolver:
//! 802.15.4 short/extended/PAN identifiers, routing locators and IPv6
//! addresses, plus the IID computation the 6LoWPAN codec needs on both
//! its compress and decompress paths.
//!
//! The teacher crate pulled these from the `ieee802154` crate; per
//! the dependency ledger we hand-roll the handful of fields Thread
//! actually needs instead, keeping the same newtype-plus-`byteorder`
//! shape.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use byteorder::{ByteOrder, LittleEndian};

/// 802.15.4 PAN identifier.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PanId(pub u16);

/// 802.15.4 short (16-bit) address. Within Thread this doubles as an
/// `Rloc16` — see [`ShortAddress::router_id`]/[`ShortAddress::child_id`].
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ShortAddress(pub u16);

impl ShortAddress {
    /// High 10 bits: the owning router's id.
    pub fn router_id(self) -> u16 {
        self.0 >> 10
    }

    /// Low 10 bits: child id within the router (0 for the router itself).
    pub fn child_id(self) -> u16 {
        self.0 & 0x03ff
    }

    /// True if this Rloc16 addresses a router (child id zero).
    pub fn is_router(self) -> bool {
        self.child_id() == 0
    }
}

/// 802.15.4 extended (64-bit / EUI-64) address.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExtendedAddress(pub u64);

impl ExtendedAddress {
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(b: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(b))
    }
}

/// Either form of MAC address a frame may carry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacAddress {
    Short(ShortAddress),
    Extended(ExtendedAddress),
}

/// 128-bit IPv6 address.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct V6Addr(pub [u8; 16]);

impl V6Addr {
    pub const UNSPECIFIED: V6Addr = V6Addr([0u8; 16]);

    pub fn is_unspecified(&self) -> bool {
        self.0 == [0u8; 16]
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] == 0xff
    }

    pub fn is_link_local(&self) -> bool {
        self.0[0] == 0xfe && (self.0[1] & 0xc0) == 0x80
    }

    pub fn iid(&self) -> [u8; 8] {
        let mut iid = [0u8; 8];
        iid.copy_from_slice(&self.0[8..16]);
        iid
    }

    pub fn prefix(&self) -> [u8; 8] {
        let mut p = [0u8; 8];
        p.copy_from_slice(&self.0[0..8]);
        p
    }

    pub fn with_iid(prefix: [u8; 8], iid: [u8; 8]) -> Self {
        let mut b = [0u8; 16];
        b[0..8].copy_from_slice(&prefix);
        b[8..16].copy_from_slice(&iid);
        Self(b)
    }

    /// Multicast scope nibble (bits 0-3 of the second address byte),
    /// meaningful only when [`is_multicast`] is true.
    pub fn multicast_scope(&self) -> u8 {
        self.0[1] & 0x0f
    }
}

#[cfg(any(feature = "alloc", feature = "std"))]
impl core::fmt::Display for V6Addr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut compress = false;
        for i in 0..8 {
            let o = LittleEndian::read_u16(&[self.0[i * 2 + 1], self.0[i * 2]]);
            match (o, compress) {
                (0, false) if i < 7 => {
                    compress = true;
                    write!(f, ":")?;
                }
                (0, true) => (),
                (_, true) => {
                    compress = false;
                    write!(f, ":{:04x}", o)?;
                }
                (_, false) if i == 0 => write!(f, "{:04x}", o)?,
                (_, false) => write!(f, ":{:04x}", o)?,
            }
        }
        Ok(())
    }
}

/// Computes the link-local IID used by the 6LoWPAN codec on both the
/// compress and decompress path, per spec §4.4. Pure function of the
/// MAC address: short addresses map to `00:00:00:ff:fe:00:AA:AA`;
/// extended addresses are carried byte-for-byte with the
/// universal/local bit of the first byte toggled.
pub fn compute_iid(mac: MacAddress) -> [u8; 8] {
    match mac {
        MacAddress::Short(s) => {
            let b = s.0.to_be_bytes();
            [0x00, 0x00, 0x00, 0xff, 0xfe, 0x00, b[0], b[1]]
        }
        MacAddress::Extended(e) => {
            let mut b = e.to_bytes();
            b[0] ^= 0x02;
            b
        }
    }
}
