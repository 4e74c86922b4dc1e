//! Address Resolver: the EID→RLOC cache and the `a/aq`/`a/an`/`a/ae`
//! CoAP exchanges that keep it filled.
//!
//! The cache is a fixed `CACHE_ENTRIES`-slot array rather than an
//! intrusive list -- there's no buffer pool entry backing a cache row,
//! so the arena-index trick the message pool uses doesn't apply here.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use crate::addr::{MacAddress, ShortAddress, V6Addr};
use crate::coap::{CoapCode, CoapMessage, CoapType};
use crate::config::ResolverConfig;
use crate::error::{Result, ThreadError};
use crate::forwarder::RlocResolve;
use crate::neighbor::NeighborTable;
use crate::tlv::{self, TlvType};

pub const CACHE_ENTRIES: usize = 16;

/// All-routers multicast address `a/aq` queries go out to.
pub const QUERY_MULTICAST: V6Addr = V6Addr([0xff, 0x03, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x02]);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum CacheState {
    Invalid,
    Query,
    Retry,
    Valid,
}

#[derive(Clone, Copy, Debug)]
struct CacheEntry {
    target: V6Addr,
    rloc: u16,
    iid: [u8; 8],
    timeout: u16,
    state: CacheState,
}

impl CacheEntry {
    fn empty() -> Self {
        Self {
            target: V6Addr::UNSPECIFIED,
            rloc: 0,
            iid: [0; 8],
            timeout: 0,
            state: CacheState::Invalid,
        }
    }
}

/// Outcome of [`Resolver::handle_notification`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NotificationOutcome {
    /// The cache was updated; the forwarder should drain its resolving
    /// queue for this target.
    Adopted(V6Addr),
    /// A different device already holds a Valid entry for this target
    /// with a different IID -- the caller should reply with `a/ae`.
    Conflict(V6Addr),
    /// Malformed, or for a target we never queried.
    Unknown,
}

pub struct Resolver {
    cache: [CacheEntry; CACHE_ENTRIES],
    config: ResolverConfig,
    message_id: u16,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            cache: [CacheEntry::empty(); CACHE_ENTRIES],
            config,
            message_id: 0,
        }
    }

    fn next_message_id(&mut self) -> u16 {
        let id = self.message_id;
        self.message_id = self.message_id.wrapping_add(1);
        id
    }

    fn find(&self, target: V6Addr) -> Option<usize> {
        self.cache.iter().position(|e| e.state != CacheState::Invalid && e.target == target)
    }

    fn alloc_slot(&mut self) -> Option<usize> {
        self.cache.iter().position(|e| e.state == CacheState::Invalid)
    }

    /// `Resolve`: a cache hit returns the RLOC directly. A miss starts
    /// a query (or leaves an in-flight one alone) and returns
    /// `Err(LeaseQuery)` so the caller parks the message. A full cache
    /// with no `Invalid` slot to reuse falls through to `NoBufs`.
    pub fn resolve(&mut self, target: V6Addr) -> Result<u16> {
        if let Some(i) = self.find(target) {
            return match self.cache[i].state {
                CacheState::Valid => Ok(self.cache[i].rloc),
                _ => Err(ThreadError::LeaseQuery),
            };
        }
        let slot = self.alloc_slot().ok_or(ThreadError::NoBufs)?;
        self.cache[slot] = CacheEntry {
            target,
            state: CacheState::Query,
            timeout: self.config.discover_timeout_s,
            ..CacheEntry::empty()
        };
        Err(ThreadError::LeaseQuery)
    }

    pub fn invalidate(&mut self, target: V6Addr) {
        if let Some(i) = self.find(target) {
            self.cache[i].state = CacheState::Invalid;
        }
    }

    /// 1Hz cache timer: ages `Query`/`Retry` entries down, expiring
    /// them at zero. Returns `true` if anything is still pending.
    pub fn tick_cache(&mut self) -> bool {
        let mut pending = false;
        for e in self.cache.iter_mut() {
            if matches!(e.state, CacheState::Query | CacheState::Retry) {
                e.timeout = e.timeout.saturating_sub(1);
                if e.timeout == 0 {
                    e.state = CacheState::Invalid;
                } else {
                    pending = true;
                }
            }
        }
        pending
    }

    /// Builds the `a/aq` (address-query) message for a freshly started
    /// (or retried) lookup of `target`.
    pub fn encode_address_query(&mut self, target: V6Addr, out: &mut [u8]) -> Result<usize> {
        let mut payload = [0u8; 18];
        let n = tlv::write_tlv(&mut payload, 0, TlvType::Target as u8, &target.0)?;
        let mut msg = CoapMessage::new(CoapType::NonConfirmable, CoapCode::POST, self.next_message_id());
        msg.uri_path.push("a").map_err(|_| ThreadError::NoBufs)?;
        msg.uri_path.push("aq").map_err(|_| ThreadError::NoBufs)?;
        msg.payload = &payload[..n];
        msg.encode(out)
    }

    /// Handles an `a/aq`: replies with `a/an` if `target` is one of our
    /// own addresses or a connected RFD child's, else `None`.
    pub fn handle_query<const N: usize>(
        &mut self,
        query: &CoapMessage,
        our_addresses: &[V6Addr],
        our_iid: [u8; 8],
        our_rloc: u16,
        children: &NeighborTable<N>,
        now_s: u32,
        out: &mut [u8],
    ) -> Result<Option<usize>> {
        let target = match tlv_v6(query.payload, TlvType::Target as u8) {
            Some(t) => t,
            None => return Ok(None),
        };

        if our_addresses.contains(&target) {
            return self.encode_notification(target, our_iid, our_rloc, None, out).map(Some);
        }

        for child in children.iter() {
            if !child.is_valid() || !child.is_rfd() {
                continue;
            }
            let child_iid = crate::addr::compute_iid(MacAddress::Extended(child.ext_addr));
            let child_eid = V6Addr::with_iid(target.prefix(), child_iid);
            if child_eid == target {
                let elapsed = now_s.saturating_sub(child.last_heard_s).min(u16::MAX as u32) as u16;
                return self.encode_notification(target, child_iid, child.short_addr.0, Some(elapsed), out).map(Some);
            }
        }

        Ok(None)
    }

    fn encode_notification(&mut self, target: V6Addr, iid: [u8; 8], rloc: u16, last_transaction_time_s: Option<u16>, out: &mut [u8]) -> Result<usize> {
        let mut payload = [0u8; 40];
        let mut off = tlv::write_tlv(&mut payload, 0, TlvType::Target as u8, &target.0)?;
        off = tlv::write_tlv(&mut payload, off, TlvType::MeshLocalEid as u8, &iid)?;
        off = tlv::write_tlv(&mut payload, off, TlvType::Rloc16 as u8, &rloc.to_be_bytes())?;
        if let Some(t) = last_transaction_time_s {
            off = tlv::write_tlv(&mut payload, off, TlvType::LastTransactionTime as u8, &(t as u32).to_be_bytes())?;
        }
        let mut msg = CoapMessage::new(CoapType::Confirmable, CoapCode::POST, self.next_message_id());
        msg.uri_path.push("a").map_err(|_| ThreadError::NoBufs)?;
        msg.uri_path.push("an").map_err(|_| ThreadError::NoBufs)?;
        msg.payload = &payload[..off];
        msg.encode(out)
    }

    /// Handles an `a/an`: adopts the cache entry, or flags a conflict
    /// when a different IID already holds a `Valid` entry.
    pub fn handle_notification(&mut self, msg: &CoapMessage) -> NotificationOutcome {
        let (target, iid, rloc) = match (
            tlv_v6(msg.payload, TlvType::Target as u8),
            tlv_iid(msg.payload, TlvType::MeshLocalEid as u8),
            tlv_u16(msg.payload, TlvType::Rloc16 as u8),
        ) {
            (Some(t), Some(i), Some(r)) => (t, i, r),
            _ => return NotificationOutcome::Unknown,
        };

        match self.find(target) {
            Some(i) if self.cache[i].state == CacheState::Valid && self.cache[i].iid != iid => NotificationOutcome::Conflict(target),
            Some(i) => {
                self.cache[i].iid = iid;
                self.cache[i].rloc = rloc;
                self.cache[i].state = CacheState::Valid;
                NotificationOutcome::Adopted(target)
            }
            None => NotificationOutcome::Unknown,
        }
    }

    /// Builds an `a/ae` (address-error) naming `target`/`our_iid`, sent
    /// when we detect a different device is already using our EID.
    pub fn encode_address_error(&mut self, target: V6Addr, our_iid: [u8; 8], out: &mut [u8]) -> Result<usize> {
        let mut payload = [0u8; 32];
        let mut off = tlv::write_tlv(&mut payload, 0, TlvType::Target as u8, &target.0)?;
        off = tlv::write_tlv(&mut payload, off, TlvType::MeshLocalEid as u8, &our_iid)?;
        let mut msg = CoapMessage::new(CoapType::Confirmable, CoapCode::POST, self.next_message_id());
        msg.uri_path.push("a").map_err(|_| ThreadError::NoBufs)?;
        msg.uri_path.push("ae").map_err(|_| ThreadError::NoBufs)?;
        msg.payload = &payload[..off];
        msg.encode(out)
    }

    /// Handles an `a/ae`: `None` if it matches us exactly (nothing to
    /// do); otherwise returns the conflicting neighbor's short address
    /// so the caller can drop that child's on-mesh address and relay
    /// the error further.
    pub fn handle_address_error<const N: usize>(&mut self, msg: &CoapMessage, our_iid: [u8; 8], children: &NeighborTable<N>) -> Option<ShortAddress> {
        let iid = tlv_iid(msg.payload, TlvType::MeshLocalEid as u8)?;
        if iid == our_iid {
            return None;
        }
        children
            .iter()
            .find(|c| c.is_valid() && crate::addr::compute_iid(MacAddress::Extended(c.ext_addr)) == iid)
            .map(|c| c.short_addr)
    }
}

impl RlocResolve for Resolver {
    fn resolve(&mut self, target: V6Addr) -> Result<ShortAddress> {
        Resolver::resolve(self, target).map(ShortAddress)
    }
}

fn tlv_v6(buf: &[u8], kind: u8) -> Option<V6Addr> {
    let t = tlv::find(buf, kind)?;
    if t.value.len() != 16 {
        return None;
    }
    let mut a = [0u8; 16];
    a.copy_from_slice(t.value);
    Some(V6Addr(a))
}

fn tlv_iid(buf: &[u8], kind: u8) -> Option<[u8; 8]> {
    let t = tlv::find(buf, kind)?;
    if t.value.len() != 8 {
        return None;
    }
    let mut a = [0u8; 8];
    a.copy_from_slice(t.value);
    Some(a)
}

fn tlv_u16(buf: &[u8], kind: u8) -> Option<u16> {
    let t = tlv::find(buf, kind)?;
    if t.value.len() != 2 {
        return None;
    }
    Some(u16::from_be_bytes([t.value[0], t.value[1]]))
}
