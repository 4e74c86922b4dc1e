//! Network Data Leader: the prefix / border-router / has-route /
//! 6LoWPAN-context store and the context-id allocator that backs it.
//!
//! Internally this keeps a small fixed-capacity struct-of-records model
//! (mirroring how [`crate::sixlo::context::ContextTable`] already
//! represents contexts) rather than a literal byte-for-byte TLV
//! buffer; the wire format only matters at the CoAP boundary
//! (`n/sd` registration in, `ContextTable`/route queries out), which is
//! where [`crate::tlv`] gets used.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use heapless::Vec;

use crate::addr::{ShortAddress, V6Addr};
use crate::coap::{CoapCode, CoapMessage, CoapType};
use crate::config::LeaderConfig;
use crate::error::{Result, ThreadError};
use crate::forwarder::RouteLookup;
use crate::sixlo::context::{Context, ContextTable, MAX_CONTEXTS};

pub const MAX_PREFIXES: usize = 8;
pub const MAX_HAS_ROUTE: usize = 4;
pub const MAX_BORDER_ROUTER: usize = 4;

bitflags::bitflags! {
    /// Border-router TLV flags (spec-defined subset actually consumed
    /// by address configuration and route selection).
    pub struct BorderRouterFlags: u8 {
        const PREFERRED     = 0b0000_0001;
        const SLAAC         = 0b0000_0010;
        const DHCP          = 0b0000_0100;
        const CONFIGURE     = 0b0000_1000;
        const DEFAULT_ROUTE = 0b0001_0000;
        const ON_MESH       = 0b0010_0000;
        const STABLE        = 0b0100_0000;
    }
}

/// MLE's route-cost table, consumed here but owned elsewhere.
pub trait RouteCost {
    fn route_cost(&self, rloc: ShortAddress) -> u8;
}

#[derive(Clone, Copy, Debug)]
pub struct HasRouteEntry {
    pub rloc16: ShortAddress,
    pub preference: i8,
}

#[derive(Clone, Copy, Debug)]
pub struct BorderRouterEntry {
    pub rloc16: ShortAddress,
    pub flags: BorderRouterFlags,
}

#[derive(Clone, Debug)]
struct PrefixEntry {
    domain_id: u8,
    prefix: [u8; 16],
    prefix_len: u8,
    context_id: Option<u8>,
    has_route: Vec<HasRouteEntry, MAX_HAS_ROUTE>,
    border_router: Vec<BorderRouterEntry, MAX_BORDER_ROUTER>,
}

#[derive(Clone, Copy, Debug)]
struct ContextAlloc {
    prefix: [u8; 16],
    prefix_len: u8,
    in_use: bool,
    /// Seconds timestamp the context was last withdrawn; only
    /// meaningful while `!in_use`.
    last_used_s: u32,
}

fn prefix_covers(prefix: &[u8; 16], prefix_len: u8, addr: &V6Addr) -> bool {
    let bytes = (prefix_len / 8) as usize;
    let bits = prefix_len % 8;
    if prefix[..bytes] != addr.0[..bytes] {
        return false;
    }
    if bits == 0 {
        return true;
    }
    let mask = 0xffu8 << (8 - bits);
    (prefix[bytes] & mask) == (addr.0[bytes] & mask)
}

pub struct Leader {
    prefixes: Vec<PrefixEntry, MAX_PREFIXES>,
    contexts: [Option<ContextAlloc>; MAX_CONTEXTS],
    version: u8,
    stable_version: u8,
    config: LeaderConfig,
    message_id: u16,
}

impl Leader {
    pub fn new(config: LeaderConfig) -> Self {
        Self {
            prefixes: Vec::new(),
            contexts: [None; MAX_CONTEXTS],
            version: 0,
            stable_version: 0,
            config,
            message_id: 0,
        }
    }

    pub fn version(&self) -> (u8, u8) {
        (self.version, self.stable_version)
    }

    fn bump_version(&mut self) {
        self.version = self.version.wrapping_add(1);
        self.stable_version = self.stable_version.wrapping_add(1);
    }

    fn next_message_id(&mut self) -> u16 {
        let id = self.message_id;
        self.message_id = self.message_id.wrapping_add(1);
        id
    }

    fn find_prefix_mut(&mut self, prefix: &[u8; 16], prefix_len: u8) -> Option<&mut PrefixEntry> {
        self.prefixes.iter_mut().find(|p| p.prefix_len == prefix_len && p.prefix == *prefix)
    }

    /// Finds an existing context covering this exact prefix, or
    /// allocates one of the 15 assignable ids (0 is reserved for the
    /// mesh-local prefix and never handed out here).
    fn ensure_context(&mut self, prefix: [u8; 16], prefix_len: u8, now_s: u32) -> Result<u8> {
        if let Some(id) = self
            .contexts
            .iter()
            .position(|c| c.map(|c| c.prefix == prefix && c.prefix_len == prefix_len).unwrap_or(false))
        {
            self.contexts[id].as_mut().unwrap().in_use = true;
            return Ok(id as u8);
        }
        let slot = (1..MAX_CONTEXTS).find(|&i| self.contexts[i].is_none()).ok_or(ThreadError::NoBufs)?;
        self.contexts[slot] = Some(ContextAlloc { prefix, prefix_len, in_use: true, last_used_s: now_s });
        Ok(slot as u8)
    }

    /// Adds (or updates) a border-router TLV under `prefix`, allocating
    /// a 6LoWPAN compression context for it.
    pub fn add_border_router(
        &mut self,
        prefix: [u8; 16],
        prefix_len: u8,
        domain_id: u8,
        rloc16: ShortAddress,
        flags: BorderRouterFlags,
        now_s: u32,
    ) -> Result<()> {
        let context_id = self.ensure_context(prefix, prefix_len, now_s)?;

        if self.find_prefix_mut(&prefix, prefix_len).is_none() {
            self.prefixes
                .push(PrefixEntry {
                    domain_id,
                    prefix,
                    prefix_len,
                    context_id: Some(context_id),
                    has_route: Vec::new(),
                    border_router: Vec::new(),
                })
                .map_err(|_| ThreadError::NoBufs)?;
        }
        let p = self.find_prefix_mut(&prefix, prefix_len).ok_or(ThreadError::NotFound)?;
        p.context_id = Some(context_id);
        if let Some(existing) = p.border_router.iter_mut().find(|e| e.rloc16 == rloc16) {
            existing.flags = flags;
        } else {
            p.border_router.push(BorderRouterEntry { rloc16, flags }).map_err(|_| ThreadError::NoBufs)?;
        }
        self.bump_version();
        Ok(())
    }

    /// Adds (or updates) a has-route TLV under `prefix`.
    pub fn add_has_route(&mut self, prefix: [u8; 16], prefix_len: u8, domain_id: u8, rloc16: ShortAddress, preference: i8) -> Result<()> {
        if self.find_prefix_mut(&prefix, prefix_len).is_none() {
            self.prefixes
                .push(PrefixEntry {
                    domain_id,
                    prefix,
                    prefix_len,
                    context_id: None,
                    has_route: Vec::new(),
                    border_router: Vec::new(),
                })
                .map_err(|_| ThreadError::NoBufs)?;
        }
        let p = self.find_prefix_mut(&prefix, prefix_len).ok_or(ThreadError::NotFound)?;
        if let Some(e) = p.has_route.iter_mut().find(|e| e.rloc16 == rloc16) {
            e.preference = preference;
        } else {
            p.has_route.push(HasRouteEntry { rloc16, preference }).map_err(|_| ThreadError::NoBufs)?;
        }
        self.bump_version();
        Ok(())
    }

    /// Withdraws `rloc16`'s border-router entry. Once the prefix has no
    /// border routers left, its context starts the reuse-delay timer.
    pub fn remove_border_router(&mut self, prefix: [u8; 16], prefix_len: u8, rloc16: ShortAddress, now_s: u32) {
        let freed_context = {
            let p = match self.find_prefix_mut(&prefix, prefix_len) {
                Some(p) => p,
                None => return,
            };
            if let Some(pos) = p.border_router.iter().position(|e| e.rloc16 == rloc16) {
                p.border_router.remove(pos);
            }
            if p.border_router.is_empty() {
                p.context_id
            } else {
                None
            }
        };
        if let Some(id) = freed_context {
            if let Some(c) = self.contexts[id as usize].as_mut() {
                c.in_use = false;
                c.last_used_s = now_s;
            }
        }
        self.bump_version();
    }

    /// `n/sd` server-data registration: replaces every TLV `rloc16`
    /// previously registered with the caller-supplied set.
    #[allow(clippy::too_many_arguments)]
    pub fn register_server_data(
        &mut self,
        rloc16: ShortAddress,
        prefix: [u8; 16],
        prefix_len: u8,
        domain_id: u8,
        border_router: Option<BorderRouterFlags>,
        has_route_preference: Option<i8>,
        now_s: u32,
    ) -> Result<()> {
        self.remove_rloc_data(rloc16, now_s);
        if let Some(flags) = border_router {
            self.add_border_router(prefix, prefix_len, domain_id, rloc16, flags, now_s)?;
        }
        if let Some(pref) = has_route_preference {
            self.add_has_route(prefix, prefix_len, domain_id, rloc16, pref)?;
        }
        Ok(())
    }

    /// Removes every TLV entry bearing `rloc16` across all prefixes,
    /// dropping prefixes (and releasing their context) left empty.
    pub fn remove_rloc_data(&mut self, rloc16: ShortAddress, now_s: u32) {
        let mut changed = false;
        let mut to_remove: Vec<(usize, [u8; 16], u8), MAX_PREFIXES> = Vec::new();
        for (i, p) in self.prefixes.iter_mut().enumerate() {
            if let Some(pos) = p.border_router.iter().position(|e| e.rloc16 == rloc16) {
                p.border_router.remove(pos);
                changed = true;
            }
            if let Some(pos) = p.has_route.iter().position(|e| e.rloc16 == rloc16) {
                p.has_route.remove(pos);
                changed = true;
            }
            if p.border_router.is_empty() && p.has_route.is_empty() {
                let _ = to_remove.push((i, p.prefix, p.prefix_len));
            } else if p.border_router.is_empty() {
                if let Some(id) = p.context_id.take() {
                    if let Some(c) = self.contexts[id as usize].as_mut() {
                        c.in_use = false;
                        c.last_used_s = now_s;
                    }
                }
            }
        }
        for &(_, prefix, prefix_len) in to_remove.iter().rev() {
            if let Some(pos) = self.prefixes.iter().position(|p| p.prefix == prefix && p.prefix_len == prefix_len) {
                self.prefixes.remove(pos);
            }
        }
        if changed {
            self.bump_version();
        }
    }

    /// 1Hz context-reuse timer: frees contexts whose withdrawal has
    /// aged past `contextIdReuseDelay`.
    pub fn tick_context_reuse(&mut self, now_s: u32) {
        let mut changed = false;
        for slot in self.contexts.iter_mut() {
            if let Some(c) = slot {
                if !c.in_use && now_s.saturating_sub(c.last_used_s) >= self.config.context_id_reuse_delay_s {
                    *slot = None;
                    changed = true;
                }
            }
        }
        if changed {
            self.bump_version();
        }
    }

    /// The [`ContextTable`] view the 6LoWPAN codec compresses against.
    pub fn context_table(&self) -> ContextTable {
        let mut t = ContextTable::new();
        for (id, slot) in self.contexts.iter().enumerate() {
            if let Some(c) = slot {
                t.set(id as u8, Context { prefix: c.prefix, prefix_len: c.prefix_len, compress: c.in_use });
            }
        }
        t
    }

    /// `RouteLookup(dst)`: longest-prefix match, then a has-route
    /// lookup tie-broken `(preference DESC, routeCost ASC)`, falling
    /// back to any default-route border router for the same prefix.
    pub fn route_lookup(&self, dst: V6Addr, cost: &impl RouteCost) -> Option<ShortAddress> {
        let p = self.prefixes.iter().filter(|p| prefix_covers(&p.prefix, p.prefix_len, &dst)).max_by_key(|p| p.prefix_len)?;

        p.has_route
            .iter()
            .max_by(|a, b| a.preference.cmp(&b.preference).then_with(|| cost.route_cost(b.rloc16).cmp(&cost.route_cost(a.rloc16))))
            .map(|e| e.rloc16)
            .or_else(|| p.border_router.iter().find(|e| e.flags.contains(BorderRouterFlags::DEFAULT_ROUTE)).map(|e| e.rloc16))
    }

    /// The on-mesh prefixes a platform should keep a local address
    /// configured for.
    pub fn configured_prefixes(&self) -> impl Iterator<Item = ([u8; 16], u8)> + '_ {
        self.prefixes
            .iter()
            .filter(|p| p.border_router.iter().any(|e| e.flags.contains(BorderRouterFlags::ON_MESH)))
            .map(|p| (p.prefix, p.prefix_len))
    }

    pub fn encode_server_data_ack(&mut self, token: &[u8], out: &mut [u8]) -> Result<usize> {
        let mut msg = CoapMessage::new(CoapType::Acknowledgement, CoapCode::CHANGED, self.next_message_id());
        msg.token.extend_from_slice(token).map_err(|_| ThreadError::NoBufs)?;
        msg.encode(out)
    }

    /// True if context id `id` is still held (in use or cooling down in
    /// the reuse-delay window), as opposed to fully returned to the
    /// free pool. Exposed for tests asserting the reuse-delay invariant.
    #[cfg(test)]
    fn context_allocated(&self, id: u8) -> bool {
        self.contexts[id as usize].is_some()
    }
}

struct NoRouteCost;
impl RouteCost for NoRouteCost {
    fn route_cost(&self, _rloc: ShortAddress) -> u8 {
        0
    }
}

impl RouteLookup for Leader {
    fn route_lookup(&self, _src: V6Addr, dst: V6Addr) -> Option<ShortAddress> {
        Leader::route_lookup(self, dst, &NoRouteCost)
    }

    fn is_on_mesh(&self, addr: &V6Addr) -> bool {
        self.prefixes.iter().any(|p| prefix_covers(&p.prefix, p.prefix_len, addr) && !p.border_router.is_empty())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn prefix(byte0: u8) -> [u8; 16] {
        let mut p = [0u8; 16];
        p[0] = byte0;
        p[1] = 0x01;
        p
    }

    struct FlatCost;
    impl RouteCost for FlatCost {
        fn route_cost(&self, _rloc: ShortAddress) -> u8 {
            0
        }
    }

    #[test]
    fn border_router_allocates_and_reuses_context() {
        let mut leader = Leader::new(LeaderConfig::default());
        leader.add_border_router(prefix(0x20), 64, 0, ShortAddress(1), BorderRouterFlags::ON_MESH, 0).unwrap();
        let ctx = leader.context_table().find_for(&V6Addr::with_iid(
            [prefix(0x20)[0], 0x01, 0, 0, 0, 0, 0, 0],
            [0; 8],
        ));
        assert!(ctx.is_some());

        leader.add_border_router(prefix(0x20), 64, 0, ShortAddress(2), BorderRouterFlags::ON_MESH, 1).unwrap();
        let (id1, _) = ctx.unwrap();
        leader.remove_border_router(prefix(0x20), 64, ShortAddress(1), 1);
        leader.remove_border_router(prefix(0x20), 64, ShortAddress(2), 1);
        assert!(!leader.context_table().get(id1).unwrap().compress);
    }

    #[test]
    fn context_freed_after_reuse_delay() {
        let mut leader = Leader::new(LeaderConfig { context_id_reuse_delay_s: 5, ..LeaderConfig::default() });
        leader.add_border_router(prefix(0x20), 64, 0, ShortAddress(1), BorderRouterFlags::ON_MESH, 0).unwrap();
        let id = leader
            .context_table()
            .find_for(&V6Addr::with_iid([prefix(0x20)[0], 0x01, 0, 0, 0, 0, 0, 0], [0; 8]))
            .unwrap()
            .0;

        leader.remove_border_router(prefix(0x20), 64, ShortAddress(1), 10);
        assert!(leader.context_allocated(id), "still cooling down, not yet past the reuse delay");

        leader.tick_context_reuse(14); // 4s since withdrawal, delay is 5s
        assert!(leader.context_allocated(id), "reuse delay hasn't elapsed yet");

        leader.tick_context_reuse(15); // 5s since withdrawal: freed
        assert!(!leader.context_allocated(id));

        // a fresh allocation for a different prefix can now reuse the freed id
        leader.add_border_router(prefix(0x30), 64, 0, ShortAddress(2), BorderRouterFlags::ON_MESH, 15).unwrap();
        let reused = leader
            .context_table()
            .find_for(&V6Addr::with_iid([0x30, 0x01, 0, 0, 0, 0, 0, 0], [0; 8]))
            .unwrap()
            .0;
        assert_eq!(reused, id);
    }

    #[test]
    fn route_lookup_prefers_higher_preference() {
        let mut leader = Leader::new(LeaderConfig::default());
        leader.add_has_route(prefix(0x40), 64, 0, ShortAddress(1), 0).unwrap();
        leader.add_has_route(prefix(0x40), 64, 0, ShortAddress(2), 1).unwrap();
        let dst = V6Addr::with_iid([prefix(0x40)[0], 0x01, 0, 0, 0, 0, 0, 0], [0; 8]);
        assert_eq!(leader.route_lookup(dst, &FlatCost), Some(ShortAddress(2)));
    }

    #[test]
    fn registration_replaces_prior_entries() {
        let mut leader = Leader::new(LeaderConfig::default());
        leader.register_server_data(ShortAddress(1), prefix(0x50), 64, 0, Some(BorderRouterFlags::ON_MESH), None, 0).unwrap();
        assert_eq!(leader.version().0, 1);
        leader.register_server_data(ShortAddress(1), prefix(0x50), 64, 0, None, Some(3), 1).unwrap();
        let dst = V6Addr::with_iid([prefix(0x50)[0], 0x01, 0, 0, 0, 0, 0, 0], [0; 8]);
        assert!(leader.route_lookup(dst, &FlatCost).is_some());
        assert!(!leader.is_on_mesh(&dst));
    }
}
