//! Mesh Forwarder: the send/resolving/reassembly queues, mesh-header
//! insertion, fragmentation and sleepy-child polling that sit between
//! the MAC and the rest of the core.
//!
//! Indirect (sleepy-child) delivery works over a shared SendQueue
//! rather than per-child queues: a message destined for several
//! children at once carries a `childMask` bit per child in its
//! [`crate::buffer::MessageMeta`] and is removed once every bit has
//! been served. Direct-transmit messages are dispatched FIFO.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use heapless::Vec;

use crate::addr::{ExtendedAddress, MacAddress, ShortAddress, V6Addr};
use crate::buffer::{MessageId, MessagePool};
use crate::config::ForwarderConfig;
use crate::error::{Result, ThreadError};
use crate::neighbor::NeighborTable;
use crate::sixlo::headers::{self, FragHeader, MeshHeader};

pub const MAX_SEND_QUEUE: usize = 16;
pub const MAX_RESOLVING_QUEUE: usize = 8;
pub const MAX_REASSEMBLY: usize = 4;

/// Default hop budget stamped into a freshly inserted mesh header.
const DEFAULT_HOPS_LEFT: u8 = 15;

/// MLE's routing table, consumed here but owned elsewhere: the
/// forwarder only ever asks "who's the next hop towards this Rloc16".
pub trait NextHop {
    fn next_hop(&self, dest: ShortAddress) -> Option<ShortAddress>;
}

/// The seam to the Address Resolver's EID cache.
pub trait RlocResolve {
    /// Resolves `target` to a routing locator. `Err(LeaseQuery)` means a
    /// query was started (or is already in flight) and the caller
    /// should park the message until [`Forwarder::resolved`] drains it.
    fn resolve(&mut self, target: V6Addr) -> Result<ShortAddress>;
}

/// The seam to the Network Data Leader's prefix/route store.
pub trait RouteLookup {
    fn route_lookup(&self, src: V6Addr, dst: V6Addr) -> Option<ShortAddress>;
    /// True if `addr` falls within a prefix this network has data for.
    fn is_on_mesh(&self, addr: &V6Addr) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendEntry {
    pub id: MessageId,
    pub direct_tx: bool,
}

#[derive(Clone, Copy, Debug)]
struct ResolvingEntry {
    id: MessageId,
    target: V6Addr,
}

#[derive(Clone, Copy, Debug)]
struct ReassemblyEntry {
    datagram_size: u16,
    datagram_tag: u16,
    received: u16,
    timeout_s: u16,
    message: MessageId,
}

/// Outcome of handing an inbound mesh header to [`Forwarder::mesh_transit`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MeshTransit {
    /// `destination` is us; hand the payload up the stack.
    ForUs,
    /// Forward on, with `hopsLeft` already decremented.
    Forward(MeshHeader),
    /// `hopsLeft` reached zero in transit.
    Drop,
}

/// Where a direct-transmit message should go, decided by
/// [`Forwarder::select_route`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RouteDecision {
    /// Link-local or multicast destination: no mesh header needed.
    Direct(MacAddress),
    /// Beyond a single hop: wrap in a mesh header and send to
    /// `next_hop_mac`.
    Mesh { mesh_header: MeshHeader, next_hop_mac: MacAddress },
    /// Parked pending address resolution.
    Parked,
}

/// What an inbound 6LoWPAN frame's leading dispatch byte says should
/// happen next, decided by [`classify_incoming`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Incoming {
    /// Mesh-routed; feed `mesh_header` to [`Forwarder::mesh_transit`]
    /// and continue decoding from `payload_offset`.
    Mesh { mesh_header: MeshHeader, payload_offset: usize },
    /// A datagram fragment; feed `frag_header` to
    /// [`Forwarder::reassemble`] with the bytes from `payload_offset`.
    Fragment { frag_header: FragHeader, payload_offset: usize },
    /// An unfragmented, unmeshed IPHC datagram: hand the whole buffer
    /// to [`crate::sixlo::decompress`] as-is.
    Iphc,
    /// Not a frame this core forwards; drop it.
    Discard,
}

/// Classifies a raw inbound 6LoWPAN buffer by its leading dispatch
/// byte and decodes whichever fixed-format header that dispatch
/// implies, so a received frame can be routed to mesh transit,
/// reassembly, or straight to the 6LoWPAN codec without the caller
/// re-deriving the dispatch rules itself.
pub fn classify_incoming(buf: &[u8]) -> Result<Incoming> {
    let byte0 = *buf.first().ok_or(ThreadError::Parse)?;
    match headers::classify(byte0) {
        headers::Dispatch::Mesh => {
            let (mesh_header, payload_offset) = MeshHeader::decode(buf)?;
            Ok(Incoming::Mesh { mesh_header, payload_offset })
        }
        headers::Dispatch::Frag1 | headers::Dispatch::FragN => {
            let (frag_header, payload_offset) = FragHeader::decode(buf)?;
            Ok(Incoming::Fragment { frag_header, payload_offset })
        }
        headers::Dispatch::Iphc => Ok(Incoming::Iphc),
        headers::Dispatch::Nalp | headers::Dispatch::Unknown => Ok(Incoming::Discard),
    }
}

/// Derives the MAC address a link-local (or on-link multicast) IPv6
/// destination maps to, inverting [`crate::addr::compute_iid`].
fn mac_addr_from_iid(iid: [u8; 8]) -> MacAddress {
    if iid[0..6] == [0x00, 0x00, 0x00, 0xff, 0xfe, 0x00] {
        MacAddress::Short(ShortAddress(u16::from_be_bytes([iid[6], iid[7]])))
    } else {
        let mut b = iid;
        b[0] ^= 0x02;
        MacAddress::Extended(ExtendedAddress::from_bytes(b))
    }
}

/// True if `dst`'s IID is the `0000:00ff:fe00:xxxx` routing-locator
/// pattern, in which case the low 16 bits are the Rloc16 itself.
fn rloc16_from_routing_locator(dst: &V6Addr) -> Option<ShortAddress> {
    let iid = dst.iid();
    if iid[0..6] == [0x00, 0x00, 0x00, 0xff, 0xfe, 0x00] {
        Some(ShortAddress(u16::from_be_bytes([iid[6], iid[7]])))
    } else {
        None
    }
}

/// Finds a neighbor whose derived link-local IID matches `dst`'s.
fn neighbor_for_eid<const N: usize>(dst: &V6Addr, neighbors: &NeighborTable<N>) -> Option<ShortAddress> {
    neighbors
        .iter()
        .find(|n| n.is_valid() && crate::addr::compute_iid(MacAddress::Short(n.short_addr)) == dst.iid())
        .map(|n| n.short_addr)
}

pub struct Forwarder {
    send_queue: Vec<SendEntry, MAX_SEND_QUEUE>,
    resolving_queue: Vec<ResolvingEntry, MAX_RESOLVING_QUEUE>,
    reassembly: Vec<ReassemblyEntry, MAX_REASSEMBLY>,
    next_datagram_tag: u16,
    config: ForwarderConfig,
    rx_on_when_idle: bool,
    poll_due_ms: u32,
    last_reap_s: u32,
}

impl Forwarder {
    pub fn new(config: ForwarderConfig, datagram_tag_seed: u16) -> Self {
        Self {
            send_queue: Vec::new(),
            resolving_queue: Vec::new(),
            reassembly: Vec::new(),
            next_datagram_tag: datagram_tag_seed,
            config,
            rx_on_when_idle: true,
            poll_due_ms: 0,
            last_reap_s: 0,
        }
    }

    pub fn alloc_datagram_tag(&mut self) -> u16 {
        let tag = self.next_datagram_tag;
        self.next_datagram_tag = self.next_datagram_tag.wrapping_add(1);
        tag
    }

    /// `SendMessage`: appends to the SendQueue. The caller is expected
    /// to have already set `childMask`/`directTx` on the message's meta
    /// before calling this for indirect delivery.
    pub fn send_message(&mut self, id: MessageId, direct_tx: bool) -> Result<()> {
        self.send_queue.push(SendEntry { id, direct_tx }).map_err(|_| ThreadError::NoBufs)
    }

    pub fn park_for_resolve(&mut self, id: MessageId, target: V6Addr) -> Result<()> {
        self.resolving_queue.push(ResolvingEntry { id, target }).map_err(|_| ThreadError::NoBufs)
    }

    /// Moves every resolving-queue entry for `target` back onto the
    /// SendQueue as a direct send. Returns the number drained.
    pub fn resolved(&mut self, target: V6Addr) -> usize {
        let mut drained = 0;
        let mut i = 0;
        while i < self.resolving_queue.len() {
            if self.resolving_queue[i].target == target {
                let entry = self.resolving_queue.remove(i);
                let _ = self.send_queue.push(SendEntry { id: entry.id, direct_tx: true });
                drained += 1;
            } else {
                i += 1;
            }
        }
        drained
    }

    /// `ScheduleTransmission`: prefers the next indirect message whose
    /// `childMask` covers a child with `dataRequestPending` set, else
    /// dequeues the first direct-transmit entry. Returns the message to
    /// send plus, for indirect delivery, the serviced child's neighbor-
    /// table index.
    pub fn schedule_transmission<const N: usize, const P: usize>(
        &mut self,
        pool: &MessagePool<P>,
        neighbors: &NeighborTable<N>,
    ) -> Option<(SendEntry, Option<usize>)> {
        for (idx, n) in neighbors.iter().enumerate() {
            if !n.is_valid() || !n.data_request_pending {
                continue;
            }
            if let Some(pos) = self
                .send_queue
                .iter()
                .position(|e| pool.meta(e.id).map(|m| m.child_mask & (1 << idx) != 0).unwrap_or(false))
            {
                return Some((self.send_queue[pos], Some(idx)));
            }
        }
        let pos = self.send_queue.iter().position(|e| e.direct_tx)?;
        Some((self.send_queue.remove(pos), None))
    }

    /// Clears `child_idx`'s bit in `id`'s `childMask` after a successful
    /// indirect transmit; once no child is left pending and the message
    /// isn't also a direct send, it's dequeued. Returns whether it was.
    pub fn mark_child_served<const P: usize>(&mut self, pool: &mut MessagePool<P>, id: MessageId, child_idx: usize) -> Result<bool> {
        let meta = pool.meta_mut(id)?;
        meta.child_mask &= !(1u32 << child_idx);
        let done = !meta.direct_tx && !meta.child_pending();
        if done {
            if let Some(pos) = self.send_queue.iter().position(|e| e.id == id) {
                self.send_queue.remove(pos);
            }
        }
        Ok(done)
    }

    /// Route selection for a direct-transmit message: link-local and
    /// multicast destinations go straight out over the MAC; anything
    /// else is resolved to an Rloc16 (via a neighbor match, the
    /// resolver's cache, or a network-data route) and, if it isn't a
    /// one-hop neighbor, wrapped in a mesh header towards the next hop.
    #[allow(clippy::too_many_arguments)]
    pub fn select_route<const N: usize>(
        dst: V6Addr,
        our_short: ShortAddress,
        is_ffd: bool,
        parent: ShortAddress,
        neighbors: &NeighborTable<N>,
        resolver: &mut impl RlocResolve,
        route: &impl RouteLookup,
        next_hop: &impl NextHop,
    ) -> Result<RouteDecision> {
        if dst.is_link_local() || dst.is_multicast() {
            let mac = if dst.is_multicast() {
                MacAddress::Short(ShortAddress(0xffff))
            } else {
                mac_addr_from_iid(dst.iid())
            };
            return Ok(RouteDecision::Direct(mac));
        }

        let mesh_dest = if !is_ffd {
            parent
        } else if let Some(short) = rloc16_from_routing_locator(&dst) {
            short
        } else if let Some(short) = neighbor_for_eid(&dst, neighbors) {
            short
        } else if route.is_on_mesh(&dst) {
            match resolver.resolve(dst) {
                Ok(rloc) => rloc,
                Err(ThreadError::LeaseQuery) => return Ok(RouteDecision::Parked),
                Err(e) => return Err(e),
            }
        } else {
            route.route_lookup(V6Addr::UNSPECIFIED, dst).ok_or(ThreadError::NoRoute)?
        };

        if let Some(n) = neighbors.by_short(mesh_dest) {
            return Ok(RouteDecision::Direct(MacAddress::Extended(n.ext_addr)));
        }

        let hop = next_hop.next_hop(mesh_dest).ok_or(ThreadError::NoRoute)?;
        let hop_mac = neighbors.by_short(hop).map(|n| MacAddress::Extended(n.ext_addr)).ok_or(ThreadError::NoRoute)?;
        Ok(RouteDecision::Mesh {
            mesh_header: MeshHeader { hops_left: DEFAULT_HOPS_LEFT, origin: our_short, destination: mesh_dest },
            next_hop_mac: hop_mac,
        })
    }

    /// Mesh transit for a forwarded (not locally destined) frame:
    /// decrements `hopsLeft`, dropping once it reaches zero.
    pub fn mesh_transit(mesh: MeshHeader, our_short: ShortAddress) -> MeshTransit {
        if mesh.destination == our_short {
            return MeshTransit::ForUs;
        }
        if mesh.hops_left == 0 {
            return MeshTransit::Drop;
        }
        MeshTransit::Forward(MeshHeader { hops_left: mesh.hops_left - 1, ..mesh })
    }

    /// `CheckReachability`: approximated, since this core has no MLE
    /// route table of its own, as "a known neighbor, an on-mesh
    /// destination, or multicast". `false` means the caller should send
    /// an MLE link-reject to `prev_hop` and drop the frame.
    pub fn check_reachability<const N: usize>(ip_dst: &V6Addr, neighbors: &NeighborTable<N>, route: &impl RouteLookup) -> bool {
        ip_dst.is_multicast() || neighbor_for_eid(ip_dst, neighbors).is_some() || route.is_on_mesh(ip_dst)
    }

    /// Writes the next fragment of `payload` (the full compressed
    /// datagram) starting at `offset` into `out`, bounded by
    /// `frame_budget`. Every fragment but the last is padded down to a
    /// multiple of 8 payload bytes. Returns `(bytes written, new offset)`.
    pub fn next_fragment(payload: &[u8], datagram_tag: u16, offset: usize, frame_budget: usize, out: &mut [u8]) -> Result<(usize, usize)> {
        let datagram_size = payload.len() as u16;
        let header = FragHeader {
            datagram_size,
            datagram_tag,
            offset_eighths: if offset == 0 { None } else { Some((offset / 8) as u8) },
        };
        let hlen = header.encoded_len();
        if frame_budget <= hlen {
            return Err(ThreadError::NoBufs);
        }
        let remaining = payload.len() - offset;
        let mut take = remaining.min(frame_budget - hlen);
        let is_final = offset + take >= payload.len();
        if !is_final {
            take -= take % 8;
            if take == 0 {
                return Err(ThreadError::NoBufs);
            }
        }
        let n = header.encode(out)?;
        out[n..n + take].copy_from_slice(&payload[offset..offset + take]);
        Ok((n + take, offset + take))
    }

    /// Handles one arriving fragment: matches it against an in-progress
    /// reassembly by `(size, tag, offset)`, or starts a new entry for a
    /// first fragment. Returns the completed message id once the last
    /// fragment lands.
    pub fn reassemble<const P: usize>(&mut self, pool: &mut MessagePool<P>, header: FragHeader, fragment_payload: &[u8]) -> Result<Option<MessageId>> {
        let offset = header.offset_eighths.map(|e| e as u16 * 8).unwrap_or(0);

        if let Some(pos) = self
            .reassembly
            .iter()
            .position(|e| e.datagram_size == header.datagram_size && e.datagram_tag == header.datagram_tag && e.received == offset)
        {
            let id = self.reassembly[pos].message;
            pool.append(id, fragment_payload)?;
            self.reassembly[pos].received += fragment_payload.len() as u16;
            self.reassembly[pos].timeout_s = self.config.reassembly_timeout_s;
            if self.reassembly[pos].received >= self.reassembly[pos].datagram_size {
                self.reassembly.remove(pos);
                return Ok(Some(id));
            }
            return Ok(None);
        }

        if offset != 0 {
            return Err(ThreadError::Drop);
        }

        let id = pool.new_message(crate::buffer::MessageType::Lowpan6, 0)?;
        if let Err(e) = pool.append(id, fragment_payload) {
            let _ = pool.free(id);
            return Err(e);
        }
        if fragment_payload.len() as u16 >= header.datagram_size {
            return Ok(Some(id));
        }
        self.reassembly
            .push(ReassemblyEntry {
                datagram_size: header.datagram_size,
                datagram_tag: header.datagram_tag,
                received: fragment_payload.len() as u16,
                timeout_s: self.config.reassembly_timeout_s,
                message: id,
            })
            .map_err(|_| ThreadError::NoBufs)?;
        Ok(None)
    }

    /// 1Hz reap tasklet: ages every in-progress reassembly down,
    /// freeing (and dropping) any that time out.
    pub fn reap_reassembly<const P: usize>(&mut self, pool: &mut MessagePool<P>, now_s: u32) {
        if now_s == self.last_reap_s {
            return;
        }
        self.last_reap_s = now_s;
        let mut i = 0;
        while i < self.reassembly.len() {
            self.reassembly[i].timeout_s = self.reassembly[i].timeout_s.saturating_sub(1);
            if self.reassembly[i].timeout_s == 0 {
                let entry = self.reassembly.remove(i);
                let _ = pool.free(entry.message);
            } else {
                i += 1;
            }
        }
    }

    pub fn set_rx_on_when_idle(&mut self, now_ms: u32, enabled: bool) {
        self.rx_on_when_idle = enabled;
        if !enabled {
            self.poll_due_ms = now_ms + self.config.poll_period_ms;
        }
    }

    /// Sleepy-child poll timer: returns `true` (and rearms) once the
    /// poll period elapses. Always `false` while `rxOnWhenIdle` is set.
    pub fn poll_due(&mut self, now_ms: u32) -> bool {
        if self.rx_on_when_idle {
            return false;
        }
        if now_ms >= self.poll_due_ms {
            self.poll_due_ms = now_ms + self.config.poll_period_ms;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffer::MessageType;
    use crate::neighbor::Mode;

    struct NoRoute;
    impl RouteLookup for NoRoute {
        fn route_lookup(&self, _src: V6Addr, _dst: V6Addr) -> Option<ShortAddress> {
            None
        }
        fn is_on_mesh(&self, _addr: &V6Addr) -> bool {
            false
        }
    }

    struct NoNextHop;
    impl NextHop for NoNextHop {
        fn next_hop(&self, _dest: ShortAddress) -> Option<ShortAddress> {
            None
        }
    }

    struct AlwaysQuery;
    impl RlocResolve for AlwaysQuery {
        fn resolve(&mut self, _target: V6Addr) -> Result<ShortAddress> {
            Err(ThreadError::LeaseQuery)
        }
    }

    #[test]
    fn send_and_schedule_direct() {
        let mut pool: MessagePool<4> = MessagePool::new();
        let id = pool.new_message(MessageType::Ip6, 0).unwrap();
        let neighbors: NeighborTable<4> = NeighborTable::new();
        let mut fw = Forwarder::new(ForwarderConfig::default(), 0);
        fw.send_message(id, true).unwrap();
        let (entry, child) = fw.schedule_transmission(&pool, &neighbors).unwrap();
        assert_eq!(entry.id, id);
        assert!(child.is_none());
        assert!(fw.schedule_transmission(&pool, &neighbors).is_none());
    }

    #[test]
    fn indirect_delivery_clears_child_mask_before_removal() {
        let mut pool: MessagePool<4> = MessagePool::new();
        let id = pool.new_message(MessageType::Ip6, 0).unwrap();
        pool.meta_mut(id).unwrap().direct_tx = false;
        pool.meta_mut(id).unwrap().child_mask = 0b1;

        let mut neighbors: NeighborTable<4> = NeighborTable::new();
        neighbors.insert(ExtendedAddress(1), ShortAddress(0x401), Mode::empty()).unwrap();
        neighbors.iter_mut().next().unwrap().data_request_pending = true;

        let mut fw = Forwarder::new(ForwarderConfig::default(), 0);
        fw.send_message(id, false).unwrap();

        let (entry, child) = fw.schedule_transmission(&pool, &neighbors).unwrap();
        assert_eq!(entry.id, id);
        assert_eq!(child, Some(0));

        let done = fw.mark_child_served(&mut pool, id, 0).unwrap();
        assert!(done);
        assert!(fw.schedule_transmission(&pool, &neighbors).is_none());
    }

    #[test]
    fn link_local_destination_routes_direct_without_mesh_header() {
        let iid = crate::addr::compute_iid(MacAddress::Short(ShortAddress(0xaabb)));
        let dst = V6Addr::with_iid([0xfe, 0x80, 0, 0, 0, 0, 0, 0], iid);
        let neighbors: NeighborTable<4> = NeighborTable::new();
        let mut resolver = AlwaysQuery;
        let decision = Forwarder::select_route(dst, ShortAddress(1), true, ShortAddress(0), &neighbors, &mut resolver, &NoRoute, &NoNextHop).unwrap();
        assert_eq!(decision, RouteDecision::Direct(MacAddress::Short(ShortAddress(0xaabb))));
    }

    #[test]
    fn off_mesh_destination_with_no_route_fails() {
        let dst = V6Addr([0x20, 0x01, 0xdb, 0x08, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        let neighbors: NeighborTable<4> = NeighborTable::new();
        let mut resolver = AlwaysQuery;
        let result = Forwarder::select_route(dst, ShortAddress(1), true, ShortAddress(0), &neighbors, &mut resolver, &NoRoute, &NoNextHop);
        assert_eq!(result, Err(ThreadError::NoRoute));
    }

    #[test]
    fn rfd_always_routes_via_parent() {
        let dst = V6Addr([0x20, 0x01, 0xdb, 0x08, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        let mut neighbors: NeighborTable<4> = NeighborTable::new();
        neighbors.insert(ExtendedAddress(9), ShortAddress(0x0400), Mode::FFD).unwrap();
        let mut resolver = AlwaysQuery;
        let decision = Forwarder::select_route(dst, ShortAddress(0x0c01), false, ShortAddress(0x0400), &neighbors, &mut resolver, &NoRoute, &NoNextHop).unwrap();
        assert_eq!(decision, RouteDecision::Direct(MacAddress::Extended(ExtendedAddress(9))));
    }

    #[test]
    fn fragment_round_trip_reassembles() {
        let payload: Vec<u8, 64> = (0..40u8).collect();
        let mut pool: MessagePool<8> = MessagePool::new();
        let mut fw = Forwarder::new(ForwarderConfig::default(), 0);
        let tag = fw.alloc_datagram_tag();

        let mut frame = [0u8; 32];
        let (n1, off1) = Forwarder::next_fragment(&payload, tag, 0, 20, &mut frame).unwrap();
        let (h1, hl1) = FragHeader::decode(&frame[..n1]).unwrap();
        let id = fw.reassemble(&mut pool, h1, &frame[hl1..n1]).unwrap();
        assert!(id.is_none());

        let (n2, off2) = Forwarder::next_fragment(&payload, tag, off1, 32, &mut frame).unwrap();
        let (h2, hl2) = FragHeader::decode(&frame[..n2]).unwrap();
        let id2 = fw.reassemble(&mut pool, h2, &frame[hl2..n2]).unwrap();
        assert_eq!(off2, payload.len());

        let id2 = id2.unwrap();
        let mut out = [0u8; 64];
        let n = pool.read(id2, 0, &mut out).unwrap();
        assert_eq!(&out[..n], &payload[..]);
    }

    #[test]
    fn reassembly_reaps_after_timeout() {
        let mut pool: MessagePool<8> = MessagePool::new();
        let mut fw = Forwarder::new(ForwarderConfig { reassembly_timeout_s: 2, ..ForwarderConfig::default() }, 0);
        let header = FragHeader { datagram_size: 40, datagram_tag: 1, offset_eighths: None };
        fw.reassemble(&mut pool, header, &[0u8; 10]).unwrap();
        assert_eq!(pool.free_count(), 7);
        fw.reap_reassembly(&mut pool, 1);
        fw.reap_reassembly(&mut pool, 2);
        assert_eq!(pool.free_count(), 8);
    }

    #[test]
    fn mesh_transit_decrements_and_drops_at_zero() {
        let h = MeshHeader { hops_left: 1, origin: ShortAddress(1), destination: ShortAddress(2) };
        match Forwarder::mesh_transit(h, ShortAddress(9)) {
            MeshTransit::Forward(f) => assert_eq!(f.hops_left, 0),
            _ => panic!("expected forward"),
        }
        let h2 = MeshHeader { hops_left: 0, origin: ShortAddress(1), destination: ShortAddress(2) };
        assert_eq!(Forwarder::mesh_transit(h2, ShortAddress(9)), MeshTransit::Drop);
    }

    #[test]
    fn poll_timer_only_fires_when_rx_off() {
        let mut fw = Forwarder::new(ForwarderConfig { poll_period_ms: 100, ..ForwarderConfig::default() }, 0);
        assert!(!fw.poll_due(1000));
        fw.set_rx_on_when_idle(0, false);
        assert!(!fw.poll_due(50));
        assert!(fw.poll_due(100));
    }

    #[test]
    fn classify_incoming_routes_mesh_frames() {
        let h = MeshHeader { hops_left: 5, origin: ShortAddress(1), destination: ShortAddress(2) };
        let mut buf = [0u8; 16];
        let n = h.encode(&mut buf).unwrap();
        match classify_incoming(&buf[..n]).unwrap() {
            Incoming::Mesh { mesh_header, payload_offset } => {
                assert_eq!(mesh_header, h);
                assert_eq!(payload_offset, n);
            }
            other => panic!("expected Mesh, got {other:?}"),
        }
    }

    #[test]
    fn classify_incoming_routes_fragments() {
        let header = FragHeader { datagram_size: 40, datagram_tag: 7, offset_eighths: None };
        let mut buf = [0u8; 16];
        let n = header.encode(&mut buf).unwrap();
        match classify_incoming(&buf[..n]).unwrap() {
            Incoming::Fragment { frag_header, payload_offset } => {
                assert_eq!(frag_header, header);
                assert_eq!(payload_offset, n);
            }
            other => panic!("expected Fragment, got {other:?}"),
        }
    }

    #[test]
    fn classify_incoming_routes_iphc_and_discards_nalp() {
        assert_eq!(classify_incoming(&[0x7a, 0x33]).unwrap(), Incoming::Iphc);
        assert_eq!(classify_incoming(&[0x00]).unwrap(), Incoming::Discard);
        assert_eq!(classify_incoming(&[]), Err(ThreadError::Parse));
    }
}
