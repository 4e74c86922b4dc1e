//! Neighbor / child / router table storage.
//!
//! Spec §3 describes these records as "opaque, consumed not owned" by
//! the core's six subsystems. To make the MAC controller's whitelist
//! and link-security handling, the Mesh Forwarder's route selection,
//! and the Address Resolver's child lookups testable in isolation, we
//! give them a concrete, fixed-capacity home here. This is not an MLE
//! implementation: no parent/child discovery ceremony lives here, only
//! the storage the rest of the core reads and writes.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use heapless::Vec;

use crate::addr::{ExtendedAddress, ShortAddress};
use crate::error::{Result, ThreadError};

bitflags::bitflags! {
    /// Mode bitmask carried by MLE, consumed here for whitelist /
    /// address-resolver child-mode checks (spec §3, §4.6).
    pub struct Mode: u8 {
        const RX_ON_WHEN_IDLE   = 0b0000_0001;
        const SECURE_DATA_REQ   = 0b0000_0010;
        const FFD               = 0b0000_0100;
        const FULL_NETWORK_DATA = 0b0000_1000;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NeighborState {
    Invalid,
    ParentRequest,
    ChildIdRequest,
    Valid,
}

/// One neighbor/child/router entry, per spec §3's data model.
#[derive(Clone, Copy, Debug)]
pub struct NeighborEntry {
    pub state: NeighborState,
    pub short_addr: ShortAddress,
    pub ext_addr: ExtendedAddress,
    pub mode: Mode,
    pub link_frame_counter: u32,
    pub previous_key: bool,
    /// Monotonic seconds timestamp of the last frame received from
    /// this neighbor, used by the resolver's `LastTransactionTime`.
    pub last_heard_s: u32,
    /// Per spec §4.5, set when this child has a message parked for
    /// indirect (sleepy) delivery; cleared once drained.
    pub data_request_pending: bool,
}

impl NeighborEntry {
    fn empty() -> Self {
        Self {
            state: NeighborState::Invalid,
            short_addr: ShortAddress(0),
            ext_addr: ExtendedAddress(0),
            mode: Mode::empty(),
            link_frame_counter: 0,
            previous_key: false,
            last_heard_s: 0,
            data_request_pending: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.state == NeighborState::Valid
    }

    /// FFD-equivalent in the sense the address resolver cares about
    /// (spec §4.6: "mode does not include the FFD bit").
    pub fn is_rfd(&self) -> bool {
        !self.mode.contains(Mode::FFD)
    }
}

/// Fixed-capacity neighbor/child/router table.
pub struct NeighborTable<const N: usize> {
    entries: Vec<NeighborEntry, N>,
}

impl<const N: usize> Default for NeighborTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> NeighborTable<N> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn iter(&self) -> impl Iterator<Item = &NeighborEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut NeighborEntry> {
        self.entries.iter_mut()
    }

    pub fn by_short(&self, addr: ShortAddress) -> Option<&NeighborEntry> {
        self.entries.iter().find(|e| e.short_addr == addr && e.is_valid())
    }

    pub fn by_ext(&self, addr: ExtendedAddress) -> Option<&NeighborEntry> {
        self.entries.iter().find(|e| e.ext_addr == addr && e.is_valid())
    }

    pub fn by_ext_mut(&mut self, addr: ExtendedAddress) -> Option<&mut NeighborEntry> {
        self.entries.iter_mut().find(|e| e.ext_addr == addr && e.is_valid())
    }

    /// Inserts a new `Valid` entry, reusing an `Invalid` slot if one
    /// exists. Fails with `NoBufs` if the table is full of live entries.
    pub fn insert(&mut self, ext_addr: ExtendedAddress, short_addr: ShortAddress, mode: Mode) -> Result<()> {
        if let Some(slot) = self.entries.iter_mut().find(|e| e.state == NeighborState::Invalid) {
            slot.ext_addr = ext_addr;
            slot.short_addr = short_addr;
            slot.mode = mode;
            slot.state = NeighborState::Valid;
            slot.link_frame_counter = 0;
            slot.previous_key = false;
            return Ok(());
        }
        let mut e = NeighborEntry::empty();
        e.ext_addr = ext_addr;
        e.short_addr = short_addr;
        e.mode = mode;
        e.state = NeighborState::Valid;
        self.entries.push(e).map_err(|_| ThreadError::NoBufs)
    }

    /// Marks a neighbor `Invalid` after exhausting MAC retries, per
    /// spec §4.3/§7.
    pub fn invalidate(&mut self, ext_addr: ExtendedAddress) {
        if let Some(e) = self.by_ext_mut(ext_addr) {
            e.state = NeighborState::Invalid;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_and_lookup() {
        let mut t: NeighborTable<4> = NeighborTable::new();
        t.insert(ExtendedAddress(1), ShortAddress(0x400), Mode::FFD).unwrap();
        assert!(t.by_ext(ExtendedAddress(1)).unwrap().is_valid());
        assert_eq!(t.by_short(ShortAddress(0x400)).unwrap().ext_addr, ExtendedAddress(1));
    }

    #[test]
    fn invalidate_on_retry_exhaustion() {
        let mut t: NeighborTable<4> = NeighborTable::new();
        t.insert(ExtendedAddress(1), ShortAddress(1), Mode::empty()).unwrap();
        t.invalidate(ExtendedAddress(1));
        assert!(t.by_ext(ExtendedAddress(1)).is_none());
    }

    #[test]
    fn reuses_invalid_slot() {
        let mut t: NeighborTable<2> = NeighborTable::new();
        t.insert(ExtendedAddress(1), ShortAddress(1), Mode::empty()).unwrap();
        t.insert(ExtendedAddress(2), ShortAddress(2), Mode::empty()).unwrap();
        t.invalidate(ExtendedAddress(1));
        t.insert(ExtendedAddress(3), ShortAddress(3), Mode::empty()).unwrap();
        assert!(t.by_ext(ExtendedAddress(3)).is_some());
    }

    #[test]
    fn full_table_of_valid_entries_fails() {
        let mut t: NeighborTable<2> = NeighborTable::new();
        t.insert(ExtendedAddress(1), ShortAddress(1), Mode::empty()).unwrap();
        t.insert(ExtendedAddress(2), ShortAddress(2), Mode::empty()).unwrap();
        assert_eq!(
            t.insert(ExtendedAddress(3), ShortAddress(3), Mode::empty()),
            Err(ThreadError::NoBufs)
        );
    }
}
