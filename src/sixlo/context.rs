//! 6LoWPAN compression contexts, spec §3/§4.4/§4.7.
//!
//! The Network Data Leader owns allocation (§4.7: "find any existing
//! context for that prefix... else allocate a new context id from the
//! free pool"); the codec here only ever reads, via [`ContextTable`].
//! Mirrors OpenThread's `Lowpan::GetContext`.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use crate::addr::V6Addr;

pub const MAX_CONTEXTS: usize = 16;

/// One compression context: a prefix and the length (in bits) of it
/// that participates in address compression.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Context {
    pub prefix: [u8; 16],
    pub prefix_len: u8,
    /// Whether this context is currently eligible for compression (set
    /// false once its last border-router TLV is withdrawn, per §4.7,
    /// pending the reuse-delay timer freeing the slot entirely).
    pub compress: bool,
}

impl Context {
    fn matches(&self, addr: &V6Addr) -> bool {
        prefix_match_len(&self.prefix, &addr.0) >= self.prefix_len
    }
}

/// Longest common prefix length, in bits, capped at `max_bits`.
fn common_prefix_len(a: &[u8], b: &[u8], max_bits: u8) -> u8 {
    let mut bits = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        if bits >= max_bits {
            break;
        }
        let diff = x ^ y;
        if diff == 0 {
            bits += 8;
        } else {
            bits += diff.leading_zeros() as u8;
            break;
        }
    }
    bits.min(max_bits)
}

fn prefix_match_len(prefix: &[u8; 16], addr: &[u8; 16]) -> u8 {
    common_prefix_len(prefix, addr, 128)
}

/// Fixed-capacity store of the 15 assignable context ids (1..=15);
/// slot 0 is reserved for the mesh-local prefix and always present.
#[derive(Clone)]
pub struct ContextTable {
    slots: [Option<Context>; MAX_CONTEXTS],
}

impl Default for ContextTable {
    fn default() -> Self {
        Self { slots: [None; MAX_CONTEXTS] }
    }
}

impl ContextTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u8) -> Option<&Context> {
        self.slots.get(id as usize).and_then(|s| s.as_ref())
    }

    pub fn set(&mut self, id: u8, ctx: Context) {
        if let Some(slot) = self.slots.get_mut(id as usize) {
            *slot = Some(ctx);
        }
    }

    pub fn clear(&mut self, id: u8) {
        if let Some(slot) = self.slots.get_mut(id as usize) {
            *slot = None;
        }
    }

    /// Finds the best (longest-prefix) compressing context covering
    /// `addr`, per §4.4's "matches the computed IID ... under context".
    pub fn find_for(&self, addr: &V6Addr) -> Option<(u8, Context)> {
        let mut best: Option<(u8, Context)> = None;
        for (id, slot) in self.slots.iter().enumerate() {
            if let Some(ctx) = slot {
                if ctx.compress && ctx.matches(addr) {
                    if best.map(|(_, b)| ctx.prefix_len > b.prefix_len).unwrap_or(true) {
                        best = Some((id as u8, *ctx));
                    }
                }
            }
        }
        best
    }
}
