//! Fixed-capacity message buffer pool: the cell arena every other
//! subsystem allocates its messages from.
//!
//! A message is a head cell plus zero or more follow-on cells chained
//! by arena index (the source's intrusive next/prev pointers, per the
//! design notes, become `u16` indices rather than raw pointers). The
//! head cell reserves [`HEAD_RESERVED`] bytes for headers prepended
//! later, so its usable payload area is shorter than a follow-on
//! cell's; `read`/`write` account for that split transparently.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

pub mod message;
mod queue;

pub use message::{MessageId, MessageMeta, MessageType, Priority};

use crate::error::{Result, ThreadError};
use queue::{AllKind, PriorityQueue};

/// Bytes held by a single cell.
pub const CELL_SIZE: usize = 128;
/// Bytes of the head cell reserved for headers, unavailable as plain payload.
const HEAD_RESERVED: usize = 16;
/// Usable payload bytes in a head cell.
pub const HEAD_PAYLOAD: usize = CELL_SIZE - HEAD_RESERVED;
/// Usable payload bytes in a follow-on cell.
pub const FOLLOW_PAYLOAD: usize = CELL_SIZE;

/// Cap on how many cells a single grow operation can append in one
/// call; bounded by a stack scratch buffer rather than `alloc`. Well
/// above what an IPv6 MTU (1280B) datagram needs at 128B/cell.
const MAX_GROW_CELLS: usize = 20;

#[derive(Clone, Copy)]
struct Cell {
    next: Option<u16>,
    data: [u8; CELL_SIZE],
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            next: None,
            data: [0u8; CELL_SIZE],
        }
    }
}

/// A fixed-capacity arena of `N` cells, doled out to messages on
/// demand. `N` plays the role of the source's `NumMessageBuffers` /
/// platform buffer-pool sizing, fixed at compile time as const
/// generics require; see [`crate::config::PoolConfig`] for the
/// intended default a platform should size `N` to.
pub struct MessagePool<const N: usize> {
    cells: [Cell; N],
    metas: [Option<MessageMeta>; N],
    free_head: Option<u16>,
    free_count: usize,
    all: PriorityQueue<AllKind>,
}

impl<const N: usize> Default for MessagePool<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> MessagePool<N> {
    pub fn new() -> Self {
        assert!(N > 0 && N <= u16::MAX as usize, "pool size out of range");
        let mut cells: [Cell; N] = core::array::from_fn(|_| Cell::default());
        for i in 0..N - 1 {
            cells[i].next = Some((i + 1) as u16);
        }
        Self {
            cells,
            metas: core::array::from_fn(|_| None),
            free_head: Some(0),
            free_count: N,
            all: PriorityQueue::new(),
        }
    }

    /// Cells currently unallocated.
    pub fn free_count(&self) -> usize {
        self.free_count
    }

    /// Total cells in the pool, `free_count() + cells held by live messages`.
    pub fn total_cells(&self) -> usize {
        N
    }

    pub fn meta(&self, id: MessageId) -> Result<&MessageMeta> {
        self.metas
            .get(id.raw() as usize)
            .and_then(|m| m.as_ref())
            .ok_or(ThreadError::NotFound)
    }

    pub fn meta_mut(&mut self, id: MessageId) -> Result<&mut MessageMeta> {
        self.metas
            .get_mut(id.raw() as usize)
            .and_then(|m| m.as_mut())
            .ok_or(ThreadError::NotFound)
    }

    /// Allocates a new message with `reserved` header bytes and zero
    /// payload length. Fails with `NoBufs`, leaving the pool unchanged,
    /// if a head cell (or the extra cells `reserved` requires) cannot
    /// be found.
    pub fn new_message(&mut self, kind: message::MessageType, reserved: u16) -> Result<MessageId> {
        let head = self.alloc_cell().ok_or(ThreadError::NoBufs)?;
        self.metas[head as usize] = Some(MessageMeta::new(kind, reserved));
        let id = MessageId(head);

        let needed = Self::cells_for_len(reserved);
        if needed > 1 {
            if let Err(e) = self.grow_by(id, needed - 1) {
                self.metas[head as usize] = None;
                self.free_single_cell(head);
                return Err(e);
            }
        }

        self.all.enqueue(&mut self.metas, id)?;
        Ok(id)
    }

    /// Returns a message's cells to the free list. Fails with
    /// `InvalidState` if the message is still enqueued on an owner
    /// queue; the caller must dequeue it first.
    pub fn free(&mut self, id: MessageId) -> Result<()> {
        let meta = self.meta(id)?;
        if meta.enqueued {
            return Err(ThreadError::InvalidState);
        }
        self.all.remove(&mut self.metas, id)?;
        self.free_chain(id.raw());
        self.metas[id.raw() as usize] = None;
        Ok(())
    }

    /// Grows or shrinks a message to `new_length` bytes of payload,
    /// allocating/freeing follow-on cells as needed. On `NoBufs` the
    /// message is left exactly as it was.
    pub fn set_length(&mut self, id: MessageId, new_length: u16) -> Result<()> {
        let cell_count = self.meta(id)?.cell_count;
        let needed = Self::cells_for_len(new_length);

        if needed < cell_count {
            self.shrink_to(id, needed);
        } else if needed > cell_count {
            self.grow_by(id, needed - cell_count)?;
        }

        let meta = self.meta_mut(id)?;
        meta.length = new_length;
        if meta.offset > meta.length {
            meta.offset = meta.length;
        }
        message::check_invariants(meta)
    }

    /// Copies up to `dst.len()` bytes starting at `offset` out of the
    /// message, returning the number actually copied (bounded by the
    /// message's length).
    pub fn read(&self, id: MessageId, offset: u16, dst: &mut [u8]) -> Result<usize> {
        let meta = self.meta(id)?;
        let avail = meta.length.saturating_sub(offset) as usize;
        let n = dst.len().min(avail);
        if n == 0 {
            return Ok(0);
        }
        self.walk(id.raw(), offset, n, |cell_data, lo, hi, dst_off| {
            dst[dst_off..dst_off + (hi - lo)].copy_from_slice(&cell_data[lo..hi]);
        })?;
        Ok(n)
    }

    /// Writes `src` into the message starting at `offset`. Fails with
    /// `InvalidArgs` if that would run past the message's length.
    pub fn write(&mut self, id: MessageId, offset: u16, src: &[u8]) -> Result<()> {
        let length = self.meta(id)?.length;
        if offset as usize + src.len() > length as usize {
            return Err(ThreadError::InvalidArgs);
        }
        let head = id.raw();
        let n = src.len();
        self.walk_mut(head, offset, n, |cell_data, lo, hi, src_off| {
            cell_data[lo..hi].copy_from_slice(&src[src_off..src_off + (hi - lo)]);
        })
    }

    /// Copies `len` bytes from `src` (at `src_offset`) to `dst` (at
    /// `dst_offset`); both messages must live in this pool. Returns the
    /// number of bytes actually copied (bounded by `src`'s length).
    pub fn copy_to(
        &mut self,
        src: MessageId,
        src_offset: u16,
        dst: MessageId,
        dst_offset: u16,
        len: u16,
    ) -> Result<u16> {
        let mut buf = [0u8; 64];
        let mut copied = 0u16;
        while copied < len {
            let chunk = ((len - copied) as usize).min(buf.len());
            let n = self.read(src, src_offset + copied, &mut buf[..chunk])?;
            if n == 0 {
                break;
            }
            self.write(dst, dst_offset + copied, &buf[..n])?;
            copied += n as u16;
        }
        Ok(copied)
    }

    /// Prepends `buf` into the header reservation, shrinking `reserved`
    /// by `buf.len()`. Fails with `InvalidArgs` if more is requested
    /// than remains reserved.
    pub fn prepend(&mut self, id: MessageId, buf: &[u8]) -> Result<()> {
        let n = buf.len() as u16;
        let meta = self.meta(id)?;
        if n > meta.reserved {
            return Err(ThreadError::InvalidArgs);
        }
        let new_reserved = meta.reserved - n;
        self.meta_mut(id)?.reserved = new_reserved;
        self.write(id, new_reserved, buf)
    }

    /// Appends `buf` to the end of the message, growing it as needed.
    pub fn append(&mut self, id: MessageId, buf: &[u8]) -> Result<()> {
        let old_length = self.meta(id)?.length;
        let new_length = old_length
            .checked_add(buf.len() as u16)
            .ok_or(ThreadError::InvalidArgs)?;
        self.set_length(id, new_length)?;
        self.write(id, old_length, buf)
    }

    // --- cell-chain plumbing -------------------------------------------------

    fn alloc_cell(&mut self) -> Option<u16> {
        let head = self.free_head?;
        self.free_head = self.cells[head as usize].next;
        self.cells[head as usize].next = None;
        self.free_count -= 1;
        Some(head)
    }

    fn free_single_cell(&mut self, idx: u16) {
        self.cells[idx as usize].next = self.free_head;
        self.free_head = Some(idx);
        self.free_count += 1;
    }

    fn free_chain(&mut self, head: u16) {
        let mut cur = Some(head);
        while let Some(idx) = cur {
            let next = self.cells[idx as usize].next;
            self.free_single_cell(idx);
            cur = next;
        }
    }

    fn tail_of(&self, head: u16) -> u16 {
        let mut cur = head;
        while let Some(n) = self.cells[cur as usize].next {
            cur = n;
        }
        cur
    }

    /// Number of cells needed to hold `len` bytes of payload.
    fn cells_for_len(len: u16) -> u16 {
        let len = len as usize;
        if len <= HEAD_PAYLOAD {
            1
        } else {
            1 + ((len - HEAD_PAYLOAD + FOLLOW_PAYLOAD - 1) / FOLLOW_PAYLOAD) as u16
        }
    }

    /// Appends `add` follow-on cells to `id`'s chain. On failure, any
    /// cells already allocated this call are freed and the chain is
    /// left exactly as it was.
    fn grow_by(&mut self, id: MessageId, add: u16) -> Result<()> {
        if add as usize > MAX_GROW_CELLS {
            return Err(ThreadError::InvalidArgs);
        }
        let mut allocated = [0u16; MAX_GROW_CELLS];
        let mut count = 0usize;
        while count < add as usize {
            match self.alloc_cell() {
                Some(c) => {
                    allocated[count] = c;
                    count += 1;
                }
                None => break,
            }
        }
        if count < add as usize {
            for &c in &allocated[..count] {
                self.free_single_cell(c);
            }
            return Err(ThreadError::NoBufs);
        }

        let mut tail = self.tail_of(id.raw());
        for &c in &allocated[..count] {
            self.cells[tail as usize].next = Some(c);
            tail = c;
        }
        self.meta_mut(id)?.cell_count += add;
        Ok(())
    }

    /// Frees trailing cells so the chain is exactly `needed` cells long.
    fn shrink_to(&mut self, id: MessageId, needed: u16) {
        let head = id.raw();
        if needed == 0 {
            return;
        }
        let mut cur = head;
        for _ in 1..needed {
            if let Some(n) = self.cells[cur as usize].next {
                cur = n;
            } else {
                return;
            }
        }
        if let Some(first_extra) = self.cells[cur as usize].next {
            self.cells[cur as usize].next = None;
            self.free_chain(first_extra);
        }
        if let Ok(meta) = self.meta_mut(id) {
            meta.cell_count = needed;
        }
    }

    /// Calls `f(cell_data, lo, hi, local_off)` for each cell spanning
    /// `[offset, offset+n)`, where `local_off` is the running offset
    /// into the logical destination/source buffer.
    fn walk(
        &self,
        head: u16,
        offset: u16,
        n: usize,
        mut f: impl FnMut(&[u8; CELL_SIZE], usize, usize, usize),
    ) -> Result<()> {
        let mut skip = offset as usize;
        let mut cur = head;
        let mut cell_len = HEAD_PAYLOAD;
        let mut done = 0usize;
        loop {
            if skip < cell_len {
                let lo = skip;
                let take = (cell_len - lo).min(n - done);
                f(&self.cells[cur as usize].data, lo, lo + take, done);
                done += take;
                skip = 0;
                if done == n {
                    return Ok(());
                }
            } else {
                skip -= cell_len;
            }
            match self.cells[cur as usize].next {
                Some(next) => {
                    cur = next;
                    cell_len = FOLLOW_PAYLOAD;
                }
                None => return Err(ThreadError::InvalidState),
            }
        }
    }

    fn walk_mut(
        &mut self,
        head: u16,
        offset: u16,
        n: usize,
        mut f: impl FnMut(&mut [u8; CELL_SIZE], usize, usize, usize),
    ) -> Result<()> {
        let mut skip = offset as usize;
        let mut cur = head;
        let mut cell_len = HEAD_PAYLOAD;
        let mut done = 0usize;
        loop {
            if skip < cell_len {
                let lo = skip;
                let take = (cell_len - lo).min(n - done);
                f(&mut self.cells[cur as usize].data, lo, lo + take, done);
                done += take;
                skip = 0;
                if done == n {
                    return Ok(());
                }
            } else {
                skip -= cell_len;
            }
            match self.cells[cur as usize].next {
                Some(next) => {
                    cur = next;
                    cell_len = FOLLOW_PAYLOAD;
                }
                None => return Err(ThreadError::InvalidState),
            }
        }
    }
}
