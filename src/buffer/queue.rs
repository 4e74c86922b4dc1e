//! Generic singly-tagged queue machinery shared by per-owner message
//! queues and the pool-wide "all messages" visibility list.
//!
//! Both kinds of list thread through the same [`Link`] pair stored in
//! [`MessageMeta`] (one slot for whichever queue currently owns the
//! message, one for pool-wide membership) so a single generic
//! implementation serves both instead of duplicating the linked-list
//! bookkeeping.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use core::marker::PhantomData;

use super::message::{Link, MessageId, MessageMeta, Priority};
use crate::error::{Result, ThreadError};

/// Selects which of a message's two link slots / membership flags a
/// queue operates on.
pub(crate) trait LinkKind {
    fn link(meta: &MessageMeta) -> Link;
    fn set_link(meta: &mut MessageMeta, link: Link);
    fn is_member(meta: &MessageMeta) -> bool;
    fn set_member(meta: &mut MessageMeta, member: bool);
}

pub(crate) struct OwnerKind;

impl LinkKind for OwnerKind {
    fn link(meta: &MessageMeta) -> Link {
        meta.owner_link
    }
    fn set_link(meta: &mut MessageMeta, link: Link) {
        meta.owner_link = link;
    }
    fn is_member(meta: &MessageMeta) -> bool {
        meta.enqueued
    }
    fn set_member(meta: &mut MessageMeta, member: bool) {
        meta.enqueued = member;
    }
}

pub(crate) struct AllKind;

impl LinkKind for AllKind {
    fn link(meta: &MessageMeta) -> Link {
        meta.all_link
    }
    fn set_link(meta: &mut MessageMeta, link: Link) {
        meta.all_link = link;
    }
    fn is_member(meta: &MessageMeta) -> bool {
        meta.all_member
    }
    fn set_member(meta: &mut MessageMeta, member: bool) {
        meta.all_member = member;
    }
}

fn meta_mut(metas: &mut [Option<MessageMeta>], id: MessageId) -> Result<&mut MessageMeta> {
    metas
        .get_mut(id.raw() as usize)
        .and_then(|m| m.as_mut())
        .ok_or(ThreadError::NotFound)
}

fn meta(metas: &[Option<MessageMeta>], id: MessageId) -> Result<&MessageMeta> {
    metas
        .get(id.raw() as usize)
        .and_then(|m| m.as_ref())
        .ok_or(ThreadError::NotFound)
}

/// FIFO list of messages linked through one of a message's two link
/// slots, selected by `K`.
pub(crate) struct MessageQueue<K> {
    head: Option<u16>,
    tail: Option<u16>,
    _kind: PhantomData<K>,
}

impl<K> MessageQueue<K> {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            _kind: PhantomData,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

impl<K: LinkKind> MessageQueue<K> {
    /// Appends `id` to the tail. Fails with `Already` if the message is
    /// already a member of a queue using this link slot.
    pub(crate) fn enqueue(&mut self, metas: &mut [Option<MessageMeta>], id: MessageId) -> Result<()> {
        if K::is_member(meta(metas, id)?) {
            return Err(ThreadError::Already);
        }
        let prev_tail = self.tail;
        K::set_link(
            meta_mut(metas, id)?,
            Link {
                prev: prev_tail,
                next: None,
            },
        );
        K::set_member(meta_mut(metas, id)?, true);
        if let Some(t) = prev_tail {
            let mut link = K::link(meta(metas, MessageId(t))?);
            link.next = Some(id.raw());
            K::set_link(meta_mut(metas, MessageId(t))?, link);
        } else {
            self.head = Some(id.raw());
        }
        self.tail = Some(id.raw());
        Ok(())
    }

    /// Pops the head of the queue, or `None` if empty.
    pub(crate) fn dequeue(&mut self, metas: &mut [Option<MessageMeta>]) -> Option<MessageId> {
        let head = self.head?;
        let id = MessageId(head);
        self.unlink(metas, id).ok()?;
        Some(id)
    }

    /// Removes a specific message from the queue. Fails with `NotFound`
    /// if the message is not currently a member via this link slot.
    pub(crate) fn remove(&mut self, metas: &mut [Option<MessageMeta>], id: MessageId) -> Result<()> {
        if !K::is_member(meta(metas, id)?) {
            return Err(ThreadError::NotFound);
        }
        self.unlink(metas, id)
    }

    fn unlink(&mut self, metas: &mut [Option<MessageMeta>], id: MessageId) -> Result<()> {
        let link = K::link(meta(metas, id)?);
        match link.prev {
            Some(p) => {
                let mut pl = K::link(meta(metas, MessageId(p))?);
                pl.next = link.next;
                K::set_link(meta_mut(metas, MessageId(p))?, pl);
            }
            None => self.head = link.next,
        }
        match link.next {
            Some(n) => {
                let mut nl = K::link(meta(metas, MessageId(n))?);
                nl.prev = link.prev;
                K::set_link(meta_mut(metas, MessageId(n))?, nl);
            }
            None => self.tail = link.prev,
        }
        K::set_link(meta_mut(metas, id)?, Link::default());
        K::set_member(meta_mut(metas, id)?, false);
        Ok(())
    }
}

/// Four strict-priority `MessageQueue`s, dequeued High before Medium
/// before Low before VeryLow.
pub(crate) struct PriorityQueue<K> {
    lists: [MessageQueue<K>; Priority::COUNT],
}

impl<K> PriorityQueue<K> {
    pub(crate) const fn new() -> Self {
        Self {
            lists: [
                MessageQueue::new(),
                MessageQueue::new(),
                MessageQueue::new(),
                MessageQueue::new(),
            ],
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lists.iter().all(|l| l.is_empty())
    }
}

impl<K: LinkKind> PriorityQueue<K> {
    pub(crate) fn enqueue(&mut self, metas: &mut [Option<MessageMeta>], id: MessageId) -> Result<()> {
        let prio = meta(metas, id)?.priority;
        self.lists[prio.index()].enqueue(metas, id)
    }

    pub(crate) fn dequeue(&mut self, metas: &mut [Option<MessageMeta>]) -> Option<MessageId> {
        for list in self.lists.iter_mut().rev() {
            if let Some(id) = list.dequeue(metas) {
                return Some(id);
            }
        }
        None
    }

    pub(crate) fn remove(&mut self, metas: &mut [Option<MessageMeta>], id: MessageId) -> Result<()> {
        let prio = meta(metas, id)?.priority;
        self.lists[prio.index()].remove(metas, id)
    }

    /// Moves `id` to a different priority sublist, updating its stored
    /// priority. A no-op if the priority is unchanged.
    pub(crate) fn set_priority(
        &mut self,
        metas: &mut [Option<MessageMeta>],
        id: MessageId,
        new_priority: Priority,
    ) -> Result<()> {
        let old = meta(metas, id)?.priority;
        if old == new_priority {
            return Ok(());
        }
        self.lists[old.index()].remove(metas, id)?;
        meta_mut(metas, id)?.priority = new_priority;
        self.lists[new_priority.index()].enqueue(metas, id)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffer::message::MessageType;

    fn meta_array() -> [Option<MessageMeta>; 4] {
        [
            Some(MessageMeta::new(MessageType::Ip6, 0)),
            Some(MessageMeta::new(MessageType::Ip6, 0)),
            Some(MessageMeta::new(MessageType::Ip6, 0)),
            Some(MessageMeta::new(MessageType::Ip6, 0)),
        ]
    }

    #[test]
    fn fifo_order() {
        let mut metas = meta_array();
        let mut q: MessageQueue<OwnerKind> = MessageQueue::new();
        q.enqueue(&mut metas, MessageId(0)).unwrap();
        q.enqueue(&mut metas, MessageId(1)).unwrap();
        q.enqueue(&mut metas, MessageId(2)).unwrap();
        assert_eq!(q.dequeue(&mut metas), Some(MessageId(0)));
        assert_eq!(q.dequeue(&mut metas), Some(MessageId(1)));
        assert_eq!(q.dequeue(&mut metas), Some(MessageId(2)));
        assert_eq!(q.dequeue(&mut metas), None);
    }

    #[test]
    fn double_enqueue_fails() {
        let mut metas = meta_array();
        let mut q: MessageQueue<OwnerKind> = MessageQueue::new();
        q.enqueue(&mut metas, MessageId(0)).unwrap();
        assert_eq!(q.enqueue(&mut metas, MessageId(0)), Err(ThreadError::Already));
    }

    #[test]
    fn remove_absent_fails() {
        let mut metas = meta_array();
        let mut q: MessageQueue<OwnerKind> = MessageQueue::new();
        assert_eq!(q.remove(&mut metas, MessageId(0)), Err(ThreadError::NotFound));
    }

    #[test]
    fn remove_middle_relinks() {
        let mut metas = meta_array();
        let mut q: MessageQueue<OwnerKind> = MessageQueue::new();
        q.enqueue(&mut metas, MessageId(0)).unwrap();
        q.enqueue(&mut metas, MessageId(1)).unwrap();
        q.enqueue(&mut metas, MessageId(2)).unwrap();
        q.remove(&mut metas, MessageId(1)).unwrap();
        assert_eq!(q.dequeue(&mut metas), Some(MessageId(0)));
        assert_eq!(q.dequeue(&mut metas), Some(MessageId(2)));
        assert_eq!(q.dequeue(&mut metas), None);
    }

    #[test]
    fn priority_order() {
        let mut metas = meta_array();
        metas[0].as_mut().unwrap().priority = Priority::Low;
        metas[1].as_mut().unwrap().priority = Priority::High;
        metas[2].as_mut().unwrap().priority = Priority::Medium;
        let mut pq: PriorityQueue<OwnerKind> = PriorityQueue::new();
        pq.enqueue(&mut metas, MessageId(0)).unwrap();
        pq.enqueue(&mut metas, MessageId(1)).unwrap();
        pq.enqueue(&mut metas, MessageId(2)).unwrap();
        assert_eq!(pq.dequeue(&mut metas), Some(MessageId(1)));
        assert_eq!(pq.dequeue(&mut metas), Some(MessageId(2)));
        assert_eq!(pq.dequeue(&mut metas), Some(MessageId(0)));
    }

    #[test]
    fn set_priority_moves_between_sublists() {
        let mut metas = meta_array();
        let mut pq: PriorityQueue<OwnerKind> = PriorityQueue::new();
        pq.enqueue(&mut metas, MessageId(0)).unwrap();
        pq.set_priority(&mut metas, MessageId(0), Priority::High).unwrap();
        assert_eq!(metas[0].as_ref().unwrap().priority, Priority::High);
        assert_eq!(pq.dequeue(&mut metas), Some(MessageId(0)));
    }
}
