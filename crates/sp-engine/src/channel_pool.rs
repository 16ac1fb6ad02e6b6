//! ChannelPool: fixed channel slots and the allocation policy.

use alloc::vec::Vec;
use core::cmp::Reverse;

use crate::channel::Channel;

/// Identifier for a channel slot in the pool.
pub type ChannelId = usize;

/// Who is asking for a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request {
    pub track: u8,
    pub priority: u8,
}

/// Fixed set of channel slots shared by every track of a player.
pub struct ChannelPool {
    slots: Vec<Channel>,
    next_serial: u64,
}

/// Ordering rank of a channel's owner; unowned channels rank above every track.
fn owner_rank(ch: &Channel) -> u16 {
    ch.owner.map_or(u16::MAX, u16::from)
}

impl ChannelPool {
    /// Create `count` dead slots.
    pub fn new(count: usize) -> Self {
        Self {
            slots: (0..count).map(|_| Channel::new()).collect(),
            next_serial: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, id: ChannelId) -> Option<&Channel> {
        self.slots.get(id)
    }

    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.slots.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.slots.iter_mut()
    }

    pub fn slots_mut(&mut self) -> &mut [Channel] {
        &mut self.slots
    }

    /// Pick a slot among `candidates` for `req` and claim it.
    ///
    /// Stages, first match wins:
    /// 1. a dead slot, in candidate order;
    /// 2. a live slot of strictly lower priority (lowest priority, then
    ///    highest owner, then oldest);
    /// 3. a releasing slot (highest owner, then oldest);
    /// 4. a slot of equal priority owned by the requester or a higher
    ///    track (lowest owner, then oldest).
    ///
    /// Returns `None` when every candidate outranks the request; the note is
    /// then dropped.
    pub fn allocate(&mut self, candidates: &[ChannelId], req: Request) -> Option<ChannelId> {
        let id = self.select(candidates, req)?;
        self.claim(id, req);
        Some(id)
    }

    /// Dead slots are taken in `candidates` order; only live slots are
    /// ranked by priority, owner and age.
    fn select(&self, candidates: &[ChannelId], req: Request) -> Option<ChannelId> {
        let pool = || {
            candidates
                .iter()
                .filter_map(|&id| self.slots.get(id).map(|ch| (id, ch)))
        };

        if let Some((id, _)) = pool().find(|(_, ch)| !ch.is_alive()) {
            return Some(id);
        }

        let lower = pool()
            .filter(|(_, ch)| ch.priority < req.priority)
            .min_by_key(|(_, ch)| (ch.priority, Reverse(owner_rank(ch)), ch.serial));
        if let Some((id, _)) = lower {
            return Some(id);
        }

        let released = pool()
            .filter(|(_, ch)| ch.state().is_released())
            .min_by_key(|(_, ch)| (Reverse(owner_rank(ch)), ch.serial));
        if let Some((id, _)) = released {
            return Some(id);
        }

        pool()
            .filter(|(_, ch)| ch.priority == req.priority && owner_rank(ch) >= req.track as u16)
            .min_by_key(|(_, ch)| (owner_rank(ch), ch.serial))
            .map(|(id, _)| id)
    }

    /// Claim a fixed-assignment slot (the GB channels). The occupant is
    /// replaced unless it is alive with strictly higher priority.
    pub fn claim_fixed(&mut self, id: ChannelId, req: Request) -> bool {
        let Some(ch) = self.slots.get(id) else {
            return false;
        };
        if ch.is_alive() && ch.priority > req.priority {
            return false;
        }
        self.claim(id, req);
        true
    }

    fn claim(&mut self, id: ChannelId, req: Request) {
        let serial = self.next_serial;
        self.next_serial += 1;
        if let Some(ch) = self.slots.get_mut(id) {
            ch.kill();
            ch.owner = Some(req.track);
            ch.priority = req.priority;
            ch.serial = serial;
        }
    }

    /// Follow a track's priority change on every channel it owns.
    pub fn sync_priority(&mut self, track: u8, priority: u8) {
        for ch in self.slots.iter_mut().filter(|ch| ch.owner == Some(track)) {
            ch.priority = priority;
        }
    }

    /// Release every live channel owned by `track`.
    pub fn release_track(&mut self, track: u8) {
        for ch in self.owned_mut(track) {
            ch.release();
        }
    }

    /// Live channels owned by `track`.
    pub fn owned_mut(&mut self, track: u8) -> impl Iterator<Item = &mut Channel> {
        self.slots
            .iter_mut()
            .filter(move |ch| ch.owner == Some(track) && ch.is_alive())
    }

    pub fn owns_live(&self, track: u8) -> bool {
        self.slots
            .iter()
            .any(|ch| ch.owner == Some(track) && ch.is_alive())
    }

    /// Silence everything and forget owners.
    pub fn kill_all(&mut self) {
        for ch in &mut self.slots {
            ch.kill();
            ch.owner = None;
        }
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|ch| ch.is_alive()).count()
    }
}
