//! CTAPHID channel table
//!
//! A fixed arena of channel slots plus the always-present broadcast channel.
//! Channels are created by `INIT` on broadcast, reset (keeping their id) by
//! `INIT` on themselves, and evicted after sitting idle for
//! [`CHANNEL_IDLE_TIMEOUT`].

use std::time::{Duration, Instant};

use crate::ctaphid::BROADCAST_CID;
use crate::error::{Error, Result};

/// Non-broadcast channel capacity
pub const MAX_CHANNELS: usize = 5;

pub const CHANNEL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Waiting for a request
    Idle,
    /// A complete request is being processed
    Ready,
}

#[derive(Debug, Clone)]
pub struct Channel {
    cid: u32,
    state: ChannelState,
    last_activity: Instant,
}

impl Channel {
    fn new(cid: u32, now: Instant) -> Self {
        Self {
            cid,
            state: ChannelState::Idle,
            last_activity: now,
        }
    }

    pub fn cid(&self) -> u32 {
        self.cid
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn set_state(&mut self, state: ChannelState, now: Instant) {
        self.state = state;
        self.last_activity = now;
    }

    /// Back to idle with a fresh timer; the id is kept
    pub fn reset(&mut self, now: Instant) {
        self.set_state(ChannelState::Idle, now);
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) >= CHANNEL_IDLE_TIMEOUT
    }
}

/// Arena of live channels
#[derive(Debug)]
pub struct ChannelTable {
    broadcast: Channel,
    slots: [Option<Channel>; MAX_CHANNELS],
    last_cid: u32,
}

impl ChannelTable {
    pub fn new(now: Instant) -> Self {
        Self {
            broadcast: Channel::new(BROADCAST_CID, now),
            slots: Default::default(),
            last_cid: 0,
        }
    }

    pub fn get_mut(&mut self, cid: u32) -> Option<&mut Channel> {
        if cid == BROADCAST_CID {
            return Some(&mut self.broadcast);
        }
        self.slots.iter_mut().flatten().find(|ch| ch.cid == cid)
    }

    pub fn contains(&self, cid: u32) -> bool {
        cid == BROADCAST_CID || self.slots.iter().flatten().any(|ch| ch.cid == cid)
    }

    /// Allocate a fresh channel and return its id
    ///
    /// Ids are never 0, never broadcast and never shared with a live channel.
    pub fn allocate(&mut self, now: Instant) -> Result<u32> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(Error::ChannelBusy)?;

        let cid = loop {
            self.last_cid = self.last_cid.wrapping_add(1);
            let cid = self.last_cid;
            if cid != 0 && cid != BROADCAST_CID && !self.contains(cid) {
                break cid;
            }
        };

        self.slots[slot] = Some(Channel::new(cid, now));
        log::info!("allocated channel {cid:#010x}");
        Ok(cid)
    }

    /// Drop every non-broadcast channel idle for longer than the timeout
    pub fn evict_idle(&mut self, now: Instant) -> usize {
        let mut evicted = 0;
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|ch| ch.is_expired(now)) {
                if let Some(ch) = slot.take() {
                    log::debug!("channel {:#010x} expired", ch.cid);
                }
                evicted += 1;
            }
        }
        evicted
    }

    /// Live non-broadcast channels
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
