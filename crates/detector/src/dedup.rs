#![forbid(unsafe_code)]

//! Short-lived suppression window for duplicate pid deliveries.

use crate::Pid;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Recently-seen pid set with time-based eviction and a hard size bound.
///
/// The connector protocol is not expected to repeat events; this is a
/// cheap guard for the rare duplicate around a mode handover. Not
/// correctness-critical: entries silently age out and the oldest entry is
/// evicted when the bound is hit.
#[derive(Debug)]
pub struct RecentPids {
    window: Duration,
    capacity: usize,
    seen: FxHashMap<Pid, Instant>,
    order: VecDeque<(Instant, Pid)>,
}

impl RecentPids {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity,
            seen: FxHashMap::default(),
            order: VecDeque::new(),
        }
    }

    /// Record a delivery at `now`. Returns `false` when the pid was already
    /// delivered inside the window (the caller should suppress it).
    pub fn insert(&mut self, pid: Pid, now: Instant) -> bool {
        self.evict_expired(now);

        if let Some(last) = self.seen.get(&pid)
            && now.duration_since(*last) < self.window
        {
            return false;
        }

        while self.seen.len() >= self.capacity {
            let Some((stamp, oldest)) = self.order.pop_front() else {
                break;
            };
            // Skip stale queue entries left behind by a re-insert.
            if self.seen.get(&oldest) == Some(&stamp) {
                self.seen.remove(&oldest);
            }
        }

        self.seen.insert(pid, now);
        self.order.push_back((now, pid));
        true
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some((stamp, pid)) = self.order.front().copied() {
            if now.duration_since(stamp) < self.window {
                break;
            }
            // Only drop the map entry if it wasn't refreshed since.
            if self.seen.get(&pid) == Some(&stamp) {
                self.seen.remove(&pid);
            }
            self.order.pop_front();
        }
    }
}
