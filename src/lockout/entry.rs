//! Per-key attempt history and the store that owns it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

/// Attempt history and lock state for one identity key.
#[derive(Debug, Default)]
pub(crate) struct Entry {
    /// Failure timestamps, oldest first
    attempts: VecDeque<Instant>,
    /// Present and in the future while the key is locked
    locked_until: Option<Instant>,
}

impl Entry {
    /// Remaining lock time, or `None` if the key is not locked at `now`.
    pub(crate) fn remaining_lockout(&self, now: Instant) -> Option<Duration> {
        match self.locked_until {
            Some(until) if until > now => Some(until - now),
            _ => None,
        }
    }

    /// Drop a lock that has run out, along with the history that tripped it.
    ///
    /// Returns `true` if a stale lock was cleared.
    pub(crate) fn expire_lock(&mut self, now: Instant) -> bool {
        match self.locked_until {
            Some(until) if until <= now => {
                self.locked_until = None;
                self.attempts.clear();
                true
            }
            _ => false,
        }
    }

    /// Remove every failure strictly older than `window`.
    pub(crate) fn prune(&mut self, now: Instant, window: Duration) {
        // Oldest first, so expired timestamps form a prefix.
        while let Some(&oldest) = self.attempts.front() {
            if now.saturating_duration_since(oldest) > window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
    }

    /// A success wipes the history; a failure is appended.
    pub(crate) fn record(&mut self, now: Instant, succeeded: bool) {
        if succeeded {
            self.attempts.clear();
        } else {
            self.attempts.push_back(now);
        }
    }

    pub(crate) fn lock(&mut self, until: Instant) {
        self.locked_until = Some(until);
    }

    pub(crate) fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

/// Concurrent map from identity key to its [`Entry`].
///
/// Each entry sits behind its own mutex. The map only hands out shared
/// handles; callers lock the handle after the map shard has been released,
/// so work on one key never holds up another.
#[derive(Debug, Default)]
pub(crate) struct EntryStore {
    entries: DashMap<String, Arc<Mutex<Entry>>>,
}

impl EntryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fetch the entry for `key`, creating an empty one on first use.
    ///
    /// Repeated calls with an equal key return the same entry, even when
    /// racing from several threads.
    pub(crate) fn get_or_create(&self, key: &str) -> Arc<Mutex<Entry>> {
        if let Some(existing) = self.entries.get(key) {
            return Arc::clone(existing.value());
        }

        match self.entries.entry(key.to_owned()) {
            MapEntry::Occupied(occupied) => Arc::clone(occupied.get()),
            MapEntry::Vacant(vacant) => {
                debug!(key = %key, "Creating new attempt entry");
                let entry = Arc::new(Mutex::new(Entry::default()));
                vacant.insert(Arc::clone(&entry));
                entry
            }
        }
    }

    /// Number of distinct keys seen so far.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
