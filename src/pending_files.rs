// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Table of file announcements awaiting their stream transfer.
//!
//! Entries are created when a datagram announce header arrives and
//! consumed (removed) by the matching inbound stream handler. A janitor
//! sweeps entries older than [`crate::config::PENDING_FILE_TTL`].

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

use crate::uid::Uid;

#[derive(Debug, Clone)]
pub struct PendingFile {
    pub sender: Uid,
    pub body_length: u64,
    pub announced_at: Instant,
}

#[derive(Default)]
pub struct PendingFiles {
    inner: Mutex<HashMap<u8, PendingFile>>,
}

impl PendingFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn announce(&self, body_id: u8, sender: Uid, body_length: u64, now: Instant) {
        self.inner.lock().insert(
            body_id,
            PendingFile {
                sender,
                body_length,
                announced_at: now,
            },
        );
    }

    /// Remove and return the entry for `body_id`, if any.
    pub fn take(&self, body_id: u8) -> Option<PendingFile> {
        self.inner.lock().remove(&body_id)
    }

    /// Drop every entry older than `ttl`.
    pub fn sweep(&self, now: Instant, ttl: std::time::Duration) {
        self.inner
            .lock()
            .retain(|_, v| now.saturating_duration_since(v.announced_at) < ttl);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn announce_then_take_once() {
        let table = PendingFiles::new();
        table.announce(1, Uid::new("alice"), 100, Instant::now());
        assert!(table.take(1).is_some());
        assert!(table.take(1).is_none());
    }

    #[test]
    fn sweep_removes_stale_entries() {
        let table = PendingFiles::new();
        let now = Instant::now();
        table.announce(1, Uid::new("alice"), 100, now);
        table.sweep(now + Duration::from_secs(31), Duration::from_secs(30));
        assert!(table.is_empty());
    }
}
