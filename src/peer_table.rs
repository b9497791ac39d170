// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-memory table of known peers, with liveness classification and
//! same-address eviction.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::OFFLINE_THRESHOLD;
use crate::uid::Uid;

/// A single peer's known state.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub uid: Uid,
    pub address: IpAddr,
    pub last_seen: Instant,
}

/// Thread-safe peer table. All mutating operations are serialised by an
/// internal mutex; [`PeerTable::snapshot`] returns an independent copy so
/// callers never iterate under the lock.
pub struct PeerTable {
    local_addrs: Vec<IpAddr>,
    local_uid: Uid,
    inner: Mutex<HashMap<Uid, PeerRecord>>,
}

impl PeerTable {
    pub fn new(local_uid: Uid, local_addrs: Vec<IpAddr>) -> Self {
        Self {
            local_addrs,
            local_uid,
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn is_local(&self, addr: &IpAddr) -> bool {
        self.local_addrs.iter().any(|a| a == addr)
    }

    /// Insert or refresh a peer record, evicting any existing record that
    /// shares `address` under a different `uid`, and never admitting the
    /// local identifier or a local address.
    pub fn upsert(&self, uid: Uid, address: IpAddr, now: Instant) {
        if uid == self.local_uid || self.is_local(&address) {
            return;
        }
        let mut guard = self.inner.lock();
        let stale_uid = guard
            .iter()
            .find(|(k, v)| v.address == address && **k != uid)
            .map(|(k, _)| k.clone());
        if let Some(stale) = stale_uid {
            log::info!("peer {stale} displaced by {uid} at address {address}");
            guard.remove(&stale);
        }
        guard
            .entry(uid.clone())
            .and_modify(|r| r.last_seen = now)
            .or_insert_with(|| {
                log::info!("peer {uid} discovered at {address}");
                PeerRecord {
                    uid,
                    address,
                    last_seen: now,
                }
            });
    }

    pub fn get(&self, uid: &Uid) -> Option<PeerRecord> {
        self.inner.lock().get(uid).cloned()
    }

    /// A copy of every record, filtered against the local address set.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.inner
            .lock()
            .values()
            .filter(|r| !self.is_local(&r.address))
            .cloned()
            .collect()
    }

    pub fn evict(&self, uid: &Uid) {
        if self.inner.lock().remove(uid).is_some() {
            log::info!("peer {uid} evicted");
        }
    }

    /// Partition the current snapshot into `(online, offline)` using
    /// [`OFFLINE_THRESHOLD`].
    pub fn classify(&self, now: Instant) -> (Vec<PeerRecord>, Vec<PeerRecord>) {
        self.classify_with_threshold(now, OFFLINE_THRESHOLD)
    }

    pub fn classify_with_threshold(
        &self,
        now: Instant,
        threshold: Duration,
    ) -> (Vec<PeerRecord>, Vec<PeerRecord>) {
        let mut online = Vec::new();
        let mut offline = Vec::new();
        for record in self.snapshot() {
            if now.saturating_duration_since(record.last_seen) < threshold {
                online.push(record);
            } else {
                offline.push(record);
            }
        }
        (online, offline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, n))
    }

    fn table() -> PeerTable {
        PeerTable::new(Uid::new("self"), vec![addr(1)])
    }

    #[test]
    fn upsert_then_get() {
        let t = table();
        let now = Instant::now();
        t.upsert(Uid::new("bob"), addr(2), now);
        assert!(t.get(&Uid::new("bob")).is_some());
    }

    #[test]
    fn snapshot_excludes_local_addresses() {
        let t = table();
        let now = Instant::now();
        t.upsert(Uid::new("bob"), addr(1), now);
        assert!(t.snapshot().is_empty());
    }

    #[test]
    fn local_uid_is_never_admitted() {
        let t = table();
        t.upsert(Uid::new("self"), addr(9), Instant::now());
        assert!(t.snapshot().is_empty());
    }

    #[test]
    fn same_address_eviction_displaces_old_uid() {
        let t = table();
        let now = Instant::now();
        t.upsert(Uid::new("bob"), addr(2), now);
        t.upsert(Uid::new("bob2"), addr(2), now);
        let snap = t.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].uid, Uid::new("bob2"));
    }

    #[test]
    fn upsert_is_idempotent_up_to_last_seen() {
        let t = table();
        let now = Instant::now();
        t.upsert(Uid::new("bob"), addr(2), now);
        t.upsert(Uid::new("bob"), addr(2), now);
        assert_eq!(t.snapshot().len(), 1);
    }

    #[test]
    fn classify_splits_on_age() {
        let t = table();
        let now = Instant::now();
        t.upsert(Uid::new("bob"), addr(2), now);
        let (online, offline) = t.classify_with_threshold(now, Duration::from_secs(20));
        assert_eq!(online.len(), 1);
        assert!(offline.is_empty());

        let later = now + Duration::from_secs(25);
        let (online, offline) = t.classify_with_threshold(later, Duration::from_secs(20));
        assert!(online.is_empty());
        assert_eq!(offline.len(), 1);
    }
}
