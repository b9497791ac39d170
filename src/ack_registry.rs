// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Coordinates one-shot waits between the receive loop (which observes
//! ACKs) and outbound senders (which block on them).
//!
//! Exactly one outstanding waiter per UID is supported; a second
//! `register` for the same UID silently cancels the first. Messaging is
//! expected to serialise concurrent sends to the same destination with
//! its own per-peer lock, so this is not a correctness gap in practice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::uid::Uid;

struct Slot {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

/// A handle returned by [`AckRegistry::register`]; call [`AckWaiter::wait`]
/// to block until signalled or the timeout elapses.
pub struct AckWaiter {
    slot: Arc<Slot>,
}

impl AckWaiter {
    /// Blocks until signalled or `timeout` elapses. Returns `true` if
    /// signalled.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut signalled = self.slot.signalled.lock();
        if *signalled {
            return true;
        }
        let result = self.slot.condvar.wait_for(&mut signalled, timeout);
        *signalled && !result.timed_out()
    }
}

#[derive(Default)]
pub struct AckRegistry {
    slots: Mutex<HashMap<Uid, Arc<Slot>>>,
}

impl AckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh waiter for `uid`, replacing (cancelling) any
    /// waiter already registered for it.
    pub fn register(&self, uid: Uid) -> AckWaiter {
        let slot = Arc::new(Slot {
            signalled: Mutex::new(false),
            condvar: Condvar::new(),
        });
        self.slots.lock().insert(uid, slot.clone());
        AckWaiter { slot }
    }

    /// Wake and consume the waiter registered for `uid`, if any. Returns
    /// `true` if a waiter was found and signalled.
    pub fn signal(&self, uid: &Uid) -> bool {
        if let Some(slot) = self.slots.lock().remove(uid) {
            *slot.signalled.lock() = true;
            slot.condvar.notify_all();
            true
        } else {
            false
        }
    }

    /// Remove the waiter for `uid` without signalling it.
    pub fn cancel(&self, uid: &Uid) {
        self.slots.lock().remove(uid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn signal_wakes_waiter() {
        let registry = Arc::new(AckRegistry::new());
        let uid = Uid::new("bob");
        let waiter = registry.register(uid.clone());

        let r2 = registry.clone();
        let u2 = uid.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            r2.signal(&u2);
        });

        assert!(waiter.wait(Duration::from_secs(1)));
        handle.join().unwrap();
    }

    #[test]
    fn wait_times_out_without_signal() {
        let registry = AckRegistry::new();
        let waiter = registry.register(Uid::new("bob"));
        assert!(!waiter.wait(Duration::from_millis(30)));
    }

    #[test]
    fn second_register_cancels_first() {
        let registry = AckRegistry::new();
        let uid = Uid::new("bob");
        let first = registry.register(uid.clone());
        let _second = registry.register(uid.clone());
        registry.signal(&uid);
        // The second waiter is the one signalled; the first never wakes
        // via signal (it can only time out).
        assert!(!first.wait(Duration::from_millis(30)));
    }

    #[test]
    fn cancel_removes_without_signalling() {
        let registry = AckRegistry::new();
        let uid = Uid::new("bob");
        let waiter = registry.register(uid.clone());
        registry.cancel(&uid);
        registry.signal(&uid); // no-op, already removed
        assert!(!waiter.wait(Duration::from_millis(30)));
    }
}
