// SPDX-License-Identifier: Apache-2.0 OR MIT

//! 20-byte, zero-padded user identifiers.
//!
//! Two representations exist on purpose: the *trimmed* form (used for
//! comparison, map keys, and display) and the *padded* form (used only
//! when packing a wire frame). Mixing the two causes silent lookup
//! misses, so conversion only happens at the wire boundary.

use crate::config::UID_SIZE;

/// A user identifier, stored trimmed of trailing zero bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(String);

impl Uid {
    /// Build a `Uid` from a human-supplied string, truncating to
    /// [`UID_SIZE`] bytes if necessary.
    pub fn new(s: &str) -> Self {
        let mut bytes = s.as_bytes().to_vec();
        bytes.truncate(UID_SIZE);
        // Truncation on a UTF-8 boundary: lossily re-decode if we split
        // a multi-byte character.
        let trimmed = String::from_utf8_lossy(&bytes).into_owned();
        Uid(trimmed)
    }

    /// Build a `Uid` from a padded 20-byte wire field, trimming trailing
    /// zero bytes. An all-`0xFF` field decodes back to [`Uid::broadcast`].
    pub fn from_padded(bytes: &[u8]) -> Self {
        if bytes.len() == UID_SIZE && bytes.iter().all(|&b| b == 0xFF) {
            return Uid::broadcast();
        }
        let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        Uid(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// The broadcast identifier: 20 bytes of `0xFF`.
    pub fn broadcast() -> Self {
        // Not valid UTF-8 when decoded normally; represented specially
        // so equality and `is_broadcast` stay cheap and exact.
        Uid(BROADCAST_MARKER.to_string())
    }

    /// True if this is the broadcast identifier.
    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST_MARKER
    }

    /// The trimmed, human-readable form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The padded 20-byte wire form.
    pub fn padded(&self) -> [u8; UID_SIZE] {
        let mut buf = [0u8; UID_SIZE];
        if self.is_broadcast() {
            buf = [0xFFu8; UID_SIZE];
            return buf;
        }
        let bytes = self.0.as_bytes();
        let n = bytes.len().min(UID_SIZE);
        buf[..n].copy_from_slice(&bytes[..n]);
        buf
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

const BROADCAST_MARKER: &str = "\u{0}__lcp_broadcast__";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_identifiers() {
        let long = "a".repeat(40);
        let uid = Uid::new(&long);
        assert_eq!(uid.padded().len(), UID_SIZE);
        assert_eq!(uid.as_str().len(), UID_SIZE);
    }

    #[test]
    fn padded_round_trips_through_from_padded() {
        let uid = Uid::new("alice");
        let padded = uid.padded();
        let back = Uid::from_padded(&padded);
        assert_eq!(uid, back);
    }

    #[test]
    fn broadcast_is_all_ff_on_wire() {
        let b = Uid::broadcast();
        assert_eq!(b.padded(), [0xFFu8; UID_SIZE]);
        assert!(b.is_broadcast());
    }

    #[test]
    fn broadcast_bytes_decode_as_broadcast() {
        let wire = [0xFFu8; UID_SIZE];
        let uid = Uid::from_padded(&wire);
        // All-0xFF never trims to empty, and round-trips back to all-0xFF.
        assert_eq!(uid.padded(), wire);
    }
}
