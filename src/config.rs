// SPDX-License-Identifier: Apache-2.0 OR MIT

//! LCP Configuration - Single Source of Truth
//!
//! This module centralizes the wire-format constants and the small set
//! of runtime knobs the node reads at start-up.
//! **NEVER hardcode these elsewhere!**
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: compile-time wire constants, shared by every
//!   node on the LAN. Changing these breaks interop.
//! - **Level 2 (Dynamic)**: [`RuntimeConfig`], read once from the
//!   environment at [`crate::Engine`] construction.

use std::time::Duration;

// =======================================================================
// Wire format sizes
// =======================================================================

/// Size in bytes of an encoded UID field (on-wire, zero-padded).
pub const UID_SIZE: usize = 20;

/// Size in bytes of a packed [`crate::codec::Header`].
pub const HEADER_SIZE: usize = 100;

/// Size in bytes of a packed [`crate::codec::Response`].
pub const RESPONSE_SIZE: usize = 25;

/// Byte offset of `opcode` within a header.
pub const HEADER_OPCODE_OFFSET: usize = 40;

/// Byte offset of `body_id` within a header.
pub const HEADER_BODY_ID_OFFSET: usize = 41;

/// Byte offset of `body_length` within a header.
pub const HEADER_BODY_LEN_OFFSET: usize = 42;

/// Size in bytes of the reserved tail of a header.
pub const HEADER_RESERVED_SIZE: usize = 50;

/// Default UDP/TCP port for LCP traffic, overridable at runtime.
pub const DEFAULT_PORT: u16 = 9990;

// =======================================================================
// Timing constants (RTPS-style: named, never inlined at call sites)
// =======================================================================

/// Age past which a peer is considered offline.
pub const OFFLINE_THRESHOLD: Duration = Duration::from_secs(20);

/// Interval between Discovery broadcast announcements.
pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(1);

/// Interval between Discovery persistence-store snapshots.
pub const PERSIST_INTERVAL: Duration = Duration::from_secs(5);

/// Time a pending file announcement is kept waiting for its stream transfer.
pub const PENDING_FILE_TTL: Duration = Duration::from_secs(30);

/// Default per-attempt ACK wait used by [`crate::messaging::Messaging::send`].
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default retry count for text sends.
pub const DEFAULT_RETRIES: u32 = 3;

/// Chunk size used when streaming file bodies.
pub const STREAM_CHUNK: usize = 32 * 1024;

/// Socket send/receive buffer size requested for the stream socket.
pub const SOCK_BUF: usize = 256 * 1024;

/// How long a `(sender, body_id)` pair is remembered for at-most-once delivery.
pub const DEDUP_TTL: Duration = Duration::from_secs(15); // 3 * DEFAULT_SEND_TIMEOUT

/// Wait after a file announce ACK before the sender opens the stream,
/// giving the receiver time to arm its stream acceptor.
pub const FILE_STREAM_SETTLE: Duration = Duration::from_millis(500);

/// Timeout waiting for the body datagram that follows a text header.
pub const BODY_RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout waiting for the final response after streaming a file.
pub const FILE_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

// =======================================================================
// Runtime configuration (Level 2)
// =======================================================================

/// Environment variable overriding the UDP port.
pub const ENV_UDP_PORT: &str = "LCP_UDP_PORT";

/// Environment variable overriding the TCP port.
pub const ENV_TCP_PORT: &str = "LCP_TCP_PORT";

/// Environment variable overriding the bind address.
pub const ENV_BIND_ADDR: &str = "LCP_BIND_ADDR";

/// Small, once-read runtime configuration layer.
///
/// Malformed values are logged at `warn` and replaced with the default;
/// they never abort start-up, matching Discovery's best-effort policy.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub udp_port: u16,
    pub tcp_port: u16,
    pub bind_addr_override: Option<String>,
}

impl RuntimeConfig {
    /// Reads [`ENV_UDP_PORT`], [`ENV_TCP_PORT`], and [`ENV_BIND_ADDR`] from
    /// the process environment, falling back to [`DEFAULT_PORT`] for ports.
    pub fn from_env() -> Self {
        Self {
            udp_port: read_port_env(ENV_UDP_PORT),
            tcp_port: read_port_env(ENV_TCP_PORT),
            bind_addr_override: std::env::var(ENV_BIND_ADDR).ok(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            udp_port: DEFAULT_PORT,
            tcp_port: DEFAULT_PORT,
            bind_addr_override: None,
        }
    }
}

fn read_port_env(name: &str) -> u16 {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                log::warn!("{name}={raw:?} is not a valid port, using default {DEFAULT_PORT}");
                DEFAULT_PORT
            }
        },
        Err(_) => DEFAULT_PORT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_default_port() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.udp_port, DEFAULT_PORT);
        assert_eq!(cfg.tcp_port, DEFAULT_PORT);
        assert!(cfg.bind_addr_override.is_none());
    }

    #[test]
    fn dedup_ttl_is_three_times_send_timeout() {
        assert_eq!(DEDUP_TTL, DEFAULT_SEND_TIMEOUT * 3);
    }
}
