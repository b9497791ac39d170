// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # lcp — Local Chat Protocol node
//!
//! A peer-to-peer LAN chat endpoint: broadcast discovery, a two-phase
//! datagram handshake for text, and a hybrid announce+stream protocol
//! for files, all over a fixed binary wire format so any node can talk
//! to any other node without a central server.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use lcp::{Engine, RuntimeConfig};
//!
//! fn main() -> lcp::Result<()> {
//!     let node = Engine::new("alice", RuntimeConfig::from_env(), None, None)?;
//!     node.start();
//!     node.force_discover();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                         Engine                                |
//! |   start()/stop() lifecycle, identity, store wiring             |
//! +--------------------------------------------------------------+
//! |      Discovery           |           Messaging                |
//! |  broadcast/echo/persist   |  send/send_file/receive dispatch   |
//! +--------------------------------------------------------------+
//! |           PeerTable            |        AckRegistry            |
//! +--------------------------------------------------------------+
//! |                   Codec (pack/unpack frames)                  |
//! +--------------------------------------------------------------+
//! ```

pub mod ack_registry;
pub mod codec;
pub mod config;
pub mod dedup;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod messaging;
pub mod pending_files;
pub mod peer_table;
pub mod stores;
pub mod transport;
pub mod uid;

pub use config::RuntimeConfig;
pub use engine::Engine;
pub use error::{Error, Result};
pub use uid::Uid;
