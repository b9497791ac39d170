// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wires identity, stores, and interface selection into a single
//! start/stop lifecycle — the crate's one public entry point for an
//! embedding application.

use std::sync::Arc;
use std::time::Duration;

use crate::ack_registry::AckRegistry;
use crate::config::RuntimeConfig;
use crate::discovery::Discovery;
use crate::error::Result;
use crate::messaging::{FileCallback, MessageCallback, Messaging};
use crate::peer_table::{PeerRecord, PeerTable};
use crate::stores::{HistoryStore, PeerStore};
use crate::transport::{self, LocalInterface};
use crate::uid::Uid;

/// A running LCP node: Discovery plus Messaging, sharing one datagram
/// socket and one peer table.
pub struct Engine {
    discovery: Arc<Discovery>,
    messaging: Arc<Messaging>,
    peer_table: Arc<PeerTable>,
    local_uid: Uid,
}

impl Engine {
    /// Construct a node bound per `config`, with identity `local_uid`.
    /// `peer_store` and `history_store` are optional external
    /// collaborators this crate does not require to run.
    pub fn new(
        local_uid: impl Into<String>,
        config: RuntimeConfig,
        peer_store: Option<Arc<dyn PeerStore>>,
        history_store: Option<Arc<dyn HistoryStore>>,
    ) -> Result<Self> {
        let local_uid = Uid::new(&local_uid.into());
        let iface: LocalInterface = transport::select_interface(config.bind_addr_override.as_deref());

        let datagram_socket = Arc::new(transport::bind_datagram_socket(iface.address, config.udp_port)?);
        let stream_listener = Arc::new(transport::bind_stream_listener(iface.address, config.tcp_port)?);

        let peer_table = Arc::new(PeerTable::new(local_uid.clone(), iface.all_local_addrs.clone()));
        let ack_registry = Arc::new(AckRegistry::new());

        let discovery = Arc::new(Discovery::new(
            Arc::clone(&datagram_socket),
            local_uid.clone(),
            iface,
            config.udp_port,
            Arc::clone(&peer_table),
            peer_store,
        ));

        let messaging = Arc::new(Messaging::new(
            datagram_socket,
            config.udp_port,
            stream_listener,
            config.tcp_port,
            local_uid.clone(),
            Arc::clone(&peer_table),
            ack_registry,
            Arc::clone(&discovery),
            history_store,
        ));

        Ok(Self {
            discovery,
            messaging,
            peer_table,
            local_uid,
        })
    }

    /// Install the callback invoked for each delivered inbound text
    /// message.
    pub fn on_message(&self, cb: MessageCallback) {
        self.messaging.set_message_callback(cb);
    }

    /// Install the callback invoked for each completed inbound file
    /// transfer.
    pub fn on_file(&self, cb: FileCallback) {
        self.messaging.set_file_callback(cb);
    }

    /// Spawn every background task: broadcast loop, persistence loop,
    /// receive loop, stream-accept loop, pending-files janitor.
    pub fn start(&self) {
        log::info!("starting LCP node {}", self.local_uid);
        self.discovery.start();
        self.messaging.start();
    }

    /// Close sockets (unblocking receive/accept loops) and join every
    /// spawned thread.
    pub fn stop(&self) {
        log::info!("stopping LCP node {}", self.local_uid);
        self.discovery.stop();
        self.messaging.stop();
    }

    pub fn send(&self, to: &Uid, payload: &[u8]) -> Result<()> {
        self.messaging.send(to, payload)
    }

    pub fn send_with(&self, to: &Uid, payload: &[u8], timeout: Duration, retries: u32) -> Result<()> {
        self.messaging.send_with(to, payload, timeout, retries)
    }

    pub fn broadcast(&self, payload: &[u8]) {
        self.messaging.broadcast(payload);
    }

    pub fn send_file(&self, to: &Uid, content: &[u8], filename: &str, timeout: Duration) -> Result<()> {
        self.messaging.send_file(to, content, filename, timeout)
    }

    pub fn force_discover(&self) {
        self.discovery.force_discover();
    }

    pub fn snapshot_peers(&self) -> Vec<PeerRecord> {
        self.peer_table.snapshot()
    }

    pub fn local_uid(&self) -> &Uid {
        &self.local_uid
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}
