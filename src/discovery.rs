// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Periodic broadcast announcement, echo handling, and peer-table
//! persistence.
//!
//! Discovery does not read the shared socket itself: Messaging's receive
//! loop is the socket's sole reader and forwards echo traffic here via
//! [`Discovery::handle_echo_request`] / [`Discovery::handle_echo_reply`].
//! This avoids the classic shared-socket anti-pattern where a direct
//! `recv` from a sending path steals a datagram meant for the receive
//! loop.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use chrono::Utc;

use crate::codec::{self, Opcode, Response, Status};
use crate::config::{BROADCAST_INTERVAL, OFFLINE_THRESHOLD, PERSIST_INTERVAL};
use crate::peer_table::PeerTable;
use crate::stores::{PeerRecordRow, PeerStatus, PeerStore};
use crate::transport::LocalInterface;
use crate::uid::Uid;

pub struct Discovery {
    socket: Arc<UdpSocket>,
    local_uid: Uid,
    iface: LocalInterface,
    port: u16,
    peer_table: Arc<PeerTable>,
    peer_store: Option<Arc<dyn PeerStore>>,
    shutdown: Arc<AtomicBool>,
    broadcast_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
    persist_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Discovery {
    pub fn new(
        socket: Arc<UdpSocket>,
        local_uid: Uid,
        iface: LocalInterface,
        port: u16,
        peer_table: Arc<PeerTable>,
        peer_store: Option<Arc<dyn PeerStore>>,
    ) -> Self {
        Self {
            socket,
            local_uid,
            iface,
            port,
            peer_table,
            peer_store,
            shutdown: Arc::new(AtomicBool::new(false)),
            broadcast_handle: parking_lot::Mutex::new(None),
            persist_handle: parking_lot::Mutex::new(None),
        }
    }

    /// Spawn the broadcast loop and, if a [`PeerStore`] was supplied, the
    /// persistence loop.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);
        *self.broadcast_handle.lock() = Some(thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                this.do_broadcast();
                thread::sleep(BROADCAST_INTERVAL);
            }
        }));

        if self.peer_store.is_some() {
            let this = Arc::clone(self);
            let shutdown = Arc::clone(&self.shutdown);
            *self.persist_handle.lock() = Some(thread::spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    thread::sleep(PERSIST_INTERVAL);
                    this.persist_snapshot();
                }
            }));
        }
    }

    /// Signal both loops to stop and join them. Does not close the
    /// shared socket — that is [`crate::engine::Engine`]'s job, since the
    /// socket is also used by Messaging.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.broadcast_handle.lock().take() {
            let _ = h.join();
        }
        if let Some(h) = self.persist_handle.lock().take() {
            let _ = h.join();
        }
    }

    /// Send one echo-request immediately, outside the periodic cadence.
    pub fn force_discover(&self) {
        self.do_broadcast();
    }

    fn do_broadcast(&self) {
        let header = codec::pack_header(&self.local_uid, &Uid::broadcast(), Opcode::Echo, 0, 0);
        let dest = SocketAddr::new(IpAddr::V4(self.iface.broadcast), self.port);
        if let Err(e) = self.socket.send_to(&header, dest) {
            log::warn!("broadcast send failed: {e}");
        } else {
            log::debug!("sent discovery broadcast to {dest}");
        }
    }

    fn is_local_addr(&self, addr: &IpAddr) -> bool {
        self.iface.all_local_addrs.iter().any(|a| a == addr)
    }

    /// Handle an inbound echo-request header (opcode 0, addressed to the
    /// broadcast UID).
    pub fn handle_echo_request(&self, from: &Uid, src: SocketAddr) {
        if self.is_local_addr(&src.ip()) || *from == self.local_uid {
            return;
        }
        let response = codec::pack_response(Status::Ok, &self.local_uid);
        if let Err(e) = self.socket.send_to(&response, src) {
            log::warn!("echo reply send failed: {e}");
        }
        self.peer_table.upsert(from.clone(), src.ip(), Instant::now());
        log::debug!("handled echo-request from {from} at {src}");
    }

    /// Handle an inbound 25-byte response that the ACK registry did not
    /// claim — interpreted as a Discovery echo-reply.
    pub fn handle_echo_reply(&self, response: &Response, src: SocketAddr) {
        if response.status != Status::Ok || self.is_local_addr(&src.ip()) || response.responder == self.local_uid {
            return;
        }
        self.peer_table
            .upsert(response.responder.clone(), src.ip(), Instant::now());
        log::debug!("handled echo-reply from {} at {src}", response.responder);
    }

    fn persist_snapshot(&self) {
        let Some(store) = &self.peer_store else {
            return;
        };
        let now = Instant::now();
        let rows: Vec<PeerRecordRow> = self
            .peer_table
            .snapshot()
            .into_iter()
            .map(|r| {
                let status = if now.saturating_duration_since(r.last_seen) < OFFLINE_THRESHOLD {
                    PeerStatus::Connected
                } else {
                    PeerStatus::Disconnected
                };
                PeerRecordRow {
                    uid: r.uid.to_string(),
                    address: r.address.to_string(),
                    last_seen: Utc::now().to_rfc3339(),
                    status,
                }
            })
            .collect();
        if let Err(e) = store.persist(&rows) {
            log::warn!("peer persistence failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn make_discovery(uid: &str) -> (Arc<Discovery>, Arc<PeerTable>) {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        socket.set_broadcast(true).ok();
        let iface = LocalInterface {
            address: Ipv4Addr::LOCALHOST,
            broadcast: Ipv4Addr::new(127, 0, 0, 255),
            all_local_addrs: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
        };
        let local_uid = Uid::new(uid);
        let peer_table = Arc::new(PeerTable::new(local_uid.clone(), iface.all_local_addrs.clone()));
        let discovery = Arc::new(Discovery::new(socket, local_uid, iface, 0, peer_table.clone(), None));
        (discovery, peer_table)
    }

    #[test]
    fn echo_request_from_remote_upserts_peer() {
        let (discovery, peer_table) = make_discovery("self");
        let remote_addr: SocketAddr = "192.168.50.7:9990".parse().unwrap();
        discovery.handle_echo_request(&Uid::new("bob"), remote_addr);
        assert!(peer_table.get(&Uid::new("bob")).is_some());
    }

    #[test]
    fn echo_request_from_local_address_is_ignored() {
        let (discovery, peer_table) = make_discovery("self");
        let local_addr: SocketAddr = "127.0.0.1:9990".parse().unwrap();
        discovery.handle_echo_request(&Uid::new("bob"), local_addr);
        assert!(peer_table.get(&Uid::new("bob")).is_none());
    }

    #[test]
    fn echo_reply_with_bad_status_is_ignored() {
        let (discovery, peer_table) = make_discovery("self");
        let remote: SocketAddr = "192.168.50.7:9990".parse().unwrap();
        let resp = Response {
            status: Status::BadRequest,
            responder: Uid::new("bob"),
        };
        discovery.handle_echo_reply(&resp, remote);
        assert!(peer_table.get(&Uid::new("bob")).is_none());
    }

    #[test]
    fn echo_reply_with_self_responder_is_ignored() {
        let (discovery, peer_table) = make_discovery("self");
        let remote: SocketAddr = "192.168.50.7:9990".parse().unwrap();
        let resp = Response {
            status: Status::Ok,
            responder: Uid::new("self"),
        };
        discovery.handle_echo_reply(&resp, remote);
        assert!(peer_table.get(&Uid::new("self")).is_none());
    }
}
