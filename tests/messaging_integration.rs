// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end text and file transfer between two nodes wired directly
//! (bypassing Discovery's broadcast, which isn't reliable to exercise in
//! a sandboxed loopback-only test environment) onto distinct loopback
//! addresses sharing one port, the way two real LAN hosts would share
//! port 9990 on distinct addresses.

use std::net::{IpAddr, Ipv4Addr, TcpListener, UdpSocket};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lcp::ack_registry::AckRegistry;
use lcp::discovery::Discovery;
use lcp::messaging::Messaging;
use lcp::peer_table::PeerTable;
use lcp::transport::LocalInterface;
use lcp::uid::Uid;

const PORT: u16 = 19990;

fn node(addr: Ipv4Addr, local_uid: &str, peer_uid: &str, peer_addr: Ipv4Addr) -> Arc<Messaging> {
    let local_uid = Uid::new(local_uid);
    let all_local = vec![IpAddr::V4(addr)];

    let datagram_socket = Arc::new(UdpSocket::bind((addr, PORT)).expect("bind udp"));
    datagram_socket.set_broadcast(true).unwrap();
    let stream_listener = Arc::new(TcpListener::bind((addr, PORT)).expect("bind tcp"));

    let peer_table = Arc::new(PeerTable::new(local_uid.clone(), all_local.clone()));
    peer_table.upsert(Uid::new(peer_uid), IpAddr::V4(peer_addr), Instant::now());

    let ack_registry = Arc::new(AckRegistry::new());
    let iface = LocalInterface {
        address: addr,
        broadcast: Ipv4Addr::BROADCAST,
        all_local_addrs: all_local,
    };
    let discovery = Arc::new(Discovery::new(
        Arc::clone(&datagram_socket),
        local_uid.clone(),
        iface,
        PORT,
        Arc::clone(&peer_table),
        None,
    ));

    let messaging = Arc::new(Messaging::new(
        datagram_socket,
        PORT,
        stream_listener,
        PORT,
        local_uid,
        peer_table,
        ack_registry,
        discovery,
        None,
    ));
    messaging.start();
    messaging
}

#[test]
fn text_round_trip_between_two_nodes() {
    let received: Arc<Mutex<Vec<(String, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));

    let a = node(Ipv4Addr::new(127, 0, 10, 1), "alice", "bob", Ipv4Addr::new(127, 0, 10, 2));
    let b = node(Ipv4Addr::new(127, 0, 10, 2), "bob", "alice", Ipv4Addr::new(127, 0, 10, 1));

    let recv_clone = Arc::clone(&received);
    b.set_message_callback(Box::new(move |from, payload, _now| {
        recv_clone.lock().unwrap().push((from.to_string(), payload));
    }));

    a.send(&Uid::new("bob"), b"hello from alice").expect("send should succeed");

    let deadline = Instant::now() + Duration::from_secs(2);
    while received.lock().unwrap().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }

    let got = received.lock().unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].0, "alice");
    assert_eq!(got[0].1, b"hello from alice");

    a.stop();
    b.stop();
}

#[test]
fn file_round_trip_between_two_nodes() {
    let received: Arc<Mutex<Option<(String, String, Vec<u8>)>>> = Arc::new(Mutex::new(None));

    let a = node(Ipv4Addr::new(127, 0, 11, 1), "alice", "bob", Ipv4Addr::new(127, 0, 11, 2));
    let b = node(Ipv4Addr::new(127, 0, 11, 2), "bob", "alice", Ipv4Addr::new(127, 0, 11, 1));

    let recv_clone = Arc::clone(&received);
    b.set_file_callback(Box::new(move |from, filename, payload, _now| {
        *recv_clone.lock().unwrap() = Some((from.to_string(), filename, payload));
    }));

    let content: Vec<u8> = (0..10_000u32).map(|_| fastrand::u8(..)).collect();
    a.send_file(&Uid::new("bob"), &content, "data.bin", Duration::from_secs(5))
        .expect("file transfer should succeed");

    let deadline = Instant::now() + Duration::from_secs(3);
    while received.lock().unwrap().is_none() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }

    let got = received.lock().unwrap();
    let (from, filename, payload) = got.as_ref().expect("file should have arrived");
    assert_eq!(from, "alice");
    assert_eq!(filename, "data.bin");
    assert_eq!(payload, &content);

    a.stop();
    b.stop();
}

#[test]
fn send_to_unknown_peer_fails_fast() {
    let a = node(Ipv4Addr::new(127, 0, 12, 1), "alice", "bob", Ipv4Addr::new(127, 0, 12, 2));
    let err = a.send(&Uid::new("carol"), b"hi").unwrap_err();
    assert!(matches!(err, lcp::Error::UnknownPeer(_)));
    a.stop();
}
