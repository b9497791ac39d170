// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Minimal standalone LCP node: starts discovery and messaging, prints
//! inbound messages and file transfers to stdout, and lets the operator
//! send a text message from the command line.
//!
//! ```text
//! lcp-node <your-uid> [peer-uid message...]
//! ```

use std::env;
use std::sync::Arc;

use lcp::stores::{JsonlHistoryStore, JsonlPeerStore};
use lcp::{Engine, RuntimeConfig, Uid};

fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);
    let Some(local_uid) = args.next() else {
        eprintln!("usage: lcp-node <your-uid> [peer-uid message...]");
        std::process::exit(2);
    };

    let peer_store: Arc<dyn lcp::stores::PeerStore> = Arc::new(JsonlPeerStore::new("peers.jsonl"));
    let history_store: Arc<dyn lcp::stores::HistoryStore> = Arc::new(JsonlHistoryStore::new("history.jsonl"));

    let node = Engine::new(
        local_uid.clone(),
        RuntimeConfig::from_env(),
        Some(peer_store),
        Some(history_store),
    )
    .expect("failed to construct LCP node");

    node.on_message(Box::new(|from, payload, _now| {
        println!("[{from}] {}", String::from_utf8_lossy(&payload));
    }));
    node.on_file(Box::new(|from, filename, payload, _now| {
        println!("[{from}] sent file {filename} ({} bytes)", payload.len());
    }));

    node.start();
    node.force_discover();
    log::info!("LCP node {local_uid} running, press Ctrl+C to stop");

    let rest: Vec<String> = args.collect();
    if let Some((peer, message)) = rest.split_first() {
        let to = Uid::new(peer);
        let text = message.join(" ");
        if let Err(e) = node.send(&to, text.as_bytes()) {
            eprintln!("send to {peer} failed: {e}");
        }
    }

    loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
    }
}
