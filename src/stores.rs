// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Store interfaces and reference (JSON-lines) implementations.
//!
//! The core treats peer persistence and chat history as external
//! collaborators: `PeerStore` and `HistoryStore` are trait objects the
//! caller may supply their own implementation of. This module ships one
//! file-backed implementation of each so the crate and its tests can run
//! end-to-end without a caller-supplied store.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Liveness as recorded for persistence, distinct from the in-memory
/// `online`/`offline` split (which is a point-in-time query).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Connected,
    Disconnected,
}

/// One row of the peer snapshot schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecordRow {
    pub uid: String,
    pub address: String,
    pub last_seen: String,
    pub status: PeerStatus,
}

/// A chat history entry: either a text message or a completed file
/// transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HistoryRecord {
    Message {
        sender: String,
        recipient: String,
        message: String,
        timestamp: String,
    },
    File {
        sender: String,
        recipient: String,
        filename: String,
        timestamp: String,
    },
}

/// Receives periodic snapshots of the peer table.
pub trait PeerStore: Send + Sync {
    fn persist(&self, peers: &[PeerRecordRow]) -> Result<()>;
}

/// Receives one record per delivered message or completed file transfer.
pub trait HistoryStore: Send + Sync {
    fn append(&self, record: HistoryRecord) -> Result<()>;
}

fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let line = serde_json::to_string(value)
        .map_err(|e| crate::error::Error::Config(format!("serialize failed: {e}")))?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(crate::error::Error::from)?;
    writeln!(file, "{line}").map_err(crate::error::Error::from)?;
    Ok(())
}

/// Appends one JSON object per line, overwriting the whole file on each
/// persistence cycle (a snapshot, not a log).
pub struct JsonlPeerStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlPeerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

impl PeerStore for JsonlPeerStore {
    fn persist(&self, peers: &[PeerRecordRow]) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(crate::error::Error::from)?;
        for peer in peers {
            let line = serde_json::to_string(peer)
                .map_err(|e| crate::error::Error::Config(format!("serialize failed: {e}")))?;
            writeln!(file, "{line}").map_err(crate::error::Error::from)?;
        }
        Ok(())
    }
}

/// Appends one JSON object per line, one line per history event.
pub struct JsonlHistoryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

impl HistoryStore for JsonlHistoryStore {
    fn append(&self, record: HistoryRecord) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        append_jsonl(&self.path, &record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;

    #[test]
    fn history_store_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let store = JsonlHistoryStore::new(&path);
        store
            .append(HistoryRecord::Message {
                sender: "alice".into(),
                recipient: "bob".into(),
                message: "hi".into(),
                timestamp: "2026-07-27T00:00:00Z".into(),
            })
            .unwrap();
        store
            .append(HistoryRecord::File {
                sender: "alice".into(),
                recipient: "bob".into(),
                filename: "x.bin".into(),
                timestamp: "2026-07-27T00:00:01Z".into(),
            })
            .unwrap();
        let file = std::fs::File::open(&path).unwrap();
        let lines: Vec<_> = std::io::BufReader::new(file).lines().collect();
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn peer_store_overwrites_on_each_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.jsonl");
        let store = JsonlPeerStore::new(&path);
        store
            .persist(&[PeerRecordRow {
                uid: "bob".into(),
                address: "192.168.1.2".into(),
                last_seen: "2026-07-27T00:00:00Z".into(),
                status: PeerStatus::Connected,
            }])
            .unwrap();
        store.persist(&[]).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.is_empty());
    }
}
