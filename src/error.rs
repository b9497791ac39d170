// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy for the LCP node.
//!
//! A single hand-rolled enum, matching the style used throughout this
//! codebase: no `thiserror`, manual `Display`, manual `From<io::Error>`.

use std::fmt;
use std::io;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while packing frames, tracking peers,
/// sending, or receiving.
#[derive(Debug)]
pub enum Error {
    /// A header, response, or body frame was too short or carried an
    /// unknown opcode/status.
    BadFrame(String),
    /// `send`/`send_file` target is not in the peer table.
    UnknownPeer(String),
    /// No matching ACK arrived after all retries.
    AckTimeout,
    /// Transport I/O failure.
    Network(io::Error),
    /// The remote peer replied with status 2 (`InternalError`) to a file transfer.
    RemoteError,
    /// A filename exceeds the 16-bit length field.
    BadFileName(String),
    /// Construction-time configuration or bind failure.
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadFrame(msg) => write!(f, "malformed frame: {msg}"),
            Error::UnknownPeer(uid) => write!(f, "unknown peer: {uid}"),
            Error::AckTimeout => write!(f, "timed out waiting for acknowledgement"),
            Error::Network(e) => write!(f, "network error: {e}"),
            Error::RemoteError => write!(f, "remote peer reported an internal error"),
            Error::BadFileName(name) => write!(f, "invalid file name: {name}"),
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Network(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Network(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let e = Error::UnknownPeer("bob".into());
        assert!(e.to_string().contains("bob"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Network(_)));
    }
}
