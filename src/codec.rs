// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wire codec: pack/unpack for the three LCP frame kinds.
//!
//! ```text
//! Header (100 bytes)
//!  0                   20                  40 41    42                50          100
//!  +-------------------+-------------------+--+-----+------------------+-----------+
//!  |     user_from      |     user_to        |op|body |   body_length    | reserved  |
//!  |     (20 bytes)      |    (20 bytes)      |  | id  |    (8 bytes BE)  | (50 zero) |
//!  +-------------------+-------------------+--+-----+------------------+-----------+
//!
//! Response (25 bytes)
//!  0      1                    21        25
//!  +------+--------------------+---------+
//!  |status|   responder uid    | reserved|
//!  |      |     (20 bytes)      | (4 zero)|
//!  +------+--------------------+---------+
//! ```

use crate::config::{
    HEADER_BODY_ID_OFFSET, HEADER_BODY_LEN_OFFSET, HEADER_OPCODE_OFFSET, HEADER_RESERVED_SIZE,
    HEADER_SIZE, RESPONSE_SIZE, UID_SIZE,
};
use crate::error::{Error, Result};
use crate::uid::Uid;

/// Opcode carried by a [`Header`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Echo = 0,
    Message = 1,
    File = 2,
}

impl Opcode {
    fn from_u8(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Opcode::Echo),
            1 => Ok(Opcode::Message),
            2 => Ok(Opcode::File),
            other => Err(Error::BadFrame(format!("unknown opcode {other}"))),
        }
    }
}

/// Status carried by a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    BadRequest = 1,
    InternalError = 2,
}

impl Status {
    fn from_u8(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Status::Ok),
            1 => Ok(Status::BadRequest),
            2 => Ok(Status::InternalError),
            other => Err(Error::BadFrame(format!("unknown status {other}"))),
        }
    }
}

/// A decoded 100-byte header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub from: Uid,
    pub to: Uid,
    pub opcode: Opcode,
    pub body_id: u8,
    pub body_length: u64,
}

/// A decoded 25-byte response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub responder: Uid,
}

/// Pack a [`Header`] into exactly [`HEADER_SIZE`] bytes.
pub fn pack_header(from: &Uid, to: &Uid, opcode: Opcode, body_id: u8, body_length: u64) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0..UID_SIZE].copy_from_slice(&from.padded());
    buf[UID_SIZE..2 * UID_SIZE].copy_from_slice(&to.padded());
    buf[HEADER_OPCODE_OFFSET] = opcode as u8;
    buf[HEADER_BODY_ID_OFFSET] = body_id;
    buf[HEADER_BODY_LEN_OFFSET..HEADER_BODY_LEN_OFFSET + 8].copy_from_slice(&body_length.to_be_bytes());
    // bytes[50..100] stay zero (reserved)
    debug_assert_eq!(HEADER_RESERVED_SIZE, HEADER_SIZE - (HEADER_BODY_LEN_OFFSET + 8));
    buf
}

/// Unpack a [`Header`] from `bytes`. Reserved bytes are ignored.
pub fn unpack_header(bytes: &[u8]) -> Result<Header> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::BadFrame(format!(
            "header too short: {} < {HEADER_SIZE}",
            bytes.len()
        )));
    }
    let from = Uid::from_padded(&bytes[0..UID_SIZE]);
    let to = Uid::from_padded(&bytes[UID_SIZE..2 * UID_SIZE]);
    let opcode = Opcode::from_u8(bytes[HEADER_OPCODE_OFFSET])?;
    let body_id = bytes[HEADER_BODY_ID_OFFSET];
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[HEADER_BODY_LEN_OFFSET..HEADER_BODY_LEN_OFFSET + 8]);
    let body_length = u64::from_be_bytes(len_bytes);
    Ok(Header {
        from,
        to,
        opcode,
        body_id,
        body_length,
    })
}

/// Pack a [`Response`] into exactly [`RESPONSE_SIZE`] bytes.
pub fn pack_response(status: Status, responder: &Uid) -> [u8; RESPONSE_SIZE] {
    let mut buf = [0u8; RESPONSE_SIZE];
    buf[0] = status as u8;
    buf[1..1 + UID_SIZE].copy_from_slice(&responder.padded());
    buf
}

/// Unpack a [`Response`] from `bytes`.
pub fn unpack_response(bytes: &[u8]) -> Result<Response> {
    if bytes.len() < RESPONSE_SIZE {
        return Err(Error::BadFrame(format!(
            "response too short: {} < {RESPONSE_SIZE}",
            bytes.len()
        )));
    }
    let status = Status::from_u8(bytes[0])?;
    let responder = Uid::from_padded(&bytes[1..1 + UID_SIZE]);
    Ok(Response { status, responder })
}

/// Pack a message body: `8B(message_id BE) || payload`.
pub fn pack_message_body(message_id: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&message_id.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Unpack a message body into `(message_id, payload)`.
pub fn unpack_message_body(bytes: &[u8]) -> Result<(u64, &[u8])> {
    if bytes.len() < 8 {
        return Err(Error::BadFrame(format!(
            "message body too short: {} < 8",
            bytes.len()
        )));
    }
    let mut id_bytes = [0u8; 8];
    id_bytes.copy_from_slice(&bytes[0..8]);
    Ok((u64::from_be_bytes(id_bytes), &bytes[8..]))
}

/// Pack a file body: `8B(body_id) || 2B(filename_len) || filename || content`.
pub fn pack_file_body(body_id: u64, filename: &str, content: &[u8]) -> Result<Vec<u8>> {
    let name_bytes = filename.as_bytes();
    if name_bytes.len() > u16::MAX as usize {
        return Err(Error::BadFileName(format!(
            "filename {} bytes exceeds 65535",
            name_bytes.len()
        )));
    }
    let mut out = Vec::with_capacity(10 + name_bytes.len() + content.len());
    out.extend_from_slice(&body_id.to_be_bytes());
    out.extend_from_slice(&(name_bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(name_bytes);
    out.extend_from_slice(content);
    Ok(out)
}
