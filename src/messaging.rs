// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Text and file messaging: the two-phase datagram handshake, the
//! hybrid announce+stream file protocol, and the single shared receive
//! loop that demultiplexes everything arriving on the datagram socket.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;

use crate::ack_registry::AckRegistry;
use crate::codec::{self, Header, Opcode, Status};
use crate::config::{
    BODY_RECV_TIMEOUT, DEDUP_TTL, DEFAULT_RETRIES, DEFAULT_SEND_TIMEOUT, FILE_RESPONSE_TIMEOUT,
    FILE_STREAM_SETTLE, PENDING_FILE_TTL, RESPONSE_SIZE, SOCK_BUF, STREAM_CHUNK,
};
use crate::dedup::DedupTable;
use crate::discovery::Discovery;
use crate::error::{Error, Result};
use crate::pending_files::PendingFiles;
use crate::peer_table::PeerTable;
use crate::stores::HistoryStore;
use crate::uid::Uid;

/// Invoked once per delivered inbound text message.
pub type MessageCallback = Box<dyn Fn(Uid, Vec<u8>, Instant) + Send + Sync>;
/// Invoked once per completed inbound file transfer.
pub type FileCallback = Box<dyn Fn(Uid, String, Vec<u8>, Instant) + Send + Sync>;

pub struct Messaging {
    socket: Arc<UdpSocket>,
    udp_port: u16,
    stream_port: u16,
    local_uid: Uid,
    peer_table: Arc<PeerTable>,
    ack_registry: Arc<AckRegistry>,
    discovery: Arc<Discovery>,
    dedup: DedupTable,
    pending_files: Arc<PendingFiles>,
    history_store: Option<Arc<dyn HistoryStore>>,
    message_cb: Mutex<Option<MessageCallback>>,
    file_cb: Mutex<Option<FileCallback>>,
    body_id_counter: AtomicU8,
    send_locks: Mutex<HashMap<Uid, Arc<Mutex<()>>>>,
    shutdown: Arc<AtomicBool>,
    receive_handle: Mutex<Option<JoinHandle<()>>>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
    janitor_handle: Mutex<Option<JoinHandle<()>>>,
    stream_listener: Arc<TcpListener>,
}

impl Messaging {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        socket: Arc<UdpSocket>,
        udp_port: u16,
        stream_listener: Arc<TcpListener>,
        stream_port: u16,
        local_uid: Uid,
        peer_table: Arc<PeerTable>,
        ack_registry: Arc<AckRegistry>,
        discovery: Arc<Discovery>,
        history_store: Option<Arc<dyn HistoryStore>>,
    ) -> Self {
        Self {
            socket,
            udp_port,
            stream_port,
            local_uid,
            peer_table,
            ack_registry,
            discovery,
            dedup: DedupTable::new(DEDUP_TTL),
            pending_files: Arc::new(PendingFiles::new()),
            history_store,
            message_cb: Mutex::new(None),
            file_cb: Mutex::new(None),
            body_id_counter: AtomicU8::new(0),
            send_locks: Mutex::new(HashMap::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            receive_handle: Mutex::new(None),
            accept_handle: Mutex::new(None),
            janitor_handle: Mutex::new(None),
            stream_listener,
        }
    }

    pub fn set_message_callback(&self, cb: MessageCallback) {
        *self.message_cb.lock() = Some(cb);
    }

    pub fn set_file_callback(&self, cb: FileCallback) {
        *self.file_cb.lock() = Some(cb);
    }

    /// Spawn the receive loop, the stream-accept loop, and the
    /// pending-files janitor.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        *self.receive_handle.lock() = Some(thread::spawn(move || this.receive_loop()));

        let this = Arc::clone(self);
        *self.accept_handle.lock() = Some(thread::spawn(move || this.stream_accept_loop()));

        let this = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);
        *self.janitor_handle.lock() = Some(thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_secs(5));
                this.pending_files.sweep(Instant::now(), PENDING_FILE_TTL);
            }
        }));
    }

    /// Close the sockets (unblocking the receive/accept loops) and join
    /// every spawned thread. Socket closure is what makes `stop` actually
    /// terminate the unbounded receive/accept loops.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Shutting down the stream listener's underlying fd isn't exposed
        // portably on `TcpListener`; a local connect unblocks `accept`.
        if let Ok(addr) = self.stream_listener.local_addr() {
            let _ = TcpStream::connect_timeout(&addr, Duration::from_millis(200));
        }
        if let Some(h) = self.receive_handle.lock().take() {
            let _ = h.join();
        }
        if let Some(h) = self.accept_handle.lock().take() {
            let _ = h.join();
        }
        if let Some(h) = self.janitor_handle.lock().take() {
            let _ = h.join();
        }
    }

    fn next_body_id(&self) -> u8 {
        self.body_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn lock_for(&self, uid: &Uid) -> Arc<Mutex<()>> {
        self.send_locks
            .lock()
            .entry(uid.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ---------------------------------------------------------------
    // Outbound text
    // ---------------------------------------------------------------

    /// Send a text message to `to`, blocking until acknowledged or all
    /// retries are exhausted.
    pub fn send(&self, to: &Uid, payload: &[u8]) -> Result<()> {
        self.send_with(to, payload, DEFAULT_SEND_TIMEOUT, DEFAULT_RETRIES)
    }

    pub fn send_with(&self, to: &Uid, payload: &[u8], timeout: Duration, retries: u32) -> Result<()> {
        let peer = self
            .peer_table
            .get(to)
            .ok_or_else(|| Error::UnknownPeer(to.to_string()))?;
        let lock = self.lock_for(to);
        let _guard = lock.lock();

        let body_id = self.next_body_id();
        let dest = SocketAddr::new(peer.address, self.udp_port);

        let header = codec::pack_header(&self.local_uid, to, Opcode::Message, body_id, payload.len() as u64);
        self.send_and_await_ack(to, &header, dest, timeout, retries)?;

        let body = codec::pack_message_body(u64::from(body_id), payload);
        self.send_and_await_ack(to, &body, dest, timeout, retries)?;

        if let Some(store) = &self.history_store {
            let _ = store.append(crate::stores::HistoryRecord::Message {
                sender: self.local_uid.to_string(),
                recipient: to.to_string(),
                message: String::from_utf8_lossy(payload).into_owned(),
                timestamp: Utc::now().to_rfc3339(),
            });
        }
        Ok(())
    }

    fn send_and_await_ack(
        &self,
        to: &Uid,
        datagram: &[u8],
        dest: SocketAddr,
        timeout: Duration,
        retries: u32,
    ) -> Result<()> {
        let mut last_err = None;
        for attempt in 0..retries {
            let waiter = self.ack_registry.register(to.clone());
            if let Err(e) = self.socket.send_to(datagram, dest) {
                self.ack_registry.cancel(to);
                last_err = Some(Error::from(e));
                continue;
            }
            if waiter.wait(timeout) {
                return Ok(());
            }
            self.ack_registry.cancel(to);
            log::warn!("ack timeout for {to}, attempt {}/{retries}", attempt + 1);
            thread::sleep(Duration::from_millis((500.0 * (attempt as f64 + 1.0)) as u64));
        }
        Err(last_err.unwrap_or(Error::AckTimeout))
    }

    /// Send `payload` to every currently online peer, logging (not
    /// failing) per-peer errors.
    pub fn broadcast(&self, payload: &[u8]) {
        let (online, _) = self.peer_table.classify(Instant::now());
        for peer in online {
            if peer.uid.is_broadcast() {
                continue;
            }
            if let Err(e) = self.send(&peer.uid, payload) {
                log::warn!("broadcast to {} failed: {e}", peer.uid);
            }
        }
    }

    // ---------------------------------------------------------------
    // Outbound file
    // ---------------------------------------------------------------

    pub fn send_file(&self, to: &Uid, content: &[u8], filename: &str, timeout: Duration) -> Result<()> {
        let peer = self
            .peer_table
            .get(to)
            .ok_or_else(|| Error::UnknownPeer(to.to_string()))?;
        let lock = self.lock_for(to);
        let _guard = lock.lock();

        let body_id = self.next_body_id();
        let body = codec::pack_file_body(u64::from(body_id), filename, content)?;
        let dest = SocketAddr::new(peer.address, self.udp_port);
        let header = codec::pack_header(&self.local_uid, to, Opcode::File, body_id, body.len() as u64);
        self.send_and_await_ack(to, &header, dest, timeout, DEFAULT_RETRIES)?;

        thread::sleep(FILE_STREAM_SETTLE);

        let stream_addr = SocketAddr::new(peer.address, self.stream_port);
        let std_stream = TcpStream::connect(stream_addr)?;
        let sock2 = socket2::Socket::from(std_stream);
        if let Err(e) = sock2.set_send_buffer_size(SOCK_BUF) {
            log::debug!("could not set send buffer size: {e}");
        }
        let mut stream = TcpStream::from(sock2);
        stream.set_write_timeout(Some(timeout))?;
        let _ = stream.set_nodelay(true);

        for chunk in body.chunks(STREAM_CHUNK) {
            stream.write_all(chunk)?;
        }
        stream.flush()?;
        stream.shutdown(std::net::Shutdown::Write).ok();

        stream.set_read_timeout(Some(FILE_RESPONSE_TIMEOUT))?;
        let mut resp_buf = [0u8; RESPONSE_SIZE];
        read_exact_timeout(&mut stream, &mut resp_buf)?;
        let response = codec::unpack_response(&resp_buf)?;
        match response.status {
            Status::Ok => {
                if let Some(store) = &self.history_store {
                    let _ = store.append(crate::stores::HistoryRecord::File {
                        sender: self.local_uid.to_string(),
                        recipient: to.to_string(),
                        filename: filename.to_string(),
                        timestamp: Utc::now().to_rfc3339(),
                    });
                }
                Ok(())
            }
            Status::BadRequest => {
                log::info!("peer {to} already has {filename}");
                Ok(())
            }
            Status::InternalError => Err(Error::RemoteError),
        }
    }

    // ---------------------------------------------------------------
    // Receive loop
    // ---------------------------------------------------------------

    /// `UdpSocket` has no portable "close from another thread" operation,
    /// so `stop()` cannot unblock a `recv_from` the way it unblocks the
    /// stream accept loop by self-connecting. Instead the main receive
    /// path runs under a short timeout and polls the shutdown flag; the
    /// nested body-read in `handle_text_header` temporarily switches to
    /// the longer `BODY_RECV_TIMEOUT` and this restores the poll timeout
    /// afterwards.
    const POLL_TIMEOUT: Duration = Duration::from_millis(250);

    fn receive_loop(&self) {
        if let Err(e) = self.socket.set_read_timeout(Some(Self::POLL_TIMEOUT)) {
            log::warn!("could not set receive poll timeout: {e}");
        }
        let mut buf = [0u8; 65536];
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.socket.recv_from(&mut buf) {
                Ok((n, src)) => self.handle_datagram(&buf[..n], src),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                    continue;
                }
                Err(e) => log::debug!("receive loop error: {e}"),
            }
            let _ = self.socket.set_read_timeout(Some(Self::POLL_TIMEOUT));
        }
    }

    fn handle_datagram(&self, bytes: &[u8], src: SocketAddr) {
        if bytes.len() == RESPONSE_SIZE {
            match codec::unpack_response(bytes) {
                Ok(response) => {
                    if !self.ack_registry.signal(&response.responder) {
                        self.discovery.handle_echo_reply(&response, src);
                    }
                }
                Err(e) => log::debug!("dropping malformed response from {src}: {e}"),
            }
            return;
        }
        if bytes.len() < crate::config::HEADER_SIZE {
            log::debug!("dropping undersized datagram ({} bytes) from {src}", bytes.len());
            return;
        }
        match codec::unpack_header(bytes) {
            Ok(header) => self.handle_header(header, src),
            Err(e) => log::debug!("dropping malformed header from {src}: {e}"),
        }
    }

    fn handle_header(&self, header: Header, src: SocketAddr) {
        match header.opcode {
            Opcode::Echo => {
                if header.to.is_broadcast() {
                    self.discovery.handle_echo_request(&header.from, src);
                }
            }
            Opcode::Message if header.to == self.local_uid => self.handle_text_header(header, src),
            Opcode::File if header.to == self.local_uid => self.handle_file_header(header, src),
            Opcode::File if header.to.is_broadcast() => {
                let resp = codec::pack_response(Status::BadRequest, &self.local_uid);
                let _ = self.socket.send_to(&resp, src);
            }
            _ => log::debug!("dropping header not addressed to self from {src}"),
        }
    }

    fn handle_text_header(&self, header: Header, src: SocketAddr) {
        let ack = codec::pack_response(Status::Ok, &self.local_uid);
        if let Err(e) = self.socket.send_to(&ack, src) {
            log::warn!("header ack send failed: {e}");
            return;
        }

        self.socket
            .set_read_timeout(Some(BODY_RECV_TIMEOUT))
            .ok();
        let mut buf = [0u8; 65536];
        let (n, body_src) = match self.socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("timed out waiting for body from {src}: {e}");
                return;
            }
        };
        let (message_id, payload) = match codec::unpack_message_body(&buf[..n]) {
            Ok(v) => v,
            Err(e) => {
                log::debug!("dropping malformed body from {body_src}: {e}");
                return;
            }
        };
        if (message_id & 0xFF) as u8 != header.body_id {
            log::warn!("body id mismatch from {src}: header={} body={}", header.body_id, message_id);
        }

        let ack = codec::pack_response(Status::Ok, &self.local_uid);
        if let Err(e) = self.socket.send_to(&ack, body_src) {
            log::warn!("body ack send failed: {e}");
        }

        let already_delivered = self
            .dedup
            .check_and_insert(header.from.clone(), header.body_id, Instant::now());
        if already_delivered {
            log::debug!("suppressing duplicate delivery from {}", header.from);
            return;
        }

        if let Some(store) = &self.history_store {
            let _ = store.append(crate::stores::HistoryRecord::Message {
                sender: header.from.to_string(),
                recipient: self.local_uid.to_string(),
                message: String::from_utf8_lossy(payload).into_owned(),
                timestamp: Utc::now().to_rfc3339(),
            });
        }
        if let Some(cb) = self.message_cb.lock().as_ref() {
            cb(header.from, payload.to_vec(), Instant::now());
        }
    }

    fn handle_file_header(&self, header: Header, src: SocketAddr) {
        let ack = codec::pack_response(Status::Ok, &self.local_uid);
        if let Err(e) = self.socket.send_to(&ack, src) {
            log::warn!("file header ack send failed: {e}");
            return;
        }
        self.pending_files
            .announce(header.body_id, header.from, header.body_length, Instant::now());
    }

    // ---------------------------------------------------------------
    // Stream (file) accept loop
    // ---------------------------------------------------------------

    fn stream_accept_loop(self: &Arc<Self>) {
        loop {
            match self.stream_listener.accept() {
                Ok((stream, _peer_addr)) => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    let this = Arc::clone(self);
                    thread::spawn(move || this.handle_inbound_stream(stream));
                }
                Err(e) => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    log::debug!("accept error: {e}");
                }
            }
        }
    }

    fn handle_inbound_stream(&self, mut stream: TcpStream) {
        let _ = stream.set_read_timeout(Some(Duration::from_secs(30)));

        let mut id_buf = [0u8; 8];
        if read_exact_timeout(&mut stream, &mut id_buf).is_err() {
            return;
        }
        let body_id = (u64::from_be_bytes(id_buf) & 0xFF) as u8;

        let Some(pending) = self.pending_files.take(body_id) else {
            let resp = codec::pack_response(Status::InternalError, &self.local_uid);
            let _ = stream.write_all(&resp);
            return;
        };

        match stream.peer_addr() {
            Ok(peer_addr) if self.verify_sender_address(&pending.sender, peer_addr.ip()) => {}
            Ok(peer_addr) => {
                log::warn!("stream peer {} does not match announced sender {}", peer_addr, pending.sender);
                let resp = codec::pack_response(Status::InternalError, &self.local_uid);
                let _ = stream.write_all(&resp);
                return;
            }
            Err(e) => {
                log::warn!("could not verify stream peer address for announced sender {}: {e}", pending.sender);
                let resp = codec::pack_response(Status::InternalError, &self.local_uid);
                let _ = stream.write_all(&resp);
                return;
            }
        }

        let mut len_buf = [0u8; 2];
        let (filename, payload) = if read_exact_timeout(&mut stream, &mut len_buf).is_ok() {
            let filename_len = u16::from_be_bytes(len_buf) as u64;
            let remaining = pending.body_length.saturating_sub(10);
            if filename_len > remaining || filename_len > 65536 {
                // Malformed filename-length field: can't trust the claimed
                // split between name and content, so treat the rest of the
                // announced body as opaque payload under a synthesized name.
                let mut payload = vec![0u8; remaining as usize];
                if read_exact_timeout(&mut stream, &mut payload).is_err() {
                    let resp = codec::pack_response(Status::InternalError, &self.local_uid);
                    let _ = stream.write_all(&resp);
                    return;
                }
                (format!("archivo_{body_id}.bin"), payload)
            } else {
                let mut name_buf = vec![0u8; filename_len as usize];
                if read_exact_timeout(&mut stream, &mut name_buf).is_err() {
                    let resp = codec::pack_response(Status::InternalError, &self.local_uid);
                    let _ = stream.write_all(&resp);
                    return;
                }
                let filename = String::from_utf8(name_buf)
                    .unwrap_or_else(|_| format!("archivo_{body_id}.bin"));
                let payload_len = (remaining - filename_len) as usize;
                let mut payload = vec![0u8; payload_len];
                if read_exact_timeout(&mut stream, &mut payload).is_err() {
                    let resp = codec::pack_response(Status::InternalError, &self.local_uid);
                    let _ = stream.write_all(&resp);
                    return;
                }
                (filename, payload)
            }
        } else {
            let resp = codec::pack_response(Status::InternalError, &self.local_uid);
            let _ = stream.write_all(&resp);
            return;
        };

        if let Some(store) = &self.history_store {
            let _ = store.append(crate::stores::HistoryRecord::File {
                sender: pending.sender.to_string(),
                recipient: self.local_uid.to_string(),
                filename: filename.clone(),
                timestamp: Utc::now().to_rfc3339(),
            });
        }
        if let Some(cb) = self.file_cb.lock().as_ref() {
            cb(pending.sender, filename, payload, Instant::now());
        }

        let resp = codec::pack_response(Status::Ok, &self.local_uid);
        let _ = stream.write_all(&resp);
    }

    fn verify_sender_address(&self, sender: &Uid, addr: IpAddr) -> bool {
        self.peer_table
            .get(sender)
            .map(|p| p.address == addr)
            .unwrap_or(false)
    }
}

fn read_exact_timeout(stream: &mut TcpStream, buf: &mut [u8]) -> std::io::Result<()> {
    stream.read_exact(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_id_counter_wraps_u8() {
        let counter = AtomicU8::new(255);
        let first = counter.fetch_add(1, Ordering::Relaxed);
        let second = counter.load(Ordering::Relaxed);
        assert_eq!(first, 255);
        assert_eq!(second, 0);
    }
}
