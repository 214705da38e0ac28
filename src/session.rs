//! The top-level engine: [`Session`] owns the transport, codec buffers,
//! sequence counter and verbosity level, and exposes queued and synchronous
//! register access through [`Batch`].

use std::net::IpAddr;
use std::net::SocketAddr;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::protocol::{self, Command, EcurError, LaneCode, WritePayload};
use crate::transport::Transport;

/// A per-read-operation record describing where decoded reply bytes land
/// and which callback (if any) to invoke once they do.
///
/// `'d` is the lifetime of the destination buffer; a `Reader` can only
/// outlive the [`Batch`] it was queued on for as long as that buffer does.
pub struct Reader<'d> {
    target: ReaderTarget<'d>,
    callback: Option<Box<dyn FnMut(Result<usize, EcurError>) + 'd>>,
}

impl<'d> Reader<'d> {
    fn finish(&mut self, outcome: Result<usize, EcurError>) {
        if let Some(callback) = self.callback.as_mut() {
            callback(outcome);
        }
    }
}

impl<'d> std::fmt::Debug for Reader<'d> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("target", &self.target)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// A typed destination for a queued read, replacing the untyped pointer +
/// width tag of the protocol's original C API with one variant per access
/// width.
pub enum ReaderTarget<'d> {
    /// 8-bit elements (byte lanes B0..B3).
    D8(&'d mut [u8]),
    /// 16-bit elements (word lanes W0/W1).
    D16(&'d mut [u16]),
    /// 32-bit elements (the double-word lane).
    D32(&'d mut [u32]),
}

impl<'d> ReaderTarget<'d> {
    fn nelms(&self) -> usize {
        match self {
            ReaderTarget::D8(d) => d.len(),
            ReaderTarget::D16(d) => d.len(),
            ReaderTarget::D32(d) => d.len(),
        }
    }

    fn element_size(&self) -> usize {
        match self {
            ReaderTarget::D8(_) | ReaderTarget::D16(_) => 2,
            ReaderTarget::D32(_) => 4,
        }
    }

    /// Decodes up to `nelems` little-endian elements from `payload` into the
    /// destination buffer. Returns the number of payload bytes consumed.
    fn decode(&mut self, payload: &[u8], nelems: usize) -> usize {
        match self {
            ReaderTarget::D8(dest) => protocol::unpack_d8(payload, dest, nelems),
            ReaderTarget::D16(dest) => protocol::unpack_d16(payload, dest, nelems),
            ReaderTarget::D32(dest) => protocol::unpack_d32(payload, dest, nelems),
        }
    }
}

impl<'d> std::fmt::Debug for ReaderTarget<'d> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReaderTarget::D8(d) => f.debug_tuple("D8").field(&d.len()).finish(),
            ReaderTarget::D16(d) => f.debug_tuple("D16").field(&d.len()).finish(),
            ReaderTarget::D32(d) => f.debug_tuple("D32").field(&d.len()).finish(),
        }
    }
}

fn flush_readers(readers: &mut [Reader<'_>], outcome: Result<usize, EcurError>) {
    for reader in readers.iter_mut() {
        reader.finish(outcome);
    }
}

/// A single request/reply cycle under construction.
///
/// Created by [`Session::batch`]. Queue reads and writes with
/// `queue_read{8,16,32}`/`queue_write{8,16,32}`, then call [`Batch::execute`]
/// exactly once. Dropping a `Batch` without calling `execute` flushes any
/// queued readers with [`EcurError::Internal`] and resets the session's
/// outbound buffer, so an abandoned batch never leaks state into the next
/// one.
#[derive(Debug)]
pub struct Batch<'sess, 'd> {
    session: &'sess mut Session,
    readers: Vec<Reader<'d>>,
    done: bool,
}

impl<'sess, 'd> Batch<'sess, 'd> {
    fn ensure_header(&mut self) {
        if self.session.out.is_empty() {
            protocol::write_header(&mut self.session.out, Command::ReadWriteBatch, self.session.seq);
            self.session.seq = (self.session.seq + 1) & 0x0f;
            self.session.expected_reply_len = protocol::HEADER_SIZE;
        }
    }

    /// Validates and appends one operation descriptor. Returns the data
    /// size in bytes (per-element size times burst count) on success.
    ///
    /// Burst count and word address are validated *before* the header is
    /// written or any buffer space is consumed, so a caller programming
    /// error (`InvalidCount`/`InvalidAddr`) never touches the batch's state.
    fn queue_op(
        &mut self,
        read: bool,
        lane: LaneCode,
        burst: u32,
        word_addr: u32,
    ) -> Result<usize, EcurError> {
        let descriptor = protocol::encode_descriptor(read, lane, burst, word_addr)?;
        let data_size = burst as usize * lane.element_size();
        let req_size = 4 + if read { 0 } else { data_size };
        let rep_size = if read { data_size } else { 0 };

        self.ensure_header();

        if self.session.out.len() + req_size > protocol::MTU_PAYLOAD {
            return Err(EcurError::NospaceReq);
        }
        if self.session.expected_reply_len + rep_size > protocol::MTU_PAYLOAD - protocol::STATUS_SIZE
        {
            return Err(EcurError::NospaceRep);
        }
        if read && self.readers.len() >= protocol::MAX_READERS {
            return Err(EcurError::NospaceRep);
        }

        self.session
            .out
            .write_u32::<LittleEndian>(descriptor)
            .expect("capacity already checked");
        if read {
            self.session.expected_reply_len += rep_size;
        }

        Ok(data_size)
    }

    /// Queues an 8-bit read of `dest.len()` elements at `addr`. The lane is
    /// selected from `addr & 3`; any byte alignment is valid.
    pub fn queue_read8(
        &mut self,
        addr: u32,
        dest: &'d mut [u8],
        callback: Option<Box<dyn FnMut(Result<usize, EcurError>) + 'd>>,
    ) -> Result<(), EcurError> {
        let lane = LaneCode::for_width8(addr);
        self.queue_op(true, lane, dest.len() as u32, addr >> 2)?;
        self.readers.push(Reader {
            target: ReaderTarget::D8(dest),
            callback,
        });
        Ok(())
    }

    /// Queues a 16-bit read of `dest.len()` elements at `addr`. `addr` must
    /// be even.
    pub fn queue_read16(
        &mut self,
        addr: u32,
        dest: &'d mut [u16],
        callback: Option<Box<dyn FnMut(Result<usize, EcurError>) + 'd>>,
    ) -> Result<(), EcurError> {
        let lane = LaneCode::for_width16(addr)?;
        self.queue_op(true, lane, dest.len() as u32, addr >> 2)?;
        self.readers.push(Reader {
            target: ReaderTarget::D16(dest),
            callback,
        });
        Ok(())
    }

    /// Queues a 32-bit read of `dest.len()` elements at `addr`. `addr` must
    /// be a multiple of 4.
    pub fn queue_read32(
        &mut self,
        addr: u32,
        dest: &'d mut [u32],
        callback: Option<Box<dyn FnMut(Result<usize, EcurError>) + 'd>>,
    ) -> Result<(), EcurError> {
        let lane = LaneCode::for_width32(addr)?;
        self.queue_op(true, lane, dest.len() as u32, addr >> 2)?;
        self.readers.push(Reader {
            target: ReaderTarget::D32(dest),
            callback,
        });
        Ok(())
    }

    /// Queues an 8-bit write of `data` at `addr`.
    pub fn queue_write8(&mut self, addr: u32, data: &[u8]) -> Result<(), EcurError> {
        let lane = LaneCode::for_width8(addr);
        self.queue_op(false, lane, data.len() as u32, addr >> 2)?;
        protocol::pack_write_payload(&mut self.session.out, lane, WritePayload::D8(data));
        Ok(())
    }

    /// Queues a 16-bit write of `data` at `addr`. `addr` must be even.
    pub fn queue_write16(&mut self, addr: u32, data: &[u16]) -> Result<(), EcurError> {
        let lane = LaneCode::for_width16(addr)?;
        self.queue_op(false, lane, data.len() as u32, addr >> 2)?;
        protocol::pack_write_payload(&mut self.session.out, lane, WritePayload::D16(data));
        Ok(())
    }

    /// Queues a 32-bit write of `data` at `addr`. `addr` must be a multiple
    /// of 4.
    pub fn queue_write32(&mut self, addr: u32, data: &[u32]) -> Result<(), EcurError> {
        let lane = LaneCode::for_width32(addr)?;
        self.queue_op(false, lane, data.len() as u32, addr >> 2)?;
        protocol::pack_write_payload(&mut self.session.out, lane, WritePayload::D32(data));
        Ok(())
    }

    /// Ships the batch through the transport and dispatches the reply to
    /// each queued [`Reader`]. Returns the status trailer's element count on
    /// success, or the error that caused every pending reader to be flushed.
    ///
    /// If no operations were queued, returns `Ok(0)` immediately without
    /// sending a datagram.
    pub fn execute(mut self) -> Result<usize, EcurError> {
        self.done = true;

        if self.session.out.is_empty() {
            return Ok(0);
        }

        let result = match self.session.transport.transfer(&self.session.out) {
            Ok(reply) => dispatch_reply(reply, &mut self.readers),
            Err(err) => {
                flush_readers(&mut self.readers, Err(err));
                Err(err)
            }
        };

        self.session.out.clear();
        self.session.expected_reply_len = 0;
        result
    }
}

impl<'sess, 'd> Drop for Batch<'sess, 'd> {
    fn drop(&mut self) {
        if !self.done {
            log::error!("session: batch dropped without being executed, flushing readers");
            flush_readers(&mut self.readers, Err(EcurError::Internal));
            self.session.out.clear();
            self.session.expected_reply_len = 0;
        }
    }
}

/// Parses a reply datagram and dispatches decoded elements (or flush
/// outcomes) to each queued reader, in queue order.
fn dispatch_reply(reply: &[u8], readers: &mut [Reader<'_>]) -> Result<usize, EcurError> {
    if reply.len() < protocol::HEADER_SIZE + protocol::STATUS_SIZE {
        log::error!("session: reply too short ({} bytes)", reply.len());
        flush_readers(readers, Err(EcurError::InvalidRep));
        return Err(EcurError::InvalidRep);
    }

    let trailer_start = reply.len() - protocol::STATUS_SIZE;
    let status = protocol::read_status(&reply[trailer_start..]);

    if status.error {
        log::error!("session: target reported an error in its reply status");
        flush_readers(readers, Err(EcurError::InvalidRep));
        return Err(EcurError::InvalidRep);
    }

    let payload = &reply[protocol::HEADER_SIZE..trailer_start];
    let mut cursor = 0usize;
    let mut dispatched = 0usize;

    while cursor < payload.len() && dispatched < readers.len() {
        let reader = &mut readers[dispatched];
        let remaining = payload.len() - cursor;
        let mut nelems = remaining / reader.target.element_size();
        if nelems > reader.target.nelms() {
            nelems = reader.target.nelms();
        }
        let consumed = reader.target.decode(&payload[cursor..], nelems);
        cursor += consumed;
        reader.finish(Ok(nelems));
        dispatched += 1;
    }

    if cursor < payload.len() {
        log::error!("session: reply carried more data than the queued reads expected");
        flush_readers(&mut readers[dispatched..], Err(EcurError::InvalidRep));
        return Err(EcurError::InvalidRep);
    }

    if dispatched < readers.len() {
        log::error!(
            "session: reply satisfied only {dispatched} of {} queued reads (target processed {})",
            readers.len(),
            status.count
        );
        flush_readers(&mut readers[dispatched..], Ok(status.count));
    }

    Ok(status.count)
}

/// A handle to one `ecur` target, bound at construction to its UDP address.
///
/// `Session` owns the UDP endpoint, both codec buffers, the rolling 4-bit
/// sequence counter, and the verbosity level. It is not safe for concurrent
/// use: each batch is built and executed by a single caller, which blocks on
/// the transport until a reply arrives or all retries are exhausted.
#[derive(Debug)]
pub struct Session {
    transport: Transport,
    out: Vec<u8>,
    expected_reply_len: usize,
    seq: u8,
    verbosity: u8,
}

impl Session {
    /// Opens a session to `ip:port` (or the default port 4096 if `port` is
    /// `None`), then performs the protocol-version handshake. Fails with
    /// [`EcurError::Io`] on handshake timeout, or [`EcurError::InvalidRep`]
    /// if the target speaks a different protocol version.
    pub fn open(
        ip: IpAddr,
        port: impl Into<Option<u16>>,
        verbosity: u8,
    ) -> Result<Self, EcurError> {
        let target = SocketAddr::new(ip, port.into().unwrap_or(crate::DEFAULT_PORT));

        let transport = Transport::connect(target, protocol::MTU_PAYLOAD, verbosity).map_err(|err| {
            log::error!("session: failed to open UDP endpoint to {target}: {err}");
            EcurError::Io
        })?;

        let mut session = Session {
            transport,
            out: Vec::with_capacity(protocol::MTU_PAYLOAD),
            expected_reply_len: 0,
            seq: 0,
            verbosity,
        };

        session.handshake()?;
        Ok(session)
    }

    fn handshake(&mut self) -> Result<(), EcurError> {
        self.out.clear();
        protocol::write_header(&mut self.out, Command::Version, self.seq);
        self.seq = (self.seq + 1) & 0x0f;

        let reply = self.transport.transfer(&self.out)?;
        let (_command, seq) = protocol::read_header(reply)?;

        if self.verbosity > 0 {
            log::debug!("session: version handshake ok (reply seq {seq})");
        }

        self.out.clear();
        Ok(())
    }

    /// Starts a new batch. The request header is not written until the
    /// first queued operation; a `Batch` on which nothing was queued
    /// `execute`s to `Ok(0)` without sending a datagram.
    ///
    /// `'d`, the destination-buffer lifetime, is fixed by whatever is
    /// passed to the batch's `queue_read*` calls, not by this signature --
    /// hence the explicit generic rather than a second elided lifetime.
    #[allow(single_use_lifetimes)]
    pub fn batch<'d>(&mut self) -> Batch<'_, 'd> {
        Batch {
            session: self,
            readers: Vec::new(),
            done: false,
        }
    }

    /// Queues and executes a single 8-bit read, returning the number of
    /// elements decoded.
    pub fn read8(&mut self, addr: u32, dest: &mut [u8]) -> Result<usize, EcurError> {
        let mut batch = self.batch();
        batch.queue_read8(addr, dest, None)?;
        batch.execute()
    }

    /// Queues and executes a single 16-bit read, returning the number of
    /// elements decoded.
    pub fn read16(&mut self, addr: u32, dest: &mut [u16]) -> Result<usize, EcurError> {
        let mut batch = self.batch();
        batch.queue_read16(addr, dest, None)?;
        batch.execute()
    }

    /// Queues and executes a single 32-bit read, returning the number of
    /// elements decoded.
    pub fn read32(&mut self, addr: u32, dest: &mut [u32]) -> Result<usize, EcurError> {
        let mut batch = self.batch();
        batch.queue_read32(addr, dest, None)?;
        batch.execute()
    }

    /// Queues and executes a single 8-bit write.
    pub fn write8(&mut self, addr: u32, data: &[u8]) -> Result<usize, EcurError> {
        let mut batch = self.batch();
        batch.queue_write8(addr, data)?;
        batch.execute()
    }

    /// Queues and executes a single 16-bit write.
    pub fn write16(&mut self, addr: u32, data: &[u16]) -> Result<usize, EcurError> {
        let mut batch = self.batch();
        batch.queue_write16(addr, data)?;
        batch.execute()
    }

    /// Queues and executes a single 32-bit write.
    pub fn write32(&mut self, addr: u32, data: &[u32]) -> Result<usize, EcurError> {
        let mut batch = self.batch();
        batch.queue_write32(addr, data)?;
        batch.execute()
    }

    /// The session's current verbosity level. Levels above 0 enable
    /// protocol-level log traces; above 1 also enables per-poll traces.
    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    /// Updates the verbosity level.
    pub fn set_verbosity(&mut self, verbosity: u8) {
        self.verbosity = verbosity;
        self.transport.set_verbosity(verbosity);
    }

    /// Closes the session, releasing the UDP endpoint.
    ///
    /// Dropping a `Session` has the same effect. Because a [`Batch`] always
    /// resolves its readers (dispatched or flushed with
    /// [`EcurError::Internal`]) before it can be dropped, and a `Batch`
    /// must itself be dropped before its borrowed `Session` can be, there is
    /// never a pending reader left to flush by the time a `Session` closes.
    pub fn close(self) {}
}

#[cfg(test)]
mod test_support {
    use std::net::{SocketAddr, UdpSocket};
    use std::sync::mpsc::{self, Receiver};
    use std::thread;

    /// Spawns a background responder that answers up to `replies.len()`
    /// datagrams in order, then stops responding (simulating a target that
    /// goes silent, or simply exhausting a scripted fixture).
    pub(super) fn respond_sequence(replies: Vec<Vec<u8>>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind responder");
        let addr = socket.local_addr().expect("local_addr");
        thread::spawn(move || {
            let mut buf = [0u8; 2048];
            for reply in replies {
                match socket.recv_from(&mut buf) {
                    Ok((_, from)) => {
                        let _ = socket.send_to(&reply, from);
                    }
                    Err(_) => break,
                }
            }
        });
        addr
    }

    /// Spawns a background responder that computes each reply from the
    /// request bytes and its index, and reports every request it saw.
    pub(super) fn respond_capturing(
        n: usize,
        reply_for: impl Fn(&[u8], usize) -> Vec<u8> + Send + 'static,
    ) -> (SocketAddr, Receiver<Vec<u8>>) {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind responder");
        let addr = socket.local_addr().expect("local_addr");
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = [0u8; 2048];
            for i in 0..n {
                match socket.recv_from(&mut buf) {
                    Ok((len, from)) => {
                        let request = buf[..len].to_vec();
                        let reply = reply_for(&request, i);
                        let _ = socket.send_to(&reply, from);
                        let _ = tx.send(request);
                    }
                    Err(_) => break,
                }
            }
        });
        (addr, rx)
    }

    /// A valid VERSION handshake reply (command nibble is unchecked by the
    /// client; only the version nibble matters).
    pub(super) fn version_reply() -> Vec<u8> {
        vec![0x11, 0x00]
    }

    /// A well-formed, empty batch reply: no payload, status count 0, no
    /// error bit.
    pub(super) fn empty_batch_reply() -> Vec<u8> {
        let mut reply = vec![0x21, 0x00];
        reply.extend_from_slice(&0u16.to_le_bytes());
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    #[test_log::test]
    fn open_succeeds_on_valid_handshake() {
        let addr = respond_sequence(vec![version_reply()]);
        let session = Session::open(addr.ip(), addr.port(), 0);
        assert!(session.is_ok());
    }

    #[test_log::test]
    fn open_fails_on_version_mismatch() {
        let addr = respond_sequence(vec![vec![0x12, 0x00]]);
        let session = Session::open(addr.ip(), addr.port(), 0);
        assert_eq!(session.err(), Some(EcurError::InvalidRep));
    }

    #[test_log::test]
    #[ignore = "exercises the full ~3s handshake timeout; run explicitly with `cargo test -- --ignored`"]
    fn open_fails_with_io_when_target_never_responds() {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        drop(socket);

        let session = Session::open(addr.ip(), addr.port(), 0);
        assert_eq!(session.err(), Some(EcurError::Io));
    }

    #[test_log::test]
    fn executing_an_empty_batch_returns_zero_without_a_datagram() {
        let addr = respond_sequence(vec![version_reply()]);
        let mut session = Session::open(addr.ip(), addr.port(), 0).unwrap();
        let batch = session.batch();
        assert_eq!(batch.execute(), Ok(0));
    }

    #[test_log::test]
    fn mixed_width_batch_dispatches_in_queue_order() {
        let addr = respond_sequence(vec![version_reply(), {
            let mut reply = vec![0x21, 0x00];
            for v in [0x0504_0302u32, 0xCCDD_AABBu32, 0xDEAD_BEEFu32] {
                reply.extend_from_slice(&v.to_le_bytes());
            }
            reply.extend_from_slice(&3u16.to_le_bytes());
            reply
        }]);
        let mut session = Session::open(addr.ip(), addr.port(), 0).unwrap();

        let base = 0xF80u32;
        let mut out = [0u32; 3];
        let count = {
            let mut batch = session.batch();
            batch.queue_write8(base, &[0x02]).unwrap();
            batch.queue_write8(base + 1, &[0x03]).unwrap();
            batch.queue_write8(base + 2, &[0x04]).unwrap();
            batch.queue_write8(base + 3, &[0x05]).unwrap();
            batch.queue_write16(base + 4, &[0xAABB]).unwrap();
            batch.queue_write16(base + 6, &[0xCCDD]).unwrap();
            batch.queue_write32(base + 8, &[0xDEADBEEF]).unwrap();
            batch.queue_read32(base, &mut out, None).unwrap();
            batch.execute().unwrap()
        };

        assert_eq!(count, 3);
        assert_eq!(out, [0x0504_0302, 0xCCDD_AABB, 0xDEAD_BEEF]);
    }

    #[test_log::test]
    fn target_error_reply_flushes_readers_with_invalid_rep() {
        let addr = respond_sequence(vec![version_reply(), {
            let mut reply = vec![0x21, 0x00];
            reply.extend_from_slice(&0x8000u16.to_le_bytes());
            reply
        }]);
        let mut session = Session::open(addr.ip(), addr.port(), 0).unwrap();

        let seen = RefCell::new(None);
        let mut out = [0u32; 1];
        let result = {
            let mut batch = session.batch();
            batch
                .queue_read32(
                    0,
                    &mut out,
                    Some(Box::new(|outcome| *seen.borrow_mut() = Some(outcome))),
                )
                .unwrap();
            batch.execute()
        };

        assert_eq!(result, Err(EcurError::InvalidRep));
        assert_eq!(*seen.borrow(), Some(Err(EcurError::InvalidRep)));
    }

    #[test_log::test]
    fn partial_completion_flushes_remaining_readers_with_status_count() {
        let addr = respond_sequence(vec![version_reply(), {
            let mut reply = vec![0x21, 0x00];
            for v in [1u32, 2, 3] {
                reply.extend_from_slice(&v.to_le_bytes());
            }
            reply.extend_from_slice(&3u16.to_le_bytes());
            reply
        }]);
        let mut session = Session::open(addr.ip(), addr.port(), 0).unwrap();

        let mut outs = [0u32; 5];
        let cells: Vec<RefCell<Option<Result<usize, EcurError>>>> =
            (0..5).map(|_| RefCell::new(None)).collect();

        let result = {
            let mut batch = session.batch();
            let mut rest = &mut outs[..];
            for (i, cell) in cells.iter().enumerate() {
                let (one, remainder) = rest.split_at_mut(1);
                rest = remainder;
                batch
                    .queue_read32(
                        i as u32 * 4,
                        one,
                        Some(Box::new(move |outcome| *cell.borrow_mut() = Some(outcome))),
                    )
                    .unwrap();
            }
            batch.execute()
        };

        assert_eq!(result, Ok(3));
        assert_eq!(outs, [1, 2, 3, 0, 0]);
        for cell in &cells[..3] {
            assert_matches::assert_matches!(*cell.borrow(), Some(Ok(1)));
        }
        for cell in &cells[3..] {
            assert_eq!(*cell.borrow(), Some(Ok(3)));
        }
    }

    #[test_log::test]
    fn sequence_counter_wraps_mod_16() {
        let (addr, rx) = respond_capturing(17, |_, i| {
            if i == 0 {
                version_reply()
            } else {
                empty_batch_reply()
            }
        });
        let mut session = Session::open(addr.ip(), addr.port(), 0).unwrap();
        rx.recv().expect("handshake request");

        let mut seqs = Vec::new();
        for _ in 0..16 {
            let mut out = [0u32; 1];
            let mut batch = session.batch();
            batch.queue_read32(0, &mut out, None).unwrap();
            batch.execute().unwrap();
            let request = rx.recv().expect("batch request");
            seqs.push(request[1] & 0x0f);
        }

        let expected: Vec<u8> = (1..16).chain(std::iter::once(0)).collect();
        assert_eq!(seqs, expected);
    }

    #[test_log::test]
    fn dropping_a_batch_without_executing_flushes_readers_with_internal() {
        let addr = respond_sequence(vec![version_reply()]);
        let mut session = Session::open(addr.ip(), addr.port(), 0).unwrap();

        let seen = RefCell::new(None);
        {
            let mut out = [0u32; 1];
            let mut batch = session.batch();
            batch
                .queue_read32(
                    0,
                    &mut out,
                    Some(Box::new(|outcome| *seen.borrow_mut() = Some(outcome))),
                )
                .unwrap();
        }

        assert_eq!(*seen.borrow(), Some(Err(EcurError::Internal)));
    }

    #[test_log::test]
    fn queue_read_rejects_zero_and_oversized_count() {
        let addr = respond_sequence(vec![version_reply()]);
        let mut session = Session::open(addr.ip(), addr.port(), 0).unwrap();
        let mut batch = session.batch();

        let mut empty: [u32; 0] = [];
        assert_eq!(
            batch.queue_read32(0, &mut empty, None),
            Err(EcurError::InvalidCount)
        );

        let mut big = [0u32; 257];
        assert_eq!(
            batch.queue_read32(0, &mut big, None),
            Err(EcurError::InvalidCount)
        );
    }

    #[test_log::test]
    fn queue_read16_rejects_odd_address() {
        let addr = respond_sequence(vec![version_reply()]);
        let mut session = Session::open(addr.ip(), addr.port(), 0).unwrap();
        let mut batch = session.batch();
        let mut dest = [0u16; 1];
        assert_eq!(
            batch.queue_read16(1, &mut dest, None),
            Err(EcurError::InvalidAddr)
        );
    }

    #[test_log::test]
    fn queue_read32_rejects_misaligned_address() {
        let addr = respond_sequence(vec![version_reply()]);
        let mut session = Session::open(addr.ip(), addr.port(), 0).unwrap();
        let mut batch = session.batch();
        let mut dest = [0u32; 1];
        assert_eq!(
            batch.queue_read32(2, &mut dest, None),
            Err(EcurError::InvalidAddr)
        );
    }

    #[test_log::test]
    fn filling_outbound_buffer_overflows_with_nospace_req() {
        let addr = respond_sequence(vec![version_reply()]);
        let mut session = Session::open(addr.ip(), addr.port(), 0).unwrap();
        let mut batch = session.batch();

        let mut last = Ok(());
        let mut count = 0u32;
        while last.is_ok() && count < 1000 {
            last = batch.queue_write32(count * 4, &[0xAAAA_AAAA]);
            count += 1;
        }

        assert_eq!(last, Err(EcurError::NospaceReq));
    }

    #[test_log::test]
    fn queueing_257_reads_overflows_reader_list() {
        let addr = respond_sequence(vec![version_reply()]);
        let mut session = Session::open(addr.ip(), addr.port(), 0).unwrap();
        let mut bufs = vec![[0u8; 1]; 257];
        let mut batch = session.batch();

        let mut iter = bufs.iter_mut();
        for buf in iter.by_ref().take(256) {
            batch.queue_read8(0, buf.as_mut_slice(), None).unwrap();
        }
        let last = iter.next().unwrap();
        assert_eq!(
            batch.queue_read8(0, last.as_mut_slice(), None),
            Err(EcurError::NospaceRep)
        );
    }
}
