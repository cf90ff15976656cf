//! Connection Context and the per-worker slab that owns them.
//!
//! A [`Conn`] is built by the acceptor, moved through the worker's inbox and
//! from then on touched only by that worker. Its slab slot is addressed by a
//! token carrying the slot index and a generation, so readiness events that
//! arrive for a closed connection never reach the slot's next tenant.
//!
//! ```text
//!  token: [tag:8][generation:24][index:32]
//! ```

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

/// Tag for connection tokens in readiness-queue user data.
pub(crate) const TAG_CONN: u64 = 1 << 56;
/// Tag for the worker's inbox notifier.
pub(crate) const TAG_NOTIFY: u64 = 2 << 56;
pub(crate) const TAG_MASK: u64 = 0xFF << 56;

const GEN_SHIFT: u32 = 32;
const GEN_MASK: u64 = 0x00FF_FFFF;
const IDX_MASK: u64 = 0xFFFF_FFFF;

#[inline]
pub(crate) fn make_token(idx: usize, generation: u32) -> u64 {
    TAG_CONN | ((generation as u64 & GEN_MASK) << GEN_SHIFT) | (idx as u64 & IDX_MASK)
}

#[inline]
pub(crate) fn decode_token(token: u64) -> Option<(usize, u32)> {
    if token & TAG_MASK != TAG_CONN {
        return None;
    }
    let generation = ((token >> GEN_SHIFT) & GEN_MASK) as u32;
    Some(((token & IDX_MASK) as usize, generation))
}

/// Why a read drain stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadStatus {
    /// Socket drained; wait for the next edge.
    WouldBlock,
    /// Peer closed its side.
    Eof,
    /// Input buffer is full; consume before reading more.
    Full,
}

/// Why a flush stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flush {
    /// Output buffer is empty.
    Done,
    /// Socket send buffer is full; resume on write readiness.
    Partial,
}

/// Per-connection state: socket, input buffer with fill cursor, output
/// buffer with write cursor, and the parser's resume hint.
pub(crate) struct Conn {
    stream: TcpStream,
    peer: SocketAddr,
    input: Box<[u8]>,
    pub(crate) input_len: usize,
    /// Bytes of `input` already scanned for a head terminator.
    pub(crate) parse_hint: usize,
    pub(crate) output: Vec<u8>,
    output_pos: usize,
    /// Stop parsing; close once `output` is flushed.
    pub(crate) close_after_write: bool,
    /// Registered for write readiness as well as read.
    pub(crate) want_write: bool,
}

impl Conn {
    pub(crate) fn new(stream: TcpStream, peer: SocketAddr, input_size: usize) -> Self {
        Self {
            stream,
            peer,
            input: vec![0u8; input_size].into_boxed_slice(),
            input_len: 0,
            parse_hint: 0,
            output: Vec::with_capacity(input_size * 2),
            output_pos: 0,
            close_after_write: false,
            want_write: false,
        }
    }

    #[inline]
    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Buffered, not yet parsed input.
    #[inline]
    pub(crate) fn input(&self) -> &[u8] {
        &self.input[..self.input_len]
    }

    #[inline]
    pub(crate) fn input_full(&self) -> bool {
        self.input_len == self.input.len()
    }

    /// Split borrow for parse-and-render: buffered input and the output
    /// buffer at once.
    #[inline]
    pub(crate) fn io_buffers(&mut self) -> (&[u8], &mut Vec<u8>) {
        (&self.input[..self.input_len], &mut self.output)
    }

    /// Drop the first `n` buffered bytes, moving the rest to the front.
    pub(crate) fn consume(&mut self, n: usize) {
        let n = n.min(self.input_len);
        self.input.copy_within(n..self.input_len, 0);
        self.input_len -= n;
        self.parse_hint = self.parse_hint.saturating_sub(n);
    }

    pub(crate) fn discard_input(&mut self) {
        self.input_len = 0;
        self.parse_hint = 0;
    }

    /// Bytes written into `output` but not yet sent.
    #[inline]
    pub(crate) fn pending_output(&self) -> usize {
        self.output.len() - self.output_pos
    }

    /// Read until the socket would block, the peer closes, or the buffer
    /// fills. Returns the bytes added alongside the reason for stopping.
    pub(crate) fn read_available(&mut self) -> io::Result<(usize, ReadStatus)> {
        let mut total = 0;
        loop {
            if self.input_full() {
                return Ok((total, ReadStatus::Full));
            }
            match self.stream.read(&mut self.input[self.input_len..]) {
                Ok(0) => return Ok((total, ReadStatus::Eof)),
                Ok(n) => {
                    self.input_len += n;
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok((total, ReadStatus::WouldBlock))
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Write pending output until done or the socket would block.
    pub(crate) fn flush(&mut self) -> io::Result<Flush> {
        while self.output_pos < self.output.len() {
            match self.stream.write(&self.output[self.output_pos..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.output_pos += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flush::Partial),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        self.output.clear();
        self.output_pos = 0;
        Ok(Flush::Done)
    }
}

impl AsRawFd for Conn {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

struct Slot {
    generation: u32,
    conn: Option<Conn>,
}

/// Growable slab of connections with a free list and per-slot generations.
pub(crate) struct ConnSlab {
    slots: Vec<Slot>,
    free: Vec<usize>,
    active: usize,
}

impl ConnSlab {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            active: 0,
        }
    }

    /// Store `conn`, returning its token.
    pub(crate) fn insert(&mut self, conn: Conn) -> u64 {
        self.active += 1;
        if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx];
            slot.conn = Some(conn);
            return make_token(idx, slot.generation);
        }
        self.slots.push(Slot {
            generation: 0,
            conn: Some(conn),
        });
        make_token(self.slots.len() - 1, 0)
    }

    /// The live connection behind `token`, if the token is current.
    pub(crate) fn get_mut(&mut self, token: u64) -> Option<&mut Conn> {
        let (idx, generation) = decode_token(token)?;
        let slot = self.slots.get_mut(idx)?;
        if slot.generation != generation {
            return None;
        }
        slot.conn.as_mut()
    }

    /// Take the connection out and retire the token.
    pub(crate) fn remove(&mut self, token: u64) -> Option<Conn> {
        let (idx, generation) = decode_token(token)?;
        let slot = self.slots.get_mut(idx)?;
        if slot.generation != generation {
            return None;
        }
        let conn = slot.conn.take()?;
        slot.generation = (slot.generation + 1) & GEN_MASK as u32;
        self.free.push(idx);
        self.active -= 1;
        Some(conn)
    }

    pub(crate) fn tokens(&self) -> Vec<u64> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.conn.is_some())
            .map(|(i, s)| make_token(i, s.generation))
            .collect()
    }

    #[inline]
    pub(crate) fn active(&self) -> usize {
        self.active
    }
}
