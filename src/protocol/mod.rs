//! Bit-accurate encoding and decoding of the `ecur` wire protocol.
//!
//! ```text
//! request:   [hdr:2] [desc:4]{n_ops} [write_payload:variable]
//! reply:     [hdr:2] [read_payload:variable] [status:2]
//! ```
//!
//! All multi-byte integers are little-endian.

mod error;

pub use error::EcurError;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive as _;

/// Protocol version implemented by this library.
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the outbound and inbound buffers: the EoE datagram MTU (1472
/// bytes) minus Ethernet, IP and UDP headers (14 + 20 + 8).
pub const MTU_PAYLOAD: usize = 1472 - 14 - 20 - 8;

/// Size in bytes of the (identical) request/reply header.
pub const HEADER_SIZE: usize = 2;

/// Size in bytes of the reply's status trailer.
pub const STATUS_SIZE: usize = 2;

/// Maximum number of queued read operations (and therefore [`crate::Reader`]s)
/// per batch.
pub const MAX_READERS: usize = 256;

/// Largest word address representable in a 20-bit descriptor field.
pub const MAX_WORD_ADDR: u32 = (1 << 20) - 1;

const SEQ_MASK: u8 = 0x0f;
const STATUS_ERR_BIT: u16 = 0x8000;
const STATUS_COUNT_MASK: u16 = 0x07ff;

/// The two commands understood by the protocol.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Primitive)]
pub enum Command {
    /// Protocol-version handshake, issued once by [`crate::Session::open`].
    Version = 1,
    /// A batch of read/write descriptors.
    ReadWriteBatch = 2,
}

/// Selects which lane(s) of a target 32-bit word an operation touches.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Primitive)]
pub enum LaneCode {
    /// Byte 0 (bits 7..0).
    B0 = 0,
    /// Byte 1 (bits 15..8).
    B1 = 1,
    /// Byte 2 (bits 23..16).
    B2 = 2,
    /// Byte 3 (bits 31..24).
    B3 = 3,
    /// Lower half-word (bits 15..0).
    W0 = 4,
    /// Upper half-word (bits 31..16).
    W1 = 5,
    /// Full double-word.
    Dw = 6,
}

impl LaneCode {
    /// Number of wire bytes consumed per element: byte lanes are padded to
    /// two bytes (see module docs on [`pack_write_payload`]); word lanes are
    /// two bytes; the double-word lane is four bytes.
    pub fn element_size(self) -> usize {
        match self {
            LaneCode::Dw => 4,
            _ => 2,
        }
    }

    /// Selects the byte lane for an 8-bit access at `addr`.
    pub(crate) fn for_width8(addr: u32) -> LaneCode {
        match addr & 3 {
            0 => LaneCode::B0,
            1 => LaneCode::B1,
            2 => LaneCode::B2,
            _ => LaneCode::B3,
        }
    }

    /// Selects the half-word lane for a 16-bit access at `addr`, rejecting
    /// odd addresses.
    pub(crate) fn for_width16(addr: u32) -> Result<LaneCode, EcurError> {
        match addr & 3 {
            0 => Ok(LaneCode::W0),
            2 => Ok(LaneCode::W1),
            _ => Err(EcurError::InvalidAddr),
        }
    }

    /// Selects the double-word lane for a 32-bit access at `addr`, rejecting
    /// non-word-aligned addresses.
    pub(crate) fn for_width32(addr: u32) -> Result<LaneCode, EcurError> {
        if addr & 3 != 0 {
            Err(EcurError::InvalidAddr)
        } else {
            Ok(LaneCode::Dw)
        }
    }
}

/// The decoded reply status trailer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Status {
    /// Set when the target reports an error; if so, the payload must be
    /// discarded.
    pub error: bool,
    /// Number of elements the target successfully processed in the batch.
    pub count: usize,
}

/// Writes the 2-byte request/reply header: `(command << 4) | version`
/// followed by `sequence & 0x0f`.
pub(crate) fn write_header(out: &mut Vec<u8>, command: Command, seq: u8) {
    out.push(((command as u8) << 4) | PROTOCOL_VERSION);
    out.push(seq & SEQ_MASK);
}

/// Decodes a 2-byte header, returning `(command, sequence)`.
pub(crate) fn read_header(bytes: &[u8]) -> Result<(u8, u8), EcurError> {
    if bytes.len() < HEADER_SIZE {
        return Err(EcurError::InvalidRep);
    }
    let version = bytes[0] & 0x0f;
    let command = (bytes[0] >> 4) & 0x0f;
    if version != PROTOCOL_VERSION {
        return Err(EcurError::InvalidRep);
    }
    let seq = bytes[1] & SEQ_MASK;
    Ok((command, seq))
}

/// Decodes the 2-byte little-endian status trailer.
pub(crate) fn read_status(bytes: &[u8]) -> Status {
    let raw = u16::from_le_bytes([bytes[0], bytes[1]]);
    Status {
        error: raw & STATUS_ERR_BIT != 0,
        count: (raw & STATUS_COUNT_MASK) as usize,
    }
}

/// Packs the 32-bit little-endian operation descriptor described in the
/// protocol's data model: `bit 31` read/write, `bits 30..28` lane code,
/// `bits 27..20` burst count minus one, `bits 19..0` word address.
///
/// Validates burst count (`1..=256`) and word address (fits in 20 bits)
/// before packing.
pub(crate) fn encode_descriptor(
    read: bool,
    lane: LaneCode,
    burst: u32,
    word_addr: u32,
) -> Result<u32, EcurError> {
    if !(1..=256).contains(&burst) {
        return Err(EcurError::InvalidCount);
    }
    if word_addr > MAX_WORD_ADDR {
        return Err(EcurError::InvalidAddr);
    }

    let mut word = ((lane as u32) << 28) | ((burst - 1) << 20) | word_addr;
    if read {
        word |= 1 << 31;
    }
    Ok(word)
}

/// Unpacks a 32-bit descriptor word into `(read, lane, burst, word_addr)`.
/// Used by tests and by any consumer that needs to inspect an encoded batch.
#[cfg_attr(not(test), allow(dead_code))]
pub(crate) fn decode_descriptor(word: u32) -> (bool, LaneCode, u32, u32) {
    let read = word & (1 << 31) != 0;
    let lane = LaneCode::from_u8(((word >> 28) & 0x7) as u8).expect("3-bit field");
    let burst = ((word >> 20) & 0xff) + 1;
    let word_addr = word & MAX_WORD_ADDR;
    (read, lane, burst, word_addr)
}

/// A typed write payload, matched against the [`LaneCode`] it targets by
/// [`pack_write_payload`].
#[derive(Debug, Copy, Clone)]
pub(crate) enum WritePayload<'a> {
    D8(&'a [u8]),
    D16(&'a [u16]),
    D32(&'a [u32]),
}

/// Appends `burst` elements of `lane`'s width from `data` (little-endian,
/// byte lanes padded to two bytes per element) into `out`.
///
/// The byte-lane padding is a wire-level requirement of the target's framing,
/// not an encoding convenience: each 8-bit element is always followed by one
/// padding byte on the wire, for byte lanes exactly as it is for half-word
/// lanes.
pub(crate) fn pack_write_payload(out: &mut Vec<u8>, lane: LaneCode, data: WritePayload<'_>) {
    match (lane, data) {
        (LaneCode::B0 | LaneCode::B1 | LaneCode::B2 | LaneCode::B3, WritePayload::D8(bytes)) => {
            for &b in bytes {
                out.push(b);
                out.push(0);
            }
        }
        (LaneCode::W0 | LaneCode::W1, WritePayload::D16(words)) => {
            for &w in words {
                out.write_u16::<LittleEndian>(w).expect("Vec write");
            }
        }
        (LaneCode::Dw, WritePayload::D32(dwords)) => {
            for &d in dwords {
                out.write_u32::<LittleEndian>(d).expect("Vec write");
            }
        }
        _ => unreachable!("lane/payload width mismatch is a caller bug"),
    }
}

/// Decodes `nelems` little-endian byte-lane elements (data in the low byte,
/// padding byte discarded) from `payload` into `dest`. Returns the number of
/// bytes consumed.
pub(crate) fn unpack_d8(payload: &[u8], dest: &mut [u8], nelems: usize) -> usize {
    for i in 0..nelems {
        dest[i] = payload[i * 2];
    }
    nelems * 2
}

/// Decodes `nelems` little-endian 16-bit elements from `payload` into `dest`.
/// Returns the number of bytes consumed.
pub(crate) fn unpack_d16(payload: &[u8], dest: &mut [u16], nelems: usize) -> usize {
    let mut cursor = std::io::Cursor::new(payload);
    for slot in dest.iter_mut().take(nelems) {
        *slot = cursor
            .read_u16::<LittleEndian>()
            .expect("bounds checked by caller");
    }
    nelems * 2
}

/// Decodes `nelems` little-endian 32-bit elements from `payload` into `dest`.
/// Returns the number of bytes consumed.
pub(crate) fn unpack_d32(payload: &[u8], dest: &mut [u32], nelems: usize) -> usize {
    let mut cursor = std::io::Cursor::new(payload);
    for slot in dest.iter_mut().take(nelems) {
        *slot = cursor
            .read_u32::<LittleEndian>()
            .expect("bounds checked by caller");
    }
    nelems * 4
}
