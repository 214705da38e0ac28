//! Error codes surfaced by the `ecur` engine.

/// An error produced by the protocol codec or by a [`crate::Session`].
///
/// Each variant carries the numeric error code from the wire protocol's
/// original C API (see [`EcurError::code`]) so that callers that need the
/// original integer contract -- notably the CLI's process exit code -- can
/// still get at it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcurError {
    /// Burst count was not in `1..=256`.
    #[error("burst count not in [1, 256]")]
    InvalidCount,
    /// Word address did not fit in 20 bits, or was misaligned for the
    /// requested access width.
    #[error("address too large or misaligned for the requested width")]
    InvalidAddr,
    /// Encoding the request would overflow the outbound buffer.
    #[error("request would overflow the outbound buffer")]
    NospaceReq,
    /// The reply would overflow the inbound buffer, or the reader list is
    /// already full (256 entries).
    #[error("reply would overflow the inbound buffer, or the reader list is full")]
    NospaceRep,
    /// The reply was malformed: too short, the target's error bit was set,
    /// or there were more bytes than the queued reads expected.
    #[error("malformed reply (too short, target error bit set, or extra bytes)")]
    InvalidRep,
    /// A transport failure occurred, or no reply arrived after all retries.
    #[error("transport failure, or no reply received after retries")]
    Io,
    /// An internal invariant was breached; used when flushing a batch that
    /// was abandoned (dropped) without being executed.
    #[error("internal invariant breach (dangling batch flushed)")]
    Internal,
}

impl EcurError {
    /// The numeric error code from the original wire protocol's C API.
    pub fn code(self) -> i32 {
        match self {
            EcurError::InvalidCount => -1,
            EcurError::InvalidAddr => -2,
            EcurError::NospaceReq => -3,
            EcurError::NospaceRep => -4,
            EcurError::InvalidRep => -5,
            EcurError::Io => -6,
            EcurError::Internal => -7,
        }
    }
}
