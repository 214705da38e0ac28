//! A client library for `ecur`, a compact binary protocol for remote
//! register access over UDP, originally designed to be carried inside an
//! EtherCAT "Ethernet-over-EtherCAT" payload.
//!
//! The target exposes a 32-bit-word address space with byte-lane selection.
//! [`Session`] batches reads and writes against that space and exchanges
//! exactly one UDP datagram per [`Batch::execute`] call.

#![warn(
    anonymous_parameters,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_extern_crates,
    unused_qualifications
)]

pub mod protocol;
mod session;
mod transport;

pub use session::{Batch, Reader, ReaderTarget, Session};

/// Default UDP port for the `ecur` protocol.
pub const DEFAULT_PORT: u16 = 4096;
