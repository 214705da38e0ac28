//! Delivers one request datagram and obtains one reply, hiding transient UDP
//! loss behind bounded retries.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};

use crate::protocol::EcurError;

const POLL_TOKEN: Token = Token(0);
const RECV_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_ATTEMPTS: u32 = 3;

/// One connected UDP endpoint, with bounded send/retry/receive semantics.
///
/// `Transport` does not validate replies -- that is [`crate::Session`]'s job.
/// It guarantees only that it consumes exactly one datagram per
/// [`Transport::transfer`] call when one arrives in time.
pub(crate) struct Transport {
    socket: UdpSocket,
    poll: Poll,
    events: Events,
    recv_buf: Vec<u8>,
    verbosity: u8,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

impl Transport {
    pub(crate) fn connect(target: SocketAddr, recv_capacity: usize, verbosity: u8) -> io::Result<Self> {
        let local: SocketAddr = if target.is_ipv6() {
            "[::]:0".parse().unwrap()
        } else {
            "0.0.0.0:0".parse().unwrap()
        };

        let mut socket = UdpSocket::bind(local)?;
        socket.connect(target)?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, POLL_TOKEN, Interest::READABLE)?;

        Ok(Transport {
            socket,
            poll,
            events: Events::with_capacity(4),
            recv_buf: vec![0u8; recv_capacity],
            verbosity,
        })
    }

    pub(crate) fn set_verbosity(&mut self, verbosity: u8) {
        self.verbosity = verbosity;
    }

    /// Sends `request`, then waits up to [`RECV_TIMEOUT`] for a reply,
    /// retrying the send up to [`MAX_ATTEMPTS`] times total. Returns the
    /// received datagram's bytes, or [`EcurError::Io`] once all attempts are
    /// exhausted or an I/O call fails outright.
    pub(crate) fn transfer(&mut self, request: &[u8]) -> Result<&[u8], EcurError> {
        if self.verbosity > 0 {
            log::debug!("transport: sending {} byte request", request.len());
        }

        for attempt in 0..MAX_ATTEMPTS {
            self.socket.send(request).map_err(|err| {
                log::error!("transport: send failed: {err}");
                EcurError::Io
            })?;

            if self.verbosity > 1 {
                log::trace!("transport: attempt {attempt}, waiting up to {RECV_TIMEOUT:?}");
            }

            self.poll
                .poll(&mut self.events, Some(RECV_TIMEOUT))
                .map_err(|err| {
                    log::error!("transport: poll failed: {err}");
                    EcurError::Io
                })?;

            if self.events.iter().next().is_some() {
                let len = self.socket.recv(&mut self.recv_buf).map_err(|err| {
                    log::error!("transport: recv failed: {err}");
                    EcurError::Io
                })?;
                return Ok(&self.recv_buf[..len]);
            }
        }

        log::error!("transport: exhausted all {MAX_ATTEMPTS} attempts with no reply");
        Err(EcurError::Io)
    }
}
