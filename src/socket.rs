//! UDP loopback link used in place of the radio during development.
//!
//! [`UdpLink`] is a thin wrapper around `tokio::net::UdpSocket` bound to a
//! fixed local address and sending to a fixed peer.  All protocol logic
//! lives elsewhere; this module owns only byte I/O.

use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::link::{Link, LinkError};

/// Largest datagram accepted (theoretical limit; frames are far smaller).
const MAX_DATAGRAM: usize = 65_535;

/// A datagram link to one fixed peer.
///
/// All methods are `&self` so the link can be shared across tasks.
#[derive(Debug)]
pub struct UdpLink {
    /// Address this socket is bound to (filled in after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    peer: SocketAddr,
    inner: UdpSocket,
}

impl UdpLink {
    /// Bind to `local_addr` and address every send to `peer`.
    ///
    /// Passing `127.0.0.1:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr, peer: SocketAddr) -> Result<Self, LinkError> {
        let inner = UdpSocket::bind(local_addr).await?;
        Ok(Self::from_socket(inner, peer)?)
    }

    /// Wrap an already-bound socket.
    pub fn from_socket(inner: UdpSocket, peer: SocketAddr) -> std::io::Result<Self> {
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            peer,
            inner,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Link for UdpLink {
    async fn send(&self, frame: &[u8]) -> Result<(), LinkError> {
        self.inner.send_to(frame, self.peer).await?;
        Ok(())
    }

    /// Receive the next datagram from any source.
    ///
    /// The whole datagram is returned regardless of `expected_len`; a short
    /// or long datagram is the caller's `IncompleteFrame`.
    async fn recv(&self, _expected_len: usize) -> Result<Vec<u8>, LinkError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        if addr != self.peer {
            log::trace!("[udp] datagram from unexpected {addr} ({n} bytes)");
        }
        buf.truncate(n);
        Ok(buf)
    }
}
