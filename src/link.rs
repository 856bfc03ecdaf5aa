//! Byte-frame link abstraction.
//!
//! Everything above this module speaks [`Link`]: "send these bytes" and
//! "give me the next frame of about this size".  Two real implementations
//! exist ([`crate::serial::SerialLink`] for the radio modem and
//! [`crate::socket::UdpLink`] for development loopback) plus the in-process
//! links in [`crate::simulator`] used by tests.
//!
//! Methods take `&self` so one link can be shared (via `Arc`) between the
//! task that writes and the task that reads.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::config::TransportConfig;
use crate::serial::SerialLink;
use crate::socket::UdpLink;

/// Errors raised by a link.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Transient OS-level failure; the caller logs it and carries on.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Failure opening or configuring the serial device.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    /// The link is gone for good; the worker using it should stop.
    #[error("link closed")]
    Closed,
}

impl LinkError {
    /// `true` when retrying on the same link cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// A bidirectional, frame-oriented byte link.
pub trait Link: Send + Sync + 'static {
    /// Transmit one frame.
    fn send(&self, frame: &[u8]) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Receive the next frame.
    ///
    /// `expected_len` is the frame size the caller is waiting for.  Stream
    /// links read up to that many bytes and may return fewer on timeout;
    /// datagram links return whole datagrams whatever their size.  The
    /// caller checks the length.
    fn recv(&self, expected_len: usize) -> impl Future<Output = Result<Vec<u8>, LinkError>> + Send;
}

impl<L: Link> Link for Arc<L> {
    fn send(&self, frame: &[u8]) -> impl Future<Output = Result<(), LinkError>> + Send {
        (**self).send(frame)
    }

    fn recv(&self, expected_len: usize) -> impl Future<Output = Result<Vec<u8>, LinkError>> + Send {
        (**self).recv(expected_len)
    }
}

/// Whichever real transport was selected at startup.
#[derive(Debug)]
pub enum AnyLink {
    Serial(SerialLink),
    Udp(UdpLink),
}

impl Link for AnyLink {
    async fn send(&self, frame: &[u8]) -> Result<(), LinkError> {
        match self {
            Self::Serial(link) => link.send(frame).await,
            Self::Udp(link) => link.send(frame).await,
        }
    }

    async fn recv(&self, expected_len: usize) -> Result<Vec<u8>, LinkError> {
        match self {
            Self::Serial(link) => link.recv(expected_len).await,
            Self::Udp(link) => link.recv(expected_len).await,
        }
    }
}

/// Open the transport described by `config`.
///
/// This is the only place a link error propagates to the caller: failing to
/// open the device or bind the socket is a configuration problem.
pub async fn open_link(config: &TransportConfig) -> Result<AnyLink, LinkError> {
    match config {
        TransportConfig::Serial {
            device,
            baud_rate,
            byte_timeout,
        } => Ok(AnyLink::Serial(SerialLink::open(device, *baud_rate, *byte_timeout)?)),
        TransportConfig::Udp { bind, peer } => Ok(AnyLink::Udp(UdpLink::bind(*bind, *peer).await?)),
    }
}
