//! Serial radio-modem link.
//!
//! A read and a write must never be issued concurrently on the same port
//! handle.  [`SerialLink`] therefore opens the device once, clones the handle
//! into an independent reader and writer, serialises each behind its own
//! mutex, and performs every blocking operation on tokio's blocking pool.
//! Airtime arbitration on the half-duplex radio is left to the modem.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::link::{Link, LinkError};

/// Radio modem attached to a serial device.
pub struct SerialLink {
    device: String,
    reader: Arc<Mutex<Box<dyn SerialPort>>>,
    writer: Arc<Mutex<Box<dyn SerialPort>>>,
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink").field("device", &self.device).finish()
    }
}

impl SerialLink {
    /// Open `device` at `baud_rate`, 8N1 with hardware flow control.
    ///
    /// `byte_timeout` bounds how long one read waits for more bytes.
    pub fn open(device: &str, baud_rate: u32, byte_timeout: Duration) -> Result<Self, LinkError> {
        let port = serialport::new(device, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::Hardware)
            .timeout(byte_timeout)
            .open()?;

        let writer = port.try_clone()?;

        log::info!("[serial] opened {device} at {baud_rate} baud");

        Ok(Self {
            device: device.to_string(),
            reader: Arc::new(Mutex::new(port)),
            writer: Arc::new(Mutex::new(writer)),
        })
    }
}

impl Link for SerialLink {
    async fn send(&self, frame: &[u8]) -> Result<(), LinkError> {
        let port = Arc::clone(&self.writer);
        let data = frame.to_vec();
        tokio::task::spawn_blocking(move || -> Result<(), LinkError> {
            let mut port = port.lock().map_err(|_| LinkError::Closed)?;
            port.write_all(&data)?;
            port.flush()?;
            Ok(())
        })
        .await
        .map_err(|_| LinkError::Closed)?
    }

    /// Read until `expected_len` bytes arrived or the port times out.
    ///
    /// A timeout with nothing read is reported as an empty frame so the
    /// caller simply loops; a timeout mid-frame returns the partial bytes.
    async fn recv(&self, expected_len: usize) -> Result<Vec<u8>, LinkError> {
        let port = Arc::clone(&self.reader);
        tokio::task::spawn_blocking(move || -> Result<Vec<u8>, LinkError> {
            let mut port = port.lock().map_err(|_| LinkError::Closed)?;
            let mut buf = vec![0u8; expected_len];
            let mut filled = 0;
            while filled < expected_len {
                match port.read(&mut buf[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                        return Err(LinkError::Closed)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            buf.truncate(filled);
            Ok(buf)
        })
        .await
        .map_err(|_| LinkError::Closed)?
    }
}
