//! Tunable protocol parameters and per-role configuration.
//!
//! Every struct here has a [`Default`] that matches the values flown on the
//! airframe; the binary overrides individual fields from CLI flags.  Nothing
//! in this module performs I/O.

use std::net::SocketAddr;
use std::time::Duration;

use crate::packet::{CallSign, SessionId, ACK_LEN, FRAME_LEN};

/// Largest sequence id before the packetizer wraps back to 1 (2^31 − 1).
pub const MAX_SEQUENCE_ID: u32 = 2_147_483_647;

/// Distance from either end of the id space inside which a low id following
/// a high id is read as a wraparound rather than a stale packet.
pub const WRAP_THRESHOLD: u32 = 200;

/// How long a transmitted frame may wait for its ACK before it is eligible
/// for resending.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Period of the dispatch worker's tick.
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_millis(20);

/// Capacity of every hand-off queue between pipeline stages.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Sequence ids remembered per session for duplicate suppression.
pub const DEFAULT_DEDUPE_CAPACITY: usize = 65_536;

/// Serial modem line rate; both transceivers must agree.
pub const DEFAULT_BAUD_RATE: u32 = 57_600;

/// Read timeout for the serial modem.
pub const DEFAULT_BYTE_TIMEOUT: Duration = Duration::from_secs(10);

/// UDP endpoint of the air unit in development builds.
pub const AIR_UDP_ADDR: &str = "127.0.0.1:5004";

/// UDP endpoint of the ground station in development builds.
pub const GROUND_UDP_ADDR: &str = "127.0.0.1:5005";

/// Position reported until the first real fix arrives.
pub const FALLBACK_POSITION: (f32, f32) = (39.538_96, -119.811_504);

// ---------------------------------------------------------------------------
// ProtocolConfig
// ---------------------------------------------------------------------------

/// Parameters both ends of the link must agree on.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Deadline offset applied to every transmitted data frame.
    pub ack_timeout: Duration,
    /// Period of the dispatch tick.
    pub dispatch_interval: Duration,
    /// See [`WRAP_THRESHOLD`].
    pub wrap_threshold: u32,
    /// See [`MAX_SEQUENCE_ID`].
    pub max_sequence_id: u32,
    /// Bound of each inter-stage queue.
    pub queue_capacity: usize,
    /// Per-session memory of already-forwarded ids.
    pub dedupe_capacity: usize,
}

impl ProtocolConfig {
    /// Encoded length of a data frame; fixed by the wire layout.
    pub const fn frame_len(&self) -> usize {
        FRAME_LEN
    }

    /// Encoded length of an acknowledgment frame.
    pub const fn ack_len(&self) -> usize {
        ACK_LEN
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
            wrap_threshold: WRAP_THRESHOLD,
            max_sequence_id: MAX_SEQUENCE_ID,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            dedupe_capacity: DEFAULT_DEDUPE_CAPACITY,
        }
    }
}

// ---------------------------------------------------------------------------
// Role configs
// ---------------------------------------------------------------------------

/// Air-unit side configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Flight identifier stamped on every frame.
    pub session_id: SessionId,
    /// `(latitude, longitude)` used before any position fix is known.
    pub fallback_position: (f32, f32),
    /// Seed for the dispatch worker's resend draw; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
    pub protocol: ProtocolConfig,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            session_id: SessionId::generate(),
            fallback_position: FALLBACK_POSITION,
            rng_seed: None,
            protocol: ProtocolConfig::default(),
        }
    }
}

/// Ground-station side configuration.
#[derive(Debug, Clone, Default)]
pub struct ReceiverConfig {
    /// Origin id written into every ACK.
    pub call_sign: CallSign,
    pub protocol: ProtocolConfig,
}

// ---------------------------------------------------------------------------
// TransportConfig
// ---------------------------------------------------------------------------

/// Which physical link to open at startup.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    /// Point-to-point radio modem on a serial device.
    Serial {
        device: String,
        baud_rate: u32,
        byte_timeout: Duration,
    },
    /// Loopback UDP pair standing in for the radio.
    Udp { bind: SocketAddr, peer: SocketAddr },
}

impl TransportConfig {
    /// Serial modem at the default line rate and timeout.
    pub fn serial(device: impl Into<String>) -> Self {
        Self::Serial {
            device: device.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            byte_timeout: DEFAULT_BYTE_TIMEOUT,
        }
    }

    /// Short human-readable label used in logs and diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Serial { .. } => "RF",
            Self::Udp { .. } => "UDP",
        }
    }
}
