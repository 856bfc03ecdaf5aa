//! `thermal-link` — thermal telemetry over a lossy half-duplex link.
//!
//! # Architecture
//!
//! ```text
//!     air unit                                           ground station
//!  ┌────────────────────┐                          ┌──────────────────────┐
//!  │  SenderPipeline    │     data frames (45 B)   │  ReceiverPipeline    │
//!  │  structure ▶ ...   │─────────────────────────▶│  decode ▶ classify   │
//!  │  ... ▶ dispatch    │                          │  ▶ sink ▶ ACK        │
//!  │  ack handler  ◀────│◀─────────────────────────│                      │
//!  └─────────┬──────────┘       ACKs (17 B)        └──────────┬───────────┘
//!            │                                                │
//!       ┌────▼─────┐        serial radio modem           ┌────▼─────┐
//!       │   Link   │◀ ─ ─ ─ ─ ─ or UDP loopback ─ ─ ─ ─ ▶│   Link   │
//!       └──────────┘                                     └──────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]      — wire format (encode / decode, CRC-32 trailer)
//! - [`session`]     — per-session sequence tracking and duplicate suppression
//! - [`pending`]     — registry of frames awaiting acknowledgment
//! - [`dispatch`]    — resend-or-send-new decision and the dispatch worker
//! - `ack`           — sender-side ACK reader
//! - [`sender`]      — air-unit pipeline stages and handle
//! - [`receiver`]    — ground-station pipeline and record sink
//! - [`link`]        — transport abstraction
//! - [`serial`]      — radio modem transport
//! - [`socket`]      — UDP loopback transport
//! - [`simulator`]   — in-memory links and fault injection for testing
//! - [`diagnostics`] — structured per-frame events
//! - [`config`]      — tunables and per-role configuration

mod ack;
pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod link;
pub mod packet;
pub mod pending;
pub mod receiver;
pub mod sender;
pub mod serial;
pub mod session;
pub mod simulator;
pub mod socket;

pub use config::{ProtocolConfig, ReceiverConfig, SenderConfig, TransportConfig};
pub use link::{open_link, AnyLink, Link, LinkError};
pub use packet::{CallSign, SessionId, TelemetryRecord};
pub use receiver::{ReceiverHandle, ReceiverPipeline, ReceiverStats, RecordSink, SinkError};
pub use sender::{PositionFix, SenderHandle, SenderPipeline, ThermalSample};
