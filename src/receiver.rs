//! Ground-station receiver pipeline.
//!
//! A single task owns the [`SessionTracker`] and handles each inbound frame
//! to completion before reading the next:
//!
//! ```text
//!  Link::recv(FRAME_LEN)
//!        │
//!        ▼
//!   length ok? ──no──▶ drop (incomplete)
//!        │
//!     decode ──────────▶ drop (unsupported version)
//!        │
//!     CRC ok? ──no───▶ drop, no ACK (sender will time out)
//!        │
//!     classify ── New / LateUnseen ──▶ sink.store(record)
//!        │     └─ Duplicate ─────────▶ count only
//!        ▼
//!   Link::send(ACK)   (always, duplicates included)
//! ```
//!
//! Duplicates are still acknowledged: the sender cannot otherwise tell
//! whether its earlier ACK was lost.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ReceiverConfig;
use crate::diagnostics::{Diagnostics, FrameKind, LinkEvent, Role};
use crate::link::{Link, LinkError};
use crate::packet::{decode, encode_ack, CallSign, CodecError, TelemetryRecord, FRAME_LEN};
use crate::session::{Classification, SessionTracker};

// ---------------------------------------------------------------------------
// Downstream sink
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink closed")]
    Closed,
    #[error("storage failed: {0}")]
    Storage(String),
}

/// Where accepted records go.  Only validated records are ever offered.
pub trait RecordSink: Send + 'static {
    fn store(
        &mut self,
        record: TelemetryRecord,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}

impl RecordSink for mpsc::Sender<TelemetryRecord> {
    async fn store(&mut self, record: TelemetryRecord) -> Result<(), SinkError> {
        self.send(record).await.map_err(|_| SinkError::Closed)
    }
}

// ---------------------------------------------------------------------------
// Per-frame outcome
// ---------------------------------------------------------------------------

/// Why an inbound frame was discarded without an ACK.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameFault {
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Receiver-side counters, published after every frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Records handed to the sink (new and late).
    pub forwarded: u64,
    /// Of `forwarded`, those that arrived out of order.
    pub late: u64,
    pub duplicates: u64,
    /// Frames dropped for a bad CRC.
    pub corrupted: u64,
    /// Reads of the wrong length.
    pub incomplete: u64,
    /// Verified frames with an unsupported layout.
    pub rejected: u64,
    pub acks_sent: u64,
    pub sink_failures: u64,
    pub transport_errors: u64,
}

// ---------------------------------------------------------------------------
// ReceiverWorker
// ---------------------------------------------------------------------------

struct ReceiverWorker<L, K> {
    link: Arc<L>,
    sink: K,
    tracker: SessionTracker,
    call_sign: CallSign,
    stats: watch::Sender<ReceiverStats>,
    diagnostics: Diagnostics,
}

impl<L: Link, K: RecordSink> ReceiverWorker<L, K> {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                read = self.link.recv(FRAME_LEN) => read,
            };
            let result = match read {
                // Serial read timed out with nothing on the air.
                Ok(bytes) if bytes.is_empty() => continue,
                Ok(bytes) => self.handle_frame(&bytes).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                self.stats.send_modify(|s| s.transport_errors += 1);
                if e.is_fatal() {
                    log::error!("[receiver] link closed, stopping: {e}");
                    break;
                }
                log::warn!("[receiver] link error: {e}");
            }
        }
        log::debug!("[receiver] stopped");
    }

    /// Process one read.  Per-frame faults are handled here; only link
    /// errors from sending the ACK are returned.
    async fn handle_frame(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let record = match self.validate(bytes) {
            Ok(record) => record,
            Err(fault) => {
                self.note_fault(&fault, bytes.len());
                return Ok(());
            }
        };

        let seq = record.sequence_id;
        let class = self.tracker.classify(record.session_id, seq);
        let copies = self.tracker.times_received(&record.session_id, seq);
        log::debug!(
            "[receiver] ← DATA session={} seq={seq} {class:?}",
            record.session_id
        );
        self.diagnostics.report(
            LinkEvent::new(Role::Receive, FrameKind::Data)
                .session(record.session_id)
                .sequence(seq)
                .attempts(copies),
        );

        match class {
            Classification::New => self.stats.send_modify(|s| s.forwarded += 1),
            Classification::LateUnseen => self.stats.send_modify(|s| {
                s.forwarded += 1;
                s.late += 1;
            }),
            Classification::Duplicate => self.stats.send_modify(|s| s.duplicates += 1),
        }

        if class.should_forward() {
            if let Err(e) = self.sink.store(record).await {
                log::warn!("[receiver] sink rejected seq={seq}: {e}");
                self.stats.send_modify(|s| s.sink_failures += 1);
            }
        }

        let ack = encode_ack(seq, &self.call_sign);
        self.link.send(ack.as_bytes()).await?;
        self.stats.send_modify(|s| s.acks_sent += 1);
        self.diagnostics.report(
            LinkEvent::new(Role::Send, FrameKind::Ack)
                .session(record.session_id)
                .sequence(seq)
                .attempts(copies),
        );
        Ok(())
    }

    fn validate(&self, bytes: &[u8]) -> Result<TelemetryRecord, FrameFault> {
        let checked = decode(bytes)?;
        if checked.crc_ok {
            Ok(checked.value)
        } else {
            Err(FrameFault::ChecksumMismatch)
        }
    }

    fn note_fault(&self, fault: &FrameFault, len: usize) {
        log::debug!("[receiver] dropped {len} byte frame: {fault}");
        match fault {
            FrameFault::ChecksumMismatch => {
                self.stats.send_modify(|s| s.corrupted += 1);
                self.diagnostics
                    .report(LinkEvent::new(Role::Receive, FrameKind::Data).corrupted(true));
            }
            FrameFault::Codec(CodecError::IncompleteFrame { .. }) => {
                self.stats.send_modify(|s| s.incomplete += 1)
            }
            FrameFault::Codec(_) => self.stats.send_modify(|s| s.rejected += 1),
        }
    }
}

// ---------------------------------------------------------------------------
// ReceiverPipeline
// ---------------------------------------------------------------------------

/// Entry point for starting the receiver side.
pub struct ReceiverPipeline;

impl ReceiverPipeline {
    /// Spawn the receiver task on the current runtime.
    pub fn spawn<L: Link, K: RecordSink>(
        config: ReceiverConfig,
        link: Arc<L>,
        sink: K,
        diagnostics: Diagnostics,
    ) -> ReceiverHandle {
        let (stats_tx, stats_rx) = watch::channel(ReceiverStats::default());
        let cancel = CancellationToken::new();

        log::info!("[receiver] listening as {}", config.call_sign);

        let worker = ReceiverWorker {
            link,
            sink,
            tracker: SessionTracker::new(&config.protocol),
            call_sign: config.call_sign,
            stats: stats_tx,
            diagnostics,
        };
        let task = tokio::spawn(worker.run(cancel.clone()));

        ReceiverHandle {
            stats: stats_rx,
            cancel,
            task,
        }
    }
}

/// Control surface of a running receiver.
pub struct ReceiverHandle {
    stats: watch::Receiver<ReceiverStats>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ReceiverHandle {
    pub fn stats(&self) -> watch::Receiver<ReceiverStats> {
        self.stats.clone()
    }

    /// Stop the receiver and wait for it.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            log::error!("[receiver] task failed: {e}");
        }
        log::info!("[receiver] stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;
    use crate::packet::{decode_ack, encode, SessionId};
    use crate::simulator::MemoryLink;

    fn record(seq: u32) -> TelemetryRecord {
        TelemetryRecord {
            sequence_id: seq,
            session_id: SessionId::new("S1"),
            latitude: 39.5,
            longitude: -119.8,
            altitude: 300,
            high_temp: 55,
            low_temp: 12,
            capture_time: 1_700_000_000_000_000_000,
        }
    }

    struct Harness {
        worker: ReceiverWorker<MemoryLink, mpsc::Sender<TelemetryRecord>>,
        air: MemoryLink,
        records: mpsc::Receiver<TelemetryRecord>,
        stats: watch::Receiver<ReceiverStats>,
    }

    fn harness() -> Harness {
        let (air, ground) = MemoryLink::pair();
        let (sink, records) = mpsc::channel(16);
        let (stats_tx, stats) = watch::channel(ReceiverStats::default());
        let worker = ReceiverWorker {
            link: Arc::new(ground),
            sink,
            tracker: SessionTracker::new(&ProtocolConfig::default()),
            call_sign: CallSign::default(),
            stats: stats_tx,
            diagnostics: Diagnostics::disabled(),
        };
        Harness {
            worker,
            air,
            records,
            stats,
        }
    }

    #[tokio::test]
    async fn valid_frame_is_forwarded_and_acked() {
        let mut h = harness();
        h.worker.handle_frame(encode(&record(1)).as_bytes()).await.unwrap();

        assert_eq!(h.records.recv().await.unwrap(), record(1));
        let ack = decode_ack(&h.air.recv(17).await.unwrap()).unwrap();
        assert!(ack.crc_ok);
        assert_eq!(ack.value.sequence_id, 1);
        assert_eq!(ack.value.origin, CallSign::default());
        assert_eq!(h.stats.borrow().forwarded, 1);
        assert_eq!(h.stats.borrow().acks_sent, 1);
    }

    #[tokio::test]
    async fn duplicate_is_acked_but_not_forwarded() {
        let mut h = harness();
        let frame = encode(&record(4));
        h.worker.handle_frame(frame.as_bytes()).await.unwrap();
        h.worker.handle_frame(frame.as_bytes()).await.unwrap();

        assert_eq!(h.records.recv().await.unwrap().sequence_id, 4);
        assert!(h.records.try_recv().is_err());
        assert_eq!(h.air.recv(17).await.unwrap().len(), 17);
        assert_eq!(h.air.recv(17).await.unwrap().len(), 17);
        let stats = h.stats.borrow().clone();
        assert_eq!((stats.forwarded, stats.duplicates, stats.acks_sent), (1, 1, 2));
    }

    #[tokio::test]
    async fn corrupted_frame_gets_no_ack() {
        let mut h = harness();
        let mut bytes = encode(&record(2)).as_bytes().to_vec();
        bytes[20] ^= 0x40;
        h.worker.handle_frame(&bytes).await.unwrap();

        assert!(h.records.try_recv().is_err());
        assert_eq!(h.stats.borrow().corrupted, 1);
        assert_eq!(h.stats.borrow().acks_sent, 0);
        assert_eq!(h.worker.tracker.highest_seen(&SessionId::new("S1")), None);
    }

    #[tokio::test]
    async fn short_read_counts_as_incomplete() {
        let mut h = harness();
        h.worker.handle_frame(&[1, 2, 3]).await.unwrap();
        assert_eq!(h.stats.borrow().incomplete, 1);
        assert_eq!(h.stats.borrow().acks_sent, 0);
    }

    #[tokio::test]
    async fn closed_sink_does_not_stop_acks() {
        let mut h = harness();
        drop(h.records);
        h.worker.handle_frame(encode(&record(9)).as_bytes()).await.unwrap();
        assert_eq!(h.stats.borrow().sink_failures, 1);
        assert_eq!(h.stats.borrow().acks_sent, 1);
    }

    #[test]
    fn fault_from_codec_error() {
        let fault = FrameFault::from(CodecError::UnsupportedVersion(4));
        assert_eq!(fault.to_string(), "unsupported layout version 4");
    }
}
