//! Air-unit sender pipeline.
//!
//! # Architecture
//!
//! ```text
//!  ingest() ──broadcast──▶ structuring ──mpsc──▶ processing ──mpsc──▶ packetization
//!  (drop-oldest)              ▲                                           │
//!                             │ watch (last fix wins)                     │ mpsc<Frame>
//!  update_position() ─────────┘                                           ▼
//!                                                   ┌──────────── dispatch ◀── ticker
//!                                                   │   (owns PendingRegistry)
//!                                   Link::send ◀────┤             ▲
//!                                                   │             │ Inbound
//!                                   Link::recv ─────┴──▶ ack handler
//! ```
//!
//! Every stage is its own tokio task.  Queues between stages are bounded, so
//! a stalled link backs pressure up to the intake, where the oldest samples
//! are discarded instead of blocking the producer.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ack;
use crate::config::SenderConfig;
use crate::diagnostics::Diagnostics;
use crate::dispatch::{DispatchCommand, DispatchWorker, Dispatcher, SenderStats};
use crate::link::Link;
use crate::packet::{encode, Frame, SessionId, TelemetryRecord};

// ---------------------------------------------------------------------------
// Values flowing through the pipeline
// ---------------------------------------------------------------------------

/// Per-frame temperature extremes from the thermal camera, °C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThermalSample {
    pub high_temp: i16,
    pub low_temp: i16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub latitude: f32,
    pub longitude: f32,
}

impl From<(f32, f32)> for PositionFix {
    fn from((latitude, longitude): (f32, f32)) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// What a producer hands to [`SenderHandle::ingest`].
#[derive(Debug, Clone, Copy)]
struct Intake {
    sample: ThermalSample,
    fix: Option<PositionFix>,
    altitude: u32,
}

/// A structured, not yet sequenced observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub latitude: f32,
    pub longitude: f32,
    pub altitude: u32,
    pub high_temp: i16,
    pub low_temp: i16,
    pub capture_time: i64,
}

/// Nanoseconds since the Unix epoch.
fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Attach position, altitude and capture time to a raw sample.
pub fn structure(
    sample: ThermalSample,
    position: PositionFix,
    altitude: u32,
    capture_time: i64,
) -> Observation {
    Observation {
        latitude: position.latitude,
        longitude: position.longitude,
        altitude,
        high_temp: sample.high_temp,
        low_temp: sample.low_temp,
        capture_time,
    }
}

/// Normalisation hook between structuring and packetization.
pub fn process(observation: Observation) -> Observation {
    observation
}

// ---------------------------------------------------------------------------
// Packetizer
// ---------------------------------------------------------------------------

/// Assigns sequence ids and encodes frames for one session.
///
/// Ids start at 1 and wrap from `max_id` back to 1.
#[derive(Debug)]
pub struct Packetizer {
    session_id: SessionId,
    next_id: u32,
    max_id: u32,
}

impl Packetizer {
    pub fn new(session_id: SessionId, max_id: u32) -> Self {
        Self {
            session_id,
            next_id: 1,
            max_id: max_id.max(1),
        }
    }

    fn next_sequence_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = if id >= self.max_id { 1 } else { id + 1 };
        id
    }

    pub fn packetize(&mut self, observation: Observation) -> Frame {
        let record = TelemetryRecord {
            sequence_id: self.next_sequence_id(),
            session_id: self.session_id,
            latitude: observation.latitude,
            longitude: observation.longitude,
            altitude: observation.altitude,
            high_temp: observation.high_temp,
            low_temp: observation.low_temp,
            capture_time: observation.capture_time,
        };
        encode(&record)
    }
}

// ---------------------------------------------------------------------------
// SenderPipeline
// ---------------------------------------------------------------------------

/// Entry point for starting the sender side.
pub struct SenderPipeline;

impl SenderPipeline {
    /// Spawn every sender task on the current runtime.
    pub fn spawn<L: Link>(
        config: SenderConfig,
        link: Arc<L>,
        diagnostics: Diagnostics,
    ) -> SenderHandle {
        let capacity = config.protocol.queue_capacity.max(1);
        let cancel = CancellationToken::new();

        let (intake_tx, intake_rx) = broadcast::channel(capacity);
        let (position_tx, position_rx) = watch::channel(None);
        let (observed_tx, observed_rx) = mpsc::channel(capacity);
        let (processed_tx, processed_rx) = mpsc::channel(capacity);
        let (frames_tx, frames_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let (stats_tx, stats_rx) = watch::channel(SenderStats::default());
        let stats_tx = Arc::new(stats_tx);

        log::info!(
            "[sender] session {} starting (ack timeout {:?}, tick {:?})",
            config.session_id,
            config.protocol.ack_timeout,
            config.protocol.dispatch_interval
        );

        let fallback = PositionFix::from(config.fallback_position);
        let packetizer = Packetizer::new(config.session_id, config.protocol.max_sequence_id);
        let worker = DispatchWorker {
            dispatcher: Dispatcher::new(config.protocol.ack_timeout, config.rng_seed),
            link: Arc::clone(&link),
            session_id: config.session_id,
            interval: config.protocol.dispatch_interval,
            frames: frames_rx,
            inbound: inbound_rx,
            commands: commands_rx,
            stats: Arc::clone(&stats_tx),
            diagnostics: diagnostics.clone(),
            cancel: cancel.clone(),
        };

        let tasks = vec![
            tokio::spawn(run_structuring(
                intake_rx,
                position_rx,
                fallback,
                observed_tx,
                stats_tx,
                cancel.clone(),
            )),
            tokio::spawn(run_processing(observed_rx, processed_tx, cancel.clone())),
            tokio::spawn(run_packetization(packetizer, processed_rx, frames_tx, cancel.clone())),
            tokio::spawn(worker.run()),
            tokio::spawn(ack::run(link, inbound_tx, diagnostics, cancel.clone())),
        ];

        SenderHandle {
            intake: intake_tx,
            position: position_tx,
            commands: commands_tx,
            stats: stats_rx,
            cancel,
            tasks,
        }
    }
}

/// Control surface of a running sender pipeline.
pub struct SenderHandle {
    intake: broadcast::Sender<Intake>,
    position: watch::Sender<Option<PositionFix>>,
    commands: mpsc::Sender<DispatchCommand>,
    stats: watch::Receiver<SenderStats>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SenderHandle {
    /// Offer one sample to the pipeline.  Never blocks; on overflow the
    /// oldest queued sample is discarded.
    pub fn ingest(&self, sample: ThermalSample, fix: Option<PositionFix>, altitude: u32) {
        let intake = Intake {
            sample,
            fix,
            altitude,
        };
        if self.intake.send(intake).is_err() {
            log::debug!("[sender] sample discarded, pipeline stopped");
        }
    }

    /// Record the latest position fix; it applies to every later sample
    /// that does not carry its own.
    pub fn update_position(&self, fix: PositionFix) {
        self.position.send_replace(Some(fix));
    }

    /// Live counters.
    pub fn stats(&self) -> watch::Receiver<SenderStats> {
        self.stats.clone()
    }

    /// Frames awaiting acknowledgment, straight from the dispatch worker.
    ///
    /// `None` once the worker has stopped.
    pub async fn pending_len(&self) -> Option<usize> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(DispatchCommand::PendingLen(reply)).await.ok()?;
        rx.await.ok()
    }

    /// Stop every task and wait for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                log::error!("[sender] task failed: {e}");
            }
        }
        log::info!("[sender] stopped");
    }
}

// ---------------------------------------------------------------------------
// Stage tasks
// ---------------------------------------------------------------------------

async fn run_structuring(
    mut intake: broadcast::Receiver<Intake>,
    mut position: watch::Receiver<Option<PositionFix>>,
    fallback: PositionFix,
    out: mpsc::Sender<Observation>,
    stats: Arc<watch::Sender<SenderStats>>,
    cancel: CancellationToken,
) {
    let mut last_fix: Option<PositionFix> = None;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = intake.recv() => next,
        };
        let Intake {
            sample,
            fix,
            altitude,
        } = match next {
            Ok(intake) => intake,
            Err(RecvError::Lagged(n)) => {
                log::warn!("[structuring] intake overflow, dropped {n} oldest sample(s)");
                stats.send_modify(|s| s.dropped_samples += n);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if position.has_changed().unwrap_or(false) {
            if let Some(update) = *position.borrow_and_update() {
                last_fix = Some(update);
            }
        }
        if fix.is_some() {
            last_fix = fix;
        }

        let observation = structure(sample, last_fix.unwrap_or(fallback), altitude, now_nanos());
        if out.send(observation).await.is_err() {
            break;
        }
    }
}

async fn run_processing(
    mut input: mpsc::Receiver<Observation>,
    out: mpsc::Sender<Observation>,
    cancel: CancellationToken,
) {
    loop {
        let observation = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = input.recv() => match next {
                Some(observation) => observation,
                None => break,
            },
        };
        if out.send(process(observation)).await.is_err() {
            break;
        }
    }
}

async fn run_packetization(
    mut packetizer: Packetizer,
    mut input: mpsc::Receiver<Observation>,
    out: mpsc::Sender<Frame>,
    cancel: CancellationToken,
) {
    loop {
        let observation = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = input.recv() => match next {
                Some(observation) => observation,
                None => break,
            },
        };
        let frame = packetizer.packetize(observation);
        log::trace!("[packetize] seq={}", frame.sequence_id());
        // Backpressure: waits while dispatch is behind.
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = out.send(frame) => sent,
        };
        if sent.is_err() {
            break;
        }
    }
}
