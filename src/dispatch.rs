//! Dispatch worker: the only writer of data frames and sole owner of the
//! pending-acknowledgment registry.
//!
//! # Cycle
//!
//! ```text
//!  every dispatch_interval:
//!
//!    priority = unacked / (unacked + new)        (0 when both are 0)
//!
//!    oldest timed out  ──yes──▶  draw < priority ──yes──▶ RESEND oldest
//!          │ no                        │ no
//!          ▼                           ▼
//!    new frame queued? ──yes──▶ SEND NEW, register
//!          │ no
//!          ▼
//!        idle
//! ```
//!
//! Under a heavy backlog of unacknowledged frames the draw favours clearing
//! retransmissions; under a light one, fresh data goes first.  At most one
//! frame leaves per cycle.
//!
//! Everything else reaches the worker as a message: verified ACK ids from
//! the acknowledgment handler ([`Inbound`]) and queries from the pipeline
//! handle ([`DispatchCommand`]).  No other task touches the registry.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::diagnostics::{Diagnostics, FrameKind, LinkEvent, Role};
use crate::link::{Link, LinkError};
use crate::packet::{Frame, SessionId};
use crate::pending::{PendingEntry, PendingRegistry};

// ---------------------------------------------------------------------------
// Messages and counters
// ---------------------------------------------------------------------------

/// What the acknowledgment handler tells the dispatch worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// A CRC-verified ACK for this sequence id.
    Ack(u32),
    /// An ACK-sized frame failed its CRC and was dropped.
    CorruptAck,
    /// Reading from the link failed transiently.
    TransportError,
}

/// Queries answered by the dispatch worker.
#[derive(Debug)]
pub enum DispatchCommand {
    /// Current number of frames awaiting acknowledgment.
    PendingLen(oneshot::Sender<usize>),
}

/// Sender-side counters, published on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// First transmissions.
    pub sent: u64,
    /// Retransmissions of timed-out frames.
    pub resent: u64,
    /// ACKs that cleared a pending entry.
    pub acked: u64,
    /// Verified ACKs for ids no longer pending.
    pub stale_acks: u64,
    /// ACK frames dropped for a bad CRC.
    pub corrupted_acks: u64,
    /// Failed link reads or writes.
    pub transport_errors: u64,
    /// Samples lost to intake overflow.
    pub dropped_samples: u64,
    /// Frames currently awaiting acknowledgment.
    pub pending: usize,
}

// ---------------------------------------------------------------------------
// Dispatcher: the decision logic
// ---------------------------------------------------------------------------

/// Fraction of cycles that should favour a resend.
pub fn resend_priority(unacked: usize, new: usize) -> f64 {
    let total = unacked + new;
    if total == 0 {
        0.0
    } else {
        unacked as f64 / total as f64
    }
}

/// Outcome of one dispatch decision.
#[derive(Debug)]
pub enum DispatchAction {
    /// Retransmit this entry, already taken out of the registry.
    Resend(PendingEntry),
    /// Transmit the next queued frame.
    SendNew,
    Idle,
}

/// Registry plus the random source that arbitrates resend vs. new.
#[derive(Debug)]
pub struct Dispatcher {
    registry: PendingRegistry,
    rng: StdRng,
    ack_timeout: Duration,
}

impl Dispatcher {
    pub fn new(ack_timeout: Duration, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            registry: PendingRegistry::new(),
            rng,
            ack_timeout,
        }
    }

    pub fn registry(&self) -> &PendingRegistry {
        &self.registry
    }

    /// Decide what this cycle does, given `new_available` queued frames.
    pub fn choose(&mut self, now: Instant, new_available: usize) -> DispatchAction {
        if self.registry.oldest_timed_out(now) {
            let priority = resend_priority(self.registry.len(), new_available);
            if self.rng.gen::<f64>() < priority {
                if let Some(entry) = self.registry.pop_oldest() {
                    return DispatchAction::Resend(entry);
                }
            }
        }
        if new_available > 0 {
            DispatchAction::SendNew
        } else {
            DispatchAction::Idle
        }
    }

    /// Register a frame that was just transmitted for the first time.
    pub fn record_sent(&mut self, frame: Frame, now: Instant) {
        self.registry
            .add(PendingEntry::new(frame, now, self.ack_timeout));
    }

    /// Re-register an entry that was just retransmitted; returns its
    /// attempt count.
    pub fn record_resent(&mut self, entry: PendingEntry, now: Instant) -> u32 {
        let entry = entry.retransmitted(now, self.ack_timeout);
        let attempts = entry.attempts;
        self.registry.add(entry);
        attempts
    }

    /// Put back an entry whose retransmission failed.
    pub fn restore(&mut self, entry: PendingEntry) {
        self.registry.restore_oldest(entry);
    }

    /// Clear the entry for `sequence_id`; `false` if it was not pending.
    pub fn acknowledge(&mut self, sequence_id: u32) -> bool {
        self.registry.remove(sequence_id)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Everything the dispatch task owns.
pub(crate) struct DispatchWorker<L> {
    pub dispatcher: Dispatcher,
    pub link: Arc<L>,
    pub session_id: SessionId,
    pub interval: Duration,
    pub frames: mpsc::Receiver<Frame>,
    pub inbound: mpsc::Receiver<Inbound>,
    pub commands: mpsc::Receiver<DispatchCommand>,
    pub stats: Arc<watch::Sender<SenderStats>>,
    pub diagnostics: Diagnostics,
    pub cancel: CancellationToken,
}

impl<L: Link> DispatchWorker<L> {
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // A new frame whose transmission failed; retried before the queue.
        let mut stalled: Option<Frame> = None;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                Some(msg) = self.inbound.recv() => self.on_inbound(msg),

                Some(cmd) = self.commands.recv() => match cmd {
                    DispatchCommand::PendingLen(reply) => {
                        let _ = reply.send(self.dispatcher.registry().len());
                    }
                },

                _ = ticker.tick() => {
                    if let Err(e) = self.cycle(&mut stalled).await {
                        log::error!("[dispatch] link unusable, stopping: {e}");
                        break;
                    }
                }
            }
        }
        log::debug!(
            "[dispatch] stopped with {} frame(s) unacknowledged",
            self.dispatcher.registry().len()
        );
    }

    fn on_inbound(&mut self, msg: Inbound) {
        match msg {
            Inbound::Ack(seq) => {
                if self.dispatcher.acknowledge(seq) {
                    log::debug!("[dispatch] ← ACK seq={seq}");
                    self.publish(|s| s.acked += 1);
                } else {
                    log::debug!("[dispatch] ← ACK seq={seq} (not pending)");
                    self.publish(|s| s.stale_acks += 1);
                }
            }
            Inbound::CorruptAck => self.publish(|s| s.corrupted_acks += 1),
            Inbound::TransportError => self.publish(|s| s.transport_errors += 1),
        }
    }

    /// One dispatch cycle.  Only an unrecoverable link error escapes.
    async fn cycle(&mut self, stalled: &mut Option<Frame>) -> Result<(), LinkError> {
        let now = Instant::now();
        let new_available = self.frames.len() + usize::from(stalled.is_some());

        match self.dispatcher.choose(now, new_available) {
            DispatchAction::Resend(entry) => {
                let seq = entry.sequence_id;
                match self.link.send(entry.frame.as_bytes()).await {
                    Ok(()) => {
                        let attempts = self.dispatcher.record_resent(entry, now);
                        log::debug!("[dispatch] → RESEND seq={seq} attempt={attempts}");
                        self.report(seq, attempts);
                        self.publish(|s| s.resent += 1);
                    }
                    Err(e) => {
                        self.dispatcher.restore(entry);
                        self.transport_error(e)?;
                    }
                }
            }
            DispatchAction::SendNew => {
                let frame = match stalled.take() {
                    Some(frame) => frame,
                    None => match self.frames.try_recv() {
                        Ok(frame) => frame,
                        Err(_) => return Ok(()),
                    },
                };
                let seq = frame.sequence_id();
                match self.link.send(frame.as_bytes()).await {
                    Ok(()) => {
                        self.dispatcher.record_sent(frame, now);
                        log::debug!(
                            "[dispatch] → DATA seq={seq} pending={}",
                            self.dispatcher.registry().len()
                        );
                        self.report(seq, 1);
                        self.publish(|s| s.sent += 1);
                    }
                    Err(e) => {
                        *stalled = Some(frame);
                        self.transport_error(e)?;
                    }
                }
            }
            DispatchAction::Idle => {}
        }
        Ok(())
    }

    fn transport_error(&self, e: LinkError) -> Result<(), LinkError> {
        self.publish(|s| s.transport_errors += 1);
        if e.is_fatal() {
            return Err(e);
        }
        log::warn!("[dispatch] send failed, retrying next cycle: {e}");
        Ok(())
    }

    fn report(&self, seq: u32, attempts: u32) {
        self.diagnostics.report(
            LinkEvent::new(Role::Send, FrameKind::Data)
                .session(self.session_id)
                .sequence(seq)
                .attempts(attempts),
        );
    }

    fn publish(&self, update: impl FnOnce(&mut SenderStats)) {
        let pending = self.dispatcher.registry().len();
        self.stats.send_modify(|s| {
            update(s);
            s.pending = pending;
        });
    }
}
