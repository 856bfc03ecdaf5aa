//! In-process links and fault injection for deterministic testing.
//!
//! Real radio links drop, corrupt, duplicate, and reorder frames.  To
//! exercise the reliability mechanisms without hardware, this module
//! provides:
//!
//! - [`MemoryLink`] — one end of an in-memory datagram pipe; build a
//!   connected pair with [`MemoryLink::pair`].
//! - [`Simulator`] — wraps any [`Link`] and applies a configurable fault
//!   model to everything sent through it:
//!
//! | Fault        | Description                                            |
//! |--------------|--------------------------------------------------------|
//! | Loss         | Drop a frame with probability `loss_rate`.             |
//! | Scripted loss| Drop the first transmission of listed sequence ids.    |
//! | Corruption   | Flip one random bit with probability `corrupt_rate`.   |
//! | Duplication  | Deliver a frame twice with probability `duplicate_rate`.|
//! | Reordering   | Hold a frame back until the next one has been sent.    |
//!
//! Faults apply to the send path only; wrap each direction's sending end.

use std::collections::HashSet;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::link::{Link, LinkError};
use crate::packet::peek_sequence_id;

// ---------------------------------------------------------------------------
// MemoryLink
// ---------------------------------------------------------------------------

/// One end of an in-memory datagram link.
#[derive(Debug)]
pub struct MemoryLink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MemoryLink {
    /// Two connected ends: what one sends, the other receives.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: a_tx,
                rx: tokio::sync::Mutex::new(a_rx),
            },
            Self {
                tx: b_tx,
                rx: tokio::sync::Mutex::new(b_rx),
            },
        )
    }
}

impl Link for MemoryLink {
    async fn send(&self, frame: &[u8]) -> Result<(), LinkError> {
        self.tx.send(frame.to_vec()).map_err(|_| LinkError::Closed)
    }

    async fn recv(&self, _expected_len: usize) -> Result<Vec<u8>, LinkError> {
        self.rx.lock().await.recv().await.ok_or(LinkError::Closed)
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfig {
    /// Probability that any given frame is silently dropped.
    pub loss_rate: f64,
    /// Probability that a frame has one bit flipped.
    pub corrupt_rate: f64,
    /// Probability that a frame is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that a frame is held back behind the next one.
    pub reorder_rate: f64,
    /// Data-frame sequence ids whose first transmission is dropped.
    pub drop_first_transmission: Vec<u32>,
    /// RNG seed; `None` seeds from entropy.
    pub seed: Option<u64>,
}

struct SimState {
    rng: StdRng,
    scripted: HashSet<u32>,
    held: Option<Vec<u8>>,
    sent_log: Vec<Vec<u8>>,
    dropped: u64,
}

/// A fault-injecting wrapper around another link.
pub struct Simulator<L> {
    inner: L,
    config: SimulatorConfig,
    state: Mutex<SimState>,
}

impl<L: Link> Simulator<L> {
    pub fn new(inner: L, config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let scripted = config.drop_first_transmission.iter().copied().collect();
        Self {
            inner,
            config,
            state: Mutex::new(SimState {
                rng,
                scripted,
                held: None,
                sent_log: Vec::new(),
                dropped: 0,
            }),
        }
    }

    /// Every frame handed to [`Link::send`], in order, before faults.
    pub fn sent_log(&self) -> Vec<Vec<u8>> {
        self.lock().sent_log.clone()
    }

    /// How many times a data frame with `sequence_id` was handed to send.
    pub fn transmissions_of(&self, sequence_id: u32) -> usize {
        self.lock()
            .sent_log
            .iter()
            .filter(|f| peek_sequence_id(f) == Some(sequence_id))
            .count()
    }

    /// Frames dropped so far, scripted or random.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        // A poisoned lock only means a test already panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply the fault model; returns the frames to put on the wire now.
    fn apply_faults(&self, frame: &[u8]) -> Vec<Vec<u8>> {
        let mut state = self.lock();
        state.sent_log.push(frame.to_vec());

        if let Some(seq) = peek_sequence_id(frame) {
            if state.scripted.remove(&seq) {
                state.dropped += 1;
                log::debug!("[sim] scripted drop of seq={seq}");
                return state.held.take().into_iter().collect();
            }
        }

        if state.rng.gen_bool(self.config.loss_rate.clamp(0.0, 1.0)) {
            state.dropped += 1;
            return state.held.take().into_iter().collect();
        }

        let mut out = frame.to_vec();
        if !out.is_empty() && state.rng.gen_bool(self.config.corrupt_rate.clamp(0.0, 1.0)) {
            let bit = state.rng.gen_range(0..out.len() * 8);
            out[bit / 8] ^= 1 << (bit % 8);
        }

        if state.held.is_none() && state.rng.gen_bool(self.config.reorder_rate.clamp(0.0, 1.0)) {
            state.held = Some(out);
            return Vec::new();
        }

        let mut wire = vec![out.clone()];
        if state.rng.gen_bool(self.config.duplicate_rate.clamp(0.0, 1.0)) {
            wire.push(out);
        }
        wire.extend(state.held.take());
        wire
    }
}

impl<L: Link> Link for Simulator<L> {
    async fn send(&self, frame: &[u8]) -> Result<(), LinkError> {
        let wire = self.apply_faults(frame);
        for f in wire {
            self.inner.send(&f).await?;
        }
        Ok(())
    }

    async fn recv(&self, expected_len: usize) -> Result<Vec<u8>, LinkError> {
        self.inner.recv(expected_len).await
    }
}
