//! Per-session sequence tracking on the receive side.
//!
//! [`SessionTracker`] decides, for every verified data frame, whether its
//! record should be forwarded:
//!
//! - The first id seen for a session is always **new**.
//! - An id above the session's highest, or a low id right after a high one
//!   (wraparound), is **new** and becomes the highest.
//! - An id at or below the highest that was never forwarded is **late** and
//!   accepted exactly once; `highest` does not move backward.
//! - Anything else is a **duplicate**.
//!
//! Unlike a cumulative-ACK receiver, out-of-order ids are accepted rather
//! than discarded; nothing is reordered.
//!
//! This module only manages state; all link I/O is the caller's
//! responsibility.

use std::collections::{HashMap, VecDeque};

use crate::config::ProtocolConfig;
use crate::packet::SessionId;

/// Outcome of [`SessionTracker::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Newer than anything seen; forward.
    New,
    /// Older than the highest id but never forwarded; forward once.
    LateUnseen,
    /// Already forwarded; suppress.
    Duplicate,
}

impl Classification {
    /// `true` when the record should reach the downstream sink.
    pub fn should_forward(self) -> bool {
        !matches!(self, Self::Duplicate)
    }
}

/// Per-session bookkeeping.
///
/// `received` counts how many copies of each remembered id arrived; `order`
/// holds the same ids oldest-first so the memory can be bounded.
#[derive(Debug)]
struct SessionState {
    highest_seen: u32,
    received: HashMap<u32, u32>,
    order: VecDeque<u32>,
}

impl SessionState {
    fn new(first: u32) -> Self {
        let mut state = Self {
            highest_seen: first,
            received: HashMap::new(),
            order: VecDeque::new(),
        };
        state.received.insert(first, 1);
        state.order.push_back(first);
        state
    }

    fn remember(&mut self, sequence_id: u32, capacity: usize) {
        self.received.insert(sequence_id, 1);
        self.order.push_back(sequence_id);
        while self.order.len() > capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.received.remove(&evicted);
            }
        }
    }
}

/// Receive-side sequence state for every session seen on the link.
#[derive(Debug)]
pub struct SessionTracker {
    sessions: HashMap<SessionId, SessionState>,
    max_sequence_id: u32,
    wrap_threshold: u32,
    capacity: usize,
    duplicates: u64,
}

impl SessionTracker {
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            max_sequence_id: config.max_sequence_id,
            wrap_threshold: config.wrap_threshold,
            capacity: config.dedupe_capacity.max(1),
            duplicates: 0,
        }
    }

    /// Classify an incoming `(session, sequence_id)` and record it.
    ///
    /// [`Classification::New`] and [`Classification::LateUnseen`] mark the id
    /// as forwarded; [`Classification::Duplicate`] bumps its receive count.
    pub fn classify(&mut self, session: SessionId, sequence_id: u32) -> Classification {
        let Some(state) = self.sessions.get_mut(&session) else {
            self.sessions.insert(session, SessionState::new(sequence_id));
            return Classification::New;
        };

        let highest = state.highest_seen;
        let wrapped = highest > self.max_sequence_id.saturating_sub(self.wrap_threshold)
            && sequence_id < self.wrap_threshold;

        if sequence_id > highest || wrapped {
            state.highest_seen = sequence_id;
            state.remember(sequence_id, self.capacity);
            return Classification::New;
        }

        match state.received.get_mut(&sequence_id) {
            None => {
                state.remember(sequence_id, self.capacity);
                Classification::LateUnseen
            }
            Some(count) => {
                *count += 1;
                self.duplicates += 1;
                Classification::Duplicate
            }
        }
    }

    /// Highest id recorded for `session`, if it has been seen.
    pub fn highest_seen(&self, session: &SessionId) -> Option<u32> {
        self.sessions.get(session).map(|s| s.highest_seen)
    }

    /// How many copies of `(session, sequence_id)` have arrived; 0 if unknown
    /// or no longer remembered.
    pub fn times_received(&self, session: &SessionId, sequence_id: u32) -> u32 {
        self.sessions
            .get(session)
            .and_then(|s| s.received.get(&sequence_id).copied())
            .unwrap_or(0)
    }

    /// Total duplicates suppressed across all sessions.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Number of sessions seen so far.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
