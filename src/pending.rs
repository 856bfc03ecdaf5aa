//! Send-side registry of frames awaiting acknowledgment.
//!
//! [`PendingRegistry`] holds every transmitted, un-acknowledged frame in the
//! order it was (last) sent.  It is owned by the dispatch worker alone, so it
//! carries no synchronisation.
//!
//! # Retry contract
//!
//! - At most one entry exists per sequence id.
//! - Only the **oldest** entry is ever checked for timeout; when resent it
//!   is moved to the back, so the registry behaves like a ring that retries
//!   its stalest member first.
//! - ACKs remove entries in any order.
//!
//! This module only manages state; all link I/O is the caller's
//! responsibility.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::packet::Frame;

// ---------------------------------------------------------------------------
// PendingEntry
// ---------------------------------------------------------------------------

/// A frame that has been transmitted but not yet acknowledged.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub sequence_id: u32,
    /// The encoded frame, resent verbatim.
    pub frame: Frame,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
    /// `sent_at` + acknowledgment timeout.
    pub deadline: Instant,
    /// Total transmissions so far (1 = first send).
    pub attempts: u32,
}

impl PendingEntry {
    /// Entry for a frame transmitted for the first time at `sent_at`.
    pub fn new(frame: Frame, sent_at: Instant, timeout: Duration) -> Self {
        Self {
            sequence_id: frame.sequence_id(),
            frame,
            sent_at,
            deadline: sent_at + timeout,
            attempts: 1,
        }
    }

    /// Record a retransmission at `now`.
    pub fn retransmitted(mut self, now: Instant, timeout: Duration) -> Self {
        self.sent_at = now;
        self.deadline = now + timeout;
        self.attempts += 1;
        self
    }

    pub fn is_timed_out(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

// ---------------------------------------------------------------------------
// PendingRegistry
// ---------------------------------------------------------------------------

/// Insertion-ordered set of [`PendingEntry`] keyed by sequence id.
///
/// ```text
///  front (oldest send)                       back (newest send)
///  ┌──────┬──────┬──────┬──────┐
///  │ id 3 │ id 5 │ id 6 │ id 4 │  ◀── resent entries re-enter here
///  └──────┴──────┴──────┴──────┘
/// ```
#[derive(Debug, Default)]
pub struct PendingRegistry {
    entries: VecDeque<PendingEntry>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry` as the newest; any older entry for the same id is
    /// dropped first.
    pub fn add(&mut self, entry: PendingEntry) {
        self.remove(entry.sequence_id);
        self.entries.push_back(entry);
    }

    /// Remove the entry for `sequence_id`.  Returns `false` if there was none.
    pub fn remove(&mut self, sequence_id: u32) -> bool {
        match self.entries.iter().position(|e| e.sequence_id == sequence_id) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of frames awaiting acknowledgment.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, sequence_id: u32) -> bool {
        self.entries.iter().any(|e| e.sequence_id == sequence_id)
    }

    /// The earliest-sent unacknowledged entry.
    pub fn oldest(&self) -> Option<&PendingEntry> {
        self.entries.front()
    }

    /// `true` iff the oldest entry exists and its deadline has passed.
    pub fn oldest_timed_out(&self, now: Instant) -> bool {
        self.oldest().is_some_and(|e| e.is_timed_out(now))
    }

    /// Take the oldest entry out for retransmission.
    pub fn pop_oldest(&mut self) -> Option<PendingEntry> {
        self.entries.pop_front()
    }

    /// Put back an entry whose retransmission failed, keeping it oldest so
    /// the next cycle retries it.
    pub fn restore_oldest(&mut self, entry: PendingEntry) {
        self.remove(entry.sequence_id);
        self.entries.push_front(entry);
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &PendingEntry> {
        self.entries.iter()
    }
}
