//! Structured link events for operators.
//!
//! Every frame that crosses the link (data or ACK, in either direction) can
//! be reported as a [`LinkEvent`].  Events travel over a bounded channel and
//! are sent with `try_send`: when the consumer falls behind, events are
//! dropped rather than stalling a protocol worker.

use std::time::SystemTime;

use tokio::sync::mpsc;

use crate::packet::SessionId;

/// Direction of a frame relative to the reporting side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Send,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Data,
    Ack,
}

/// One transmitted or received frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkEvent {
    pub time: SystemTime,
    /// `None` for ACKs, which carry no session.
    pub session_id: Option<SessionId>,
    /// `None` when the frame was too mangled to read one.
    pub sequence_id: Option<u32>,
    pub role: Role,
    pub kind: FrameKind,
    /// Send side: transmissions of this id so far.  Receive side: copies
    /// of this id received so far.
    pub attempt_count: u32,
    pub corrupted: bool,
}

impl LinkEvent {
    pub fn new(role: Role, kind: FrameKind) -> Self {
        Self {
            time: SystemTime::now(),
            session_id: None,
            sequence_id: None,
            role,
            kind,
            attempt_count: 1,
            corrupted: false,
        }
    }

    pub fn session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn sequence(mut self, sequence_id: u32) -> Self {
        self.sequence_id = Some(sequence_id);
        self
    }

    pub fn attempts(mut self, attempt_count: u32) -> Self {
        self.attempt_count = attempt_count;
        self
    }

    pub fn corrupted(mut self, corrupted: bool) -> Self {
        self.corrupted = corrupted;
        self
    }
}

/// Cheap, cloneable reporter handed to each worker.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    tx: Option<mpsc::Sender<LinkEvent>>,
}

impl Diagnostics {
    /// A reporter plus the receiving end of its event stream.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LinkEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// A reporter that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn report(&self, event: LinkEvent) {
        log::trace!(
            "[diag] {:?} {:?} session={:?} seq={:?} attempt={} corrupted={}",
            event.role,
            event.kind,
            event.session_id,
            event.sequence_id,
            event.attempt_count,
            event.corrupted
        );
        if let Some(tx) = &self.tx {
            // Full or closed: the event is simply lost.
            let _ = tx.try_send(event);
        }
    }
}
