//! Sender-side acknowledgment handler.
//!
//! Reads the link strictly as ACK frames and forwards what it learns to the
//! dispatch worker as [`Inbound`] messages.  It never touches the pending
//! registry itself.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::diagnostics::{Diagnostics, FrameKind, LinkEvent, Role};
use crate::dispatch::Inbound;
use crate::link::Link;
use crate::packet::{decode_ack, Ack, Checked, ACK_LEN};

/// Interpret one inbound read.  `None` means drop it without telling
/// dispatch (wrong size or not an ACK).
fn interpret(bytes: &[u8], diagnostics: &Diagnostics) -> Option<Inbound> {
    match decode_ack(bytes) {
        Ok(Checked {
            value: Ack { sequence_id, origin },
            crc_ok: true,
        }) => {
            log::trace!("[ack] ← ACK seq={sequence_id} from {origin}");
            diagnostics.report(LinkEvent::new(Role::Receive, FrameKind::Ack).sequence(sequence_id));
            Some(Inbound::Ack(sequence_id))
        }
        Ok(Checked { crc_ok: false, .. }) => {
            log::debug!("[ack] dropped ACK with bad CRC");
            diagnostics.report(LinkEvent::new(Role::Receive, FrameKind::Ack).corrupted(true));
            Some(Inbound::CorruptAck)
        }
        Err(e) => {
            log::debug!("[ack] dropped {} byte frame: {e}", bytes.len());
            None
        }
    }
}

/// Run until cancelled, the link closes, or dispatch goes away.
pub(crate) async fn run<L: Link>(
    link: Arc<L>,
    inbound: mpsc::Sender<Inbound>,
    diagnostics: Diagnostics,
    cancel: CancellationToken,
) {
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = link.recv(ACK_LEN) => read,
        };

        let msg = match read {
            // Serial read timed out with nothing on the air.
            Ok(bytes) if bytes.is_empty() => continue,
            Ok(bytes) => match interpret(&bytes, &diagnostics) {
                Some(msg) => msg,
                None => continue,
            },
            Err(e) if e.is_fatal() => {
                log::error!("[ack] link closed, stopping: {e}");
                break;
            }
            Err(e) => {
                log::warn!("[ack] read failed: {e}");
                Inbound::TransportError
            }
        };

        if inbound.send(msg).await.is_err() {
            break;
        }
    }
    log::debug!("[ack] stopped");
}
