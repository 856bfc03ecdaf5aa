//! Receiver behaviour driven by hand-crafted frames.
//!
//! The test plays the air unit: it writes raw frames into one end of an
//! in-memory link and reads the receiver's ACKs back from the same end.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use thermal_link::config::MAX_SEQUENCE_ID;
use thermal_link::diagnostics::Diagnostics;
use thermal_link::packet::{decode_ack, encode, ACK_LEN};
use thermal_link::simulator::MemoryLink;
use thermal_link::{
    Link, ReceiverConfig, ReceiverHandle, ReceiverPipeline, ReceiverStats, SessionId,
    TelemetryRecord,
};

struct Ground {
    air: MemoryLink,
    records: mpsc::Receiver<TelemetryRecord>,
    handle: ReceiverHandle,
}

impl Ground {
    fn start() -> Self {
        let (air, ground) = MemoryLink::pair();
        let (sink, records) = mpsc::channel(64);
        let handle = ReceiverPipeline::spawn(
            ReceiverConfig::default(),
            Arc::new(ground),
            sink,
            Diagnostics::disabled(),
        );
        Self {
            air,
            records,
            handle,
        }
    }

    async fn send(&self, bytes: &[u8]) {
        self.air.send(bytes).await.expect("link open");
    }

    async fn send_record(&self, session: &str, seq: u32) {
        self.send(encode(&record(session, seq)).as_bytes()).await;
    }

    /// Next ACK's sequence id, verified.
    async fn next_ack(&self) -> u32 {
        let bytes = timeout(Duration::from_secs(5), self.air.recv(ACK_LEN))
            .await
            .expect("ack in time")
            .expect("link open");
        let ack = decode_ack(&bytes).expect("ack-shaped");
        assert!(ack.crc_ok);
        ack.value.sequence_id
    }

    async fn next_record(&mut self) -> u32 {
        timeout(Duration::from_secs(5), self.records.recv())
            .await
            .expect("record in time")
            .expect("receiver running")
            .sequence_id
    }

    async fn settle(&self, until: impl FnMut(&ReceiverStats) -> bool) -> ReceiverStats {
        let mut stats = self.handle.stats();
        let snapshot = timeout(Duration::from_secs(5), stats.wait_for(until))
            .await
            .expect("stats in time")
            .expect("receiver running")
            .clone();
        snapshot
    }
}

fn record(session: &str, seq: u32) -> TelemetryRecord {
    TelemetryRecord {
        sequence_id: seq,
        session_id: SessionId::new(session),
        latitude: 39.53,
        longitude: -119.81,
        altitude: 900,
        high_temp: 61,
        low_temp: 14,
        capture_time: 1_700_000_000_000_000_000 + i64::from(seq),
    }
}

#[tokio::test]
async fn duplicate_forwarded_once_acked_twice() {
    let mut g = Ground::start();
    g.send_record("S1", 7).await;
    g.send_record("S1", 7).await;

    assert_eq!(g.next_ack().await, 7);
    assert_eq!(g.next_ack().await, 7);
    assert_eq!(g.next_record().await, 7);

    let stats = g.settle(|s| s.acks_sent == 2).await;
    assert_eq!((stats.forwarded, stats.duplicates), (1, 1));
    assert!(g.records.try_recv().is_err());
    g.handle.shutdown().await;
}

#[tokio::test]
async fn late_frame_accepted_once() {
    let mut g = Ground::start();
    for seq in [1, 3, 2, 2] {
        g.send_record("S1", seq).await;
    }
    for expected in [1, 3, 2, 2] {
        assert_eq!(g.next_ack().await, expected);
    }
    for expected in [1, 3, 2] {
        assert_eq!(g.next_record().await, expected);
    }

    let stats = g.settle(|s| s.acks_sent == 4).await;
    assert_eq!(stats.forwarded, 3);
    assert_eq!(stats.late, 1);
    assert_eq!(stats.duplicates, 1);
    assert!(g.records.try_recv().is_err());
    g.handle.shutdown().await;
}

#[tokio::test]
async fn corrupted_frame_is_not_acknowledged() {
    let mut g = Ground::start();
    let mut bad = encode(&record("S1", 1)).as_bytes().to_vec();
    bad[7] ^= 0x10;
    g.send(&bad).await;
    g.send_record("S1", 2).await;

    // The only ACK is for the intact frame.
    assert_eq!(g.next_ack().await, 2);
    assert_eq!(g.next_record().await, 2);
    let stats = g.settle(|s| s.acks_sent == 1).await;
    assert_eq!(stats.corrupted, 1);
    assert_eq!(stats.forwarded, 1);
    g.handle.shutdown().await;
}

#[tokio::test]
async fn wraparound_is_new_not_late() {
    let mut g = Ground::start();
    g.send_record("S1", MAX_SEQUENCE_ID - 50).await;
    g.send_record("S1", 10).await;

    assert_eq!(g.next_record().await, MAX_SEQUENCE_ID - 50);
    assert_eq!(g.next_record().await, 10);
    let stats = g.settle(|s| s.acks_sent == 2).await;
    assert_eq!((stats.forwarded, stats.late), (2, 0));
    g.handle.shutdown().await;
}

#[tokio::test]
async fn sessions_do_not_interfere() {
    let mut g = Ground::start();
    g.send_record("FLIGHT-A", 5).await;
    g.send_record("FLIGHT-B", 5).await;

    assert_eq!(g.next_record().await, 5);
    assert_eq!(g.next_record().await, 5);
    let stats = g.settle(|s| s.acks_sent == 2).await;
    assert_eq!((stats.forwarded, stats.duplicates), (2, 0));
    g.handle.shutdown().await;
}

#[tokio::test]
async fn malformed_reads_are_counted_and_skipped() {
    let mut g = Ground::start();
    g.send(&[0xAA; 12]).await;
    let mut foreign = encode(&record("S1", 1)).as_bytes().to_vec();
    foreign[0] = 4;
    // Re-seal with a valid CRC so only the layout version is wrong.
    let crc = crc32fast::hash(&foreign[..41]);
    foreign[41..].copy_from_slice(&crc.to_le_bytes());
    g.send(&foreign).await;
    g.send_record("S1", 1).await;

    assert_eq!(g.next_ack().await, 1);
    assert_eq!(g.next_record().await, 1);
    let stats = g.settle(|s| s.acks_sent == 1).await;
    assert_eq!(stats.incomplete, 1);
    assert_eq!(stats.rejected, 1);
    g.handle.shutdown().await;
}
