//! End-to-end runs of both pipelines over an in-memory link.
//!
//! Time is paused: tokio advances the clock whenever every task is idle, so
//! dispatch ticks and acknowledgment timeouts cost no wall-clock time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use thermal_link::diagnostics::{Diagnostics, FrameKind, Role};
use thermal_link::simulator::MemoryLink;
use thermal_link::{
    PositionFix, ProtocolConfig, ReceiverConfig, ReceiverPipeline, SenderConfig, SenderPipeline,
    SessionId, ThermalSample,
};

fn sender_config(session: &str) -> SenderConfig {
    SenderConfig {
        session_id: SessionId::new(session),
        rng_seed: Some(7),
        ..SenderConfig::default()
    }
}

fn sample(n: i16) -> ThermalSample {
    ThermalSample {
        high_temp: 40 + n,
        low_temp: 5 - n,
    }
}

// ---------------------------------------------------------------------------
// Three records, no loss
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn three_records_forwarded_once_each() {
    let (air, ground) = MemoryLink::pair();
    let (sink, mut records) = mpsc::channel(16);

    let receiver = ReceiverPipeline::spawn(
        ReceiverConfig::default(),
        Arc::new(ground),
        sink,
        Diagnostics::disabled(),
    );
    let sender = SenderPipeline::spawn(sender_config("S1"), Arc::new(air), Diagnostics::disabled());

    for n in 0..3 {
        sender.ingest(sample(n), None, 250);
    }

    let mut tx_stats = sender.stats();
    timeout(
        Duration::from_secs(5),
        tx_stats.wait_for(|s| s.acked == 3 && s.pending == 0),
    )
    .await
    .expect("all three acknowledged")
    .expect("sender running");

    let mut rx_stats = receiver.stats();
    let rx = timeout(Duration::from_secs(5), rx_stats.wait_for(|s| s.acks_sent == 3))
        .await
        .expect("receiver acked three")
        .expect("receiver running")
        .clone();
    assert_eq!(rx.forwarded, 3);
    assert_eq!(rx.duplicates, 0);
    assert_eq!(rx.corrupted, 0);

    let mut ids = Vec::new();
    for _ in 0..3 {
        let record = records.recv().await.expect("record");
        assert_eq!(record.session_id, SessionId::new("S1"));
        assert_eq!(record.altitude, 250);
        ids.push(record.sequence_id);
    }
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(records.try_recv().is_err());

    let tx = sender.stats().borrow().clone();
    assert_eq!((tx.sent, tx.resent, tx.stale_acks), (3, 0, 0));
    assert_eq!(sender.pending_len().await, Some(0));

    sender.shutdown().await;
    receiver.shutdown().await;
}

// ---------------------------------------------------------------------------
// Intake overflow
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn burst_beyond_capacity_keeps_newest_samples() {
    let (air, ground) = MemoryLink::pair();
    let (sink, mut records) = mpsc::channel(16);
    let receiver = ReceiverPipeline::spawn(
        ReceiverConfig::default(),
        Arc::new(ground),
        sink,
        Diagnostics::disabled(),
    );
    let config = SenderConfig {
        protocol: ProtocolConfig {
            queue_capacity: 2,
            ..ProtocolConfig::default()
        },
        ..sender_config("S4")
    };
    let sender = SenderPipeline::spawn(config, Arc::new(air), Diagnostics::disabled());

    // No await in between: the structuring task only runs once the burst
    // is over.
    for n in 0..200 {
        sender.ingest(
            ThermalSample {
                high_temp: n,
                low_temp: 0,
            },
            None,
            1,
        );
    }

    let mut tx_stats = sender.stats();
    let tx = timeout(
        Duration::from_secs(5),
        tx_stats.wait_for(|s| s.acked == 2 && s.pending == 0),
    )
    .await
    .expect("survivors acknowledged")
    .expect("sender running")
    .clone();
    assert_eq!(tx.dropped_samples, 198);
    assert_eq!(tx.sent, 2);

    let first = records.recv().await.expect("first survivor");
    let second = records.recv().await.expect("second survivor");
    assert_eq!((first.high_temp, second.high_temp), (198, 199));
    assert_eq!((first.sequence_id, second.sequence_id), (1, 2));
    assert!(records.try_recv().is_err());

    sender.shutdown().await;
    receiver.shutdown().await;
}

// ---------------------------------------------------------------------------
// Position handling
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn fallback_then_live_position() {
    let (air, ground) = MemoryLink::pair();
    let (sink, mut records) = mpsc::channel(16);
    let receiver = ReceiverPipeline::spawn(
        ReceiverConfig::default(),
        Arc::new(ground),
        sink,
        Diagnostics::disabled(),
    );
    let config = sender_config("S2");
    let fallback = config.fallback_position;
    let sender = SenderPipeline::spawn(config, Arc::new(air), Diagnostics::disabled());

    sender.ingest(sample(0), None, 10);
    let first = records.recv().await.expect("first record");
    assert_eq!((first.latitude, first.longitude), fallback);

    sender.update_position(PositionFix {
        latitude: 40.0,
        longitude: -120.0,
    });
    sender.ingest(sample(1), None, 10);
    let second = records.recv().await.expect("second record");
    assert_eq!((second.latitude, second.longitude), (40.0, -120.0));

    sender.shutdown().await;
    receiver.shutdown().await;
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn diagnostics_report_both_directions() {
    let (air, ground) = MemoryLink::pair();
    let (sink, mut records) = mpsc::channel(16);
    let (rx_diag, mut rx_events) = Diagnostics::channel(16);
    let (tx_diag, mut tx_events) = Diagnostics::channel(16);

    let receiver =
        ReceiverPipeline::spawn(ReceiverConfig::default(), Arc::new(ground), sink, rx_diag);
    let sender = SenderPipeline::spawn(sender_config("S3"), Arc::new(air), tx_diag);

    sender.ingest(sample(0), None, 1);
    records.recv().await.expect("record");

    let sent = tx_events.recv().await.expect("send event");
    assert_eq!((sent.role, sent.kind), (Role::Send, FrameKind::Data));
    assert_eq!(sent.sequence_id, Some(1));
    assert_eq!(sent.session_id, Some(SessionId::new("S3")));

    let acked = tx_events.recv().await.expect("ack event");
    assert_eq!((acked.role, acked.kind), (Role::Receive, FrameKind::Ack));

    let received = rx_events.recv().await.expect("receive event");
    assert_eq!((received.role, received.kind), (Role::Receive, FrameKind::Data));
    assert_eq!(received.attempt_count, 1);
    assert!(!received.corrupted);

    sender.shutdown().await;
    receiver.shutdown().await;
}
