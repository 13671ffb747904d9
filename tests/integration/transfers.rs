use std::time::Duration;

use rally_core::PeerId;
use rally_services::{AbandonReason, Direction, NodeEvent, NodeSettings, TransferState};

use crate::*;

#[tokio::test(start_paused = true)]
async fn payload_arrives_intact_at_every_peer() {
    let cluster = Cluster::new();
    let a = cluster.spawn("a");
    let b = cluster.spawn("b");
    let c = cluster.spawn("c");
    settle(Duration::from_secs(1)).await;

    let mut b_events = b.handle.subscribe();
    let mut c_events = c.handle.subscribe();

    let payload = pattern(150_000);
    let id = a
        .handle
        .send_payload("level.bin", Some("application/octet-stream".into()), payload.clone())
        .await
        .unwrap();

    for events in [&mut b_events, &mut c_events] {
        let received = wait_for(events, Duration::from_secs(10), |event| match event {
            NodeEvent::TransferCompleted {
                id: done,
                direction: Direction::Inbound,
                peer,
                metadata,
                payload,
            } if done == id => Some((peer, metadata, payload)),
            _ => None,
        })
        .await
        .expect("transfer should complete");

        assert_eq!(received.0, PeerId::from("a"));
        assert_eq!(received.1.name, "level.bin");
        assert_eq!(received.1.byte_size, 150_000);
        assert_eq!(received.2, payload);
    }

    settle(Duration::from_millis(100)).await;
    let outbound = &a.handle.snapshot().transfers[0];
    assert_eq!(outbound.id, id);
    assert_eq!(outbound.direction, Direction::Outbound);
    assert_eq!(outbound.state, TransferState::Complete);

    let inbound = &b.handle.snapshot().transfers[0];
    assert_eq!(inbound.state, TransferState::Complete);
    assert_eq!(inbound.done_chunks, inbound.total_chunks);
}

#[tokio::test(start_paused = true)]
async fn empty_payload_completes_immediately() {
    let cluster = Cluster::new();
    let a = cluster.spawn("a");
    let b = cluster.spawn("b");
    settle(Duration::from_secs(1)).await;

    let mut events = b.handle.subscribe();
    a.handle
        .send_payload("empty.txt", None, Bytes::new())
        .await
        .unwrap();

    let payload = wait_for(&mut events, Duration::from_secs(5), |event| match event {
        NodeEvent::TransferCompleted { payload, .. } => Some(payload),
        _ => None,
    })
    .await
    .expect("empty transfer should complete");
    assert!(payload.is_empty());
}

#[tokio::test(start_paused = true)]
async fn receiver_abandons_a_stalled_transfer() {
    let cluster = Cluster::new();
    let mut slow = NodeSettings::default();
    slow.transfer.chunk_delay = Duration::from_secs(1);
    let a = cluster.spawn_with("a", slow);
    let b = cluster.spawn("b");
    settle(Duration::from_secs(1)).await;

    let mut events = b.handle.subscribe();
    let id = a
        .handle
        .send_payload("huge.bin", None, pattern(600_000))
        .await
        .unwrap();
    settle(Duration::from_millis(2_500)).await;
    a.stop();

    let reason = wait_for(&mut events, Duration::from_secs(60), |event| match event {
        NodeEvent::TransferAbandoned {
            id: abandoned,
            direction: Direction::Inbound,
            reason,
            ..
        } if abandoned == id => Some(reason),
        _ => None,
    })
    .await;
    assert_eq!(reason, Some(AbandonReason::Stalled));

    let progress = &b.handle.snapshot().transfers[0];
    assert_eq!(progress.state, TransferState::Abandoned);
    assert!(progress.done_chunks < progress.total_chunks);
}

#[tokio::test(start_paused = true)]
async fn sender_can_cancel_mid_flight() {
    let cluster = Cluster::new();
    let mut slow = NodeSettings::default();
    slow.transfer.chunk_delay = Duration::from_millis(500);
    let a = cluster.spawn_with("a", slow);
    let _b = cluster.spawn("b");
    settle(Duration::from_secs(1)).await;

    let mut events = a.handle.subscribe();
    let id = a
        .handle
        .send_payload("movie.bin", None, pattern(600_000))
        .await
        .unwrap();
    settle(Duration::from_millis(700)).await;

    let progress = a.handle.cancel_transfer(id.clone()).await.unwrap();
    assert_eq!(progress.state, TransferState::Abandoned);

    let reason = wait_for(&mut events, Duration::from_secs(1), |event| match event {
        NodeEvent::TransferAbandoned { id: gone, reason, .. } if gone == id => Some(reason),
        _ => None,
    })
    .await;
    assert_eq!(reason, Some(AbandonReason::Cancelled));
}
