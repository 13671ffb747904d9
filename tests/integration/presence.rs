use std::time::Duration;

use bytes::Bytes;
use rally_core::PeerId;
use rally_services::{NodeEvent, Transport};

use crate::*;

#[tokio::test(start_paused = true)]
async fn peers_discover_each_other() {
    let cluster = Cluster::new();
    let a = cluster.spawn("a");
    let b = cluster.spawn("b");
    let c = cluster.spawn("c");

    settle(Duration::from_secs(1)).await;

    for node in [&a, &b, &c] {
        let snapshot = node.handle.snapshot();
        assert_eq!(snapshot.active_peers, 2, "{} sees {:?}", node.id(), snapshot.peers);
        assert!(snapshot.peers.iter().all(|p| p.id != node.id()));
    }
}

#[tokio::test(start_paused = true)]
async fn silent_peer_expires_after_ttl() {
    let cluster = Cluster::new();
    let a = cluster.spawn("a");
    let b = cluster.spawn("b");
    settle(Duration::from_secs(1)).await;
    assert_eq!(a.handle.snapshot().active_peers, 1);

    let mut events = a.handle.subscribe();
    b.stop();

    let expired = wait_for(&mut events, Duration::from_secs(30), |event| match event {
        NodeEvent::PeerExpired(peer) => Some(peer),
        _ => None,
    })
    .await;
    assert_eq!(expired, Some(PeerId::from("b")));
    assert_eq!(a.handle.snapshot().active_peers, 0);
}

#[tokio::test(start_paused = true)]
async fn heartbeats_keep_an_idle_peer_alive() {
    let cluster = Cluster::new();
    let a = cluster.spawn("a");
    let _b = cluster.spawn("b");

    settle(Duration::from_secs(60)).await;
    assert_eq!(a.handle.snapshot().active_peers, 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_do_not_disturb_presence() {
    let cluster = Cluster::new();
    let a = cluster.spawn("a");

    cluster.bus.send(Bytes::from_static(b"not json at all")).unwrap();
    cluster.bus.send(Bytes::from_static(br#"{"kind":"heartbeat","sentAt":1,"payload":null}"#))
        .unwrap();
    cluster.bus.send(Bytes::from_static(
        br#"{"kind":"transferChunk","senderId":"ghost","sentAt":1,"payload":{}}"#,
    ))
    .unwrap();
    settle(Duration::from_secs(1)).await;

    let snapshot = a.handle.snapshot();
    assert_eq!(snapshot.active_peers, 0);
    assert!(snapshot.transfers.is_empty());
}
