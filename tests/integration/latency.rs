use std::time::Duration;

use crate::*;

#[tokio::test(start_paused = true)]
async fn lone_node_reports_no_latency() {
    let cluster = Cluster::new();
    let a = cluster.spawn("a");
    settle(Duration::from_secs(10)).await;

    let stats = a.handle.snapshot().latency;
    assert_eq!(stats.probes_sent, 0);
    assert!(stats.average_ms.is_none());
    assert_eq!(stats.success_ratio, 1.0);
}

#[tokio::test(start_paused = true)]
async fn probes_are_echoed_by_peers() {
    let cluster = Cluster::new();
    let a = cluster.spawn("a");
    let _b = cluster.spawn("b");
    let _c = cluster.spawn("c");

    settle(Duration::from_millis(9_500)).await;

    let stats = a.handle.snapshot().latency;
    assert!(stats.probes_sent >= 4, "only {} probes sent", stats.probes_sent);
    assert_eq!(stats.echoes_received, stats.probes_sent);
    assert_eq!(stats.success_ratio, 1.0);
    assert_eq!(stats.outstanding, 0);
    assert!(!stats.samples_ms.is_empty());
    assert!(stats.samples_ms.len() <= rally_services::LATENCY_RING_CAPACITY);
    assert!(stats.average_ms.is_some());
}

#[tokio::test(start_paused = true)]
async fn unanswered_probes_lower_the_success_ratio() {
    let cluster = Cluster::new();
    let a = cluster.spawn("a");
    let b = cluster.spawn("b");
    settle(Duration::from_millis(4_500)).await;
    assert_eq!(a.handle.snapshot().latency.success_ratio, 1.0);

    // b vanishes but stays within its TTL for a while; probes sent in
    // that window go unanswered.
    b.stop();
    settle(Duration::from_secs(8)).await;

    let stats = a.handle.snapshot().latency;
    assert!(stats.echoes_received < stats.probes_sent);
    assert!(stats.success_ratio < 1.0);
}
