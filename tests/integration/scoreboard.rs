use std::time::Duration;

use rally_core::PeerId;

use crate::*;

fn scores(node: &TestNode) -> Vec<(PeerId, u64)> {
    node.handle
        .snapshot()
        .game
        .leaderboard()
        .into_iter()
        .map(|entry| (entry.peer, entry.score))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn scoreboards_converge() {
    let cluster = Cluster::new();
    let a = cluster.spawn("a");
    let b = cluster.spawn("b");
    let c = cluster.spawn("c");
    settle(Duration::from_secs(1)).await;

    a.handle.award(5).await.unwrap();
    a.handle.award(5).await.unwrap();
    b.handle.report_score(7).await.unwrap();
    c.handle.join("Cy").await.unwrap();
    settle(Duration::from_millis(100)).await;

    let expected = vec![
        (PeerId::from("a"), 10),
        (PeerId::from("b"), 7),
        (PeerId::from("c"), 0),
    ];
    for node in [&a, &b, &c] {
        assert_eq!(scores(node), expected, "scoreboard on {}", node.id());
        let game = node.handle.snapshot().game;
        assert_eq!(game.players[&PeerId::from("c")].display_name, "Cy");
    }
}

#[tokio::test(start_paused = true)]
async fn late_joiner_catches_up() {
    let cluster = Cluster::new();
    let a = cluster.spawn("a");
    let b = cluster.spawn("b");
    settle(Duration::from_secs(1)).await;

    a.handle.award(12).await.unwrap();
    b.handle.award(3).await.unwrap();
    let clock = a.handle.start_match(300).await.unwrap();
    settle(Duration::from_secs(2)).await;

    let d = cluster.spawn("d");
    settle(Duration::from_secs(1)).await;

    let game = d.handle.snapshot().game;
    assert_eq!(game.score_of(&PeerId::from("a")), 12);
    assert_eq!(game.score_of(&PeerId::from("b")), 3);
    assert_eq!(game.match_clock, Some(clock));
}

#[tokio::test(start_paused = true)]
async fn reset_clears_every_replica() {
    let cluster = Cluster::new();
    let a = cluster.spawn("a");
    let b = cluster.spawn("b");
    settle(Duration::from_secs(1)).await;

    a.handle.award(4).await.unwrap();
    b.handle.start_match(60).await.unwrap();
    settle(Duration::from_millis(100)).await;
    assert!(a.handle.snapshot().game.match_clock.is_some());

    a.handle.reset_match().await.unwrap();
    settle(Duration::from_millis(100)).await;

    for node in [&a, &b] {
        let game = node.handle.snapshot().game;
        assert!(game.match_clock.is_none());
        assert!(game.players.is_empty());
    }
}
