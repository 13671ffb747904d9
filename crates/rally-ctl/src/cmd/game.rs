//! Scoreboard and match commands.

use anyhow::Result;
use serde::Deserialize;
use serde_json::json;

use super::http::{base_url, get_json, post_json, post_json_body};

#[derive(Deserialize)]
struct GameResponse {
    #[serde(rename = "match")]
    match_view: Option<MatchView>,
    leaderboard: Vec<ScoreView>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchView {
    duration_seconds: u32,
    remaining_seconds: u64,
    running: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScoreView {
    peer: String,
    display_name: String,
    score: u64,
    present: bool,
    is_local: bool,
}

#[derive(Deserialize)]
struct ScoreResponse {
    score: u64,
}

#[derive(Deserialize)]
struct OkResponse {
    #[allow(dead_code)]
    ok: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchClock {
    duration_seconds: u32,
}

pub fn format_clock(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

pub async fn cmd_game(port: u16) -> Result<()> {
    let resp: GameResponse = get_json(&format!("{}/game", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Scoreboard");
    println!("═══════════════════════════════════════");

    match &resp.match_view {
        Some(m) if m.running => println!(
            "  Match : {} left of {}",
            format_clock(m.remaining_seconds),
            format_clock(m.duration_seconds as u64)
        ),
        Some(_) => println!("  Match : finished"),
        None => println!("  Match : not started"),
    }
    println!();

    if resp.leaderboard.is_empty() {
        println!("  No players yet.");
        return Ok(());
    }

    for (rank, entry) in resp.leaderboard.iter().enumerate() {
        let marker = if entry.is_local {
            "*"
        } else if entry.present {
            " "
        } else {
            "○"
        };
        println!(
            "  {:>2}. {} {:<20} {:>8}  ({})",
            rank + 1,
            marker,
            entry.display_name,
            entry.score,
            entry.peer
        );
    }

    Ok(())
}

pub async fn cmd_join(port: u16, display_name: &str) -> Result<()> {
    let _: OkResponse = post_json_body(
        &format!("{}/game/join", base_url(port)),
        &json!({ "displayName": display_name }),
    )
    .await?;
    println!("Joined as {}.", display_name);
    Ok(())
}

pub async fn cmd_score(port: u16, score: u64) -> Result<()> {
    let resp: ScoreResponse = post_json_body(
        &format!("{}/game/score", base_url(port)),
        &json!({ "score": score }),
    )
    .await?;
    println!("Score set to {}.", resp.score);
    Ok(())
}

pub async fn cmd_award(port: u16, points: u64) -> Result<()> {
    let resp: ScoreResponse = post_json_body(
        &format!("{}/game/award", base_url(port)),
        &json!({ "points": points }),
    )
    .await?;
    println!("+{} points, score is now {}.", points, resp.score);
    Ok(())
}

pub async fn cmd_match_start(port: u16, duration_seconds: u32) -> Result<()> {
    let resp: MatchClock = post_json_body(
        &format!("{}/game/match", base_url(port)),
        &json!({ "durationSeconds": duration_seconds }),
    )
    .await?;
    println!(
        "Match started: {} on the clock.",
        format_clock(resp.duration_seconds as u64)
    );
    Ok(())
}

pub async fn cmd_match_reset(port: u16) -> Result<()> {
    let _: OkResponse = post_json(&format!("{}/game/reset", base_url(port))).await?;
    println!("Scoreboard and match clock reset.");
    Ok(())
}
