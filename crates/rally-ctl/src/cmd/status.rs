//! Daemon status, peers, latency, shutdown commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    peer_id: String,
    display_name: String,
    active_peers: usize,
    average_latency_ms: Option<f64>,
    probe_success_ratio: f64,
    live_transfers: usize,
    chunk_size: u32,
    players: usize,
    match_running: bool,
}

#[derive(Deserialize)]
struct PeersResponse {
    peers: Vec<PeerInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerInfo {
    id: String,
    display_name: Option<String>,
    silent_ms: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatencyResponse {
    samples_ms: Vec<u64>,
    average_ms: Option<f64>,
    probes_sent: u64,
    echoes_received: u64,
    success_ratio: f64,
    outstanding: usize,
}

pub fn format_latency(average_ms: Option<f64>) -> String {
    match average_ms {
        Some(ms) => format!("{:.1} ms", ms),
        None => "n/a".to_string(),
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Rally Daemon Status");
    println!("═══════════════════════════════════════");
    println!("  Peer id          : {}", resp.peer_id);
    println!("  Display name     : {}", resp.display_name);
    println!("  Active peers     : {}", resp.active_peers);
    println!("  Average latency  : {}", format_latency(resp.average_latency_ms));
    println!("  Probe success    : {:.0}%", resp.probe_success_ratio * 100.0);
    println!("  Live transfers   : {}", resp.live_transfers);
    println!("  Chunk size       : {} bytes", resp.chunk_size);
    println!("  Players          : {}", resp.players);
    println!(
        "  Match            : {}",
        if resp.match_running { "running" } else { "idle" }
    );

    Ok(())
}

pub async fn cmd_peers(port: u16) -> Result<()> {
    let resp: PeersResponse = get_json(&format!("{}/peers", base_url(port))).await?;

    if resp.peers.is_empty() {
        println!("No peers heard yet.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Active Peers ({})", resp.peers.len());
    println!("═══════════════════════════════════════");

    for p in &resp.peers {
        println!("  ┌─ {}", p.id);
        if let Some(name) = &p.display_name {
            println!("  │  name      : {}", name);
        }
        println!("  └─ last seen : {:.1}s ago", p.silent_ms as f64 / 1000.0);
    }

    Ok(())
}

pub async fn cmd_latency(port: u16) -> Result<()> {
    let resp: LatencyResponse = get_json(&format!("{}/latency", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Latency");
    println!("═══════════════════════════════════════");
    println!("  Average      : {}", format_latency(resp.average_ms));
    println!(
        "  Echoes       : {}/{} ({:.0}%)",
        resp.echoes_received,
        resp.probes_sent,
        resp.success_ratio * 100.0
    );
    println!("  Outstanding  : {}", resp.outstanding);
    if !resp.samples_ms.is_empty() {
        let samples: Vec<String> = resp.samples_ms.iter().map(|s| s.to_string()).collect();
        println!("  Samples (ms) : {}", samples.join(", "));
    }

    Ok(())
}

pub async fn cmd_shutdown(port: u16) -> Result<()> {
    #[derive(Deserialize)]
    struct ShutdownResponse {
        message: String,
    }

    let resp: ShutdownResponse = post_json(&format!("{}/daemon/shutdown", base_url(port))).await?;
    println!("{}", resp.message);
    Ok(())
}
