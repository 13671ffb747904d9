//! Transfer commands.

use anyhow::{Context, Result};
use serde::Deserialize;

use super::http::{base_url, delete_json, get_json, read_json};

#[derive(Deserialize)]
struct SendResponse {
    id: String,
    name: String,
    bytes: u64,
    chunks: u64,
}

#[derive(Deserialize)]
struct TransfersResponse {
    transfers: Vec<TransferView>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferView {
    id: String,
    direction: String,
    peer: String,
    name: String,
    byte_size: u64,
    total_chunks: u32,
    done_chunks: u32,
    progress: f64,
    state: String,
}

fn state_icon(state: &str) -> &'static str {
    match state {
        "complete" => "✓",
        "abandoned" => "✗",
        _ => "⋯",
    }
}

pub async fn cmd_send(port: u16, path: &str) -> Result<()> {
    use reqwest::multipart;

    let file_data =
        std::fs::read(path).with_context(|| format!("failed to read file: {}", path))?;

    let filename = std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file")
        .to_string();

    let form = multipart::Form::new().part(
        "file",
        multipart::Part::bytes(file_data).file_name(filename),
    );

    let url = format!("{}/transfers", base_url(port));
    let resp = reqwest::Client::new()
        .post(&url)
        .multipart(form)
        .send()
        .await
        .context("failed to send file to daemon")?;
    let resp: SendResponse = read_json(resp).await?;

    println!("File queued for broadcast:");
    println!("  Id       : {}", resp.id);
    println!("  Filename : {}", resp.name);
    println!("  Bytes    : {}", resp.bytes);
    println!("  Chunks   : {}", resp.chunks);

    Ok(())
}

pub async fn cmd_transfers(port: u16) -> Result<()> {
    let resp: TransfersResponse = get_json(&format!("{}/transfers", base_url(port))).await?;

    if resp.transfers.is_empty() {
        println!("No transfers yet.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Transfers ({})", resp.transfers.len());
    println!("═══════════════════════════════════════");

    for t in &resp.transfers {
        println!("  ┌─ {} {}", state_icon(&t.state), t.name);
        println!("  │  id        : {}", t.id);
        println!("  │  direction : {} ({})", t.direction, t.peer);
        println!("  │  size      : {} bytes", t.byte_size);
        println!(
            "  └─ progress  : {}/{} chunks ({:.0}%), {}",
            t.done_chunks,
            t.total_chunks,
            t.progress * 100.0,
            t.state
        );
    }

    Ok(())
}

pub async fn cmd_cancel(port: u16, id: &str) -> Result<()> {
    let resp: TransferView = delete_json(&format!("{}/transfers/{}", base_url(port), id)).await?;
    println!(
        "Cancelled {} after {}/{} chunks.",
        resp.name, resp.done_chunks, resp.total_chunks
    );
    Ok(())
}
