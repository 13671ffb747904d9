//! Writes completed inbound transfers to the storage directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};

use rally_services::{safe_file_name, CompletedTransfer};

pub async fn sink_loop(
    mut deliveries: mpsc::Receiver<CompletedTransfer>,
    dir: PathBuf,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    tracing::info!(path = %dir.display(), "transfer sink ready");

    loop {
        tokio::select! {
            _ = shutdown.recv() => return Ok(()),

            done = deliveries.recv() => match done {
                Some(done) => store(&dir, done).await,
                None => return Ok(()),
            },
        }
    }
}

async fn store(dir: &Path, done: CompletedTransfer) {
    let path = unique_path(dir, &safe_file_name(&done.metadata.name));
    match tokio::fs::write(&path, &done.payload).await {
        Ok(()) => tracing::info!(
            transfer = %done.id,
            peer = %done.peer,
            path = %path.display(),
            bytes = done.payload.len(),
            "received payload stored"
        ),
        Err(e) => tracing::warn!(
            transfer = %done.id,
            path = %path.display(),
            error = %e,
            "failed to store received payload"
        ),
    }
}

/// `dir/name`, or `dir/stem-N.ext` for the first N not already taken.
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    (1u32..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{stem}-{n}.{ext}")),
            None => dir.join(format!("{stem}-{n}")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
