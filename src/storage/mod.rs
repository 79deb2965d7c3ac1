//! Persistence layer.
//!
//! - Checkpoint: `{ledger, hash, timestamp}` JSON file, rewritten after
//!   every processed bet.
//! - `paid`: SQLite ledger of bets whose payout was dispatched.

pub mod paid;

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, error, info};

use crate::types::Checkpoint;

/// Default checkpoint file path.
pub const DEFAULT_CHECKPOINT_FILE: &str = "checkpoint.json";

/// Save the checkpoint. Written to a sibling temp file and renamed so a
/// crash mid-write never leaves a truncated checkpoint.
pub fn save_checkpoint(checkpoint: &Checkpoint, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_CHECKPOINT_FILE);
    let json = serde_json::to_string_pretty(checkpoint)
        .context("Failed to serialise checkpoint")?;

    let tmp = format!("{path}.tmp");
    std::fs::write(&tmp, &json)
        .with_context(|| format!("Failed to write checkpoint to {tmp}"))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move checkpoint into {path}"))?;

    debug!(path, ledger = checkpoint.ledger_index, hash = %checkpoint.tx_hash, "Checkpoint saved");
    Ok(())
}

/// Load the checkpoint. A missing file is a first run: a zero checkpoint
/// is written immediately and returned, even if that write fails. A file
/// that exists but cannot be read or parsed is an error.
pub fn load_checkpoint(path: Option<&str>) -> Result<Checkpoint> {
    let path = path.unwrap_or(DEFAULT_CHECKPOINT_FILE);

    if !Path::new(path).exists() {
        info!(path, "No checkpoint found, starting from the earliest ledger");
        let checkpoint = Checkpoint::zero();
        if let Err(e) = save_checkpoint(&checkpoint, Some(path)) {
            error!(path, error = ?e, "Failed to persist initial checkpoint");
        }
        return Ok(checkpoint);
    }

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read checkpoint from {path}"))?;

    let checkpoint: Checkpoint = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse checkpoint from {path}"))?;

    info!(
        path,
        ledger = checkpoint.ledger_index,
        hash = %checkpoint.tx_hash,
        saved_at = %checkpoint.timestamp_utc(),
        "Checkpoint loaded"
    );

    Ok(checkpoint)
}

/// Delete the checkpoint file (for testing or reset).
pub fn delete_checkpoint(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_CHECKPOINT_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to delete checkpoint file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
