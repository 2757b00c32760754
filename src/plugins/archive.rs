//! Archive log and sync log: the audit trail of the contract.
//!
//! Archiving is an explicit log append plus a content hash, never a rename
//! trick: `.hnp/archive-log.yaml` records every migrate/ingest/quarantine
//! move with a SHA-256 of the content that moved, and `verify` recomputes
//! hashes against what is on disk today. `.hnp/sync-log.yaml` keeps the 50
//! most recent reconciliation runs.

use crate::core::error::HnpError;
use crate::core::layout::FgdLayout;
use crate::core::time;
use clap::{Parser, Subcommand};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

pub const SYNC_LOG_CAP: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRunRecord {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub success: bool,
    pub mode: String,
    pub files_processed: usize,
    pub moved_to_unmanaged: usize,
    pub repairs_made: usize,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub id: String,
    /// One of `migrate`, `ingest`, `quarantine`.
    pub op: String,
    pub source: String,
    pub dest: String,
    pub content_hash: String,
    pub ts: String,
}

pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text);
    format!("{:x}", hasher.finalize())
}

pub fn read_sync_log(layout: &FgdLayout) -> Result<Vec<SyncRunRecord>, HnpError> {
    let path = layout.sync_log_path();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(&path).map_err(HnpError::IoError)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml_ng::from_str(&content).map_err(|e| HnpError::YamlInvalid(e.to_string()))
}

/// Append one run record, keeping only the most recent [`SYNC_LOG_CAP`].
pub fn append_sync_record(layout: &FgdLayout, record: SyncRunRecord) -> Result<(), HnpError> {
    let mut records = read_sync_log(layout)?;
    records.push(record);
    if records.len() > SYNC_LOG_CAP {
        let drop = records.len() - SYNC_LOG_CAP;
        records.drain(..drop);
    }
    let rendered = serde_yaml_ng::to_string(&records)
        .map_err(|e| HnpError::ValidationError(format!("sync log render failed: {}", e)))?;
    fs::write(layout.sync_log_path(), rendered).map_err(HnpError::IoError)?;
    Ok(())
}

pub fn read_archive_log(layout: &FgdLayout) -> Result<Vec<ArchiveEntry>, HnpError> {
    let path = layout.archive_log_path();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(&path).map_err(HnpError::IoError)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml_ng::from_str(&content).map_err(|e| HnpError::YamlInvalid(e.to_string()))
}

/// Record one move. `source`/`dest` are stored relative to the fabric base
/// where possible so the log stays meaningful after the tree is relocated.
pub fn append_archive_entry(
    layout: &FgdLayout,
    op: &str,
    source: &Path,
    dest: &Path,
    content: &str,
) -> Result<(), HnpError> {
    let mut entries = read_archive_log(layout)?;
    entries.push(ArchiveEntry {
        id: time::new_run_id(),
        op: op.to_string(),
        source: relative_to_base(layout, source),
        dest: relative_to_base(layout, dest),
        content_hash: hash_text(content),
        ts: time::now_rfc3339(),
    });
    let rendered = serde_yaml_ng::to_string(&entries)
        .map_err(|e| HnpError::ValidationError(format!("archive log render failed: {}", e)))?;
    fs::write(layout.archive_log_path(), rendered).map_err(HnpError::IoError)?;
    Ok(())
}

fn relative_to_base(layout: &FgdLayout, path: &Path) -> String {
    path.strip_prefix(layout.base())
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

/// Integrity scan: for each destination, the latest entry's hash must match
/// the file on disk. A destination is exempt when a later entry moved it
/// onward (its source equals the destination), so an inbox file consumed by
/// ingestion is history, not a failure.
pub fn verify_archive(layout: &FgdLayout) -> Result<Vec<String>, HnpError> {
    let entries = read_archive_log(layout)?;
    let mut latest: FxHashMap<&str, (usize, &ArchiveEntry)> = FxHashMap::default();
    for (idx, entry) in entries.iter().enumerate() {
        latest.insert(entry.dest.as_str(), (idx, entry));
    }

    let mut failures = Vec::new();
    let mut dests: Vec<&&str> = latest.keys().collect();
    dests.sort();
    for dest in dests {
        let (idx, entry) = latest[*dest];
        let full = layout.base().join(&entry.dest);
        if !full.exists() {
            let moved_on = entries[idx + 1..].iter().any(|e| e.source == entry.dest);
            if !moved_on {
                failures.push(format!("archive {}: file missing at {}", entry.id, entry.dest));
            }
            continue;
        }
        let content = fs::read_to_string(&full).map_err(HnpError::IoError)?;
        if hash_text(&content) != entry.content_hash {
            failures.push(format!("archive {}: content hash mismatch at {}", entry.id, entry.dest));
        }
    }
    Ok(failures)
}

#[derive(Parser, Debug)]
pub struct ArchiveCli {
    #[clap(subcommand)]
    pub command: ArchiveCommand,
}

#[derive(Subcommand, Debug)]
pub enum ArchiveCommand {
    /// List archive-log entries
    List,
    /// Verify archive integrity (hashes and presence)
    Verify,
}

pub fn run_archive_cli(layout: &FgdLayout, cli: ArchiveCli) -> Result<(), HnpError> {
    match cli.command {
        ArchiveCommand::List => {
            let entries = read_archive_log(layout)?;
            println!("{}", serde_json::to_string_pretty(&entries).unwrap());
        }
        ArchiveCommand::Verify => {
            let failures = verify_archive(layout)?;
            if failures.is_empty() {
                println!("All archive entries verified successfully.");
            } else {
                println!("Archive verification failed:");
                for f in &failures {
                    println!("- {}", f);
                }
                return Err(HnpError::ValidationError(format!(
                    "{} archive entr{} failed verification",
                    failures.len(),
                    if failures.len() == 1 { "y" } else { "ies" }
                )));
            }
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "archive",
        "version": "0.1.0",
        "description": "Archive-log append and integrity verification",
        "commands": [
            { "name": "list", "description": "List archive-log entries" },
            { "name": "verify", "description": "Recompute content hashes against disk" }
        ],
        "storage": [".hnp/archive-log.yaml", ".hnp/sync-log.yaml"]
    })
}
