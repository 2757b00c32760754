//! Structure validator/repairer for the directory contract.
//!
//! Validation is a read-only health check: a missing directory is an error
//! and the result is invalid. Repair is self-healing: the same gap is created
//! on the spot and recorded as a repair note, never an error. Missing
//! metadata files (`manifest.yaml`, the logs, the scheduler config) are only
//! warnings in validate mode and are regenerated in repair mode.

use crate::core::error::HnpError;
use crate::core::fabric::Fabric;
use crate::core::layout::{FgdLayout, Manifest};
use crate::plugins::schedule;
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub repairs: Vec<String>,
}

impl ValidationResult {
    fn new() -> Self {
        ValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            repairs: Vec::new(),
        }
    }
}

/// Check (and in repair mode, restore) the directory contract. Idempotent:
/// a second repair pass over an intact tree reports zero repairs.
pub fn validate_and_repair(
    fabric: &Fabric,
    layout: &FgdLayout,
    validate_only: bool,
) -> Result<ValidationResult, HnpError> {
    let mut result = ValidationResult::new();

    for dir in layout.required_dirs() {
        if dir.is_dir() {
            continue;
        }
        let rel = display_rel(layout, &dir);
        if validate_only {
            result.errors.push(format!("missing directory: {}", rel));
            result.valid = false;
        } else {
            fs::create_dir_all(&dir).map_err(HnpError::IoError)?;
            result.repairs.push(format!("created directory: {}", rel));
        }
    }

    if !layout.manifest_path().is_file() {
        if validate_only {
            result
                .warnings
                .push("missing manifest: .hnp/manifest.yaml".to_string());
        } else {
            Manifest::for_fabric(fabric).write(layout)?;
            result
                .repairs
                .push("generated manifest: .hnp/manifest.yaml".to_string());
        }
    }

    for (label, path) in [
        ("sync log", layout.sync_log_path()),
        ("archive log", layout.archive_log_path()),
    ] {
        if path.is_file() {
            continue;
        }
        let rel = display_rel(layout, &path);
        if validate_only {
            result.warnings.push(format!("missing {}: {}", label, rel));
        } else {
            fs::write(&path, "[]\n").map_err(HnpError::IoError)?;
            result.repairs.push(format!("created {}: {}", label, rel));
        }
    }

    if !layout.periodic_sync_path().is_file() {
        if validate_only {
            result
                .warnings
                .push("missing scheduler config: .hnp/periodic-sync.yaml".to_string());
        } else {
            schedule::write_config(layout, &schedule::PeriodicSyncConfig::default())?;
            result
                .repairs
                .push("created scheduler config: .hnp/periodic-sync.yaml".to_string());
        }
    }

    Ok(result)
}

fn display_rel(layout: &FgdLayout, path: &Path) -> String {
    path.strip_prefix(layout.base())
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

#[derive(Parser, Debug)]
pub struct ValidateCli {
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

pub fn run_validate_cli(
    fabric: &Fabric,
    layout: &FgdLayout,
    cli: ValidateCli,
) -> Result<(), HnpError> {
    let result = validate_and_repair(fabric, layout, true)?;

    if cli.format == "json" {
        println!("{}", serde_json::to_string_pretty(&result).unwrap());
    } else {
        println!("Fabric '{}' — structure validation\n", fabric.name);
        for e in &result.errors {
            println!("  [FAIL] {}", e);
        }
        for w in &result.warnings {
            println!("  [WARN] {}", w);
        }
        if result.errors.is_empty() && result.warnings.is_empty() {
            println!("  [PASS] directory contract intact");
        }
        println!(
            "\nSummary: {} error(s), {} warning(s)",
            result.errors.len(),
            result.warnings.len()
        );
    }

    if !result.valid {
        return Err(HnpError::StructureMissing(format!(
            "validation failed with {} error(s)",
            result.errors.len()
        )));
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "structure",
        "version": "0.1.0",
        "description": "Directory-contract validation and self-healing repair",
        "commands": [
            { "name": "validate", "description": "Read-only contract health check", "parameters": ["format"] }
        ],
        "storage": ["raw/", "managed/", "unmanaged/", ".hnp/"]
    })
}
