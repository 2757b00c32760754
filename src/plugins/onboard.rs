//! Onboarding orchestrator: brings a fabric directory under GitOps
//! management.
//!
//! A linear state machine with no back-edges:
//! `NotInitialized → StructureEnsured → ExistingFilesMigrated → RawProcessed
//! → ManifestsWritten → RemoteMirrored(optional) → FabricConfigPersisted`.
//! Local steps are all-or-nothing: the first failure aborts the remaining
//! transitions and the partial result carries `error`. The remote step is
//! isolated: its failure lands in `github_push_error` and does not block
//! persisting the config, since the local tree is fully built at that point
//! and later `remote sync` passes retry the mirror.

use crate::core::error::HnpError;
use crate::core::fabric::Fabric;
use crate::core::layout::{FgdLayout, Manifest};
use crate::core::lock::ProcessingLock;
use crate::core::time;
use crate::plugins::archive::{self, SyncRunRecord};
use crate::plugins::remote::RemoteProvider;
use crate::plugins::structure;
use crate::plugins::sync::{self, ResourceSink};
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_ARCHIVE_STRATEGY: &str = "content-hash";

#[derive(Debug, Serialize)]
pub struct OnboardingResult {
    pub success: bool,
    pub message: String,
    pub steps_completed: Vec<String>,
    pub files_migrated: usize,
    pub files_processed: usize,
    pub moved_to_unmanaged: usize,
    pub repairs_made: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_push_error: Option<String>,
    pub initialized: bool,
}

impl OnboardingResult {
    fn new() -> Self {
        OnboardingResult {
            success: false,
            message: String::new(),
            steps_completed: Vec::new(),
            files_migrated: 0,
            files_processed: 0,
            moved_to_unmanaged: 0,
            repairs_made: 0,
            error: None,
            github_push_error: None,
            initialized: false,
        }
    }

    fn fail(mut self, step: &str, err: &HnpError) -> Self {
        self.error = Some(format!("{}: {}", step, err));
        self.message = format!("onboarding aborted at {}", step);
        self
    }
}

/// Run the full onboarding chain. Rejected outright when the fabric is
/// already initialized and `force` is not set; lock contention is likewise
/// fatal. Step failures return the partial result instead.
pub fn onboard(
    fabric: &mut Fabric,
    sink: &dyn ResourceSink,
    remote_provider: Option<&dyn RemoteProvider>,
    force: bool,
) -> Result<OnboardingResult, HnpError> {
    if fabric.gitops_initialized && !force {
        return Err(HnpError::ValidationError(format!(
            "fabric '{}' is already initialized (use --force to re-run onboarding)",
            fabric.name
        )));
    }

    let layout = fabric.layout();
    let _lock = ProcessingLock::acquire(&layout, &fabric.id)?;
    let started_at = time::now_rfc3339();
    let mut result = OnboardingResult::new();

    // StructureEnsured
    let repair = match structure::validate_and_repair(fabric, &layout, false) {
        Ok(repair) => repair,
        Err(e) => return Ok(result.fail("StructureEnsured", &e)),
    };
    result.repairs_made = repair.repairs.len();
    result.steps_completed.push("StructureEnsured".to_string());

    // ExistingFilesMigrated
    match migrate_existing_files(&layout) {
        Ok(migrated) => result.files_migrated = migrated,
        Err(e) => return Ok(result.fail("ExistingFilesMigrated", &e)),
    }
    result
        .steps_completed
        .push("ExistingFilesMigrated".to_string());

    // RawProcessed
    match sync::process_raw_directory(fabric, &layout, sink, false) {
        Ok(processed) => {
            result.files_processed = processed.files_processed;
            result.moved_to_unmanaged = processed.moved_to_unmanaged;
            if !processed.success {
                let joined = processed.errors.join("; ");
                return Ok(result.fail(
                    "RawProcessed",
                    &HnpError::ValidationError(joined),
                ));
            }
        }
        Err(e) => return Ok(result.fail("RawProcessed", &e)),
    }
    result.steps_completed.push("RawProcessed".to_string());

    // ManifestsWritten: regenerate so the manifest reflects this fabric's
    // identity even when repair found one already present.
    if let Err(e) = Manifest::for_fabric(fabric).write(&layout) {
        return Ok(result.fail("ManifestsWritten", &e));
    }
    result.steps_completed.push("ManifestsWritten".to_string());

    // RemoteMirrored (optional, isolated)
    if fabric.remote.is_some() {
        if let Some(provider) = remote_provider {
            match crate::plugins::remote::push_structure(fabric, provider) {
                Ok(_) => result.steps_completed.push("RemoteMirrored".to_string()),
                Err(e) => result.github_push_error = Some(e.to_string()),
            }
        }
    }

    // FabricConfigPersisted
    fabric.mark_initialized(DEFAULT_ARCHIVE_STRATEGY);
    if let Err(e) = fabric.persist() {
        fabric.gitops_initialized = false;
        return Ok(result.fail("FabricConfigPersisted", &e));
    }
    result
        .steps_completed
        .push("FabricConfigPersisted".to_string());

    result.success = true;
    result.initialized = true;
    result.message = format!(
        "fabric '{}' initialized: {} file(s) migrated, {} processed, {} quarantined",
        fabric.name, result.files_migrated, result.files_processed, result.moved_to_unmanaged
    );

    let _ = archive::append_sync_record(
        &layout,
        SyncRunRecord {
            run_id: time::new_run_id(),
            started_at,
            finished_at: time::now_rfc3339(),
            success: true,
            mode: "onboard".to_string(),
            files_processed: result.files_processed,
            moved_to_unmanaged: result.moved_to_unmanaged,
            repairs_made: result.repairs_made,
            errors: Vec::new(),
        },
    );

    Ok(result)
}

/// Pre-existing loose YAML directly under the base path moves into `raw/`
/// with collision-safe names and an archive-log record per file.
fn migrate_existing_files(layout: &FgdLayout) -> Result<usize, HnpError> {
    let raw = layout.raw_dir();
    let mut migrated = 0;

    for entry in fs::read_dir(layout.base()).map_err(HnpError::IoError)? {
        let entry = entry.map_err(HnpError::IoError)?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        if !(name.ends_with(".yaml") || name.ends_with(".yml")) {
            continue;
        }
        let content = fs::read_to_string(&path).map_err(HnpError::IoError)?;
        let dest = sync::collision_free(&raw, &name);
        sync::move_file(&path, &dest)?;
        archive::append_archive_entry(layout, "migrate", &path, &dest, &content)?;
        migrated += 1;
    }

    Ok(migrated)
}

#[derive(Parser, Debug)]
pub struct InitCli {
    /// Directory to initialize (defaults to current working directory).
    #[clap(short, long)]
    pub dir: Option<PathBuf>,
    /// Stable fabric identifier (defaults to the directory name).
    #[clap(long)]
    pub id: Option<String>,
    /// Human-readable fabric name (defaults to the identifier).
    #[clap(long)]
    pub name: Option<String>,
    /// Re-run onboarding on an already-initialized fabric.
    #[clap(long)]
    pub force: bool,
}

pub fn run_init_cli(cli: InitCli, sink: &dyn ResourceSink) -> Result<(), HnpError> {
    use colored::Colorize;

    let base = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir().map_err(HnpError::IoError)?,
    };
    let base = fs::canonicalize(&base).map_err(HnpError::IoError)?;

    let layout = FgdLayout::new(&base);
    let mut fabric = if layout.config_path().exists() {
        Fabric::load(&base)?
    } else {
        let fallback = base
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "fabric".to_string());
        let id = cli.id.clone().unwrap_or_else(|| fallback.clone());
        let name = cli.name.clone().unwrap_or_else(|| id.clone());
        Fabric::new(&base, &id, &name)
    };
    if let Some(id) = cli.id {
        fabric.id = id;
    }
    if let Some(name) = cli.name {
        fabric.name = name;
    }

    if fabric.gitops_initialized && !cli.force {
        println!(
            "{} fabric '{}' is already initialized",
            "⚠".bright_yellow(),
            fabric.name
        );
        println!(
            "  {} use {} to re-run onboarding",
            "▸".bright_yellow(),
            "--force".bright_cyan().bold()
        );
        return Ok(());
    }

    println!(
        "{} {}",
        "▸ onboarding fabric".bright_cyan(),
        fabric.name.bright_white().bold()
    );
    println!();

    // Remote mirroring during init uses the real provider; tests drive
    // `onboard` directly with an in-memory one.
    let result = match &fabric.remote {
        Some(remote) => {
            let client =
                crate::plugins::remote::GitHubClient::new(remote, &crate::core::fabric::EnvCredentials)?;
            onboard(&mut fabric, sink, Some(&client), cli.force)?
        }
        None => onboard(&mut fabric, sink, None, cli.force)?,
    };

    for step in &result.steps_completed {
        println!("    {} {}", "●".bright_green(), step.bright_white());
    }
    if let Some(error) = &result.error {
        println!("    {} {}", "✗".bright_red(), error);
    }
    if let Some(push_error) = &result.github_push_error {
        println!(
            "    {} remote mirror failed (will retry on `hnp remote sync`): {}",
            "⚠".bright_yellow(),
            push_error
        );
    }
    println!();
    println!("{}", result.message);

    if !result.success {
        return Err(HnpError::ValidationError(
            result
                .error
                .unwrap_or_else(|| "onboarding failed".to_string()),
        ));
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "onboard",
        "version": "0.1.0",
        "description": "Linear onboarding chain from bare directory to initialized fabric",
        "commands": [
            { "name": "init", "parameters": ["dir", "id", "name", "force"] }
        ],
        "storage": [".hnp/config.toml", ".hnp/manifest.yaml", ".hnp/archive-log.yaml"]
    })
}
