//! hnp: GitOps reconciliation for Hedgehog fabric resources.
//!
//! **hnp is a daemonless, local-first reconciler for a fabric's GitOps
//! directory.** A fabric's desired state lives in a directory contract
//! (`raw/` inbox, `managed/<kind>/` buckets, `unmanaged/` quarantine,
//! `.hnp/` metadata), and hnp converges the inbox into that contract,
//! locally and against a GitHub-hosted mirror.
//!
//! # Core Principles
//!
//! - **Local-first**: the on-disk contract is the source of truth; the
//!   remote mirror follows it
//! - **Idempotent**: re-running any operation over a converged tree is a
//!   trivial success
//! - **Continue on error**: one bad inbox file never blocks the rest of a
//!   batch
//! - **Self-healing**: repair mode recreates a damaged contract; validate
//!   mode only reports
//!
//! # Architecture
//!
//! - [`core`]: error taxonomy, fabric configuration, directory-contract
//!   paths, document classifier, processing lock
//! - [`plugins`]: operation subsystems (structure, sync, remote, onboard,
//!   schedule, archive)
//!
//! All mutating operations serialize on the per-fabric
//! `.hnp/processing.lock`; validation-only operations run lock-free and
//! read-only. Different fabrics share nothing.
//!
//! # Examples
//!
//! ```bash
//! # Bring a directory under GitOps management
//! hnp init --id dc1 --name "DC1 fabric"
//!
//! # Dry-run health check of the contract
//! hnp validate
//!
//! # Converge the raw/ inbox
//! hnp sync
//!
//! # Mirror loose files on the remote through the same flow
//! hnp remote sync
//! ```

pub mod core;
pub mod plugins;

use core::{error, fabric::Fabric};
use plugins::{archive, onboard, remote, schedule, structure, sync};

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(
    name = "hnp",
    version = env!("CARGO_PKG_VERSION"),
    about = "GitOps reconciler for Hedgehog fabric resources"
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct SchemaCli {
    /// Optional: filter by subsystem name
    #[clap(long)]
    subsystem: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bring a directory under GitOps management
    #[clap(name = "init", visible_alias = "i")]
    Init(onboard::InitCli),

    /// Validate the directory contract (read-only)
    #[clap(name = "validate", visible_alias = "v")]
    Validate(structure::ValidateCli),

    /// Converge the raw/ inbox into managed/unmanaged
    #[clap(name = "sync", visible_alias = "s")]
    Sync(sync::SyncCli),

    /// Remote mirror operations
    #[clap(name = "remote", visible_alias = "r")]
    Remote(remote::RemoteCli),

    /// Scheduler handshake for externally driven periodic sync
    #[clap(name = "schedule")]
    Schedule(schedule::ScheduleCli),

    /// Archive-log access and integrity verification
    #[clap(name = "archive")]
    Archive(archive::ArchiveCli),

    /// Subsystem schemas and discovery
    #[clap(name = "schema")]
    Schema(SchemaCli),

    /// Show version information
    #[clap(name = "version")]
    Version,
}

/// Walk up from `start_dir` until a directory carrying `.hnp/` is found.
fn find_fgd_root(start_dir: &Path) -> Result<PathBuf, error::HnpError> {
    let mut current_dir = PathBuf::from(start_dir);
    loop {
        if current_dir.join(core::layout::META_DIR).exists() {
            return Ok(current_dir);
        }
        if !current_dir.pop() {
            return Err(error::HnpError::NotFound(
                "'.hnp' directory not found in current or parent directories. Run `hnp init` first."
                    .to_string(),
            ));
        }
    }
}

pub fn run() -> Result<(), error::HnpError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            // Simple output for scripts/parsing
            println!("v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Init(init_cli) => {
            onboard::run_init_cli(init_cli, &sync::AcceptAllSink)?;
            return Ok(());
        }
        Command::Schema(schema_cli) => {
            run_schema(schema_cli);
            return Ok(());
        }
        _ => {}
    }

    // Every remaining command operates on an existing fabric.
    let current_dir = std::env::current_dir().map_err(error::HnpError::IoError)?;
    let root = find_fgd_root(&current_dir)?;
    let fabric = Fabric::load(&root)?;
    let layout = fabric.layout();

    match cli.command {
        Command::Validate(validate_cli) => {
            structure::run_validate_cli(&fabric, &layout, validate_cli)?;
        }
        Command::Sync(sync_cli) => {
            sync::run_sync_cli(&fabric, &layout, sync_cli)?;
        }
        Command::Remote(remote_cli) => {
            remote::run_remote_cli(&fabric, &layout, &core::fabric::EnvCredentials, remote_cli)?;
        }
        Command::Schedule(schedule_cli) => {
            schedule::run_schedule_cli(&layout, schedule_cli)?;
        }
        Command::Archive(archive_cli) => {
            archive::run_archive_cli(&layout, archive_cli)?;
        }
        _ => unreachable!(),
    }
    Ok(())
}

fn run_schema(cli: SchemaCli) {
    let mut schemas = std::collections::BTreeMap::new();
    schemas.insert("structure", structure::schema());
    schemas.insert("sync", sync::schema());
    schemas.insert("remote", remote::schema());
    schemas.insert("onboard", onboard::schema());
    schemas.insert("schedule", schedule::schema());
    schemas.insert("archive", archive::schema());

    let output = if let Some(sub) = cli.subsystem {
        schemas
            .get(sub.as_str())
            .cloned()
            .unwrap_or(serde_json::json!({ "error": "subsystem not found" }))
    } else {
        serde_json::json!({
            "schema_version": "1.0.0",
            "subsystems": schemas
        })
    };
    println!("{}", serde_json::to_string_pretty(&output).unwrap());
}
