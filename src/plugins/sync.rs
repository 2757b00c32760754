//! Local reconciler: converges the `raw/` inbox into the managed/unmanaged
//! split.
//!
//! One pass discovers inbox files oldest-first, classifies each
//! independently, quarantines rejects under `unmanaged/` with a sidecar
//! explaining why, and hands valid resources to the persistence collaborator
//! before filing them under `managed/<kind>/`. Every file is independent:
//! a bad file is routed, a failing file is recorded, and the batch keeps
//! going. Mutating passes hold the processing lock for their whole duration
//! and append a run record to the sync log; validation passes touch nothing.

use crate::core::classify::{self, ClassificationResult, ValidCr};
use crate::core::error::HnpError;
use crate::core::fabric::Fabric;
use crate::core::layout::FgdLayout;
use crate::core::lock::ProcessingLock;
use crate::core::time;
use crate::plugins::archive::{self, SyncRunRecord};
use crate::plugins::{schedule, structure};
use clap::Parser;
use rayon::prelude::*;
use regex::Regex;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

/// Bound for the per-file read+classify stage.
const MAX_SCAN_WORKERS: usize = 8;

/// The out-of-scope persistence collaborator: given a valid CR, create or
/// update the corresponding domain record. The reconciler calls this after
/// classification and treats a rejection as a per-file `PersistenceFailed`.
pub trait ResourceSink {
    fn apply(&self, cr: &ValidCr) -> Result<(), String>;
}

/// Default sink: accept everything and let the managed layout be the record.
pub struct AcceptAllSink;

impl ResourceSink for AcceptAllSink {
    fn apply(&self, _cr: &ValidCr) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CrSummary {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileAction {
    pub path: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub crs: Vec<CrSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ProcessingResult {
    pub success: bool,
    pub message: String,
    pub files_processed: usize,
    pub moved_to_unmanaged: usize,
    pub valid_crs_found: usize,
    pub invalid_files_found: usize,
    pub repairs_made: usize,
    pub actions: Vec<FileAction>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ProcessingResult {
    fn empty() -> Self {
        ProcessingResult {
            success: true,
            message: String::new(),
            files_processed: 0,
            moved_to_unmanaged: 0,
            valid_crs_found: 0,
            invalid_files_found: 0,
            repairs_made: 0,
            actions: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct RawFile {
    path: PathBuf,
    modified: SystemTime,
}

enum ScanOutcome {
    ReadError(String),
    YamlError { content: String, message: String },
    Classified { content: String, result: ClassificationResult },
}

/// Full mutating or validating pass over one fabric.
///
/// Mutating: acquire the lock, repair structure, process the inbox, append
/// the run record, stamp the scheduler handshake. Validation-only: process
/// with no lock and no writes.
pub fn run_sync(
    fabric: &Fabric,
    layout: &FgdLayout,
    sink: &dyn ResourceSink,
    validate_only: bool,
) -> Result<ProcessingResult, HnpError> {
    if validate_only {
        let mut result = process_raw_directory(fabric, layout, sink, true)?;
        result.message = summarize(&result, true);
        return Ok(result);
    }

    let _lock = ProcessingLock::acquire(layout, &fabric.id)?;
    let started_at = time::now_rfc3339();

    // Structure must be stable before any file moves.
    let repair = structure::validate_and_repair(fabric, layout, false)?;
    let mut result = process_raw_directory(fabric, layout, sink, false)?;
    result.repairs_made = repair.repairs.len();
    result.message = summarize(&result, false);

    archive::append_sync_record(
        layout,
        SyncRunRecord {
            run_id: time::new_run_id(),
            started_at,
            finished_at: time::now_rfc3339(),
            success: result.success,
            mode: "sync".to_string(),
            files_processed: result.files_processed,
            moved_to_unmanaged: result.moved_to_unmanaged,
            repairs_made: result.repairs_made,
            errors: result.errors.clone(),
        },
    )?;
    if result.success {
        schedule::record_run(layout)?;
    }

    Ok(result)
}

/// The raw-inbox state transition: discover, classify, route.
pub fn process_raw_directory(
    fabric: &Fabric,
    layout: &FgdLayout,
    sink: &dyn ResourceSink,
    validate_only: bool,
) -> Result<ProcessingResult, HnpError> {
    let mut result = ProcessingResult::empty();

    let raw = layout.raw_dir();
    if !raw.is_dir() {
        if validate_only {
            result.success = false;
            result
                .errors
                .push("raw/ directory does not exist".to_string());
            return Ok(result);
        }
        fs::create_dir_all(&raw).map_err(HnpError::IoError)?;
    }

    let files = discover_raw_files(&raw)?;
    if files.is_empty() {
        return Ok(result);
    }

    // Read + parse + classify is pure per file; fan it out on a bounded
    // pool, then replay decisions serially in mtime order.
    let api_group = fabric.api_group.clone();
    let workers = files.len().min(MAX_SCAN_WORKERS);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| HnpError::ValidationError(format!("worker pool: {}", e)))?;
    let outcomes: Vec<ScanOutcome> = pool.install(|| {
        files
            .par_iter()
            .map(|file| scan_file(&file.path, &api_group))
            .collect()
    });

    for (file, outcome) in files.iter().zip(outcomes) {
        result.files_processed += 1;
        let display = display_rel(layout, &file.path);

        match outcome {
            ScanOutcome::ReadError(message) => {
                result.success = false;
                result.errors.push(format!("{}: {}", display, message));
            }
            ScanOutcome::YamlError { content, message } => {
                let reason = format!("YAML parse error: {}", message);
                route_unmanaged(
                    layout,
                    &mut result,
                    &file.path,
                    &display,
                    &content,
                    reason,
                    validate_only,
                );
            }
            ScanOutcome::Classified { content, result: classification } => {
                if classification.valid_crs.is_empty() {
                    let reason = classification
                        .invalid_docs
                        .first()
                        .map(|d| d.reason.clone())
                        .unwrap_or_else(|| "no documents found".to_string());
                    route_unmanaged(
                        layout,
                        &mut result,
                        &file.path,
                        &display,
                        &content,
                        reason,
                        validate_only,
                    );
                } else {
                    ingest_file(
                        layout,
                        sink,
                        &mut result,
                        &file.path,
                        &display,
                        classification,
                        validate_only,
                    );
                }
            }
        }
    }

    Ok(result)
}

fn scan_file(path: &Path, api_group: &str) -> ScanOutcome {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => return ScanOutcome::ReadError(e.to_string()),
    };
    match classify::classify_content(&content, api_group) {
        Ok(result) => ScanOutcome::Classified { content, result },
        Err(HnpError::YamlInvalid(message)) => ScanOutcome::YamlError { content, message },
        Err(e) => ScanOutcome::ReadError(e.to_string()),
    }
}

fn route_unmanaged(
    layout: &FgdLayout,
    result: &mut ProcessingResult,
    path: &Path,
    display: &str,
    content: &str,
    reason: String,
    validate_only: bool,
) {
    result.invalid_files_found += 1;
    if validate_only {
        result.actions.push(FileAction {
            path: display.to_string(),
            action: "should move to unmanaged".to_string(),
            reason: Some(reason),
            crs: Vec::new(),
            warnings: Vec::new(),
        });
        return;
    }
    match quarantine_file(layout, path, content, &reason) {
        Ok(dest) => {
            result.moved_to_unmanaged += 1;
            result.actions.push(FileAction {
                path: display.to_string(),
                action: format!("moved to unmanaged ({})", display_rel(layout, &dest)),
                reason: Some(reason),
                crs: Vec::new(),
                warnings: Vec::new(),
            });
        }
        Err(e) => {
            result.success = false;
            result.errors.push(format!("{}: quarantine failed: {}", display, e));
        }
    }
}

fn ingest_file(
    layout: &FgdLayout,
    sink: &dyn ResourceSink,
    result: &mut ProcessingResult,
    path: &Path,
    display: &str,
    classification: ClassificationResult,
    validate_only: bool,
) {
    let crs: Vec<CrSummary> = classification
        .valid_crs
        .iter()
        .map(|cr| CrSummary {
            kind: cr.kind.kind_str().to_string(),
            name: cr.name.clone(),
            namespace: cr.namespace.clone(),
        })
        .collect();
    // A file carrying valid CRs is ingested; stray invalid documents inside
    // it surface as warnings rather than quarantining the whole file.
    let warnings: Vec<String> = classification
        .invalid_docs
        .iter()
        .map(|d| format!("document {} skipped: {}", d.index, d.reason))
        .collect();
    result.valid_crs_found += classification.valid_crs.len();
    result.warnings.extend(
        warnings
            .iter()
            .map(|w| format!("{}: {}", display, w)),
    );

    if validate_only {
        result.actions.push(FileAction {
            path: display.to_string(),
            action: "ready for ingestion".to_string(),
            reason: None,
            crs,
            warnings,
        });
        return;
    }

    let mut deferred = false;
    for cr in &classification.valid_crs {
        if let Err(e) = sink.apply(cr) {
            deferred = true;
            let err = HnpError::PersistenceFailed(format!(
                "{}/{}: {}",
                cr.kind.kind_str(),
                cr.name,
                e
            ));
            result.errors.push(format!("{}: {}", display, err));
            continue;
        }
        if let Err(e) = persist_managed(layout, path, cr) {
            deferred = true;
            result
                .errors
                .push(format!("{}: managed write failed: {}", display, e));
        }
    }

    if deferred {
        // Leave the raw file in place; the next pass retries it.
        result.success = false;
        result.actions.push(FileAction {
            path: display.to_string(),
            action: "deferred (persistence failed)".to_string(),
            reason: None,
            crs,
            warnings,
        });
        return;
    }

    if let Err(e) = fs::remove_file(path) {
        result.success = false;
        result
            .errors
            .push(format!("{}: cleanup failed: {}", display, e));
        return;
    }
    result.actions.push(FileAction {
        path: display.to_string(),
        action: "ready for ingestion".to_string(),
        reason: None,
        crs,
        warnings,
    });
}

/// Write one valid CR under `managed/<plural>/` and log the move. Same
/// resource, same file: re-ingesting overwrites (update semantics).
fn persist_managed(layout: &FgdLayout, source: &Path, cr: &ValidCr) -> Result<PathBuf, HnpError> {
    let dir = layout.managed_kind_dir(cr.kind);
    fs::create_dir_all(&dir).map_err(HnpError::IoError)?;

    let file_name = if cr.namespace == "default" {
        format!("{}.yaml", sanitize_name(&cr.name))
    } else {
        format!("{}--{}.yaml", sanitize_name(&cr.namespace), sanitize_name(&cr.name))
    };
    let dest = dir.join(file_name);

    let rendered = serde_yaml_ng::to_string(&cr.body)
        .map_err(|e| HnpError::ValidationError(format!("document render failed: {}", e)))?;
    fs::write(&dest, &rendered).map_err(HnpError::IoError)?;
    archive::append_archive_entry(layout, "ingest", source, &dest, &rendered)?;
    Ok(dest)
}

/// Quarantine a rejected file with a sidecar recording why. Never
/// overwrites: collisions get a numeric suffix before the extension.
pub fn quarantine_file(
    layout: &FgdLayout,
    source: &Path,
    content: &str,
    reason: &str,
) -> Result<PathBuf, HnpError> {
    let unmanaged = layout.unmanaged_dir();
    fs::create_dir_all(&unmanaged).map_err(HnpError::IoError)?;

    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unnamed.yaml".to_string());
    let dest = collision_free(&unmanaged, &file_name);

    move_file(source, &dest)?;

    let sidecar = Sidecar {
        reason: reason.to_string(),
        original_path: source.to_string_lossy().to_string(),
        content_hash: archive::hash_text(content),
        quarantined_at: time::now_rfc3339(),
    };
    let sidecar_path = sidecar_path_for(&dest);
    let rendered = serde_yaml_ng::to_string(&sidecar)
        .map_err(|e| HnpError::ValidationError(format!("sidecar render failed: {}", e)))?;
    fs::write(&sidecar_path, rendered).map_err(HnpError::IoError)?;

    archive::append_archive_entry(layout, "quarantine", source, &dest, content)?;
    Ok(dest)
}

#[derive(Debug, Serialize, serde::Deserialize)]
pub struct Sidecar {
    pub reason: String,
    pub original_path: String,
    pub content_hash: String,
    pub quarantined_at: String,
}

pub fn sidecar_path_for(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(".metadata");
    dest.with_file_name(name)
}

/// First free `<stem>-<n>.<ext>` name in `dir`, starting from the plain name.
pub fn collision_free(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{}", ext)),
        None => (file_name.to_string(), String::new()),
    };
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{}-{}{}", stem, n, ext));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Rename when possible; fall back to copy+remove so moves survive
/// network-mounted or cross-device paths.
pub fn move_file(source: &Path, dest: &Path) -> Result<(), HnpError> {
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    fs::copy(source, dest).map_err(HnpError::IoError)?;
    fs::remove_file(source).map_err(HnpError::IoError)?;
    Ok(())
}

fn sanitize_name(name: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());
    pattern.replace_all(name, "-").to_string()
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Recursive walk plus a non-recursive listing, de-duplicated, sorted by
/// modification time ascending (path as tie-break) for deterministic
/// oldest-first processing.
fn discover_raw_files(raw: &Path) -> Result<Vec<RawFile>, HnpError> {
    let mut seen: FxHashSet<PathBuf> = FxHashSet::default();
    let mut files = Vec::new();

    collect_recursive(raw, &mut seen, &mut files)?;
    for entry in fs::read_dir(raw).map_err(HnpError::IoError)? {
        let entry = entry.map_err(HnpError::IoError)?;
        let path = entry.path();
        if path.is_file() && is_yaml(&path) && seen.insert(path.clone()) {
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push(RawFile { path, modified });
        }
    }

    files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
    Ok(files)
}

fn collect_recursive(
    dir: &Path,
    seen: &mut FxHashSet<PathBuf>,
    files: &mut Vec<RawFile>,
) -> Result<(), HnpError> {
    for entry in fs::read_dir(dir).map_err(HnpError::IoError)? {
        let entry = entry.map_err(HnpError::IoError)?;
        let path = entry.path();
        if path.is_dir() {
            collect_recursive(&path, seen, files)?;
        } else if path.is_file() && is_yaml(&path) && seen.insert(path.clone()) {
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push(RawFile { path, modified });
        }
    }
    Ok(())
}

fn display_rel(layout: &FgdLayout, path: &Path) -> String {
    path.strip_prefix(layout.base())
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

fn summarize(result: &ProcessingResult, validate_only: bool) -> String {
    let verb = if validate_only { "would process" } else { "processed" };
    format!(
        "{} {} file(s): {} valid CR(s), {} moved to unmanaged, {} error(s)",
        verb,
        result.files_processed,
        result.valid_crs_found,
        result.moved_to_unmanaged,
        result.errors.len()
    )
}

#[derive(Parser, Debug)]
pub struct SyncCli {
    /// Report what a sync would do without moving anything.
    #[clap(long)]
    pub validate_only: bool,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

pub fn run_sync_cli(fabric: &Fabric, layout: &FgdLayout, cli: SyncCli) -> Result<(), HnpError> {
    let result = run_sync(fabric, layout, &AcceptAllSink, cli.validate_only)?;
    render_result(&result, &cli.format);
    if !result.success {
        return Err(HnpError::ValidationError(format!(
            "sync completed with {} error(s)",
            result.errors.len()
        )));
    }
    Ok(())
}

pub fn render_result(result: &ProcessingResult, format: &str) {
    use colored::Colorize;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(result).unwrap());
        return;
    }

    println!("{}", result.message);
    for action in &result.actions {
        match &action.reason {
            Some(reason) => println!("  {} {} — {}", "▸".yellow(), action.path, reason),
            None => {
                let names = action
                    .crs
                    .iter()
                    .map(|cr| format!("{}/{}", cr.kind, cr.name))
                    .collect::<Vec<_>>()
                    .join(", ");
                println!("  {} {} — {} [{}]", "▸".green(), action.path, action.action, names);
            }
        }
    }
    if !result.warnings.is_empty() {
        println!(
            "  {} {}",
            "⚠".yellow(),
            crate::core::output::preview_messages(&result.warnings, 3, 120)
        );
    }
    for error in &result.errors {
        println!("  {} {}", "✗".red(), error);
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "sync",
        "version": "0.1.0",
        "description": "Raw-inbox reconciliation into the managed/unmanaged split",
        "commands": [
            { "name": "sync", "parameters": ["validate_only", "format"] }
        ],
        "storage": ["raw/", "managed/", "unmanaged/", ".hnp/sync-log.yaml", ".hnp/archive-log.yaml"]
    })
}
