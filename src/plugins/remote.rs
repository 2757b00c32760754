//! Remote mirror: the same inbox discipline against a Git-hosted copy.
//!
//! The provider surface is four stateless content-API calls behind the
//! [`RemoteProvider`] trait; [`GitHubClient`] is the production
//! implementation and tests substitute an in-memory one. A 404 on a listing
//! means "no remote structure yet" and comes back as an empty list, never an
//! error. Calls carry a 30 s timeout and are not retried here; retry/backoff
//! belongs to whatever scheduler drives the sync.

use crate::core::classify;
use crate::core::error::HnpError;
use crate::core::fabric::{CredentialProvider, Credentials, Fabric, RemoteConfig};
use crate::core::layout::{FgdLayout, Manifest, MANAGED_DIR, RAW_DIR, UNMANAGED_DIR};
use crate::core::lock::ProcessingLock;
use crate::core::time;
use crate::plugins::archive::{self, SyncRunRecord};
use crate::plugins::structure;
use crate::plugins::sync::{self, ResourceSink};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::time::Duration;

pub const HTTP_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    pub entry_type: String,
    pub sha: String,
}

#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub content: String,
    pub sha: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    /// Creation-only call against an existing file: idempotent no-op.
    SkippedExisting,
}

/// Provider-agnostic content-API surface.
pub trait RemoteProvider {
    fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>, HnpError>;
    fn read_file(&self, path: &str) -> Result<Option<RemoteFile>, HnpError>;
    fn write_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        expected_sha: Option<&str>,
    ) -> Result<WriteOutcome, HnpError>;
    fn delete_file(&self, path: &str, sha: &str, message: &str) -> Result<(), HnpError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryAnalysis {
    pub yaml_files: Vec<String>,
    pub other_files: Vec<String>,
    pub subdirectories: Vec<String>,
}

/// Pure read classifying a directory's immediate children by suffix/type.
pub fn analyze_directory(
    provider: &dyn RemoteProvider,
    path: &str,
) -> Result<DirectoryAnalysis, HnpError> {
    let mut analysis = DirectoryAnalysis {
        yaml_files: Vec::new(),
        other_files: Vec::new(),
        subdirectories: Vec::new(),
    };
    for entry in provider.list_directory(path)? {
        if entry.entry_type == "dir" {
            analysis.subdirectories.push(entry.name);
        } else if entry.name.ends_with(".yaml") || entry.name.ends_with(".yml") {
            analysis.yaml_files.push(entry.name);
        } else {
            analysis.other_files.push(entry.name);
        }
    }
    Ok(analysis)
}

/// GitHub contents-API client. Stateless over HTTP; one commit per write.
pub struct GitHubClient {
    agent: ureq::Agent,
    remote: RemoteConfig,
    credentials: Option<Credentials>,
}

impl GitHubClient {
    pub fn new(
        remote: &RemoteConfig,
        credentials: &dyn CredentialProvider,
    ) -> Result<Self, HnpError> {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(HTTP_TIMEOUT_SECONDS)))
            .http_status_as_error(false)
            .build();
        Ok(GitHubClient {
            agent: ureq::Agent::new_with_config(config),
            remote: remote.clone(),
            credentials: credentials.credentials(remote)?,
        })
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.remote.url.trim_end_matches('/'),
            self.remote.owner,
            self.remote.repo,
            path.trim_matches('/')
        )
    }

    fn auth_header(&self) -> Option<String> {
        match &self.credentials {
            Some(Credentials::Token(token)) => Some(format!("Bearer {}", token)),
            Some(Credentials::Basic { username, password }) => Some(format!(
                "Basic {}",
                BASE64.encode(format!("{}:{}", username, password))
            )),
            None => None,
        }
    }

    fn get(&self, url: &str) -> Result<ureq::http::Response<ureq::Body>, HnpError> {
        let mut request = self
            .agent
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", concat!("hnp/", env!("CARGO_PKG_VERSION")));
        if let Some(auth) = self.auth_header() {
            request = request.header("Authorization", &auth);
        }
        request
            .call()
            .map_err(|e| HnpError::RemoteUnavailable(e.to_string()))
    }

    fn send_json(
        &self,
        method: &str,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<ureq::http::Response<ureq::Body>, HnpError> {
        let request = match method {
            "PUT" => self.agent.put(url),
            _ => self.agent.delete(url).force_send_body(),
        };
        let mut request = request
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", concat!("hnp/", env!("CARGO_PKG_VERSION")));
        if let Some(auth) = self.auth_header() {
            request = request.header("Authorization", &auth);
        }
        request
            .send_json(payload)
            .map_err(|e| HnpError::RemoteUnavailable(e.to_string()))
    }

    fn read_body(res: &mut ureq::http::Response<ureq::Body>) -> Result<serde_json::Value, HnpError> {
        let text = res
            .body_mut()
            .read_to_string()
            .map_err(|e| HnpError::RemoteUnavailable(e.to_string()))?;
        serde_json::from_str(&text)
            .map_err(|e| HnpError::RemoteUnavailable(format!("malformed provider response: {}", e)))
    }

    fn fail(&self, context: &str, status: u16) -> HnpError {
        match status {
            401 => HnpError::RemoteUnavailable(format!(
                "{}: authentication failed (check {})",
                context, self.remote.token_env
            )),
            403 | 429 => {
                HnpError::RemoteUnavailable(format!("{}: rate limited or forbidden", context))
            }
            _ => HnpError::RemoteUnavailable(format!("{}: HTTP {}", context, status)),
        }
    }
}

impl RemoteProvider for GitHubClient {
    fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>, HnpError> {
        let url = format!("{}?ref={}", self.contents_url(path), self.remote.branch);
        let mut res = self.get(&url)?;
        let status = res.status().as_u16();
        if status == 404 {
            return Ok(Vec::new());
        }
        if !(200..300).contains(&status) {
            return Err(self.fail(&format!("list {}", path), status));
        }
        let body = Self::read_body(&mut res)?;
        let items = match body {
            serde_json::Value::Array(items) => items,
            // Listing a file path yields a single object.
            other => vec![other],
        };
        Ok(items
            .iter()
            .map(|item| RemoteEntry {
                name: json_str(item, "name"),
                path: json_str(item, "path"),
                entry_type: json_str(item, "type"),
                sha: json_str(item, "sha"),
            })
            .collect())
    }

    fn read_file(&self, path: &str) -> Result<Option<RemoteFile>, HnpError> {
        let url = format!("{}?ref={}", self.contents_url(path), self.remote.branch);
        let mut res = self.get(&url)?;
        let status = res.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        if !(200..300).contains(&status) {
            return Err(self.fail(&format!("read {}", path), status));
        }
        let body = Self::read_body(&mut res)?;
        let sha = json_str(&body, "sha");
        let raw = json_str(&body, "content");
        let content = if json_str(&body, "encoding") == "base64" {
            let packed: String = raw.split_whitespace().collect();
            let bytes = BASE64
                .decode(packed)
                .map_err(|e| HnpError::RemoteUnavailable(format!("bad base64 for {}: {}", path, e)))?;
            String::from_utf8_lossy(&bytes).to_string()
        } else {
            raw
        };
        Ok(Some(RemoteFile { content, sha }))
    }

    fn write_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        expected_sha: Option<&str>,
    ) -> Result<WriteOutcome, HnpError> {
        // Creation-only calls skip silently when the file already exists.
        if expected_sha.is_none() && self.read_file(path)?.is_some() {
            return Ok(WriteOutcome::SkippedExisting);
        }

        let mut payload = serde_json::json!({
            "message": message,
            "content": BASE64.encode(content),
            "branch": self.remote.branch,
        });
        if let Some(sha) = expected_sha {
            payload["sha"] = serde_json::Value::String(sha.to_string());
        }

        let res = self.send_json("PUT", &self.contents_url(path), &payload)?;
        match res.status().as_u16() {
            200 => Ok(WriteOutcome::Updated),
            201 => Ok(WriteOutcome::Created),
            status => Err(self.fail(&format!("write {}", path), status)),
        }
    }

    fn delete_file(&self, path: &str, sha: &str, message: &str) -> Result<(), HnpError> {
        let payload = serde_json::json!({
            "message": message,
            "sha": sha,
            "branch": self.remote.branch,
        });
        let res = self.send_json("DELETE", &self.contents_url(path), &payload)?;
        let status = res.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(());
        }
        Err(self.fail(&format!("delete {}", path), status))
    }
}

fn json_str(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Serialize)]
pub struct RemoteSyncResult {
    pub success: bool,
    pub message: String,
    pub files_found: usize,
    pub relocated_to_raw: usize,
    pub relocated_to_unmanaged: usize,
    pub local_files_processed: usize,
    pub local_valid_crs: usize,
    pub local_moved_to_unmanaged: usize,
    pub actions: Vec<RemoteAction>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteAction {
    pub path: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Mirror the local inbox flow against the remote, one file at a time:
/// loose YAML at the configured scan path is downloaded, dropped into local
/// `raw/`, reconciled locally, then relocated server-side into `raw/` or
/// `unmanaged/` with the root copy deleted. Repeated runs are idempotent:
/// a relocated file is no longer loose.
pub fn sync_remote(
    fabric: &Fabric,
    layout: &FgdLayout,
    provider: &dyn RemoteProvider,
    sink: &dyn ResourceSink,
    validate_only: bool,
) -> Result<RemoteSyncResult, HnpError> {
    let remote = fabric.remote.as_ref().ok_or_else(|| {
        HnpError::ConfigError("no [remote] repository configured for this fabric".to_string())
    })?;

    let mut result = RemoteSyncResult {
        success: true,
        message: String::new(),
        files_found: 0,
        relocated_to_raw: 0,
        relocated_to_unmanaged: 0,
        local_files_processed: 0,
        local_valid_crs: 0,
        local_moved_to_unmanaged: 0,
        actions: Vec::new(),
        errors: Vec::new(),
    };

    let scan_path = remote.prefixed(&remote.scan_path);
    let mut loose: Vec<RemoteEntry> = provider
        .list_directory(&scan_path)?
        .into_iter()
        .filter(|e| {
            e.entry_type == "file" && (e.name.ends_with(".yaml") || e.name.ends_with(".yml"))
        })
        .collect();
    loose.sort_by(|a, b| a.name.cmp(&b.name));
    result.files_found = loose.len();

    if loose.is_empty() {
        result.message = "no loose remote files found".to_string();
        return Ok(result);
    }

    let lock = if validate_only {
        None
    } else {
        Some(ProcessingLock::acquire(layout, &fabric.id)?)
    };
    if !validate_only {
        structure::validate_and_repair(fabric, layout, false)?;
    }
    let started_at = time::now_rfc3339();

    for entry in &loose {
        match mirror_one(fabric, layout, provider, remote, entry, validate_only) {
            Ok(action) => {
                match action.action.as_str() {
                    a if a.contains("to unmanaged/") => result.relocated_to_unmanaged += 1,
                    a if a.contains("to raw/") => result.relocated_to_raw += 1,
                    _ => {}
                }
                result.actions.push(action);
            }
            Err(e) => {
                result.success = false;
                result.errors.push(format!("{}: {}", entry.path, e));
            }
        }
    }

    if !validate_only {
        // Local counts come from one consolidated pass after downloads.
        let local = sync::process_raw_directory(fabric, layout, sink, false)?;
        result.local_files_processed = local.files_processed;
        result.local_valid_crs = local.valid_crs_found;
        result.local_moved_to_unmanaged = local.moved_to_unmanaged;
        if !local.success {
            result.success = false;
            result.errors.extend(local.errors);
        }

        archive::append_sync_record(
            layout,
            SyncRunRecord {
                run_id: time::new_run_id(),
                started_at,
                finished_at: time::now_rfc3339(),
                success: result.success,
                mode: "remote-sync".to_string(),
                files_processed: result.files_found,
                moved_to_unmanaged: result.relocated_to_unmanaged,
                repairs_made: 0,
                errors: result.errors.clone(),
            },
        )?;
    }
    drop(lock);

    result.message = format!(
        "{} loose file(s): {} to raw/, {} to unmanaged/, {} error(s)",
        result.files_found,
        result.relocated_to_raw,
        result.relocated_to_unmanaged,
        result.errors.len()
    );
    Ok(result)
}

fn mirror_one(
    fabric: &Fabric,
    layout: &FgdLayout,
    provider: &dyn RemoteProvider,
    remote: &RemoteConfig,
    entry: &RemoteEntry,
    validate_only: bool,
) -> Result<RemoteAction, HnpError> {
    let file = provider
        .read_file(&entry.path)?
        .ok_or_else(|| HnpError::NotFound(format!("remote file vanished: {}", entry.path)))?;

    // Classify to pick the server-side destination; the local reconciler
    // re-classifies after download, so both sides agree.
    let (dest_rel, reason) = match classify::classify_content(&file.content, &fabric.api_group) {
        Ok(c) if !c.valid_crs.is_empty() => (format!("{}/{}", RAW_DIR, entry.name), None),
        Ok(c) => (
            format!("{}/{}", UNMANAGED_DIR, entry.name),
            c.invalid_docs.first().map(|d| d.reason.clone()),
        ),
        Err(e) => (format!("{}/{}", UNMANAGED_DIR, entry.name), Some(e.to_string())),
    };
    let dest = remote.prefixed(&dest_rel);

    if validate_only {
        return Ok(RemoteAction {
            path: entry.path.clone(),
            action: format!("would relocate to {}", dest_rel),
            reason,
        });
    }

    // Land the download in the local inbox first; if any remote step fails
    // afterwards the file is still reconciled locally and the next pass
    // repeats the server-side move.
    let local_dest = sync::collision_free(&layout.raw_dir(), &entry.name);
    fs::write(&local_dest, &file.content).map_err(HnpError::IoError)?;

    provider.write_file(
        &dest,
        &file.content,
        &format!("hnp: relocate {} to {}", entry.name, dest_rel),
        None,
    )?;
    provider.delete_file(
        &entry.path,
        &file.sha,
        &format!("hnp: remove loose copy of {}", entry.name),
    )?;

    Ok(RemoteAction {
        path: entry.path.clone(),
        action: format!("relocated to {}", dest_rel),
        reason,
    })
}

#[derive(Debug, Serialize)]
pub struct PushResult {
    pub written: Vec<String>,
    pub skipped: Vec<String>,
}

/// Creation-only push of the contract skeleton and manifest. Safe to rerun:
/// existing remote files are skipped, not overwritten.
pub fn push_structure(
    fabric: &Fabric,
    provider: &dyn RemoteProvider,
) -> Result<PushResult, HnpError> {
    let remote = fabric.remote.as_ref().ok_or_else(|| {
        HnpError::ConfigError("no [remote] repository configured for this fabric".to_string())
    })?;

    let mut result = PushResult {
        written: Vec::new(),
        skipped: Vec::new(),
    };

    for dir in [RAW_DIR, MANAGED_DIR, UNMANAGED_DIR] {
        let path = remote.prefixed(&format!("{}/.gitkeep", dir));
        let outcome = provider.write_file(
            &path,
            "",
            &format!("hnp: scaffold {}/ for fabric {}", dir, fabric.id),
            None,
        )?;
        record_push(&mut result, &path, outcome);
    }

    let manifest = Manifest::for_fabric(fabric);
    let rendered = serde_yaml_ng::to_string(&manifest)
        .map_err(|e| HnpError::ValidationError(format!("manifest render failed: {}", e)))?;
    let manifest_path = remote.prefixed(".hnp/manifest.yaml");
    let outcome = provider.write_file(
        &manifest_path,
        &rendered,
        &format!("hnp: publish manifest for fabric {}", fabric.id),
        None,
    )?;
    record_push(&mut result, &manifest_path, outcome);

    Ok(result)
}

fn record_push(result: &mut PushResult, path: &str, outcome: WriteOutcome) {
    match outcome {
        WriteOutcome::SkippedExisting => result.skipped.push(path.to_string()),
        _ => result.written.push(path.to_string()),
    }
}

#[derive(Parser, Debug)]
pub struct RemoteCli {
    #[clap(subcommand)]
    pub command: RemoteCommand,
}

#[derive(Subcommand, Debug)]
pub enum RemoteCommand {
    /// Mirror loose remote files through the local reconciler
    Sync {
        /// Report what a pass would do without mutating either side.
        #[clap(long)]
        validate_only: bool,
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Analyze the configured remote scan path (read-only)
    Status {
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
}

pub fn run_remote_cli(
    fabric: &Fabric,
    layout: &FgdLayout,
    credentials: &dyn CredentialProvider,
    cli: RemoteCli,
) -> Result<(), HnpError> {
    let remote = fabric.remote.as_ref().ok_or_else(|| {
        HnpError::ConfigError("no [remote] repository configured for this fabric".to_string())
    })?;
    let client = GitHubClient::new(remote, credentials)?;

    match cli.command {
        RemoteCommand::Sync {
            validate_only,
            format,
        } => {
            let result = sync_remote(fabric, layout, &client, &sync::AcceptAllSink, validate_only)?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&result).unwrap());
            } else {
                println!("{}", result.message);
                for action in &result.actions {
                    println!("  ▸ {} — {}", action.path, action.action);
                }
                for error in &result.errors {
                    println!("  ✗ {}", error);
                }
            }
            if !result.success {
                return Err(HnpError::ValidationError(format!(
                    "remote sync completed with {} error(s)",
                    result.errors.len()
                )));
            }
        }
        RemoteCommand::Status { format } => {
            let scan = remote.prefixed(&remote.scan_path);
            let analysis = analyze_directory(&client, &scan)?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&analysis).unwrap());
            } else {
                println!(
                    "remote scan path '{}': {} yaml file(s), {} other file(s), {} subdirector{}",
                    scan,
                    analysis.yaml_files.len(),
                    analysis.other_files.len(),
                    analysis.subdirectories.len(),
                    if analysis.subdirectories.len() == 1 { "y" } else { "ies" }
                );
            }
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "remote",
        "version": "0.1.0",
        "description": "Remote mirror over the provider's content API",
        "commands": [
            { "name": "sync", "parameters": ["validate_only", "format"] },
            { "name": "status", "parameters": ["format"] }
        ],
        "storage": ["remote repository via content API"]
    })
}
