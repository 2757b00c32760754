//! Fabric identity and configuration.
//!
//! A [`Fabric`] is the tenant scope of one reconciliation run. It is an
//! explicit value constructed from `.hnp/config.toml` and passed into every
//! component; there are no process-wide singletons. The file is rewritten
//! only by onboarding (the FabricConfigPersisted step) and by
//! `mark_initialized`.

use crate::core::error::HnpError;
use crate::core::layout::{DEFAULT_API_GROUP, FgdLayout};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Provider API base, e.g. `https://api.github.com`.
    pub url: String,
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Prefix inside the repository that holds this fabric's directory.
    #[serde(default)]
    pub path_prefix: String,
    /// Remote inbox to scan for loose files, relative to `path_prefix`.
    /// Empty means the prefix root. Kept configurable so the authoritative
    /// scan path is never a hardcoded assumption.
    #[serde(default)]
    pub scan_path: String,
    /// Environment variable holding the access token, resolved on demand.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_token_env() -> String {
    "HNP_GITHUB_TOKEN".to_string()
}

impl RemoteConfig {
    /// Repo-relative path for a fabric-relative one.
    pub fn prefixed(&self, rel: &str) -> String {
        let rel = rel.trim_matches('/');
        if self.path_prefix.is_empty() {
            rel.to_string()
        } else if rel.is_empty() {
            self.path_prefix.trim_matches('/').to_string()
        } else {
            format!("{}/{}", self.path_prefix.trim_matches('/'), rel)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FabricSection {
    id: String,
    name: String,
    #[serde(default = "default_api_group")]
    api_group: String,
    #[serde(default)]
    gitops_initialized: bool,
    #[serde(default)]
    archive_strategy: Option<String>,
    #[serde(default)]
    directories: BTreeMap<String, String>,
}

fn default_api_group() -> String {
    DEFAULT_API_GROUP.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    fabric: FabricSection,
    #[serde(default)]
    remote: Option<RemoteConfig>,
}

/// One fabric's worth of configuration under reconciliation.
#[derive(Debug, Clone)]
pub struct Fabric {
    pub id: String,
    pub name: String,
    pub api_group: String,
    pub gitops_initialized: bool,
    pub archive_strategy: Option<String>,
    /// Resolved directory map persisted after successful onboarding.
    pub directories: BTreeMap<String, String>,
    pub remote: Option<RemoteConfig>,
    base: PathBuf,
}

impl Fabric {
    /// A fresh, not-yet-initialized fabric rooted at `base`.
    pub fn new(base: &Path, id: &str, name: &str) -> Self {
        Fabric {
            id: id.to_string(),
            name: name.to_string(),
            api_group: DEFAULT_API_GROUP.to_string(),
            gitops_initialized: false,
            archive_strategy: None,
            directories: BTreeMap::new(),
            remote: None,
            base: base.to_path_buf(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn layout(&self) -> FgdLayout {
        FgdLayout::new(&self.base)
    }

    pub fn load(base: &Path) -> Result<Fabric, HnpError> {
        let layout = FgdLayout::new(base);
        let path = layout.config_path();
        if !path.exists() {
            return Err(HnpError::NotFound(format!(
                "fabric config not found at {} (run `hnp init` first)",
                path.display()
            )));
        }
        let content = fs::read_to_string(&path).map_err(HnpError::IoError)?;
        let parsed: ConfigFile = toml::from_str(&content)
            .map_err(|e| HnpError::ConfigError(format!("{}: {}", path.display(), e)))?;
        Ok(Fabric {
            id: parsed.fabric.id,
            name: parsed.fabric.name,
            api_group: parsed.fabric.api_group,
            gitops_initialized: parsed.fabric.gitops_initialized,
            archive_strategy: parsed.fabric.archive_strategy,
            directories: parsed.fabric.directories,
            remote: parsed.remote,
            base: base.to_path_buf(),
        })
    }

    /// Atomic rewrite of `.hnp/config.toml` (write temp, then rename).
    pub fn persist(&self) -> Result<(), HnpError> {
        let layout = self.layout();
        fs::create_dir_all(layout.meta_dir()).map_err(HnpError::IoError)?;

        let file = ConfigFile {
            fabric: FabricSection {
                id: self.id.clone(),
                name: self.name.clone(),
                api_group: self.api_group.clone(),
                gitops_initialized: self.gitops_initialized,
                archive_strategy: self.archive_strategy.clone(),
                directories: self.directories.clone(),
            },
            remote: self.remote.clone(),
        };
        let rendered = toml::to_string_pretty(&file)
            .map_err(|e| HnpError::ConfigError(format!("config render failed: {}", e)))?;

        let path = layout.config_path();
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, rendered).map_err(HnpError::IoError)?;
        fs::rename(&tmp, &path).map_err(HnpError::IoError)?;
        Ok(())
    }

    /// Flip the initialized flag and record the resolved contract, in memory.
    /// Only the onboarding orchestrator calls this, after every required
    /// local step succeeded; `persist` makes it durable.
    pub fn mark_initialized(&mut self, archive_strategy: &str) {
        let layout = self.layout();
        self.gitops_initialized = true;
        self.archive_strategy = Some(archive_strategy.to_string());
        self.directories.clear();
        for (key, path) in [
            ("raw", layout.raw_dir()),
            ("managed", layout.managed_dir()),
            ("unmanaged", layout.unmanaged_dir()),
            ("meta", layout.meta_dir()),
        ] {
            self.directories
                .insert(key.to_string(), path.to_string_lossy().to_string());
        }
    }
}

/// Credentials for the remote provider, resolved on demand and never
/// written to any `.hnp/` artifact.
#[derive(Debug, Clone)]
pub enum Credentials {
    Token(String),
    Basic { username: String, password: String },
}

/// Seam for the out-of-scope credential store. The default implementation
/// reads the environment variable named by the remote config; tests install
/// fixed-value providers.
pub trait CredentialProvider {
    fn credentials(&self, remote: &RemoteConfig) -> Result<Option<Credentials>, HnpError>;
}

pub struct EnvCredentials;

impl CredentialProvider for EnvCredentials {
    fn credentials(&self, remote: &RemoteConfig) -> Result<Option<Credentials>, HnpError> {
        match std::env::var(&remote.token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(Some(Credentials::Token(token))),
            _ => Ok(None),
        }
    }
}
