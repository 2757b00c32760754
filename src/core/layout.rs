//! Centralized directory-contract knowledge for the Fabric GitOps Directory.
//!
//! Every path under a fabric base directory is named here and nowhere else:
//! the `raw/` inbox, the per-kind `managed/` buckets, the `unmanaged/`
//! quarantine, and the `.hnp/` metadata files. Components that move files or
//! repair structure go through [`FgdLayout`] instead of joining path strings
//! themselves.

use crate::core::error::HnpError;
use crate::core::fabric::Fabric;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const RAW_DIR: &str = "raw";
pub const MANAGED_DIR: &str = "managed";
pub const UNMANAGED_DIR: &str = "unmanaged";
pub const META_DIR: &str = ".hnp";

pub const CONFIG_FILE: &str = "config.toml";
pub const MANIFEST_FILE: &str = "manifest.yaml";
pub const ARCHIVE_LOG_FILE: &str = "archive-log.yaml";
pub const SYNC_LOG_FILE: &str = "sync-log.yaml";
pub const PERIODIC_SYNC_FILE: &str = "periodic-sync.yaml";
pub const LOCK_FILE: &str = "processing.lock";

/// Default reserved API-group substring for Hedgehog fabric resources.
pub const DEFAULT_API_GROUP: &str = "githedgehog.com";

/// The fixed set of fabric resource kinds tracked under `managed/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ManagedKind {
    Connection,
    Server,
    Switch,
    SwitchGroup,
    VlanNamespace,
    Vpc,
    External,
    ExternalAttachment,
    ExternalPeering,
    Ipv4Namespace,
    VpcAttachment,
    VpcPeering,
}

pub const ALL_KINDS: [ManagedKind; 12] = [
    ManagedKind::Connection,
    ManagedKind::Server,
    ManagedKind::Switch,
    ManagedKind::SwitchGroup,
    ManagedKind::VlanNamespace,
    ManagedKind::Vpc,
    ManagedKind::External,
    ManagedKind::ExternalAttachment,
    ManagedKind::ExternalPeering,
    ManagedKind::Ipv4Namespace,
    ManagedKind::VpcAttachment,
    ManagedKind::VpcPeering,
];

impl ManagedKind {
    /// The `kind` field value as it appears in a CR document.
    pub fn kind_str(&self) -> &'static str {
        match self {
            ManagedKind::Connection => "Connection",
            ManagedKind::Server => "Server",
            ManagedKind::Switch => "Switch",
            ManagedKind::SwitchGroup => "SwitchGroup",
            ManagedKind::VlanNamespace => "VLANNamespace",
            ManagedKind::Vpc => "VPC",
            ManagedKind::External => "External",
            ManagedKind::ExternalAttachment => "ExternalAttachment",
            ManagedKind::ExternalPeering => "ExternalPeering",
            ManagedKind::Ipv4Namespace => "IPv4Namespace",
            ManagedKind::VpcAttachment => "VPCAttachment",
            ManagedKind::VpcPeering => "VPCPeering",
        }
    }

    /// Directory name under `managed/` for this kind.
    pub fn plural(&self) -> &'static str {
        match self {
            ManagedKind::Connection => "connections",
            ManagedKind::Server => "servers",
            ManagedKind::Switch => "switches",
            ManagedKind::SwitchGroup => "switchgroups",
            ManagedKind::VlanNamespace => "vlannamespaces",
            ManagedKind::Vpc => "vpcs",
            ManagedKind::External => "externals",
            ManagedKind::ExternalAttachment => "externalattachments",
            ManagedKind::ExternalPeering => "externalpeerings",
            ManagedKind::Ipv4Namespace => "ipv4namespaces",
            ManagedKind::VpcAttachment => "vpcattachments",
            ManagedKind::VpcPeering => "vpcpeerings",
        }
    }

    pub fn from_kind(kind: &str) -> Option<ManagedKind> {
        ALL_KINDS.iter().copied().find(|k| k.kind_str() == kind)
    }
}

/// Path map for one fabric's GitOps directory.
#[derive(Debug, Clone)]
pub struct FgdLayout {
    base: PathBuf,
}

impl FgdLayout {
    pub fn new(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.base.join(RAW_DIR)
    }

    pub fn managed_dir(&self) -> PathBuf {
        self.base.join(MANAGED_DIR)
    }

    pub fn managed_kind_dir(&self, kind: ManagedKind) -> PathBuf {
        self.managed_dir().join(kind.plural())
    }

    pub fn unmanaged_dir(&self) -> PathBuf {
        self.base.join(UNMANAGED_DIR)
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.base.join(META_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.meta_dir().join(CONFIG_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.meta_dir().join(MANIFEST_FILE)
    }

    pub fn archive_log_path(&self) -> PathBuf {
        self.meta_dir().join(ARCHIVE_LOG_FILE)
    }

    pub fn sync_log_path(&self) -> PathBuf {
        self.meta_dir().join(SYNC_LOG_FILE)
    }

    pub fn periodic_sync_path(&self) -> PathBuf {
        self.meta_dir().join(PERIODIC_SYNC_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.meta_dir().join(LOCK_FILE)
    }

    /// Every directory the contract requires to exist before file
    /// processing may begin, in creation order.
    pub fn required_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.raw_dir(), self.managed_dir()];
        for kind in ALL_KINDS {
            dirs.push(self.managed_kind_dir(kind));
        }
        dirs.push(self.unmanaged_dir());
        dirs.push(self.meta_dir());
        dirs
    }
}

/// Static description of a fabric's directory contract, written to
/// `.hnp/manifest.yaml` at init and regenerated by structure repair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub fabric_id: String,
    pub fabric_name: String,
    pub api_group: String,
    pub directories: BTreeMap<String, String>,
    pub managed_kinds: Vec<String>,
    pub generated_at: String,
}

impl Manifest {
    pub fn for_fabric(fabric: &Fabric) -> Self {
        let mut directories = BTreeMap::new();
        directories.insert("raw".to_string(), RAW_DIR.to_string());
        directories.insert("managed".to_string(), MANAGED_DIR.to_string());
        directories.insert("unmanaged".to_string(), UNMANAGED_DIR.to_string());
        directories.insert("meta".to_string(), META_DIR.to_string());

        Manifest {
            fabric_id: fabric.id.clone(),
            fabric_name: fabric.name.clone(),
            api_group: fabric.api_group.clone(),
            directories,
            managed_kinds: ALL_KINDS.iter().map(|k| k.plural().to_string()).collect(),
            generated_at: time::now_rfc3339(),
        }
    }

    pub fn write(&self, layout: &FgdLayout) -> Result<(), HnpError> {
        let rendered = serde_yaml_ng::to_string(self)
            .map_err(|e| HnpError::ValidationError(format!("manifest render failed: {}", e)))?;
        fs::write(layout.manifest_path(), rendered).map_err(HnpError::IoError)?;
        Ok(())
    }

    pub fn read(layout: &FgdLayout) -> Result<Manifest, HnpError> {
        let content = fs::read_to_string(layout.manifest_path()).map_err(HnpError::IoError)?;
        serde_yaml_ng::from_str(&content).map_err(|e| HnpError::YamlInvalid(e.to_string()))
    }
}
