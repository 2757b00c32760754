use hnp::core::error::HnpError;
use hnp::core::fabric::{Fabric, RemoteConfig};
use hnp::core::layout::ManagedKind;
use hnp::core::lock::ProcessingLock;
use hnp::plugins::onboard;
use hnp::plugins::remote::{RemoteEntry, RemoteFile, RemoteProvider, WriteOutcome};
use hnp::plugins::sync::AcceptAllSink;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use tempfile::tempdir;

const VPC_DOC: &str = "apiVersion: vpc.githedgehog.com/v1beta1\nkind: VPC\nmetadata:\n  name: legacy-vpc\nspec: {}\n";

fn remote_config() -> RemoteConfig {
    RemoteConfig {
        url: "https://api.github.com".to_string(),
        owner: "acme".to_string(),
        repo: "fabric-config".to_string(),
        branch: "main".to_string(),
        path_prefix: String::new(),
        scan_path: String::new(),
        token_env: "HNP_GITHUB_TOKEN".to_string(),
    }
}

/// Records creation-only writes; enough provider for the onboarding push.
#[derive(Default)]
struct RecordingProvider {
    files: RefCell<BTreeMap<String, String>>,
}

impl RemoteProvider for RecordingProvider {
    fn list_directory(&self, _path: &str) -> Result<Vec<RemoteEntry>, HnpError> {
        Ok(Vec::new())
    }

    fn read_file(&self, path: &str) -> Result<Option<RemoteFile>, HnpError> {
        Ok(self.files.borrow().get(path).map(|content| RemoteFile {
            content: content.clone(),
            sha: "sha".to_string(),
        }))
    }

    fn write_file(
        &self,
        path: &str,
        content: &str,
        _message: &str,
        _expected_sha: Option<&str>,
    ) -> Result<WriteOutcome, HnpError> {
        self.files
            .borrow_mut()
            .insert(path.to_string(), content.to_string());
        Ok(WriteOutcome::Created)
    }

    fn delete_file(&self, _path: &str, _sha: &str, _message: &str) -> Result<(), HnpError> {
        Ok(())
    }
}

/// Provider whose every write fails, for the isolation contract.
struct UnreachableProvider;

impl RemoteProvider for UnreachableProvider {
    fn list_directory(&self, _path: &str) -> Result<Vec<RemoteEntry>, HnpError> {
        Err(HnpError::RemoteUnavailable("connection refused".to_string()))
    }

    fn read_file(&self, _path: &str) -> Result<Option<RemoteFile>, HnpError> {
        Err(HnpError::RemoteUnavailable("connection refused".to_string()))
    }

    fn write_file(
        &self,
        _path: &str,
        _content: &str,
        _message: &str,
        _expected_sha: Option<&str>,
    ) -> Result<WriteOutcome, HnpError> {
        Err(HnpError::RemoteUnavailable("connection refused".to_string()))
    }

    fn delete_file(&self, _path: &str, _sha: &str, _message: &str) -> Result<(), HnpError> {
        Err(HnpError::RemoteUnavailable("connection refused".to_string()))
    }
}

#[test]
fn onboarding_builds_migrates_and_persists() {
    let tmp = tempdir().expect("tempdir");
    // Pre-existing loose files the operator dropped before adopting GitOps.
    fs::write(tmp.path().join("legacy.yaml"), VPC_DOC).expect("seed loose file");
    fs::write(tmp.path().join("notes.txt"), "not yaml").expect("seed non-yaml");

    let mut fabric = Fabric::new(tmp.path(), "fab-1", "test-fabric");
    let result = onboard::onboard(&mut fabric, &AcceptAllSink, None, false).expect("onboard");

    assert!(result.success, "error: {:?}", result.error);
    assert!(result.initialized);
    assert_eq!(result.files_migrated, 1);
    assert_eq!(result.files_processed, 1);
    assert_eq!(
        result.steps_completed,
        vec![
            "StructureEnsured",
            "ExistingFilesMigrated",
            "RawProcessed",
            "ManifestsWritten",
            "FabricConfigPersisted"
        ]
    );

    let layout = fabric.layout();
    // Migrated file went raw/ -> managed/ in the same chain.
    assert!(!tmp.path().join("legacy.yaml").exists());
    assert!(
        layout
            .managed_kind_dir(ManagedKind::Vpc)
            .join("legacy-vpc.yaml")
            .is_file()
    );
    assert!(tmp.path().join("notes.txt").exists(), "non-yaml stays put");

    // Config on disk reflects the final state.
    let loaded = Fabric::load(tmp.path()).expect("load persisted config");
    assert!(loaded.gitops_initialized);
    assert_eq!(loaded.archive_strategy.as_deref(), Some("content-hash"));
    assert!(!loaded.directories.is_empty());
}

#[test]
fn reonboarding_requires_force() {
    let tmp = tempdir().expect("tempdir");
    let mut fabric = Fabric::new(tmp.path(), "fab-1", "test-fabric");
    onboard::onboard(&mut fabric, &AcceptAllSink, None, false).expect("first onboard");

    let rejected = onboard::onboard(&mut fabric, &AcceptAllSink, None, false);
    assert!(matches!(rejected, Err(HnpError::ValidationError(_))));

    let forced = onboard::onboard(&mut fabric, &AcceptAllSink, None, true).expect("forced");
    assert!(forced.success);
}

#[test]
fn remote_failure_is_isolated_from_local_success() {
    let tmp = tempdir().expect("tempdir");
    let mut fabric = Fabric::new(tmp.path(), "fab-1", "test-fabric");
    fabric.remote = Some(remote_config());

    let result = onboard::onboard(&mut fabric, &AcceptAllSink, Some(&UnreachableProvider), false)
        .expect("onboard");

    assert!(result.success);
    assert!(result.initialized);
    let push_error = result.github_push_error.expect("push error recorded");
    assert!(push_error.contains("connection refused"));
    assert!(!result.steps_completed.contains(&"RemoteMirrored".to_string()));

    let loaded = Fabric::load(tmp.path()).expect("load");
    assert!(loaded.gitops_initialized, "local truth is intact");
}

#[test]
fn remote_push_scaffolds_the_mirror() {
    let tmp = tempdir().expect("tempdir");
    let mut fabric = Fabric::new(tmp.path(), "fab-1", "test-fabric");
    fabric.remote = Some(remote_config());
    let provider = RecordingProvider::default();

    let result =
        onboard::onboard(&mut fabric, &AcceptAllSink, Some(&provider), false).expect("onboard");

    assert!(result.steps_completed.contains(&"RemoteMirrored".to_string()));
    assert!(result.github_push_error.is_none());
    let files = provider.files.borrow();
    assert!(files.contains_key("raw/.gitkeep"));
    assert!(files.contains_key("managed/.gitkeep"));
    assert!(files.contains_key("unmanaged/.gitkeep"));
    assert!(files.get(".hnp/manifest.yaml").expect("manifest pushed").contains("fab-1"));
}

#[test]
fn held_lock_makes_onboarding_fatal() {
    let tmp = tempdir().expect("tempdir");
    let mut fabric = Fabric::new(tmp.path(), "fab-1", "test-fabric");
    let _held = ProcessingLock::acquire(&fabric.layout(), "fab-1").expect("hold lock");

    let result = onboard::onboard(&mut fabric, &AcceptAllSink, None, false);
    assert!(matches!(result, Err(HnpError::LockContention(_))));
}

#[test]
fn local_step_failure_returns_partial_result() {
    let tmp = tempdir().expect("tempdir");
    // A file squatting on the raw/ path makes directory creation fail.
    fs::write(tmp.path().join("raw"), "not a directory").expect("squat");

    let mut fabric = Fabric::new(tmp.path(), "fab-1", "test-fabric");
    let result = onboard::onboard(&mut fabric, &AcceptAllSink, None, false).expect("partial");

    assert!(!result.success);
    assert!(!result.initialized);
    let error = result.error.expect("error recorded");
    assert!(error.starts_with("StructureEnsured:"));
    assert!(result.steps_completed.is_empty());
    assert!(Fabric::load(tmp.path()).is_err(), "config never persisted");
}
