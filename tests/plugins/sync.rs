use hnp::core::classify::ValidCr;
use hnp::core::fabric::Fabric;
use hnp::core::layout::ManagedKind;
use hnp::plugins::archive;
use hnp::plugins::structure;
use hnp::plugins::sync::{self, AcceptAllSink, ResourceSink, Sidecar};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

const VPC_DOC: &str = "apiVersion: vpc.githedgehog.com/v1beta1\nkind: VPC\nmetadata:\n  name: test-vpc\nspec:\n  subnets:\n    default:\n      subnet: 10.0.1.0/24\n";

fn fabric_in(base: &Path) -> Fabric {
    let fabric = Fabric::new(base, "fab-1", "test-fabric");
    structure::validate_and_repair(&fabric, &fabric.layout(), false).expect("contract built");
    fabric
}

fn set_mtime(path: &Path, secs_ago: u64) {
    let file = fs::OpenOptions::new().write(true).open(path).expect("open");
    file.set_modified(SystemTime::now() - Duration::from_secs(secs_ago))
        .expect("set mtime");
}

#[test]
fn empty_inbox_is_trivial_success() {
    let tmp = tempdir().expect("tempdir");
    let fabric = fabric_in(tmp.path());
    let layout = fabric.layout();

    let result = sync::run_sync(&fabric, &layout, &AcceptAllSink, false).expect("sync");
    assert!(result.success);
    assert_eq!(result.files_processed, 0);
    assert_eq!(result.moved_to_unmanaged, 0);
}

#[test]
fn one_valid_vpc_is_ready_for_ingestion() {
    let tmp = tempdir().expect("tempdir");
    let fabric = fabric_in(tmp.path());
    let layout = fabric.layout();
    fs::write(layout.raw_dir().join("vpc.yaml"), VPC_DOC).expect("drop file");

    let result = sync::run_sync(&fabric, &layout, &AcceptAllSink, false).expect("sync");
    assert!(result.success);
    assert_eq!(result.files_processed, 1);
    assert_eq!(result.valid_crs_found, 1);
    assert_eq!(result.moved_to_unmanaged, 0);

    let action = &result.actions[0];
    assert_eq!(action.action, "ready for ingestion");
    assert_eq!(action.crs[0].kind, "VPC");
    assert_eq!(action.crs[0].name, "test-vpc");

    // The document lands in its managed bucket and leaves the inbox.
    assert!(
        layout
            .managed_kind_dir(ManagedKind::Vpc)
            .join("test-vpc.yaml")
            .is_file()
    );
    assert!(!layout.raw_dir().join("vpc.yaml").exists());
}

#[test]
fn malformed_yaml_is_quarantined_with_sidecar() {
    let tmp = tempdir().expect("tempdir");
    let fabric = fabric_in(tmp.path());
    let layout = fabric.layout();
    fs::write(layout.raw_dir().join("broken.yaml"), "key: [unbalanced\nnext: {").expect("drop");

    let result = sync::run_sync(&fabric, &layout, &AcceptAllSink, false).expect("sync");
    assert!(result.success);
    assert_eq!(result.files_processed, 1);
    assert_eq!(result.moved_to_unmanaged, 1);
    assert!(!layout.raw_dir().join("broken.yaml").exists());

    let quarantined = layout.unmanaged_dir().join("broken.yaml");
    assert!(quarantined.is_file());
    let sidecar_content =
        fs::read_to_string(layout.unmanaged_dir().join("broken.yaml.metadata")).expect("sidecar");
    let sidecar: Sidecar = serde_yaml_ng::from_str(&sidecar_content).expect("sidecar parses");
    assert!(sidecar.reason.contains("YAML parse error"));
    assert!(sidecar.original_path.contains("broken.yaml"));
    assert!(!sidecar.content_hash.is_empty());
}

#[test]
fn foreign_kubernetes_object_routed_with_reason() {
    let tmp = tempdir().expect("tempdir");
    let fabric = fabric_in(tmp.path());
    let layout = fabric.layout();
    fs::write(
        layout.raw_dir().join("cm.yaml"),
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: app-config\ndata:\n  k: v\n",
    )
    .expect("drop");

    let result = sync::run_sync(&fabric, &layout, &AcceptAllSink, false).expect("sync");
    assert_eq!(result.moved_to_unmanaged, 1);
    let action = &result.actions[0];
    assert_eq!(action.reason.as_deref(), Some("not a fabric CR: v1"));
}

#[test]
fn quarantine_never_overwrites_existing_files() {
    let tmp = tempdir().expect("tempdir");
    let fabric = fabric_in(tmp.path());
    let layout = fabric.layout();

    // Pre-existing quarantined file with the same name.
    fs::write(layout.unmanaged_dir().join("dupe.yaml"), "earlier rejection").expect("seed");
    fs::write(layout.raw_dir().join("dupe.yaml"), "not: [valid").expect("drop");

    let result = sync::run_sync(&fabric, &layout, &AcceptAllSink, false).expect("sync");
    assert_eq!(result.moved_to_unmanaged, 1);

    let original = fs::read_to_string(layout.unmanaged_dir().join("dupe.yaml")).expect("read");
    assert_eq!(original, "earlier rejection");
    assert!(layout.unmanaged_dir().join("dupe-1.yaml").is_file());
}

#[test]
fn processing_order_is_oldest_first() {
    let tmp = tempdir().expect("tempdir");
    let fabric = fabric_in(tmp.path());
    let layout = fabric.layout();

    for (name, age) in [("third.yaml", 10u64), ("first.yaml", 300), ("second.yaml", 60)] {
        let path = layout.raw_dir().join(name);
        fs::write(&path, "scalar-only\n").expect("drop");
        set_mtime(&path, age);
    }

    let result = sync::run_sync(&fabric, &layout, &AcceptAllSink, false).expect("sync");
    let order: Vec<&str> = result.actions.iter().map(|a| a.path.as_str()).collect();
    assert_eq!(order, vec!["raw/first.yaml", "raw/second.yaml", "raw/third.yaml"]);
}

#[test]
fn validate_only_reports_without_mutating() {
    let tmp = tempdir().expect("tempdir");
    let fabric = fabric_in(tmp.path());
    let layout = fabric.layout();
    fs::write(layout.raw_dir().join("vpc.yaml"), VPC_DOC).expect("drop");
    fs::write(layout.raw_dir().join("junk.yaml"), "scalar\n").expect("drop");

    let result = sync::run_sync(&fabric, &layout, &AcceptAllSink, true).expect("validate");
    assert_eq!(result.files_processed, 2);
    assert_eq!(result.moved_to_unmanaged, 0);
    assert_eq!(result.invalid_files_found, 1);
    assert!(result.actions.iter().any(|a| a.action == "should move to unmanaged"));
    assert!(result.actions.iter().any(|a| a.action == "ready for ingestion"));

    // Nothing moved, nothing logged.
    assert!(layout.raw_dir().join("vpc.yaml").is_file());
    assert!(layout.raw_dir().join("junk.yaml").is_file());
    assert!(archive::read_sync_log(&layout).expect("log").is_empty());
}

struct RejectingSink;

impl ResourceSink for RejectingSink {
    fn apply(&self, cr: &ValidCr) -> Result<(), String> {
        Err(format!("no capacity for {}", cr.name))
    }
}

#[test]
fn sink_rejection_defers_file_for_next_pass() {
    let tmp = tempdir().expect("tempdir");
    let fabric = fabric_in(tmp.path());
    let layout = fabric.layout();
    fs::write(layout.raw_dir().join("vpc.yaml"), VPC_DOC).expect("drop");

    let result = sync::run_sync(&fabric, &layout, &RejectingSink, false).expect("sync runs");
    assert!(!result.success);
    assert!(result.errors[0].contains("persistence collaborator rejected"));
    assert!(result.errors[0].contains("test-vpc"));

    // File stays in the inbox; the next pass with a healthy sink ingests it.
    assert!(layout.raw_dir().join("vpc.yaml").is_file());
    let retry = sync::run_sync(&fabric, &layout, &AcceptAllSink, false).expect("retry");
    assert!(retry.success);
    assert!(!layout.raw_dir().join("vpc.yaml").exists());
}

#[test]
fn mixed_file_ingests_valid_and_warns_on_rest() {
    let tmp = tempdir().expect("tempdir");
    let fabric = fabric_in(tmp.path());
    let layout = fabric.layout();
    let mixed = format!("{}---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n", VPC_DOC);
    fs::write(layout.raw_dir().join("mixed.yaml"), mixed).expect("drop");

    let result = sync::run_sync(&fabric, &layout, &AcceptAllSink, false).expect("sync");
    assert!(result.success);
    assert_eq!(result.valid_crs_found, 1);
    assert_eq!(result.moved_to_unmanaged, 0);
    assert!(result.warnings.iter().any(|w| w.contains("not a fabric CR")));
    assert!(
        layout
            .managed_kind_dir(ManagedKind::Vpc)
            .join("test-vpc.yaml")
            .is_file()
    );
}

#[test]
fn namespaced_resource_gets_namespaced_file_name() {
    let tmp = tempdir().expect("tempdir");
    let fabric = fabric_in(tmp.path());
    let layout = fabric.layout();
    fs::write(
        layout.raw_dir().join("attach.yaml"),
        "apiVersion: vpc.githedgehog.com/v1beta1\nkind: VPCAttachment\nmetadata:\n  name: srv-1\n  namespace: tenants\n",
    )
    .expect("drop");

    sync::run_sync(&fabric, &layout, &AcceptAllSink, false).expect("sync");
    assert!(
        layout
            .managed_kind_dir(ManagedKind::VpcAttachment)
            .join("tenants--srv-1.yaml")
            .is_file()
    );
}

#[test]
fn mutating_run_appends_sync_record_and_stamps_schedule() {
    let tmp = tempdir().expect("tempdir");
    let fabric = fabric_in(tmp.path());
    let layout = fabric.layout();
    fs::write(layout.raw_dir().join("vpc.yaml"), VPC_DOC).expect("drop");

    sync::run_sync(&fabric, &layout, &AcceptAllSink, false).expect("sync");

    let records = archive::read_sync_log(&layout).expect("log");
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
    assert_eq!(records[0].mode, "sync");
    assert_eq!(records[0].files_processed, 1);

    let schedule = hnp::plugins::schedule::read_config(&layout).expect("schedule");
    assert!(schedule.last_run.is_some());
    assert!(schedule.next_run.is_some());
}

#[test]
fn nested_inbox_files_are_discovered() {
    let tmp = tempdir().expect("tempdir");
    let fabric = fabric_in(tmp.path());
    let layout = fabric.layout();
    fs::create_dir_all(layout.raw_dir().join("batch-1")).expect("mkdir");
    fs::write(layout.raw_dir().join("batch-1/vpc.yml"), VPC_DOC).expect("drop");

    let result = sync::run_sync(&fabric, &layout, &AcceptAllSink, false).expect("sync");
    assert_eq!(result.files_processed, 1);
    assert_eq!(result.valid_crs_found, 1);
}

#[test]
fn ingestion_is_recorded_in_archive_log() {
    let tmp = tempdir().expect("tempdir");
    let fabric = fabric_in(tmp.path());
    let layout = fabric.layout();
    fs::write(layout.raw_dir().join("vpc.yaml"), VPC_DOC).expect("drop");

    sync::run_sync(&fabric, &layout, &AcceptAllSink, false).expect("sync");

    let entries = archive::read_archive_log(&layout).expect("archive log");
    assert!(entries.iter().any(|e| e.op == "ingest" && e.dest.contains("vpcs/test-vpc.yaml")));
    assert!(archive::verify_archive(&layout).expect("verify").is_empty());
}
