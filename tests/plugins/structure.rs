use hnp::core::fabric::Fabric;
use hnp::core::layout::{ALL_KINDS, Manifest};
use hnp::plugins::structure;
use std::fs;
use tempfile::tempdir;

#[test]
fn validate_on_bare_directory_reports_every_missing_dir() {
    let tmp = tempdir().expect("tempdir");
    let fabric = Fabric::new(tmp.path(), "fab-1", "test");
    let layout = fabric.layout();

    let result = structure::validate_and_repair(&fabric, &layout, true).expect("validate");
    assert!(!result.valid);
    // raw + managed + 12 kind buckets + unmanaged + .hnp
    assert_eq!(result.errors.len(), 16);
    assert!(result.repairs.is_empty());
    // Read-only: the tree is untouched.
    assert!(!layout.raw_dir().exists());
    assert!(!layout.meta_dir().exists());
}

#[test]
fn repair_is_idempotent() {
    let tmp = tempdir().expect("tempdir");
    let fabric = Fabric::new(tmp.path(), "fab-1", "test");
    let layout = fabric.layout();

    let first = structure::validate_and_repair(&fabric, &layout, false).expect("repair");
    assert!(first.valid);
    assert!(first.errors.is_empty());
    assert!(first.repairs.len() >= 16);

    let second = structure::validate_and_repair(&fabric, &layout, false).expect("second repair");
    assert!(second.valid);
    assert_eq!(second.repairs.len(), 0);
}

#[test]
fn repair_rebuilds_a_partially_damaged_tree() {
    let tmp = tempdir().expect("tempdir");
    let fabric = Fabric::new(tmp.path(), "fab-1", "test");
    let layout = fabric.layout();

    structure::validate_and_repair(&fabric, &layout, false).expect("initial repair");
    fs::remove_dir_all(layout.unmanaged_dir()).expect("damage unmanaged");
    fs::remove_dir_all(layout.managed_kind_dir(ALL_KINDS[0])).expect("damage a kind bucket");

    let repaired = structure::validate_and_repair(&fabric, &layout, false).expect("repair");
    assert_eq!(repaired.repairs.len(), 2);
    assert!(layout.unmanaged_dir().is_dir());
    assert!(layout.managed_kind_dir(ALL_KINDS[0]).is_dir());
}

#[test]
fn missing_metadata_files_are_warnings_in_validate_mode() {
    let tmp = tempdir().expect("tempdir");
    let fabric = Fabric::new(tmp.path(), "fab-1", "test");
    let layout = fabric.layout();

    structure::validate_and_repair(&fabric, &layout, false).expect("repair");
    fs::remove_file(layout.manifest_path()).expect("drop manifest");
    fs::remove_file(layout.sync_log_path()).expect("drop sync log");

    let result = structure::validate_and_repair(&fabric, &layout, true).expect("validate");
    assert!(result.valid, "metadata gaps must not fail validation");
    assert_eq!(result.warnings.len(), 2);
}

#[test]
fn repair_regenerates_manifest_for_this_fabric() {
    let tmp = tempdir().expect("tempdir");
    let fabric = Fabric::new(tmp.path(), "fab-42", "west");
    let layout = fabric.layout();

    structure::validate_and_repair(&fabric, &layout, false).expect("repair");
    let manifest = Manifest::read(&layout).expect("manifest");
    assert_eq!(manifest.fabric_id, "fab-42");
    assert_eq!(manifest.fabric_name, "west");
}

#[test]
fn scheduler_config_created_with_defaults_on_repair() {
    let tmp = tempdir().expect("tempdir");
    let fabric = Fabric::new(tmp.path(), "fab-1", "test");
    let layout = fabric.layout();

    structure::validate_and_repair(&fabric, &layout, false).expect("repair");
    let config = hnp::plugins::schedule::read_config(&layout).expect("schedule config");
    assert!(!config.enabled);
    assert_eq!(config.interval_minutes, 15);
    assert!(config.last_run.is_none());
}
