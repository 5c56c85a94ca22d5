// Path validator decision table against real directories.

use std::fs;

use bulk_dl_engine::detect::path::{check_path, validate, PathStatus};

#[test]
fn test_existing_writable_dir_is_ready() {
    let dir = tempfile::tempdir().unwrap();
    let result = validate(dir.path().to_str().unwrap());
    assert!(result.valid);
    assert!(result.exists);
    assert!(result.is_directory);
    assert!(result.writable);
    assert_eq!(result.status, PathStatus::Ready);
}

#[test]
fn test_existing_file_is_not_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("file.txt");
    fs::write(&file, b"data").unwrap();

    let result = validate(file.to_str().unwrap());
    assert!(!result.valid);
    assert!(result.exists);
    assert!(!result.is_directory);
    assert_eq!(result.status, PathStatus::NotADirectory);
}

#[test]
fn test_missing_child_of_writable_dir_will_be_created() {
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("newsub");

    let result = validate(sub.to_str().unwrap());
    assert!(result.valid);
    assert!(!result.exists);
    assert!(result.parent_exists);
    assert!(result.writable);
    assert_eq!(result.status, PathStatus::WillBeCreated);
    assert_eq!(
        result.parent_path.as_deref(),
        Some(dir.path().to_str().unwrap())
    );
    // Validation never creates anything.
    assert!(!sub.exists());
}

#[test]
fn test_missing_parent_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let deep = dir.path().join("missing").join("parent").join("sub");

    let result = validate(deep.to_str().unwrap());
    assert!(!result.valid);
    assert!(!result.exists);
    assert!(!result.parent_exists);
    assert_eq!(result.status, PathStatus::ParentMissing);
}

#[test]
fn test_parent_is_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("plain");
    fs::write(&file, b"x").unwrap();

    let result = validate(file.join("child").to_str().unwrap());
    assert!(!result.valid);
}

#[test]
fn test_probe_leaves_no_files_behind() {
    let dir = tempfile::tempdir().unwrap();
    let facts = check_path(dir.path()).unwrap();
    assert!(facts.writable);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_relative_path_resolved_against_cwd() {
    let result = validate("definitely-not-here-bulk-dl");
    assert!(result.parent_path.is_some());
    assert!(!result.exists);
}
