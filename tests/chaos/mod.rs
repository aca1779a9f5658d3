//! Chaos tests: damaged storage and concurrent writers
//!
//! Whatever happens to the storage directory, a failed undo must leave the
//! working files and the log exactly as they were.

use ::orcli::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;
use walkdir::WalkDir;

fn open(work: &Path) -> SafetyNet {
    SafetyNet::open_or_init(work.to_path_buf(), SafetyNet::default_storage_path(work)).unwrap()
}

/// Every stored content object
fn object_files(net: &SafetyNet) -> Vec<PathBuf> {
    WalkDir::new(net.storage_path().join("objects"))
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

/// Backup record file for the last operation
fn last_record_file(net: &SafetyNet) -> PathBuf {
    let backup = net.last().unwrap().unwrap().backup_ref.unwrap();
    net.storage_path().join("records").join(format!("{}.bin", backup))
}

fn assert_untouched_by_failed_undo(net: &SafetyNet, target: &Path, expected: &[u8]) {
    let before = net.history().unwrap();
    let err = net.undo().unwrap_err();
    assert!(matches!(err, OrcliError::RestoreFailed(_)), "got {:?}", err);
    assert_eq!(err.exit_code(), 6);

    assert_eq!(fs::read(target).unwrap(), expected);
    let after = net.history().unwrap();
    assert_eq!(after.len(), before.len());
    assert_eq!(after.next_id(), before.next_id());
}

#[test]
fn test_deleted_backup_record() {
    let work = TempDir::new().unwrap();
    let net = open(work.path());
    let target = work.path().join("a.txt");
    fs::write(&target, b"original").unwrap();
    net.write("a.txt", b"changed").unwrap();

    fs::remove_file(last_record_file(&net)).unwrap();
    assert_untouched_by_failed_undo(&net, &target, b"changed");
}

#[test]
fn test_truncated_backup_record() {
    let work = TempDir::new().unwrap();
    let net = open(work.path());
    let target = work.path().join("a.txt");
    fs::write(&target, b"original").unwrap();
    net.write("a.txt", b"changed").unwrap();

    let record = last_record_file(&net);
    let bytes = fs::read(&record).unwrap();
    fs::write(&record, &bytes[..bytes.len() / 3]).unwrap();
    assert_untouched_by_failed_undo(&net, &target, b"changed");
}

#[test]
fn test_tampered_object() {
    let work = TempDir::new().unwrap();
    let net = open(work.path());
    let target = work.path().join("a.txt");
    fs::write(&target, b"original").unwrap();
    net.write("a.txt", b"changed").unwrap();

    let objects = object_files(&net);
    assert_eq!(objects.len(), 1);
    // Valid raw header, wrong bytes
    fs::write(&objects[0], b"\0\0\0\0tampered").unwrap();
    assert_untouched_by_failed_undo(&net, &target, b"changed");
}

#[test]
fn test_unknown_object_header() {
    let work = TempDir::new().unwrap();
    let net = open(work.path());
    let target = work.path().join("a.txt");
    fs::write(&target, b"original").unwrap();
    net.write("a.txt", b"changed").unwrap();

    for object in object_files(&net) {
        fs::write(object, b"garbage").unwrap();
    }
    assert_untouched_by_failed_undo(&net, &target, b"changed");
}

#[test]
fn test_missing_object() {
    let work = TempDir::new().unwrap();
    let net = open(work.path());
    let target = work.path().join("a.txt");
    fs::write(&target, b"original").unwrap();
    net.remove("a.txt").unwrap();
    fs::write(&target, b"recreated by hand").unwrap();

    for object in object_files(&net) {
        fs::remove_file(object).unwrap();
    }
    assert_untouched_by_failed_undo(&net, &target, b"recreated by hand");
}

#[test]
fn test_corrupt_history_is_reported_not_overwritten() {
    let work = TempDir::new().unwrap();
    let net = open(work.path());
    net.write("a.txt", b"1").unwrap();

    let history = net.storage_path().join("history.json");
    fs::write(&history, b"{ not json").unwrap();

    assert!(matches!(net.undo(), Err(OrcliError::Json(_))));
    assert!(net.write("a.txt", b"2").is_err());
    assert_eq!(fs::read(work.path().join("a.txt")).unwrap(), b"1");
    assert_eq!(fs::read(&history).unwrap(), b"{ not json");
}

#[test]
fn test_concurrent_threads_get_unique_increasing_ids() {
    let work = TempDir::new().unwrap();
    let net = Arc::new(open(work.path()));
    let threads = 4;
    let per_thread = 10;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let net = Arc::clone(&net);
            thread::spawn(move || {
                (0..per_thread)
                    .map(|i| {
                        net.write(format!("t{}_{}.txt", t, i), format!("{}:{}", t, i).as_bytes())
                            .unwrap()
                            .record_id
                    })
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    let mut ids: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), threads * per_thread);

    let logged: Vec<u64> = net.history().unwrap().iter().map(|r| r.id).collect();
    assert_eq!(logged, ids);
}

#[test]
fn test_separate_instances_share_one_sequence() {
    let work = TempDir::new().unwrap();
    // Opened up front so initialization does not race
    let first = open(work.path());
    let root = work.path().to_path_buf();

    let handles: Vec<_> = (0..3)
        .map(|t| {
            let root = root.clone();
            thread::spawn(move || {
                let net = open(&root);
                for i in 0..5 {
                    net.write(format!("p{}.txt", t), format!("{}", i).as_bytes()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let ids: Vec<u64> = first.history().unwrap().iter().map(|r| r.id).collect();
    assert_eq!(ids, (1..=15).collect::<Vec<u64>>());
}
