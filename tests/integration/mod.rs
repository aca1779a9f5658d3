//! End-to-end scenarios for the safety net
//!
//! Each test drives a real working directory through the public API and
//! checks both the files on disk and the operation log.

use ::orcli::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Working directory plus a safety net rooted at it
pub struct SafetyNetHarness {
    pub work: TempDir,
    pub net: SafetyNet,
}

impl SafetyNetHarness {
    pub fn new() -> Self {
        let work = TempDir::new().unwrap();
        let net = SafetyNet::open_or_init(
            work.path().to_path_buf(),
            SafetyNet::default_storage_path(work.path()),
        )
        .unwrap();
        Self { work, net }
    }

    /// Second façade on the same storage, as another invocation would open it
    pub fn reopen(&self) -> SafetyNet {
        SafetyNet::open_or_init(
            self.work.path().to_path_buf(),
            SafetyNet::default_storage_path(self.work.path()),
        )
        .unwrap()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.work.path().join(rel)
    }

    pub fn seed(&self, rel: &str, content: &[u8]) {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn read(&self, rel: &str) -> Option<Vec<u8>> {
        fs::read(self.path(rel)).ok()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.net.history().unwrap().iter().map(|r| r.id).collect()
    }
}

impl Default for SafetyNetHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn restored(outcome: UndoOutcome) -> UndoReport {
    match outcome {
        UndoOutcome::Restored(report) => report,
        UndoOutcome::NothingToUndo => panic!("expected a restore"),
    }
}

#[test]
fn test_overwrite_then_undo_restores_previous_version() {
    let h = SafetyNetHarness::new();
    h.net.write("a.txt", b"v1").unwrap();
    h.net.write("a.txt", b"v2").unwrap();

    let report = restored(h.net.undo().unwrap());
    assert_eq!(h.read("a.txt").unwrap(), b"v1");
    assert_eq!(report.reverted_kind, OperationKind::Write);
    assert_eq!(report.action, UndoAction::Rewrote { bytes: 2 });

    let last = h.net.last().unwrap().unwrap();
    assert_eq!(last.kind, OperationKind::Undo);
    assert_eq!(last.reverts, Some(2));
}

#[test]
fn test_remove_then_undo_brings_file_back() {
    let h = SafetyNetHarness::new();
    h.seed("b.txt", b"x");

    h.net.remove("b.txt").unwrap();
    assert!(h.read("b.txt").is_none());

    restored(h.net.undo().unwrap());
    assert_eq!(h.read("b.txt").unwrap(), b"x");
}

#[test]
fn test_creating_write_is_undone_by_deleting() {
    let h = SafetyNetHarness::new();
    let result = h.net.write("nested/dir/new.txt", b"fresh").unwrap();
    assert!(result.created);

    let report = restored(h.net.undo().unwrap());
    assert_eq!(report.action, UndoAction::Deleted);
    assert!(h.read("nested/dir/new.txt").is_none());
}

#[test]
fn test_undo_on_empty_history_changes_nothing() {
    let h = SafetyNetHarness::new();
    h.seed("keep.txt", b"untouched");

    assert!(h.net.undo().unwrap().is_nothing());
    assert!(h.net.history().unwrap().is_empty());
    assert_eq!(h.read("keep.txt").unwrap(), b"untouched");
}

#[test]
fn test_second_undo_reverts_the_first() {
    let h = SafetyNetHarness::new();
    h.net.write("a.txt", b"v1").unwrap();
    h.net.write("a.txt", b"v2").unwrap();

    let first = restored(h.net.undo().unwrap());
    assert_eq!(h.read("a.txt").unwrap(), b"v1");

    let second = restored(h.net.undo().unwrap());
    assert_eq!(h.read("a.txt").unwrap(), b"v2");
    assert_eq!(second.reverted_kind, OperationKind::Undo);
    assert_eq!(second.reverted_record_id, first.undo_record_id);
    assert_eq!(h.ids(), vec![1, 2, 3, 4]);
}

#[test]
fn test_redo_only_follows_an_undo() {
    let h = SafetyNetHarness::new();
    h.seed("cfg.yaml", b"debug: false\n");
    h.net.modify("cfg.yaml", b"debug: true\n").unwrap();

    assert!(h.net.redo().unwrap().is_nothing());

    h.net.undo().unwrap();
    assert_eq!(h.read("cfg.yaml").unwrap(), b"debug: false\n");

    restored(h.net.redo().unwrap());
    assert_eq!(h.read("cfg.yaml").unwrap(), b"debug: true\n");
}

#[test]
fn test_failed_attempt_blocks_undo_of_earlier_change() {
    let h = SafetyNetHarness::new();
    h.net.write("a.txt", b"v1").unwrap();
    assert!(h.net.modify("missing.txt", b"x").is_err());

    assert!(h.net.undo().unwrap().is_nothing());
    assert_eq!(h.read("a.txt").unwrap(), b"v1");

    let history = h.net.history().unwrap();
    assert_eq!(history.len(), 2);
    assert!(!history.last().unwrap().success);
}

#[test]
fn test_ids_strictly_increase_across_mixed_operations() {
    let h = SafetyNetHarness::new();
    h.seed("r.txt", b"r");

    h.net.write("a.txt", b"1").unwrap();
    let _ = h.net.write("../escape.txt", b"x");
    h.net.undo().unwrap();
    h.net.remove("r.txt").unwrap();
    let _ = h.net.remove("r.txt");
    h.net.undo().unwrap();
    h.net.write("a.txt", b"2").unwrap();

    // Undos after failed attempts find nothing and append nothing
    let ids = h.ids();
    assert_eq!(ids.len(), 5);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_history_is_shared_between_instances() {
    let h = SafetyNetHarness::new();
    h.net.write("a.txt", b"from first").unwrap();

    let other = h.reopen();
    other.write("a.txt", b"from second").unwrap();

    // The first instance sees the second one's record and undoes it
    let report = restored(h.net.undo().unwrap());
    assert_eq!(report.reverted_record_id, 2);
    assert_eq!(h.read("a.txt").unwrap(), b"from first");
    assert_eq!(other.list(None).unwrap().len(), 3);
}

#[test]
fn test_cleanup_keeps_last_operation_undoable() {
    let h = SafetyNetHarness::new();
    for version in ["v1", "v2", "v3"] {
        h.net.write("a.txt", version.as_bytes()).unwrap();
    }

    let stats = h.net.cleanup(0, Some(1)).unwrap();
    assert_eq!(stats.history_pruned, 2);
    assert_eq!(h.net.history().unwrap().len(), 1);

    restored(h.net.undo().unwrap());
    assert_eq!(h.read("a.txt").unwrap(), b"v2");
}

#[test]
fn test_export_formats() {
    let h = SafetyNetHarness::new();
    h.net.write("a.txt", b"1").unwrap();
    h.net.write("b.txt", b"2").unwrap();

    let jsonl = h.net.export_history(ExportFormat::JsonLines).unwrap();
    let lines: Vec<&str> = jsonl.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["id"], 1);

    let json = h.net.export_history(ExportFormat::Json).unwrap();
    let records: Vec<OperationRecord> = serde_json::from_str(&json).unwrap();
    assert_eq!(records[1].id, 2);

    let yaml = h.net.export_history(ExportFormat::Yaml).unwrap();
    assert!(yaml.contains("kind: write"));
}

#[test]
fn test_history_capacity_evicts_oldest() {
    let work = TempDir::new().unwrap();
    let net = SafetyNetBuilder::new()
        .max_history(3)
        .build(
            work.path().to_path_buf(),
            SafetyNet::default_storage_path(work.path()),
        )
        .unwrap();

    for i in 0..5 {
        net.write("a.txt", format!("{}", i).as_bytes()).unwrap();
    }
    let ids: Vec<u64> = net.list(None).unwrap().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![5, 4, 3]);
}

#[test]
fn test_separate_storage_directory() {
    let work = TempDir::new().unwrap();
    let storage = TempDir::new().unwrap();
    let net = SafetyNet::open_or_init(work.path().to_path_buf(), storage.path().to_path_buf()).unwrap();

    net.write("a.txt", b"data").unwrap();
    assert!(storage.path().join("history.json").exists());
    assert!(!work.path().join(".orcli").exists());
    assert!(Path::new(&storage.path().join("metadata.json")).exists());
}
