//! Operation log: the ordered audit trail the undo engine works from
//!
//! The log is append-only and bounded. Each appended record gets the next id
//! from a counter that survives eviction, `clear` and cleanup, so ids are
//! strictly increasing for the whole life of a storage directory.
//!
//! ## Examples
//!
//! ```rust
//! use orcli::history::HistoryLog;
//! use orcli::types::{OperationDraft, OperationKind};
//! use std::path::PathBuf;
//!
//! let mut log = HistoryLog::new(2);
//! for name in ["a", "b", "c"] {
//!     log.append(OperationDraft::succeeded(OperationKind::Write, PathBuf::from(name), None));
//! }
//!
//! // Oldest record was evicted, ids keep counting
//! assert_eq!(log.len(), 2);
//! assert_eq!(log.last().unwrap().id, 3);
//! ```

use crate::error::{OrcliError, Result};
use crate::types::{ExportFormat, OperationDraft, OperationKind, OperationRecord};
use crate::utils;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, trace};

/// Default number of records kept
pub const DEFAULT_CAPACITY: usize = 100;

/// Bounded, strictly ordered operation log
///
/// # Thread Safety
///
/// Not thread-safe. The mutation façade keeps it behind a lock and reloads it
/// from disk inside its critical section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryLog {
    next_id: u64,
    capacity: usize,
    /// Oldest first
    records: VecDeque<OperationRecord>,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl HistoryLog {
    /// Create an empty log keeping at most `capacity` records (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            next_id: 1,
            capacity: capacity.max(1),
            records: VecDeque::new(),
        }
    }

    /// Append a record built from `draft` and return it
    ///
    /// Evicts the oldest records once the log grows past its capacity.
    pub fn append(&mut self, draft: OperationDraft) -> OperationRecord {
        let record = draft.into_record(self.next_id);
        self.next_id += 1;
        trace!(
            "Appending history record {} ({} {:?})",
            record.id,
            record.kind,
            record.target_path
        );
        self.records.push_back(record.clone());
        self.evict();
        record
    }

    /// Most recent record
    pub fn last(&self) -> Option<&OperationRecord> {
        self.records.back()
    }

    /// Records, most recent first, optionally limited
    pub fn list(&self, limit: Option<usize>) -> Vec<&OperationRecord> {
        let limit = limit.unwrap_or(self.records.len());
        self.records.iter().rev().take(limit).collect()
    }

    /// Records oldest first
    pub fn iter(&self) -> impl Iterator<Item = &OperationRecord> {
        self.records.iter()
    }

    pub fn get(&self, id: u64) -> Option<&OperationRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Id the next appended record will get
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Records of one kind, most recent first
    pub fn filter_kind(&self, kind: OperationKind) -> Vec<&OperationRecord> {
        self.records.iter().rev().filter(|r| r.kind == kind).collect()
    }

    /// Prune records older than `cutoff`, and beyond `keep_count` newest ones
    ///
    /// The newest record always survives so `undo` keeps working after a
    /// cleanup. Returns the number of records removed.
    pub fn retain_since(&mut self, cutoff: DateTime<Utc>, keep_count: Option<usize>) -> usize {
        let before = self.records.len();
        let Some(newest_id) = self.last().map(|r| r.id) else {
            return 0;
        };
        let keep_count = keep_count.unwrap_or(usize::MAX);

        let mut kept = VecDeque::with_capacity(before);
        for (age, record) in self.records.drain(..).rev().enumerate() {
            let keep = record.id == newest_id || (record.timestamp >= cutoff && age < keep_count);
            if keep {
                kept.push_front(record);
            }
        }
        self.records = kept;

        let pruned = before - self.records.len();
        debug!("Pruned {} history records", pruned);
        pruned
    }

    /// Remove every record; the id counter keeps its value
    pub fn clear(&mut self) -> usize {
        let removed = self.records.len();
        self.records.clear();
        removed
    }

    /// Change the capacity, evicting oldest records if needed
    pub fn set_capacity(&mut self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(OrcliError::validation("history capacity must be at least 1"));
        }
        self.capacity = capacity;
        self.evict();
        Ok(())
    }

    /// Load the log from `path`, or start empty when the file does not exist
    pub fn load(path: &Path, capacity: usize) -> Result<Self> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::new(capacity)),
            Err(e) => return Err(e.into()),
        };
        let mut log: HistoryLog = serde_json::from_str(&json)?;
        log.capacity = capacity.max(1);
        log.evict();

        // Hand-edited files must not make ids go backwards
        if let Some(max_id) = log.records.iter().map(|r| r.id).max() {
            log.next_id = log.next_id.max(max_id + 1);
        }
        Ok(log)
    }

    /// Persist the log atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        utils::atomic_write(path, json.as_bytes())
    }

    /// Serialize every record, oldest first
    pub fn export(&self, format: ExportFormat) -> Result<String> {
        let records: Vec<&OperationRecord> = self.records.iter().collect();
        let output = match format {
            ExportFormat::Json => serde_json::to_string_pretty(&records)?,
            ExportFormat::Yaml => serde_yaml::to_string(&records)?,
            ExportFormat::JsonLines => {
                let mut out = String::new();
                for record in records {
                    out.push_str(&serde_json::to_string(record)?);
                    out.push('\n');
                }
                out
            }
        };
        Ok(output)
    }

    fn evict(&mut self) {
        while self.records.len() > self.capacity {
            if let Some(evicted) = self.records.pop_front() {
                trace!("Evicted history record {}", evicted.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_draft(name: &str) -> OperationDraft {
        OperationDraft::succeeded(
            OperationKind::Write,
            PathBuf::from(format!("/work/{}", name)),
            Some(format!("backup-{}", name)),
        )
    }

    #[test]
    fn test_ids_are_strictly_increasing() {
        let mut log = HistoryLog::new(10);
        let ids: Vec<u64> = (0..5).map(|i| log.append(write_draft(&i.to_string())).id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(log.last().unwrap().id, 5);
    }

    #[test]
    fn test_eviction_keeps_counter() {
        let mut log = HistoryLog::new(3);
        for i in 0..5 {
            log.append(write_draft(&i.to_string()));
        }
        assert_eq!(log.len(), 3);
        assert!(log.get(1).is_none());
        assert_eq!(log.iter().next().unwrap().id, 3);

        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.append(write_draft("after")).id, 6);
    }

    #[test]
    fn test_list_is_most_recent_first() {
        let mut log = HistoryLog::new(10);
        for name in ["a", "b", "c"] {
            log.append(write_draft(name));
        }
        let ids: Vec<u64> = log.list(Some(2)).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(log.list(None).len(), 3);
    }

    #[test]
    fn test_filter_kind() {
        let mut log = HistoryLog::new(10);
        log.append(write_draft("a"));
        log.append(OperationDraft::succeeded(
            OperationKind::Remove,
            PathBuf::from("/work/a"),
            Some("b1".into()),
        ));
        log.append(write_draft("b"));
        assert_eq!(log.filter_kind(OperationKind::Write).len(), 2);
        assert_eq!(log.filter_kind(OperationKind::Remove)[0].id, 2);
        assert!(log.filter_kind(OperationKind::Undo).is_empty());
    }

    #[test]
    fn test_retain_since_never_drops_newest() {
        let mut log = HistoryLog::new(10);
        for name in ["a", "b", "c"] {
            log.append(write_draft(name));
        }
        // Every record is older than a cutoff in the future
        let pruned = log.retain_since(Utc::now() + Duration::hours(1), None);
        assert_eq!(pruned, 2);
        assert_eq!(log.len(), 1);
        assert_eq!(log.last().unwrap().id, 3);
    }

    #[test]
    fn test_retain_since_with_count() {
        let mut log = HistoryLog::new(10);
        for i in 0..6 {
            log.append(write_draft(&i.to_string()));
        }
        let pruned = log.retain_since(Utc::now() - Duration::days(30), Some(4));
        assert_eq!(pruned, 2);
        let ids: Vec<u64> = log.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_set_capacity() {
        let mut log = HistoryLog::new(10);
        for i in 0..5 {
            log.append(write_draft(&i.to_string()));
        }
        log.set_capacity(2).unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.set_capacity(0).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("history.json");

        let missing = HistoryLog::load(&path, 50).unwrap();
        assert!(missing.is_empty());
        assert_eq!(missing.next_id(), 1);

        let mut log = HistoryLog::new(50);
        log.append(write_draft("a"));
        log.append(write_draft("b"));
        log.clear();
        log.append(write_draft("c"));
        log.save(&path).unwrap();

        let loaded = HistoryLog::load(&path, 50).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.next_id(), 4);
        assert_eq!(loaded.last().unwrap(), log.last().unwrap());
    }

    #[test]
    fn test_export_is_oldest_first() {
        let mut log = HistoryLog::new(10);
        for name in ["a", "b", "c"] {
            log.append(write_draft(name));
        }

        let json: Vec<OperationRecord> =
            serde_json::from_str(&log.export(ExportFormat::Json).unwrap()).unwrap();
        let ids: Vec<u64> = json.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let yaml: Vec<OperationRecord> =
            serde_yaml::from_str(&log.export(ExportFormat::Yaml).unwrap()).unwrap();
        assert_eq!(yaml, json);

        let lines = log.export(ExportFormat::JsonLines).unwrap();
        let ids: Vec<u64> = lines
            .lines()
            .map(|line| serde_json::from_str::<OperationRecord>(line).unwrap().id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
