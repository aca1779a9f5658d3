//! Core data types used throughout orcli
//!
//! This module contains the data structures shared between the backup store,
//! the operation log, the undo engine and the mutation façade.
//!
//! ## Overview
//!
//! - **Operations**: [`OperationKind`], [`OperationRecord`], [`OperationDraft`]
//!   - what was attempted, against which file, with which backup
//! - **Results**: [`OperationResult`], [`UndoOutcome`], [`CleanupStats`]
//! - **Options**: [`MutateOptions`]
//! - **Storage**: [`StorageMetadata`], [`StorageConfig`]
//!
//! ## Examples
//!
//! ```rust
//! use orcli::types::MutateOptions;
//!
//! let options = MutateOptions {
//!     missing_ok: true,
//!     ..Default::default()
//! };
//! assert!(options.create_parents);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::OrcliError;

/// Kind of a recorded operation
///
/// A closed set: every consumer matches it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Create a file or replace its whole content
    Write,
    /// Delete an existing file
    Remove,
    /// Replace the content of a file that must already exist
    Modify,
    /// Compensating record appended by the undo engine
    Undo,
}

impl OperationKind {
    /// Lowercase name used in history output and exports
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Write => "write",
            OperationKind::Remove => "remove",
            OperationKind::Modify => "modify",
            OperationKind::Undo => "undo",
        }
    }

    /// Whether callers may request this kind through the mutation façade
    pub fn is_mutation(&self) -> bool {
        match self {
            OperationKind::Write | OperationKind::Remove | OperationKind::Modify => true,
            OperationKind::Undo => false,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = OrcliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "write" | "create" => Ok(OperationKind::Write),
            "remove" | "delete" => Ok(OperationKind::Remove),
            "modify" => Ok(OperationKind::Modify),
            "undo" => Ok(OperationKind::Undo),
            other => Err(OrcliError::validation(format!(
                "unknown operation kind '{}'",
                other
            ))),
        }
    }
}

/// Immutable audit entry describing one attempted mutation or undo
///
/// Records are created by [`crate::history::HistoryLog::append`], which assigns
/// the id. Nothing edits a record after that.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationRecord {
    /// Monotonic sequence number
    pub id: u64,
    /// What was attempted
    pub kind: OperationKind,
    /// Absolute path of the target file
    pub target_path: PathBuf,
    /// Backup of the state before this operation, if any
    pub backup_ref: Option<String>,
    /// For undo records, the id of the record that was reverted
    pub reverts: Option<u64>,
    /// When the attempt finished
    pub timestamp: DateTime<Utc>,
    /// Whether the operation took effect
    pub success: bool,
    /// Error text for failed attempts
    pub error: Option<String>,
    /// Bytes written to the target (0 for removals)
    pub bytes_written: u64,
}

impl OperationRecord {
    /// Whether the undo engine can act on this record
    pub fn is_undoable(&self) -> bool {
        self.success && self.backup_ref.is_some()
    }
}

/// Everything about an operation except its id
#[derive(Debug, Clone)]
pub struct OperationDraft {
    pub kind: OperationKind,
    pub target_path: PathBuf,
    pub backup_ref: Option<String>,
    pub reverts: Option<u64>,
    pub success: bool,
    pub error: Option<String>,
    pub bytes_written: u64,
}

impl OperationDraft {
    /// Draft for a successful operation
    pub fn succeeded(kind: OperationKind, target_path: PathBuf, backup_ref: Option<String>) -> Self {
        Self {
            kind,
            target_path,
            backup_ref,
            reverts: None,
            success: true,
            error: None,
            bytes_written: 0,
        }
    }

    /// Draft for a failed attempt; failed attempts never carry a backup
    pub fn failed(kind: OperationKind, target_path: PathBuf, error: &OrcliError) -> Self {
        Self {
            kind,
            target_path,
            backup_ref: None,
            reverts: None,
            success: false,
            error: Some(error.to_string()),
            bytes_written: 0,
        }
    }

    pub fn with_bytes_written(mut self, bytes: u64) -> Self {
        self.bytes_written = bytes;
        self
    }

    pub fn reverting(mut self, id: u64) -> Self {
        self.reverts = Some(id);
        self
    }

    /// Seal the draft into a record with the given id and the current time
    pub(crate) fn into_record(self, id: u64) -> OperationRecord {
        OperationRecord {
            id,
            kind: self.kind,
            target_path: self.target_path,
            backup_ref: self.backup_ref,
            reverts: self.reverts,
            timestamp: Utc::now(),
            success: self.success,
            error: self.error,
            bytes_written: self.bytes_written,
        }
    }
}

/// Options for [`crate::SafetyNet::mutate`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutateOptions {
    /// Permit targets outside the working root (the storage directory stays denied)
    pub allow_outside_root: bool,
    /// Treat removal of a missing file as a successful no-op
    pub missing_ok: bool,
    /// Create missing parent directories on write
    pub create_parents: bool,
}

impl Default for MutateOptions {
    fn default() -> Self {
        Self {
            allow_outside_root: false,
            missing_ok: false,
            create_parents: true,
        }
    }
}

/// Result of a successful mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    /// Id of the history record
    pub record_id: u64,
    /// Kind that was applied
    pub kind: OperationKind,
    /// Absolute target path
    pub target_path: PathBuf,
    /// Backup taken before the mutation
    pub backup_id: Option<String>,
    /// True when the target did not exist before a write
    pub created: bool,
    /// Bytes written to the target
    pub bytes_written: u64,
}

/// What the undo engine did to the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum UndoAction {
    /// Target was rewritten with its prior content
    Rewrote {
        /// Bytes restored
        bytes: u64,
    },
    /// Target did not exist before, so it was deleted
    Deleted,
    /// Target was a symbolic link and was linked again
    Relinked {
        /// Where the link points
        target: PathBuf,
    },
}

/// Details of a performed undo
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoReport {
    /// Id of the compensating undo record
    pub undo_record_id: u64,
    /// Id of the record that was reverted
    pub reverted_record_id: u64,
    /// Kind of the reverted record
    pub reverted_kind: OperationKind,
    /// Absolute target path
    pub target_path: PathBuf,
    /// Backup of the state just before the undo (makes the undo undoable)
    pub backup_id: String,
    /// What happened on disk
    pub action: UndoAction,
}

/// Outcome of [`crate::SafetyNet::undo`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UndoOutcome {
    /// The most recent operation was reverted
    Restored(UndoReport),
    /// The log is empty or its last record carries no backup
    NothingToUndo,
}

impl UndoOutcome {
    pub fn is_nothing(&self) -> bool {
        matches!(self, UndoOutcome::NothingToUndo)
    }
}

/// Statistics from backup retention or history cleanup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupStats {
    /// Backup records deleted
    pub records_deleted: usize,
    /// Content objects no longer referenced and deleted
    pub objects_deleted: usize,
    /// Stored bytes reclaimed
    pub bytes_reclaimed: u64,
    /// Backup ids skipped because they were protected
    pub protected: Vec<String>,
    /// History records pruned
    pub history_pruned: usize,
}

/// Configuration persisted with the storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Working root the history refers to
    pub root_path: PathBuf,
    /// Location of the storage directory
    pub storage_path: PathBuf,
    /// Maximum number of history records kept
    pub max_history: usize,
    /// Compression strategy name ("none", "fast", "adaptive")
    pub compression_strategy: String,
    /// Version of orcli that created the storage
    pub version: String,
}

/// Storage metadata file (`metadata.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageMetadata {
    /// Storage format version
    pub format_version: u32,
    /// Version of orcli that created the storage
    pub orcli_version: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last access timestamp
    pub last_accessed: DateTime<Utc>,
    /// Configuration
    pub config: StorageConfig,
}

/// Serialization used by `history export`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// JSON array, oldest first
    Json,
    /// YAML sequence, oldest first
    Yaml,
    /// One JSON object per line, oldest first
    JsonLines,
}

impl FromStr for ExportFormat {
    type Err = OrcliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "yaml" | "yml" => Ok(ExportFormat::Yaml),
            "jsonl" | "ndjson" => Ok(ExportFormat::JsonLines),
            other => Err(OrcliError::validation(format!(
                "unsupported export format '{}'",
                other
            ))),
        }
    }
}
