//! Undo engine: revert the most recent operation
//!
//! Undo is chained. The compensating record appended by an undo carries a
//! backup of the state it replaced, so undoing again reverts the undo. This
//! gives redo for free and keeps the log strictly linear.
//!
//! The engine never changes the filesystem unless the backup has been read
//! back and verified first. Any restore failure leaves both the target and
//! the log untouched.

use crate::backup::{BackupRecord, BackupStore, Snapshot};
use crate::error::Result;
use crate::history::HistoryLog;
use crate::types::{OperationDraft, OperationKind, UndoAction, UndoOutcome, UndoReport};
use crate::utils;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Reverts operations recorded in a [`HistoryLog`] using a [`BackupStore`]
pub struct UndoEngine<'a> {
    store: &'a BackupStore,
}

impl<'a> UndoEngine<'a> {
    pub fn new(store: &'a BackupStore) -> Self {
        Self { store }
    }

    /// Revert the most recent record of `log`
    ///
    /// Returns [`UndoOutcome::NothingToUndo`] when the log is empty or its last
    /// record carries no backup (a failed attempt, or a no-op removal).
    ///
    /// # Errors
    ///
    /// - [`crate::OrcliError::RestoreFailed`] if the backup is missing or corrupt
    /// - [`crate::OrcliError::Io`] if the target cannot be rewritten
    #[instrument(skip_all)]
    pub fn undo(&self, log: &mut HistoryLog) -> Result<UndoOutcome> {
        let Some(last) = log.last().cloned() else {
            debug!("History is empty, nothing to undo");
            return Ok(UndoOutcome::NothingToUndo);
        };
        let Some(backup_id) = last.backup_ref.clone() else {
            debug!("Record {} has no backup, nothing to undo", last.id);
            return Ok(UndoOutcome::NothingToUndo);
        };

        // Read everything needed before touching the target
        let backup = self.store.load(&backup_id)?;
        let restored = match &backup.snapshot {
            Snapshot::Absent | Snapshot::Symlink { .. } => None,
            Snapshot::Content { .. } => Some(self.store.restore(&backup)?),
        };

        let target = last.target_path.as_path();
        let current = self.store.capture_state(target)?;

        let action = match self.apply(target, &backup, restored.as_deref()) {
            Ok(action) => action,
            Err(e) => {
                if let Err(discard_err) = self.store.discard(&current.id) {
                    warn!("Failed to discard unused backup {}: {}", current.id, discard_err);
                }
                return Err(e);
            }
        };

        let bytes = match action {
            UndoAction::Rewrote { bytes } => bytes,
            UndoAction::Deleted | UndoAction::Relinked { .. } => 0,
        };
        let record = log.append(
            OperationDraft::succeeded(
                OperationKind::Undo,
                target.to_path_buf(),
                Some(current.id.clone()),
            )
            .reverting(last.id)
            .with_bytes_written(bytes),
        );

        info!("Reverted {} of {:?} (record {})", last.kind, target, last.id);

        Ok(UndoOutcome::Restored(UndoReport {
            undo_record_id: record.id,
            reverted_record_id: last.id,
            reverted_kind: last.kind,
            target_path: target.to_path_buf(),
            backup_id: current.id,
            action,
        }))
    }

    /// Revert the last undo
    ///
    /// Acts only when the most recent record is a successful undo; anything
    /// else is [`UndoOutcome::NothingToUndo`].
    pub fn redo(&self, log: &mut HistoryLog) -> Result<UndoOutcome> {
        match log.last() {
            Some(last) if last.kind == OperationKind::Undo && last.success => self.undo(log),
            _ => Ok(UndoOutcome::NothingToUndo),
        }
    }

    fn apply(&self, target: &Path, backup: &BackupRecord, restored: Option<&[u8]>) -> Result<UndoAction> {
        match (&backup.snapshot, restored) {
            (Snapshot::Content { permissions, .. }, Some(content)) => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                utils::atomic_write(target, content)?;
                utils::set_permissions(target, *permissions)?;
                Ok(UndoAction::Rewrote {
                    bytes: content.len() as u64,
                })
            }
            (Snapshot::Symlink { target: link_target }, _) => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                remove_if_present(target)?;
                make_symlink(link_target, target)?;
                Ok(UndoAction::Relinked {
                    target: link_target.clone(),
                })
            }
            _ => {
                remove_if_present(target)?;
                Ok(UndoAction::Deleted)
            }
        }
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn make_symlink(original: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(original, link)?;
    Ok(())
}

#[cfg(windows)]
fn make_symlink(original: &Path, link: &Path) -> Result<()> {
    std::os::windows::fs::symlink_file(original, link)?;
    Ok(())
}
