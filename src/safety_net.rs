//! File mutation façade
//!
//! [`SafetyNet`] is the single choke point for every change orcli makes to
//! the user's files. Each mutation runs the same sequence inside one critical
//! section:
//!
//! 1. Resolve the target against the working root and reject escapes
//! 2. Capture the current state in the [`BackupStore`]
//! 3. Apply the change atomically (temp file + rename, or remove)
//! 4. Append an [`OperationRecord`] describing the attempt
//! 5. Persist the log
//!
//! The critical section is an in-process mutex plus an exclusive advisory
//! lock on `history.lock`, so concurrent threads and concurrent `orcli`
//! processes sharing one storage directory serialize cleanly. The log is
//! reloaded from disk inside the lock before every change.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use orcli::{SafetyNet, UndoOutcome};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let net = SafetyNet::open_or_init(
//!     PathBuf::from("./project"),
//!     PathBuf::from("./project/.orcli"),
//! )?;
//!
//! net.write("notes.txt", b"first draft")?;
//! net.write("notes.txt", b"second draft")?;
//!
//! // Back to "first draft"
//! if let UndoOutcome::Restored(report) = net.undo()? {
//!     println!("reverted record {}", report.reverted_record_id);
//! }
//! # Ok(())
//! # }
//! ```

use crate::backup::{BackupRecord, BackupStats, BackupStore, Snapshot};
use crate::compression::CompressionStrategy;
use crate::error::{OrcliError, Result};
use crate::history::{HistoryLog, DEFAULT_CAPACITY};
use crate::types::*;
use crate::undo::UndoEngine;
use crate::utils;
use chrono::{Duration, Utc};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Default name of the storage directory inside the working root
pub const STORAGE_DIR_NAME: &str = ".orcli";

/// Mode given to files orcli creates
const NEW_FILE_MODE: u32 = 0o644;

/// Backup-before-mutate wrapper around a working directory
///
/// `SafetyNet` owns the backup store and the operation log. It is `Send` and
/// `Sync`; share it behind an `Arc` to mutate from several threads.
pub struct SafetyNet {
    /// Canonical working root
    root: PathBuf,
    /// Canonical storage directory
    storage_path: PathBuf,
    store: BackupStore,
    /// Last log state seen by this instance
    history: RwLock<HistoryLog>,
    /// In-process half of the critical section
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for SafetyNet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyNet")
            .field("root", &self.root)
            .field("storage_path", &self.storage_path)
            .field("history_len", &self.history.read().len())
            .finish()
    }
}

/// What a successful application of a mutation produced
struct Applied {
    backup_id: Option<String>,
    created: bool,
    bytes_written: u64,
}

impl SafetyNet {
    /// Open the storage at `storage_path`, initializing it on first use
    pub fn open_or_init(root_path: PathBuf, storage_path: PathBuf) -> Result<Self> {
        SafetyNetBuilder::new().build(root_path, storage_path)
    }

    /// Default storage location for a working root
    pub fn default_storage_path(root_path: &Path) -> PathBuf {
        root_path.join(STORAGE_DIR_NAME)
    }

    /// Canonical working root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical storage directory
    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Apply a mutation with backup-before-mutate and record it
    ///
    /// # Arguments
    ///
    /// * `kind` - `Write`, `Modify` or `Remove`
    /// * `target` - Path relative to the working root, or absolute
    /// * `content` - New content, required for `Write` and `Modify`
    /// * `options` - See [`MutateOptions`]
    ///
    /// # Errors
    ///
    /// - [`OrcliError::Validation`] for `Undo`, missing content or a directory
    ///   target; nothing is recorded
    /// - [`OrcliError::PathDenied`] for targets outside the root or inside the
    ///   storage directory
    /// - [`OrcliError::TargetNotFound`] for `Modify`/`Remove` of a missing file
    /// - [`OrcliError::Io`] when the filesystem refuses the change
    ///
    /// Every error except `Validation` leaves a failed record in the log.
    #[instrument(skip_all, fields(kind = %kind))]
    pub fn mutate(
        &self,
        kind: OperationKind,
        target: impl AsRef<Path>,
        content: Option<&[u8]>,
        options: &MutateOptions,
    ) -> Result<OperationResult> {
        let target = target.as_ref();
        if !kind.is_mutation() {
            return Err(OrcliError::validation(
                "undo records are appended by the undo engine, not requested",
            ));
        }
        if matches!(kind, OperationKind::Write | OperationKind::Modify) && content.is_none() {
            return Err(OrcliError::validation(format!("{} requires content", kind)));
        }

        let requested = utils::absolutize(&self.root, target);
        let resolved = self.resolve_target(&requested, options);
        if let Ok(path) = &resolved {
            let is_dir = fs::symlink_metadata(path).map(|m| m.is_dir()).unwrap_or(false);
            if is_dir {
                return Err(OrcliError::validation(format!(
                    "{:?} is a directory, only files can be changed",
                    path
                )));
            }
        }

        self.with_exclusive(|log| {
            let outcome = resolved.and_then(|path| {
                self.apply(kind, &path, content, options)
                    .map(|applied| (path, applied))
            });

            match outcome {
                Ok((path, applied)) => {
                    let record = log.append(
                        OperationDraft::succeeded(kind, path.clone(), applied.backup_id.clone())
                            .with_bytes_written(applied.bytes_written),
                    );
                    info!("{} {:?} (record {})", kind, path, record.id);
                    Ok(OperationResult {
                        record_id: record.id,
                        kind,
                        target_path: path,
                        backup_id: applied.backup_id,
                        created: applied.created,
                        bytes_written: applied.bytes_written,
                    })
                }
                Err(e) => {
                    let record = log.append(OperationDraft::failed(kind, requested.clone(), &e));
                    warn!("{} {:?} failed (record {}): {}", kind, requested, record.id, e);
                    Err(e)
                }
            }
        })
    }

    /// Create or overwrite a file
    pub fn write(&self, target: impl AsRef<Path>, content: &[u8]) -> Result<OperationResult> {
        self.mutate(OperationKind::Write, target, Some(content), &MutateOptions::default())
    }

    /// Replace the content of an existing file
    pub fn modify(&self, target: impl AsRef<Path>, content: &[u8]) -> Result<OperationResult> {
        self.mutate(OperationKind::Modify, target, Some(content), &MutateOptions::default())
    }

    /// Delete an existing file
    pub fn remove(&self, target: impl AsRef<Path>) -> Result<OperationResult> {
        self.mutate(OperationKind::Remove, target, None, &MutateOptions::default())
    }

    /// Revert the most recent operation
    ///
    /// Undoing twice reverts the first undo. See [`UndoEngine::undo`].
    pub fn undo(&self) -> Result<UndoOutcome> {
        self.with_exclusive(|log| UndoEngine::new(&self.store).undo(log))
    }

    /// Revert the most recent undo, if the log ends with one
    pub fn redo(&self) -> Result<UndoOutcome> {
        self.with_exclusive(|log| UndoEngine::new(&self.store).redo(log))
    }

    /// Fresh copy of the operation log
    pub fn history(&self) -> Result<HistoryLog> {
        let log = HistoryLog::load(&self.history_path(), self.capacity())?;
        *self.history.write() = log.clone();
        Ok(log)
    }

    /// Records, most recent first
    pub fn list(&self, limit: Option<usize>) -> Result<Vec<OperationRecord>> {
        Ok(self.history()?.list(limit).into_iter().cloned().collect())
    }

    /// Most recent record
    pub fn last(&self) -> Result<Option<OperationRecord>> {
        Ok(self.history()?.last().cloned())
    }

    /// Record by id, if still in the log
    pub fn get(&self, id: u64) -> Result<Option<OperationRecord>> {
        Ok(self.history()?.get(id).cloned())
    }

    /// Serialize the log, oldest first
    pub fn export_history(&self, format: ExportFormat) -> Result<String> {
        self.history()?.export(format)
    }

    /// Prune history and backups older than `days`
    ///
    /// `keep_count` additionally caps the number of history records kept.
    /// The newest record and every backup a surviving record refers to are
    /// kept, so the last operation stays undoable.
    #[instrument(skip(self))]
    pub fn cleanup(&self, days: u32, keep_count: Option<usize>) -> Result<CleanupStats> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        self.with_exclusive(|log| {
            let history_pruned = log.retain_since(cutoff, keep_count);
            let protected: Vec<String> = log.iter().filter_map(|r| r.backup_ref.clone()).collect();

            let mut stats = self.store.cleanup(cutoff, &protected)?;
            stats.history_pruned = history_pruned;
            info!(
                "Cleanup pruned {} records and {} backups",
                stats.history_pruned, stats.records_deleted
            );
            Ok(stats)
        })
    }

    /// Drop every history record; backups stay until the next cleanup
    pub fn clear_history(&self) -> Result<usize> {
        self.with_exclusive(|log| {
            let removed = log.clear();
            info!("Cleared {} history records", removed);
            Ok(removed)
        })
    }

    /// Backup record by id
    pub fn backup(&self, id: &str) -> Result<BackupRecord> {
        self.store.load(id)
    }

    /// Backup store statistics
    pub fn backup_stats(&self) -> Result<BackupStats> {
        self.store.stats()
    }

    /// Storage metadata
    pub fn metadata(&self) -> &StorageMetadata {
        self.store.metadata()
    }

    fn capacity(&self) -> usize {
        self.store.metadata().config.max_history
    }

    fn history_path(&self) -> PathBuf {
        self.storage_path.join("history.json")
    }

    /// Run `f` on the freshly loaded log inside the critical section, then persist
    fn with_exclusive<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut HistoryLog) -> Result<T>,
    {
        let _guard = self.write_lock.lock();

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.storage_path.join("history.lock"))?;
        lock_file.lock_exclusive()?;

        let result = (|| {
            let mut log = HistoryLog::load(&self.history_path(), self.capacity())?;
            let before = log.next_id();
            let outcome = f(&mut log);
            if log.next_id() != before || outcome.is_ok() {
                log.save(&self.history_path())?;
            }
            *self.history.write() = log;
            outcome
        })();

        if let Err(e) = lock_file.unlock() {
            warn!("Failed to release history lock: {}", e);
        }
        result
    }

    /// Normalize, follow symlinks in the parent directories and check containment
    ///
    /// The final component is never followed: a symlink target names the link
    /// itself, so removing it removes the link and not the file it points to.
    fn resolve_target(&self, requested: &Path, options: &MutateOptions) -> Result<PathBuf> {
        let resolved = match (requested.parent(), requested.file_name()) {
            (Some(parent), Some(name)) => utils::resolve_existing_prefix(parent)?.join(name),
            _ => utils::resolve_existing_prefix(requested)?,
        };

        if resolved.starts_with(&self.storage_path) {
            return Err(OrcliError::PathDenied {
                path: requested.to_path_buf(),
                root: self.root.clone(),
            });
        }
        if !options.allow_outside_root && !resolved.starts_with(&self.root) {
            return Err(OrcliError::PathDenied {
                path: requested.to_path_buf(),
                root: self.root.clone(),
            });
        }
        Ok(resolved)
    }

    fn apply(
        &self,
        kind: OperationKind,
        target: &Path,
        content: Option<&[u8]>,
        options: &MutateOptions,
    ) -> Result<Applied> {
        match kind {
            OperationKind::Write => {
                let content = content.unwrap_or_default();
                let backup = self.store.capture_state(target)?;
                let mode = self.mode_for(target, &backup);
                if let Err(e) = write_file(target, content, mode, options.create_parents) {
                    self.discard(&backup.id);
                    return Err(e);
                }
                Ok(Applied {
                    created: backup.is_absent(),
                    backup_id: Some(backup.id),
                    bytes_written: content.len() as u64,
                })
            }
            OperationKind::Modify => {
                let content = content.unwrap_or_default();
                let Some(backup) = self.store.capture(target)? else {
                    return Err(OrcliError::TargetNotFound(target.to_path_buf()));
                };
                let mode = self.mode_for(target, &backup);
                if let Err(e) = write_file(target, content, mode, false) {
                    self.discard(&backup.id);
                    return Err(e);
                }
                Ok(Applied {
                    created: false,
                    backup_id: Some(backup.id),
                    bytes_written: content.len() as u64,
                })
            }
            OperationKind::Remove => match self.store.capture(target)? {
                None if options.missing_ok => {
                    debug!("{:?} already absent, nothing to remove", target);
                    Ok(Applied {
                        backup_id: None,
                        created: false,
                        bytes_written: 0,
                    })
                }
                None => Err(OrcliError::TargetNotFound(target.to_path_buf())),
                Some(backup) => {
                    if let Err(e) = fs::remove_file(target) {
                        self.discard(&backup.id);
                        return Err(e.into());
                    }
                    Ok(Applied {
                        backup_id: Some(backup.id),
                        created: false,
                        bytes_written: 0,
                    })
                }
            },
            OperationKind::Undo => Err(OrcliError::validation(
                "undo records are appended by the undo engine, not requested",
            )),
        }
    }

    fn mode_for(&self, target: &Path, backup: &BackupRecord) -> u32 {
        match &backup.snapshot {
            Snapshot::Content { permissions, .. } => *permissions,
            Snapshot::Absent => {
                debug!("Creating {:?}", target);
                NEW_FILE_MODE
            }
            Snapshot::Symlink { .. } => {
                debug!("Replacing link {:?} with a regular file", target);
                NEW_FILE_MODE
            }
        }
    }

    fn discard(&self, backup_id: &str) {
        if let Err(e) = self.store.discard(backup_id) {
            warn!("Failed to discard unused backup {}: {}", backup_id, e);
        }
    }
}

fn write_file(target: &Path, content: &[u8], mode: u32, create_parents: bool) -> Result<()> {
    if let Some(parent) = target.parent() {
        if create_parents {
            fs::create_dir_all(parent)?;
        } else if !parent.exists() {
            return Err(OrcliError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("parent directory {:?} does not exist", parent),
            )));
        }
    }
    utils::atomic_write(target, content)?;
    utils::set_permissions(target, mode)
}

/// Builder for [`SafetyNet`]
///
/// # Default Values
///
/// - `compression_strategy`: `CompressionStrategy::Fast`
/// - `max_history`: 100
#[derive(Debug)]
pub struct SafetyNetBuilder {
    compression_strategy: CompressionStrategy,
    max_history: usize,
}

impl SafetyNetBuilder {
    pub fn new() -> Self {
        Self {
            compression_strategy: CompressionStrategy::default(),
            max_history: DEFAULT_CAPACITY,
        }
    }

    /// Compression used for newly stored backup objects
    pub fn compression_strategy(mut self, strategy: CompressionStrategy) -> Self {
        self.compression_strategy = strategy;
        self
    }

    /// Maximum number of history records kept (minimum 1)
    pub fn max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history.max(1);
        self
    }

    /// Open or initialize the storage and build the façade
    ///
    /// The working root must exist. The storage directory is created when
    /// missing. Settings given to the builder are written to the storage
    /// metadata when they differ from what is stored.
    pub fn build(self, root_path: PathBuf, storage_path: PathBuf) -> Result<SafetyNet> {
        let root = match root_path.canonicalize() {
            Ok(root) => root,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(OrcliError::config(format!(
                    "working root {:?} does not exist",
                    root_path
                )));
            }
            Err(e) => return Err(e.into()),
        };
        fs::create_dir_all(&storage_path)?;
        let storage_path = storage_path.canonicalize()?;

        let config = StorageConfig {
            root_path: root.clone(),
            storage_path: storage_path.clone(),
            max_history: self.max_history,
            compression_strategy: self.compression_strategy.name().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        let mut store = BackupStore::init_or_open(storage_path.clone(), config)?;
        let stored = &store.metadata().config;
        if stored.max_history != self.max_history
            || stored.compression_strategy != self.compression_strategy.name()
        {
            let max_history = self.max_history;
            let strategy = self.compression_strategy.name().to_string();
            store.update_metadata(|metadata| {
                metadata.config.max_history = max_history;
                metadata.config.compression_strategy = strategy;
                metadata.last_accessed = Utc::now();
            })?;
        }

        let history = HistoryLog::load(&storage_path.join("history.json"), self.max_history)?;
        debug!(
            "Safety net ready at {:?} ({} history records)",
            root,
            history.len()
        );

        Ok(SafetyNet {
            root,
            storage_path,
            store,
            history: RwLock::new(history),
            write_lock: Mutex::new(()),
        })
    }
}

impl Default for SafetyNetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn create_test_net() -> (SafetyNet, TempDir) {
        let root_dir = TempDir::new().unwrap();
        let storage = SafetyNet::default_storage_path(root_dir.path());
        let net = SafetyNet::open_or_init(root_dir.path().to_path_buf(), storage).unwrap();
        (net, root_dir)
    }

    #[test]
    fn test_write_new_file_references_absent_backup() {
        let (net, root) = create_test_net();
        let result = net.write("a.txt", b"hello").unwrap();

        assert!(result.created);
        assert_eq!(result.bytes_written, 5);
        assert_eq!(fs::read(root.path().join("a.txt")).unwrap(), b"hello");

        let last = net.last().unwrap().unwrap();
        assert_eq!(last.id, result.record_id);
        assert!(last.is_undoable());
        let backup = net.store.load(last.backup_ref.as_deref().unwrap()).unwrap();
        assert!(backup.is_absent());
    }

    #[test]
    fn test_overwrite_then_undo_restores_bytes() {
        let (net, root) = create_test_net();
        net.write("a.txt", b"v1").unwrap();
        net.write("a.txt", b"v2").unwrap();

        let outcome = net.undo().unwrap();
        assert!(!outcome.is_nothing());
        assert_eq!(fs::read(root.path().join("a.txt")).unwrap(), b"v1");
    }

    #[test]
    fn test_modify_missing_file_is_recorded_failure() {
        let (net, _root) = create_test_net();
        let err = net.modify("missing.txt", b"x").unwrap_err();
        assert!(matches!(err, OrcliError::TargetNotFound(_)));

        let last = net.last().unwrap().unwrap();
        assert!(!last.success);
        assert!(last.backup_ref.is_none());
        assert!(last.error.is_some());
        assert!(net.undo().unwrap().is_nothing());
    }

    #[test]
    fn test_remove_missing_ok_is_noop_record() {
        let (net, _root) = create_test_net();
        let options = MutateOptions {
            missing_ok: true,
            ..Default::default()
        };
        let result = net
            .mutate(OperationKind::Remove, "ghost.txt", None, &options)
            .unwrap();
        assert!(result.backup_id.is_none());
        assert!(net.undo().unwrap().is_nothing());
    }

    #[test]
    fn test_parameter_errors_are_not_recorded() {
        let (net, root) = create_test_net();
        fs::create_dir(root.path().join("dir")).unwrap();

        let undo_kind = net.mutate(OperationKind::Undo, "a.txt", Some(b"x"), &MutateOptions::default());
        assert!(matches!(undo_kind, Err(OrcliError::Validation(_))));

        let no_content = net.mutate(OperationKind::Write, "a.txt", None, &MutateOptions::default());
        assert!(matches!(no_content, Err(OrcliError::Validation(_))));

        assert!(matches!(net.write("dir", b"x"), Err(OrcliError::Validation(_))));
        assert!(net.history().unwrap().is_empty());
    }

    #[test]
    fn test_escapes_are_denied_and_recorded() {
        let (net, root) = create_test_net();

        let err = net.write("../outside.txt", b"x").unwrap_err();
        assert!(matches!(err, OrcliError::PathDenied { .. }));
        assert!(!root.path().parent().unwrap().join("outside.txt").exists());

        let err = net.write(".orcli/history.json", b"[]").unwrap_err();
        assert!(matches!(err, OrcliError::PathDenied { .. }));

        // Storage stays denied even when leaving the root is allowed
        let options = MutateOptions {
            allow_outside_root: true,
            ..Default::default()
        };
        let err = net
            .mutate(OperationKind::Write, ".orcli/metadata.json", Some(b"{}"), &options)
            .unwrap_err();
        assert!(matches!(err, OrcliError::PathDenied { .. }));

        let history = net.history().unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|r| !r.success));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_parent_escape_is_denied() {
        let (net, root) = create_test_net();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        let err = net.write("link/evil.txt", b"x").unwrap_err();
        assert!(matches!(err, OrcliError::PathDenied { .. }));
        assert!(!outside.path().join("evil.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_symlink_removes_the_link_only() {
        let (net, root) = create_test_net();
        let real = root.path().join("real.txt");
        let alias = root.path().join("alias.txt");
        fs::write(&real, b"keep me").unwrap();
        std::os::unix::fs::symlink(&real, &alias).unwrap();

        let result = net.remove("alias.txt").unwrap();
        assert_eq!(result.target_path, net.root().join("alias.txt"));
        assert!(fs::symlink_metadata(&alias).is_err());
        assert_eq!(fs::read(&real).unwrap(), b"keep me");

        let outcome = net.undo().unwrap();
        let UndoOutcome::Restored(report) = outcome else {
            panic!("expected a restore");
        };
        assert_eq!(report.action, UndoAction::Relinked { target: real.clone() });
        assert!(fs::symlink_metadata(&alias).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&alias).unwrap(), real);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_over_symlink_leaves_link_target_alone() {
        let (net, root) = create_test_net();
        let outside = TempDir::new().unwrap();
        let real = outside.path().join("real.txt");
        let alias = root.path().join("alias.txt");
        fs::write(&real, b"outside").unwrap();
        std::os::unix::fs::symlink(&real, &alias).unwrap();

        net.write("alias.txt", b"inside").unwrap();
        assert!(!fs::symlink_metadata(&alias).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(&alias).unwrap(), b"inside");
        assert_eq!(fs::read(&real).unwrap(), b"outside");

        net.undo().unwrap();
        assert_eq!(fs::read_link(&alias).unwrap(), real);
    }

    #[test]
    fn test_io_failure_is_recorded_and_discards_capture() {
        let (net, root) = create_test_net();
        let options = MutateOptions {
            create_parents: false,
            ..Default::default()
        };
        let records_before = net.backup_stats().unwrap().record_count;

        let err = net
            .mutate(OperationKind::Write, "no/such/dir/a.txt", Some(b"x"), &options)
            .unwrap_err();
        assert!(matches!(err, OrcliError::Io(_)));
        assert_eq!(err.exit_code(), 5);
        assert!(!root.path().join("no").exists());

        let last = net.last().unwrap().unwrap();
        assert_eq!(last.kind, OperationKind::Write);
        assert!(!last.success);
        assert!(last.backup_ref.is_none());
        assert!(last.error.is_some());
        assert_eq!(net.backup_stats().unwrap().record_count, records_before);
        assert!(net.undo().unwrap().is_nothing());
    }

    #[cfg(unix)]
    #[test]
    fn test_read_only_directory_failure_leaves_target_intact() {
        let (net, root) = create_test_net();
        let locked = root.path().join("locked");
        fs::create_dir(&locked).unwrap();
        let target = locked.join("a.txt");
        fs::write(&target, b"original").unwrap();
        utils::set_permissions(&locked, 0o555).unwrap();

        // Privileged users write through directory permissions
        if fs::write(locked.join("canary"), b"").is_ok() {
            utils::set_permissions(&locked, 0o755).unwrap();
            return;
        }

        let before = net.backup_stats().unwrap();
        let err = net.write("locked/a.txt", b"changed").unwrap_err();
        assert!(matches!(err, OrcliError::Io(_)));
        assert_eq!(fs::read(&target).unwrap(), b"original");

        let last = net.last().unwrap().unwrap();
        assert!(!last.success);
        assert!(last.backup_ref.is_none());
        let after = net.backup_stats().unwrap();
        assert_eq!(after.record_count, before.record_count);
        assert_eq!(after.object_count, before.object_count);

        utils::set_permissions(&locked, 0o755).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_overwrite_keeps_permissions() {
        let (net, root) = create_test_net();
        let script = root.path().join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        utils::set_permissions(&script, 0o755).unwrap();

        net.write("run.sh", b"#!/bin/sh\necho hi\n").unwrap();
        let mode = utils::get_permissions(&fs::metadata(&script).unwrap());
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_ids_survive_reopen() {
        let root = TempDir::new().unwrap();
        let storage = SafetyNet::default_storage_path(root.path());
        {
            let net = SafetyNet::open_or_init(root.path().to_path_buf(), storage.clone()).unwrap();
            net.write("a.txt", b"1").unwrap();
            net.write("a.txt", b"2").unwrap();
            net.clear_history().unwrap();
        }
        let net = SafetyNet::open_or_init(root.path().to_path_buf(), storage).unwrap();
        assert_eq!(net.write("a.txt", b"3").unwrap().record_id, 3);
    }

    #[test]
    fn test_builder_updates_capacity() {
        let root = TempDir::new().unwrap();
        let storage = SafetyNet::default_storage_path(root.path());
        let net = SafetyNetBuilder::new()
            .max_history(2)
            .compression_strategy(CompressionStrategy::None)
            .build(root.path().to_path_buf(), storage)
            .unwrap();

        for i in 0..4 {
            net.write("a.txt", i.to_string().as_bytes()).unwrap();
        }
        assert_eq!(net.history().unwrap().len(), 2);
        assert_eq!(net.metadata().config.compression_strategy, "none");
    }

    #[test]
    fn test_cleanup_protects_last_backup() {
        let (net, root) = create_test_net();
        net.write("a.txt", b"v1").unwrap();
        net.write("a.txt", b"v2").unwrap();

        // Zero days: everything is older than the cutoff
        let stats = net.cleanup(0, None).unwrap();
        assert_eq!(stats.history_pruned, 1);
        assert_eq!(stats.records_deleted, 1);

        net.undo().unwrap();
        assert_eq!(fs::read(root.path().join("a.txt")).unwrap(), b"v1");
    }

    #[traced_test]
    #[test]
    fn test_undo_is_logged() {
        let (net, _root) = create_test_net();
        net.write("logged.txt", b"x").unwrap();
        net.undo().unwrap();
        assert!(logs_contain("Reverted write"));
    }
}
