//! Backup store: immutable snapshots of file contents taken before mutation
//!
//! Every capture produces its own [`BackupRecord`] keyed by a UUID. File
//! content is stored once per distinct SHA-256 in a sharded object directory,
//! so two captures of identical bytes share an object while remaining two
//! independent records. Restore semantics are unaffected by the sharing: a
//! record always yields exactly the bytes it captured.
//!
//! ## Layout
//!
//! ```text
//! storage_root/
//! ├── metadata.json          # Storage metadata and configuration
//! ├── history.json           # Operation log (owned by the façade)
//! ├── history.lock           # Cross-process lock file
//! ├── records/
//! │   └── <backup_id>.bin    # BackupRecord (bincode)
//! └── objects/
//!     └── <prefix>/          # First 2 chars of hash
//!         └── <suffix>       # Compressed content
//! ```
//!
//! Records are never modified after creation. They are deleted only by
//! [`BackupStore::cleanup`] (age-based retention) or [`BackupStore::discard`]
//! when a capture was never referenced because its mutation failed.

use crate::compression::{CompressionEngine, CompressionStrategy};
use crate::error::{OrcliError, Result};
use crate::types::{CleanupStats, StorageConfig, StorageMetadata};
use crate::utils;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// State of a file at capture time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Snapshot {
    /// The file did not exist; undoing means deleting it
    Absent,
    /// The file existed with this content
    Content {
        /// SHA-256 of the original bytes
        hash: String,
        /// Original size in bytes
        size: u64,
        /// Size of the stored object
        stored_size: u64,
        /// Permission bits to restore
        permissions: u32,
    },
    /// The path was a symbolic link; the link itself is kept, not its target
    Symlink {
        /// Where the link pointed
        target: PathBuf,
    },
}

/// Immutable snapshot of a file taken before a mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Unique id across the store
    pub id: String,
    /// Absolute path the snapshot was taken from
    pub original_path: PathBuf,
    /// Capture time
    pub created_at: DateTime<Utc>,
    /// Captured state
    pub snapshot: Snapshot,
}

impl BackupRecord {
    /// Whether this record captured a missing file
    pub fn is_absent(&self) -> bool {
        matches!(self.snapshot, Snapshot::Absent)
    }

    /// Original size in bytes (0 for absent files)
    pub fn size(&self) -> u64 {
        match &self.snapshot {
            Snapshot::Absent | Snapshot::Symlink { .. } => 0,
            Snapshot::Content { size, .. } => *size,
        }
    }

    fn new(original_path: &Path, snapshot: Snapshot) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            original_path: original_path.to_path_buf(),
            created_at: Utc::now(),
            snapshot,
        }
    }
}

/// Counts reported by [`BackupStore::stats`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupStats {
    /// Number of backup records
    pub record_count: usize,
    /// Number of stored content objects
    pub object_count: usize,
    /// Bytes used by stored objects
    pub stored_bytes: u64,
    /// Oldest record, if any
    pub oldest: Option<DateTime<Utc>>,
}

/// Content-addressed backup storage
///
/// Not internally synchronized: the mutation façade serializes every call
/// that writes to the store.
#[derive(Debug)]
pub struct BackupStore {
    root: PathBuf,
    compression: CompressionEngine,
    metadata: StorageMetadata,
}

impl BackupStore {
    /// Initialize a new store at `root`
    ///
    /// Creates the directory layout and writes `metadata.json`. An existing
    /// empty directory is accepted; one that already holds metadata is not.
    pub fn init(root: PathBuf, config: StorageConfig) -> Result<Self> {
        if root.join("metadata.json").exists() {
            return Err(OrcliError::config(format!(
                "storage already initialized at {:?}",
                root
            )));
        }

        let compression = CompressionEngine::new(config.compression_strategy.parse()?);

        fs::create_dir_all(root.join("records"))?;
        fs::create_dir_all(root.join("objects"))?;

        let metadata = StorageMetadata {
            format_version: 1,
            orcli_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
            last_accessed: Utc::now(),
            config,
        };
        let metadata_json = serde_json::to_string_pretty(&metadata)?;
        utils::atomic_write(&root.join("metadata.json"), metadata_json.as_bytes())?;

        info!("Initialized backup storage at {:?}", root);

        Ok(Self {
            root,
            compression,
            metadata,
        })
    }

    /// Open an existing store
    pub fn open(root: PathBuf) -> Result<Self> {
        let metadata_path = root.join("metadata.json");
        if !metadata_path.exists() {
            return Err(OrcliError::StorageNotInitialized(root));
        }

        let metadata_json = fs::read_to_string(&metadata_path)?;
        let mut metadata: StorageMetadata = serde_json::from_str(&metadata_json)?;
        metadata.last_accessed = Utc::now();

        let compression = CompressionEngine::new(metadata.config.compression_strategy.parse()?);

        fs::create_dir_all(root.join("records"))?;
        fs::create_dir_all(root.join("objects"))?;

        debug!("Opened backup storage at {:?}", root);

        Ok(Self {
            root,
            compression,
            metadata,
        })
    }

    /// Open the store if it exists, otherwise initialize it
    pub fn init_or_open(root: PathBuf, config: StorageConfig) -> Result<Self> {
        if root.join("metadata.json").exists() {
            BackupStore::open(root)
        } else {
            BackupStore::init(root, config)
        }
    }

    /// Storage root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage metadata as loaded or created
    pub fn metadata(&self) -> &StorageMetadata {
        &self.metadata
    }

    /// Rewrite `metadata.json` after changing it
    pub fn update_metadata<F>(&mut self, updater: F) -> Result<()>
    where
        F: FnOnce(&mut StorageMetadata),
    {
        updater(&mut self.metadata);
        if let Ok(strategy) = self.metadata.config.compression_strategy.parse::<CompressionStrategy>() {
            self.compression = CompressionEngine::new(strategy);
        }
        let metadata_json = serde_json::to_string_pretty(&self.metadata)?;
        utils::atomic_write(&self.root.join("metadata.json"), metadata_json.as_bytes())?;
        Ok(())
    }

    /// Snapshot the current content of `path`
    ///
    /// Returns `Ok(None)` when the path does not exist: there is nothing to
    /// back up, which is an expected outcome rather than an error. A symbolic
    /// link is captured as the link, even when it dangles.
    pub fn capture(&self, path: &Path) -> Result<Option<BackupRecord>> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if metadata.file_type().is_symlink() {
            let record = BackupRecord::new(
                path,
                Snapshot::Symlink {
                    target: fs::read_link(path)?,
                },
            );
            self.write_record(&record)?;
            debug!("Captured link {} of {:?}", record.id, path);
            return Ok(Some(record));
        }
        if metadata.is_dir() {
            return Err(OrcliError::validation(format!(
                "{:?} is a directory, only files can be backed up",
                path
            )));
        }

        let content = fs::read(path)?;
        let permissions = utils::get_permissions(&metadata);
        let (hash, stored_size) = self.store_object(&content, path)?;

        let record = BackupRecord::new(
            path,
            Snapshot::Content {
                hash,
                size: content.len() as u64,
                stored_size,
                permissions,
            },
        );
        self.write_record(&record)?;

        debug!(
            "Captured backup {} of {:?} ({} bytes)",
            record.id,
            path,
            content.len()
        );
        Ok(Some(record))
    }

    /// Record that `path` did not exist before a mutation
    pub fn record_absent(&self, path: &Path) -> Result<BackupRecord> {
        let record = BackupRecord::new(path, Snapshot::Absent);
        self.write_record(&record)?;
        debug!("Recorded absent pre-state {} for {:?}", record.id, path);
        Ok(record)
    }

    /// Capture `path`, falling back to an absent record when it does not exist
    pub fn capture_state(&self, path: &Path) -> Result<BackupRecord> {
        match self.capture(path)? {
            Some(record) => Ok(record),
            None => self.record_absent(path),
        }
    }

    /// Load a backup record by id
    ///
    /// A missing or undecodable record is reported as [`OrcliError::RestoreFailed`].
    pub fn load(&self, id: &str) -> Result<BackupRecord> {
        let bytes = match fs::read(self.record_path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(OrcliError::restore(format!("backup {} not found", id)));
            }
            Err(e) => return Err(e.into()),
        };

        bincode::serde::decode_from_slice::<BackupRecord, _>(&bytes, bincode::config::standard())
            .map(|(record, _)| record)
            .map_err(|e| OrcliError::restore(format!("backup {} is corrupted: {}", id, e)))
    }

    /// Return the exact bytes a content record captured
    ///
    /// The content hash and size are verified before returning.
    pub fn restore(&self, record: &BackupRecord) -> Result<Vec<u8>> {
        let (hash, size) = match &record.snapshot {
            Snapshot::Absent => {
                return Err(OrcliError::restore(format!(
                    "backup {} records an absent file and has no content",
                    record.id
                )));
            }
            Snapshot::Symlink { .. } => {
                return Err(OrcliError::restore(format!(
                    "backup {} records a symbolic link and has no content",
                    record.id
                )));
            }
            Snapshot::Content { hash, size, .. } => (hash, *size),
        };

        let stored = match fs::read(self.object_path(hash)) {
            Ok(stored) => stored,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(OrcliError::restore(format!(
                    "content of backup {} is missing",
                    record.id
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let content = self.compression.decompress(&stored)?;
        let actual = utils::hash_data(&content);
        if actual != *hash || content.len() as u64 != size {
            return Err(OrcliError::restore(format!(
                "content of backup {} failed verification (expected {}, got {})",
                record.id, hash, actual
            )));
        }

        trace!("Restored {} bytes from backup {}", content.len(), record.id);
        Ok(content)
    }

    /// Delete a record that nothing references, and its object if unshared
    pub fn discard(&self, id: &str) -> Result<()> {
        let path = self.record_path(id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        let referenced = self.referenced_hashes()?;
        self.collect_objects(&referenced)?;
        debug!("Discarded unused backup {}", id);
        Ok(())
    }

    /// All readable records, oldest first
    pub fn list(&self) -> Result<Vec<BackupRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(self.root.join("records"))? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(id) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable backup record {:?}: {}", path, e),
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    /// Delete records created before `older_than`, except `protected` ones
    ///
    /// Objects that no surviving record references are deleted afterwards.
    pub fn cleanup(&self, older_than: DateTime<Utc>, protected: &[String]) -> Result<CleanupStats> {
        let protected: HashSet<&str> = protected.iter().map(String::as_str).collect();
        let mut stats = CleanupStats::default();

        for record in self.list()? {
            if record.created_at >= older_than {
                continue;
            }
            if protected.contains(record.id.as_str()) {
                debug!("Keeping protected backup {}", record.id);
                stats.protected.push(record.id.clone());
                continue;
            }
            fs::remove_file(self.record_path(&record.id))?;
            stats.records_deleted += 1;
        }

        let referenced = self.referenced_hashes()?;
        let (objects_deleted, bytes_reclaimed) = self.collect_objects(&referenced)?;
        stats.objects_deleted = objects_deleted;
        stats.bytes_reclaimed = bytes_reclaimed;

        info!(
            "Backup cleanup removed {} records and {} objects ({})",
            stats.records_deleted,
            stats.objects_deleted,
            utils::format_bytes(stats.bytes_reclaimed)
        );
        Ok(stats)
    }

    /// Record and object counts
    pub fn stats(&self) -> Result<BackupStats> {
        let records = self.list()?;
        let mut stats = BackupStats {
            record_count: records.len(),
            oldest: records.first().map(|r| r.created_at),
            ..Default::default()
        };
        for (_, path) in self.list_objects()? {
            stats.object_count += 1;
            stats.stored_bytes += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        }
        Ok(stats)
    }

    fn store_object(&self, content: &[u8], path: &Path) -> Result<(String, u64)> {
        let hash = utils::hash_data(content);
        let object_path = self.object_path(&hash);

        if object_path.exists() {
            trace!("Object {} already stored", &hash[..8]);
            let stored_size = fs::metadata(&object_path)?.len();
            return Ok((hash, stored_size));
        }

        let stored = self.compression.compress(path, content)?;
        if let Some(parent) = object_path.parent() {
            fs::create_dir_all(parent)?;
        }
        utils::atomic_write(&object_path, &stored)?;

        Ok((hash, stored.len() as u64))
    }

    fn write_record(&self, record: &BackupRecord) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(record, bincode::config::standard())?;
        utils::atomic_write(&self.record_path(&record.id), &bytes)
    }

    fn referenced_hashes(&self) -> Result<HashSet<String>> {
        Ok(self
            .list()?
            .into_iter()
            .filter_map(|record| match record.snapshot {
                Snapshot::Content { hash, .. } => Some(hash),
                Snapshot::Absent | Snapshot::Symlink { .. } => None,
            })
            .collect())
    }

    /// Remove unreferenced objects, returning (count, bytes)
    fn collect_objects(&self, referenced: &HashSet<String>) -> Result<(usize, u64)> {
        let mut deleted = 0;
        let mut bytes = 0;
        for (hash, path) in self.list_objects()? {
            if referenced.contains(&hash) {
                continue;
            }
            bytes += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            fs::remove_file(&path)?;
            if let Some(shard) = path.parent() {
                if fs::read_dir(shard)?.next().is_none() {
                    fs::remove_dir(shard).ok();
                }
            }
            deleted += 1;
        }
        Ok((deleted, bytes))
    }

    fn list_objects(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut objects = Vec::new();
        for entry in walkdir::WalkDir::new(self.root.join("objects"))
            .min_depth(2)
            .max_depth(2)
        {
            let entry = entry.map_err(|e| OrcliError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let prefix = path
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            let suffix = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            objects.push((format!("{}{}", prefix, suffix), path.to_path_buf()));
        }
        Ok(objects)
    }

    fn object_path(&self, hash: &str) -> PathBuf {
        let (prefix, suffix) = hash.split_at(2.min(hash.len()));
        self.root.join("objects").join(prefix).join(suffix)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join("records").join(format!("{}.bin", id))
    }
}
