//! Utility functions for orcli
//!
//! Hashing, atomic writes, permission handling and path resolution shared by
//! the backup store, the mutation façade and the tools.

use crate::error::{OrcliError, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::trace;

/// SHA-256 of arbitrary data as lowercase hex
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Format bytes in human-readable form
///
/// ```rust,ignore
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Atomic file write (write to temp file then rename)
///
/// The temporary file lives in the target's directory so the final rename
/// never crosses filesystems. Readers observe either the old content or the
/// complete new content, never a partial write.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| OrcliError::Io(e.error))?;

    trace!("Atomically wrote {} bytes to {:?}", content.len(), path);
    Ok(())
}

/// Unix permission bits of a file
#[cfg(unix)]
pub fn get_permissions(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

/// Permission bits (Windows): only the read-only flag is meaningful
#[cfg(not(unix))]
pub fn get_permissions(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Set file permissions (Unix)
#[cfg(unix)]
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Set file permissions (Windows)
#[cfg(not(unix))]
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

/// Lexically normalize a path: drop `.` and fold `..` into its parent
///
/// Works on paths that do not exist yet. A `..` that would climb above the
/// first component is kept so the caller can detect the escape.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if can_pop {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve `path` against `root` and normalize it
pub fn absolutize(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&root.join(path))
    }
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the rest
///
/// Follows symlinks in the part of the path that exists so an escape through a
/// symlinked directory is visible to the caller.
pub fn resolve_existing_prefix(path: &Path) -> Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut rest = Vec::new();

    while !existing.exists() {
        match existing.file_name() {
            Some(name) => {
                rest.push(name.to_os_string());
                existing.pop();
            }
            None => break,
        }
    }

    let mut resolved = if existing.as_os_str().is_empty() {
        PathBuf::new()
    } else {
        existing.canonicalize()?
    };
    for name in rest.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// Make a path relative to a base for display, falling back to the path itself
pub fn display_relative(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_data() {
        let hash1 = hash_data(b"Hello, World!");
        let hash2 = hash_data(b"Hello, World!");
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
        assert_ne!(hash1, hash_data(b"Hello, World?"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1_048_576), "1.00 MB");
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.txt");

        atomic_write(&file_path, b"first").unwrap();
        atomic_write(&file_path, b"second").unwrap();

        assert_eq!(fs::read(&file_path).unwrap(), b"second");
        let leftovers = fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/work/src/../lib/./a.rs")),
            PathBuf::from("/work/lib/a.rs")
        );
        assert_eq!(normalize_path(Path::new("/work/../../etc")), PathBuf::from("/etc"));
        assert_eq!(normalize_path(Path::new("../x")), PathBuf::from("../x"));
    }

    #[test]
    fn test_absolutize_relative_and_absolute() {
        let root = Path::new("/work");
        assert_eq!(absolutize(root, Path::new("a/b.txt")), PathBuf::from("/work/a/b.txt"));
        assert_eq!(absolutize(root, Path::new("/tmp/x")), PathBuf::from("/tmp/x"));
        assert_eq!(absolutize(root, Path::new("../outside")), PathBuf::from("/outside"));
    }

    #[test]
    fn test_resolve_existing_prefix_keeps_missing_tail() {
        let temp_dir = TempDir::new().unwrap();
        let canonical = temp_dir.path().canonicalize().unwrap();
        let target = temp_dir.path().join("missing").join("file.txt");
        let resolved = resolve_existing_prefix(&target).unwrap();
        assert_eq!(resolved, canonical.join("missing").join("file.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("script.sh");
        fs::write(&file_path, b"#!/bin/sh").unwrap();

        set_permissions(&file_path, 0o755).unwrap();
        let mode = get_permissions(&fs::metadata(&file_path).unwrap());
        assert_eq!(mode & 0o777, 0o755);
    }
}
