//! Main test module for orcli
//!
//! This module includes all test suites:
//! - Integration tests for end-to-end undo scenarios
//! - Chaos tests for damaged storage and concurrent writers
//! - Property-based tests for invariants

pub mod chaos;
pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::orcli::*;
    use std::fs;
    use tempfile::TempDir;

    fn open(work: &TempDir) -> SafetyNet {
        SafetyNet::open_or_init(
            work.path().to_path_buf(),
            SafetyNet::default_storage_path(work.path()),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_file_round_trip() {
        let work = TempDir::new().unwrap();
        let net = open(&work);
        let target = work.path().join("empty.txt");
        fs::write(&target, b"").unwrap();

        net.write("empty.txt", b"now with content").unwrap();
        net.undo().unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"");
    }

    #[test]
    fn test_unicode_filenames() {
        let work = TempDir::new().unwrap();
        let net = open(&work);

        let names = ["файл.txt", "文件.txt", "file with spaces.txt", "🚀.txt"];
        for name in names {
            // Skip names the filesystem refuses
            if net.write(name, name.as_bytes()).is_err() {
                continue;
            }
            assert_eq!(fs::read(work.path().join(name)).unwrap(), name.as_bytes());
            net.undo().unwrap();
            assert!(!work.path().join(name).exists());
        }
    }

    #[test]
    fn test_large_file_is_compressed_and_restored() {
        let work = TempDir::new().unwrap();
        let net = open(&work);
        let target = work.path().join("big.log");
        let content = "line of a fairly repetitive log file\n".repeat(20_000);
        fs::write(&target, &content).unwrap();

        net.modify("big.log", b"truncated").unwrap();
        let stats = net.backup_stats().unwrap();
        assert!(stats.stored_bytes < content.len() as u64);

        net.undo().unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), content);
    }

    #[test]
    fn test_absolute_path_inside_root() {
        let work = TempDir::new().unwrap();
        let net = open(&work);
        let absolute = net.root().join("abs.txt");

        let result = net.write(&absolute, b"x").unwrap();
        assert_eq!(result.target_path, absolute);
    }

    #[test]
    fn test_dot_segments_are_normalized() {
        let work = TempDir::new().unwrap();
        let net = open(&work);
        fs::create_dir(work.path().join("sub")).unwrap();

        net.write("sub/../same.txt", b"x").unwrap();
        assert!(work.path().join("same.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_readonly_file_permissions_restored() {
        use std::os::unix::fs::PermissionsExt;

        let work = TempDir::new().unwrap();
        let net = open(&work);
        let target = work.path().join("ro.txt");
        fs::write(&target, b"read only").unwrap();
        fs::set_permissions(&target, fs::Permissions::from_mode(0o444)).unwrap();

        net.remove("ro.txt").unwrap();
        net.undo().unwrap();
        let mode = fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o444);
    }
}
