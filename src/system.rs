//! Shell commands and environment facts
//!
//! Commands run through the platform shell with captured output and a hard
//! timeout. A small blocklist refuses obviously destructive commands before
//! anything is spawned. Shell commands bypass the safety net, so nothing they
//! change on disk can be undone.

use crate::error::{OrcliError, Result};
use serde::Serialize;
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Timeout for `shell_exec` when none is given
pub const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(30);

/// Substrings that get a command refused, matched case-insensitively
pub const BLOCKED_COMMANDS: &[&str] = &["rm -rf", "del /f", "format", "fdisk", "mkfs"];

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of a finished command
#[derive(Debug, Clone, Serialize)]
pub struct ShellOutput {
    pub command: String,
    pub cwd: PathBuf,
    /// `None` when the process was ended by a signal
    pub return_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

/// Refuse empty commands and anything on the blocklist
pub fn check_command(command: &str) -> Result<()> {
    if command.trim().is_empty() {
        return Err(OrcliError::validation("command is empty"));
    }
    let lowered = command.to_lowercase();
    if let Some(blocked) = BLOCKED_COMMANDS.iter().find(|b| lowered.contains(*b)) {
        warn!("Refusing command containing '{}'", blocked);
        return Err(OrcliError::validation(format!(
            "dangerous command blocked (contains '{}')",
            blocked
        )));
    }
    Ok(())
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// Read a pipe to the end on its own thread
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Option<std::process::ExitStatus>> {
    let start = Instant::now();
    loop {
        match child.try_wait()? {
            Some(status) => return Ok(Some(status)),
            None if start.elapsed() >= timeout => {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(None);
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    }
}

/// Run `command` through the shell in `cwd`
///
/// A command still running after `timeout` is killed and reported as an
/// [`OrcliError::Io`] with kind `TimedOut`. A non-zero exit is not an error.
pub fn run_shell(command: &str, cwd: &Path, timeout: Duration) -> Result<ShellOutput> {
    check_command(command)?;
    if timeout.is_zero() {
        return Err(OrcliError::validation("timeout must be positive"));
    }
    if !cwd.is_dir() {
        return Err(OrcliError::TargetNotFound(cwd.to_path_buf()));
    }

    debug!("Running {:?} in {:?} (timeout {:?})", command, cwd, timeout);
    let start = Instant::now();
    let mut child = shell_command(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let Some(status) = wait_with_timeout(&mut child, timeout)? else {
        warn!("Command timed out after {:?}: {}", timeout, command);
        return Err(OrcliError::Io(io::Error::new(
            ErrorKind::TimedOut,
            format!("command timed out after {}", humantime::format_duration(timeout)),
        )));
    };

    let join = |handle: JoinHandle<Vec<u8>>| {
        handle
            .join()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .map_err(|_| OrcliError::internal("output reader thread panicked"))
    };
    let output = ShellOutput {
        command: command.to_string(),
        cwd: cwd.to_path_buf(),
        return_code: status.code(),
        success: status.success(),
        stdout: join(stdout)?,
        stderr: join(stderr)?,
        elapsed: start.elapsed(),
    };

    info!("Command exited with {:?}: {}", output.return_code, command);
    Ok(output)
}

/// Facts about the machine and the running process
#[derive(Debug, Clone, Serialize)]
pub struct EnvInfo {
    pub os: &'static str,
    pub family: &'static str,
    pub arch: &'static str,
    pub cwd: Option<PathBuf>,
    pub home: Option<PathBuf>,
    pub user: String,
    pub shell: Option<String>,
    pub orcli_version: &'static str,
}

/// Collect [`EnvInfo`] for this process
pub fn env_info() -> EnvInfo {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    EnvInfo {
        os: std::env::consts::OS,
        family: std::env::consts::FAMILY,
        arch: std::env::consts::ARCH,
        cwd: std::env::current_dir().ok(),
        home: dirs::home_dir(),
        user,
        shell: std::env::var("SHELL").or_else(|_| std::env::var("COMSPEC")).ok(),
        orcli_version: env!("CARGO_PKG_VERSION"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_blocklist_is_case_insensitive() {
        for command in ["rm -rf /", "RM -RF build", "mkfs.ext4 /dev/sda1", "echo x | FORMAT c:"] {
            let err = check_command(command).unwrap_err();
            assert!(matches!(err, OrcliError::Validation(_)), "{command}");
            assert_eq!(err.exit_code(), 2);
        }
        assert!(check_command("   ").is_err());
        assert!(check_command("ls -la").is_ok());
    }

    #[test]
    fn test_blocked_command_never_runs() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("marker");
        std::fs::write(&marker, "x").unwrap();

        let result = run_shell("rm -rf marker", dir.path(), DEFAULT_SHELL_TIMEOUT);
        assert!(matches!(result, Err(OrcliError::Validation(_))));
        assert!(marker.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_output_and_exit_code_are_captured() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hi").unwrap();

        let output = run_shell("ls; echo oops >&2; exit 3", dir.path(), DEFAULT_SHELL_TIMEOUT).unwrap();
        assert!(output.stdout.contains("hello.txt"));
        assert_eq!(output.stderr.trim(), "oops");
        assert_eq!(output.return_code, Some(3));
        assert!(!output.success);
        assert_eq!(output.cwd, dir.path());
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_the_command() {
        let dir = TempDir::new().unwrap();
        let start = Instant::now();
        let err = run_shell("sleep 5", dir.path(), Duration::from_millis(200)).unwrap_err();

        assert!(start.elapsed() < Duration::from_secs(4));
        match err {
            OrcliError::Io(e) => assert_eq!(e.kind(), ErrorKind::TimedOut),
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_large_output_does_not_block() {
        let dir = TempDir::new().unwrap();
        let output = run_shell("yes line | head -n 50000", dir.path(), DEFAULT_SHELL_TIMEOUT).unwrap();
        assert_eq!(output.stdout.lines().count(), 50000);
    }

    #[test]
    fn test_missing_cwd_is_target_not_found() {
        let dir = TempDir::new().unwrap();
        let result = run_shell("echo hi", &dir.path().join("nope"), DEFAULT_SHELL_TIMEOUT);
        assert!(matches!(result, Err(OrcliError::TargetNotFound(_))));
    }

    #[test]
    fn test_env_info() {
        let info = env_info();
        assert_eq!(info.os, std::env::consts::OS);
        assert!(!info.arch.is_empty());
        assert!(!info.user.is_empty());
        assert_eq!(info.orcli_version, env!("CARGO_PKG_VERSION"));
    }
}
