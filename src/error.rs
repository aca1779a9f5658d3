//! Error types for orcli
//!
//! Every fallible operation in the library returns [`Result<T>`]. The variants
//! mirror the failure kinds the command line distinguishes: a path outside the
//! working root, a missing target, an I/O failure, an unrecoverable restore,
//! a failed remote call, and malformed parameters. The remaining variants are
//! plumbing for (de)serialization and configuration.
//!
//! "Nothing to undo" is deliberately absent here: it is a defined outcome
//! ([`crate::UndoOutcome::NothingToUndo`]), not an error.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the orcli library
pub type Result<T> = std::result::Result<T, OrcliError>;

/// Main error type for all orcli operations
#[derive(Debug, Error)]
pub enum OrcliError {
    /// Target resolves outside the working root or into the storage directory
    #[error("Path denied: {path:?} is outside the allowed root {root:?}")]
    PathDenied {
        /// Path as requested (after normalization)
        path: PathBuf,
        /// Root the path had to stay within
        root: PathBuf,
    },

    /// Target does not exist for an operation that requires it
    #[error("Target not found: {0:?}")]
    TargetNotFound(PathBuf),

    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A backup could not be read back, so undo made no change
    #[error("Restore failed: {0}")]
    RestoreFailed(String),

    /// The AI provider or a web endpoint was unreachable, timed out or answered non-2xx
    #[error("Remote call failed: {0}")]
    RemoteCall(String),

    /// Malformed tool or command parameters
    #[error("Validation error: {0}")]
    Validation(String),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors during YAML serialization
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Errors while parsing TOML configuration
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// Errors while writing TOML configuration
    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Errors during bincode serialization/deserialization
    #[error("Bincode error: {0}")]
    Bincode(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage is not initialized
    #[error("Storage not initialized at path: {0:?}")]
    StorageNotInitialized(PathBuf),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

// Implement conversions for bincode 2.0 error types
impl From<bincode::error::DecodeError> for OrcliError {
    fn from(err: bincode::error::DecodeError) -> Self {
        OrcliError::Bincode(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for OrcliError {
    fn from(err: bincode::error::EncodeError) -> Self {
        OrcliError::Bincode(err.to_string())
    }
}

impl From<reqwest::Error> for OrcliError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OrcliError::RemoteCall(format!("request timed out: {}", err))
        } else {
            OrcliError::RemoteCall(err.to_string())
        }
    }
}

impl OrcliError {
    /// Create a restore error with a custom message
    pub fn restore(msg: impl Into<String>) -> Self {
        OrcliError::RestoreFailed(msg.into())
    }

    /// Create a remote call error with a custom message
    pub fn remote(msg: impl Into<String>) -> Self {
        OrcliError::RemoteCall(msg.into())
    }

    /// Create a validation error with a custom message
    pub fn validation(msg: impl Into<String>) -> Self {
        OrcliError::Validation(msg.into())
    }

    /// Create a configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        OrcliError::Config(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        OrcliError::Internal(msg.into())
    }

    /// Process exit code the command line uses for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            OrcliError::Validation(_) => 2,
            OrcliError::PathDenied { .. } => 3,
            OrcliError::TargetNotFound(_) => 4,
            OrcliError::Io(_) => 5,
            OrcliError::RestoreFailed(_) => 6,
            OrcliError::RemoteCall(_) => 7,
            _ => 1,
        }
    }

    /// Check if re-invoking the same command may succeed without user changes
    pub fn is_recoverable(&self) -> bool {
        matches!(self, OrcliError::RemoteCall(_) | OrcliError::Io(_))
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            OrcliError::PathDenied { path, root } => {
                format!(
                    "Refusing to touch {:?}: it is outside the working root {:?}. Use --path to change the root.",
                    path, root
                )
            }
            OrcliError::TargetNotFound(path) => {
                format!("File {:?} does not exist.", path)
            }
            OrcliError::RestoreFailed(msg) => {
                format!(
                    "Could not restore the backup ({}). No files were changed.",
                    msg
                )
            }
            OrcliError::RemoteCall(msg) => {
                format!(
                    "Remote call failed: {}. Check your network and 'orcli config validate'.",
                    msg
                )
            }
            OrcliError::StorageNotInitialized(path) => {
                format!("No history storage at {:?}. Run a file command first.", path)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrcliError::TargetNotFound(PathBuf::from("a.txt"));
        assert_eq!(err.to_string(), "Target not found: \"a.txt\"");
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = vec![
            OrcliError::validation("x"),
            OrcliError::PathDenied {
                path: PathBuf::from("/etc/passwd"),
                root: PathBuf::from("/work"),
            },
            OrcliError::TargetNotFound(PathBuf::from("missing")),
            OrcliError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk")),
            OrcliError::restore("gone"),
            OrcliError::remote("503"),
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.exit_code()).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), 6);
        assert_eq!(OrcliError::internal("boom").exit_code(), 1);
    }

    #[test]
    fn test_error_recoverable() {
        assert!(OrcliError::remote("timeout").is_recoverable());
        assert!(!OrcliError::restore("corrupt").is_recoverable());
    }

    #[test]
    fn test_user_message_mentions_no_change_on_restore_failure() {
        let msg = OrcliError::restore("object missing").user_message();
        assert!(msg.contains("No files were changed"));
    }
}
