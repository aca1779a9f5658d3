//! # orcli - AI assistant for the command line with a safety net
//!
//! orcli reads, searches, analyzes and edits local files, talks to an
//! OpenRouter model and fetches web content. Every change it makes to a file
//! goes through one choke point that backs the file up first, so any change
//! can be undone.
//!
//! ## Overview
//!
//! The core is four cooperating parts:
//!
//! - **Backup store** ([`backup`]): immutable snapshots of file contents taken
//!   before each mutation, content-addressed and compressed
//! - **Operation log** ([`history`]): bounded, strictly ordered audit trail of
//!   every attempted mutation and undo
//! - **Undo engine** ([`undo`]): reverts the most recent operation from its
//!   backup and records the revert as an undo of its own
//! - **Mutation façade** ([`safety_net`]): the only way orcli writes, modifies
//!   or removes a file
//!
//! Around the core sit the tools the command line exposes: [`tools`] for local
//! files and code, [`web`] for HTTP, [`ai`] for the model provider and
//! [`config`] for user settings. [`registry`] names every tool with typed
//! `key=value` parameters, [`debug`] scans projects for problems and
//! [`system`] runs shell commands. Shell commands are the one thing orcli
//! runs that the safety net cannot undo.
//!
//! ## Quick Start
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
//! net.write("config.yaml", b"debug: true\n")?;
//! net.remove("config.yaml")?;
//!
//! // Brings config.yaml back
//! match net.undo()? {
//!     UndoOutcome::Restored(report) => println!("reverted #{}", report.reverted_record_id),
//!     UndoOutcome::NothingToUndo => println!("nothing to undo"),
//! }
//!
//! for record in net.list(Some(10))? {
//!     println!("#{} {} {:?}", record.id, record.kind, record.target_path);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Configuration
//!
//! ```rust,no_run
//! use orcli::{CompressionStrategy, SafetyNetBuilder};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Skips already-compressed formats such as images and archives
//! let strategy: CompressionStrategy = "adaptive".parse()?;
//! let net = SafetyNetBuilder::new()
//!     .compression_strategy(strategy)
//!     .max_history(500)
//!     .build(PathBuf::from("."), PathBuf::from("./.orcli"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - No file is changed without a backup of its previous state, including
//!   "did not exist" for newly created files
//! - Record ids are strictly increasing for the life of a storage directory
//! - A failed mutation leaves the target untouched and is recorded as failed
//! - A failed undo leaves the target untouched and the log unchanged
//! - Undoing an undo reverts it, so undo doubles as redo
//! - Mutations are serialized across threads and across processes sharing a
//!   storage directory
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`], whose error is [`OrcliError`]. Each
//! error category maps to a distinct process exit code through
//! [`OrcliError::exit_code`].

pub mod ai;
pub mod backup;
pub mod compression;
pub mod config;
pub mod debug;
pub mod error;
pub mod history;
pub mod output;
pub mod registry;
pub mod safety_net;
pub mod system;
pub mod tools;
pub mod types;
pub mod undo;
pub mod utils;
pub mod web;

pub use ai::{CompletionClient, CompletionParams, OpenRouterClient, ScriptedClient};
pub use backup::{BackupRecord, BackupStats, BackupStore, Snapshot};
pub use compression::{CompressionEngine, CompressionStrategy};
pub use config::Config;
pub use error::{OrcliError, Result};
pub use history::HistoryLog;
pub use registry::{ToolRegistry, ToolSpec};
pub use safety_net::{SafetyNet, SafetyNetBuilder};
pub use types::*;
pub use undo::UndoEngine;
