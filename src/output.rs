//! Rendering of command results
//!
//! Every command can print its result for people (colored text) or as JSON
//! or YAML for scripts. Structured output always goes to stdout as a single
//! document.

use crate::error::Result;
use crate::types::{OperationKind, OperationRecord};
use crate::utils;
use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use serde::Serialize;
use std::path::Path;

/// Output style selected with `--format`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn is_human(&self) -> bool {
        matches!(self, OutputFormat::Human)
    }
}

/// Serialize `value` for a structured format; `None` for human output
pub fn render<T: Serialize>(value: &T, format: OutputFormat) -> Result<Option<String>> {
    match format {
        OutputFormat::Human => Ok(None),
        OutputFormat::Json => Ok(Some(serde_json::to_string_pretty(value)?)),
        OutputFormat::Yaml => Ok(Some(serde_yaml::to_string(value)?)),
    }
}

/// Print `value` in `format`, calling `human` for human output
pub fn emit<T, F>(value: &T, format: OutputFormat, human: F) -> Result<()>
where
    T: Serialize,
    F: FnOnce(&T),
{
    match render(value, format)? {
        Some(text) => println!("{}", text.trim_end()),
        None => human(value),
    }
    Ok(())
}

/// Colored label for an operation kind
pub fn kind_label(kind: OperationKind) -> ColoredString {
    let label = format!("{:<6}", kind.as_str());
    match kind {
        OperationKind::Write => label.green(),
        OperationKind::Modify => label.yellow(),
        OperationKind::Remove => label.red(),
        OperationKind::Undo => label.magenta(),
    }
}

/// One history line: id, time, kind, path and status
pub fn format_record(record: &OperationRecord, root: &Path) -> String {
    let status = if record.success {
        "ok".green().to_string()
    } else {
        format!(
            "failed: {}",
            record.error.as_deref().unwrap_or("unknown error")
        )
        .red()
        .to_string()
    };
    let mut line = format!(
        "{} {} {} {} {}",
        format!("#{:<4}", record.id).yellow().bold(),
        record
            .timestamp
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed(),
        kind_label(record.kind),
        utils::display_relative(&record.target_path, root).cyan(),
        status
    );
    if let Some(reverted) = record.reverts {
        line.push_str(&format!(" {}", format!("(reverts #{})", reverted).dimmed()));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OperationDraft;
    use std::path::PathBuf;

    fn record() -> OperationRecord {
        OperationDraft::succeeded(
            OperationKind::Write,
            PathBuf::from("/work/src/a.txt"),
            Some("b1".into()),
        )
        .into_record(12)
    }

    #[test]
    fn test_render_structured() {
        let rec = record();
        assert!(render(&rec, OutputFormat::Human).unwrap().is_none());

        let json = render(&rec, OutputFormat::Json).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["id"], 12);
        assert_eq!(value["kind"], "write");

        let yaml = render(&rec, OutputFormat::Yaml).unwrap().unwrap();
        assert!(yaml.contains("kind: write"));
    }

    #[test]
    fn test_format_record_is_relative_to_root() {
        let line = format_record(&record(), Path::new("/work"));
        assert!(line.contains("#12"));
        assert!(line.contains("src/a.txt"));
        assert!(!line.contains("/work/src"));
    }
}
