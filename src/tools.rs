//! Local file tools: reading with metadata, searching, code analysis and
//! model-assisted editing
//!
//! Reads and searches never mutate anything. The AI-driven edit and file
//! generation go through [`SafetyNet`] so they are backed up and undoable
//! like any other change.

use crate::ai::{prompts, CompletionClient, CompletionParams};
use crate::error::{OrcliError, Result};
use crate::safety_net::{SafetyNet, STORAGE_DIR_NAME};
use crate::types::OperationResult;
use crate::utils;
use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Lines reported per file by [`search_files`]
const MAX_MATCH_LINES: usize = 5;

/// Facts about a file
#[derive(Debug, Clone, Serialize)]
pub struct FileMetadata {
    pub size: u64,
    pub lines: usize,
    pub extension: String,
    pub language: &'static str,
    pub modified: Option<DateTime<Utc>>,
}

/// File content plus metadata
#[derive(Debug, Clone, Serialize)]
pub struct FileContent {
    pub path: PathBuf,
    pub content: String,
    /// Content was not valid UTF-8 and was decoded lossily
    pub lossy: bool,
    pub metadata: FileMetadata,
}

/// Language name for a file extension
pub fn detect_language(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "py" | "pyw" | "pyi" => "python",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "rs" => "rust",
        "go" => "go",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "sh" | "bash" | "zsh" => "shell",
        "html" | "htm" => "html",
        "css" | "scss" => "css",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "md" | "markdown" => "markdown",
        "sql" => "sql",
        "txt" => "text",
        _ => "unknown",
    }
}

fn check_file(path: &Path) -> Result<fs::Metadata> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => Err(OrcliError::validation(format!(
            "{:?} is a directory",
            path
        ))),
        Ok(metadata) => Ok(metadata),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(OrcliError::TargetNotFound(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Read a file, decoding invalid UTF-8 lossily
pub fn read_file(path: &Path) -> Result<FileContent> {
    let fs_metadata = check_file(path)?;
    let bytes = fs::read(path)?;
    let (content, lossy) = match String::from_utf8(bytes) {
        Ok(content) => (content, false),
        Err(e) => (String::from_utf8_lossy(e.as_bytes()).into_owned(), true),
    };

    let metadata = FileMetadata {
        size: fs_metadata.len(),
        lines: content.lines().count(),
        extension: path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default(),
        language: detect_language(path),
        modified: fs_metadata.modified().ok().map(DateTime::<Utc>::from),
    };

    debug!("Read {:?} ({} bytes, {} lines)", path, metadata.size, metadata.lines);
    Ok(FileContent {
        path: path.to_path_buf(),
        content,
        lossy,
        metadata,
    })
}

/// Filters for [`search_files`]; every given filter must match
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Case-insensitive regex over the file name
    pub name_pattern: Option<String>,
    /// Extension with or without the leading dot
    pub extension: Option<String>,
    /// Case-insensitive regex over the content
    pub content_pattern: Option<String>,
    /// Stop after this many hits
    pub limit: Option<usize>,
}

/// One matching line
#[derive(Debug, Clone, Serialize)]
pub struct MatchLine {
    pub line_number: usize,
    pub line: String,
    pub matched: String,
}

/// One matching file
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: PathBuf,
    pub size: u64,
    pub extension: String,
    pub content_matches: usize,
    pub match_lines: Vec<MatchLine>,
}

fn user_regex(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| OrcliError::validation(format!("invalid pattern '{}': {}", pattern, e)))
}

/// Search `dir` recursively, skipping orcli storage and `.git`
///
/// Files that cannot be read as UTF-8 never match a content pattern.
pub fn search_files(dir: &Path, query: &SearchQuery) -> Result<Vec<SearchHit>> {
    if !dir.is_dir() {
        return Err(OrcliError::TargetNotFound(dir.to_path_buf()));
    }
    let name_re = query.name_pattern.as_deref().map(user_regex).transpose()?;
    let content_re = query.content_pattern.as_deref().map(user_regex).transpose()?;
    let extension = query
        .extension
        .as_deref()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase());
    let limit = query.limit.unwrap_or(usize::MAX);

    let mut hits = Vec::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            e.depth() == 0 || !(e.file_type().is_dir() && (name == STORAGE_DIR_NAME || name == ".git"))
        });

    for entry in walker.filter_map(|e| e.ok()) {
        if hits.len() >= limit {
            break;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let file_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if let Some(wanted) = &extension {
            if &file_ext != wanted {
                continue;
            }
        }
        if let Some(re) = &name_re {
            if !re.is_match(&entry.file_name().to_string_lossy()) {
                continue;
            }
        }

        let mut hit = SearchHit {
            path: path.to_path_buf(),
            size: entry.metadata().map(|m| m.len()).unwrap_or(0),
            extension: file_ext,
            content_matches: 0,
            match_lines: Vec::new(),
        };

        if let Some(re) = &content_re {
            let Ok(content) = fs::read_to_string(path) else {
                continue;
            };
            let matches: Vec<regex::Match> = re.find_iter(&content).collect();
            if matches.is_empty() {
                continue;
            }
            hit.content_matches = matches.len();
            let lines: Vec<&str> = content.lines().collect();
            for m in matches.iter().take(MAX_MATCH_LINES) {
                let line_number = content[..m.start()].matches('\n').count() + 1;
                hit.match_lines.push(MatchLine {
                    line_number,
                    line: lines.get(line_number - 1).map(|l| l.trim().to_string()).unwrap_or_default(),
                    matched: m.as_str().to_string(),
                });
            }
        }

        hits.push(hit);
    }

    debug!("Search in {:?} found {} files", dir, hits.len());
    Ok(hits)
}

/// A named item found in source code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeItem {
    pub name: String,
    pub line: usize,
    /// Parameters for functions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Structure summary of a source file
#[derive(Debug, Clone, Serialize)]
pub struct CodeAnalysis {
    pub language: &'static str,
    pub functions: Vec<CodeItem>,
    pub classes: Vec<CodeItem>,
    pub imports: Vec<String>,
    pub total_lines: usize,
    pub code_lines: usize,
    pub comment_lines: usize,
    pub blank_lines: usize,
}

struct LanguageRules {
    functions: &'static [&'static str],
    classes: &'static str,
    imports: &'static str,
    comment: &'static str,
}

fn rules_for(language: &str) -> Option<LanguageRules> {
    let rules = match language {
        "python" => LanguageRules {
            functions: &[r"(?m)^[ \t]*(?:async[ \t]+)?def[ \t]+(\w+)[ \t]*\(([^)]*)\)"],
            classes: r"(?m)^[ \t]*class[ \t]+(\w+)",
            imports: r"(?m)^[ \t]*(?:from[ \t]+([\w.]+)[ \t]+import|import[ \t]+([\w.]+))",
            comment: "#",
        },
        "javascript" | "typescript" => LanguageRules {
            functions: &[
                r"function\s+(\w+)\s*\(([^)]*)\)",
                r"(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s*)?\(([^)]*)\)\s*=>",
            ],
            classes: r"class\s+(\w+)",
            imports: r#"(?:import\s+.*?from\s+['"]([^'"]+)['"]|require\(\s*['"]([^'"]+)['"]\s*\))"#,
            comment: "//",
        },
        "java" => LanguageRules {
            functions: &[
                r"(?m)^[ \t]*(?:(?:public|private|protected|static|final|abstract|synchronized)[ \t]+)+[\w<>\[\], ]+?[ \t]+(\w+)[ \t]*\(([^)]*)\)",
            ],
            classes: r"(?:class|interface|enum)\s+(\w+)",
            imports: r"(?m)^[ \t]*import[ \t]+(?:static[ \t]+)?([\w.*]+)[ \t]*;",
            comment: "//",
        },
        "rust" => LanguageRules {
            functions: &[r"\bfn\s+(\w+)\s*(?:<[^>]*>)?\s*\(([^)]*)\)"],
            classes: r"\b(?:struct|enum|trait)\s+(\w+)",
            imports: r"(?m)^[ \t]*(?:pub[ \t]+)?use[ \t]+([^;]+);",
            comment: "//",
        },
        _ => return None,
    };
    Some(rules)
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| OrcliError::internal(format!("bad analyzer pattern: {}", e)))
}

fn line_of(content: &str, offset: usize) -> usize {
    content[..offset].matches('\n').count() + 1
}

/// Analyze source text written in `language`
///
/// Languages without analyzer rules get line counts only.
pub fn analyze_source(language: &'static str, content: &str) -> Result<CodeAnalysis> {
    let rules = rules_for(language);
    let comment = rules.as_ref().map(|r| r.comment);

    let mut analysis = CodeAnalysis {
        language,
        functions: Vec::new(),
        classes: Vec::new(),
        imports: Vec::new(),
        total_lines: 0,
        code_lines: 0,
        comment_lines: 0,
        blank_lines: 0,
    };

    for line in content.lines() {
        let trimmed = line.trim();
        analysis.total_lines += 1;
        if trimmed.is_empty() {
            analysis.blank_lines += 1;
        } else if comment.is_some_and(|c| trimmed.starts_with(c)) {
            analysis.comment_lines += 1;
        } else {
            analysis.code_lines += 1;
        }
    }

    let Some(rules) = rules else {
        return Ok(analysis);
    };

    for pattern in rules.functions {
        for caps in compile(pattern)?.captures_iter(content) {
            if let (Some(name), Some(whole)) = (caps.get(1), caps.get(0)) {
                analysis.functions.push(CodeItem {
                    name: name.as_str().to_string(),
                    line: line_of(content, whole.start()),
                    detail: caps.get(2).map(|p| p.as_str().trim().to_string()),
                });
            }
        }
    }
    analysis.functions.sort_by_key(|item| item.line);

    for caps in compile(rules.classes)?.captures_iter(content) {
        if let (Some(name), Some(whole)) = (caps.get(1), caps.get(0)) {
            analysis.classes.push(CodeItem {
                name: name.as_str().to_string(),
                line: line_of(content, whole.start()),
                detail: None,
            });
        }
    }

    for caps in compile(rules.imports)?.captures_iter(content) {
        if let Some(module) = caps.get(1).or_else(|| caps.get(2)) {
            let module = module.as_str().trim().to_string();
            if !analysis.imports.contains(&module) {
                analysis.imports.push(module);
            }
        }
    }

    Ok(analysis)
}

/// Analyze a file on disk
pub fn analyze_code(path: &Path) -> Result<CodeAnalysis> {
    let file = read_file(path)?;
    analyze_source(file.metadata.language, &file.content)
}

/// Remove a Markdown code fence wrapped around a model reply
///
/// A reply that starts with a fence loses its first line and a closing fence
/// line. Otherwise the first fenced block is taken when there is one, and the
/// trimmed reply is returned as-is when there is none.
pub fn strip_code_fences(reply: &str) -> String {
    let trimmed = reply.trim();
    if trimmed.starts_with("```") {
        let mut lines: Vec<&str> = trimmed.lines().skip(1).collect();
        if lines.last().is_some_and(|l| l.trim_start().starts_with("```")) {
            lines.pop();
        }
        return lines.join("\n");
    }

    if let Ok(block) = Regex::new(r"(?s)```[\w+#-]*[ \t]*\n(.*?)\n[ \t]*```") {
        if let Some(inner) = block.captures(trimmed).and_then(|c| c.get(1)) {
            return inner.as_str().to_string();
        }
    }
    trimmed.to_string()
}

/// Result of [`ai_modify_file`]
#[derive(Debug, Clone, Serialize)]
pub struct AiEdit {
    pub operation: OperationResult,
    pub language: &'static str,
    pub model: String,
    pub request: String,
}

/// Ask the model to rewrite a file and apply the reply as a `Modify`
pub fn ai_modify_file(
    net: &SafetyNet,
    client: &dyn CompletionClient,
    path: &Path,
    request: &str,
    model: &str,
) -> Result<AiEdit> {
    if request.trim().is_empty() {
        return Err(OrcliError::validation("modification request is empty"));
    }
    let absolute = utils::absolutize(net.root(), path);
    let file = read_file(&absolute)?;
    let language = file.metadata.language;
    let display = utils::display_relative(&absolute, net.root());

    let params = CompletionParams::default().with_system(prompts::modify_system(language));
    let reply = client.complete(
        &prompts::modify(&display, language, &file.content, request),
        model,
        &params,
    )?;

    let mut new_content = strip_code_fences(&reply);
    if file.content.ends_with('\n') && !new_content.ends_with('\n') {
        new_content.push('\n');
    }

    let operation = net.modify(&absolute, new_content.as_bytes())?;
    info!("Applied AI edit to {:?} with {}", absolute, model);
    Ok(AiEdit {
        operation,
        language,
        model: model.to_string(),
        request: request.to_string(),
    })
}

/// File type named in generation prompts, from the target's extension
pub fn file_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "HTML",
        "py" => "Python",
        "js" => "JavaScript",
        "ts" => "TypeScript",
        "css" => "CSS",
        "java" => "Java",
        "cpp" => "C++",
        "c" => "C",
        "cs" => "C#",
        "php" => "PHP",
        "rb" => "Ruby",
        "go" => "Go",
        "rs" => "Rust",
        "sql" => "SQL",
        "md" => "Markdown",
        _ => "text",
    }
}

/// Result of [`ai_create_file`]
#[derive(Debug, Clone, Serialize)]
pub struct AiCreation {
    pub operation: OperationResult,
    pub file_type: String,
    pub model: String,
    pub prompt: String,
}

/// Ask the model for the content of a new file and write it as a `Write`
///
/// An existing file is overwritten, and is backed up first like any write.
pub fn ai_create_file(
    net: &SafetyNet,
    client: &dyn CompletionClient,
    path: &Path,
    request: &str,
    file_type: Option<&str>,
    model: &str,
) -> Result<AiCreation> {
    if request.trim().is_empty() {
        return Err(OrcliError::validation("generation prompt is empty"));
    }
    let file_type = file_type.unwrap_or_else(|| file_type_for(path));
    let params = CompletionParams::default().with_system(prompts::create_system(file_type));
    let reply = client.complete(&prompts::create(file_type, request), model, &params)?;

    let mut content = strip_code_fences(&reply);
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    let operation = net.write(path, content.as_bytes())?;
    info!("Generated {:?} as {} with {}", path, file_type, model);
    Ok(AiCreation {
        operation,
        file_type: file_type.to_string(),
        model: model.to_string(),
        prompt: request.to_string(),
    })
}

/// How long a summary should be
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl SummaryLength {
    fn instruction(self) -> &'static str {
        match self {
            SummaryLength::Short => "Provide a brief 2-3 sentence summary",
            SummaryLength::Medium => "Provide a comprehensive paragraph summary",
            SummaryLength::Long => "Provide a detailed multi-paragraph summary",
        }
    }
}

impl FromStr for SummaryLength {
    type Err = OrcliError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "short" => Ok(SummaryLength::Short),
            "medium" => Ok(SummaryLength::Medium),
            "long" => Ok(SummaryLength::Long),
            other => Err(OrcliError::validation(format!(
                "unknown summary length '{}' (expected short, medium or long)",
                other
            ))),
        }
    }
}

/// Model summary of some text
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub summary: String,
    pub length: SummaryLength,
    /// Characters in the input
    pub original_length: usize,
    /// Characters in the summary
    pub summary_length: usize,
    pub compression_ratio: f64,
}

/// Ask the model to summarize `content`
pub fn ai_summarize(
    client: &dyn CompletionClient,
    content: &str,
    length: SummaryLength,
    model: &str,
) -> Result<Summary> {
    if content.trim().is_empty() {
        return Err(OrcliError::validation("no content to summarize"));
    }
    let params = CompletionParams::default().with_system(prompts::summarize_system());
    let reply = client.complete(&prompts::summarize(length.instruction(), content), model, &params)?;
    let summary = reply.trim().to_string();

    let original_length = content.chars().count();
    let summary_length = summary.chars().count();
    Ok(Summary {
        length,
        original_length,
        summary_length,
        compression_ratio: summary_length as f64 / original_length as f64,
        summary,
    })
}

/// Lines `spec` picks out of `content`
///
/// `spec` is a 1-based line number (`"7"`) or an inclusive range (`"3-10"`).
/// Ranges running past the end are cut at the last line.
pub fn select_lines(content: &str, spec: &str) -> Result<String> {
    let invalid = || OrcliError::validation(format!("invalid line range '{}' (use N or START-END)", spec));
    let parse = |n: &str| n.trim().parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(invalid);

    let (start, end) = match spec.split_once('-') {
        Some((start, end)) => (parse(start)?, parse(end)?),
        None => {
            let line = parse(spec)?;
            (line, line)
        }
    };
    if start > end {
        return Err(invalid());
    }

    let selected: Vec<&str> = content.lines().skip(start - 1).take(end - start + 1).collect();
    Ok(selected.join("\n"))
}

/// What a review should concentrate on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReviewFocus {
    #[default]
    General,
    Security,
    Performance,
    Style,
}

impl ReviewFocus {
    /// Instruction added to the review prompt
    pub fn instruction(self) -> &'static str {
        match self {
            ReviewFocus::General => "Provide a comprehensive code review",
            ReviewFocus::Security => "Focus on security vulnerabilities and best practices",
            ReviewFocus::Performance => "Focus on performance optimization opportunities",
            ReviewFocus::Style => "Focus on code style and readability improvements",
        }
    }
}

impl FromStr for ReviewFocus {
    type Err = OrcliError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "general" => Ok(ReviewFocus::General),
            "security" => Ok(ReviewFocus::Security),
            "performance" => Ok(ReviewFocus::Performance),
            "style" => Ok(ReviewFocus::Style),
            other => Err(OrcliError::validation(format!(
                "unknown review focus '{}' (expected general, security, performance or style)",
                other
            ))),
        }
    }
}

/// Ask the model to review a file
pub fn ai_review_file(
    client: &dyn CompletionClient,
    path: &Path,
    model: &str,
    focus: ReviewFocus,
) -> Result<String> {
    let file = read_file(path)?;
    let language = file.metadata.language;
    let params = CompletionParams::default().with_system(prompts::review_system());
    client.complete(
        &prompts::review(language, &file.content, focus.instruction()),
        model,
        &params,
    )
}
