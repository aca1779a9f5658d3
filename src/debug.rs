//! Codebase scanning and AI-assisted debugging
//!
//! Three levels, all backed by the same static checks:
//!
//! - [`debug_file`]: one file, static findings plus a model analysis and
//!   optional fix suggestions
//! - [`analyze_codebase`]: a depth-limited scan of a directory with
//!   per-file findings and model insights
//! - [`debug_project`]: structure, dependency manifests, findings, an
//!   optional test run and a model assessment
//!
//! Static checks are pattern heuristics, not a parser.

use crate::ai::{prompts, CompletionClient, CompletionParams};
use crate::error::{OrcliError, Result};
use crate::safety_net::{SafetyNet, STORAGE_DIR_NAME};
use crate::system::{self, ShellOutput};
use crate::tools::{self, detect_language};
use crate::types::OperationResult;
use chrono::{DateTime, Local, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Directories never scanned
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "__pycache__",
    "node_modules",
    ".git",
    "dist",
    "build",
    "target",
    ".venv",
    "venv",
    STORAGE_DIR_NAME,
];

/// Timeout for `--test-command`
pub const TEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Debug print calls above this count are reported
const DEBUG_OUTPUT_THRESHOLD: usize = 5;
const LONG_LINE: usize = 120;
/// Files with findings listed in the prompt for codebase insights
const PROMPT_FILE_LIMIT: usize = 20;

/// Languages a scan can be restricted to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LanguageFilter {
    Python,
    Javascript,
    Typescript,
    Java,
    Cpp,
    #[default]
    All,
}

impl LanguageFilter {
    fn extensions(self) -> &'static [&'static str] {
        match self {
            LanguageFilter::Python => &["py"],
            LanguageFilter::Javascript => &["js", "jsx"],
            LanguageFilter::Typescript => &["ts", "tsx"],
            LanguageFilter::Java => &["java"],
            LanguageFilter::Cpp => &["cpp", "cxx", "cc", "c", "h", "hpp"],
            LanguageFilter::All => &[
                "py", "js", "jsx", "ts", "tsx", "java", "cpp", "cxx", "cc", "c", "h", "hpp", "cs", "php",
                "rb", "go", "rs",
            ],
        }
    }

    fn matches(self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions().contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }
}

/// Kind of problem a debug run concentrates on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ErrorFocus {
    Syntax,
    Logic,
    Performance,
    Security,
    #[default]
    All,
}

impl ErrorFocus {
    fn instruction(self) -> &'static str {
        match self {
            ErrorFocus::Syntax => "Focus on syntax errors, typos and structural issues",
            ErrorFocus::Logic => "Focus on logical errors, incorrect algorithms and flow issues",
            ErrorFocus::Performance => "Focus on performance bottlenecks and optimization opportunities",
            ErrorFocus::Security => "Focus on security vulnerabilities and best practices",
            ErrorFocus::All => "Perform a comprehensive analysis covering all types of issues",
        }
    }
}

/// Where and what a scan looks at
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub language: LanguageFilter,
    /// Directory levels below the scanned directory; 0 scans only its own files
    pub max_depth: usize,
    /// Directory names skipped in addition to [`DEFAULT_EXCLUDES`]
    pub exclude: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            language: LanguageFilter::All,
            max_depth: 3,
            exclude: Vec::new(),
        }
    }
}

/// A source file found by [`scan_codebase`]
#[derive(Debug, Clone, Serialize)]
pub struct ScannedFile {
    pub relative_path: PathBuf,
    pub language: &'static str,
    pub size: u64,
    pub lines: usize,
    pub modified: Option<DateTime<Utc>>,
}

/// Result of [`scan_codebase`]
#[derive(Debug, Clone, Serialize)]
pub struct CodebaseScan {
    pub directory: PathBuf,
    pub total_files: usize,
    pub total_lines: usize,
    /// Files per language
    pub languages: BTreeMap<&'static str, usize>,
    pub files: Vec<ScannedFile>,
}

/// Walk `dir` for source files
///
/// Files that are not valid UTF-8 or cannot be read are skipped.
pub fn scan_codebase(dir: &Path, options: &ScanOptions) -> Result<CodebaseScan> {
    if !dir.is_dir() {
        return Err(OrcliError::TargetNotFound(dir.to_path_buf()));
    }

    let excluded = |name: &str| {
        DEFAULT_EXCLUDES.contains(&name) || options.exclude.iter().any(|e| e == name)
    };
    let walker = WalkDir::new(dir)
        .max_depth(options.max_depth + 1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !(e.file_type().is_dir() && excluded(&e.file_name().to_string_lossy())));

    let mut scan = CodebaseScan {
        directory: dir.to_path_buf(),
        total_files: 0,
        total_lines: 0,
        languages: BTreeMap::new(),
        files: Vec::new(),
    };

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() || !options.language.matches(entry.path()) {
            continue;
        }
        let Ok(content) = fs::read_to_string(entry.path()) else {
            debug!("Skipping unreadable {:?}", entry.path());
            continue;
        };
        let metadata = entry.metadata().ok();
        let language = detect_language(entry.path());
        let file = ScannedFile {
            relative_path: entry.path().strip_prefix(dir).unwrap_or(entry.path()).to_path_buf(),
            language,
            size: metadata.as_ref().map(|m| m.len()).unwrap_or(0),
            lines: content.lines().count(),
            modified: metadata.and_then(|m| m.modified().ok()).map(DateTime::<Utc>::from),
        };
        scan.total_lines += file.lines;
        *scan.languages.entry(language).or_default() += 1;
        scan.files.push(file);
    }

    scan.total_files = scan.files.len();
    info!(
        "Scanned {:?}: {} files, {} lines",
        dir, scan.total_files, scan.total_lines
    );
    Ok(scan)
}

/// A problem tied to a line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineIssue {
    pub line: usize,
    pub message: String,
}

/// Line counts of a file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LineMetrics {
    pub total_lines: usize,
    pub code_lines: usize,
    pub comment_lines: usize,
    pub blank_lines: usize,
}

/// Result of [`static_analysis`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct StaticFindings {
    pub syntax_issues: Vec<LineIssue>,
    pub metrics: LineMetrics,
    pub code_smells: Vec<String>,
    pub security_issues: Vec<String>,
}

impl StaticFindings {
    pub fn is_clean(&self) -> bool {
        self.syntax_issues.is_empty() && self.code_smells.is_empty() && self.security_issues.is_empty()
    }

    /// Findings as prompt text
    fn describe(&self) -> String {
        let mut text = format!(
            "- Syntax issues found: {}\n- Code smells detected: {}\n- Security issues flagged: {}",
            self.syntax_issues.len(),
            self.code_smells.len(),
            self.security_issues.len()
        );
        for issue in &self.syntax_issues {
            text.push_str(&format!("\n  * line {}: {}", issue.line, issue.message));
        }
        for item in self.code_smells.iter().chain(&self.security_issues) {
            text.push_str(&format!("\n  * {}", item));
        }
        text
    }
}

struct Syntax {
    line_comment: &'static [&'static str],
    block_comment: bool,
    quotes: &'static [char],
    triple_quotes: bool,
    multiline_quote: Option<char>,
}

fn syntax_for(language: &str) -> Option<Syntax> {
    let syntax = match language {
        "python" => Syntax {
            line_comment: &["#"],
            block_comment: false,
            quotes: &['"', '\''],
            triple_quotes: true,
            multiline_quote: None,
        },
        "javascript" | "typescript" => Syntax {
            line_comment: &["//"],
            block_comment: true,
            quotes: &['"', '\'', '`'],
            triple_quotes: false,
            multiline_quote: Some('`'),
        },
        "go" => Syntax {
            line_comment: &["//"],
            block_comment: true,
            quotes: &['"', '\'', '`'],
            triple_quotes: false,
            multiline_quote: Some('`'),
        },
        // Single quotes double as lifetimes
        "rust" => Syntax {
            line_comment: &["//"],
            block_comment: true,
            quotes: &['"'],
            triple_quotes: false,
            multiline_quote: Some('"'),
        },
        "java" | "c" | "cpp" | "csharp" => Syntax {
            line_comment: &["//"],
            block_comment: true,
            quotes: &['"', '\''],
            triple_quotes: false,
            multiline_quote: None,
        },
        "php" => Syntax {
            line_comment: &["//", "#"],
            block_comment: true,
            quotes: &['"', '\''],
            triple_quotes: false,
            multiline_quote: None,
        },
        _ => return None,
    };
    Some(syntax)
}

enum Lexer {
    Code,
    LineComment,
    BlockComment { line: usize },
    Str { quote: char, line: usize },
    TripleStr { quote: char, line: usize },
}

/// First unbalanced `()`, `[]` or `{}` outside strings and comments
pub fn check_delimiters(content: &str, language: &str) -> Option<LineIssue> {
    let syntax = syntax_for(language)?;
    let chars: Vec<char> = content.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut state = Lexer::Code;
    let mut line = 1;
    let mut i = 0;

    let starts_with = |at: usize, pat: &str| pat.chars().enumerate().all(|(k, c)| chars.get(at + k) == Some(&c));

    while i < chars.len() {
        let c = chars[i];
        match state {
            Lexer::Code => {
                if syntax.line_comment.iter().any(|p| starts_with(i, p)) {
                    state = Lexer::LineComment;
                } else if syntax.block_comment && starts_with(i, "/*") {
                    state = Lexer::BlockComment { line };
                    i += 1;
                } else if syntax.triple_quotes && (starts_with(i, "\"\"\"") || starts_with(i, "'''")) {
                    state = Lexer::TripleStr { quote: c, line };
                    i += 2;
                } else if syntax.quotes.contains(&c) {
                    state = Lexer::Str { quote: c, line };
                } else if matches!(c, '(' | '[' | '{') {
                    stack.push((c, line));
                } else if let Some(open) = match c {
                    ')' => Some('('),
                    ']' => Some('['),
                    '}' => Some('{'),
                    _ => None,
                } {
                    match stack.pop() {
                        Some((top, _)) if top == open => {}
                        Some((top, top_line)) => {
                            return Some(LineIssue {
                                line,
                                message: format!("'{}' closes '{}' opened on line {}", c, top, top_line),
                            });
                        }
                        None => {
                            return Some(LineIssue {
                                line,
                                message: format!("unexpected '{}'", c),
                            });
                        }
                    }
                }
            }
            Lexer::LineComment => {
                if c == '\n' {
                    state = Lexer::Code;
                }
            }
            Lexer::BlockComment { .. } => {
                if starts_with(i, "*/") {
                    state = Lexer::Code;
                    i += 1;
                }
            }
            Lexer::Str { quote, .. } => {
                if c == '\\' {
                    i += 1;
                } else if c == quote {
                    state = Lexer::Code;
                } else if c == '\n' && syntax.multiline_quote != Some(quote) {
                    // An unterminated single-line string ends with its line
                    state = Lexer::Code;
                }
            }
            Lexer::TripleStr { quote, .. } => {
                if c == '\\' {
                    i += 1;
                } else if c == quote && chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                    state = Lexer::Code;
                    i += 2;
                }
            }
        }
        if chars.get(i) == Some(&'\n') {
            line += 1;
        }
        i += 1;
    }

    match state {
        Lexer::BlockComment { line } => {
            return Some(LineIssue {
                line,
                message: "unterminated block comment".to_string(),
            })
        }
        Lexer::TripleStr { line, .. } => {
            return Some(LineIssue {
                line,
                message: "unterminated triple-quoted string".to_string(),
            })
        }
        Lexer::Str { quote, line } if syntax.multiline_quote == Some(quote) => {
            return Some(LineIssue {
                line,
                message: format!("unterminated {} string", quote),
            })
        }
        _ => {}
    }

    stack.pop().map(|(open, line)| LineIssue {
        line,
        message: format!("'{}' is never closed", open),
    })
}

fn debug_output_calls(language: &str) -> &'static [&'static str] {
    match language {
        "python" => &["print("],
        "javascript" | "typescript" => &["console.log("],
        "java" => &["System.out.println(", "System.out.print("],
        "rust" => &["println!(", "dbg!("],
        "go" => &["fmt.Println(", "fmt.Printf("],
        "c" | "cpp" => &["printf("],
        _ => &[],
    }
}

fn risky_calls(language: &str) -> &'static [(&'static str, &'static str)] {
    match language {
        "python" => &[
            ("eval(", "Use of eval() is a code injection risk"),
            ("exec(", "Use of exec() is a code injection risk"),
            ("pickle.loads(", "Unpickling untrusted data can execute code"),
            ("shell=True", "subprocess with shell=True is a command injection risk"),
            ("os.system(", "os.system() is a command injection risk"),
        ],
        "javascript" | "typescript" => &[
            ("eval(", "Use of eval() is a code injection risk"),
            ("new Function(", "new Function() is a code injection risk"),
            (".innerHTML =", "Assigning innerHTML is a cross-site scripting risk"),
            ("document.write(", "document.write() is a cross-site scripting risk"),
        ],
        "php" => &[
            ("eval(", "Use of eval() is a code injection risk"),
            ("shell_exec(", "shell_exec() is a command injection risk"),
        ],
        "c" | "cpp" => &[
            ("gets(", "gets() cannot bound its input"),
            ("strcpy(", "strcpy() does not check the destination size"),
        ],
        "rust" => &[("unsafe ", "unsafe code needs a soundness argument")],
        _ => &[],
    }
}

/// Run the static checks on source text
pub fn static_analysis(content: &str, language: &'static str) -> Result<StaticFindings> {
    let analysis = tools::analyze_source(language, content)?;
    let mut findings = StaticFindings {
        metrics: LineMetrics {
            total_lines: analysis.total_lines,
            code_lines: analysis.code_lines,
            comment_lines: analysis.comment_lines,
            blank_lines: analysis.blank_lines,
        },
        ..Default::default()
    };

    if let Some(issue) = check_delimiters(content, language) {
        findings.syntax_issues.push(issue);
    }

    let markers = content.matches("TODO").count() + content.matches("FIXME").count();
    if markers > 0 {
        findings.code_smells.push(format!("Contains {} TODO/FIXME markers", markers));
    }
    let prints: usize = debug_output_calls(language)
        .iter()
        .map(|call| content.matches(call).count())
        .sum();
    if prints > DEBUG_OUTPUT_THRESHOLD {
        findings
            .code_smells
            .push(format!("{} debug output calls (possible leftover debugging code)", prints));
    }
    let long_lines = content.lines().filter(|l| l.chars().count() > LONG_LINE).count();
    if long_lines > 0 {
        findings
            .code_smells
            .push(format!("{} lines longer than {} characters", long_lines, LONG_LINE));
    }

    for (call, message) in risky_calls(language) {
        if content.contains(call) {
            findings.security_issues.push(message.to_string());
        }
    }
    let secret = Regex::new(r#"(?i)\b(password|passwd|secret|api_?key|token)\s*[:=]\s*["'][^"']{4,}["']"#)
        .map_err(|e| OrcliError::internal(format!("bad secret pattern: {}", e)))?;
    if secret.is_match(content) {
        findings
            .security_issues
            .push("Possible hardcoded credential".to_string());
    }

    Ok(findings)
}

/// Result of [`debug_file`]
#[derive(Debug, Clone, Serialize)]
pub struct FileDebugReport {
    pub path: PathBuf,
    pub language: &'static str,
    pub focus: ErrorFocus,
    pub model: String,
    pub findings: StaticFindings,
    pub analysis: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_suggestions: Option<String>,
}

/// Static checks plus a model analysis of one file
pub fn debug_file(
    client: &dyn CompletionClient,
    path: &Path,
    focus: ErrorFocus,
    with_fixes: bool,
    model: &str,
) -> Result<FileDebugReport> {
    let file = tools::read_file(path)?;
    let language = file.metadata.language;
    let findings = static_analysis(&file.content, language)?;

    let params = CompletionParams::default().with_system(prompts::debug_system(language));
    let analysis = client.complete(
        &prompts::debug_file(language, focus.instruction(), &findings.describe(), &file.content),
        model,
        &params,
    )?;

    let fix_suggestions = if with_fixes {
        let params = CompletionParams::default().with_system(prompts::fix_system());
        Some(client.complete(&prompts::fix_suggestions(&file.content, &analysis), model, &params)?)
    } else {
        None
    };

    Ok(FileDebugReport {
        path: path.to_path_buf(),
        language,
        focus,
        model: model.to_string(),
        findings,
        analysis,
        fix_suggestions,
    })
}

/// Findings of one scanned file
#[derive(Debug, Clone, Serialize)]
pub struct FileFindings {
    pub relative_path: PathBuf,
    #[serde(flatten)]
    pub findings: StaticFindings,
}

fn findings_for(scan: &CodebaseScan) -> Vec<FileFindings> {
    let mut all = Vec::new();
    for file in &scan.files {
        let path = scan.directory.join(&file.relative_path);
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        match static_analysis(&content, file.language) {
            Ok(findings) if !findings.is_clean() => all.push(FileFindings {
                relative_path: file.relative_path.clone(),
                findings,
            }),
            Ok(_) => {}
            Err(e) => warn!("Static analysis of {:?} failed: {}", path, e),
        }
    }
    all
}

fn describe_scan(scan: &CodebaseScan, findings: &[FileFindings]) -> String {
    let mut text = format!(
        "Directory: {}\nFiles: {}\nLines: {}\nLanguages: {}",
        scan.directory.display(),
        scan.total_files,
        scan.total_lines,
        scan.languages
            .iter()
            .map(|(lang, count)| format!("{} ({})", lang, count))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut largest: Vec<&ScannedFile> = scan.files.iter().collect();
    largest.sort_by(|a, b| b.lines.cmp(&a.lines));
    text.push_str("\nLargest files:");
    for file in largest.iter().take(10) {
        text.push_str(&format!("\n  {} ({} lines)", file.relative_path.display(), file.lines));
    }

    if !findings.is_empty() {
        text.push_str("\nStatic findings:");
        for file in findings.iter().take(PROMPT_FILE_LIMIT) {
            let f = &file.findings;
            let items: Vec<String> = f
                .syntax_issues
                .iter()
                .map(|i| format!("line {}: {}", i.line, i.message))
                .chain(f.code_smells.iter().cloned())
                .chain(f.security_issues.iter().cloned())
                .collect();
            text.push_str(&format!("\n  {}: {}", file.relative_path.display(), items.join("; ")));
        }
        if findings.len() > PROMPT_FILE_LIMIT {
            text.push_str(&format!("\n  ... {} more files", findings.len() - PROMPT_FILE_LIMIT));
        }
    }
    text
}

/// Result of [`analyze_codebase`]
#[derive(Debug, Clone, Serialize)]
pub struct CodebaseReport {
    pub generated_at: DateTime<Utc>,
    pub model: String,
    pub scan: CodebaseScan,
    pub findings: Vec<FileFindings>,
    pub insights: String,
}

/// Scan a directory, check every file and ask the model for insights
pub fn analyze_codebase(
    client: &dyn CompletionClient,
    dir: &Path,
    options: &ScanOptions,
    model: &str,
) -> Result<CodebaseReport> {
    let scan = scan_codebase(dir, options)?;
    if scan.total_files == 0 {
        return Err(OrcliError::validation(format!(
            "no {:?} source files found in {:?}",
            options.language, dir
        )));
    }
    let findings = findings_for(&scan);
    let params = CompletionParams::default().with_system(prompts::debug_system("software"));
    let insights = client.complete(&prompts::codebase_insights(&describe_scan(&scan, &findings)), model, &params)?;

    Ok(CodebaseReport {
        generated_at: Utc::now(),
        model: model.to_string(),
        scan,
        findings,
        insights,
    })
}

/// Layout facts about a project directory
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectStructure {
    pub top_level_dirs: Vec<String>,
    pub top_level_files: Vec<String>,
    /// Well-known build, packaging and tooling files at the top level
    pub config_files: Vec<String>,
    pub has_tests: bool,
}

const CONFIG_FILES: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "tsconfig.json",
    "requirements.txt",
    "pyproject.toml",
    "setup.py",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "Makefile",
    "CMakeLists.txt",
    "Dockerfile",
    ".gitignore",
    ".editorconfig",
];

const TEST_DIRS: &[&str] = &["test", "tests", "spec", "__tests__"];

fn named_any(entry: &walkdir::DirEntry, names: &[&str]) -> bool {
    let name = entry.file_name().to_string_lossy();
    names.iter().any(|n| *n == name)
}

/// Describe the top level of `dir`
pub fn project_structure(dir: &Path) -> Result<ProjectStructure> {
    let mut structure = ProjectStructure::default();
    let mut entries: Vec<fs::DirEntry> = fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            if name == STORAGE_DIR_NAME || name == ".git" {
                continue;
            }
            if TEST_DIRS.contains(&name.as_str()) {
                structure.has_tests = true;
            }
            structure.top_level_dirs.push(name);
        } else {
            if CONFIG_FILES.contains(&name.as_str()) {
                structure.config_files.push(name.clone());
            }
            structure.top_level_files.push(name);
        }
    }

    if !structure.has_tests {
        structure.has_tests = WalkDir::new(dir)
            .max_depth(3)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !named_any(e, DEFAULT_EXCLUDES))
            .filter_map(|e| e.ok())
            .any(|e| e.file_type().is_dir() && named_any(&e, TEST_DIRS));
    }
    Ok(structure)
}

/// Dependencies declared in one manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyManifest {
    pub file: String,
    pub ecosystem: &'static str,
    pub dependencies: Vec<String>,
}

fn table_keys(value: &toml::Value, path: &[&str]) -> Vec<String> {
    let mut current = Some(value);
    for key in path {
        current = current.and_then(|v| v.get(key));
    }
    current
        .and_then(|v| v.as_table())
        .map(|t| t.keys().cloned().collect())
        .unwrap_or_default()
}

/// Requirement name without version, extras or markers
fn requirement_name(spec: &str) -> Option<String> {
    let name: String = spec
        .trim()
        .chars()
        .take_while(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    (!name.is_empty()).then_some(name)
}

fn parse_manifest(file: &str, content: &str) -> Result<Option<DependencyManifest>> {
    let (ecosystem, mut dependencies) = match file {
        "Cargo.toml" => {
            let value: toml::Value = toml::from_str(content)?;
            let mut deps = table_keys(&value, &["dependencies"]);
            deps.extend(table_keys(&value, &["dev-dependencies"]));
            deps.extend(table_keys(&value, &["build-dependencies"]));
            deps.extend(table_keys(&value, &["workspace", "dependencies"]));
            ("cargo", deps)
        }
        "package.json" => {
            let value: serde_json::Value = serde_json::from_str(content)?;
            let mut deps = Vec::new();
            for section in ["dependencies", "devDependencies", "peerDependencies"] {
                if let Some(map) = value.get(section).and_then(|v| v.as_object()) {
                    deps.extend(map.keys().cloned());
                }
            }
            ("npm", deps)
        }
        "requirements.txt" => {
            let deps = content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('-'))
                .filter_map(requirement_name)
                .collect();
            ("pip", deps)
        }
        "pyproject.toml" => {
            let value: toml::Value = toml::from_str(content)?;
            let mut deps: Vec<String> = value
                .get("project")
                .and_then(|p| p.get("dependencies"))
                .and_then(|d| d.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str()).filter_map(requirement_name).collect())
                .unwrap_or_default();
            deps.extend(
                table_keys(&value, &["tool", "poetry", "dependencies"])
                    .into_iter()
                    .filter(|d| d != "python"),
            );
            ("pip", deps)
        }
        "go.mod" => {
            let mut deps = Vec::new();
            let mut in_block = false;
            for line in content.lines().map(str::trim) {
                if line.starts_with("require (") {
                    in_block = true;
                } else if in_block && line == ")" {
                    in_block = false;
                } else if in_block && !line.is_empty() && !line.starts_with("//") {
                    deps.extend(line.split_whitespace().next().map(str::to_string));
                } else if let Some(rest) = line.strip_prefix("require ") {
                    deps.extend(rest.split_whitespace().next().map(str::to_string));
                }
            }
            ("go", deps)
        }
        _ => return Ok(None),
    };
    dependencies.sort();
    dependencies.dedup();
    Ok(Some(DependencyManifest {
        file: file.to_string(),
        ecosystem,
        dependencies,
    }))
}

/// Read the dependency manifests at the top level of `dir`
///
/// A manifest that fails to parse is skipped with a warning.
pub fn analyze_dependencies(dir: &Path) -> Result<Vec<DependencyManifest>> {
    let mut manifests = Vec::new();
    for file in ["Cargo.toml", "package.json", "requirements.txt", "pyproject.toml", "go.mod"] {
        let path = dir.join(file);
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        match parse_manifest(file, &content) {
            Ok(Some(manifest)) => manifests.push(manifest),
            Ok(None) => {}
            Err(e) => warn!("Ignoring unparseable {:?}: {}", path, e),
        }
    }
    Ok(manifests)
}

/// Outcome of running the project's tests
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TestRun {
    Finished(ShellOutput),
    Failed { command: String, error: String },
}

/// Result of [`debug_project`]
#[derive(Debug, Clone, Serialize)]
pub struct ProjectReport {
    pub project_path: PathBuf,
    pub generated_at: DateTime<Utc>,
    pub model: String,
    pub structure: ProjectStructure,
    pub dependencies: Vec<DependencyManifest>,
    pub total_files: usize,
    pub total_lines: usize,
    pub languages: BTreeMap<&'static str, usize>,
    pub findings: Vec<FileFindings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests: Option<TestRun>,
    pub assessment: String,
}

impl ProjectReport {
    pub fn security_issue_count(&self) -> usize {
        self.findings.iter().map(|f| f.findings.security_issues.len()).sum()
    }
}

/// Full project check: structure, dependencies, static findings, tests and a model assessment
///
/// A failing or timed-out test command is part of the report, not an error.
pub fn debug_project(
    client: &dyn CompletionClient,
    dir: &Path,
    test_command: Option<&str>,
    model: &str,
) -> Result<ProjectReport> {
    if !dir.is_dir() {
        return Err(OrcliError::TargetNotFound(dir.to_path_buf()));
    }
    let structure = project_structure(dir)?;
    let dependencies = analyze_dependencies(dir)?;
    let scan = scan_codebase(dir, &ScanOptions::default())?;
    let findings = findings_for(&scan);

    let tests = test_command.map(|command| match system::run_shell(command, dir, TEST_TIMEOUT) {
        Ok(output) => TestRun::Finished(output),
        Err(e) => TestRun::Failed {
            command: command.to_string(),
            error: e.to_string(),
        },
    });

    let mut summary = describe_scan(&scan, &findings);
    summary.push_str(&format!(
        "\nTop level: {}\nConfig files: {}\nHas tests: {}",
        structure.top_level_dirs.join(", "),
        structure.config_files.join(", "),
        structure.has_tests
    ));
    for manifest in &dependencies {
        summary.push_str(&format!(
            "\n{} ({}): {}",
            manifest.file,
            manifest.ecosystem,
            manifest.dependencies.join(", ")
        ));
    }
    match &tests {
        Some(TestRun::Finished(output)) => summary.push_str(&format!(
            "\nTests `{}` exited with {:?}",
            output.command, output.return_code
        )),
        Some(TestRun::Failed { command, error }) => {
            summary.push_str(&format!("\nTests `{}` could not run: {}", command, error))
        }
        None => {}
    }

    let params = CompletionParams::default().with_system(prompts::debug_system("software"));
    let assessment = client.complete(&prompts::codebase_insights(&summary), model, &params)?;

    Ok(ProjectReport {
        project_path: dir.to_path_buf(),
        generated_at: Utc::now(),
        model: model.to_string(),
        structure,
        dependencies,
        total_files: scan.total_files,
        total_lines: scan.total_lines,
        languages: scan.languages,
        findings,
        tests,
        assessment,
    })
}

/// `debug_report_<local timestamp>.json`
pub fn report_file_name(at: DateTime<Local>) -> String {
    format!("debug_report_{}.json", at.format("%Y%m%d_%H%M%S"))
}

/// Write a report as pretty JSON through the safety net
pub fn save_report<T: Serialize>(net: &SafetyNet, path: &Path, report: &T) -> Result<OperationResult> {
    let mut json = serde_json::to_string_pretty(report)?;
    json.push('\n');
    net.write(path, json.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ScriptedClient;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/pkg/deep/deeper")).unwrap();
        fs::create_dir_all(root.join("node_modules/lib")).unwrap();
        fs::create_dir_all(root.join("tests")).unwrap();
        fs::write(root.join("main.py"), "import os\n\nprint('hi')\n").unwrap();
        fs::write(root.join("src/app.js"), "function go() {\n  return 1;\n}\n").unwrap();
        fs::write(root.join("src/pkg/deep/deeper/far.py"), "x = 1\n").unwrap();
        fs::write(root.join("node_modules/lib/index.js"), "module.exports = 1;\n").unwrap();
        fs::write(root.join("tests/test_main.py"), "def test_ok():\n    assert True\n").unwrap();
        fs::write(root.join("README.md"), "# readme\n").unwrap();
        dir
    }

    #[test]
    fn test_scan_respects_language_depth_and_excludes() {
        let dir = tree();
        let scan = scan_codebase(dir.path(), &ScanOptions::default()).unwrap();
        let paths: Vec<String> = scan
            .files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(paths, vec!["main.py", "src/app.js", "tests/test_main.py"]);
        assert_eq!(scan.languages.get("python"), Some(&2));
        assert_eq!(scan.total_lines, 3 + 3 + 2);

        let deep = ScanOptions {
            max_depth: 4,
            ..Default::default()
        };
        assert_eq!(scan_codebase(dir.path(), &deep).unwrap().total_files, 4);

        let python_only = ScanOptions {
            language: LanguageFilter::Python,
            exclude: vec!["tests".into()],
            ..Default::default()
        };
        let scan = scan_codebase(dir.path(), &python_only).unwrap();
        assert_eq!(scan.total_files, 1);

        let shallow = ScanOptions {
            max_depth: 0,
            ..Default::default()
        };
        assert_eq!(scan_codebase(dir.path(), &shallow).unwrap().total_files, 1);

        assert!(matches!(
            scan_codebase(&dir.path().join("missing"), &ScanOptions::default()),
            Err(OrcliError::TargetNotFound(_))
        ));
    }

    #[test]
    fn test_delimiter_check() {
        assert_eq!(check_delimiters("def f(a):\n    return [a, {'k': (1)}]\n", "python"), None);
        assert_eq!(check_delimiters("s = ')'  # (\nt = \"\"\"\n]\n\"\"\"\n", "python"), None);
        assert_eq!(
            check_delimiters("function f() {\n  return (1;\n}\n", "javascript"),
            Some(LineIssue {
                line: 3,
                message: "'}' closes '(' opened on line 2".to_string()
            })
        );
        assert_eq!(check_delimiters("x = 1)\n", "python").unwrap().line, 1);
        assert_eq!(
            check_delimiters("fn main() {\n    let s: &'static str = \"{\";\n", "rust")
                .unwrap()
                .message,
            "'{' is never closed"
        );
        assert_eq!(check_delimiters("/* open\n", "java").unwrap().message, "unterminated block comment");
        assert_eq!(check_delimiters("(((", "markdown"), None);
    }

    #[test]
    fn test_static_analysis_flags_smells_and_risks() {
        let source = "# TODO: tidy\nimport subprocess\nsubprocess.run(cmd, shell=True)\nresult = eval(text)\npassword = \"hunter22\"\n";
        let findings = static_analysis(source, "python").unwrap();
        assert!(findings.syntax_issues.is_empty());
        assert_eq!(findings.code_smells, vec!["Contains 1 TODO/FIXME markers"]);
        assert_eq!(findings.security_issues.len(), 3);
        assert!(findings.security_issues.iter().any(|s| s.contains("credential")));
        assert_eq!(findings.metrics.comment_lines, 1);

        let chatty = "print(1)\n".repeat(6);
        let findings = static_analysis(&chatty, "python").unwrap();
        assert!(findings.code_smells[0].starts_with("6 debug output calls"));

        assert!(static_analysis("let x = 1;\n", "rust").unwrap().is_clean());
    }

    #[test]
    fn test_debug_file_with_fixes() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("calc.py");
        fs::write(&file, "def add(a, b:\n    return a - b\n").unwrap();

        let client = ScriptedClient::new(vec![Ok("subtracts instead of adding".into()), Ok("use a + b".into())]);
        let report = debug_file(&client, &file, ErrorFocus::Logic, true, "m").unwrap();
        assert_eq!(report.language, "python");
        assert_eq!(report.findings.syntax_issues.len(), 1);
        assert_eq!(report.analysis, "subtracts instead of adding");
        assert_eq!(report.fix_suggestions.as_deref(), Some("use a + b"));

        let prompts = client.prompts();
        assert!(prompts[0].contains("logical errors"));
        assert!(prompts[0].contains("Syntax issues found: 1"));
        assert!(prompts[1].contains("subtracts instead of adding"));

        let client = ScriptedClient::always("fine");
        let report = debug_file(&client, &file, ErrorFocus::All, false, "m").unwrap();
        assert!(report.fix_suggestions.is_none());
        assert_eq!(client.prompts().len(), 1);
    }

    #[test]
    fn test_analyze_codebase_sends_scan_summary() {
        let dir = tree();
        fs::write(dir.path().join("src/risky.js"), "eval(userInput);\n").unwrap();
        let client = ScriptedClient::always("looks healthy");
        let report = analyze_codebase(&client, dir.path(), &ScanOptions::default(), "m").unwrap();

        assert_eq!(report.insights, "looks healthy");
        assert_eq!(report.scan.total_files, 4);
        assert_eq!(report.findings.len(), 1);
        let prompt = &client.prompts()[0];
        assert!(prompt.contains("Files: 4"));
        assert!(prompt.contains("src/risky.js") || prompt.contains("src\\risky.js"));

        let empty = TempDir::new().unwrap();
        let result = analyze_codebase(&client, empty.path(), &ScanOptions::default(), "m");
        assert!(matches!(result, Err(OrcliError::Validation(_))));
    }

    #[test]
    fn test_dependencies_from_manifests() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("Cargo.toml"),
            "[package]\nname = \"x\"\n\n[dependencies]\nserde = \"1\"\ntokio = { version = \"1\" }\n\n[dev-dependencies]\ntempfile = \"3\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies": {"react": "^18"}, "devDependencies": {"jest": "^29"}}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("requirements.txt"),
            "# pinned\nrequests==2.31\nflask[async]>=2\n-r other.txt\n",
        )
        .unwrap();
        fs::write(dir.path().join("go.mod"), "module x\n\nrequire (\n\tgithub.com/a/b v1.0.0\n)\nrequire c.io/d v2\n").unwrap();

        let manifests = analyze_dependencies(dir.path()).unwrap();
        let by_file: BTreeMap<&str, &Vec<String>> =
            manifests.iter().map(|m| (m.file.as_str(), &m.dependencies)).collect();
        assert_eq!(by_file["Cargo.toml"], &vec!["serde", "tempfile", "tokio"]);
        assert_eq!(by_file["package.json"], &vec!["jest", "react"]);
        assert_eq!(by_file["requirements.txt"], &vec!["flask", "requests"]);
        assert_eq!(by_file["go.mod"], &vec!["c.io/d", "github.com/a/b"]);

        fs::write(dir.path().join("package.json"), "{ broken").unwrap();
        assert_eq!(analyze_dependencies(dir.path()).unwrap().len(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_debug_project_runs_tests_and_saves_report() {
        let dir = tree();
        fs::write(dir.path().join("requirements.txt"), "requests\n").unwrap();
        let net = SafetyNet::open_or_init(
            dir.path().to_path_buf(),
            SafetyNet::default_storage_path(dir.path()),
        )
        .unwrap();

        let client = ScriptedClient::always("ship it");
        let report = debug_project(&client, dir.path(), Some("echo ran; exit 1"), "m").unwrap();
        assert!(report.structure.has_tests);
        assert_eq!(report.structure.config_files, vec!["requirements.txt"]);
        assert_eq!(report.dependencies[0].dependencies, vec!["requests"]);
        match report.tests.as_ref().unwrap() {
            TestRun::Finished(output) => {
                assert_eq!(output.return_code, Some(1));
                assert_eq!(output.stdout.trim(), "ran");
            }
            other => panic!("tests did not run: {other:?}"),
        }
        assert!(client.prompts()[0].contains("exited with Some(1)"));

        let blocked = debug_project(&client, dir.path(), Some("rm -rf src"), "m").unwrap();
        assert!(matches!(blocked.tests, Some(TestRun::Failed { .. })));
        assert!(dir.path().join("src/app.js").exists());

        let path = dir.path().join(report_file_name(Local::now()));
        let saved = save_report(&net, &path, &report).unwrap();
        assert!(saved.created);
        let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["assessment"], "ship it");
        net.undo().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_report_file_name() {
        let at = Local::now();
        let name = report_file_name(at);
        assert!(name.starts_with("debug_report_"));
        assert!(name.ends_with(".json"));
        assert_eq!(name.len(), "debug_report_20250101_120000.json".len());
    }
}
