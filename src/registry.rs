//! Named tools with typed `key=value` parameters
//!
//! The registry backs `orcli tools` and the `/tools` command of interactive
//! chat. Every tool declares its parameters up front, so an unknown key, a
//! missing required key or a value of the wrong type is rejected before
//! anything runs. Tools that write files do so through the [`SafetyNet`],
//! which makes them undoable with `fs_undo`.
//!
//! ```rust,no_run
//! use orcli::registry::{ToolContext, ToolRegistry};
//! use orcli::SafetyNet;
//! use std::path::PathBuf;
//!
//! # fn main() -> orcli::Result<()> {
//! let net = SafetyNet::open_or_init(PathBuf::from("."), PathBuf::from("./.orcli"))?;
//! let ctx = ToolContext::new(&net);
//! let registry = ToolRegistry::new();
//!
//! let output = registry.execute("fs_write", &["path=notes.txt", "content=hello"], &ctx)?;
//! println!("{}", output.result);
//! registry.execute("fs_undo", &[] as &[&str], &ctx)?;
//! # Ok(())
//! # }
//! ```

use crate::ai::{CompletionClient, CompletionParams};
use crate::error::{OrcliError, Result};
use crate::safety_net::SafetyNet;
use crate::system::{self, DEFAULT_SHELL_TIMEOUT};
use crate::tools::{self, FileContent, ReviewFocus, SearchQuery, SummaryLength};
use crate::types::OperationResult;
use crate::utils;
use crate::web::{self, WebClient};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Group a tool is listed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ToolCategory {
    #[serde(rename = "File Operations")]
    FileOperations,
    #[serde(rename = "Code Analysis")]
    CodeAnalysis,
    #[serde(rename = "Web Operations")]
    WebOperations,
    #[serde(rename = "System Tools")]
    SystemTools,
    #[serde(rename = "AI Tools")]
    AiTools,
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToolCategory::FileOperations => "File Operations",
            ToolCategory::CodeAnalysis => "Code Analysis",
            ToolCategory::WebOperations => "Web Operations",
            ToolCategory::SystemTools => "System Tools",
            ToolCategory::AiTools => "AI Tools",
        };
        f.write_str(name)
    }
}

/// Type a parameter value is parsed into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Float,
    Boolean,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Float => "float",
            ParamKind::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// One declared parameter
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

/// One declared tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub category: ToolCategory,
    pub params: &'static [ParamSpec],
    pub example: &'static str,
}

impl ToolSpec {
    fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}

const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: true,
        description,
    }
}

const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: false,
        description,
    }
}

use ParamKind::{Boolean, Float, Integer, String as Text};

static TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "fs_read",
        description: "Read file contents with metadata",
        category: ToolCategory::FileOperations,
        params: &[
            required("path", Text, "Path to the file to read"),
            optional("lines", Text, "Line or inclusive line range (e.g. 7 or 1-50)"),
        ],
        example: r#"/tools fs_read path="script.py" lines=1-40"#,
    },
    ToolSpec {
        name: "fs_create",
        description: "Create a file from given content or from an AI prompt",
        category: ToolCategory::FileOperations,
        params: &[
            required("path", Text, "Path where the file should be created"),
            optional("content", Text, "Content for the file"),
            optional("prompt", Text, "Prompt the AI generates the content from"),
            optional("file_type", Text, "File type named in the prompt (defaults from the extension)"),
        ],
        example: r#"/tools fs_create path="page.html" prompt="A landing page for a bakery""#,
    },
    ToolSpec {
        name: "fs_write",
        description: "Write content to a file (backed up, undoable)",
        category: ToolCategory::FileOperations,
        params: &[
            required("path", Text, "Path to the file to write"),
            required("content", Text, "Content to write"),
        ],
        example: r#"/tools fs_write path="hello.py" content="print('Hello World')""#,
    },
    ToolSpec {
        name: "fs_search",
        description: "Search for files by name, extension and content",
        category: ToolCategory::FileOperations,
        params: &[
            required("directory", Text, "Directory to search in"),
            optional("pattern", Text, "File name pattern (regex)"),
            optional("extension", Text, "File extension filter"),
            optional("content", Text, "Content pattern (regex)"),
            optional("limit", Integer, "Maximum number of files"),
        ],
        example: r#"/tools fs_search directory="./src" extension=".py" content="class""#,
    },
    ToolSpec {
        name: "fs_remove",
        description: "Remove a file (backed up, undoable)",
        category: ToolCategory::FileOperations,
        params: &[required("path", Text, "Path to the file to remove")],
        example: r#"/tools fs_remove path="old.txt""#,
    },
    ToolSpec {
        name: "fs_undo",
        description: "Undo the last file operation",
        category: ToolCategory::FileOperations,
        params: &[],
        example: "/tools fs_undo",
    },
    ToolSpec {
        name: "fs_redo",
        description: "Redo the file operation the last undo reverted",
        category: ToolCategory::FileOperations,
        params: &[],
        example: "/tools fs_redo",
    },
    ToolSpec {
        name: "code_analyze",
        description: "Analyze code structure, functions, classes and imports",
        category: ToolCategory::CodeAnalysis,
        params: &[
            required("path", Text, "Path to the code file"),
            optional("detailed", Boolean, "List every item found"),
        ],
        example: r#"/tools code_analyze path="main.py" detailed=true"#,
    },
    ToolSpec {
        name: "code_modify",
        description: "Modify code with a natural language instruction (undoable)",
        category: ToolCategory::CodeAnalysis,
        params: &[
            required("path", Text, "Path to the code file"),
            required("instruction", Text, "What to change"),
        ],
        example: r#"/tools code_modify path="script.py" instruction="Add error handling""#,
    },
    ToolSpec {
        name: "code_review",
        description: "Get an AI code review",
        category: ToolCategory::CodeAnalysis,
        params: &[
            required("path", Text, "Path to the code file"),
            optional("focus", Text, "general, security, performance or style"),
        ],
        example: r#"/tools code_review path="auth.js" focus=security"#,
    },
    ToolSpec {
        name: "web_fetch",
        description: "Fetch a URL, optionally extracting text or saving it",
        category: ToolCategory::WebOperations,
        params: &[
            required("url", Text, "URL to fetch"),
            optional("extract_text", Boolean, "Extract plain text from HTML"),
            optional("save_to", Text, "Save the content to this file (undoable)"),
        ],
        example: r#"/tools web_fetch url="https://example.com" extract_text=true"#,
    },
    ToolSpec {
        name: "web_api",
        description: "Make an HTTP API request",
        category: ToolCategory::WebOperations,
        params: &[
            required("url", Text, "API endpoint URL"),
            optional("method", Text, "HTTP method (default GET)"),
            optional("data", Text, "Request body, sent as JSON when it parses as JSON"),
            optional("headers", Text, "Extra headers as a JSON object"),
        ],
        example: r#"/tools web_api url="https://httpbin.org/post" method=POST data='{"a":1}'"#,
    },
    ToolSpec {
        name: "shell_exec",
        description: "Run a shell command (not undoable)",
        category: ToolCategory::SystemTools,
        params: &[
            required("command", Text, "Shell command to run"),
            optional("cwd", Text, "Working directory (defaults to the working root)"),
            optional("timeout", Integer, "Timeout in seconds (default 30)"),
        ],
        example: r#"/tools shell_exec command="ls -la" cwd="src""#,
    },
    ToolSpec {
        name: "env_info",
        description: "Show system and environment information",
        category: ToolCategory::SystemTools,
        params: &[],
        example: "/tools env_info",
    },
    ToolSpec {
        name: "ai_chat",
        description: "Send a prompt to a model",
        category: ToolCategory::AiTools,
        params: &[
            required("prompt", Text, "Prompt for the model"),
            optional("system", Text, "System message"),
            optional("model", Text, "Model id"),
            optional("temperature", Float, "Sampling temperature (0.0-2.0)"),
        ],
        example: r#"/tools ai_chat prompt="Explain quantum computing" temperature=0.3"#,
    },
    ToolSpec {
        name: "ai_summarize",
        description: "Summarize text or a file",
        category: ToolCategory::AiTools,
        params: &[
            optional("content", Text, "Text to summarize"),
            optional("file_path", Text, "File to summarize"),
            optional("length", Text, "short, medium or long (default medium)"),
        ],
        example: r#"/tools ai_summarize file_path="README.md" length=short"#,
    },
];

/// A parsed parameter value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl ParamValue {
    fn parse(spec: &ParamSpec, raw: &str) -> Result<Self> {
        let invalid = || {
            OrcliError::validation(format!(
                "parameter '{}' expects {}, got '{}'",
                spec.name, spec.kind, raw
            ))
        };
        match spec.kind {
            ParamKind::String => Ok(ParamValue::Text(raw.to_string())),
            ParamKind::Integer => raw.trim().parse().map(ParamValue::Integer).map_err(|_| invalid()),
            ParamKind::Float => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(ParamValue::Float)
                .ok_or_else(invalid),
            ParamKind::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(ParamValue::Boolean(true)),
                "false" => Ok(ParamValue::Boolean(false)),
                _ => Err(invalid()),
            },
        }
    }
}

/// Parameters of one call, checked against the tool's declaration
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolArgs {
    values: BTreeMap<String, ParamValue>,
}

impl ToolArgs {
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ParamValue::Text(text)) => Some(text),
            _ => None,
        }
    }

    fn require_text(&self, name: &str) -> Result<&str> {
        self.text(name)
            .ok_or_else(|| OrcliError::validation(format!("required parameter '{}' missing", name)))
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ParamValue::Integer(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(ParamValue::Float(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(ParamValue::Boolean(true)))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Split a command line into words, honoring shell-style quotes
pub fn split_line(line: &str) -> Result<Vec<String>> {
    shlex::split(line).ok_or_else(|| OrcliError::validation(format!("unbalanced quotes in: {}", line)))
}

/// Parse `key=value` words for `spec`
///
/// Values are typed by the declaration: booleans take `true`/`false`, numbers
/// must parse, strings are kept verbatim. Unknown, repeated and missing
/// required keys are rejected.
pub fn parse_params<S: AsRef<str>>(spec: &ToolSpec, words: &[S]) -> Result<ToolArgs> {
    let mut args = ToolArgs::default();
    for word in words {
        let word = word.as_ref();
        let Some((key, raw)) = word.split_once('=').filter(|(key, _)| !key.is_empty()) else {
            return Err(OrcliError::validation(format!(
                "expected key=value, got '{}'",
                word
            )));
        };
        let Some(param) = spec.param(key) else {
            let known: Vec<&str> = spec.params.iter().map(|p| p.name).collect();
            return Err(OrcliError::validation(format!(
                "{} has no parameter '{}' (known: {})",
                spec.name,
                key,
                if known.is_empty() { "none".to_string() } else { known.join(", ") }
            )));
        };
        let value = ParamValue::parse(param, raw)?;
        if args.values.insert(key.to_string(), value).is_some() {
            return Err(OrcliError::validation(format!("parameter '{}' given twice", key)));
        }
    }

    if let Some(missing) = spec
        .params
        .iter()
        .find(|p| p.required && !args.values.contains_key(p.name))
    {
        return Err(OrcliError::validation(format!(
            "required parameter '{}' missing",
            missing.name
        )));
    }
    Ok(args)
}

/// What tools run against
pub struct ToolContext<'a> {
    pub net: &'a SafetyNet,
    /// Provider for the AI tools; they fail with a configuration error without one
    pub client: Option<&'a dyn CompletionClient>,
    /// Model for code generation, edits and reviews
    pub coding_model: String,
    /// Model for chat and summaries
    pub general_model: String,
    pub web_timeout: Duration,
}

impl<'a> ToolContext<'a> {
    /// Context without an AI provider, using the default models and timeout
    pub fn new(net: &'a SafetyNet) -> Self {
        let defaults = crate::config::Config::default();
        Self {
            net,
            client: None,
            coding_model: defaults.model_for("coding").to_string(),
            general_model: defaults.model_for("general").to_string(),
            web_timeout: web::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_client(mut self, client: &'a dyn CompletionClient) -> Self {
        self.client = Some(client);
        self
    }

    fn client(&self) -> Result<&'a dyn CompletionClient> {
        self.client.ok_or_else(|| {
            OrcliError::config("AI tools need an API key (set api.key or OPENROUTER_API_KEY)")
        })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        utils::absolutize(self.net.root(), std::path::Path::new(path))
    }
}

/// Result of one tool call
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    pub tool: &'static str,
    pub result: Value,
}

/// The built-in tools
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: &'static [ToolSpec],
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: TOOLS }
    }

    /// Every tool, in declaration order
    pub fn tools(&self) -> &'static [ToolSpec] {
        self.tools
    }

    /// Tools grouped by category, categories in display order
    pub fn by_category(&self) -> BTreeMap<ToolCategory, Vec<&'static ToolSpec>> {
        let mut groups: BTreeMap<ToolCategory, Vec<&'static ToolSpec>> = BTreeMap::new();
        for tool in self.tools {
            groups.entry(tool.category).or_default().push(tool);
        }
        groups
    }

    /// Look a tool up by name
    pub fn get(&self, name: &str) -> Result<&'static ToolSpec> {
        self.tools
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| OrcliError::validation(format!("unknown tool '{}' (see /tools)", name)))
    }

    /// Parse `words` for the named tool and run it
    pub fn execute<S: AsRef<str>>(&self, name: &str, words: &[S], ctx: &ToolContext) -> Result<ToolOutput> {
        let spec = self.get(name)?;
        let args = parse_params(spec, words)?;
        debug!("Executing tool {} with {:?}", spec.name, args);
        let result = run_tool(spec, &args, ctx)?;
        info!("Tool {} succeeded", spec.name);
        Ok(ToolOutput {
            tool: spec.name,
            result,
        })
    }
}

#[derive(Serialize)]
struct ReadOutput {
    #[serde(flatten)]
    file: FileContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    displayed_lines: Option<String>,
}

#[derive(Serialize)]
struct CreateOutput {
    operation: OperationResult,
    ai_generated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
}

fn run_tool(spec: &ToolSpec, args: &ToolArgs, ctx: &ToolContext) -> Result<Value> {
    let value = match spec.name {
        "fs_read" => {
            let mut file = tools::read_file(&ctx.resolve(args.require_text("path")?))?;
            let displayed_lines = args.text("lines").map(str::to_string);
            if let Some(range) = &displayed_lines {
                file.content = tools::select_lines(&file.content, range)?;
            }
            serde_json::to_value(ReadOutput { file, displayed_lines })?
        }
        "fs_create" => {
            let path = args.require_text("path")?;
            match (args.text("content"), args.text("prompt")) {
                (None, Some(prompt)) => {
                    let created = tools::ai_create_file(
                        ctx.net,
                        ctx.client()?,
                        std::path::Path::new(path),
                        prompt,
                        args.text("file_type"),
                        &ctx.coding_model,
                    )?;
                    serde_json::to_value(CreateOutput {
                        operation: created.operation,
                        ai_generated: true,
                        file_type: Some(created.file_type),
                        prompt: Some(created.prompt),
                    })?
                }
                (content, _) => {
                    let operation = ctx.net.write(path, content.unwrap_or_default().as_bytes())?;
                    serde_json::to_value(CreateOutput {
                        operation,
                        ai_generated: false,
                        file_type: None,
                        prompt: None,
                    })?
                }
            }
        }
        "fs_write" => {
            let content = args.require_text("content")?;
            serde_json::to_value(ctx.net.write(args.require_text("path")?, content.as_bytes())?)?
        }
        "fs_search" => {
            let limit = match args.integer("limit") {
                Some(limit) if limit < 1 => return Err(OrcliError::validation("limit must be at least 1")),
                limit => limit.map(|l| l as usize),
            };
            let query = SearchQuery {
                name_pattern: args.text("pattern").map(str::to_string),
                extension: args.text("extension").map(str::to_string),
                content_pattern: args.text("content").map(str::to_string),
                limit,
            };
            let hits = tools::search_files(&ctx.resolve(args.require_text("directory")?), &query)?;
            json!({ "count": hits.len(), "files": hits })
        }
        "fs_remove" => serde_json::to_value(ctx.net.remove(args.require_text("path")?)?)?,
        "fs_undo" => serde_json::to_value(ctx.net.undo()?)?,
        "fs_redo" => serde_json::to_value(ctx.net.redo()?)?,
        "code_analyze" => {
            let analysis = tools::analyze_code(&ctx.resolve(args.require_text("path")?))?;
            if args.flag("detailed") {
                serde_json::to_value(analysis)?
            } else {
                json!({
                    "language": analysis.language,
                    "total_lines": analysis.total_lines,
                    "code_lines": analysis.code_lines,
                    "comment_lines": analysis.comment_lines,
                    "blank_lines": analysis.blank_lines,
                    "functions": analysis.functions.len(),
                    "classes": analysis.classes.len(),
                    "imports": analysis.imports.len(),
                })
            }
        }
        "code_modify" => serde_json::to_value(tools::ai_modify_file(
            ctx.net,
            ctx.client()?,
            std::path::Path::new(args.require_text("path")?),
            args.require_text("instruction")?,
            &ctx.coding_model,
        )?)?,
        "code_review" => {
            let focus = args
                .text("focus")
                .map(str::parse::<ReviewFocus>)
                .transpose()?
                .unwrap_or_default();
            let path = ctx.resolve(args.require_text("path")?);
            let review = tools::ai_review_file(ctx.client()?, &path, &ctx.coding_model, focus)?;
            json!({ "path": path, "focus": focus, "model": ctx.coding_model, "review": review })
        }
        "web_fetch" => {
            let client = WebClient::new(ctx.web_timeout)?;
            let fetched = client.fetch(args.require_text("url")?, args.flag("extract_text"))?;
            let saved = match args.text("save_to") {
                Some(target) => Some(ctx.net.write(target, fetched.saveable_text().as_bytes())?),
                None => None,
            };
            let mut value = serde_json::to_value(&fetched)?;
            if let (Some(saved), Value::Object(map)) = (saved, &mut value) {
                map.insert("saved".to_string(), serde_json::to_value(saved)?);
            }
            value
        }
        "web_api" => {
            let client = WebClient::new(ctx.web_timeout)?;
            serde_json::to_value(client.api_request(
                args.require_text("url")?,
                args.text("method").unwrap_or("GET"),
                args.text("data"),
                args.text("headers"),
            )?)?
        }
        "shell_exec" => {
            let timeout = match args.integer("timeout") {
                Some(secs) if secs < 1 => return Err(OrcliError::validation("timeout must be at least 1 second")),
                Some(secs) => Duration::from_secs(secs as u64),
                None => DEFAULT_SHELL_TIMEOUT,
            };
            let cwd = args
                .text("cwd")
                .map(|dir| ctx.resolve(dir))
                .unwrap_or_else(|| ctx.net.root().to_path_buf());
            serde_json::to_value(system::run_shell(args.require_text("command")?, &cwd, timeout)?)?
        }
        "env_info" => serde_json::to_value(system::env_info())?,
        "ai_chat" => {
            let mut params = CompletionParams::default();
            if let Some(temperature) = args.float("temperature") {
                if !(0.0..=2.0).contains(&temperature) {
                    return Err(OrcliError::validation("temperature must be between 0 and 2"));
                }
                params.temperature = temperature as f32;
            }
            params.system = args.text("system").map(str::to_string);
            let model = args.text("model").unwrap_or(&ctx.general_model);
            let reply = ctx.client()?.complete(args.require_text("prompt")?, model, &params)?;
            json!({ "model": model, "reply": reply })
        }
        "ai_summarize" => {
            let length = args
                .text("length")
                .map(str::parse::<SummaryLength>)
                .transpose()?
                .unwrap_or_default();
            let content = match (args.text("content"), args.text("file_path")) {
                (_, Some(path)) => tools::read_file(&ctx.resolve(path))?.content,
                (Some(content), None) => content.to_string(),
                (None, None) => {
                    return Err(OrcliError::validation("give content or file_path to summarize"));
                }
            };
            serde_json::to_value(tools::ai_summarize(ctx.client()?, &content, length, &ctx.general_model)?)?
        }
        other => return Err(OrcliError::internal(format!("tool '{}' has no implementation", other))),
    };
    Ok(value)
}
