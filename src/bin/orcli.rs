//! # orcli - AI assistant for the command line
//!
//! Every file change made by a command is backed up first and can be undone.
//!
//! ## Usage
//! ```bash
//! # Write a file, then take it back
//! orcli file write notes.txt --content "hello"
//! orcli file undo
//!
//! # Let a model edit code; undo if you don't like the result
//! orcli code modify src/app.py "add type hints"
//!
//! # Inspect what happened
//! orcli history list --limit 10
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use orcli::config::{ConfigIssue, IssueLevel};
use orcli::debug::{self, ErrorFocus, LanguageFilter, ScanOptions, StaticFindings, TestRun};
use orcli::output::{self, OutputFormat};
use orcli::registry::{self, ToolContext, ToolOutput, ToolRegistry, ToolSpec};
use orcli::tools::{self, ReviewFocus, SearchQuery};
use orcli::utils::{self, format_bytes};
use orcli::web::{self, WebClient};
use orcli::{
    BackupRecord, CompletionClient, CompletionParams, Config, ExportFormat, OpenRouterClient,
    OperationKind, OperationRecord, OperationResult, OrcliError, Result, SafetyNet,
    SafetyNetBuilder, Snapshot, UndoAction, UndoOutcome,
};
use serde::Serialize;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Conversation turns kept as context in interactive chat
const CHAT_CONTEXT_TURNS: usize = 10;

/// orcli - AI assistant with versioned backups and undo
#[derive(Parser)]
#[command(name = "orcli")]
#[command(version)]
#[command(about = "AI-assisted file, code and web tools with a safety net for every change")]
#[command(long_about = None)]
struct Cli {
    /// Working root (defaults to current directory)
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// Storage directory (defaults to <root>/.orcli)
    #[arg(short, long, global = true)]
    storage: Option<PathBuf>,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct OutputArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Read, write, search and remove files
    File {
        #[command(subcommand)]
        action: FileCommand,
    },

    /// Analyze, modify and review code
    Code {
        #[command(subcommand)]
        action: CodeCommand,
    },

    /// Fetch pages and call HTTP APIs
    Web {
        #[command(subcommand)]
        action: WebCommand,
    },

    /// Talk to a model
    Chat {
        #[command(subcommand)]
        action: ChatCommand,
    },

    /// List, explain and run the named tools
    #[command(disable_help_subcommand = true)]
    Tools {
        #[command(subcommand)]
        action: ToolsCommand,
    },

    /// Debug files and projects with static checks and a model
    Debug {
        #[command(subcommand)]
        action: DebugCommand,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },

    /// Inspect and maintain the operation history
    #[command(alias = "hist")]
    History {
        #[command(subcommand)]
        action: HistoryCommand,
    },

    /// Show version information
    Version {
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Check configuration, storage and connectivity
    Doctor {
        /// Also call the AI provider
        #[arg(long)]
        check_api: bool,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Subcommand)]
enum FileCommand {
    /// Print a file with its metadata
    #[command(alias = "cat")]
    Read {
        file: PathBuf,

        /// Show metadata only
        #[arg(long)]
        metadata_only: bool,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Create or overwrite a file
    Write {
        file: PathBuf,

        /// New content
        #[arg(short, long, conflicts_with = "stdin")]
        content: Option<String>,

        /// Read the new content from stdin
        #[arg(long)]
        stdin: bool,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Search files by name, extension and content
    Search {
        /// Directory to search (defaults to the working root)
        dir: Option<PathBuf>,

        /// Regex over file names
        #[arg(long)]
        pattern: Option<String>,

        /// File extension
        #[arg(short, long)]
        extension: Option<String>,

        /// Regex over file contents
        #[arg(short, long)]
        content: Option<String>,

        /// Maximum number of files
        #[arg(short, long)]
        limit: Option<usize>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Delete a file
    #[command(alias = "rm")]
    Remove {
        file: PathBuf,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Revert the most recent operation
    Undo {
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Revert the most recent undo
    Redo {
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Subcommand)]
enum CodeCommand {
    /// Summarize functions, classes and imports
    Analyze {
        file: PathBuf,

        /// List every item found
        #[arg(short, long)]
        detailed: bool,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Let a model rewrite a file (undoable)
    Modify {
        file: PathBuf,

        /// What to change
        request: String,

        /// Model id (defaults to models.coding)
        #[arg(short, long)]
        model: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Ask a model to review a file
    Review {
        file: PathBuf,

        /// What the review concentrates on
        #[arg(long, value_enum, default_value_t = ReviewFocus::General)]
        focus: ReviewFocus,

        /// Model id (defaults to models.coding)
        #[arg(short, long)]
        model: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Subcommand)]
enum WebCommand {
    /// GET a URL
    Fetch {
        url: String,

        /// Strip HTML down to text
        #[arg(long)]
        extract_text: bool,

        /// Save the result to a file (undoable)
        #[arg(long)]
        save_to: Option<PathBuf>,

        /// Timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Send an HTTP request
    Api {
        url: String,

        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Request body (JSON is sent as JSON)
        #[arg(short, long)]
        data: Option<String>,

        /// Headers as a JSON object
        #[arg(long)]
        headers: Option<String>,

        /// Timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Extract text from HTML
    Extract {
        /// HTML source
        html: Option<String>,

        /// Read the HTML from a file
        #[arg(long, conflicts_with = "html")]
        from_file: Option<PathBuf>,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Subcommand)]
enum ChatCommand {
    /// Ask a single question
    Ask {
        question: String,

        /// Model id (defaults to models.general)
        #[arg(short, long)]
        model: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Send a prompt with explicit sampling parameters
    Prompt {
        prompt: String,

        /// Model id (defaults to models.general)
        #[arg(short, long)]
        model: Option<String>,

        /// System message
        #[arg(long)]
        system: Option<String>,

        #[arg(short, long, default_value_t = 0.7)]
        temperature: f32,

        #[arg(long, default_value_t = 4000)]
        max_tokens: u32,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Start a conversation
    Interactive {
        /// Model id (defaults to models.general)
        #[arg(short, long)]
        model: Option<String>,
    },
}

#[derive(Subcommand)]
enum ToolsCommand {
    /// List the tools by category
    List {
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Show a tool's parameters and an example
    Help {
        name: String,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Run a tool with key=value parameters
    Run {
        name: String,

        /// Parameters as key=value
        params: Vec<String>,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Subcommand)]
enum DebugCommand {
    /// Scan a codebase and ask for insights
    Analyze {
        directory: PathBuf,

        /// Language to focus on
        #[arg(long, value_enum, default_value_t = LanguageFilter::All)]
        language: LanguageFilter,

        /// Directory levels to scan below the directory
        #[arg(long, default_value_t = 3)]
        depth: usize,

        /// Directory names to skip (repeatable)
        #[arg(long)]
        exclude: Vec<String>,

        /// Save the full report as JSON (undoable)
        #[arg(short = 'o', long = "output", value_name = "FILE")]
        save_to: Option<PathBuf>,

        /// Model id (defaults to models.general)
        #[arg(short, long)]
        model: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Debug one file
    File {
        file: PathBuf,

        /// Kind of problem to look for
        #[arg(long, value_enum, default_value_t = ErrorFocus::All)]
        error_type: ErrorFocus,

        /// Also ask for concrete fixes
        #[arg(long)]
        fix_suggestions: bool,

        /// Model id (defaults to models.general)
        #[arg(short, long)]
        model: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Check a whole project and save a report into it
    Project {
        directory: PathBuf,

        /// Command that runs the tests, e.g. "cargo test"
        #[arg(long)]
        test_command: Option<String>,

        /// Do not write debug_report_<timestamp>.json
        #[arg(long)]
        no_save: bool,

        /// Model id (defaults to models.general)
        #[arg(short, long)]
        model: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Create the configuration file
    Init {
        /// OpenRouter API key
        #[arg(long)]
        api_key: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print one value
    Get {
        /// Dotted key, e.g. api.base_url
        key: String,

        /// Show secrets unmasked
        #[arg(long)]
        show_sensitive: bool,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Change one value
    Set {
        /// Dotted key, e.g. preferences.max_history
        key: String,

        value: String,
    },

    /// Print the whole configuration
    List {
        /// Show secrets unmasked
        #[arg(long)]
        show_sensitive: bool,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Report configuration problems
    Validate {
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Print the configuration file location
    Path,

    /// Restore defaults
    Reset {
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum HistoryCommand {
    /// List recent operations
    #[command(alias = "ls")]
    List {
        /// Limit results
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only this kind (write, modify, remove, undo)
        #[arg(short, long)]
        operation: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Show one record and its backup
    Show {
        id: u64,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Write the history to a file
    Export {
        file: PathBuf,

        #[arg(short, long, value_enum, default_value_t = ExportArg::Json)]
        format: ExportArg,
    },

    /// Prune old history and backups
    Cleanup {
        /// Age in days (defaults to preferences.retention_days)
        #[arg(short, long)]
        days: Option<u32>,

        /// Keep at most this many records
        #[arg(short, long)]
        count: Option<usize>,

        /// Skip confirmation
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Drop all history records
    Clear {
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum ExportArg {
    Json,
    Yaml,
    Jsonl,
}

impl From<ExportArg> for ExportFormat {
    fn from(arg: ExportArg) -> Self {
        match arg {
            ExportArg::Json => ExportFormat::Json,
            ExportArg::Yaml => ExportFormat::Yaml,
            ExportArg::Jsonl => ExportFormat::JsonLines,
        }
    }
}

/// Everything a command needs besides its own arguments
struct Context {
    root: PathBuf,
    storage: Option<PathBuf>,
    config_path: PathBuf,
    config: Config,
    /// Why the configuration file could not be loaded, if it couldn't
    config_error: Option<String>,
}

impl Context {
    /// Open the safety net for the working root
    fn net(&self) -> Result<SafetyNet> {
        let storage = self
            .storage
            .clone()
            .or_else(|| {
                self.config
                    .preferences
                    .storage_dir
                    .as_deref()
                    .map(|dir| utils::absolutize(&self.root, dir))
            })
            .unwrap_or_else(|| SafetyNet::default_storage_path(&self.root));

        SafetyNetBuilder::new()
            .compression_strategy(self.config.compression_strategy()?)
            .max_history(self.config.preferences.max_history)
            .build(self.root.clone(), storage)
    }

    fn ai_client(&self) -> Result<OpenRouterClient> {
        OpenRouterClient::from_config(&self.config)
    }

    /// Explicit model, else the model configured for `role`
    fn model(&self, explicit: Option<String>, role: &str) -> String {
        explicit.unwrap_or_else(|| self.config.model_for(role).to_string())
    }

    /// Path relative to the working root
    fn resolve(&self, path: &Path) -> PathBuf {
        utils::absolutize(&self.root, path)
    }
}

fn main() {
    let cli = Cli::parse();

    // Disable colors if needed
    if std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(e.exit_code());
    }
}

/// Install the stderr subscriber
///
/// `RUST_LOG` wins, then `--log-level`, then `--verbose`, then the configured level.
fn init_logging(log_level: Option<&str>, verbose: bool, configured: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match (log_level, verbose) {
            (Some(level), _) => level,
            (None, true) => "debug",
            (None, false) => configured,
        };
        EnvFilter::try_new(format!("orcli={}", level)).unwrap_or_else(|_| EnvFilter::new("orcli=warn"))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let config_path = match &cli.config_file {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let loaded = Config::load(&config_path);
    let configured_level = loaded
        .as_ref()
        .map(|c| c.preferences.log_level.clone())
        .unwrap_or_else(|_| "warn".to_string());
    init_logging(cli.log_level.as_deref(), cli.verbose, &configured_level);

    // Config commands must work on a broken file so it can be fixed or reset
    let (config, config_error) = match loaded {
        Ok(config) => (config, None),
        Err(e) if matches!(cli.command, Commands::Config { .. } | Commands::Doctor { .. } | Commands::Version { .. }) => {
            warn!("Ignoring unreadable configuration {:?}: {}", config_path, e);
            (Config::default(), Some(e.to_string()))
        }
        Err(e) => return Err(e),
    };

    let ctx = Context {
        root: cli.path.unwrap_or_else(|| PathBuf::from(".")),
        storage: cli.storage,
        config_path,
        config,
        config_error,
    };

    match cli.command {
        Commands::File { action } => run_file(&ctx, action),
        Commands::Code { action } => run_code(&ctx, action),
        Commands::Web { action } => run_web(&ctx, action),
        Commands::Chat { action } => run_chat(&ctx, action),
        Commands::Tools { action } => run_tools(&ctx, action),
        Commands::Debug { action } => run_debug(&ctx, action),
        Commands::Config { action } => run_config(ctx, action),
        Commands::History { action } => run_history(&ctx, action),
        Commands::Version { output } => cmd_version(output.format),
        Commands::Doctor { check_api, output } => cmd_doctor(&ctx, check_api, output.format),
    }
}

// ---------------------------------------------------------------------------
// file
// ---------------------------------------------------------------------------

fn run_file(ctx: &Context, action: FileCommand) -> Result<()> {
    match action {
        FileCommand::Read {
            file,
            metadata_only,
            output,
        } => cmd_file_read(ctx, &file, metadata_only, output.format),
        FileCommand::Write {
            file,
            content,
            stdin,
            output,
        } => cmd_file_write(ctx, &file, content, stdin, output.format),
        FileCommand::Search {
            dir,
            pattern,
            extension,
            content,
            limit,
            output,
        } => {
            let query = SearchQuery {
                name_pattern: pattern,
                extension,
                content_pattern: content,
                limit,
            };
            cmd_file_search(ctx, dir, &query, output.format)
        }
        FileCommand::Remove {
            file,
            force,
            output,
        } => cmd_file_remove(ctx, &file, force, output.format),
        FileCommand::Undo { output } => {
            let net = ctx.net()?;
            let outcome = net.undo()?;
            output::emit(&outcome, output.format, |o| print_undo(o, net.root()))
        }
        FileCommand::Redo { output } => {
            let net = ctx.net()?;
            let outcome = net.redo()?;
            output::emit(&outcome, output.format, |o| match o {
                UndoOutcome::NothingToUndo => println!("{}", "Nothing to redo".yellow()),
                restored => print_undo(restored, net.root()),
            })
        }
    }
}

fn cmd_file_read(ctx: &Context, path: &Path, metadata_only: bool, format: OutputFormat) -> Result<()> {
    let file = tools::read_file(&ctx.resolve(path))?;

    if metadata_only {
        return output::emit(&file.metadata, format, |meta| {
            println!("{}", file.path.display().to_string().cyan().bold());
            println!("  Size: {}", format_bytes(meta.size).cyan());
            println!("  Lines: {}", meta.lines.to_string().cyan());
            println!("  Language: {}", meta.language.cyan());
            if !meta.extension.is_empty() {
                println!("  Extension: {}", meta.extension.cyan());
            }
            if let Some(modified) = meta.modified {
                println!("  Modified: {}", modified.format("%Y-%m-%d %H:%M:%S").to_string().cyan());
            }
        });
    }

    output::emit(&file, format, |file| {
        if file.lossy {
            eprintln!("{}", "warning: file is not valid UTF-8, showing a lossy decoding".yellow());
        }
        print!("{}", file.content);
        if !file.content.is_empty() && !file.content.ends_with('\n') {
            println!();
        }
    })
}

fn cmd_file_write(
    ctx: &Context,
    path: &Path,
    content: Option<String>,
    from_stdin: bool,
    format: OutputFormat,
) -> Result<()> {
    let content = match (content, from_stdin) {
        (Some(content), _) => content.into_bytes(),
        (None, true) => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf)?;
            buf
        }
        (None, false) => {
            return Err(OrcliError::validation("give the new content with --content or --stdin"));
        }
    };

    let net = ctx.net()?;
    let result = net.write(path, &content)?;
    output::emit(&result, format, |r| print_mutation(r, net.root()))
}

fn cmd_file_search(ctx: &Context, dir: Option<PathBuf>, query: &SearchQuery, format: OutputFormat) -> Result<()> {
    let dir = dir.map(|d| ctx.resolve(&d)).unwrap_or_else(|| ctx.root.clone());
    let start = Instant::now();
    let hits = tools::search_files(&dir, query)?;

    output::emit(&hits, format, |hits| {
        if hits.is_empty() {
            println!("{}", "No matching files".yellow());
            return;
        }
        for hit in hits {
            println!(
                "{} {}",
                utils::display_relative(&hit.path, &dir).cyan(),
                format!("({})", format_bytes(hit.size)).dimmed()
            );
            for m in &hit.match_lines {
                println!("  {} {}", format!("{:>5}:", m.line_number).yellow(), m.line);
            }
            if hit.content_matches > hit.match_lines.len() {
                println!(
                    "  {}",
                    format!("... {} more matches", hit.content_matches - hit.match_lines.len()).dimmed()
                );
            }
        }
        println!(
            "\n{}",
            format!("{} files in {}", hits.len(), format_duration(round_ms(start.elapsed()))).dimmed()
        );
    })
}

fn cmd_file_remove(ctx: &Context, path: &Path, force: bool, format: OutputFormat) -> Result<()> {
    if !force && !confirm(&format!("Remove {}?", path.display()))? {
        println!("Aborted.");
        return Ok(());
    }
    let net = ctx.net()?;
    let result = net.remove(path)?;
    output::emit(&result, format, |r| print_mutation(r, net.root()))
}

fn print_mutation(result: &OperationResult, root: &Path) {
    let verb = match (result.kind, result.created) {
        (OperationKind::Write, true) => "Created",
        (OperationKind::Write, false) => "Wrote",
        (OperationKind::Modify, _) => "Modified",
        (OperationKind::Remove, _) => "Removed",
        (OperationKind::Undo, _) => "Reverted",
    };
    println!(
        "{} {} {}",
        "✓".green().bold(),
        verb,
        utils::display_relative(&result.target_path, root).cyan()
    );
    if result.kind != OperationKind::Remove {
        println!("  Size: {}", format_bytes(result.bytes_written).cyan());
    }
    println!("  Record: {}", format!("#{}", result.record_id).yellow());
    println!("  Undo with: {}", "orcli file undo".yellow());
}

fn print_undo(outcome: &UndoOutcome, root: &Path) {
    match outcome {
        UndoOutcome::Restored(report) => {
            println!(
                "{} Reverted {} of {}",
                "✓".green().bold(),
                report.reverted_kind,
                utils::display_relative(&report.target_path, root).cyan()
            );
            match &report.action {
                UndoAction::Rewrote { bytes } => {
                    println!("  Restored: {}", format_bytes(*bytes).cyan())
                }
                UndoAction::Deleted => println!("  Deleted: {}", "file did not exist before".cyan()),
                UndoAction::Relinked { target } => {
                    println!("  Relinked: {}", target.display().to_string().cyan())
                }
            }
            println!(
                "  Records: {} reverted by {}",
                format!("#{}", report.reverted_record_id).yellow(),
                format!("#{}", report.undo_record_id).yellow()
            );
        }
        UndoOutcome::NothingToUndo => println!("{}", "Nothing to undo".yellow()),
    }
}

// ---------------------------------------------------------------------------
// code
// ---------------------------------------------------------------------------

fn run_code(ctx: &Context, action: CodeCommand) -> Result<()> {
    match action {
        CodeCommand::Analyze {
            file,
            detailed,
            output,
        } => {
            let path = ctx.resolve(&file);
            let analysis = tools::analyze_code(&path)?;
            output::emit(&analysis, output.format, |a| {
                println!(
                    "{} {}",
                    path.display().to_string().cyan().bold(),
                    format!("({})", a.language).dimmed()
                );
                println!(
                    "  Lines: {} total, {} code, {} comment, {} blank",
                    a.total_lines.to_string().cyan(),
                    a.code_lines,
                    a.comment_lines,
                    a.blank_lines
                );
                println!("  Functions: {}", a.functions.len().to_string().cyan());
                println!("  Classes: {}", a.classes.len().to_string().cyan());
                println!("  Imports: {}", a.imports.len().to_string().cyan());

                if detailed {
                    for item in &a.functions {
                        let params = item.detail.as_deref().unwrap_or_default();
                        println!("    {} {}({}) {}", "fn".green(), item.name, params, format!("line {}", item.line).dimmed());
                    }
                    for item in &a.classes {
                        println!("    {} {} {}", "type".blue(), item.name, format!("line {}", item.line).dimmed());
                    }
                    for import in &a.imports {
                        println!("    {} {}", "use".yellow(), import);
                    }
                }
            })
        }
        CodeCommand::Modify {
            file,
            request,
            model,
            output,
        } => {
            let net = ctx.net()?;
            let client = ctx.ai_client()?;
            let model = ctx.model(model, "coding");

            let progress = spinner(&format!("Asking {}...", model), output.format.is_human());
            let edit = tools::ai_modify_file(&net, &client, &file, &request, &model);
            if let Some(pb) = progress {
                pb.finish_and_clear();
            }
            let edit = edit?;

            output::emit(&edit, output.format, |e| {
                print_mutation(&e.operation, net.root());
                println!("  Model: {}", e.model.cyan());
            })
        }
        CodeCommand::Review {
            file,
            focus,
            model,
            output,
        } => {
            let client = ctx.ai_client()?;
            let model = ctx.model(model, "coding");

            let progress = spinner(&format!("Asking {}...", model), output.format.is_human());
            let review = tools::ai_review_file(&client, &ctx.resolve(&file), &model, focus);
            if let Some(pb) = progress {
                pb.finish_and_clear();
            }
            let review = ModelReply {
                model,
                reply: review?,
            };
            output::emit(&review, output.format, |r| println!("{}", r.reply.trim()))
        }
    }
}

#[derive(Serialize)]
struct ModelReply {
    model: String,
    reply: String,
}

// ---------------------------------------------------------------------------
// web
// ---------------------------------------------------------------------------

fn run_web(ctx: &Context, action: WebCommand) -> Result<()> {
    match action {
        WebCommand::Fetch {
            url,
            extract_text,
            save_to,
            timeout,
            output,
        } => {
            let client = WebClient::new(Duration::from_secs(timeout))?;
            let progress = spinner(&format!("Fetching {}...", url), output.format.is_human());
            let result = client.fetch(&url, extract_text);
            if let Some(pb) = progress {
                pb.finish_and_clear();
            }
            let result = result?;

            // Saving is a regular mutation: backed up and undoable
            let saved = match &save_to {
                Some(target) => {
                    let net = ctx.net()?;
                    Some(net.write(target, result.saveable_text().as_bytes())?)
                }
                None => None,
            };

            if !output.format.is_human() {
                #[derive(Serialize)]
                struct Fetched<'a> {
                    #[serde(flatten)]
                    result: &'a web::FetchResult,
                    saved: Option<&'a OperationResult>,
                }
                return output::emit(
                    &Fetched {
                        result: &result,
                        saved: saved.as_ref(),
                    },
                    output.format,
                    |_| {},
                );
            }

            println!(
                "{} {} {}",
                format!("HTTP {}", result.status).green().bold(),
                result.url.cyan(),
                format!("({}, {})", result.content_type, format_bytes(result.content_length as u64)).dimmed()
            );
            match &saved {
                Some(op) => println!(
                    "{} Saved to {} (record #{})",
                    "✓".green().bold(),
                    op.target_path.display().to_string().cyan(),
                    op.record_id
                ),
                None => println!("{}", result.saveable_text()),
            }
            Ok(())
        }
        WebCommand::Api {
            url,
            method,
            data,
            headers,
            timeout,
            output,
        } => {
            let client = WebClient::new(Duration::from_secs(timeout))?;
            let response = client.api_request(&url, &method, data.as_deref(), headers.as_deref())?;
            output::emit(&response, output.format, |r| {
                let status = format!("{} {}", r.method, r.status);
                if r.success {
                    println!("{} {}", status.green().bold(), r.url.cyan());
                } else {
                    println!("{} {}", status.red().bold(), r.url.cyan());
                }
                match &r.data {
                    serde_json::Value::String(text) => println!("{}", text),
                    value => println!(
                        "{}",
                        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
                    ),
                }
            })
        }
        WebCommand::Extract {
            html,
            from_file,
            output,
        } => {
            let html = match (html, from_file) {
                (Some(html), _) => html,
                (None, Some(file)) => tools::read_file(&ctx.resolve(&file))?.content,
                (None, None) => {
                    return Err(OrcliError::validation("give the HTML as an argument or with --from-file"));
                }
            };

            #[derive(Serialize)]
            struct Extracted {
                text: String,
                length: usize,
            }
            let text = web::extract_text(&html);
            let extracted = Extracted {
                length: text.chars().count(),
                text,
            };
            output::emit(&extracted, output.format, |e| println!("{}", e.text))
        }
    }
}

// ---------------------------------------------------------------------------
// chat
// ---------------------------------------------------------------------------

fn run_chat(ctx: &Context, action: ChatCommand) -> Result<()> {
    match action {
        ChatCommand::Ask {
            question,
            model,
            output,
        } => {
            let params = CompletionParams::default();
            cmd_chat_once(ctx, &question, ctx.model(model, "general"), &params, output.format)
        }
        ChatCommand::Prompt {
            prompt,
            model,
            system,
            temperature,
            max_tokens,
            output,
        } => {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(OrcliError::validation("temperature must be between 0 and 2"));
            }
            let params = CompletionParams {
                system,
                temperature,
                max_tokens,
            };
            cmd_chat_once(ctx, &prompt, ctx.model(model, "general"), &params, output.format)
        }
        ChatCommand::Interactive { model } => cmd_chat_interactive(ctx, ctx.model(model, "general")),
    }
}

fn cmd_chat_once(
    ctx: &Context,
    prompt: &str,
    model: String,
    params: &CompletionParams,
    format: OutputFormat,
) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(OrcliError::validation("prompt is empty"));
    }
    let client = ctx.ai_client()?;

    let progress = spinner("Thinking...", format.is_human());
    let reply = client.complete(prompt, &model, params);
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let reply = ModelReply { model, reply: reply? };
    output::emit(&reply, format, |r| println!("{}", r.reply.trim()))
}

/// Prompt carrying the recent conversation
fn chat_prompt(turns: &[(String, String)], question: &str) -> String {
    let mut prompt = String::new();
    for (user, assistant) in turns {
        prompt.push_str(&format!("User: {}\nAssistant: {}\n\n", user, assistant.trim()));
    }
    prompt.push_str(&format!("User: {}\nAssistant:", question));
    prompt
}

fn cmd_chat_interactive(ctx: &Context, mut model: String) -> Result<()> {
    let client = ctx.ai_client()?;
    let params = CompletionParams::default();
    let mut net: Option<SafetyNet> = None;
    let mut turns: Vec<(String, String)> = Vec::new();

    println!("{} {}", "orcli chat with".blue().bold(), model.cyan());
    println!("{}", "Type /help for commands".dimmed());

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("{} ", "you>".green().bold());
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            println!();
            break;
        };
        let line = line?;
        let input = line.trim();
        let (command, rest) = input.split_once(char::is_whitespace).unwrap_or((input, ""));

        let outcome = match command {
            "" => Ok(()),
            "/exit" | "/quit" => break,
            "/help" => {
                print_chat_help();
                Ok(())
            }
            "/clear" => {
                turns.clear();
                println!("{}", "Conversation cleared".dimmed());
                Ok(())
            }
            "/model" if rest.trim().is_empty() => {
                println!("Current model: {}", model.cyan());
                Ok(())
            }
            "/model" => {
                model = rest.trim().to_string();
                println!("Switched to model: {}", model.cyan());
                Ok(())
            }
            "/tools" => open_net(ctx, &mut net).and_then(|net| chat_tools(ctx, net, &client, &model, rest)),
            "/undo" => open_net(ctx, &mut net).and_then(|net| {
                let outcome = net.undo()?;
                print_undo(&outcome, net.root());
                Ok(())
            }),
            "/history" => open_net(ctx, &mut net).and_then(|net| {
                print_records(&net.list(Some(10))?, net.root());
                Ok(())
            }),
            command if command.starts_with('/') => {
                println!("{} unknown command {} (try /help)", "!".yellow().bold(), command);
                Ok(())
            }
            _ => client
                .complete(&chat_prompt(&turns, input), &model, &params)
                .map(|reply| {
                    println!("{} {}", "ai>".blue().bold(), reply.trim());
                    turns.push((input.to_string(), reply));
                    if turns.len() > CHAT_CONTEXT_TURNS {
                        turns.remove(0);
                    }
                }),
        };

        // Errors end the turn, not the session
        if let Err(e) = outcome {
            eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        }
    }
    Ok(())
}

fn print_chat_help() {
    let commands = [
        ("/help", "Show this help"),
        ("/model [id]", "Show or switch the model"),
        ("/tools", "List the tools"),
        ("/tools <name>", "Show a tool's parameters"),
        ("/tools <name> key=value ...", "Run a tool"),
        ("/undo", "Undo the last file change"),
        ("/history", "Show the last 10 operations"),
        ("/clear", "Forget the conversation so far"),
        ("/exit", "Leave the chat"),
    ];
    for (command, description) in commands {
        println!("  {:<30} {}", command.cyan(), description);
    }
}

/// `/tools` inside interactive chat
fn chat_tools(
    ctx: &Context,
    net: &SafetyNet,
    client: &dyn CompletionClient,
    model: &str,
    args: &str,
) -> Result<()> {
    let registry = ToolRegistry::new();
    let words = registry::split_line(args)?;
    let Some((name, params)) = words.split_first() else {
        print_tool_list(&registry, "/tools <name>");
        return Ok(());
    };

    let spec = registry.get(name)?;
    if params.is_empty() && !spec.params.is_empty() {
        print_tool_help(spec, "/tools ");
        return Ok(());
    }

    println!("{} {}", "Executing tool:".blue(), name.cyan());
    let tool_ctx = tool_context(ctx, net, Some(client), Some(model));
    let output = registry.execute(name, params, &tool_ctx)?;
    println!("{} Tool executed successfully", "✓".green().bold());
    print_tool_output(&output);
    Ok(())
}

fn open_net<'a>(ctx: &Context, net: &'a mut Option<SafetyNet>) -> Result<&'a SafetyNet> {
    if net.is_none() {
        *net = Some(ctx.net()?);
    }
    net.as_ref()
        .ok_or_else(|| OrcliError::internal("safety net was not opened"))
}

// ---------------------------------------------------------------------------
// tools
// ---------------------------------------------------------------------------

fn run_tools(ctx: &Context, action: ToolsCommand) -> Result<()> {
    let registry = ToolRegistry::new();
    match action {
        ToolsCommand::List { output } => output::emit(&registry.tools(), output.format, |_| {
            print_tool_list(&registry, "orcli tools help <name>")
        }),
        ToolsCommand::Help { name, output } => {
            let spec = registry.get(&name)?;
            output::emit(spec, output.format, |spec| print_tool_help(spec, "orcli tools run "))
        }
        ToolsCommand::Run { name, params, output } => {
            let net = ctx.net()?;
            // Only the AI tools need a provider; the others run without a key
            let client = ctx.ai_client().ok();
            let tool_ctx = tool_context(
                ctx,
                &net,
                client.as_ref().map(|c| c as &dyn CompletionClient),
                None,
            );
            let result = registry.execute(&name, &params, &tool_ctx)?;
            output::emit(&result, output.format, print_tool_output)
        }
    }
}

fn tool_context<'a>(
    ctx: &Context,
    net: &'a SafetyNet,
    client: Option<&'a dyn CompletionClient>,
    chat_model: Option<&str>,
) -> ToolContext<'a> {
    let mut tool_ctx = ToolContext::new(net);
    tool_ctx.client = client;
    tool_ctx.coding_model = ctx.model(None, "coding");
    tool_ctx.general_model = chat_model
        .map(str::to_string)
        .unwrap_or_else(|| ctx.model(None, "general"));
    tool_ctx
}

fn print_tool_list(registry: &ToolRegistry, help_hint: &str) {
    println!("{}", "Available tools".blue().bold());
    for (category, specs) in registry.by_category() {
        println!("\n{}", category.to_string().bold());
        for spec in specs {
            println!("  {:<14} {}", spec.name.cyan(), spec.description);
        }
    }
    println!("\nTotal: {} tools", registry.tools().len());
    println!("{}", format!("Use '{}' for parameters", help_hint).dimmed());
}

fn print_tool_help(spec: &ToolSpec, run_prefix: &str) {
    println!("{} {}", "Tool:".bold(), spec.name.cyan().bold());
    println!("  Description: {}", spec.description);
    println!("  Category: {}", spec.category);
    if !spec.params.is_empty() {
        println!("  Parameters:");
        for param in spec.params {
            let required = if param.required { "required".yellow() } else { "optional".dimmed() };
            println!("    {} ({}) {}", param.name.cyan(), param.kind, required);
            println!("      {}", param.description);
        }
    }
    let example = spec.example.strip_prefix("/tools ").unwrap_or(spec.example);
    println!("  Example: {}{}", run_prefix, example);
}

/// Characters of file content shown for `fs_read`
const TOOL_PREVIEW_CHARS: usize = 500;

fn print_tool_output(output: &ToolOutput) {
    let result = &output.result;
    for key in ["review", "reply", "summary"] {
        if let Some(text) = result.get(key).and_then(|v| v.as_str()) {
            println!("{}", text.trim());
            return;
        }
    }

    match output.tool {
        "fs_read" => {
            let content = result.get("content").and_then(|v| v.as_str()).unwrap_or_default();
            let shown: String = content.chars().take(TOOL_PREVIEW_CHARS).collect();
            println!("{}", shown);
            let hidden = content.chars().count().saturating_sub(TOOL_PREVIEW_CHARS);
            if hidden > 0 {
                println!("{}", format!("... {} more characters", hidden).dimmed());
            }
        }
        "shell_exec" => {
            for stream in ["stdout", "stderr"] {
                if let Some(text) = result.get(stream).and_then(|v| v.as_str()).filter(|t| !t.is_empty()) {
                    print!("{}", text);
                    if !text.ends_with('\n') {
                        println!();
                    }
                }
            }
            println!(
                "{}",
                format!("exit code: {}", result.get("return_code").cloned().unwrap_or_default()).dimmed()
            );
        }
        _ => println!(
            "{}",
            serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string())
        ),
    }
}

// ---------------------------------------------------------------------------
// debug
// ---------------------------------------------------------------------------

fn run_debug(ctx: &Context, action: DebugCommand) -> Result<()> {
    match action {
        DebugCommand::Analyze {
            directory,
            language,
            depth,
            exclude,
            save_to,
            model,
            output,
        } => {
            let client = ctx.ai_client()?;
            let model = ctx.model(model, "general");
            let options = ScanOptions {
                language,
                max_depth: depth,
                exclude,
            };

            let progress = spinner("Scanning and analyzing codebase...", output.format.is_human());
            let report = debug::analyze_codebase(&client, &ctx.resolve(&directory), &options, &model);
            if let Some(pb) = progress {
                pb.finish_and_clear();
            }
            let report = report?;

            let saved = match &save_to {
                Some(path) => Some(debug::save_report(&ctx.net()?, &ctx.resolve(path), &report)?),
                None => None,
            };

            output::emit(&report, output.format, |r| {
                println!(
                    "{} {} files, {} lines",
                    "✓".green().bold(),
                    r.scan.total_files.to_string().cyan(),
                    r.scan.total_lines.to_string().cyan()
                );
                for (language, count) in &r.scan.languages {
                    println!("  {}: {} files", language, count);
                }
                if r.findings.is_empty() {
                    println!("  {}", "No static findings".green());
                }
                for file in &r.findings {
                    println!("\n{}", file.relative_path.display().to_string().cyan());
                    print_findings(&file.findings);
                }
                println!("\n{}\n{}", "AI insights:".blue().bold(), r.insights.trim());
                if let Some(op) = &saved {
                    println!("\nReport saved to {} (record #{})", op.target_path.display().to_string().cyan(), op.record_id);
                }
            })
        }
        DebugCommand::File {
            file,
            error_type,
            fix_suggestions,
            model,
            output,
        } => {
            let client = ctx.ai_client()?;
            let model = ctx.model(model, "general");

            let progress = spinner("Analyzing the code for issues...", output.format.is_human());
            let report = debug::debug_file(&client, &ctx.resolve(&file), error_type, fix_suggestions, &model);
            if let Some(pb) = progress {
                pb.finish_and_clear();
            }
            let report = report?;

            output::emit(&report, output.format, |r| {
                println!(
                    "{} {}",
                    r.path.display().to_string().cyan().bold(),
                    format!("({})", r.language).dimmed()
                );
                if r.findings.is_clean() {
                    println!("  {}", "No static findings".green());
                } else {
                    print_findings(&r.findings);
                }
                println!("\n{}\n{}", "AI analysis:".blue().bold(), r.analysis.trim());
                if let Some(fixes) = &r.fix_suggestions {
                    println!("\n{}\n{}", "Fix suggestions:".blue().bold(), fixes.trim());
                }
            })
        }
        DebugCommand::Project {
            directory,
            test_command,
            no_save,
            model,
            output,
        } => {
            let client = ctx.ai_client()?;
            let model = ctx.model(model, "general");
            let dir = ctx.resolve(&directory);

            let progress = spinner("Debugging project...", output.format.is_human());
            let report = debug::debug_project(&client, &dir, test_command.as_deref(), &model);
            if let Some(pb) = progress {
                pb.finish_and_clear();
            }
            let report = report?;

            let saved = if no_save {
                None
            } else {
                let path = dir.join(debug::report_file_name(chrono::Local::now()));
                Some(debug::save_report(&ctx.net()?, &path, &report)?)
            };

            output::emit(&report, output.format, |r| {
                println!("{} {}", "Project:".bold(), r.project_path.display().to_string().cyan());
                println!("  Files: {} ({} lines)", r.total_files.to_string().cyan(), r.total_lines);
                if !r.structure.config_files.is_empty() {
                    println!("  Config files: {}", r.structure.config_files.join(", "));
                }
                println!("  Tests directory: {}", if r.structure.has_tests { "yes".green() } else { "no".yellow() });
                for manifest in &r.dependencies {
                    println!("  {}: {} dependencies", manifest.file, manifest.dependencies.len());
                }
                println!("  Files with findings: {}", r.findings.len());
                println!("  Security issues: {}", r.security_issue_count());
                match &r.tests {
                    Some(TestRun::Finished(run)) if run.success => {
                        println!("  Tests: {}", "passed".green())
                    }
                    Some(TestRun::Finished(run)) => println!(
                        "  Tests: {} (exit code {})",
                        "failed".red(),
                        run.return_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string())
                    ),
                    Some(TestRun::Failed { error, .. }) => println!("  Tests: {} ({})", "not run".red(), error),
                    None => {}
                }
                println!("\n{}\n{}", "AI assessment:".blue().bold(), r.assessment.trim());
                if let Some(op) = &saved {
                    println!("\nReport saved to {} (record #{})", op.target_path.display().to_string().cyan(), op.record_id);
                }
            })
        }
    }
}

fn print_findings(findings: &StaticFindings) {
    for issue in &findings.syntax_issues {
        println!("  {} line {}: {}", "syntax".red(), issue.line, issue.message);
    }
    for smell in &findings.code_smells {
        println!("  {} {}", "smell".yellow(), smell);
    }
    for issue in &findings.security_issues {
        println!("  {} {}", "security".red().bold(), issue);
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn run_config(ctx: Context, action: ConfigCommand) -> Result<()> {
    let path = ctx.config_path;
    match action {
        ConfigCommand::Init { api_key, force } => {
            let config = Config::init(&path, api_key, force)?;
            println!("{} Wrote configuration", "✓".green().bold());
            println!("  Path: {}", path.display().to_string().cyan());
            if config.api_key().is_none() {
                println!(
                    "\nNext step: {}",
                    "orcli config set api.key <your OpenRouter key>".yellow()
                );
            }
            Ok(())
        }
        ConfigCommand::Get {
            key,
            show_sensitive,
            output,
        } => {
            let shown = if show_sensitive {
                ctx.config
            } else {
                ctx.config.masked()
            };
            let value = shown
                .get(&key)?
                .ok_or_else(|| OrcliError::validation(format!("unknown configuration key '{}'", key)))?;
            output::emit(&value, output.format, |v| match v {
                toml::Value::String(s) => println!("{}", s),
                other => println!("{}", other),
            })
        }
        ConfigCommand::Set { key, value } => {
            let mut config = ctx.config;
            config.set(&key, &value)?;
            config.save(&path)?;

            let shown = config
                .masked()
                .get(&key)?
                .map(|v| v.to_string())
                .unwrap_or_default();
            println!("{} Set {} = {}", "✓".green().bold(), key.cyan(), shown);
            Ok(())
        }
        ConfigCommand::List {
            show_sensitive,
            output,
        } => {
            let shown = if show_sensitive {
                ctx.config
            } else {
                ctx.config.masked()
            };
            if output.format.is_human() {
                println!("{}", format!("# {}", path.display()).dimmed());
                print!("{}", toml::to_string_pretty(&shown)?);
                return Ok(());
            }
            output::emit(&shown, output.format, |_| {})
        }
        ConfigCommand::Validate { output } => {
            let mut issues = ctx.config.validate();
            if let Some(e) = &ctx.config_error {
                issues.insert(
                    0,
                    ConfigIssue {
                        level: IssueLevel::Error,
                        key: "file".to_string(),
                        message: e.clone(),
                    },
                );
            }
            output::emit(&issues, output.format, |issues| {
                if issues.is_empty() {
                    println!("{} Configuration is valid", "✓".green().bold());
                }
                for issue in issues {
                    match issue.level {
                        IssueLevel::Error => println!("{} {}", "✗".red().bold(), issue),
                        IssueLevel::Warning => println!("{} {}", "!".yellow().bold(), issue),
                    }
                }
            })?;

            let errors = issues.iter().filter(|i| i.level == IssueLevel::Error).count();
            if errors > 0 {
                return Err(OrcliError::config(format!("{} configuration error(s)", errors)));
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigCommand::Reset { force } => {
            if !force && !confirm("Reset the configuration to defaults?")? {
                println!("Aborted.");
                return Ok(());
            }
            Config::reset(&path)?;
            println!("{} Configuration reset to defaults", "✓".green().bold());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// history
// ---------------------------------------------------------------------------

fn run_history(ctx: &Context, action: HistoryCommand) -> Result<()> {
    match action {
        HistoryCommand::List {
            limit,
            operation,
            output,
        } => {
            let net = ctx.net()?;
            let mut records = net.list(None)?;
            if let Some(kind) = operation {
                let kind: OperationKind = kind.parse()?;
                records.retain(|r| r.kind == kind);
            }
            if let Some(limit) = limit {
                records.truncate(limit);
            }
            output::emit(&records, output.format, |records| print_records(records, net.root()))
        }
        HistoryCommand::Show { id, output } => {
            let net = ctx.net()?;
            let record = net
                .get(id)?
                .ok_or_else(|| OrcliError::validation(format!("no record #{} in history", id)))?;

            #[derive(Serialize)]
            struct RecordDetails {
                record: OperationRecord,
                backup: Option<BackupRecord>,
                #[serde(skip_serializing_if = "Option::is_none")]
                backup_error: Option<String>,
            }
            let (backup, backup_error) = match record.backup_ref.as_deref().map(|b| net.backup(b)) {
                Some(Ok(backup)) => (Some(backup), None),
                Some(Err(e)) => (None, Some(e.to_string())),
                None => (None, None),
            };
            let details = RecordDetails {
                record,
                backup,
                backup_error,
            };

            output::emit(&details, output.format, |d| {
                println!("{}", output::format_record(&d.record, net.root()));
                println!("  Path: {}", d.record.target_path.display().to_string().cyan());
                println!("  Bytes written: {}", format_bytes(d.record.bytes_written).cyan());
                match (&d.backup, &d.backup_error) {
                    (Some(backup), _) if backup.is_absent() => {
                        println!("  Backup: {} (file did not exist)", backup.id.yellow())
                    }
                    (Some(BackupRecord { id, snapshot: Snapshot::Symlink { target }, .. }), _) => {
                        println!("  Backup: {} (link to {})", id.yellow(), target.display())
                    }
                    (Some(backup), _) => println!(
                        "  Backup: {} ({})",
                        backup.id.yellow(),
                        format_bytes(backup.size())
                    ),
                    (None, Some(e)) => println!("  Backup: {}", e.red()),
                    (None, None) => println!("  Backup: {}", "none".dimmed()),
                }
            })
        }
        HistoryCommand::Export { file, format } => {
            let net = ctx.net()?;
            let text = net.export_history(format.into())?;
            // Export files are reports about the history, not tracked changes
            utils::atomic_write(&file, text.as_bytes())?;
            println!(
                "{} Exported {} records to {}",
                "✓".green().bold(),
                net.history()?.len(),
                file.display().to_string().cyan()
            );
            Ok(())
        }
        HistoryCommand::Cleanup {
            days,
            count,
            force,
            output,
        } => {
            let days = days.unwrap_or(ctx.config.preferences.retention_days);
            if !force && !confirm(&format!("Delete history and backups older than {} days?", days))? {
                println!("Aborted.");
                return Ok(());
            }
            let net = ctx.net()?;
            let stats = net.cleanup(days, count)?;
            output::emit(&stats, output.format, |s| {
                println!("{} Cleanup complete", "✓".green().bold());
                println!("  History records pruned: {}", s.history_pruned.to_string().cyan());
                println!("  Backups deleted: {}", s.records_deleted.to_string().cyan());
                println!("  Objects deleted: {}", s.objects_deleted.to_string().cyan());
                println!("  Space reclaimed: {}", format_bytes(s.bytes_reclaimed).cyan());
                if !s.protected.is_empty() {
                    println!("  Kept for undo: {}", s.protected.len().to_string().yellow());
                }
            })
        }
        HistoryCommand::Clear { force } => {
            if !force && !confirm("Clear the whole operation history?")? {
                println!("Aborted.");
                return Ok(());
            }
            let removed = ctx.net()?.clear_history()?;
            println!("{} Cleared {} history records", "✓".green().bold(), removed);
            Ok(())
        }
    }
}

fn print_records(records: &[OperationRecord], root: &Path) {
    if records.is_empty() {
        println!("{}", "No operations recorded".yellow());
        return;
    }
    println!("{}", format!("History ({} records)", records.len()).bold());
    for record in records {
        println!("{}", output::format_record(record, root));
    }
}

// ---------------------------------------------------------------------------
// version / doctor
// ---------------------------------------------------------------------------

fn cmd_version(format: OutputFormat) -> Result<()> {
    #[derive(Serialize)]
    struct VersionInfo {
        name: &'static str,
        version: &'static str,
    }
    let info = VersionInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    };
    output::emit(&info, format, |i| println!("{} {}", i.name.bold(), i.version.cyan()))
}

#[derive(Serialize)]
struct Check {
    name: &'static str,
    ok: bool,
    detail: String,
}

fn cmd_doctor(ctx: &Context, check_api: bool, format: OutputFormat) -> Result<()> {
    let mut checks = Vec::new();

    let config_check = match &ctx.config_error {
        Some(e) => Check {
            name: "config",
            ok: false,
            detail: e.clone(),
        },
        None => {
            let issues = ctx.config.validate();
            Check {
                name: "config",
                ok: !issues.iter().any(|i| i.level == IssueLevel::Error),
                detail: if issues.is_empty() {
                    format!("{} is valid", ctx.config_path.display())
                } else {
                    issues.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; ")
                },
            }
        }
    };
    checks.push(config_check);

    let storage = ctx.net().and_then(|net| {
        tempfile::NamedTempFile::new_in(net.storage_path())?;
        let stats = net.backup_stats()?;
        Ok(format!(
            "{} writable, {} backups, {}",
            net.storage_path().display(),
            stats.record_count,
            format_bytes(stats.stored_bytes)
        ))
    });
    checks.push(match storage {
        Ok(detail) => Check {
            name: "storage",
            ok: true,
            detail,
        },
        Err(e) => Check {
            name: "storage",
            ok: false,
            detail: e.to_string(),
        },
    });

    if check_api {
        let start = Instant::now();
        let probe = ctx.ai_client().and_then(|client| client.probe());
        debug!("API probe took {:?}", start.elapsed());
        checks.push(match probe {
            Ok(()) => Check {
                name: "api",
                ok: true,
                detail: format!(
                    "{} reachable in {}",
                    ctx.config.api.base_url,
                    format_duration(round_ms(start.elapsed()))
                ),
            },
            Err(e) => Check {
                name: "api",
                ok: false,
                detail: e.to_string(),
            },
        });
    }

    output::emit(&checks, format, |checks| {
        for check in checks {
            let mark = if check.ok { "✓".green().bold() } else { "✗".red().bold() };
            println!("{} {:<8} {}", mark, check.name, check.detail);
        }
    })?;

    let failed = checks.iter().filter(|c| !c.ok).count();
    if failed > 0 {
        return Err(OrcliError::config(format!("{} check(s) failed", failed)));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

fn spinner(message: &str, show: bool) -> Option<ProgressBar> {
    if !show {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

/// Ask on stderr; anything but y/yes is a no
fn confirm(question: &str) -> Result<bool> {
    eprint!("{} [y/N] ", question);
    io::stderr().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn round_ms(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
