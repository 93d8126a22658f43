//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use gufi_rollup::core::config::Config;
use gufi_rollup::core::errors::RollupError;
use gufi_rollup::index::builder::{BuildOptions, BuildReport, build_index};
use gufi_rollup::rollup::engine::{RollupRun, run_rollup};

/// Build and compact per-directory metadata indexes.
#[derive(Debug, Parser)]
#[command(
    name = "gufi",
    author,
    version,
    about = "Per-directory metadata index builder and rollup tool",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Merge subdirectory indexes into their parents, bottom-up.
    Rollup(RollupArgs),
    /// Build an index tree from a source directory tree.
    Index(IndexArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct RollupArgs {
    /// Worker threads (defaults to config, then available parallelism).
    #[arg(short = 'n', long, value_name = "THREADS")]
    threads: Option<usize>,
    /// Score every directory but change nothing on disk.
    #[arg(long)]
    dry_run: bool,
    /// Print `<path> <score>` for every processed directory.
    #[arg(long)]
    print_scores: bool,
    /// Append per-directory outcome events to this JSONL file.
    #[arg(long, value_name = "PATH")]
    event_log: Option<PathBuf>,
    /// Index roots to roll up.
    #[arg(required = true, value_name = "INDEX")]
    roots: Vec<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct IndexArgs {
    /// Worker threads (defaults to config, then available parallelism).
    #[arg(short = 'n', long, value_name = "THREADS")]
    threads: Option<usize>,
    /// Give each index directory the mode and owner of its source directory.
    #[arg(long)]
    preserve_permissions: bool,
    /// Source tree to index.
    #[arg(value_name = "SOURCE")]
    source: PathBuf,
    /// Directory the index tree is created under.
    #[arg(value_name = "DEST")]
    dest: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

impl From<RollupError> for CliError {
    fn from(err: RollupError) -> Self {
        match err {
            RollupError::InvalidConfig { .. }
            | RollupError::MissingConfig { .. }
            | RollupError::ConfigParse { .. }
            | RollupError::NotADirectory { .. } => Self::User(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Rollup(args) => run_rollup_command(cli, args),
        Command::Index(args) => run_index_command(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli, threads: Option<usize>) -> Result<Config, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(threads) = threads {
        config.walker.threads = threads;
    }
    Ok(config)
}

fn run_rollup_command(cli: &Cli, args: &RollupArgs) -> Result<(), CliError> {
    let mut config = load_config(cli, args.threads)?;
    config.rollup.dry_run |= args.dry_run;
    config.rollup.print_scores |= args.print_scores;
    if let Some(path) = &args.event_log {
        config.paths.event_log = Some(path.clone());
    }
    config.validate()?;

    let run = run_rollup(&args.roots, &config)?;
    match output_mode(cli) {
        OutputMode::Human => print!("{}", format_rollup_human(&run)),
        OutputMode::Json => write_json_line(&rollup_payload(&run))?,
    }
    Ok(())
}

fn run_index_command(cli: &Cli, args: &IndexArgs) -> Result<(), CliError> {
    let config = load_config(cli, args.threads)?;
    let mut options = BuildOptions::from_config(&config);
    options.preserve_permissions = args.preserve_permissions;

    let report = build_index(&args.source, &args.dest, &options)?;
    match output_mode(cli) {
        OutputMode::Human => print!("{}", format_index_human(&report)),
        OutputMode::Json => write_json_line(&json!({ "command": "index", "report": report }))?,
    }
    Ok(())
}

fn rollup_payload(run: &RollupRun) -> Value {
    json!({
        "command": "rollup",
        "walk": run.walk,
        "summary": run.summary,
    })
}

fn format_rollup_human(run: &RollupRun) -> String {
    let headline = if run.summary.dry_run {
        "Rollup dry run complete".yellow().bold()
    } else {
        "Rollup complete".green().bold()
    };
    let mut out = format!(
        "{headline} ({} directories, {} threads)\n",
        run.walk.directories_ready, run.walk.threads
    );
    if run.walk.roots_skipped > 0 {
        out.push_str(&format!(
            "{} {} of {} roots skipped\n",
            "warning:".yellow(),
            run.walk.roots_skipped,
            run.walk.roots_requested
        ));
    }
    if run.walk.directories_unreadable > 0 {
        out.push_str(&format!(
            "{} {} directories could not be listed\n",
            "warning:".yellow(),
            run.walk.directories_unreadable
        ));
    }
    if run.walk.tasks_panicked > 0 {
        out.push_str(&format!(
            "{} {} tasks panicked; their ancestors were not rolled up\n",
            "warning:".yellow(),
            run.walk.tasks_panicked
        ));
    }
    out.push_str(&run.summary.render_human());
    out
}

fn format_index_human(report: &BuildReport) -> String {
    let mut out = format!(
        "{} {} -> {}\n",
        "Indexed".green().bold(),
        report.source.display(),
        report.index_root.display()
    );
    out.push_str(&format!(
        "  directories: {}\n  entries:     {}\n",
        report.directories_indexed, report.entries_indexed
    ));
    if report.directories_failed > 0 {
        out.push_str(&format!(
            "  {} {}\n",
            "failed:".red(),
            report.directories_failed
        ));
    }
    out
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("GUFI_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
