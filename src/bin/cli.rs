//! Heartbeat CLI - MCP server launcher and read-only inspection of a heartbeat root
//!
//! Usage: heartbeat-cli [OPTIONS] <COMMAND>
//!
//! Logs go to stderr; stdout carries command output (or the MCP stream).

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use heartbeat_lib::{
    inbox::{self, InboxKind},
    paths::{self, ThemeRef},
    theme_status::{self, StatusOptions, DEFAULT_RECENT_ACTIVITY_COUNT},
    timing, HeartbeatId, Layout, SessionContext, Settings,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Main CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "heartbeat-cli")]
#[command(version, about = "AI heartbeat workflow tools", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Working root holding artifacts/, stats/, themebox/ (default: current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Settings file (default: <root>/heartbeat.conf)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output as JSON for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[cfg(feature = "mcp")]
    /// Start the MCP server
    McpServer {
        /// Use stdio transport (required)
        #[arg(long)]
        stdio: bool,
    },
    /// Show the next inbox item without processing it
    Preview {
        /// Which inbox to look at
        #[arg(long = "box", value_enum, default_value = "themebox")]
        inbox: InboxArg,
    },
    /// Time elapsed since a heartbeat ID
    Elapsed {
        /// Heartbeat ID (YYYYMMDDHHMMSS)
        heartbeat_id: String,
    },
    /// Theme status report
    Status {
        /// THEME_START_ID
        start_id: String,
        /// Theme directory part
        part: String,
        #[command(flatten)]
        parent: ParentArgs,
        /// Counts only, no distributions or recent patterns
        #[arg(long)]
        brief: bool,
        /// Activities in the recent pattern (3-20)
        #[arg(long, default_value_t = DEFAULT_RECENT_ACTIVITY_COUNT)]
        recent: usize,
    },
    /// List a theme's artifact files
    Artifacts {
        /// THEME_START_ID
        start_id: String,
        /// Theme directory part
        part: String,
        #[command(flatten)]
        parent: ParentArgs,
        /// Only files directly in the theme directory
        #[arg(long)]
        top_level: bool,
    },
    /// Show how a name becomes a theme directory part
    Sanitize {
        name: String,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args)]
struct ParentArgs {
    /// Parent THEME_START_ID, for a subtheme
    #[arg(long, requires = "parent_part")]
    parent_start_id: Option<String>,
    /// Parent theme directory part, for a subtheme
    #[arg(long, requires = "parent_start_id")]
    parent_part: Option<String>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum InboxArg {
    Themebox,
    Feedbackbox,
}

impl From<InboxArg> for InboxKind {
    fn from(arg: InboxArg) -> Self {
        match arg {
            InboxArg::Themebox => InboxKind::Themebox,
            InboxArg::Feedbackbox => InboxKind::Feedbackbox,
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn init_tracing(verbose: bool) {
    let default = if verbose { "heartbeat=debug" } else { "heartbeat=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() {
    // Piping through head/tail must not kill the process
    #[cfg(unix)]
    unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN); }

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run_cli(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_cli(cli: Cli) -> Result<(), String> {
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().map_err(|e| format!("Cannot determine working directory: {}", e))?,
    };
    let layout = Layout::new(root);
    let config = cli.config.unwrap_or_else(|| layout.config_file());
    let settings = Settings::load(&config);
    tracing::debug!(root = %layout.root().display(), config = %config.display(), "Resolved working root");

    match cli.command {
        #[cfg(feature = "mcp")]
        Commands::McpServer { stdio } => {
            if !stdio {
                return Err("Only --stdio transport is currently supported".to_string());
            }
            heartbeat_lib::mcp::run_mcp_server(layout, settings).await
        }
        Commands::Preview { inbox } => handle_preview(&layout, inbox.into(), cli.json),
        Commands::Elapsed { heartbeat_id } => handle_elapsed(&layout, &settings, &heartbeat_id, cli.json),
        Commands::Status { start_id, part, parent, brief, recent } => {
            let theme = theme_ref(&start_id, &part, &parent)?;
            let opts = StatusOptions { include_detailed_stats: !brief, recent_activity_count: recent };
            let ctx = SessionContext::capture(&layout, &settings);
            let status = theme_status::check_theme_status(&ctx, &theme, opts).map_err(|e| e.to_string())?;
            print_json(&status)
        }
        Commands::Artifacts { start_id, part, parent, top_level } => {
            let theme = theme_ref(&start_id, &part, &parent)?;
            let files = theme_status::list_theme_artifacts(&layout, &theme, !top_level).map_err(|e| e.to_string())?;
            if cli.json {
                let files: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
                return print_json(&files);
            }
            for f in files {
                println!("{}", f.display());
            }
            Ok(())
        }
        Commands::Sanitize { name } => {
            let sanitized = paths::sanitize_directory_part(&name);
            if cli.json {
                return print_json(&json!({
                    "input": name,
                    "sanitized": sanitized,
                    "usable": !paths::is_degenerate_part(&sanitized),
                }));
            }
            println!("{}", sanitized);
            if paths::is_degenerate_part(&sanitized) {
                eprintln!("Warning: '{}' has no usable characters for a directory name", name);
            }
            Ok(())
        }
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "heartbeat-cli", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn theme_ref(start_id: &str, part: &str, parent: &ParentArgs) -> Result<ThemeRef, String> {
    ThemeRef::from_parts(start_id, part, parent.parent_start_id.as_deref(), parent.parent_part.as_deref())
        .map_err(|e| e.to_string())
}

fn print_json(value: &impl serde::Serialize) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| format!("Failed to serialize output: {}", e))?;
    println!("{}", text);
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

fn handle_preview(layout: &Layout, kind: InboxKind, json: bool) -> Result<(), String> {
    let item = inbox::preview_next(layout, kind).map_err(|e| e.to_string())?;
    if json {
        return print_json(&item);
    }
    match item {
        Some(item) => {
            println!("{} ({} more after this)", item.filename, item.remaining);
            println!();
            println!("{}", item.content);
        }
        None => println!("No items in the {}.", kind.as_str()),
    }
    Ok(())
}

fn handle_elapsed(layout: &Layout, settings: &Settings, raw: &str, json: bool) -> Result<(), String> {
    let id = HeartbeatId::parse(raw).map_err(|e| e.to_string())?;
    let ctx = SessionContext::capture(layout, settings);
    let elapsed = timing::ensure_not_future(&id, &ctx.now).map_err(|e| e.to_string())?;
    let deviation = timing::check_time_deviation(&id, &ctx.now, settings.timestamp_anomaly_threshold)
        .map_err(|e| e.to_string())?;

    if json {
        return print_json(&json!({
            "heartbeatId": id,
            "elapsedSeconds": elapsed,
            "elapsedFormatted": timing::format_offset(elapsed),
            "deviation": deviation.level,
        }));
    }
    println!("{} ({})", timing::format_offset(elapsed), timing::format_elapsed(elapsed));
    if let Some(msg) = deviation.message() {
        println!("{}", msg);
    }
    Ok(())
}
