//! `chat-tabs` command line: replay chat logs through the tab pipeline,
//! inspect stored history, and manage the tab layout file.

#![forbid(unsafe_code)]

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chat_tabs_core::timestamps;
use chat_tabs_core::{
    Config, HistoryQuery, InMemoryStore, Message, MessageStore, Tab, TabsConfig,
};
use chat_tabs_store::{ChatPipeline, SqliteMessageStore, StoreError};

const BACKFILL_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Core(#[from] chat_tabs_core::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CliResult<T> = Result<T, CliError>;

#[derive(Parser, Debug)]
#[command(name = "chat-tabs", version, about = "Chat tab routing and history tools")]
pub struct Cli {
    /// Log at debug level (overrides `RUST_LOG`).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Feed a JSONL file of messages through the pipeline and print the tabs.
    Replay(ReplayArgs),
    /// Print recent stored history.
    History(HistoryArgs),
    /// Print the effective configuration, or write the default tab layout.
    Config {
        #[arg(long)]
        init: bool,
    },
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// One JSON message per line.
    #[arg(long, short = 'i')]
    pub input: PathBuf,
    /// Tab layout file (defaults to the configured path).
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long, conflicts_with = "memory")]
    pub db: Option<PathBuf>,
    /// Use a throwaway in-memory store.
    #[arg(long)]
    pub memory: bool,
    /// Lines to print per tab.
    #[arg(long, short = 'n', default_value_t = 5)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    #[arg(long)]
    pub db: Option<PathBuf>,
    #[arg(long, short = 'n', default_value_t = 20)]
    pub limit: usize,
    /// Only lines seen by this character content id.
    #[arg(long)]
    pub receiver: Option<u64>,
}

pub fn run() -> i32 {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match execute(cli, &mut out) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err}");
            1
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn execute(cli: Cli, out: &mut dyn Write) -> CliResult<()> {
    let config = Config::get();
    match cli.command {
        Commands::Replay(args) => handle_replay(config, &args, out),
        Commands::History(args) => handle_history(&config, &args, out),
        Commands::Config { init } => handle_config(&config, init, out),
    }
}

/// Counts from reading a replay file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ReplaySummary {
    ingested: usize,
    unrouted: usize,
    malformed: usize,
}

fn replay_lines(pipeline: &ChatPipeline, input: impl BufRead) -> CliResult<ReplaySummary> {
    let mut summary = ReplaySummary::default();
    for (index, line) in input.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(line) {
            Ok(message) => {
                summary.ingested += 1;
                if pipeline.ingest(message).is_unrouted() {
                    summary.unrouted += 1;
                }
            }
            Err(e) => {
                let err =
                    chat_tabs_core::Error::MalformedInput(format!("line {}: {e}", index + 1));
                tracing::warn!(error = %err, "skipping replay line");
                summary.malformed += 1;
            }
        }
    }
    Ok(summary)
}

fn open_store(
    config: &Config,
    db: Option<&Path>,
    memory: bool,
) -> CliResult<Arc<dyn MessageStore>> {
    if memory {
        return Ok(Arc::new(InMemoryStore::new()));
    }
    let path = db.unwrap_or(config.database_path.as_path());
    Ok(Arc::new(SqliteMessageStore::open(path)?))
}

fn handle_replay(config: Config, args: &ReplayArgs, out: &mut dyn Write) -> CliResult<()> {
    let layout_path = args
        .config
        .clone()
        .unwrap_or_else(|| config.tabs_config_path.clone());
    let layout = TabsConfig::load_or_default(&layout_path)?;
    let store = open_store(&config, args.db.as_deref(), args.memory)?;
    let pipeline = ChatPipeline::new(config, layout, Some(store))?;

    let input = BufReader::new(std::fs::File::open(&args.input)?);
    let summary = replay_lines(&pipeline, input)?;
    pipeline.flush();

    if pipeline.request_backfill().is_some() {
        let report = pipeline.wait_for_events(BACKFILL_WAIT);
        tracing::debug!(?report, "replay backfill");
    }

    writeln!(
        out,
        "ingested {} messages ({} unrouted, {} malformed)",
        summary.ingested, summary.unrouted, summary.malformed
    )?;
    for tab in pipeline.tabs().iter() {
        write_tab(out, tab, pipeline.config().snapshot_timeout, args.limit)?;
    }
    if let Some(stats) = pipeline.persist_stats() {
        writeln!(
            out,
            "persisted {} (errors {}, dropped {})",
            stats.written, stats.errors, stats.dropped
        )?;
    }
    pipeline.shutdown();
    Ok(())
}

fn write_tab(out: &mut dyn Write, tab: &Tab, timeout: Duration, limit: usize) -> CliResult<()> {
    let view = tab.messages().read_view(timeout).map_err(chat_tabs_core::Error::from)?;
    writeln!(
        out,
        "== {} ({} messages, {} unread)",
        tab.name(),
        view.len(),
        tab.unread()
    )?;
    let skip = view.len().saturating_sub(limit);
    for message in &view[skip..] {
        writeln!(out, "  {}", format_line(message, tab.display_timestamp()))?;
    }
    Ok(())
}

fn format_line(message: &Message, with_timestamp: bool) -> String {
    let sender = message.sender_text();
    let body = message.content_text();
    let text = if sender.is_empty() {
        body
    } else {
        format!("{sender}: {body}")
    };
    if with_timestamp {
        format!("[{}] {text}", message.date().format("%H:%M:%S"))
    } else {
        text
    }
}

fn handle_history(config: &Config, args: &HistoryArgs, out: &mut dyn Write) -> CliResult<()> {
    let path = args.db.as_deref().unwrap_or(config.database_path.as_path());
    let store = SqliteMessageStore::open(path)?;
    let mut query = HistoryQuery::recent(args.limit);
    if let Some(receiver) = args.receiver {
        query = query.for_receiver(receiver);
    }
    let messages = store.recent(&query)?;
    for message in &messages {
        writeln!(out, "{}", format_line(message, true))?;
    }
    writeln!(out, "{} of {} stored messages", messages.len(), store.count()?)?;
    Ok(())
}

fn handle_config(config: &Config, init: bool, out: &mut dyn Write) -> CliResult<()> {
    let path = &config.tabs_config_path;
    if init {
        if path.exists() {
            return Err(CliError::InvalidArgument(format!(
                "{} already exists",
                path.display()
            )));
        }
        TabsConfig::default().save(path)?;
        writeln!(out, "wrote default tab layout to {}", path.display())?;
        return Ok(());
    }

    writeln!(out, "display_limit: {}", config.display_limit)?;
    writeln!(out, "backfill_limit: {}", config.backfill_limit)?;
    writeln!(out, "snapshot_timeout_ms: {}", config.snapshot_timeout.as_millis())?;
    writeln!(out, "persist_enabled: {}", config.persist_enabled)?;
    writeln!(out, "persist_queue_capacity: {}", config.persist_queue_capacity)?;
    writeln!(out, "inactivity_hide_secs: {}", config.inactivity_hide_after.as_secs())?;
    writeln!(out, "database_path: {}", config.database_path.display())?;
    writeln!(out, "tabs_config_path: {}", path.display())?;
    writeln!(
        out,
        "clock_skew_backward_jumps: {}",
        timestamps::clock_skew_backward_jumps()
    )?;
    let layout = TabsConfig::load_or_default(path)?;
    writeln!(out, "{}", serde_json::to_string_pretty(&layout)?)?;
    Ok(())
}
