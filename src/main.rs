//! Shelfwatch main entry point
//!
//! This is the command-line interface for the Shelfwatch catalog mirror.

use anyhow::{anyhow, Context};
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use shelfwatch::changes::ChangeTracker;
use shelfwatch::config::{load_config_with_hash, Config};
use shelfwatch::crawler::{run_locked_crawl, run_schedule, Coordinator, CrawlRun};
use shelfwatch::kv::{KvStore, SqliteKvStore};
use shelfwatch::model::{ChangeType, TrackedField};
use shelfwatch::output::{
    build_daily_report, format_change_line, format_crawl_summary, load_statistics,
    print_statistics, render_report, write_markdown, ReportFormat,
};
use shelfwatch::storage::{open_storage, ChangeQuery, SqliteStorage};
use shelfwatch::{CrawlLock, RateLimiter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// Shelfwatch: a change-tracked catalog mirror
///
/// Shelfwatch crawls a paginated product catalog, mirrors every item into
/// SQLite and keeps an audit log of every tracked field change.
#[derive(Parser, Debug)]
#[command(name = "shelfwatch")]
#[command(version)]
#[command(about = "A change-tracked catalog mirror", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = "shelfwatch.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one crawl now, unless another run holds the crawl lock
    Crawl {
        /// First catalog page (defaults to the configured start page)
        #[arg(long)]
        start: Option<u32>,

        /// Last catalog page (defaults to the configured end page, or discovery)
        #[arg(long)]
        end: Option<u32>,

        /// Also write the run summary as markdown to this path
        #[arg(long, value_name = "PATH")]
        summary: Option<PathBuf>,
    },

    /// Crawl on the configured interval until stopped
    Schedule,

    /// List audit entries, newest first
    Changes {
        /// Only entries for this item id
        #[arg(long)]
        item: Option<i64>,

        /// Only this change type (new_item or update)
        #[arg(long = "type", value_name = "TYPE")]
        change_type: Option<String>,

        /// Only changes to this field (e.g. price_incl_tax)
        #[arg(long)]
        field: Option<String>,

        /// Only entries on or after this day (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,

        /// Only entries before this day (YYYY-MM-DD)
        #[arg(long)]
        until: Option<NaiveDate>,

        #[arg(long, default_value_t = 50)]
        limit: u32,

        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Print the change report for one day
    Report {
        /// Day to report (YYYY-MM-DD, defaults to today UTC)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// json, csv or markdown
        #[arg(long, default_value = "json")]
        format: ReportFormat,

        /// Write to this file instead of stdout
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Show item and change-log statistics
    Stats,

    /// Count one request for a caller and print the rate-limit headers
    RateCheck {
        /// Caller identity, e.g. an API key
        caller: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Crawl {
            start,
            end,
            summary,
        } => handle_crawl(&config, start, end, summary.as_deref()).await,
        Command::Schedule => handle_schedule(&config).await,
        Command::Changes {
            item,
            change_type,
            field,
            since,
            until,
            limit,
            offset,
        } => {
            let query = ChangeQuery {
                item_id: item,
                change_type: change_type.as_deref().map(parse_change_type).transpose()?,
                field: field.as_deref().map(parse_field).transpose()?,
                since: since.map(start_of_day).transpose()?,
                until: until.map(start_of_day).transpose()?,
                limit: Some(limit),
                offset: Some(offset),
            };
            handle_changes(&config, &query)
        }
        Command::Report {
            date,
            format,
            output,
        } => handle_report(&config, date, format, output.as_deref()),
        Command::Stats => handle_stats(&config),
        Command::RateCheck { caller } => handle_rate_check(&config, &caller).await,
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("shelfwatch=info,warn"),
            1 => EnvFilter::new("shelfwatch=debug,info"),
            2 => EnvFilter::new("shelfwatch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn parse_change_type(raw: &str) -> anyhow::Result<ChangeType> {
    ChangeType::from_db_string(raw).ok_or_else(|| anyhow!("Unknown change type '{}'", raw))
}

fn parse_field(raw: &str) -> anyhow::Result<TrackedField> {
    TrackedField::from_db_string(raw).ok_or_else(|| anyhow!("Unknown tracked field '{}'", raw))
}

fn start_of_day(date: NaiveDate) -> anyhow::Result<chrono::DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| anyhow!("Invalid date {}", date))
}

fn open_kv(config: &Config) -> anyhow::Result<Arc<dyn KvStore>> {
    let path = Path::new(&config.storage.kv_path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteKvStore::open(path)
        .with_context(|| format!("Failed to open key-value store {}", path.display()))?;
    Ok(Arc::new(store))
}

fn open_catalog(config: &Config) -> anyhow::Result<SqliteStorage> {
    let path = Path::new(&config.storage.database_path);
    open_storage(path).with_context(|| format!("Failed to open database {}", path.display()))
}

/// Opens storage, the lock and the coordinator once for the process
fn build_crawl_stack(config: &Config) -> anyhow::Result<(CrawlLock, Coordinator)> {
    let storage = open_catalog(config)?;
    let tracker = Arc::new(ChangeTracker::new(Arc::new(Mutex::new(storage))));
    let coordinator =
        Coordinator::new(config, tracker).context("Failed to initialize the HTTP client")?;
    let lock = CrawlLock::new(open_kv(config)?);
    Ok((lock, coordinator))
}

/// Handles a manual crawl trigger
async fn handle_crawl(
    config: &Config,
    start: Option<u32>,
    end: Option<u32>,
    summary_path: Option<&Path>,
) -> anyhow::Result<()> {
    let (lock, coordinator) = build_crawl_stack(config)?;
    let start = start.unwrap_or(config.crawl.start_page);
    let end = end.or(config.crawl.end_page);

    match run_locked_crawl(&lock, &coordinator, start, end).await? {
        CrawlRun::Completed(summary) => {
            let markdown = format_crawl_summary(&summary);
            match summary_path {
                Some(path) => {
                    write_markdown(&markdown, path)?;
                    println!("✓ Summary written to: {}", path.display());
                }
                None => println!("{}", markdown),
            }
        }
        CrawlRun::Skipped => {
            println!("Another crawl is running; nothing to do");
        }
    }

    Ok(())
}

/// Handles the periodic schedule
async fn handle_schedule(config: &Config) -> anyhow::Result<()> {
    let (lock, coordinator) = build_crawl_stack(config)?;

    tracing::info!(
        "Scheduling crawls every {}s (run on start: {})",
        config.schedule.interval_secs,
        config.schedule.run_on_start
    );

    tokio::select! {
        _ = run_schedule(&lock, &coordinator, &config.schedule) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Interrupted, stopping schedule");
        }
    }

    Ok(())
}

/// Handles the changes listing
fn handle_changes(config: &Config, query: &ChangeQuery) -> anyhow::Result<()> {
    use shelfwatch::storage::Storage;

    let storage = open_catalog(config)?;
    let total = storage.count_changes(query)?;
    let entries = storage.query_changes(query)?;

    for entry in &entries {
        println!("{}", format_change_line(entry));
    }
    println!("\n{} of {} matching entries", entries.len(), total);

    Ok(())
}

/// Handles the daily report
fn handle_report(
    config: &Config,
    date: Option<NaiveDate>,
    format: ReportFormat,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let storage = open_catalog(config)?;
    let date = date.unwrap_or_else(|| Utc::now().date_naive());

    let report = build_daily_report(&storage, date)?;
    let rendered = render_report(&report, format)?;

    match output {
        Some(path) => {
            std::fs::write(path, rendered)?;
            println!("✓ Report for {} written to: {}", date, path.display());
        }
        None => println!("{}", rendered),
    }

    Ok(())
}

/// Handles the statistics display
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let storage = open_catalog(config)?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles a single rate-limit check
async fn handle_rate_check(config: &Config, caller: &str) -> anyhow::Result<()> {
    let limiter = RateLimiter::new(
        open_kv(config)?,
        config.rate_limit.requests,
        config.rate_limit.window(),
    );

    let decision = limiter.check_and_increment(caller).await;
    println!("HTTP {}", decision.status_code());
    for (name, value) in decision.headers() {
        println!("{}: {}", name, value);
    }

    Ok(())
}
