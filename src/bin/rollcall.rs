//! CLI binary for rada-rollcall.
//!
//! A thin shim over the library crate that maps CLI flags to `IngestConfig`,
//! draws one progress bar per document and prints the run summary.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rada_rollcall::{
    ingest_directory, DocumentId, DocumentReport, IngestConfig, IngestProgressCallback,
    IngestStats, PageSelection, ProgressCallback, ShutdownSignal,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar per document, stacked in a [`MultiProgress`]. Events arrive from
/// the aggregator task one at a time, in per-document page order.
struct CliProgressCallback {
    multi: MultiProgress,
    bars: Mutex<HashMap<DocumentId, ProgressBar>>,
    style: ProgressStyle,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:<28.bold}  [{bar:32.green/238}] {pos:>3}/{len} pages  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        Arc::new(Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
            style,
        })
    }

    fn bar(&self, doc: &DocumentId) -> Option<ProgressBar> {
        self.bars.lock().ok()?.get(doc).cloned()
    }

    fn println(&self, line: String) {
        let _ = self.multi.println(line);
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_run_start(&self, documents: usize) {
        self.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Ingesting {documents} document(s)…"))
        ));
    }

    fn on_document_start(&self, doc: &DocumentId, total_pages: usize) {
        let bar = self.multi.add(ProgressBar::new(total_pages as u64));
        bar.set_style(self.style.clone());
        bar.set_prefix(truncate(doc.as_str(), 28));
        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(doc.clone(), bar);
        }
    }

    fn on_page_complete(&self, doc: &DocumentId, _page_num: usize, _total: usize) {
        if let Some(bar) = self.bar(doc) {
            bar.inc(1);
        }
    }

    fn on_page_error(&self, doc: &DocumentId, page_num: usize, total: usize, error: &str) {
        self.println(format!(
            "  {} {} page {:>3}/{:<3}  {}",
            red("✗"),
            doc,
            page_num,
            total,
            red(&truncate(error, 100)),
        ));
        if let Some(bar) = self.bar(doc) {
            bar.inc(1);
        }
    }

    fn on_document_complete(&self, doc: &DocumentId, report: &DocumentReport) {
        if let Some(bar) = self.bar(doc) {
            bar.finish_with_message(format!(
                "{} {} votes, {} skipped",
                green("✓"),
                report.vote_pages,
                report.skipped_pages
            ));
        }
    }

    fn on_document_failed(&self, doc: &DocumentId, error: &str) {
        match self.bar(doc) {
            Some(bar) => bar.abandon_with_message(red(&truncate(error, 60))),
            None => self.println(format!("  {} {}  {}", red("✘"), doc, red(error))),
        }
    }

    fn on_run_complete(&self, stats: &IngestStats) {
        let _ = self.multi.clear();
        print_summary(stats);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}\u{2026}")
    } else {
        s.to_string()
    }
}

fn print_summary(stats: &IngestStats) {
    let ok = stats.documents - stats.failed_documents;
    let mark = if stats.failed_documents == 0 && stats.failed_pages == 0 {
        green("✔")
    } else if ok == 0 && stats.documents > 0 {
        red("✘")
    } else {
        cyan("⚠")
    };
    eprintln!(
        "{} {}/{} documents  {} vote pages  {} votes  {}ms",
        mark,
        bold(&ok.to_string()),
        stats.documents,
        stats.vote_pages,
        stats.votes,
        stats.duration_ms,
    );
    eprintln!(
        "   {}",
        dim(&format!(
            "voices: {} created / {} updated / {} pruned   pages: {} skipped / {} failed",
            stats.voices_created,
            stats.voices_updated,
            stats.voices_pruned,
            stats.skipped_pages,
            stats.failed_pages
        )),
    );
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Ingest every report in a directory into ./rollcall.db
  rollcall reports/2016

  # Use a specific database
  rollcall reports/2016 --database /var/lib/rollcall/votes.db

  # Only the first pages of each document, JSON report on stdout
  rollcall --pages 1-20 --json reports/2016 > run.json

  # Verbose logs instead of progress bars
  rollcall -v --no-progress reports/2016

ENVIRONMENT VARIABLES:
  ROLLCALL_INPUT_DIR      Directory with roll-call PDFs
  ROLLCALL_DATABASE       SQLite database file
  ROLLCALL_PAGES          Page selection
  ROLLCALL_PASSWORD       PDF user password
  PDFIUM_LIB_PATH         Path to libpdfium (else ./ then system paths)
  RUST_LOG                Overrides the log filter (e.g. rada_rollcall=debug)

Re-running over the same reports is safe: records are matched by natural key,
changed voices are updated and voices of deputies missing from a page removed.
Press Ctrl-C to stop after the pages in flight.
"#;

/// Ingest roll-call vote PDF reports into a SQLite database.
#[derive(Parser, Debug)]
#[command(
    name = "rollcall",
    version,
    about = "Ingest \"Рада Голос\" roll-call vote PDF reports into SQLite",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory containing roll-call PDF reports.
    #[arg(env = "ROLLCALL_INPUT_DIR")]
    input_dir: PathBuf,

    /// SQLite database file (created if missing).
    #[arg(short, long, env = "ROLLCALL_DATABASE", default_value = "rollcall.db")]
    database: PathBuf,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "ROLLCALL_PAGES", default_value = "all")]
    pages: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "ROLLCALL_PASSWORD")]
    password: Option<String>,

    /// Output the run report as JSON on stdout.
    #[arg(long, env = "ROLLCALL_JSON")]
    json: bool,

    /// Disable progress bars.
    #[arg(long, env = "ROLLCALL_NO_PROGRESS")]
    no_progress: bool,

    /// Retries of a page transaction after a database write conflict.
    #[arg(long, env = "ROLLCALL_MAX_RETRIES", default_value_t = 5)]
    max_retries: u32,

    /// First retry delay in milliseconds (doubled per attempt).
    #[arg(long, env = "ROLLCALL_RETRY_BACKOFF_MS", default_value_t = 50)]
    retry_backoff_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[arg(long, env = "ROLLCALL_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    busy_timeout_ms: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "ROLLCALL_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "ROLLCALL_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Progress bars replace INFO logs; -v always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn IngestProgressCallback>)
    } else {
        None
    };

    let shutdown = ShutdownSignal::new();
    let config = build_config(&cli, progress_cb, shutdown.clone())?;

    // ── Ctrl-C ───────────────────────────────────────────────────────────
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} stopping after pages in flight…", cyan("◆"));
            shutdown.trigger();
        }
    });

    // ── Run ingestion ────────────────────────────────────────────────────
    let report = ingest_directory(&config)
        .await
        .context("Ingestion failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet && !show_progress {
        for doc in &report.documents {
            match &doc.error {
                None => eprintln!(
                    "{} {}  {} vote pages, {} skipped, {} failed",
                    green("✓"),
                    doc.id,
                    doc.vote_pages,
                    doc.skipped_pages,
                    doc.failed_pages.len()
                ),
                Some(e) => eprintln!("{} {}  {}", red("✘"), doc.id, red(e)),
            }
        }
        print_summary(&report.stats);
    }

    if report.stats.failed_documents > 0 {
        std::process::exit(2);
    }
    Ok(())
}

/// Map CLI args to `IngestConfig`.
fn build_config(
    cli: &Cli,
    progress: Option<ProgressCallback>,
    shutdown: ShutdownSignal,
) -> Result<IngestConfig> {
    let mut builder = IngestConfig::builder()
        .input_dir(&cli.input_dir)
        .database(&cli.database)
        .pages(parse_pages(&cli.pages)?)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .busy_timeout_ms(cli.busy_timeout_ms)
        .shutdown(shutdown);

    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }

        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .context(format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }

        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }

    Ok(PageSelection::Single(page))
}
