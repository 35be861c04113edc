//! Configuration for an ingestion run.
//!
//! Every knob lives in [`IngestConfig`], built via [`IngestConfigBuilder`].
//! The config is cloned into each document worker, so it only holds cheap
//! values and `Arc`s.

use crate::error::IngestError;
use crate::pipeline::reconcile::{RetryPolicy, MAX_BACKOFF};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for one run over a directory of roll-call PDFs.
///
/// # Example
/// ```rust
/// use rada_rollcall::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .input_dir("pdfs/2016")
///     .database("votes.db")
///     .max_retries(8)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// Directory scanned (non-recursively) for `*.pdf` files.
    pub input_dir: PathBuf,

    /// SQLite database file. Created and migrated on first use. Default: `rollcall.db`.
    pub database: PathBuf,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Pages of every document to examine. Default: all.
    pub pages: PageSelection,

    /// Retries of a page transaction after a write conflict. Default: 5.
    pub max_retries: u32,

    /// First retry delay in milliseconds, doubled per attempt. Default: 50.
    pub retry_backoff_ms: u64,

    /// How long SQLite waits on a locked database before reporting busy. Default: 5000.
    pub busy_timeout_ms: u64,

    /// Receives per-document and per-page events.
    pub progress_callback: Option<ProgressCallback>,

    /// Checked by workers between pages.
    pub shutdown: ShutdownSignal,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            database: PathBuf::from("rollcall.db"),
            password: None,
            pages: PageSelection::default(),
            max_retries: 5,
            retry_backoff_ms: 50,
            busy_timeout_ms: 5000,
            progress_callback: None,
            shutdown: ShutdownSignal::default(),
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("input_dir", &self.input_dir)
            .field("database", &self.database)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("pages", &self.pages)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn IngestProgressCallback>"),
            )
            .field("shutdown", &self.shutdown.is_triggered())
            .finish()
    }
}

impl IngestConfig {
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_dir = dir.into();
        self
    }

    pub fn database(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database = path.into();
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn busy_timeout_ms(mut self, ms: u64) -> Self {
        self.config.busy_timeout_ms = ms;
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.config.progress_callback = Some(callback);
        self
    }

    pub fn shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.config.shutdown = signal;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if c.input_dir.as_os_str().is_empty() {
            return Err(IngestError::InvalidConfig(
                "Input directory must not be empty".into(),
            ));
        }
        if c.database.as_os_str().is_empty() {
            return Err(IngestError::InvalidConfig(
                "Database path must not be empty".into(),
            ));
        }
        if c.max_retries > 30 {
            return Err(IngestError::InvalidConfig(format!(
                "max_retries must be 0–30, got {}",
                c.max_retries
            )));
        }
        if c.retry_backoff_ms > MAX_BACKOFF.as_millis() as u64 {
            return Err(IngestError::InvalidConfig(format!(
                "retry_backoff_ms must be at most {}, got {}",
                MAX_BACKOFF.as_millis(),
                c.retry_backoff_ms
            )));
        }
        if let PageSelection::Range(start, end) = c.pages {
            if start == 0 || start > end {
                return Err(IngestError::InvalidConfig(format!(
                    "Invalid page range {}-{}",
                    start, end
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Shutdown ─────────────────────────────────────────────────────────────────

/// Cooperative cancellation flag shared by the host and every worker.
///
/// Workers finish the page in flight, then stop before the next one.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Page selection ───────────────────────────────────────────────────────────

/// Which pages of each PDF to examine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Every page (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}
