//! # rada-rollcall
//!
//! Ingest roll-call vote reports printed by the "Рада Голос" voting system
//! into normalised council, session, vote, deputy and voice records.
//!
//! Municipal councils publish each session's votes as PDF reports: one
//! result page per vote, with a header naming the council, session and vote
//! subject, followed by a two-group table of deputies and their outcome.
//! Reports are re-published and overlap, so ingestion is idempotent: records
//! are matched by natural key, a re-ingested page overwrites changed voices,
//! and a deputy no longer listed on a vote loses their voice.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input dir
//!  │
//!  ├─ 1. Discover  *.pdf files, one worker each (spawn_blocking)
//!  ├─ 2. Read      page text + table grid via pdfium
//!  ├─ 3. Classify  vote-result marker, other pages skipped
//!  ├─ 4. Parse     header fields, 6/8-column roster with wrapped names
//!  ├─ 5. Reconcile upsert by natural key, prune stale voices (one txn/page)
//!  ├─ 6. Tally     recount voices, accepted iff for > against
//!  └─ 7. Report    per-document counters, progress aggregated per document
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rada_rollcall::{ingest_directory, IngestConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IngestConfig::builder()
//!         .input_dir("reports/2016")
//!         .database("rollcall.db")
//!         .build()?;
//!     let report = ingest_directory(&config).await?;
//!     eprintln!(
//!         "{} vote pages, {} votes, {} failed pages",
//!         report.stats.vote_pages, report.stats.votes, report.stats.failed_pages
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `rollcall` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! rada-rollcall = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{IngestConfig, IngestConfigBuilder, PageSelection, ShutdownSignal};
pub use error::{IngestError, PageError, ParseError, StoreError};
pub use ingest::{ingest_directory, ingest_directory_with, ingest_sync};
pub use model::{Decision, Tally, VoiceResult, Vote, VoteKey, VoteType};
pub use pipeline::reconcile::{PageOutcome, PageRecord, Reconciler, RetryPolicy};
pub use pipeline::source::{DocumentReader, PageSource, TableGrid};
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
pub use report::{DocumentId, DocumentReport, IngestReport, IngestStats};
pub use store::{RecordStore, SqliteStore};
