//! Batch ingestion entry points.
//!
//! One worker per discovered document. Workers run on the blocking pool
//! (pdfium and SQLite are both blocking), each with its own store
//! connection, and process their document's pages in order. Workers share
//! nothing but the database file, where natural-key upserts and per-page
//! transactions keep concurrent writes consistent, and the progress channel.
//!
//! A document that cannot be opened fails alone; the rest of the batch
//! carries on. The coordinator waits for every worker, then for the progress
//! aggregator, and returns one [`IngestReport`].

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::pipeline::input;
use crate::pipeline::pdfium::PdfiumReader;
use crate::pipeline::reconcile::{PageOutcome, Reconciler};
use crate::pipeline::source::{DocumentReader, PageSource};
use crate::progress::{NoopProgressCallback, ProgressAggregator, ProgressCallback, ProgressEvent};
use crate::report::{DocumentId, DocumentReport, IngestReport, IngestStats};
use crate::store::SqliteStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

/// Ingest every PDF in `config.input_dir` through the process-wide pdfium
/// instance.
///
/// # Returns
/// `Ok(IngestReport)` once every document has been attempted, even if some
/// documents or pages failed (check `report.stats`).
///
/// # Errors
/// Returns `Err(IngestError)` only for run-level failures:
/// - the pdfium library cannot be bound
/// - the input directory cannot be listed
/// - the database cannot be opened or migrated
pub async fn ingest_directory(config: &IngestConfig) -> Result<IngestReport, IngestError> {
    let reader = PdfiumReader::shared()?;
    ingest_directory_with(config, Arc::new(reader)).await
}

/// [`ingest_directory`] with a caller-supplied document reader.
pub async fn ingest_directory_with(
    config: &IngestConfig,
    reader: Arc<dyn DocumentReader>,
) -> Result<IngestReport, IngestError> {
    let run_start = Instant::now();
    info!("Starting ingestion: {}", config.input_dir.display());

    // ── Step 1: Discover documents ───────────────────────────────────────
    let paths = input::discover_documents(&config.input_dir)?;
    let documents: Vec<(DocumentId, PathBuf)> = paths
        .into_iter()
        .map(|p| (DocumentId::new(&config.input_dir, &p), p))
        .collect();

    // ── Step 2: Create / migrate the store once ──────────────────────────
    let database = config.database.clone();
    let busy_timeout = config.busy_timeout();
    tokio::task::spawn_blocking(move || SqliteStore::open(&database, busy_timeout).map(drop))
        .await
        .map_err(|e| IngestError::Internal(format!("Store setup task panicked: {}", e)))??;

    let callback: ProgressCallback = config
        .progress_callback
        .clone()
        .unwrap_or_else(|| Arc::new(NoopProgressCallback));
    callback.on_run_start(documents.len());

    // ── Step 3: Fan out ──────────────────────────────────────────────────
    let (events, rx) = mpsc::unbounded_channel();
    let aggregator = tokio::spawn(ProgressAggregator::new(Arc::clone(&callback)).run(rx));

    let workers: Vec<_> = documents
        .iter()
        .cloned()
        .map(|(id, path)| {
            let config = config.clone();
            let reader = Arc::clone(&reader);
            let events = events.clone();
            tokio::task::spawn_blocking(move || {
                process_document(id, path, &config, &*reader, &events)
            })
        })
        .collect();

    // ── Step 4: Join ─────────────────────────────────────────────────────
    let joined = futures::future::join_all(workers).await;
    let reports: Vec<DocumentReport> = joined
        .into_iter()
        .zip(documents)
        .map(|(result, (id, path))| {
            result.unwrap_or_else(|e| {
                let error = format!("Worker panicked: {}", e);
                warn!("{}: {}", id, error);
                let _ = events.send(ProgressEvent::DocumentFailed {
                    doc: id.clone(),
                    error: error.clone(),
                });
                let mut report = DocumentReport::new(id, path);
                report.error = Some(error);
                report
            })
        })
        .collect();

    let _ = events.send(ProgressEvent::Finished);
    drop(events);
    let progress = aggregator
        .await
        .map_err(|e| IngestError::Internal(format!("Progress aggregator panicked: {}", e)))?;
    debug!("Aggregated progress for {} documents", progress.len());

    // ── Step 5: Stats ────────────────────────────────────────────────────
    let stats = IngestStats::from_reports(&reports, run_start.elapsed().as_millis() as u64);
    info!(
        "Ingestion complete: {}/{} documents, {} vote pages, {} failed pages, {}ms",
        stats.documents - stats.failed_documents,
        stats.documents,
        stats.vote_pages,
        stats.failed_pages,
        stats.duration_ms
    );
    callback.on_run_complete(&stats);

    Ok(IngestReport {
        documents: reports,
        stats,
    })
}

/// Synchronous wrapper around [`ingest_directory`].
///
/// Creates a temporary tokio runtime internally.
pub fn ingest_sync(config: &IngestConfig) -> Result<IngestReport, IngestError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| IngestError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(ingest_directory(config))
}

// ── Worker ───────────────────────────────────────────────────────────────────

/// Run one document to completion. Never fails: document-level errors land
/// in [`DocumentReport::error`].
fn process_document(
    id: DocumentId,
    path: PathBuf,
    config: &IngestConfig,
    reader: &dyn DocumentReader,
    events: &UnboundedSender<ProgressEvent>,
) -> DocumentReport {
    let start = Instant::now();
    let mut report = DocumentReport::new(id, path);

    let result = run_document(&mut report, config, reader, events);
    report.duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(()) => {
            info!(
                "{}: {} vote page(s), {} skipped, {} failed in {}ms",
                report.id,
                report.vote_pages,
                report.skipped_pages,
                report.failed_pages.len(),
                report.duration_ms
            );
            let _ = events.send(ProgressEvent::DocumentFinished {
                report: Box::new(report.clone()),
            });
        }
        Err(e) => {
            warn!("{}: {}", report.id, e);
            report.error = Some(e.to_string());
            let _ = events.send(ProgressEvent::DocumentFailed {
                doc: report.id.clone(),
                error: e.to_string(),
            });
        }
    }
    report
}

fn run_document(
    report: &mut DocumentReport,
    config: &IngestConfig,
    reader: &dyn DocumentReader,
    events: &UnboundedSender<ProgressEvent>,
) -> Result<(), IngestError> {
    input::validate_pdf(&report.path)?;

    let mut store = SqliteStore::open(&config.database, config.busy_timeout())?;
    let mut reconciler = Reconciler::new(&mut store, config.retry_policy());
    let path = report.path.clone();

    reader.read(&path, config.password.as_deref(), &mut |source: &mut dyn PageSource| {
        report.total_pages = source.page_count();
        let indices = config.pages.to_indices(report.total_pages);
        report.selected_pages = indices.len();
        let _ = events.send(ProgressEvent::DocumentStarted {
            doc: report.id.clone(),
            total_pages: indices.len(),
        });

        for idx in indices {
            if config.shutdown.is_triggered() {
                return Err(IngestError::Cancelled);
            }

            let error = match reconciler.process_page(source, idx) {
                Ok(PageOutcome::Skipped) => {
                    report.skipped_pages += 1;
                    None
                }
                Ok(PageOutcome::Recorded(record)) => {
                    report.absorb(&record);
                    None
                }
                Err(e) => {
                    warn!("{}: {}", report.id, e);
                    let msg = e.to_string();
                    report.failed_pages.push(e);
                    Some(msg)
                }
            };
            report.processed_pages += 1;
            let _ = events.send(ProgressEvent::PageProcessed {
                doc: report.id.clone(),
                page_num: idx + 1,
                error,
            });
        }
        Ok(())
    })
}
