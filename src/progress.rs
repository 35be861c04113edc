//! Batch progress: worker events, the aggregator, and the caller callback.
//!
//! Workers run on blocking threads and never call back into the host
//! directly. Each sends [`ProgressEvent`]s over an unbounded channel; a single
//! [`ProgressAggregator`] task owns the per-document counters, forwards each
//! event to the configured [`IngestProgressCallback`], and hands the final
//! counters back when it sees [`ProgressEvent::Finished`].
//!
//! # Example
//!
//! ```rust
//! use rada_rollcall::{DocumentId, IngestConfig, IngestProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     pages: AtomicUsize,
//! }
//!
//! impl IngestProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, doc: &DocumentId, page_num: usize, total_pages: usize) {
//!         let done = self.pages.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{doc}: page {page_num}/{total_pages} ({done} overall)");
//!     }
//! }
//!
//! let config = IngestConfig::builder()
//!     .input_dir("pdfs")
//!     .progress_callback(Arc::new(CountingCallback { pages: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::report::{DocumentId, DocumentReport, IngestStats};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

/// Receives run events. All methods default to no-ops.
///
/// Called from the aggregator task, one event at a time, except
/// `on_run_start` and `on_run_complete`, which the coordinator calls itself.
pub trait IngestProgressCallback: Send + Sync {
    /// Called once after discovery.
    fn on_run_start(&self, documents: usize) {
        let _ = documents;
    }

    /// The document opened; `total_pages` is the number of selected pages.
    fn on_document_start(&self, doc: &DocumentId, total_pages: usize) {
        let _ = (doc, total_pages);
    }

    /// Page recorded or skipped.
    fn on_page_complete(&self, doc: &DocumentId, page_num: usize, total_pages: usize) {
        let _ = (doc, page_num, total_pages);
    }

    /// Page rolled back.
    fn on_page_error(&self, doc: &DocumentId, page_num: usize, total_pages: usize, error: &str) {
        let _ = (doc, page_num, total_pages, error);
    }

    fn on_document_complete(&self, doc: &DocumentId, report: &DocumentReport) {
        let _ = (doc, report);
    }

    /// The worker stopped early (unreadable file, pdfium failure, cancellation).
    fn on_document_failed(&self, doc: &DocumentId, error: &str) {
        let _ = (doc, error);
    }

    fn on_run_complete(&self, stats: &IngestStats) {
        let _ = stats;
    }
}

/// Default callback when none is configured.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Shared callback handle stored in [`crate::config::IngestConfig`].
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;

// ── Events ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    DocumentStarted {
        doc: DocumentId,
        total_pages: usize,
    },
    PageProcessed {
        doc: DocumentId,
        page_num: usize,
        /// Page error text when the page was rolled back.
        error: Option<String>,
    },
    DocumentFinished {
        report: Box<DocumentReport>,
    },
    DocumentFailed {
        doc: DocumentId,
        error: String,
    },
    /// Sent by the coordinator once every worker has returned.
    Finished,
}

/// Per-document counters kept by the aggregator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentProgress {
    pub total_pages: usize,
    pub done: usize,
    pub failed: usize,
    pub finished: bool,
    pub error: Option<String>,
}

// ── Aggregator ───────────────────────────────────────────────────────────────

/// Folds worker events into per-document progress.
pub struct ProgressAggregator {
    progress: HashMap<DocumentId, DocumentProgress>,
    callback: ProgressCallback,
}

impl ProgressAggregator {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            progress: HashMap::new(),
            callback,
        }
    }

    /// Apply one event. Returns `false` once [`ProgressEvent::Finished`] arrives.
    pub fn apply(&mut self, event: ProgressEvent) -> bool {
        match event {
            ProgressEvent::DocumentStarted { doc, total_pages } => {
                self.callback.on_document_start(&doc, total_pages);
                self.progress.entry(doc).or_default().total_pages = total_pages;
            }
            ProgressEvent::PageProcessed {
                doc,
                page_num,
                error,
            } => {
                let entry = self.progress.entry(doc.clone()).or_default();
                entry.done += 1;
                match error {
                    Some(e) => {
                        entry.failed += 1;
                        self.callback
                            .on_page_error(&doc, page_num, entry.total_pages, &e);
                    }
                    None => self
                        .callback
                        .on_page_complete(&doc, page_num, entry.total_pages),
                }
            }
            ProgressEvent::DocumentFinished { report } => {
                self.progress.entry(report.id.clone()).or_default().finished = true;
                self.callback.on_document_complete(&report.id, &report);
            }
            ProgressEvent::DocumentFailed { doc, error } => {
                self.callback.on_document_failed(&doc, &error);
                let entry = self.progress.entry(doc).or_default();
                entry.finished = true;
                entry.error = Some(error);
            }
            ProgressEvent::Finished => {
                debug!("Progress aggregator finished ({} documents)", self.progress.len());
                return false;
            }
        }
        true
    }

    /// Consume events until `Finished` or until every sender is dropped.
    pub async fn run(
        mut self,
        mut events: UnboundedReceiver<ProgressEvent>,
    ) -> HashMap<DocumentId, DocumentProgress> {
        while let Some(event) = events.recv().await {
            if !self.apply(event) {
                break;
            }
        }
        self.progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        failed_docs: Mutex<Vec<String>>,
    }

    impl IngestProgressCallback for TrackingCallback {
        fn on_document_start(&self, _doc: &DocumentId, _total_pages: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _doc: &DocumentId, _page_num: usize, _total_pages: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_error(&self, _doc: &DocumentId, _page: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_failed(&self, doc: &DocumentId, _error: &str) {
            self.failed_docs.lock().unwrap().push(doc.to_string());
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        let doc = DocumentId::from("a.pdf");
        cb.on_run_start(1);
        cb.on_document_start(&doc, 5);
        cb.on_page_complete(&doc, 1, 5);
        cb.on_page_error(&doc, 2, 5, "some error");
        cb.on_document_failed(&doc, "gone");
        cb.on_run_complete(&IngestStats::default());
    }

    #[tokio::test]
    async fn aggregator_keys_progress_by_document() {
        let tracker = Arc::new(TrackingCallback::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(ProgressAggregator::new(tracker.clone()).run(rx));

        let a = DocumentId::from("a.pdf");
        let b = DocumentId::from("b.pdf");
        tx.send(ProgressEvent::DocumentStarted { doc: a.clone(), total_pages: 2 }).unwrap();
        tx.send(ProgressEvent::DocumentStarted { doc: b.clone(), total_pages: 3 }).unwrap();
        tx.send(ProgressEvent::PageProcessed { doc: a.clone(), page_num: 1, error: None }).unwrap();
        tx.send(ProgressEvent::PageProcessed { doc: b.clone(), page_num: 1, error: None }).unwrap();
        tx.send(ProgressEvent::PageProcessed {
            doc: a.clone(),
            page_num: 2,
            error: Some("Page 2: vote title markers not found".into()),
        })
        .unwrap();
        tx.send(ProgressEvent::DocumentFailed { doc: b.clone(), error: "cancelled".into() })
            .unwrap();
        tx.send(ProgressEvent::Finished).unwrap();

        let progress = handle.await.unwrap();
        assert_eq!(
            progress[&a],
            DocumentProgress { total_pages: 2, done: 2, failed: 1, finished: false, error: None }
        );
        assert_eq!(progress[&b].done, 1);
        assert_eq!(progress[&b].error.as_deref(), Some("cancelled"));

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(*tracker.failed_docs.lock().unwrap(), vec!["b.pdf".to_string()]);
    }

    #[tokio::test]
    async fn aggregator_stops_when_senders_drop() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(ProgressAggregator::new(Arc::new(NoopProgressCallback)).run(rx));
        tx.send(ProgressEvent::DocumentStarted { doc: "x.pdf".into(), total_pages: 1 }).unwrap();
        drop(tx);
        let progress = handle.await.unwrap();
        assert_eq!(progress.len(), 1);
    }
}
