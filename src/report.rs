//! Run results: per-document reports and batch statistics.
//!
//! Everything here is `Serialize` so the CLI can print a run as JSON.

use crate::error::PageError;
use crate::model::VoteId;
use crate::pipeline::reconcile::PageRecord;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Identity of one input document within a run.
///
/// The path relative to the input directory, which is unique within a run
/// and stable across reruns.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(input_dir: &Path, path: &Path) -> Self {
        let rel = path.strip_prefix(input_dir).unwrap_or(path);
        Self(rel.to_string_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Outcome of one document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub id: DocumentId,
    pub path: PathBuf,
    /// Pages in the PDF.
    pub total_pages: usize,
    /// Pages chosen by the page selection.
    pub selected_pages: usize,
    /// Selected pages that were attempted before the worker stopped.
    pub processed_pages: usize,
    pub vote_pages: usize,
    pub skipped_pages: usize,
    pub failed_pages: Vec<PageError>,
    /// Distinct votes written by this document.
    pub votes: BTreeSet<VoteId>,
    pub voices_created: usize,
    pub voices_updated: usize,
    pub voices_pruned: usize,
    /// Page transactions that needed a retry.
    pub retried_pages: usize,
    pub duration_ms: u64,
    /// Document-level failure that stopped the worker early.
    pub error: Option<String>,
}

impl DocumentReport {
    pub fn new(id: DocumentId, path: PathBuf) -> Self {
        Self {
            id,
            path,
            total_pages: 0,
            selected_pages: 0,
            processed_pages: 0,
            vote_pages: 0,
            skipped_pages: 0,
            failed_pages: Vec::new(),
            votes: BTreeSet::new(),
            voices_created: 0,
            voices_updated: 0,
            voices_pruned: 0,
            retried_pages: 0,
            duration_ms: 0,
            error: None,
        }
    }

    /// Fold a recorded vote page into the counters.
    pub fn absorb(&mut self, record: &PageRecord) {
        self.vote_pages += 1;
        self.votes.insert(record.vote);
        if record.attempts > 1 {
            self.retried_pages += 1;
        }
        if let Some(roster) = &record.roster {
            self.voices_created += roster.created;
            self.voices_updated += roster.updated;
            self.voices_pruned += roster.pruned;
        }
    }

    /// `true` when the whole document ran without a document-level error.
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Totals across a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub documents: usize,
    pub failed_documents: usize,
    pub total_pages: usize,
    pub processed_pages: usize,
    pub vote_pages: usize,
    pub skipped_pages: usize,
    pub failed_pages: usize,
    pub votes: usize,
    pub voices_created: usize,
    pub voices_updated: usize,
    pub voices_pruned: usize,
    pub duration_ms: u64,
}

impl IngestStats {
    pub fn from_reports(reports: &[DocumentReport], duration_ms: u64) -> Self {
        let mut votes = BTreeSet::new();
        let mut stats = IngestStats {
            documents: reports.len(),
            duration_ms,
            ..Default::default()
        };
        for r in reports {
            if !r.is_complete() {
                stats.failed_documents += 1;
            }
            stats.total_pages += r.total_pages;
            stats.processed_pages += r.processed_pages;
            stats.vote_pages += r.vote_pages;
            stats.skipped_pages += r.skipped_pages;
            stats.failed_pages += r.failed_pages.len();
            stats.voices_created += r.voices_created;
            stats.voices_updated += r.voices_updated;
            stats.voices_pruned += r.voices_pruned;
            votes.extend(r.votes.iter().copied());
        }
        stats.votes = votes.len();
        stats
    }
}

/// Result of [`crate::ingest_directory`].
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    /// One entry per discovered document, in discovery order.
    pub documents: Vec<DocumentReport>,
    pub stats: IngestStats,
}
