//! Error types for the rada-rollcall library.
//!
//! Failures come in three layers that match how far they reach:
//!
//! * [`IngestError`]: **Fatal** for one document (missing file, not a PDF,
//!   pdfium could not open it) or for the whole run (bad configuration, the
//!   database cannot be opened). A document-level error aborts only that
//!   document's worker; the rest of the batch carries on.
//!
//! * [`PageError`]: **Non-fatal**: one page did not match the report
//!   template or its store transaction failed. The page is rolled back and
//!   recorded in [`crate::report::DocumentReport::failed_pages`].
//!
//! * [`ParseError`]: the concrete template mismatch behind a
//!   [`PageError::Parse`].
//!
//! [`StoreError`] wraps the SQLite layer and knows which failures are write
//! conflicts worth retrying.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors for a document or the whole ingestion run.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The configured input directory does not exist or cannot be listed.
    #[error("Input directory '{path}' cannot be read: {source}")]
    InputDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A discovered document vanished or is not a regular file.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// pdfium refused to load the document.
    #[error("PDF '{path}' could not be loaded: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password")]
    PasswordRequired { path: PathBuf },

    /// The supplied password did not open the PDF.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Store errors ──────────────────────────────────────────────────────
    /// The record store could not be opened or migrated.
    #[error("Record store unavailable: {0}")]
    Store(#[from] StoreError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The run was interrupted before this document was finished.
    #[error("Ingestion cancelled")]
    Cancelled,

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (worker panic, runtime failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The page text does not follow the roll-call report template.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ParseError {
    #[error("no line ending in 'рада' (council title) found")]
    MissingCouncilTitle,

    #[error("no line with a dd.mm.yy session date found")]
    MissingSessionTitle,

    #[error("session title '{0}' has no valid dd.mm.yy date")]
    BadDateFormat(String),

    #[error("vote title markers not found")]
    MissingVoteTitle,

    #[error("unknown vote outcome '{text}' for deputy '{deputy}'")]
    UnknownVoiceResult { deputy: String, text: String },

    /// The table grid has a column count neither layout knows.
    #[error("unsupported roll-call table layout with {columns} columns")]
    UnsupportedTableLayout { columns: usize },

    /// A row carries an outcome but no name.
    #[error("table row {row} has an outcome but no deputy name")]
    MissingDeputyName { row: usize },
}

/// A non-fatal error for a single page.
///
/// Collected in [`crate::report::DocumentReport::failed_pages`]; the page's
/// transaction has been rolled back by the time this is produced.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Header or table did not match the template.
    #[error("Page {page}: {source}")]
    Parse {
        page: usize,
        #[source]
        source: ParseError,
    },

    /// pdfium could not produce text for the page.
    #[error("Page {page}: text extraction failed: {detail}")]
    TextExtraction { page: usize, detail: String },

    /// Store transaction failed after all retries.
    #[error("Page {page}: store failure after {attempts} attempt(s): {detail}")]
    Store {
        page: usize,
        attempts: u32,
        detail: String,
    },
}

impl PageError {
    /// 1-indexed page number the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::Parse { page, .. }
            | PageError::TextExtraction { page, .. }
            | PageError::Store { page, .. } => *page,
        }
    }
}

/// Errors from the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("I/O error preparing store: {0}")]
    Io(#[from] std::io::Error),

    /// A row that was just upserted could not be read back.
    #[error("{entity} '{key}' missing after upsert")]
    MissingAfterUpsert { entity: &'static str, key: String },

    /// A persisted enum code is outside the known range.
    #[error("invalid {entity} code {code} in store")]
    InvalidCode { entity: &'static str, code: i64 },

    /// `commit`/`rollback` without a matching `begin`.
    #[error("no open transaction")]
    NoTransaction,
}

impl StoreError {
    /// `true` when another writer held the database; the operation may be retried.
    pub fn is_conflict(&self) -> bool {
        match self {
            StoreError::Sql(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
