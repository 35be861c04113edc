//! Page text source boundary.
//!
//! The pipeline never decodes PDF content streams itself. A
//! [`DocumentReader`] opens a document and hands the worker a [`PageSource`]
//! that yields each page's plain text and, for vote pages, its table as a
//! grid of cell strings. [`crate::pipeline::pdfium::PdfiumReader`] is the
//! production implementation; tests plug in readers that serve fixed pages.

use crate::error::{IngestError, PageError};
use std::path::Path;

/// A page's table as rows of cell text. Row 0 is the header row.
///
/// Rows are padded to a common width so every `(row, column)` inside
/// [`TableGrid::column_count`] is addressable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableGrid {
    rows: Vec<Vec<String>>,
}

impl TableGrid {
    pub fn new(mut rows: Vec<Vec<String>>) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        for row in &mut rows {
            row.resize(width, String::new());
        }
        Self { rows }
    }

    /// Build a grid from string slices; convenient for fixtures.
    pub fn from_rows<R, C>(rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self::new(
            rows.into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        )
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    /// Cell text, or `""` outside the grid.
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }
}

/// Per-document page access. Stateful: pages are read in increasing order.
pub trait PageSource {
    fn page_count(&self) -> usize;

    /// Plain text of page `index` (0-based).
    fn page_text(&mut self, index: usize) -> Result<String, PageError>;

    /// Table detected on page `index`, or `None` when the page has none.
    fn page_table(&mut self, index: usize) -> Result<Option<TableGrid>, PageError>;
}

/// Opens documents for a worker.
///
/// The reader drives `visit` with a [`PageSource`] borrowed from the open
/// document, so sources may hold references into library state that cannot
/// outlive the call.
pub trait DocumentReader: Send + Sync {
    fn read(
        &self,
        path: &Path,
        password: Option<&str>,
        visit: &mut dyn FnMut(&mut dyn PageSource) -> Result<(), IngestError>,
    ) -> Result<(), IngestError>;
}
