//! pdfium-backed [`DocumentReader`].
//!
//! pdfium blocks on I/O and parsing, so a reader is only ever driven from a
//! `spawn_blocking` worker. The library itself is initialised once per
//! process and never torn down: dropping a `Pdfium` destroys pdfium's global
//! state, which every concurrently open document depends on.

use crate::error::{IngestError, PageError};
use crate::pipeline::grid::{detect_table, TextBox};
use crate::pipeline::source::{DocumentReader, PageSource, TableGrid};
use once_cell::sync::OnceCell;
use pdfium_render::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

static PDFIUM: OnceCell<Pdfium> = OnceCell::new();

/// Reads documents through the pdfium C library.
///
/// The library is located via `PDFIUM_LIB_PATH`, then the working
/// directory, then the system library path.
#[derive(Clone, Copy)]
pub struct PdfiumReader {
    pdfium: &'static Pdfium,
}

impl PdfiumReader {
    /// Reader over the process-wide pdfium instance, binding the library on
    /// first use. Every reader shares that one instance.
    pub fn shared() -> Result<Self, IngestError> {
        let pdfium = PDFIUM.get_or_try_init(bind_pdfium)?;
        Ok(Self { pdfium })
    }
}

impl fmt::Debug for PdfiumReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfiumReader").finish_non_exhaustive()
    }
}

impl DocumentReader for PdfiumReader {
    fn read(
        &self,
        path: &Path,
        password: Option<&str>,
        visit: &mut dyn FnMut(&mut dyn PageSource) -> Result<(), IngestError>,
    ) -> Result<(), IngestError> {
        let document = self
            .pdfium
            .load_pdf_from_file(path, password)
            .map_err(|e| load_error(path, password, e))?;

        let mut pages = PdfiumPages { document: &document };
        info!(
            "PDF loaded: {} ({} pages)",
            path.display(),
            pages.page_count()
        );
        visit(&mut pages)
    }
}

fn bind_pdfium() -> Result<Pdfium, IngestError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(lib) if !lib.is_empty() => {
            debug!("Binding pdfium from PDFIUM_LIB_PATH={}", lib);
            Pdfium::bind_to_library(PathBuf::from(lib))
        }
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| IngestError::PdfiumBindingFailed(e.to_string()))?;
    info!("pdfium bound");
    Ok(Pdfium::new(bindings))
}

fn load_error(path: &Path, password: Option<&str>, e: PdfiumError) -> IngestError {
    let err_str = format!("{:?}", e);
    if err_str.contains("Password") || err_str.contains("password") {
        if password.is_some() {
            IngestError::WrongPassword {
                path: path.to_path_buf(),
            }
        } else {
            IngestError::PasswordRequired {
                path: path.to_path_buf(),
            }
        }
    } else {
        IngestError::CorruptPdf {
            path: path.to_path_buf(),
            detail: err_str,
        }
    }
}

struct PdfiumPages<'d, 'p> {
    document: &'d PdfDocument<'p>,
}

impl<'p> PdfiumPages<'_, 'p> {
    fn page(&self, index: usize) -> Result<PdfPage<'p>, PageError> {
        self.document
            .pages()
            .get(index as u16)
            .map_err(|e| PageError::TextExtraction {
                page: index + 1,
                detail: format!("{:?}", e),
            })
    }
}

impl PageSource for PdfiumPages<'_, '_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn page_text(&mut self, index: usize) -> Result<String, PageError> {
        let page = self.page(index)?;
        let text = page.text().map_err(|e| PageError::TextExtraction {
            page: index + 1,
            detail: format!("{:?}", e),
        })?;
        Ok(text.all())
    }

    fn page_table(&mut self, index: usize) -> Result<Option<TableGrid>, PageError> {
        let page = self.page(index)?;
        let text = page.text().map_err(|e| PageError::TextExtraction {
            page: index + 1,
            detail: format!("{:?}", e),
        })?;

        let boxes: Vec<TextBox> = text
            .segments()
            .iter()
            .map(|segment| {
                let bounds = segment.bounds();
                TextBox {
                    text: segment.text(),
                    left: bounds.left().value,
                    right: bounds.right().value,
                    top: bounds.top().value,
                    bottom: bounds.bottom().value,
                }
            })
            .collect();

        let grid = detect_table(boxes);
        match &grid {
            Some(g) => debug!(
                "Page {}: table {}x{}",
                index + 1,
                g.row_count(),
                g.column_count()
            ),
            None => debug!("Page {}: no table detected", index + 1),
        }
        Ok(grid)
    }
}
