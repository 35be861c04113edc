//! Input discovery: find the PDFs of a run and check each is really a PDF.
//!
//! pdfium reports a non-PDF as a generic load failure, so the `%PDF` magic
//! bytes are checked first to give callers a meaningful error.

use crate::error::IngestError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `*.pdf` files directly inside `dir` (extension case-insensitive), sorted
/// by path.
pub fn discover_documents(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let unreadable = |source| IngestError::InputDirUnreadable {
        path: dir.to_path_buf(),
        source,
    };

    let mut documents = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        if is_pdf && path.is_file() {
            documents.push(path);
        }
    }
    documents.sort();
    debug!("Discovered {} PDF(s) in {}", documents.len(), dir.display());
    Ok(documents)
}

/// Validate existence, read permission and PDF magic bytes.
pub fn validate_pdf(path: &Path) -> Result<(), IngestError> {
    if !path.exists() {
        return Err(IngestError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    match std::fs::File::open(path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
                return Err(IngestError::NotAPdf {
                    path: path.to_path_buf(),
                    magic,
                });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(IngestError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(IngestError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_only_pdfs_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.pdf", "a.PDF", "notes.txt", "c.pdf.bak"] {
            std::fs::write(dir.path().join(name), b"%PDF-1.4").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.pdf")).unwrap();

        let found: Vec<_> = discover_documents(dir.path())
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(found, vec!["a.PDF", "b.pdf"]);
    }

    #[test]
    fn missing_dir_is_unreadable() {
        let err = discover_documents(Path::new("/nonexistent/rollcall/pdfs")).unwrap_err();
        assert!(matches!(err, IngestError::InputDirUnreadable { .. }));
    }

    #[test]
    fn rejects_non_pdf_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"<html>").unwrap();
        assert!(matches!(
            validate_pdf(&path),
            Err(IngestError::NotAPdf { magic, .. }) if &magic == b"<htm"
        ));
    }

    #[test]
    fn rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pdf");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(validate_pdf(&path), Err(IngestError::NotAPdf { .. })));
    }

    #[test]
    fn accepts_pdf_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.pdf");
        std::fs::write(&path, b"%PDF-1.7\n").unwrap();
        assert!(validate_pdf(&path).is_ok());
        assert!(matches!(
            validate_pdf(&dir.path().join("gone.pdf")),
            Err(IngestError::FileNotFound { .. })
        ));
    }
}
