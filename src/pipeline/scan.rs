//! Input enumeration: turn a file or directory into a list of [`Document`]s.
//!
//! Documents are immutable once enumerated: identity, page count, byte size,
//! and language hint are all fixed here so the splitter and orchestrator
//! never re-read metadata. Enumeration order is the sorted path order, which
//! makes the global chunk list (and therefore dispatch order) deterministic
//! across runs.

use crate::error::{DocumentError, PdfmillError};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One input PDF, as discovered during planning.
#[derive(Debug, Clone)]
pub struct Document {
    /// Index into the batch's document list; stable for the whole run.
    pub id: usize,
    /// Source path.
    pub path: PathBuf,
    /// Page count, read once at scan time.
    pub page_count: usize,
    /// File size in bytes.
    pub file_bytes: u64,
    /// Language hint forwarded to the conversion engine.
    pub langs: String,
}

impl Document {
    /// Directory/file stem used for this document in the output tree.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("document-{}", self.id))
    }
}

/// Enumerate the PDFs under `root` (a single file or a directory, searched
/// recursively), reading each document's page count.
///
/// Unreadable PDFs do not abort the scan — they are returned separately so
/// the orchestrator can record them as failed documents and keep going.
///
/// # Errors
/// Fatal only when the root itself is missing or unreadable.
pub async fn scan_documents(
    root: &Path,
    langs: &str,
    max_files: Option<usize>,
) -> Result<(Vec<Document>, Vec<(PathBuf, DocumentError)>), PdfmillError> {
    let mut paths = list_pdfs(root)?;
    if let Some(cap) = max_files {
        paths.truncate(cap);
    }
    debug!("scan: {} candidate PDFs under {}", paths.len(), root.display());

    let langs = langs.to_string();
    tokio::task::spawn_blocking(move || read_documents(paths, &langs))
        .await
        .map_err(|e| PdfmillError::Internal(format!("scan task panicked: {e}")))
}

fn list_pdfs(root: &Path) -> Result<Vec<PathBuf>, PdfmillError> {
    let meta = std::fs::metadata(root).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => PdfmillError::PermissionDenied {
            path: root.to_path_buf(),
        },
        _ => PdfmillError::InputNotFound {
            path: root.to_path_buf(),
        },
    })?;

    if meta.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) => {
                warn!("skipping unreadable directory {}: {e}", dir.display());
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if is_pdf(&path) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

fn read_documents(
    paths: Vec<PathBuf>,
    langs: &str,
) -> (Vec<Document>, Vec<(PathBuf, DocumentError)>) {
    let mut documents = Vec::with_capacity(paths.len());
    let mut failures = Vec::new();

    for path in paths {
        match read_one(&path, langs, documents.len()) {
            Ok(doc) => documents.push(doc),
            Err(err) => {
                warn!("cannot enumerate {}: {err}", path.display());
                failures.push((path, err));
            }
        }
    }
    (documents, failures)
}

fn read_one(path: &Path, langs: &str, id: usize) -> Result<Document, DocumentError> {
    let file_bytes = std::fs::metadata(path)
        .map_err(|e| DocumentError::Unreadable {
            detail: format!("stat: {e}"),
        })?
        .len();

    let doc = lopdf::Document::load(path).map_err(|e| DocumentError::Unreadable {
        detail: format!("parse: {e}"),
    })?;
    let page_count = doc.get_pages().len();

    Ok(Document {
        id,
        path: path.to_path_buf(),
        page_count,
        file_bytes,
        langs: langs.to_string(),
    })
}
