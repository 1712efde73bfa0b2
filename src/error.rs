//! Error types for the pdfmill library.
//!
//! Three distinct error types reflect three distinct failure scopes:
//!
//! * [`PdfmillError`] — **Fatal**: the batch cannot start or finish at all
//!   (invalid configuration, unreadable input root, output tree cannot be
//!   written). Returned as `Err(PdfmillError)` from the top-level batch entry
//!   points. Configuration errors always surface before any work is
//!   dispatched.
//!
//! * [`ChunkError`] — **Non-fatal, per chunk**: one conversion call failed or
//!   timed out. Recorded in the chunk's result; sibling chunks and unrelated
//!   documents keep running.
//!
//! * [`DocumentError`] — **Non-fatal, per document**: the document could not
//!   be enumerated, split, or its completed chunks could not be merged.
//!   Recorded in the batch summary against that document only.
//!
//! The separation encodes the propagation policy: fail fast on caller
//! mistakes, but once work has begun, favour maximal completion of a large
//! batch over aborting it.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdfmill library.
///
/// Per-chunk and per-document failures use [`ChunkError`] and
/// [`DocumentError`] and are stored in the batch summary rather than
/// propagated here.
#[derive(Debug, Error)]
pub enum PdfmillError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// A caller-supplied parameter violates a stated constraint.
    /// Never partially applied: validation happens once, before planning.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Input errors ──────────────────────────────────────────────────────
    /// The input file or directory was not found at the given path.
    #[error("Input not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// Process does not have read permission on the input root.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write into the output directory.
    #[error("Failed to write output '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The archive collaborator failed. The output tree written so far
    /// remains valid.
    #[error("Failed to create archive '{path}': {detail}")]
    ArchiveFailed { path: PathBuf, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single chunk conversion.
///
/// Stored inside [`crate::output::ChunkReport`] when a chunk fails. The batch
/// continues; the document owning the chunk is marked failed in the summary.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ChunkError {
    /// The external conversion engine reported a failure for this chunk.
    #[error("Chunk {chunk_index}: conversion failed: {detail}")]
    EngineFailed { chunk_index: usize, detail: String },

    /// The conversion exceeded the configured per-chunk timeout and the
    /// worker was terminated.
    #[error("Chunk {chunk_index}: conversion timed out after {secs}s")]
    Timeout { chunk_index: usize, secs: u64 },
}

/// A non-fatal error scoped to one document.
///
/// Other documents in the same batch continue unaffected.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum DocumentError {
    /// The page count or metadata could not be read during planning.
    #[error("Document unreadable: {detail}")]
    Unreadable { detail: String },

    /// Materializing one of the document's page-range chunks failed.
    #[error("Splitting failed for pages [{start}, {end}): {detail}")]
    SplitFailed {
        start: usize,
        end: usize,
        detail: String,
    },

    /// At least one chunk conversion failed, so no merged output exists.
    #[error("{failed}/{total} chunks failed")]
    ChunksFailed { failed: usize, total: usize },

    /// Merging the document's completed chunks into the output tree failed.
    #[error("Aggregation failed: {detail}")]
    Aggregation { detail: String },
}
