//! Result types for a batch run.
//!
//! A [`BatchRun`] is the aggregate of everything that happened in one
//! invocation: per-document reports with per-chunk detail, counts, timings,
//! and the final output location. It is created when the batch starts and
//! finalized — immutable from the caller's perspective — once every chunk
//! has reached a terminal status.
//!
//! All types serialize to JSON for the CLI's `--json` mode and for log
//! archiving.

use crate::error::{ChunkError, DocumentError};
use crate::pipeline::budget::WorkerBudget;
use crate::pipeline::splitter::PageRange;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Terminal status of one chunk conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkReport {
    /// Zero-based index within the parent document.
    pub chunk_index: usize,
    /// Page range this chunk covered.
    pub range: PageRange,
    /// Bytes of markdown produced (0 on failure).
    pub markdown_bytes: usize,
    /// Number of extracted assets.
    pub assets: usize,
    /// Wall-clock conversion time.
    pub duration_ms: u64,
    /// Present iff the chunk failed.
    pub error: Option<ChunkError>,
}

impl ChunkReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Terminal status of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Every chunk converted and the merged output was written.
    Succeeded,
    /// At least one chunk failed, or enumeration/splitting/merging failed.
    Failed,
    /// Nothing to convert (zero pages).
    Skipped,
}

/// Everything that happened to one input document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReport {
    /// Source path.
    pub path: PathBuf,
    pub page_count: usize,
    pub status: DocumentStatus,
    /// Per-chunk outcomes, in chunk-index order. Empty when the document
    /// never reached dispatch.
    pub chunks: Vec<ChunkReport>,
    /// Document-level failure reason, when `status == Failed`.
    pub error: Option<DocumentError>,
    /// Path of the merged markdown, when `status == Succeeded`.
    pub output_path: Option<PathBuf>,
}

/// Aggregate counters and timings for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_documents: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_chunks: usize,
    pub failed_chunks: usize,
    /// The worker budget the dispatch ran under, including which source
    /// produced it.
    pub budget: WorkerBudget,
    pub planning_duration_ms: u64,
    pub convert_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// The finalized record of one batch invocation.
///
/// A run with zero successes is still a *completed* run — fatal errors are
/// returned as `Err` from the orchestrator instead of being encoded here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRun {
    /// One report per input document, in enumeration order.
    pub documents: Vec<DocumentReport>,
    pub stats: BatchStats,
    /// Root of the written output tree.
    pub output_dir: PathBuf,
    /// Path of the created archive, when archiving was requested and
    /// succeeded.
    pub archive_path: Option<PathBuf>,
    /// Archive failure detail; the output tree itself remains valid.
    pub archive_error: Option<String>,
}

impl BatchRun {
    /// Iterator over failed documents with their failure reasons, for the
    /// end-of-run summary.
    pub fn failures(&self) -> impl Iterator<Item = (&PathBuf, String)> {
        self.documents
            .iter()
            .filter(|d| d.status == DocumentStatus::Failed)
            .map(|d| {
                let reason = d
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .or_else(|| {
                        d.chunks
                            .iter()
                            .find_map(|c| c.error.as_ref().map(|e| e.to_string()))
                    })
                    .unwrap_or_else(|| "unknown failure".to_string());
                (&d.path, reason)
            })
    }
}
