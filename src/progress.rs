//! Batch progress events.
//!
//! The orchestrator reports progress through an injected
//! `Arc<dyn BatchProgressCallback>` (see
//! [`crate::batch::BatchOrchestrator::with_progress`]). A callback trait,
//! rather than a channel, keeps the library agnostic about where events end
//! up: the CLI renders a terminal bar, an embedding application might push
//! them over a socket or into a job table.
//!
//! Events arrive at three granularities: the batch (once at each end), the
//! chunk (start, then success or failure), and the document (when its last
//! chunk settles and its output lands on disk). Chunk events fire from
//! whichever worker finishes, so chunk numbers will not arrive in order.
//!
//! # Example
//!
//! ```rust
//! use pdfmill::BatchProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CompletionCounter {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CompletionCounter {
//!     fn on_chunk_complete(&self, chunk_num: usize, total_chunks: usize, markdown_len: usize) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("chunk {chunk_num}/{total_chunks}: {markdown_len} bytes");
//!     }
//! }
//! ```

use std::sync::Arc;

/// Receiver for batch lifecycle events.
///
/// Every method defaults to a no-op; implement only the events you need.
/// The trait is `Send + Sync` because chunk events are delivered from a
/// concurrent pool — guard any shared mutable state accordingly
/// (atomics, `Mutex`).
pub trait BatchProgressCallback: Send + Sync {
    /// Fires once, after planning and budgeting, before the first chunk is
    /// dispatched. `workers == 0` signals the sequential fallback path.
    fn on_batch_start(&self, total_documents: usize, total_chunks: usize, workers: usize) {
        let _ = (total_documents, total_chunks, workers);
    }

    /// Fires as a chunk is handed to the engine. `chunk_num` is the
    /// 1-indexed position in the global dispatch order.
    fn on_chunk_start(&self, chunk_num: usize, total_chunks: usize) {
        let _ = (chunk_num, total_chunks);
    }

    /// Fires when a chunk's conversion succeeds.
    fn on_chunk_complete(&self, chunk_num: usize, total_chunks: usize, markdown_len: usize) {
        let _ = (chunk_num, total_chunks, markdown_len);
    }

    /// Fires when a chunk fails or times out.
    fn on_chunk_error(&self, chunk_num: usize, total_chunks: usize, error: &str) {
        let _ = (chunk_num, total_chunks, error);
    }

    /// Fires when a document's last chunk settles: either its merged output
    /// was written (`succeeded`) or its failure was recorded.
    fn on_document_complete(&self, document: &std::path::Path, succeeded: bool) {
        let _ = (document, succeeded);
    }

    /// Fires once, after every chunk has reached a terminal status.
    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let _ = (total_documents, success_count);
    }
}

/// Default receiver when no callback is configured: discards every event.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// The callback type as the orchestrator stores it.
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
