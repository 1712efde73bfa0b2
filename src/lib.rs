//! # pdfmill
//!
//! Batch-convert PDF documents to Markdown under a bounded accelerator
//! memory budget.
//!
//! ## Why this crate?
//!
//! ML-based PDF converters produce excellent Markdown but hold multiple
//! gigabytes of accelerator memory per invocation. Running a large batch
//! naively either serialises everything (slow) or oversubscribes the device
//! (workers die with allocation failures). This crate plans the batch first
//! — splitting oversized documents into bounded chunks and sizing a worker
//! pool from a live memory snapshot — then dispatches chunks concurrently
//! and reassembles each document's Markdown in page order regardless of
//! completion order.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input tree
//!  │
//!  ├─ 1. Scan      enumerate PDFs, read page counts (lopdf)
//!  ├─ 2. Split     plan page ranges; materialize sub-files for large docs
//!  ├─ 3. Budget    workers = ⌊available × margin / per-worker peak⌋
//!  ├─ 4. Convert   marker subprocess per chunk, bounded concurrency
//!  ├─ 5. Merge     reassemble chunks per document, in page order
//!  └─ 6. Archive   optional zip of the output tree
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfmill::{BatchConfig, BatchOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BatchConfig::builder()
//!         .chunk_size(100)
//!         .safety_margin(0.8)
//!         .build()?;
//!     let run = BatchOrchestrator::new(config)?
//!         .run("papers/".as_ref(), "markdown/".as_ref())
//!         .await?;
//!     println!(
//!         "{}/{} documents converted",
//!         run.stats.succeeded, run.stats.total_documents
//!     );
//!     for (path, reason) in run.failures() {
//!         eprintln!("failed: {}: {reason}", path.display());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfmill` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdfmill = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::BatchOrchestrator;
pub use config::{BatchConfig, BatchConfigBuilder};
pub use error::{ChunkError, DocumentError, PdfmillError};
pub use output::{BatchRun, BatchStats, ChunkReport, DocumentReport, DocumentStatus};
pub use pipeline::budget::{BudgetKind, BudgetSource, UsageForecast, WorkerBudget};
pub use pipeline::engine::{ConversionEngine, ConversionRequest, EngineError, EngineOutput};
pub use pipeline::memory::{MemoryProbe, MemorySnapshot, NoAcceleratorProbe, NvmlProbe};
pub use pipeline::splitter::{PageRange, Splitter};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
