//! Pipeline stages for batch PDF-to-Markdown conversion.
//!
//! Each submodule implements exactly one stage. Keeping stages separate
//! makes each independently testable and lets us swap implementations
//! (e.g. a different conversion engine or memory probe) without touching
//! the others.
//!
//! ## Data Flow
//!
//! ```text
//! scan ──▶ splitter ──▶ budget ──▶ engine ──▶ aggregate ──▶ archive
//! (enumerate) (chunk)   (workers)  (marker)   (reorder)     (zip)
//! ```
//!
//! 1. [`scan`]      — enumerate input PDFs and read their page counts
//! 2. [`splitter`]  — plan page ranges, then materialize chunk files; the
//!    lopdf work runs in `spawn_blocking`
//! 3. [`memory`]    — accelerator memory snapshots behind a probe trait
//! 4. [`budget`]    — turn a snapshot (or cores, or an override) into a
//!    worker count
//! 5. [`engine`]    — drive the external converter subprocess per chunk
//! 6. [`aggregate`] — reassemble out-of-order chunk results per document
//! 7. [`archive`]   — zip the finished output tree

pub mod aggregate;
pub mod archive;
pub mod budget;
pub mod engine;
pub mod memory;
pub mod scan;
pub mod splitter;
