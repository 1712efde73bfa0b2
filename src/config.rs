//! Configuration types for batch PDF-to-Markdown conversion.
//!
//! All batch behaviour is controlled through [`BatchConfig`], built via its
//! [`BatchConfigBuilder`]. Keeping every knob in one struct makes it trivial
//! to share configs across tasks, serialise them for logging, and diff two
//! runs to understand why their outputs differ.
//!
//! Validation happens exactly once, in [`BatchConfigBuilder::build`] — not
//! scattered through call sites. A config that builds is a config the
//! orchestrator will never reject mid-batch.

use crate::error::PdfmillError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a batch conversion run.
///
/// Built via [`BatchConfig::builder()`] or [`BatchConfig::default()`].
///
/// # Example
/// ```rust
/// use pdfmill::BatchConfig;
///
/// let config = BatchConfig::builder()
///     .chunk_size(100)
///     .min_pages_for_split(200)
///     .safety_margin(0.8)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Pages per chunk when splitting large documents. Must be > 0. Default: 100.
    ///
    /// Smaller chunks bound the engine's per-invocation working set more
    /// tightly but cost extra process startups; 100 pages keeps a typical
    /// marker invocation well inside a single worker's memory estimate.
    pub chunk_size: usize,

    /// Minimum page count before a document is physically split. Default: 200.
    ///
    /// Documents below this threshold are dispatched whole — the common case,
    /// which must stay O(1) with no splitting I/O.
    pub min_pages_for_split: usize,

    /// Estimated peak accelerator memory per concurrent worker, in megabytes.
    /// Must be > 0. Default: 3500.
    ///
    /// A configured constant rather than a per-document profile: the external
    /// engine's memory use is not predictable ahead of time, so the budget
    /// trades precision for a safe, explainable upper bound.
    pub per_worker_peak_mb: u64,

    /// Estimated average accelerator memory per worker, in megabytes.
    /// Used only for the usage forecast, never for admission. Default: 2200.
    pub per_worker_avg_mb: u64,

    /// Fraction of available accelerator memory the budget may plan against.
    /// Must be in (0, 1]. Default: 0.8.
    ///
    /// The headroom absorbs measurement staleness: another process can
    /// allocate between the probe read and the first worker spawn.
    pub safety_margin: f64,

    /// Explicit worker-count override. When set, the memory budget
    /// calculation is bypassed entirely. `Some(0)` forces the sequential
    /// fallback path. Default: None.
    pub workers: Option<usize>,

    /// Language hint passed through to the conversion engine. Default: "English".
    pub langs: String,

    /// Cap on the number of documents considered during planning.
    /// Default: None (no cap).
    pub max_files: Option<usize>,

    /// `--batch_multiplier` forwarded to the marker engine. The engine's own
    /// internal batching is assumed to be accounted for in
    /// [`per_worker_peak_mb`](Self::per_worker_peak_mb). Default: 2.
    pub batch_multiplier: u32,

    /// Per-chunk conversion timeout in seconds. A stalled worker is
    /// terminated and recorded as a failure for that chunk only.
    /// Default: None (no timeout).
    pub chunk_timeout_secs: Option<u64>,

    /// Create a zip archive of the output tree after the batch completes.
    /// Default: true.
    pub create_archive: bool,

    /// Keep materialized chunk sub-files after their results are merged.
    /// Default: false (chunk files are transient).
    pub keep_chunks: bool,

    /// Invoke the accelerator cache-release hint at batch boundaries.
    /// Never invoked while workers are active. Default: true.
    pub release_cache: bool,

    /// Path to the external marker binary. Default: "marker_single" (PATH lookup).
    pub marker_bin: PathBuf,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            min_pages_for_split: 200,
            per_worker_peak_mb: 3500,
            per_worker_avg_mb: 2200,
            safety_margin: 0.8,
            workers: None,
            langs: "English".to_string(),
            max_files: None,
            batch_multiplier: 2,
            chunk_timeout_secs: None,
            create_archive: true,
            keep_chunks: false,
            release_cache: true,
            marker_bin: PathBuf::from("marker_single"),
        }
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }

    /// Re-validate an already-constructed config.
    ///
    /// Entry points that accept a `BatchConfig` directly (rather than a
    /// builder) call this before planning, so a hand-mutated config still
    /// fails fast.
    pub fn validate(&self) -> Result<(), PdfmillError> {
        if self.chunk_size == 0 {
            return Err(PdfmillError::InvalidConfig(
                "chunk_size must be > 0 (a zero-size chunk would never cover the document)".into(),
            ));
        }
        if !(self.safety_margin > 0.0 && self.safety_margin <= 1.0) {
            return Err(PdfmillError::InvalidConfig(format!(
                "safety_margin must be in (0, 1], got {}",
                self.safety_margin
            )));
        }
        if self.per_worker_peak_mb == 0 {
            return Err(PdfmillError::InvalidConfig(
                "per_worker_peak_mb must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn chunk_size(mut self, pages: usize) -> Self {
        self.config.chunk_size = pages;
        self
    }

    pub fn min_pages_for_split(mut self, pages: usize) -> Self {
        self.config.min_pages_for_split = pages;
        self
    }

    pub fn per_worker_peak_mb(mut self, mb: u64) -> Self {
        self.config.per_worker_peak_mb = mb;
        self
    }

    pub fn per_worker_avg_mb(mut self, mb: u64) -> Self {
        self.config.per_worker_avg_mb = mb;
        self
    }

    pub fn safety_margin(mut self, fraction: f64) -> Self {
        self.config.safety_margin = fraction;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = Some(n);
        self
    }

    pub fn langs(mut self, langs: impl Into<String>) -> Self {
        self.config.langs = langs.into();
        self
    }

    pub fn max_files(mut self, n: usize) -> Self {
        self.config.max_files = Some(n);
        self
    }

    pub fn batch_multiplier(mut self, n: u32) -> Self {
        self.config.batch_multiplier = n;
        self
    }

    pub fn chunk_timeout_secs(mut self, secs: u64) -> Self {
        self.config.chunk_timeout_secs = Some(secs);
        self
    }

    pub fn create_archive(mut self, v: bool) -> Self {
        self.config.create_archive = v;
        self
    }

    pub fn keep_chunks(mut self, v: bool) -> Self {
        self.config.keep_chunks = v;
        self
    }

    pub fn release_cache(mut self, v: bool) -> Self {
        self.config.release_cache = v;
        self
    }

    pub fn marker_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.marker_bin = path.into();
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// # Errors
    /// [`PdfmillError::InvalidConfig`] if `chunk_size == 0`, if
    /// `safety_margin` is outside `(0, 1]`, or if `per_worker_peak_mb == 0`.
    pub fn build(self) -> Result<BatchConfig, PdfmillError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
