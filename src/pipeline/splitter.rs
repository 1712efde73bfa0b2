//! Document splitting: partition oversized PDFs into bounded page-range chunks.
//!
//! Planning and materialization are deliberately separate operations.
//! [`Splitter::plan`] is pure arithmetic over a page count — no I/O — so the
//! orchestrator (and the CLI's dry-run mode) can cost a batch without
//! touching any file. [`materialize`] produces the actual sub-PDF bytes for
//! one range, and only runs for documents that plan to more than one chunk.
//!
//! ## Why spawn_blocking?
//!
//! lopdf parses and rewrites the whole document synchronously; for a
//! several-hundred-page PDF that is tens of milliseconds of CPU-bound work.
//! `tokio::task::spawn_blocking` keeps it off the async workers.

use crate::error::{DocumentError, PdfmillError};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A half-open, zero-based page range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    /// Number of pages covered by the range.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Chunk-size policy: decides whether and how a document is partitioned.
#[derive(Debug, Clone, Copy)]
pub struct Splitter {
    chunk_size: usize,
    min_pages_for_split: usize,
}

impl Splitter {
    /// Create a splitter.
    ///
    /// # Errors
    /// [`PdfmillError::InvalidConfig`] if `chunk_size == 0`. A zero chunk
    /// size is never clamped — silently "fixing" it would hide a caller bug
    /// behind an unbounded range.
    pub fn new(chunk_size: usize, min_pages_for_split: usize) -> Result<Self, PdfmillError> {
        if chunk_size == 0 {
            return Err(PdfmillError::InvalidConfig(
                "chunk_size must be > 0".into(),
            ));
        }
        Ok(Self {
            chunk_size,
            min_pages_for_split,
        })
    }

    /// Partition `[0, page_count)` into ordered, contiguous ranges.
    ///
    /// * `page_count == 0` → empty plan.
    /// * `page_count < min_pages_for_split` → a single range covering the
    ///   whole document (no physical split).
    /// * otherwise → `ceil(page_count / chunk_size)` ranges of length
    ///   `chunk_size`, the final one truncated to the remainder.
    pub fn plan(&self, page_count: usize) -> Vec<PageRange> {
        if page_count == 0 {
            return Vec::new();
        }
        if page_count < self.min_pages_for_split {
            return vec![PageRange {
                start: 0,
                end: page_count,
            }];
        }

        let mut ranges = Vec::with_capacity(page_count.div_ceil(self.chunk_size));
        let mut start = 0;
        while start < page_count {
            let end = (start + self.chunk_size).min(page_count);
            ranges.push(PageRange { start, end });
            start = end;
        }
        ranges
    }
}

/// Write a standalone sub-PDF containing exactly the pages in `range`.
///
/// The produced file is transient: the orchestrator deletes it once the
/// chunk's result has been merged (unless `keep_chunks` is set).
pub async fn materialize(
    source: &Path,
    range: PageRange,
    dest: &Path,
) -> Result<PathBuf, DocumentError> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || materialize_blocking(&source, range, &dest))
        .await
        .map_err(|e| DocumentError::SplitFailed {
            start: range.start,
            end: range.end,
            detail: format!("split task panicked: {e}"),
        })?
}

fn materialize_blocking(
    source: &Path,
    range: PageRange,
    dest: &Path,
) -> Result<PathBuf, DocumentError> {
    let split_err = |detail: String| DocumentError::SplitFailed {
        start: range.start,
        end: range.end,
        detail,
    };

    let mut doc = lopdf::Document::load(source).map_err(|e| split_err(e.to_string()))?;

    // lopdf numbers pages from 1; the range is zero-based half-open.
    let delete: Vec<u32> = doc
        .get_pages()
        .keys()
        .copied()
        .filter(|&p| {
            let idx = (p as usize).saturating_sub(1);
            idx < range.start || idx >= range.end
        })
        .collect();

    doc.delete_pages(&delete);
    doc.prune_objects();
    doc.save(dest).map_err(|e| split_err(e.to_string()))?;

    debug!(
        "materialized pages [{}, {}) of {} → {}",
        range.start,
        range.end,
        source.display(),
        dest.display()
    );
    Ok(dest.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(chunk: usize, min: usize) -> Splitter {
        Splitter::new(chunk, min).unwrap()
    }

    #[test]
    fn zero_chunk_size_is_invalid_config() {
        let err = Splitter::new(0, 200).unwrap_err();
        assert!(matches!(err, PdfmillError::InvalidConfig(_)));
    }

    #[test]
    fn zero_pages_yields_empty_plan() {
        assert!(splitter(100, 200).plan(0).is_empty());
        // Even a degenerate threshold short-circuits before splitting.
        assert!(splitter(1, 0).plan(0).is_empty());
    }

    #[test]
    fn below_threshold_is_a_single_whole_range() {
        let plan = splitter(100, 200).plan(199);
        assert_eq!(plan, vec![PageRange { start: 0, end: 199 }]);
    }

    #[test]
    fn at_threshold_splits() {
        let plan = splitter(100, 200).plan(200);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0], PageRange { start: 0, end: 100 });
        assert_eq!(plan[1], PageRange { start: 100, end: 200 });
    }

    #[test]
    fn ranges_are_contiguous_and_cover_the_document() {
        for pages in [200, 201, 250, 999, 1000] {
            let plan = splitter(100, 200).plan(pages);
            assert_eq!(plan.len(), pages.div_ceil(100));
            assert_eq!(plan[0].start, 0);
            assert_eq!(plan.last().unwrap().end, pages);
            for pair in plan.windows(2) {
                assert_eq!(pair[0].end, pair[1].start, "gap or overlap at {pair:?}");
            }
            for r in &plan {
                assert!(!r.is_empty());
                assert!(r.len() <= 100);
            }
        }
    }

    #[test]
    fn two_hundred_fifty_pages_plan_to_three_chunks() {
        let plan = splitter(100, 200).plan(250);
        assert_eq!(
            plan,
            vec![
                PageRange { start: 0, end: 100 },
                PageRange { start: 100, end: 200 },
                PageRange { start: 200, end: 250 },
            ]
        );
    }
}
