//! Result aggregation: reassemble per-chunk outputs into per-document
//! markdown, independent of completion order.
//!
//! The aggregator keeps one index-keyed arena per document. Completions
//! arrive in whatever order the pool finishes them; each lands in its slot,
//! and a document is finalized only when its last chunk reaches a terminal
//! status. Using the chunk index as the key is what makes ordered output
//! fall out of unordered completion without any ordered concurrent queue.
//!
//! Merged output is the byte-for-byte concatenation of chunk markdowns in
//! chunk-index order. When a document has failed chunks, its surviving chunk
//! outputs are still written (as `part_NNN.md`) so completed work is not
//! discarded; the document is marked failed either way.

use crate::error::{ChunkError, DocumentError};
use crate::output::{ChunkReport, DocumentReport, DocumentStatus};
use crate::pipeline::scan::Document;
use crate::pipeline::splitter::PageRange;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Terminal result of one chunk conversion, as fed to the aggregator.
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub doc_id: usize,
    pub chunk_index: usize,
    pub range: PageRange,
    /// Produced markdown; empty on failure.
    pub markdown: String,
    /// Asset files to copy into the document's output directory.
    pub assets: Vec<PathBuf>,
    pub duration_ms: u64,
    pub error: Option<ChunkError>,
}

struct DocSlot {
    document: Document,
    /// Output name, fixed at registration so the tree layout depends only
    /// on planning order, never on completion order.
    name: String,
    results: Vec<Option<ChunkOutcome>>,
    remaining: usize,
}

/// Buffers out-of-order chunk completions and materializes each document's
/// output once all its chunks are terminal.
pub struct Aggregator {
    out_dir: PathBuf,
    slots: HashMap<usize, DocSlot>,
    used_names: HashSet<String>,
}

impl Aggregator {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            slots: HashMap::new(),
            used_names: HashSet::new(),
        }
    }

    /// Announce a document and its chunk count before any of its chunks are
    /// dispatched. The document's output name is assigned here, in
    /// registration order.
    pub fn register(&mut self, document: &Document, chunk_count: usize) {
        debug_assert!(chunk_count > 0, "zero-chunk documents are skipped upstream");
        let name = self.unique_name(&document.stem());
        self.slots.insert(
            document.id,
            DocSlot {
                document: document.clone(),
                name,
                results: (0..chunk_count).map(|_| None).collect(),
                remaining: chunk_count,
            },
        );
    }

    /// Record one terminal chunk outcome. Returns the finalized report when
    /// this was the document's last outstanding chunk.
    pub async fn accept(&mut self, outcome: ChunkOutcome) -> Option<DocumentReport> {
        let doc_id = outcome.doc_id;
        let slot = match self.slots.get_mut(&doc_id) {
            Some(s) => s,
            None => {
                warn!("outcome for unregistered document {doc_id}; dropped");
                return None;
            }
        };
        let idx = outcome.chunk_index;
        if idx >= slot.results.len() || slot.results[idx].is_some() {
            warn!("duplicate or out-of-range chunk {idx} for document {doc_id}; dropped");
            return None;
        }
        slot.results[idx] = Some(outcome);
        slot.remaining -= 1;
        if slot.remaining > 0 {
            return None;
        }

        let slot = self.slots.remove(&doc_id).expect("slot exists");
        Some(finalize(slot, &self.out_dir).await)
    }

    /// Disambiguate documents from different subdirectories that share a
    /// file stem.
    fn unique_name(&mut self, stem: &str) -> String {
        let mut name = stem.to_string();
        let mut n = 1;
        while !self.used_names.insert(name.clone()) {
            name = format!("{stem}-{n}");
            n += 1;
        }
        name
    }
}

async fn finalize(slot: DocSlot, out_dir: &Path) -> DocumentReport {
    let name = &slot.name;
    // All slots are filled by the time we get here.
    let outcomes: Vec<ChunkOutcome> = slot
        .results
        .into_iter()
        .map(|r| r.expect("all chunks terminal"))
        .collect();

    let chunks: Vec<ChunkReport> = outcomes
        .iter()
        .map(|o| ChunkReport {
            chunk_index: o.chunk_index,
            range: o.range,
            markdown_bytes: o.markdown.len(),
            assets: o.assets.len(),
            duration_ms: o.duration_ms,
            error: o.error.clone(),
        })
        .collect();
    let failed = chunks.iter().filter(|c| !c.succeeded()).count();

    let doc_dir = out_dir.join(name);
    let write_result = if failed == 0 {
        write_merged(&doc_dir, name, &outcomes).await
    } else {
        write_salvage(&doc_dir, &outcomes).await.map(|_| None)
    };

    let mut report = DocumentReport {
        path: slot.document.path.clone(),
        page_count: slot.document.page_count,
        status: DocumentStatus::Succeeded,
        chunks,
        error: None,
        output_path: None,
    };

    match write_result {
        Ok(output_path) => {
            report.output_path = output_path;
            if failed > 0 {
                report.status = DocumentStatus::Failed;
                report.error = Some(DocumentError::ChunksFailed {
                    failed,
                    total: report.chunks.len(),
                });
            } else {
                debug!("merged {} chunks → {}", report.chunks.len(), doc_dir.display());
            }
        }
        Err(e) => {
            warn!("aggregation failed for {}: {e}", slot.document.path.display());
            report.status = DocumentStatus::Failed;
            report.error = Some(DocumentError::Aggregation {
                detail: e.to_string(),
            });
        }
    }
    report
}

/// Write the merged markdown plus assets for a fully-successful document.
async fn write_merged(
    doc_dir: &Path,
    name: &str,
    outcomes: &[ChunkOutcome],
) -> std::io::Result<Option<PathBuf>> {
    tokio::fs::create_dir_all(doc_dir).await?;

    let mut merged = String::with_capacity(outcomes.iter().map(|o| o.markdown.len()).sum());
    for outcome in outcomes {
        merged.push_str(&outcome.markdown);
    }
    let md_path = doc_dir.join(format!("{name}.md"));
    tokio::fs::write(&md_path, &merged).await?;

    copy_assets(doc_dir, outcomes).await?;
    Ok(Some(md_path))
}

/// Write the surviving chunk outputs of a partially-failed document.
async fn write_salvage(doc_dir: &Path, outcomes: &[ChunkOutcome]) -> std::io::Result<()> {
    let survivors: Vec<&ChunkOutcome> = outcomes.iter().filter(|o| o.error.is_none()).collect();
    if survivors.is_empty() {
        return Ok(());
    }
    tokio::fs::create_dir_all(doc_dir).await?;
    for outcome in &survivors {
        let path = doc_dir.join(format!("part_{:03}.md", outcome.chunk_index));
        tokio::fs::write(&path, &outcome.markdown).await?;
    }
    copy_assets(doc_dir, outcomes).await
}

/// Copy extracted assets into `<doc_dir>/assets/` with document-local
/// numbering, in chunk-index order.
async fn copy_assets(doc_dir: &Path, outcomes: &[ChunkOutcome]) -> std::io::Result<()> {
    if outcomes.iter().all(|o| o.assets.is_empty()) {
        return Ok(());
    }
    let assets_dir = doc_dir.join("assets");
    tokio::fs::create_dir_all(&assets_dir).await?;

    let mut n = 0usize;
    for outcome in outcomes {
        if outcome.error.is_some() {
            continue;
        }
        for src in &outcome.assets {
            let ext = src
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("png");
            let dest = assets_dir.join(format!("image_{n:03}.{ext}"));
            tokio::fs::copy(src, &dest).await?;
            n += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(id: usize, name: &str, pages: usize) -> Document {
        Document {
            id,
            path: PathBuf::from(format!("{name}.pdf")),
            page_count: pages,
            file_bytes: 1024,
            langs: "English".into(),
        }
    }

    fn ok_outcome(doc_id: usize, chunk_index: usize, markdown: &str) -> ChunkOutcome {
        ChunkOutcome {
            doc_id,
            chunk_index,
            range: PageRange {
                start: chunk_index * 100,
                end: chunk_index * 100 + 100,
            },
            markdown: markdown.to_string(),
            assets: vec![],
            duration_ms: 5,
            error: None,
        }
    }

    fn failed_outcome(doc_id: usize, chunk_index: usize) -> ChunkOutcome {
        ChunkOutcome {
            markdown: String::new(),
            error: Some(ChunkError::EngineFailed {
                chunk_index,
                detail: "boom".into(),
            }),
            ..ok_outcome(doc_id, chunk_index, "")
        }
    }

    #[tokio::test]
    async fn merge_is_chunk_index_order_regardless_of_completion_order() {
        let out = tempfile::tempdir().unwrap();
        let mut agg = Aggregator::new(out.path());
        agg.register(&document(0, "book", 250), 3);

        // Force reversed completion order.
        assert!(agg.accept(ok_outcome(0, 2, "three\n")).await.is_none());
        assert!(agg.accept(ok_outcome(0, 1, "two\n")).await.is_none());
        let report = agg.accept(ok_outcome(0, 0, "one\n")).await.unwrap();

        assert_eq!(report.status, DocumentStatus::Succeeded);
        let md_path = report.output_path.unwrap();
        let merged = std::fs::read_to_string(&md_path).unwrap();
        assert_eq!(merged, "one\ntwo\nthree\n");
        // Chunk reports come back in index order too.
        let indices: Vec<_> = report.chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn failed_chunk_marks_document_failed_but_keeps_survivors() {
        let out = tempfile::tempdir().unwrap();
        let mut agg = Aggregator::new(out.path());
        agg.register(&document(0, "doc-a", 250), 3);

        agg.accept(ok_outcome(0, 0, "first\n")).await;
        agg.accept(failed_outcome(0, 1)).await;
        let report = agg.accept(ok_outcome(0, 2, "third\n")).await.unwrap();

        assert_eq!(report.status, DocumentStatus::Failed);
        assert!(matches!(
            report.error,
            Some(DocumentError::ChunksFailed {
                failed: 1,
                total: 3
            })
        ));
        assert!(report.output_path.is_none());

        // Surviving chunks were still written.
        let doc_dir = out.path().join("doc-a");
        assert!(doc_dir.join("part_000.md").exists());
        assert!(doc_dir.join("part_002.md").exists());
        assert!(!doc_dir.join("part_001.md").exists());
    }

    #[tokio::test]
    async fn documents_finalize_independently() {
        let out = tempfile::tempdir().unwrap();
        let mut agg = Aggregator::new(out.path());
        agg.register(&document(0, "a", 10), 1);
        agg.register(&document(1, "b", 10), 2);

        // Interleaved completion across documents.
        assert!(agg.accept(ok_outcome(1, 1, "b2\n")).await.is_none());
        let a = agg.accept(ok_outcome(0, 0, "a\n")).await.unwrap();
        assert_eq!(a.status, DocumentStatus::Succeeded);
        let b = agg.accept(ok_outcome(1, 0, "b1\n")).await.unwrap();
        assert_eq!(b.status, DocumentStatus::Succeeded);

        let b_md = std::fs::read_to_string(out.path().join("b").join("b.md")).unwrap();
        assert_eq!(b_md, "b1\nb2\n");
    }

    #[tokio::test]
    async fn assets_are_renumbered_per_document() {
        let out = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let a1 = staging.path().join("fig9.png");
        let a2 = staging.path().join("fig1.jpg");
        std::fs::write(&a1, b"one").unwrap();
        std::fs::write(&a2, b"two").unwrap();

        let mut agg = Aggregator::new(out.path());
        agg.register(&document(0, "doc", 250), 2);

        let mut first = ok_outcome(0, 0, "x\n");
        first.assets = vec![a1];
        let mut second = ok_outcome(0, 1, "y\n");
        second.assets = vec![a2];

        agg.accept(second).await;
        let report = agg.accept(first).await.unwrap();
        assert_eq!(report.status, DocumentStatus::Succeeded);

        let assets = out.path().join("doc").join("assets");
        // Chunk 0's asset numbers first, whatever the completion order was.
        assert_eq!(std::fs::read(assets.join("image_000.png")).unwrap(), b"one");
        assert_eq!(std::fs::read(assets.join("image_001.jpg")).unwrap(), b"two");
    }

    #[tokio::test]
    async fn stem_collisions_resolve_in_registration_order() {
        let out = tempfile::tempdir().unwrap();
        let mut agg = Aggregator::new(out.path());
        let mut doc_b = document(1, "report", 10);
        doc_b.path = PathBuf::from("sub/report.pdf");
        agg.register(&document(0, "report", 10), 1);
        agg.register(&doc_b, 1);

        // The later-registered document finishes first; it must still get
        // the suffixed name, so the tree layout is stable across runs.
        agg.accept(ok_outcome(1, 0, "second\n")).await.unwrap();
        agg.accept(ok_outcome(0, 0, "first\n")).await.unwrap();

        let plain = std::fs::read_to_string(out.path().join("report/report.md")).unwrap();
        assert_eq!(plain, "first\n");
        let suffixed =
            std::fs::read_to_string(out.path().join("report-1/report-1.md")).unwrap();
        assert_eq!(suffixed, "second\n");
    }
}
