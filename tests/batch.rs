//! End-to-end batch tests over real (minimal) PDFs and a scripted engine.
//!
//! The engine stub reports the page count and first-page offset of every
//! file it is handed, which makes split boundaries and merge order directly
//! observable in the produced markdown.

use async_trait::async_trait;
use lopdf::{dictionary, Object};
use pdfmill::pipeline::engine::{ConversionEngine, ConversionRequest, EngineError, EngineOutput};
use pdfmill::pipeline::memory::NoAcceleratorProbe;
use pdfmill::{BatchConfig, BatchOrchestrator, BudgetKind, ChunkError, DocumentStatus};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Write a minimal PDF with `page_count` blank pages.
fn write_pdf(path: &Path, page_count: usize) {
    let mut doc = lopdf::Document::with_version("1.4");

    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(page_count);
    for _ in 0..page_count {
        let content_id = doc.add_object(lopdf::Stream::new(dictionary! {}, Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

/// Scripted engine: markdown is `chunk@<offset>:<pages>` so tests can see
/// exactly which pages each invocation received.
#[derive(Default)]
struct ScriptedEngine {
    /// Fail any request whose page offset is in this list.
    fail_offsets: Vec<usize>,
    /// Delay requests at these offsets, to force completion-order inversions.
    delay_offsets: Vec<usize>,
    /// Never return for requests at these offsets (timeout tests).
    hang_offsets: Vec<usize>,
    inflight: AtomicUsize,
    max_inflight: AtomicUsize,
}

impl ScriptedEngine {
    fn fail_at(mut self, offset: usize) -> Self {
        self.fail_offsets.push(offset);
        self
    }

    fn delay_at(mut self, offset: usize) -> Self {
        self.delay_offsets.push(offset);
        self
    }

    fn hang_at(mut self, offset: usize) -> Self {
        self.hang_offsets.push(offset);
        self
    }
}

#[async_trait]
impl ConversionEngine for ScriptedEngine {
    async fn convert(&self, request: &ConversionRequest) -> Result<EngineOutput, EngineError> {
        let now = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inflight.fetch_max(now, Ordering::SeqCst);

        if self.hang_offsets.contains(&request.page_offset) {
            tokio::time::sleep(Duration::from_secs(600)).await;
        }
        if self.delay_offsets.contains(&request.page_offset) {
            tokio::time::sleep(Duration::from_millis(150)).await;
        }

        let result = if self.fail_offsets.contains(&request.page_offset) {
            Err(EngineError::Failed {
                status: "exit status: 137".into(),
                stderr: "CUDA out of memory".into(),
            })
        } else {
            let pages = lopdf::Document::load(&request.input)
                .map(|d| d.get_pages().len())
                .map_err(|e| EngineError::OutputMissing {
                    detail: e.to_string(),
                })?;
            Ok(EngineOutput {
                markdown: format!("chunk@{}:{}\n", request.page_offset, pages),
                assets: vec![],
            })
        };

        self.inflight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn config() -> pdfmill::BatchConfigBuilder {
    BatchConfig::builder()
        .chunk_size(100)
        .min_pages_for_split(200)
        .create_archive(false)
}

fn orchestrator(config: BatchConfig, engine: ScriptedEngine) -> BatchOrchestrator {
    BatchOrchestrator::with_parts(config, Arc::new(engine), Arc::new(NoAcceleratorProbe)).unwrap()
}

#[tokio::test]
async fn small_document_is_dispatched_whole() {
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_pdf(&input.path().join("note.pdf"), 5);

    let run = orchestrator(config().workers(2).build().unwrap(), ScriptedEngine::default())
        .run(input.path(), out.path())
        .await
        .unwrap();

    assert_eq!(run.stats.total_documents, 1);
    assert_eq!(run.stats.succeeded, 1);
    // Below the split threshold: exactly one chunk, covering the whole file.
    assert_eq!(run.stats.total_chunks, 1);
    let merged = std::fs::read_to_string(out.path().join("note/note.md")).unwrap();
    assert_eq!(merged, "chunk@0:5\n");
}

#[tokio::test]
async fn large_document_splits_and_merges_in_page_order() {
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_pdf(&input.path().join("book.pdf"), 250);

    // Delay the first chunk so it finishes last.
    let engine = ScriptedEngine::default().delay_at(0);
    let run = orchestrator(config().workers(3).build().unwrap(), engine)
        .run(input.path(), out.path())
        .await
        .unwrap();

    assert_eq!(run.stats.total_chunks, 3);
    assert_eq!(run.stats.succeeded, 1);

    // Each chunk saw exactly its planned page count, and the merge is in
    // page order even though chunk 0 completed last.
    let merged = std::fs::read_to_string(out.path().join("book/book.md")).unwrap();
    assert_eq!(merged, "chunk@0:100\nchunk@100:100\nchunk@200:50\n");

    let report = &run.documents[0];
    assert_eq!(report.page_count, 250);
    assert_eq!(report.chunks.len(), 3);
    assert_eq!(report.chunks[2].range.start, 200);
    assert_eq!(report.chunks[2].range.end, 250);
}

#[tokio::test]
async fn failed_chunk_isolates_to_its_document() {
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_pdf(&input.path().join("big.pdf"), 250);
    write_pdf(&input.path().join("small.pdf"), 10);

    // The middle chunk of big.pdf (offset 100) fails.
    let engine = ScriptedEngine::default().fail_at(100);
    let run = orchestrator(config().workers(2).build().unwrap(), engine)
        .run(input.path(), out.path())
        .await
        .unwrap();

    assert_eq!(run.stats.succeeded, 1);
    assert_eq!(run.stats.failed, 1);
    assert_eq!(run.stats.failed_chunks, 1);

    let big = run
        .documents
        .iter()
        .find(|d| d.path.ends_with("big.pdf"))
        .unwrap();
    assert_eq!(big.status, DocumentStatus::Failed);
    assert!(big.output_path.is_none());
    // Surviving chunks of the failed document are still on disk.
    assert!(out.path().join("big/part_000.md").exists());
    assert!(out.path().join("big/part_002.md").exists());
    assert!(!out.path().join("big/part_001.md").exists());

    let small = run
        .documents
        .iter()
        .find(|d| d.path.ends_with("small.pdf"))
        .unwrap();
    assert_eq!(small.status, DocumentStatus::Succeeded);
    assert!(out.path().join("small/small.md").exists());
}

#[tokio::test]
async fn no_accelerator_falls_back_to_core_budget_and_completes() {
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_pdf(&input.path().join("doc.pdf"), 3);

    // No workers override: the memory budget runs against a probe that
    // reports no accelerator.
    let run = orchestrator(config().build().unwrap(), ScriptedEngine::default())
        .run(input.path(), out.path())
        .await
        .unwrap();

    assert_eq!(run.stats.budget.kind, BudgetKind::Cores);
    assert!(run.stats.budget.workers >= 1);
    assert_eq!(run.stats.succeeded, 1);
}

#[tokio::test]
async fn zero_worker_budget_runs_strictly_sequentially() {
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_pdf(&input.path().join("a.pdf"), 4);
    write_pdf(&input.path().join("b.pdf"), 4);
    write_pdf(&input.path().join("c.pdf"), 4);

    let engine = Arc::new(ScriptedEngine::default());
    let orch = BatchOrchestrator::with_parts(
        config().workers(0).build().unwrap(),
        Arc::clone(&engine) as Arc<dyn ConversionEngine>,
        Arc::new(NoAcceleratorProbe),
    )
    .unwrap();
    let run = orch.run(input.path(), out.path()).await.unwrap();

    assert_eq!(run.stats.succeeded, 3);
    assert_eq!(run.stats.budget.workers, 0);
    // Never more than one conversion in flight.
    assert_eq!(engine.max_inflight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stalled_chunk_times_out_without_stalling_the_batch() {
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    // The hang is keyed on page offset, so the stuck document must be one
    // that splits: its middle chunk (offset 100) never returns.
    write_pdf(&input.path().join("stuck.pdf"), 250);
    write_pdf(&input.path().join("fine.pdf"), 5);

    let engine = ScriptedEngine::default().hang_at(100);
    let run = orchestrator(
        config().workers(2).chunk_timeout_secs(1).build().unwrap(),
        engine,
    )
    .run(input.path(), out.path())
    .await
    .unwrap();

    assert_eq!(run.stats.succeeded, 1); // fine.pdf
    assert_eq!(run.stats.failed, 1); // stuck.pdf, via its hung chunk

    let stuck = run
        .documents
        .iter()
        .find(|d| d.path.ends_with("stuck.pdf"))
        .unwrap();
    let timed_out = stuck
        .chunks
        .iter()
        .find_map(|c| c.error.as_ref())
        .unwrap();
    assert!(matches!(timed_out, ChunkError::Timeout { secs: 1, .. }));
}

#[tokio::test]
async fn zero_page_document_is_skipped() {
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_pdf(&input.path().join("empty.pdf"), 0);
    write_pdf(&input.path().join("real.pdf"), 2);

    let run = orchestrator(config().workers(1).build().unwrap(), ScriptedEngine::default())
        .run(input.path(), out.path())
        .await
        .unwrap();

    assert_eq!(run.stats.skipped, 1);
    assert_eq!(run.stats.succeeded, 1);
    let empty = run
        .documents
        .iter()
        .find(|d| d.path.ends_with("empty.pdf"))
        .unwrap();
    assert_eq!(empty.status, DocumentStatus::Skipped);
    assert!(empty.chunks.is_empty());
}

#[tokio::test]
async fn archive_is_written_next_to_the_output_tree() {
    let input = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let out_dir = root.path().join("md");
    write_pdf(&input.path().join("paper.pdf"), 3);

    let run = orchestrator(
        config().workers(1).create_archive(true).build().unwrap(),
        ScriptedEngine::default(),
    )
    .run(input.path(), &out_dir)
    .await
    .unwrap();

    let zip_path = run.archive_path.unwrap();
    assert_eq!(zip_path, root.path().join("md.zip"));
    assert!(run.archive_error.is_none());

    let mut zip = zip::ZipArchive::new(std::fs::File::open(&zip_path).unwrap()).unwrap();
    assert!(zip.by_name("paper/paper.md").is_ok());
}

#[tokio::test]
async fn unreadable_file_fails_alone() {
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    std::fs::write(input.path().join("corrupt.pdf"), b"%PDF-not really").unwrap();
    write_pdf(&input.path().join("good.pdf"), 2);

    let run = orchestrator(config().workers(1).build().unwrap(), ScriptedEngine::default())
        .run(input.path(), out.path())
        .await
        .unwrap();

    assert_eq!(run.stats.total_documents, 2);
    assert_eq!(run.stats.succeeded, 1);
    assert_eq!(run.stats.failed, 1);
    let failures: Vec<_> = run.failures().collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].0.ends_with("corrupt.pdf"));
}
