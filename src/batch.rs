//! Batch orchestration: the top-level loop that plans, dispatches, and
//! finalizes a run.
//!
//! The orchestrator composes every pipeline stage but owns none of their
//! policy: splitting is the splitter's, the worker count is the budget
//! source's, conversion is the engine's. What it does own is the lifecycle —
//! planning happens entirely before dispatch, the budget is computed exactly
//! once per batch, and a run always drains to a terminal [`BatchRun`] unless
//! a fatal setup error occurs first.
//!
//! Failure policy: once dispatch begins, individual chunk and document
//! failures are recorded and the batch keeps going. A run with zero
//! successes is still a completed run.

use crate::config::BatchConfig;
use crate::error::{ChunkError, DocumentError, PdfmillError};
use crate::output::{BatchRun, BatchStats, DocumentReport, DocumentStatus};
use crate::pipeline::aggregate::{Aggregator, ChunkOutcome};
use crate::pipeline::archive::archive_tree;
use crate::pipeline::budget::{BudgetSource, FixedBudget, MemoryBudget, WorkerBudget};
use crate::pipeline::engine::{ConversionEngine, ConversionRequest, MarkerEngine};
use crate::pipeline::memory::{MemoryProbe, NvmlProbe};
use crate::pipeline::scan::{scan_documents, Document};
use crate::pipeline::splitter::{materialize, PageRange, Splitter};
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// One dispatchable unit: a chunk (or whole document) ready for the engine.
struct WorkItem {
    doc_id: usize,
    chunk_index: usize,
    /// 1-indexed position in the global dispatch order, for progress events.
    chunk_num: usize,
    range: PageRange,
    input: PathBuf,
    langs: String,
}

/// Where materialized chunk files live for the duration of a run.
enum ChunkRoot {
    /// Deleted when the run ends.
    Transient(TempDir),
    /// Kept under the output tree.
    Kept(PathBuf),
}

impl ChunkRoot {
    fn path(&self) -> &Path {
        match self {
            ChunkRoot::Transient(dir) => dir.path(),
            ChunkRoot::Kept(path) => path,
        }
    }
}

/// Runs batches of PDF-to-Markdown conversions.
///
/// # Example
/// ```rust,no_run
/// use pdfmill::{BatchConfig, BatchOrchestrator};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = BatchConfig::builder().chunk_size(100).build()?;
///     let orchestrator = BatchOrchestrator::new(config)?;
///     let run = orchestrator.run("input/".as_ref(), "output/".as_ref()).await?;
///     println!("{} of {} documents converted", run.stats.succeeded, run.stats.total_documents);
///     Ok(())
/// }
/// ```
pub struct BatchOrchestrator {
    config: BatchConfig,
    engine: Arc<dyn ConversionEngine>,
    probe: Arc<dyn MemoryProbe>,
    progress: Option<ProgressCallback>,
}

impl BatchOrchestrator {
    /// Create an orchestrator with the default collaborators: the marker
    /// subprocess engine and the NVML memory probe.
    ///
    /// # Errors
    /// [`PdfmillError::InvalidConfig`] for a bad config;
    /// [`PdfmillError::Internal`] if the engine's work directory cannot be
    /// created.
    pub fn new(config: BatchConfig) -> Result<Self, PdfmillError> {
        config.validate()?;
        let engine = MarkerEngine::new(&config.marker_bin, config.batch_multiplier)
            .map_err(|e| PdfmillError::Internal(e.to_string()))?;
        Ok(Self {
            config,
            engine: Arc::new(engine),
            probe: Arc::new(NvmlProbe::new()),
            progress: None,
        })
    }

    /// Create an orchestrator with injected collaborators. This is the seam
    /// for tests and for embedding alternative engines.
    pub fn with_parts(
        config: BatchConfig,
        engine: Arc<dyn ConversionEngine>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Result<Self, PdfmillError> {
        config.validate()?;
        Ok(Self {
            config,
            engine,
            probe,
            progress: None,
        })
    }

    /// Attach a progress callback.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Convert every PDF under `input` into markdown under `out_dir`.
    ///
    /// # Errors
    /// Fatal errors only: missing input root, unwritable output directory,
    /// or an invalid budget parameter. Per-document and per-chunk failures
    /// are recorded in the returned [`BatchRun`] instead.
    pub async fn run(&self, input: &Path, out_dir: &Path) -> Result<BatchRun, PdfmillError> {
        let run_start = Instant::now();

        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| PdfmillError::OutputWriteFailed {
                path: out_dir.to_path_buf(),
                source: e,
            })?;

        if self.config.release_cache {
            self.probe.release_cache();
        }

        // ── Planning ──────────────────────────────────────────────────────
        let (documents, scan_failures) =
            scan_documents(input, &self.config.langs, self.config.max_files).await?;
        info!(
            "planning: {} documents, {} unreadable",
            documents.len(),
            scan_failures.len()
        );

        let splitter = Splitter::new(self.config.chunk_size, self.config.min_pages_for_split)?;
        let chunk_root = if self.config.keep_chunks {
            let path = out_dir.join("chunks");
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| PdfmillError::OutputWriteFailed {
                    path: path.clone(),
                    source: e,
                })?;
            ChunkRoot::Kept(path)
        } else {
            ChunkRoot::Transient(TempDir::new().map_err(|e| {
                PdfmillError::Internal(format!("chunk staging dir: {e}"))
            })?)
        };

        let mut aggregator = Aggregator::new(out_dir);
        // Reports indexed by document id; planning-stage failures and skips
        // are final here, converted documents are filled in during dispatch.
        let mut reports: Vec<Option<DocumentReport>> = (0..documents.len()).map(|_| None).collect();
        let mut items: Vec<WorkItem> = Vec::new();

        for doc in &documents {
            let plan = splitter.plan(doc.page_count);
            if plan.is_empty() {
                debug!("skipping {} (zero pages)", doc.path.display());
                reports[doc.id] = Some(skipped_report(doc));
                continue;
            }
            match self
                .stage_document(doc, &plan, chunk_root.path(), items.len())
                .await
            {
                Ok(mut staged) => {
                    aggregator.register(doc, staged.len());
                    items.append(&mut staged);
                }
                Err(err) => {
                    warn!("cannot stage {}: {err}", doc.path.display());
                    reports[doc.id] = Some(failed_report(doc, err));
                }
            }
        }
        let total_chunks = items.len();
        let planning_duration = run_start.elapsed();

        // ── Budget ────────────────────────────────────────────────────────
        // Computed once per batch; mid-batch memory changes do not resize
        // the pool.
        let budget = self.compute_budget()?;
        info!(
            "budget: {} workers ({:?}) for {} chunks",
            budget.workers, budget.kind, total_chunks
        );
        if let Some(cb) = &self.progress {
            cb.on_batch_start(documents.len(), total_chunks, budget.workers);
        }

        // ── Dispatch and drain ────────────────────────────────────────────
        let convert_start = Instant::now();
        self.dispatch(items, total_chunks, budget.workers, &mut aggregator, &mut reports)
            .await;
        let convert_duration = convert_start.elapsed();

        if self.config.release_cache {
            self.probe.release_cache();
        }

        // ── Finalize ──────────────────────────────────────────────────────
        let mut documents_out: Vec<DocumentReport> = reports
            .into_iter()
            .map(|r| r.expect("every planned document reaches a terminal report"))
            .collect();
        for (path, err) in scan_failures {
            documents_out.push(DocumentReport {
                path,
                page_count: 0,
                status: DocumentStatus::Failed,
                chunks: Vec::new(),
                error: Some(err),
                output_path: None,
            });
        }

        let succeeded = count_status(&documents_out, DocumentStatus::Succeeded);
        let failed = count_status(&documents_out, DocumentStatus::Failed);
        let skipped = count_status(&documents_out, DocumentStatus::Skipped);
        let failed_chunks = documents_out
            .iter()
            .flat_map(|d| &d.chunks)
            .filter(|c| !c.succeeded())
            .count();

        let total_documents = documents_out.len();
        let mut run = BatchRun {
            documents: documents_out,
            stats: BatchStats {
                total_documents,
                succeeded,
                failed,
                skipped,
                total_chunks,
                failed_chunks,
                budget,
                planning_duration_ms: planning_duration.as_millis() as u64,
                convert_duration_ms: convert_duration.as_millis() as u64,
                total_duration_ms: run_start.elapsed().as_millis() as u64,
            },
            output_dir: out_dir.to_path_buf(),
            archive_path: None,
            archive_error: None,
        };

        if self.config.create_archive {
            let zip_path = archive_path_for(out_dir);
            match archive_tree(out_dir, &zip_path).await {
                Ok(()) => run.archive_path = Some(zip_path),
                Err(e) => {
                    // The output tree is already complete; record and move on.
                    warn!("{e}");
                    run.archive_error = Some(e.to_string());
                }
            }
        }

        if let Some(cb) = &self.progress {
            cb.on_batch_complete(run.stats.total_documents, run.stats.succeeded);
        }
        info!(
            "batch complete: {}/{} documents in {} ms",
            run.stats.succeeded, run.stats.total_documents, run.stats.total_duration_ms
        );
        Ok(run)
    }

    /// Turn one document's plan into dispatchable work items, materializing
    /// sub-files only when the plan has more than one chunk.
    async fn stage_document(
        &self,
        doc: &Document,
        plan: &[PageRange],
        chunk_root: &Path,
        chunk_num_base: usize,
    ) -> Result<Vec<WorkItem>, DocumentError> {
        if plan.len() == 1 {
            // Below the split threshold: dispatch the original file as-is.
            return Ok(vec![WorkItem {
                doc_id: doc.id,
                chunk_index: 0,
                chunk_num: chunk_num_base + 1,
                range: plan[0],
                input: doc.path.clone(),
                langs: doc.langs.clone(),
            }]);
        }

        let stem = doc.stem();
        let doc_dir = chunk_root.join(format!("{}-{}", doc.id, stem));
        tokio::fs::create_dir_all(&doc_dir)
            .await
            .map_err(|e| DocumentError::SplitFailed {
                start: 0,
                end: doc.page_count,
                detail: format!("chunk dir: {e}"),
            })?;

        let mut staged = Vec::with_capacity(plan.len());
        for (chunk_index, &range) in plan.iter().enumerate() {
            let dest = doc_dir.join(format!("{stem}_part_{chunk_index:03}.pdf"));
            let input = materialize(&doc.path, range, &dest).await?;
            staged.push(WorkItem {
                doc_id: doc.id,
                chunk_index,
                chunk_num: chunk_num_base + chunk_index + 1,
                range,
                input,
                langs: doc.langs.clone(),
            });
        }
        Ok(staged)
    }

    fn compute_budget(&self) -> Result<WorkerBudget, PdfmillError> {
        let source: Box<dyn BudgetSource> = match self.config.workers {
            Some(n) => Box::new(FixedBudget(n)),
            None => Box::new(MemoryBudget::new(
                Arc::clone(&self.probe),
                self.config.per_worker_peak_mb,
                self.config.per_worker_avg_mb,
                self.config.safety_margin,
            )?),
        };
        Ok(source.budget())
    }

    /// Run every work item to a terminal outcome and feed the aggregator.
    ///
    /// `workers >= 1` uses a bounded concurrent pool; `workers == 0` is the
    /// strict sequential fallback with exactly one conversion in flight.
    async fn dispatch(
        &self,
        items: Vec<WorkItem>,
        total_chunks: usize,
        workers: usize,
        aggregator: &mut Aggregator,
        reports: &mut [Option<DocumentReport>],
    ) {
        let timeout = self.config.chunk_timeout_secs.map(Duration::from_secs);

        if workers == 0 {
            for item in items {
                let outcome = self.convert_one(item, total_chunks, timeout).await;
                self.settle(outcome, aggregator, reports).await;
            }
            return;
        }

        let mut completions = stream::iter(items.into_iter().map(|item| {
            self.convert_one(item, total_chunks, timeout)
        }))
        .buffer_unordered(workers);

        while let Some(outcome) = completions.next().await {
            self.settle(outcome, aggregator, reports).await;
        }
    }

    async fn settle(
        &self,
        outcome: ChunkOutcome,
        aggregator: &mut Aggregator,
        reports: &mut [Option<DocumentReport>],
    ) {
        let doc_id = outcome.doc_id;
        if let Some(report) = aggregator.accept(outcome).await {
            if let Some(cb) = &self.progress {
                cb.on_document_complete(&report.path, report.status == DocumentStatus::Succeeded);
            }
            reports[doc_id] = Some(report);
        }
    }

    /// Convert one chunk to a terminal [`ChunkOutcome`]; never fails the run.
    async fn convert_one(
        &self,
        item: WorkItem,
        total_chunks: usize,
        timeout: Option<Duration>,
    ) -> ChunkOutcome {
        if let Some(cb) = &self.progress {
            cb.on_chunk_start(item.chunk_num, total_chunks);
        }
        let request = ConversionRequest {
            input: item.input.clone(),
            langs: item.langs.clone(),
            page_offset: item.range.start,
        };
        let started = Instant::now();

        let converted = match timeout {
            // On timeout the engine future is dropped, which terminates the
            // subprocess via kill_on_drop.
            Some(limit) => match tokio::time::timeout(limit, self.engine.convert(&request)).await {
                Ok(result) => result.map_err(|e| ChunkError::EngineFailed {
                    chunk_index: item.chunk_index,
                    detail: e.to_string(),
                }),
                Err(_) => Err(ChunkError::Timeout {
                    chunk_index: item.chunk_index,
                    secs: limit.as_secs(),
                }),
            },
            None => self
                .engine
                .convert(&request)
                .await
                .map_err(|e| ChunkError::EngineFailed {
                    chunk_index: item.chunk_index,
                    detail: e.to_string(),
                }),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match converted {
            Ok(output) => {
                if let Some(cb) = &self.progress {
                    cb.on_chunk_complete(item.chunk_num, total_chunks, output.markdown.len());
                }
                ChunkOutcome {
                    doc_id: item.doc_id,
                    chunk_index: item.chunk_index,
                    range: item.range,
                    markdown: output.markdown,
                    assets: output.assets,
                    duration_ms,
                    error: None,
                }
            }
            Err(err) => {
                warn!("{} chunk {}: {err}", item.input.display(), item.chunk_index);
                if let Some(cb) = &self.progress {
                    cb.on_chunk_error(item.chunk_num, total_chunks, &err.to_string());
                }
                ChunkOutcome {
                    doc_id: item.doc_id,
                    chunk_index: item.chunk_index,
                    range: item.range,
                    markdown: String::new(),
                    assets: Vec::new(),
                    duration_ms,
                    error: Some(err),
                }
            }
        }
    }
}

fn skipped_report(doc: &Document) -> DocumentReport {
    DocumentReport {
        path: doc.path.clone(),
        page_count: doc.page_count,
        status: DocumentStatus::Skipped,
        chunks: Vec::new(),
        error: None,
        output_path: None,
    }
}

fn failed_report(doc: &Document, err: DocumentError) -> DocumentReport {
    DocumentReport {
        path: doc.path.clone(),
        page_count: doc.page_count,
        status: DocumentStatus::Failed,
        chunks: Vec::new(),
        error: Some(err),
        output_path: None,
    }
}

fn count_status(reports: &[DocumentReport], status: DocumentStatus) -> usize {
    reports.iter().filter(|r| r.status == status).count()
}

/// `<out_dir>.zip` next to the output directory, so the archive is never
/// inside the tree it captures.
fn archive_path_for(out_dir: &Path) -> PathBuf {
    let name = out_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    match out_dir.parent() {
        Some(parent) => parent.join(format!("{name}.zip")),
        None => PathBuf::from(format!("{name}.zip")),
    }
}
