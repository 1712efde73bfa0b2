//! CLI binary for pdfmill.
//!
//! A thin shim over the library crate that maps CLI flags to `BatchConfig`
//! and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdfmill::pipeline::budget::{BudgetSource, FixedBudget, MemoryBudget};
use pdfmill::pipeline::scan::scan_documents;
use pdfmill::{
    BatchConfig, BatchOrchestrator, BatchProgressCallback, NvmlProbe, ProgressCallback, Splitter,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: renders a live progress bar and per-chunk log
/// lines using [indicatif]. Chunks complete out-of-order under the
/// concurrent pool; the bar only ever counts completions, so ordering does
/// not matter.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// The bar's length is set by `on_batch_start`, after planning has
    /// counted the chunks.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Planning");
        bar.set_message("Scanning input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} chunks  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize, total_chunks: usize, workers: usize) {
        self.activate_bar(total_chunks);
        let pool = if workers == 0 {
            "sequential".to_string()
        } else {
            format!("{workers} workers")
        };
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Converting {total_documents} documents ({total_chunks} chunks, {pool})…"
            ))
        ));
    }

    fn on_chunk_complete(&self, chunk_num: usize, total: usize, markdown_len: usize) {
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}",
            green("✓"),
            chunk_num,
            total,
            dim(&format!("{markdown_len:>6} bytes")),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_error(&self, chunk_num: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = truncate_chars(error, 80);
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}",
            red("✗"),
            chunk_num,
            total,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_document_complete(&self, document: &std::path::Path, succeeded: bool) {
        let mark = if succeeded { green("✔") } else { red("✘") };
        self.bar
            .println(format!("{mark} {}", bold(&document.display().to_string())));
    }

    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let failed = total_documents.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} documents converted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents converted  ({} failed or skipped)",
                if success_count == 0 { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_documents,
                red(&failed.to_string()),
            );
        }
    }
}

/// Cap a log line at `max` characters. Counts characters, not bytes, so
/// multibyte engine stderr (lossy-decoded replacement chars included) can
/// never split a UTF-8 sequence.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('\u{2026}');
        out
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert every PDF under a directory
  pdfmill papers/ -o markdown/

  # Single file
  pdfmill thesis.pdf -o out/

  # Explicit worker count (skip the memory budget)
  pdfmill papers/ -o out/ --workers 2

  # Force sequential conversion
  pdfmill papers/ -o out/ --workers 0

  # Plan only: show the chunk plan and worker budget, convert nothing
  pdfmill papers/ -o out/ --dry-run

  # Machine-readable summary
  pdfmill papers/ -o out/ --json > run.json

  # Aggressive chunking for very large scans, 10-minute chunk timeout
  pdfmill scans/ -o out/ --chunk-size 50 --min-pages-for-split 100 --chunk-timeout 600

WORKER BUDGET:
  Unless --workers is given, the worker count is derived from a live
  accelerator memory snapshot:

      workers = floor(available_mb × safety_margin / per_worker_peak_mb)

  A budget of 0 falls back to strict sequential conversion rather than
  aborting. Without an NVIDIA accelerator the budget uses the logical core
  count instead.

ENVIRONMENT VARIABLES:
  PDFMILL_OUTPUT         Output directory (same as -o)
  PDFMILL_WORKERS        Worker override (same as --workers)
  PDFMILL_LANGS          Language hint for the engine
  PDFMILL_MARKER_BIN     Path to the marker_single binary
  RUST_LOG               Tracing filter (overrides -v/-q)

SETUP:
  The conversion itself is done by the external `marker_single` command
  (pip install marker-pdf). It must be on PATH or named via --marker-bin.
"#;

/// Batch-convert PDF documents to Markdown under a bounded memory budget.
#[derive(Parser, Debug)]
#[command(
    name = "pdfmill",
    version,
    about = "Batch-convert PDF documents to Markdown under a bounded accelerator memory budget",
    long_about = "Convert a file or a whole directory tree of PDFs to Markdown. Large documents \
are split into page-range chunks, a worker pool is sized from available accelerator memory, and \
each document's Markdown is reassembled in page order however the chunks finish.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input PDF file or directory (searched recursively).
    input: PathBuf,

    /// Output directory for the converted Markdown tree.
    #[arg(short, long, env = "PDFMILL_OUTPUT", default_value = "pdfmill-out")]
    output: PathBuf,

    /// Pages per chunk when splitting large documents.
    #[arg(long, env = "PDFMILL_CHUNK_SIZE", default_value_t = 100)]
    chunk_size: usize,

    /// Minimum page count before a document is split.
    #[arg(long, env = "PDFMILL_MIN_PAGES_FOR_SPLIT", default_value_t = 200)]
    min_pages_for_split: usize,

    /// Explicit worker count; 0 forces sequential conversion.
    /// When unset, the count is derived from accelerator memory.
    #[arg(short, long, env = "PDFMILL_WORKERS")]
    workers: Option<usize>,

    /// Fraction of available accelerator memory to plan against (0–1].
    #[arg(long, env = "PDFMILL_SAFETY_MARGIN", default_value_t = 0.8)]
    safety_margin: f64,

    /// Estimated peak accelerator memory per worker, in MB.
    #[arg(long, env = "PDFMILL_PEAK_MB", default_value_t = 3500)]
    per_worker_peak_mb: u64,

    /// Language hint forwarded to the conversion engine.
    #[arg(long, env = "PDFMILL_LANGS", default_value = "English")]
    langs: String,

    /// Convert at most this many documents.
    #[arg(long, env = "PDFMILL_MAX_FILES")]
    max_files: Option<usize>,

    /// Per-chunk conversion timeout in seconds.
    #[arg(long, env = "PDFMILL_CHUNK_TIMEOUT")]
    chunk_timeout: Option<u64>,

    /// Engine batch multiplier (forwarded to marker).
    #[arg(long, env = "PDFMILL_BATCH_MULTIPLIER", default_value_t = 2)]
    batch_multiplier: u32,

    /// Path to the marker_single binary.
    #[arg(long, env = "PDFMILL_MARKER_BIN", default_value = "marker_single")]
    marker_bin: PathBuf,

    /// Skip creating the zip archive of the output tree.
    #[arg(long, env = "PDFMILL_NO_ZIP")]
    no_zip: bool,

    /// Keep materialized chunk PDFs under the output tree.
    #[arg(long, env = "PDFMILL_KEEP_CHUNKS")]
    keep_chunks: bool,

    /// Show the chunk plan and worker budget, then exit without converting.
    #[arg(long)]
    dry_run: bool,

    /// Print the run summary as JSON instead of human-readable text.
    #[arg(long, env = "PDFMILL_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "PDFMILL_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFMILL_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFMILL_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active; the
    // bar provides the feedback that matters.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.dry_run;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli).context("Invalid configuration")?;

    if cli.dry_run {
        return dry_run(&cli, &config).await;
    }

    let mut orchestrator = BatchOrchestrator::new(config).context("Failed to initialise")?;
    if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        orchestrator = orchestrator.with_progress(cb as ProgressCallback);
    }

    let run = orchestrator
        .run(&cli.input, &cli.output)
        .await
        .context("Batch failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&run).context("Failed to serialise summary")?;
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(json.as_bytes()).ok();
        handle.write_all(b"\n").ok();
        return Ok(());
    }

    // ── Summary ──────────────────────────────────────────────────────────
    if !cli.quiet {
        if !show_progress {
            eprintln!(
                "Converted {}/{} documents ({} chunks, {} failed) in {}ms",
                run.stats.succeeded,
                run.stats.total_documents,
                run.stats.total_chunks,
                run.stats.failed_chunks,
                run.stats.total_duration_ms,
            );
        }
        for (path, reason) in run.failures() {
            eprintln!("  {} {}: {}", red("✗"), path.display(), reason);
        }
        if let Some(ref zip) = run.archive_path {
            eprintln!("   {}", dim(&format!("archive: {}", zip.display())));
        }
        if let Some(ref err) = run.archive_error {
            eprintln!("  {} archive failed: {err}", cyan("⚠"));
        }
        eprintln!("   {}", dim(&format!("output: {}", run.output_dir.display())));
    }

    // Partial failure is not a process failure: the summary carries the
    // details, and a zero-success batch is still a completed run.
    Ok(())
}

/// Map CLI args to `BatchConfig`.
fn build_config(cli: &Cli) -> Result<BatchConfig> {
    let mut builder = BatchConfig::builder()
        .chunk_size(cli.chunk_size)
        .min_pages_for_split(cli.min_pages_for_split)
        .safety_margin(cli.safety_margin)
        .per_worker_peak_mb(cli.per_worker_peak_mb)
        .langs(cli.langs.clone())
        .batch_multiplier(cli.batch_multiplier)
        .marker_bin(cli.marker_bin.clone())
        .create_archive(!cli.no_zip)
        .keep_chunks(cli.keep_chunks);

    if let Some(n) = cli.workers {
        builder = builder.workers(n);
    }
    if let Some(n) = cli.max_files {
        builder = builder.max_files(n);
    }
    if let Some(secs) = cli.chunk_timeout {
        builder = builder.chunk_timeout_secs(secs);
    }
    Ok(builder.build()?)
}

/// Plan-only mode: scan, plan, and budget without converting anything.
async fn dry_run(cli: &Cli, config: &BatchConfig) -> Result<()> {
    let (documents, failures) = scan_documents(&cli.input, &config.langs, config.max_files)
        .await
        .context("Scan failed")?;
    let splitter = Splitter::new(config.chunk_size, config.min_pages_for_split)?;

    let mut total_chunks = 0usize;
    for doc in &documents {
        let plan = splitter.plan(doc.page_count);
        total_chunks += plan.len();
        let desc = match plan.len() {
            0 => dim("skip (0 pages)"),
            1 => "1 chunk (whole file)".to_string(),
            n => format!("{n} chunks of ≤{} pages", config.chunk_size),
        };
        println!(
            "{:<60} {:>5} pages  {}",
            doc.path.display(),
            doc.page_count,
            desc
        );
    }
    for (path, err) in &failures {
        println!("{:<60} {}", path.display(), red(&err.to_string()));
    }

    let source: Box<dyn BudgetSource> = match config.workers {
        Some(n) => Box::new(FixedBudget(n)),
        None => Box::new(MemoryBudget::new(
            Arc::new(NvmlProbe::new()),
            config.per_worker_peak_mb,
            config.per_worker_avg_mb,
            config.safety_margin,
        )?),
    };
    let budget = source.budget();

    println!();
    println!(
        "{} documents, {} chunks; budget: {} workers ({:?})",
        documents.len(),
        total_chunks,
        budget.workers,
        budget.kind,
    );
    if let Some(f) = budget.forecast {
        println!(
            "forecast: {} MB peak / {} MB average",
            f.peak_mb, f.average_mb
        );
    }
    Ok(())
}
