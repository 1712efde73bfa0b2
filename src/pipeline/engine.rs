//! Conversion-engine boundary: hand one chunk to the external OCR/layout
//! engine and collect markdown plus extracted assets.
//!
//! The engine is an opaque collaborator. The contract is intentionally
//! minimal: a file path in, markdown text and asset paths out, or a failure
//! with a human-readable message. Nothing about its cost, determinism, or
//! internal behaviour is assumed — in particular, how much accelerator
//! memory it allocates is its own business (that is what the worker budget
//! exists for).
//!
//! [`MarkerEngine`] drives the `marker_single` CLI in a subprocess. The
//! child is spawned with `kill_on_drop`, so the orchestrator can enforce a
//! per-chunk timeout by simply dropping the future: the engine exposes no
//! cooperative cancellation, and terminating the process is the only way to
//! reclaim a stalled worker.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// One unit of work for the engine: a chunk (or whole document) file.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    /// Path to the standalone PDF to convert.
    pub input: PathBuf,
    /// Language hint, passed through verbatim.
    pub langs: String,
    /// Zero-based page number of this chunk's first page in the parent
    /// document. Purely informational metadata for engines that can use it.
    pub page_offset: usize,
}

/// Successful engine output for one request.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    /// The produced markdown text.
    pub markdown: String,
    /// Extracted asset files (images), in the engine's own order. The paths
    /// stay valid until the engine is dropped; the aggregator copies them
    /// into the output tree.
    pub assets: Vec<PathBuf>,
}

/// Failure of a single engine invocation.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("failed to spawn engine process: {detail}")]
    Spawn { detail: String },

    #[error("engine exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("engine produced no markdown output: {detail}")]
    OutputMissing { detail: String },
}

/// The external conversion collaborator.
///
/// `Send + Sync` because the orchestrator shares one engine across all
/// concurrent workers; implementations must not keep per-call mutable state.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    async fn convert(&self, request: &ConversionRequest) -> Result<EngineOutput, EngineError>;
}

/// Drives the external `marker_single` command.
///
/// Each invocation gets its own output directory under an engine-owned temp
/// root, which lives until the engine is dropped so asset paths stay
/// readable while the aggregator copies them.
pub struct MarkerEngine {
    bin: PathBuf,
    batch_multiplier: u32,
    work_root: TempDir,
    invocation: AtomicUsize,
}

impl MarkerEngine {
    /// # Errors
    /// [`EngineError::Spawn`] if the temp work root cannot be created.
    pub fn new(bin: impl Into<PathBuf>, batch_multiplier: u32) -> Result<Self, EngineError> {
        let work_root = TempDir::new().map_err(|e| EngineError::Spawn {
            detail: format!("temp work dir: {e}"),
        })?;
        Ok(Self {
            bin: bin.into(),
            batch_multiplier,
            work_root,
            invocation: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ConversionEngine for MarkerEngine {
    async fn convert(&self, request: &ConversionRequest) -> Result<EngineOutput, EngineError> {
        let call = self.invocation.fetch_add(1, Ordering::Relaxed);
        let out_dir = self.work_root.path().join(format!("conv-{call:05}"));
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|e| EngineError::Spawn {
                detail: format!("create output dir: {e}"),
            })?;

        debug!(
            "marker: {} (pages from {}) → {}",
            request.input.display(),
            request.page_offset,
            out_dir.display()
        );

        let output = Command::new(&self.bin)
            .arg(&request.input)
            .arg(&out_dir)
            .arg("--batch_multiplier")
            .arg(self.batch_multiplier.to_string())
            .arg("--langs")
            .arg(&request.langs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EngineError::Spawn {
                detail: format!("{}: {e}", self.bin.display()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "marker failed for {}: {}",
                request.input.display(),
                stderr.trim()
            );
            return Err(EngineError::Failed {
                status: output.status.to_string(),
                stderr: tail(&stderr, 400),
            });
        }

        collect_output(&out_dir).await
    }
}

/// Read back what the engine wrote: the first markdown file found is the
/// chunk's text, every image file is an asset.
async fn collect_output(out_dir: &Path) -> Result<EngineOutput, EngineError> {
    let mut markdown_path: Option<PathBuf> = None;
    let mut assets: Vec<PathBuf> = Vec::new();

    let mut pending = vec![out_dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| EngineError::OutputMissing {
                detail: format!("read {}: {e}", dir.display()),
            })?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            EngineError::OutputMissing {
                detail: format!("read {}: {e}", dir.display()),
            }
        })? {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            match path.extension().and_then(|e| e.to_str()) {
                Some("md") if markdown_path.is_none() => markdown_path = Some(path),
                Some("png") | Some("jpg") | Some("jpeg") | Some("gif") | Some("webp") => {
                    assets.push(path)
                }
                _ => {}
            }
        }
    }
    // Engine-internal naming is arbitrary; sort for a stable asset order.
    assets.sort();

    let markdown_path = markdown_path.ok_or_else(|| EngineError::OutputMissing {
        detail: format!("no .md file under {}", out_dir.display()),
    })?;
    let markdown =
        tokio::fs::read_to_string(&markdown_path)
            .await
            .map_err(|e| EngineError::OutputMissing {
                detail: format!("read {}: {e}", markdown_path.display()),
            })?;

    Ok(EngineOutput { markdown, assets })
}

fn tail(s: &str, max: usize) -> String {
    let s = s.trim();
    if s.len() <= max {
        s.to_string()
    } else {
        let cut = s.len() - max;
        let cut = s
            .char_indices()
            .map(|(i, _)| i)
            .find(|&i| i >= cut)
            .unwrap_or(0);
        format!("…{}", &s[cut..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collect_output_finds_markdown_and_sorted_assets() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("doc");
        tokio::fs::create_dir_all(&nested).await.unwrap();
        tokio::fs::write(nested.join("doc.md"), "# Title\n")
            .await
            .unwrap();
        tokio::fs::write(nested.join("image_001.png"), b"png")
            .await
            .unwrap();
        tokio::fs::write(nested.join("image_000.png"), b"png")
            .await
            .unwrap();
        tokio::fs::write(nested.join("meta.json"), b"{}")
            .await
            .unwrap();

        let out = collect_output(dir.path()).await.unwrap();
        assert_eq!(out.markdown, "# Title\n");
        let names: Vec<_> = out
            .assets
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["image_000.png", "image_001.png"]);
    }

    #[tokio::test]
    async fn collect_output_without_markdown_is_an_error() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("image.png"), b"png")
            .await
            .unwrap();
        let err = collect_output(dir.path()).await.unwrap_err();
        assert!(matches!(err, EngineError::OutputMissing { .. }));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let engine = MarkerEngine::new("/definitely/not/a/binary", 2).unwrap();
        let req = ConversionRequest {
            input: PathBuf::from("x.pdf"),
            langs: "English".into(),
            page_offset: 0,
        };
        let err = engine.convert(&req).await.unwrap_err();
        assert!(matches!(err, EngineError::Spawn { .. }));
    }

    #[test]
    fn tail_truncates_long_stderr() {
        let long = "x".repeat(1000);
        let t = tail(&long, 400);
        assert!(t.len() <= 404); // ellipsis + 400 bytes
        assert!(t.starts_with('…'));
        assert_eq!(tail("short", 400), "short");
    }
}
