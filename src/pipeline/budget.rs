//! Worker-budget calculation: turn a memory snapshot into a safe degree of
//! parallelism.
//!
//! The model is deliberately linear and conservative: each worker is assumed
//! to peak at a configured constant with no sharing between workers. The
//! external engine's real memory use is not predictable per document, so the
//! budget trades precision for an explainable upper bound.
//!
//! The budget is advisory — nothing enforces it at the allocator level.
//! Exceeding it shows up as an ordinary conversion failure on the chunk that
//! hit the allocation error, not as a system-level fault.
//!
//! [`BudgetSource`] keeps the "memory-bounded vs core-bounded vs fixed"
//! decision out of the dispatch loop: the orchestrator picks one source at
//! batch start and asks it for a [`WorkerBudget`], never branching on which
//! kind it got.

use crate::error::PdfmillError;
use crate::pipeline::memory::{MemoryProbe, MemorySnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Predicted accelerator memory usage for a worker count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageForecast {
    /// Worst case: every worker at its peak simultaneously.
    pub peak_mb: u64,
    /// Expected steady state.
    pub average_mb: u64,
}

/// Which source produced a budget. Carried into logs and the batch summary
/// so a run's concurrency is always explainable after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetKind {
    /// Derived from an accelerator memory snapshot.
    Memory,
    /// Derived from logical core count (no accelerator present).
    Cores,
    /// Explicit caller override.
    Fixed,
}

/// The computed safe degree of parallelism for one batch run.
///
/// Derived value: recomputed once before each dispatch, never persisted.
/// `workers == 0` means "run sequentially on the fallback path", not an
/// error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkerBudget {
    pub workers: usize,
    pub forecast: Option<UsageForecast>,
    pub kind: BudgetKind,
}

/// Maximum workers that fit in the snapshot's available memory.
///
/// `floor(available × safety_margin / per_worker_peak)`, floored at 0.
///
/// # Errors
/// [`PdfmillError::InvalidConfig`] when `safety_margin` is outside `(0, 1]`
/// or `per_worker_peak_mb == 0`.
pub fn max_workers(
    snapshot: &MemorySnapshot,
    per_worker_peak_mb: u64,
    safety_margin: f64,
) -> Result<usize, PdfmillError> {
    if !(safety_margin > 0.0 && safety_margin <= 1.0) {
        return Err(PdfmillError::InvalidConfig(format!(
            "safety_margin must be in (0, 1], got {safety_margin}"
        )));
    }
    if per_worker_peak_mb == 0 {
        return Err(PdfmillError::InvalidConfig(
            "per_worker_peak_mb must be > 0".into(),
        ));
    }
    Ok(compute_workers(
        snapshot.available_mb,
        per_worker_peak_mb,
        safety_margin,
    ))
}

fn compute_workers(available_mb: u64, per_worker_peak_mb: u64, safety_margin: f64) -> usize {
    let usable = available_mb as f64 * safety_margin;
    (usable / per_worker_peak_mb as f64).floor() as usize
}

/// Predict peak and average memory usage for `workers` concurrent workers.
pub fn estimate_usage(workers: usize, per_worker_peak_mb: u64, per_worker_avg_mb: u64) -> UsageForecast {
    UsageForecast {
        peak_mb: workers as u64 * per_worker_peak_mb,
        average_mb: workers as u64 * per_worker_avg_mb,
    }
}

/// Source of the worker budget for a batch run.
pub trait BudgetSource: Send + Sync {
    fn budget(&self) -> WorkerBudget;
}

/// Memory-bounded budget: probe the accelerator, apply the linear cost model.
///
/// Degrades to the core-bound budget when the probe reports no accelerator —
/// a warning-level condition, not an error.
pub struct MemoryBudget {
    probe: Arc<dyn MemoryProbe>,
    per_worker_peak_mb: u64,
    per_worker_avg_mb: u64,
    safety_margin: f64,
}

impl MemoryBudget {
    /// # Errors
    /// [`PdfmillError::InvalidConfig`] for an out-of-range `safety_margin`
    /// or a zero peak estimate; validated here once so [`Self::budget`]
    /// cannot fail later.
    pub fn new(
        probe: Arc<dyn MemoryProbe>,
        per_worker_peak_mb: u64,
        per_worker_avg_mb: u64,
        safety_margin: f64,
    ) -> Result<Self, PdfmillError> {
        if !(safety_margin > 0.0 && safety_margin <= 1.0) {
            return Err(PdfmillError::InvalidConfig(format!(
                "safety_margin must be in (0, 1], got {safety_margin}"
            )));
        }
        if per_worker_peak_mb == 0 {
            return Err(PdfmillError::InvalidConfig(
                "per_worker_peak_mb must be > 0".into(),
            ));
        }
        Ok(Self {
            probe,
            per_worker_peak_mb,
            per_worker_avg_mb,
            safety_margin,
        })
    }
}

impl BudgetSource for MemoryBudget {
    fn budget(&self) -> WorkerBudget {
        match self.probe.snapshot() {
            Some(snapshot) => {
                let workers = compute_workers(
                    snapshot.available_mb,
                    self.per_worker_peak_mb,
                    self.safety_margin,
                );
                let forecast =
                    estimate_usage(workers, self.per_worker_peak_mb, self.per_worker_avg_mb);
                debug!(
                    "memory budget: {} workers ({} MB available, {} MB peak forecast)",
                    workers, snapshot.available_mb, forecast.peak_mb
                );
                WorkerBudget {
                    workers,
                    forecast: Some(forecast),
                    kind: BudgetKind::Memory,
                }
            }
            None => {
                warn!("accelerator unavailable; falling back to core-bound budget");
                CoreBudget::default().budget()
            }
        }
    }
}

/// Core-bound budget for the no-accelerator fallback path.
#[derive(Default)]
pub struct CoreBudget;

impl BudgetSource for CoreBudget {
    fn budget(&self) -> WorkerBudget {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        WorkerBudget {
            workers,
            forecast: None,
            kind: BudgetKind::Cores,
        }
    }
}

/// Explicit worker-count override; bypasses the calculator entirely.
pub struct FixedBudget(pub usize);

impl BudgetSource for FixedBudget {
    fn budget(&self) -> WorkerBudget {
        WorkerBudget {
            workers: self.0,
            forecast: None,
            kind: BudgetKind::Fixed,
        }
    }
}
