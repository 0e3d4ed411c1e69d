//! Pre-flight checks: buffered-memory estimate and source reachability.
//!
//! Neither check blocks a run; they produce advisories.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SystemResources;
use crate::core::traits::RowSource;

/// Outcome of the pre-flight checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreflightReport {
    /// Worst-case bytes buffered by the export side.
    pub estimated_bytes: u64,
    /// Bytes the run may buffer before an OOM advisory.
    pub budget_bytes: u64,
    pub oom_risk: bool,
    /// Source unreachable when checked.
    pub offline: bool,
    pub advisories: Vec<String>,
}

/// `max(row bytes) × commit count × export threads`.
pub fn estimate_buffered_bytes(max_row_bytes: u64, commit_count: usize, export_threads: usize) -> u64 {
    max_row_bytes
        .saturating_mul(commit_count as u64)
        .saturating_mul(export_threads as u64)
}

/// Compare the buffered-memory estimate with a fraction of available memory.
pub fn check_memory(
    max_row_bytes: u64,
    commit_count: usize,
    export_threads: usize,
    memory_fraction: f64,
    resources: &SystemResources,
) -> PreflightReport {
    let estimated = estimate_buffered_bytes(max_row_bytes, commit_count, export_threads);
    let budget = (resources.available_memory_bytes as f64 * memory_fraction.clamp(0.0, 1.0)) as u64;
    let mut report = PreflightReport {
        estimated_bytes: estimated,
        budget_bytes: budget,
        ..Default::default()
    };
    if estimated > budget {
        report.oom_risk = true;
        let message = format!(
            "OOM risk: up to {:.1} MB may be buffered ({} bytes/row x {} rows x {} threads), budget is {:.1} MB",
            estimated as f64 / 1_048_576.0,
            max_row_bytes,
            commit_count,
            export_threads,
            budget as f64 / 1_048_576.0
        );
        warn!("{}", message);
        report.advisories.push(message);
    } else {
        info!(
            "Memory estimate: {:.1} MB of {:.1} MB budget",
            estimated as f64 / 1_048_576.0,
            budget as f64 / 1_048_576.0
        );
    }
    report
}

/// Run every pre-flight check.
pub async fn run_preflight(
    source: &dyn RowSource,
    max_row_bytes: u64,
    commit_count: usize,
    export_threads: usize,
    memory_fraction: f64,
    resources: &SystemResources,
) -> PreflightReport {
    let mut report = check_memory(
        max_row_bytes,
        commit_count,
        export_threads,
        memory_fraction,
        resources,
    );
    if let Err(e) = source.test_connection().await {
        let message = format!("Source unreachable, running in offline mode: {}", e);
        warn!("{}", message);
        report.offline = true;
        report.advisories.push(message);
    }
    report
}
