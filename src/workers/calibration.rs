use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::adaptive::{AdaptiveEngine, ItemFilter};

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CalibrationCycleStats {
    pub items: usize,
    pub calibrated: usize,
    pub skipped: usize,
    pub stale: usize,
    pub failed: usize,
    pub duration_secs: f64,
}

/// Refits every catalog item that has accumulated enough responses.
pub async fn run_calibration_cycle(
    engine: Arc<AdaptiveEngine>,
) -> Result<CalibrationCycleStats, super::WorkerError> {
    let start = Instant::now();
    debug!("Starting calibration cycle");

    let report = engine.run_calibration_batch(&ItemFilter::all()).await?;

    let stats = CalibrationCycleStats {
        items: report.items,
        calibrated: report.calibrated,
        skipped: report.insufficient_data + report.not_converged,
        stale: report.stale,
        failed: report.failures.len(),
        duration_secs: start.elapsed().as_secs_f64(),
    };

    info!(
        items = stats.items,
        calibrated = stats.calibrated,
        skipped = stats.skipped,
        stale = stats.stale,
        failed = stats.failed,
        duration_secs = format!("{:.2}", stats.duration_secs),
        "Calibration cycle completed"
    );

    Ok(stats)
}
