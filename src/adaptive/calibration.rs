//! Item parameter recalibration from accumulated `(θ_before, correct)` pairs.
//!
//! Fits a/b (and c when enabled) by bounded Nelder-Mead on the negative
//! log-likelihood. Results carry the source parameter version so the catalog
//! can apply them as a compare-and-swap.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::adaptive::config::CalibrationConfig;
use crate::adaptive::irt::{self, OptimizerOptions};
use crate::adaptive::types::{CalibrationOutcome, CalibrationResult, Item, ItemParams, GUESSING_MAX};

/// Keeps a fitted guessing floor strictly inside `[0, 0.35)`.
const GUESSING_MARGIN: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationObservation {
    pub theta: f64,
    pub correct: bool,
}

pub struct ItemCalibrator {
    config: CalibrationConfig,
}

impl ItemCalibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn confidence(sample_size: usize) -> f64 {
        if sample_size == 0 {
            return 0.0;
        }
        (1.0 - 1.0 / (sample_size as f64).sqrt()).max(0.0)
    }

    pub fn calibrate(
        &self,
        item: &Item,
        observations: &[CalibrationObservation],
        now: DateTime<Utc>,
    ) -> CalibrationOutcome {
        let usable: Vec<CalibrationObservation> = observations
            .iter()
            .filter(|o| o.theta.is_finite())
            .copied()
            .collect();
        let n = usable.len();
        if n < self.config.min_sample_size {
            return CalibrationOutcome::InsufficientData {
                item_id: item.id.clone(),
                sample_size: n,
                required: self.config.min_sample_size,
            };
        }

        let (a_lo, a_hi) = self.config.a_bounds;
        let (b_lo, b_hi) = self.config.b_bounds;
        let (c_lo, c_hi) = self.config.c_bounds;
        let c_hi = c_hi.min(GUESSING_MAX - GUESSING_MARGIN);
        let fixed_c = item.params.c.clamp(0.0, GUESSING_MAX - GUESSING_MARGIN);

        let mut start = vec![
            item.params.a.clamp(a_lo, a_hi),
            item.params.b.clamp(b_lo, b_hi),
        ];
        let mut lower = vec![a_lo, b_lo];
        let mut upper = vec![a_hi, b_hi];
        if self.config.fit_guessing {
            start.push(fixed_c.clamp(c_lo, c_hi));
            lower.push(c_lo);
            upper.push(c_hi);
        }

        let fit_guessing = self.config.fit_guessing;
        let neg_ll = |x: &[f64]| {
            let params = ItemParams::new(x[0], x[1], if fit_guessing { x[2] } else { fixed_c });
            -usable
                .iter()
                .map(|o| irt::response_log_likelihood(o.theta, &params, o.correct))
                .sum::<f64>()
        };

        let options = OptimizerOptions {
            max_iterations: self.config.max_iterations,
            tolerance: self.config.tolerance,
            deadline: None,
        };
        let minimum = irt::minimize_box(neg_ll, &start, &lower, &upper, &options);

        if !minimum.converged {
            tracing::warn!(
                item_id = %item.id,
                sample_size = n,
                iterations = minimum.iterations,
                "item calibration did not converge"
            );
            return CalibrationOutcome::NotConverged {
                item_id: item.id.clone(),
                sample_size: n,
                iterations: minimum.iterations,
            };
        }

        let c = fit_guessing.then(|| minimum.x[2].clamp(0.0, GUESSING_MAX - GUESSING_MARGIN));

        tracing::debug!(
            item_id = %item.id,
            a = minimum.x[0],
            b = minimum.x[1],
            sample_size = n,
            "item calibrated"
        );

        CalibrationOutcome::Calibrated(CalibrationResult {
            item_id: item.id.clone(),
            a: minimum.x[0],
            b: minimum.x[1],
            c,
            sample_size: n,
            confidence: Self::confidence(n),
            neg_log_likelihood: minimum.fx,
            from_version: item.params.version,
            timestamp: now,
        })
    }

    /// Fits independent items in parallel.
    pub fn calibrate_batch(
        &self,
        batch: &[(Item, Vec<CalibrationObservation>)],
        now: DateTime<Utc>,
    ) -> Vec<CalibrationOutcome> {
        batch
            .par_iter()
            .map(|(item, observations)| self.calibrate(item, observations, now))
            .collect()
    }
}

impl Default for ItemCalibrator {
    fn default() -> Self {
        Self::new(CalibrationConfig::default())
    }
}

/// Applies a calibration result on top of the parameters it was fitted from.
pub fn apply_result(current: &ItemParams, result: &CalibrationResult) -> ItemParams {
    ItemParams {
        a: result.a,
        b: result.b,
        c: result.c.unwrap_or(current.c),
        version: current.version + 1,
    }
}
