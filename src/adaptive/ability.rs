//! Ability (θ) estimation from a response pattern.
//!
//! - EAP: posterior mean/SD over a fixed θ grid with a normal prior. Default;
//!   returns the prior unchanged for an empty pattern (cold start).
//! - MLE: bounded Brent minimization of the negative log-likelihood. No
//!   standard error.
//!
//! Both are bounded by iteration count and a wall-clock budget. When the
//! budget is exhausted the previous estimate is returned flagged low-confidence.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Normal};

use crate::adaptive::config::AbilityConfig;
use crate::adaptive::irt::{self, OptimizerOptions};
use crate::adaptive::types::{ConceptId, EstimationMethod, ItemParams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResponse {
    pub params: ItemParams,
    pub correct: bool,
    #[serde(default)]
    pub concepts: Vec<ConceptId>,
}

impl ScoredResponse {
    pub fn new(params: ItemParams, correct: bool) -> Self {
        Self {
            params,
            correct,
            concepts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThetaEstimate {
    pub theta: f64,
    pub standard_error: Option<f64>,
    pub method: EstimationMethod,
    pub converged: bool,
    pub low_confidence: bool,
    pub response_count: usize,
}

pub struct AbilityEstimator {
    config: AbilityConfig,
    grid: Vec<f64>,
    log_prior: Vec<f64>,
}

impl AbilityEstimator {
    pub fn new(config: AbilityConfig) -> Self {
        let points = config.grid_points.max(2);
        let step = (config.theta_max - config.theta_min) / (points - 1) as f64;
        let grid: Vec<f64> = (0..points)
            .map(|i| config.theta_min + step * i as f64)
            .collect();

        let log_prior = match Normal::new(config.prior_mean, config.prior_sd) {
            Ok(prior) => grid.iter().map(|&theta| prior.ln_pdf(theta)).collect(),
            Err(err) => {
                tracing::warn!(error = %err, "invalid ability prior, using flat prior");
                vec![0.0; grid.len()]
            }
        };

        Self {
            config,
            grid,
            log_prior,
        }
    }

    pub fn config(&self) -> &AbilityConfig {
        &self.config
    }

    pub fn prior(&self, method: EstimationMethod) -> ThetaEstimate {
        ThetaEstimate {
            theta: self.config.prior_mean,
            standard_error: Some(self.config.prior_sd),
            method,
            converged: true,
            low_confidence: false,
            response_count: 0,
        }
    }

    pub fn estimate(
        &self,
        responses: &[ScoredResponse],
        method: EstimationMethod,
        previous: Option<&ThetaEstimate>,
    ) -> ThetaEstimate {
        let deadline = Instant::now() + self.config.time_budget();
        self.estimate_until(responses, method, previous, deadline)
    }

    pub fn estimate_until(
        &self,
        responses: &[ScoredResponse],
        method: EstimationMethod,
        previous: Option<&ThetaEstimate>,
        deadline: Instant,
    ) -> ThetaEstimate {
        let usable: Vec<&ScoredResponse> =
            responses.iter().filter(|r| r.params.is_valid()).collect();
        if usable.is_empty() {
            return self.prior(method);
        }

        match method {
            EstimationMethod::ExpectedAPosteriori => self.eap(&usable, previous, deadline),
            EstimationMethod::MaximumLikelihood => self.mle(&usable, previous, deadline),
        }
    }

    /// Estimate restricted to responses tagged with `concept`.
    pub fn estimate_concept(
        &self,
        responses: &[ScoredResponse],
        concept: &str,
        method: EstimationMethod,
        previous: Option<&ThetaEstimate>,
    ) -> ThetaEstimate {
        let scoped: Vec<ScoredResponse> = responses
            .iter()
            .filter(|r| r.concepts.iter().any(|c| c == concept))
            .cloned()
            .collect();
        self.estimate(&scoped, method, previous)
    }

    fn eap(
        &self,
        responses: &[&ScoredResponse],
        previous: Option<&ThetaEstimate>,
        deadline: Instant,
    ) -> ThetaEstimate {
        let mut log_post = self.log_prior.clone();
        for response in responses {
            if Instant::now() >= deadline {
                tracing::warn!(
                    responses = responses.len(),
                    "EAP estimation exceeded time budget"
                );
                return self.fallback(previous, EstimationMethod::ExpectedAPosteriori);
            }
            for (lp, &theta) in log_post.iter_mut().zip(&self.grid) {
                *lp += irt::response_log_likelihood(theta, &response.params, response.correct);
            }
        }

        let max_lp = log_post.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max_lp.is_finite() {
            return self.fallback(previous, EstimationMethod::ExpectedAPosteriori);
        }
        let weights: Vec<f64> = log_post.iter().map(|lp| (lp - max_lp).exp()).collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return self.fallback(previous, EstimationMethod::ExpectedAPosteriori);
        }

        let mean = weights
            .iter()
            .zip(&self.grid)
            .map(|(w, theta)| w * theta)
            .sum::<f64>()
            / total;
        let variance = weights
            .iter()
            .zip(&self.grid)
            .map(|(w, theta)| w * (theta - mean).powi(2))
            .sum::<f64>()
            / total;

        ThetaEstimate {
            theta: mean.clamp(self.config.theta_min, self.config.theta_max),
            standard_error: Some(variance.max(0.0).sqrt()),
            method: EstimationMethod::ExpectedAPosteriori,
            converged: true,
            low_confidence: false,
            response_count: responses.len(),
        }
    }

    fn mle(
        &self,
        responses: &[&ScoredResponse],
        previous: Option<&ThetaEstimate>,
        deadline: Instant,
    ) -> ThetaEstimate {
        let options = OptimizerOptions {
            max_iterations: self.config.max_iterations,
            tolerance: self.config.tolerance,
            deadline: Some(deadline),
        };
        let neg_ll = |theta: f64| {
            -irt::log_likelihood(theta, responses.iter().map(|r| (&r.params, r.correct)))
        };
        let minimum = irt::minimize_scalar(
            neg_ll,
            self.config.theta_min,
            self.config.theta_max,
            &options,
        );

        if !minimum.converged {
            tracing::warn!(
                iterations = minimum.iterations,
                timed_out = minimum.timed_out,
                "MLE ability estimation did not converge"
            );
            return self.fallback(previous, EstimationMethod::MaximumLikelihood);
        }

        ThetaEstimate {
            theta: minimum.x.clamp(self.config.theta_min, self.config.theta_max),
            standard_error: None,
            method: EstimationMethod::MaximumLikelihood,
            converged: true,
            low_confidence: false,
            response_count: responses.len(),
        }
    }

    fn fallback(&self, previous: Option<&ThetaEstimate>, method: EstimationMethod) -> ThetaEstimate {
        let mut estimate = previous.cloned().unwrap_or_else(|| self.prior(method));
        estimate.converged = false;
        estimate.low_confidence = true;
        estimate
    }
}

impl Default for AbilityEstimator {
    fn default() -> Self {
        Self::new(AbilityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn responses(pattern: &[(f64, bool)]) -> Vec<ScoredResponse> {
        pattern
            .iter()
            .map(|&(b, correct)| ScoredResponse::new(ItemParams::new(1.0, b, 0.0), correct))
            .collect()
    }

    #[test]
    fn test_empty_pattern_returns_prior_exactly() {
        let estimator = AbilityEstimator::default();
        for method in [
            EstimationMethod::ExpectedAPosteriori,
            EstimationMethod::MaximumLikelihood,
        ] {
            let est = estimator.estimate(&[], method, None);
            assert_eq!(est.theta, 0.0);
            assert_eq!(est.standard_error, Some(1.0));
            assert_eq!(est.response_count, 0);
            assert!(!est.low_confidence);
        }
    }

    #[test]
    fn test_more_correct_means_higher_theta() {
        let estimator = AbilityEstimator::default();
        let bs = [-1.0, -0.5, 0.0, 0.5, 1.0];
        let weaker: Vec<(f64, bool)> = bs.iter().enumerate().map(|(i, &b)| (b, i < 2)).collect();
        let stronger: Vec<(f64, bool)> = bs.iter().enumerate().map(|(i, &b)| (b, i < 3)).collect();

        let low = estimator.estimate(&responses(&weaker), EstimationMethod::ExpectedAPosteriori, None);
        let high = estimator.estimate(&responses(&stronger), EstimationMethod::ExpectedAPosteriori, None);
        assert!(high.theta > low.theta);
    }

    #[test]
    fn test_directional_scenario() {
        let estimator = AbilityEstimator::default();
        let pattern = responses(&[(-1.5, true), (-0.75, true), (1.5, false)]);
        let est = estimator.estimate(&pattern, EstimationMethod::ExpectedAPosteriori, None);
        assert!(est.theta > -0.5 && est.theta < 2.0, "theta = {}", est.theta);
        let se = est.standard_error.unwrap();
        assert!(se > 0.0 && se < 1.0);
    }

    #[test]
    fn test_mle_interior_and_boundary() {
        let estimator = AbilityEstimator::default();
        let mixed = responses(&[(-1.0, true), (0.0, true), (0.0, false), (1.0, false)]);
        let est = estimator.estimate(&mixed, EstimationMethod::MaximumLikelihood, None);
        assert!(est.converged);
        assert!(est.theta.abs() < 0.5);
        assert!(est.standard_error.is_none());

        let all_correct = responses(&[(-1.0, true), (0.0, true), (1.0, true)]);
        let est = estimator.estimate(&all_correct, EstimationMethod::MaximumLikelihood, None);
        assert!(est.theta > 2.9);
    }

    #[test]
    fn test_expired_budget_falls_back_to_previous() {
        let estimator = AbilityEstimator::default();
        let previous = ThetaEstimate {
            theta: 0.8,
            standard_error: Some(0.4),
            method: EstimationMethod::ExpectedAPosteriori,
            converged: true,
            low_confidence: false,
            response_count: 4,
        };
        let pattern = responses(&[(0.0, true), (0.5, false)]);
        let deadline = Instant::now() - Duration::from_millis(1);
        let est = estimator.estimate_until(
            &pattern,
            EstimationMethod::ExpectedAPosteriori,
            Some(&previous),
            deadline,
        );
        assert!(est.low_confidence);
        assert_eq!(est.theta, 0.8);
    }

    #[test]
    fn test_degenerate_items_are_ignored() {
        let estimator = AbilityEstimator::default();
        let pattern = vec![ScoredResponse::new(ItemParams::new(0.0, 0.0, 0.0), true)];
        let est = estimator.estimate(&pattern, EstimationMethod::ExpectedAPosteriori, None);
        assert_eq!(est.theta, 0.0);
        assert_eq!(est.response_count, 0);
    }

    #[test]
    fn test_concept_scoped_estimate() {
        let estimator = AbilityEstimator::default();
        let mut pattern = responses(&[(0.0, true), (0.0, false)]);
        pattern[0].concepts = vec!["fractions".to_string()];
        let est = estimator.estimate_concept(
            &pattern,
            "fractions",
            EstimationMethod::ExpectedAPosteriori,
            None,
        );
        assert_eq!(est.response_count, 1);
        assert!(est.theta > 0.0);
    }
}
