//! Three-parameter logistic (3PL) item response function.
//!
//! P(θ) = c + (1 - c) / (1 + exp(-D·a·(θ - b))), D = 1.7
//!
//! Information: I(θ) = (D·a)² · Q · (P - c)² / (P · (1 - c)²)

use crate::adaptive::types::ItemParams;

/// Logistic scaling constant.
pub const D: f64 = 1.7;

/// Probability clip applied before any log is taken.
pub const PROB_EPSILON: f64 = 1e-10;

pub fn probability(theta: f64, params: &ItemParams) -> f64 {
    let z = -D * params.a * (theta - params.b);
    // exp overflow saturates to +inf, which yields exactly c
    params.c + (1.0 - params.c) / (1.0 + z.exp())
}

pub fn clipped_probability(theta: f64, params: &ItemParams) -> f64 {
    probability(theta, params).clamp(PROB_EPSILON, 1.0 - PROB_EPSILON)
}

pub fn fisher_information(theta: f64, params: &ItemParams) -> f64 {
    if !params.is_valid() || !theta.is_finite() {
        return 0.0;
    }
    let p = probability(theta, params);
    let q = 1.0 - p;
    let denom = p * (1.0 - params.c).powi(2);
    if denom <= 0.0 || !denom.is_finite() {
        return 0.0;
    }
    let info = (D * params.a).powi(2) * q * (p - params.c).powi(2) / denom;
    if info.is_finite() {
        info.max(0.0)
    } else {
        0.0
    }
}

pub fn response_log_likelihood(theta: f64, params: &ItemParams, correct: bool) -> f64 {
    let p = clipped_probability(theta, params);
    if correct {
        p.ln()
    } else {
        (1.0 - p).ln()
    }
}

/// Log-likelihood of a response pattern; degenerate items contribute nothing.
pub fn log_likelihood<'a, I>(theta: f64, responses: I) -> f64
where
    I: IntoIterator<Item = (&'a ItemParams, bool)>,
{
    responses
        .into_iter()
        .filter(|(params, _)| params.is_valid())
        .map(|(params, correct)| response_log_likelihood(theta, params, correct))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn test_exact_value_at_difficulty() {
        let params = ItemParams::new(1.0, 0.0, 0.25);
        assert!((probability(0.0, &params) - 0.625).abs() < EPS);
    }

    #[test]
    fn test_monotone_and_asymptotes() {
        let params = ItemParams::new(1.3, 0.4, 0.2);
        let mut prev = probability(-3.0, &params);
        for step in 1..=600 {
            let theta = -3.0 + step as f64 * 0.01;
            let p = probability(theta, &params);
            assert!(p >= prev);
            prev = p;
        }
        assert!(probability(-3.0, &params) >= params.c);
        assert!(probability(-3.0, &params) - params.c < 0.02);
        assert!(1.0 - probability(3.0, &params) < 0.02);
        assert!((probability(-1e6, &params) - params.c).abs() < EPS);
        assert!((probability(1e6, &params) - 1.0).abs() < EPS);
    }

    #[test]
    fn test_information_peaks_at_difficulty_without_guessing() {
        let params = ItemParams::new(1.5, 0.7, 0.0);
        let peak = fisher_information(0.7, &params);
        for offset in [0.25, 0.5, 1.0, 2.0] {
            assert!(fisher_information(0.7 + offset, &params) < peak);
            assert!(fisher_information(0.7 - offset, &params) < peak);
        }
        assert!(fisher_information(3.0, &params) < peak * 0.2);
    }

    #[test]
    fn test_degenerate_items_have_zero_information() {
        assert_eq!(fisher_information(0.0, &ItemParams::new(0.0, 0.0, 0.0)), 0.0);
        assert_eq!(fisher_information(0.0, &ItemParams::new(-1.0, 0.0, 0.0)), 0.0);
        assert_eq!(fisher_information(0.0, &ItemParams::new(1.0, 0.0, 0.5)), 0.0);
        assert_eq!(fisher_information(f64::NAN, &ItemParams::new(1.0, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn test_log_likelihood_is_finite_at_extremes() {
        let params = ItemParams::new(3.0, -3.0, 0.0);
        let ll = response_log_likelihood(3.0, &params, false);
        assert!(ll.is_finite());
        assert!(ll <= PROB_EPSILON.ln() + 1e-6);
    }
}
