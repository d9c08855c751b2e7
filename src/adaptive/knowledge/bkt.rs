//! Two-state knowledge model (knows / does not know) with fixed slip and
//! guess probabilities.
//!
//! correct:   P(K|obs) = P(K)(1-s) / [P(K)(1-s) + (1-P(K))g]
//! incorrect: P(K|obs) = P(K)s / [P(K)s + (1-P(K))(1-g)]
//! then P(K) ← clip(P(K|obs) + learn, 0, 1)

use crate::adaptive::config::TwoStateParams;

pub fn posterior(prior: f64, correct: bool, params: &TwoStateParams) -> f64 {
    let p = prior.clamp(0.0, 1.0);
    let (known, unknown) = if correct {
        (p * (1.0 - params.slip), (1.0 - p) * params.guess)
    } else {
        (p * params.slip, (1.0 - p) * (1.0 - params.guess))
    };
    let evidence = known + unknown;
    if evidence <= 0.0 || !evidence.is_finite() {
        return p;
    }
    known / evidence
}

pub fn update(prior: f64, correct: bool, params: &TwoStateParams) -> f64 {
    (posterior(prior, correct, params) + params.learn).clamp(0.0, 1.0)
}

/// Probability of a correct response given the current knowledge state.
pub fn predict_correct(knowledge: f64, params: &TwoStateParams) -> f64 {
    let p = knowledge.clamp(0.0, 1.0);
    p * (1.0 - params.slip) + (1.0 - p) * params.guess
}
