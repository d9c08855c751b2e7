//! Per-concept mastery tracking.
//!
//! Every response runs the two-state update. When a warm tracer output is
//! available it is blended in by `tracer_weight`; otherwise the two-state value
//! is the mastery probability. State is derived from score, confidence
//! (correct / attempts) and attempt count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adaptive::config::{MasteryThresholds, TwoStateParams};
use crate::adaptive::knowledge::bkt;
use crate::adaptive::types::{ConceptId, ConceptMastery, CourseId, MasterySource, MasteryState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryDelta {
    pub concept_id: ConceptId,
    pub before: f64,
    pub after: f64,
    pub state_before: MasteryState,
    pub state_after: MasteryState,
    pub source: MasterySource,
    pub newly_mastered: bool,
}

impl MasteryDelta {
    pub fn change(&self) -> f64 {
        self.after - self.before
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum MasteryAssessment {
    NotEnoughData {
        concept_id: ConceptId,
    },
    Assessed {
        record: ConceptMastery,
        /// Distance to the mastered score threshold, zero once reached.
        gap_to_mastery: f64,
    },
}

pub struct MasteryTracker {
    thresholds: MasteryThresholds,
    two_state: TwoStateParams,
    tracer_weight: f64,
}

impl MasteryTracker {
    pub fn new(thresholds: MasteryThresholds, two_state: TwoStateParams, tracer_weight: f64) -> Self {
        Self {
            thresholds,
            two_state,
            tracer_weight: tracer_weight.clamp(0.0, 1.0),
        }
    }

    pub fn thresholds(&self) -> &MasteryThresholds {
        &self.thresholds
    }

    pub fn initial(
        &self,
        learner_id: &str,
        concept_id: &str,
        course_id: Option<CourseId>,
    ) -> ConceptMastery {
        ConceptMastery::new(learner_id, concept_id, course_id, self.two_state.prior)
    }

    pub fn classify(&self, mastery: f64, confidence: f64, attempts: u32) -> MasteryState {
        let t = &self.thresholds;
        if attempts == 0 {
            MasteryState::NotStarted
        } else if mastery >= t.mastered_score
            && confidence >= t.mastered_confidence
            && attempts >= t.mastered_min_attempts
        {
            MasteryState::Mastered
        } else if mastery >= t.practiced_score && attempts >= t.practiced_min_attempts {
            MasteryState::Practiced
        } else {
            MasteryState::Learning
        }
    }

    /// Applies one response. `tracer_probability` is passed only when the
    /// tracer is trained and warm for this learner.
    pub fn update(
        &self,
        record: &mut ConceptMastery,
        correct: bool,
        tracer_probability: Option<f64>,
        now: DateTime<Utc>,
    ) -> MasteryDelta {
        let before = record.mastery_probability;
        let state_before = record.state;

        record.two_state_probability =
            bkt::update(record.two_state_probability, correct, &self.two_state);
        record.attempts += 1;
        if correct {
            record.correct += 1;
        }

        let (mastery, source) = match tracer_probability.filter(|p| p.is_finite()) {
            Some(p) => {
                let w = self.tracer_weight;
                (
                    (w * p.clamp(0.0, 1.0) + (1.0 - w) * record.two_state_probability).clamp(0.0, 1.0),
                    MasterySource::Tracer,
                )
            }
            None => (record.two_state_probability, MasterySource::TwoState),
        };

        record.mastery_probability = mastery;
        record.source = source;
        record.confidence = record.correct as f64 / record.attempts as f64;
        record.last_practiced_at = Some(now);
        record.state = self.classify(mastery, record.confidence, record.attempts);

        let newly_mastered = record.state == MasteryState::Mastered && record.mastered_at.is_none();
        if newly_mastered {
            record.mastered_at = Some(now);
        }

        MasteryDelta {
            concept_id: record.concept_id.clone(),
            before,
            after: mastery,
            state_before,
            state_after: record.state,
            source,
            newly_mastered,
        }
    }

    pub fn assess(&self, concept_id: &str, record: Option<&ConceptMastery>) -> MasteryAssessment {
        match record {
            Some(record) if record.attempts > 0 => MasteryAssessment::Assessed {
                record: record.clone(),
                gap_to_mastery: (self.thresholds.mastered_score - record.mastery_probability).max(0.0),
            },
            _ => MasteryAssessment::NotEnoughData {
                concept_id: concept_id.to_string(),
            },
        }
    }
}

impl Default for MasteryTracker {
    fn default() -> Self {
        Self::new(MasteryThresholds::default(), TwoStateParams::default(), 0.7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_fresh_record_is_not_started() {
        let tracker = MasteryTracker::default();
        let record = tracker.initial("l", "fractions", None);
        assert_eq!(record.state, MasteryState::NotStarted);
        assert_eq!(record.mastery_probability, 0.1);
        assert!(matches!(
            tracker.assess("fractions", Some(&record)),
            MasteryAssessment::NotEnoughData { .. }
        ));
        assert!(matches!(
            tracker.assess("fractions", None),
            MasteryAssessment::NotEnoughData { .. }
        ));
    }

    #[test]
    fn test_correct_streak_reaches_mastery_once() {
        let tracker = MasteryTracker::default();
        let mut record = tracker.initial("l", "fractions", None);
        let start = Utc::now();
        let mut first_mastered = None;
        for i in 0..12 {
            let delta = tracker.update(&mut record, true, None, start + Duration::minutes(i));
            assert_eq!(delta.source, MasterySource::TwoState);
            if delta.newly_mastered {
                assert!(first_mastered.is_none(), "mastered twice");
                first_mastered = record.mastered_at;
            }
        }
        assert_eq!(record.state, MasteryState::Mastered);
        assert!(first_mastered.is_some());
        assert_eq!(record.mastered_at, first_mastered);
        assert_eq!(record.confidence, 1.0);
    }

    #[test]
    fn test_mastered_at_survives_regression() {
        let tracker = MasteryTracker::default();
        let mut record = tracker.initial("l", "fractions", None);
        let now = Utc::now();
        for _ in 0..10 {
            tracker.update(&mut record, true, None, now);
        }
        let stamp = record.mastered_at;
        assert!(stamp.is_some());
        for _ in 0..10 {
            tracker.update(&mut record, false, None, now + Duration::days(1));
        }
        assert_ne!(record.state, MasteryState::Mastered);
        assert_eq!(record.mastered_at, stamp);
    }

    #[test]
    fn test_tracer_output_is_blended() {
        let tracker = MasteryTracker::default();
        let mut record = tracker.initial("l", "fractions", None);
        let delta = tracker.update(&mut record, true, Some(0.9), Utc::now());
        assert_eq!(delta.source, MasterySource::Tracer);
        let expected = 0.7 * 0.9 + 0.3 * record.two_state_probability;
        assert!((record.mastery_probability - expected).abs() < 1e-12);
    }

    #[test]
    fn test_classification_thresholds() {
        let tracker = MasteryTracker::default();
        assert_eq!(tracker.classify(0.95, 1.0, 2), MasteryState::Learning);
        assert_eq!(tracker.classify(0.65, 0.5, 3), MasteryState::Practiced);
        assert_eq!(tracker.classify(0.9, 0.7, 6), MasteryState::Practiced);
        assert_eq!(tracker.classify(0.9, 0.8, 5), MasteryState::Mastered);
        assert_eq!(tracker.classify(0.9, 1.0, 0), MasteryState::NotStarted);
    }
}
