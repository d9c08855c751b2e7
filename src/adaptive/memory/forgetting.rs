//! Exponential forgetting curve and review-strength updates.
//!
//! R(t) = exp(-t / S), t and S in days.
//! correct:   S ← min(S · (2.5 - 1.9d), S_max)
//! incorrect: S ← max(S₀, 0.3 · S)
//! next review when R falls to R_min: t* = -S · ln(R_min)

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::adaptive::config::SchedulerConfig;
use crate::adaptive::types::ReviewItemState;

const MS_PER_DAY: f64 = 86_400_000.0;
const MIN_STRENGTH: f64 = 1e-3;

/// Review difficulty in `[0, 1]`, 0 being the easiest recall.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct ReviewDifficulty(f64);

impl ReviewDifficulty {
    pub const EASIEST: Self = Self(0.0);
    pub const HARDEST: Self = Self(1.0);

    pub fn new(value: f64) -> Self {
        if value.is_finite() {
            Self(value.clamp(0.0, 1.0))
        } else {
            Self(0.5)
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Linear in latency between the fast and slow thresholds.
    pub fn from_latency(latency_ms: u64, config: &SchedulerConfig) -> Self {
        let fast = config.fast_latency_ms as f64;
        let slow = config.slow_latency_ms as f64;
        if slow <= fast {
            return Self::new(if latency_ms as f64 <= fast { 0.0 } else { 1.0 });
        }
        Self::new((latency_ms as f64 - fast) / (slow - fast))
    }

    /// Strength multiplier after a correct review, in `[0.6, 2.5]`.
    ///
    /// Below 1 for difficulties above 0.79: a correct but laboured recall
    /// (latency near `slow_latency_ms`) shortens the interval instead of
    /// extending it. Strength grows on success only for easier recalls.
    pub fn strength_factor(self) -> f64 {
        2.5 - 1.9 * self.0
    }
}

pub fn retention(strength: f64, elapsed_days: f64) -> f64 {
    if strength <= 0.0 || !strength.is_finite() {
        return 0.0;
    }
    (-elapsed_days.max(0.0) / strength).exp()
}

pub fn elapsed_days(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds().max(0) as f64 / MS_PER_DAY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DueReview {
    pub state: ReviewItemState,
    pub retention: f64,
    pub urgency: f64,
    pub is_due: bool,
}

pub struct SpacedRepetitionScheduler {
    config: SchedulerConfig,
}

impl SpacedRepetitionScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn initial_strength(&self) -> f64 {
        self.config.initial_strength.max(MIN_STRENGTH)
    }

    pub fn interval_days(&self, strength: f64) -> f64 {
        let r_min = self.config.min_retention;
        if !(r_min > 0.0 && r_min < 1.0) {
            return 0.0;
        }
        -strength * r_min.ln()
    }

    pub fn next_review(&self, strength: f64, reviewed_at: DateTime<Utc>) -> DateTime<Utc> {
        // `as` saturates, so an enormous strength lands on i64::MAX
        let ms = (self.interval_days(strength) * MS_PER_DAY).round() as i64;
        Duration::try_milliseconds(ms)
            .and_then(|interval| reviewed_at.checked_add_signed(interval))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn updated_strength(&self, strength: f64, correct: bool, difficulty: ReviewDifficulty) -> f64 {
        let s0 = self.initial_strength();
        let strength = if strength.is_finite() && strength > 0.0 {
            strength
        } else {
            s0
        };
        let next = if correct {
            strength * difficulty.strength_factor()
        } else {
            s0.max(self.config.failure_factor * strength)
        };
        next.clamp(MIN_STRENGTH, self.config.max_strength.max(s0))
    }

    /// Applies one review. With no prior record the unit starts at `S₀`.
    pub fn review(
        &self,
        existing: Option<&ReviewItemState>,
        learner_id: &str,
        unit_id: &str,
        correct: bool,
        difficulty: ReviewDifficulty,
        now: DateTime<Utc>,
    ) -> ReviewItemState {
        let mut state = existing.cloned().unwrap_or_else(|| ReviewItemState {
            learner_id: learner_id.to_string(),
            unit_id: unit_id.to_string(),
            strength: self.initial_strength(),
            last_review_at: now,
            next_review_at: now,
            review_count: 0,
            lapses: 0,
        });

        state.strength = self.updated_strength(state.strength, correct, difficulty);
        state.review_count += 1;
        if !correct {
            state.lapses += 1;
        }
        state.last_review_at = now;
        state.next_review_at = self.next_review(state.strength, now);
        state
    }

    pub fn retention_at(&self, state: &ReviewItemState, now: DateTime<Utc>) -> f64 {
        retention(state.strength, elapsed_days(state.last_review_at, now))
    }

    pub fn urgency(&self, state: &ReviewItemState, now: DateTime<Utc>) -> f64 {
        1.0 - self.retention_at(state, now)
    }

    /// Every record ranked by descending urgency, optionally truncated.
    pub fn queue<'a, I>(&self, states: I, now: DateTime<Utc>, limit: Option<usize>) -> Vec<DueReview>
    where
        I: IntoIterator<Item = &'a ReviewItemState>,
    {
        let mut queue: Vec<DueReview> = states
            .into_iter()
            .map(|state| {
                let retention = self.retention_at(state, now);
                DueReview {
                    state: state.clone(),
                    retention,
                    urgency: 1.0 - retention,
                    is_due: state.next_review_at <= now,
                }
            })
            .collect();
        queue.sort_by(|a, b| {
            b.urgency
                .total_cmp(&a.urgency)
                .then_with(|| a.state.unit_id.cmp(&b.state.unit_id))
        });
        if let Some(limit) = limit {
            queue.truncate(limit);
        }
        queue
    }
}

impl Default for SpacedRepetitionScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reviewed(scheduler: &SpacedRepetitionScheduler, strength: f64, at: DateTime<Utc>) -> ReviewItemState {
        ReviewItemState {
            learner_id: "l".into(),
            unit_id: format!("u{strength}"),
            strength,
            last_review_at: at,
            next_review_at: scheduler.next_review(strength, at),
            review_count: 1,
            lapses: 0,
        }
    }

    #[test]
    fn test_retention_curve() {
        assert_eq!(retention(2.0, 0.0), 1.0);
        assert!((retention(2.0, 2.0) - (-1.0f64).exp()).abs() < 1e-12);
        assert!(retention(2.0, 5.0) < retention(2.0, 1.0));
        assert_eq!(retention(0.0, 1.0), 0.0);
    }

    #[test]
    fn test_strength_factor_range() {
        assert_eq!(ReviewDifficulty::EASIEST.strength_factor(), 2.5);
        assert!((ReviewDifficulty::HARDEST.strength_factor() - 0.6).abs() < 1e-12);
        for i in 0..=10 {
            let f = ReviewDifficulty::new(i as f64 / 10.0).strength_factor();
            assert!(f > 0.5 && f <= 2.5);
        }
    }

    #[test]
    fn test_correct_easy_review_grows_strength() {
        let scheduler = SpacedRepetitionScheduler::default();
        let now = Utc::now();
        let first = scheduler.review(None, "l", "u", true, ReviewDifficulty::EASIEST, now);
        assert_eq!(first.strength, 2.5);
        assert_eq!(first.review_count, 1);
        let second = scheduler.review(Some(&first), "l", "u", true, ReviewDifficulty::EASIEST, now);
        assert!(second.strength > first.strength);
    }

    #[test]
    fn test_incorrect_review_never_below_initial() {
        let scheduler = SpacedRepetitionScheduler::default();
        let now = Utc::now();
        let strong = reviewed(&scheduler, 40.0, now);
        let after = scheduler.review(Some(&strong), "l", "u", false, ReviewDifficulty::HARDEST, now);
        assert!((after.strength - 12.0).abs() < 1e-9);
        assert_eq!(after.lapses, 1);

        let weak = reviewed(&scheduler, 1.5, now);
        let after = scheduler.review(Some(&weak), "l", "u", false, ReviewDifficulty::HARDEST, now);
        assert_eq!(after.strength, 1.0);
    }

    #[test]
    fn test_strength_capped() {
        let scheduler = SpacedRepetitionScheduler::default();
        let now = Utc::now();
        let near_cap = reviewed(&scheduler, 3000.0, now);
        let after = scheduler.review(Some(&near_cap), "l", "u", true, ReviewDifficulty::EASIEST, now);
        assert_eq!(after.strength, 3650.0);
    }

    #[test]
    fn test_next_review_hits_min_retention() {
        let scheduler = SpacedRepetitionScheduler::default();
        let now = Utc::now();
        let state = reviewed(&scheduler, 10.0, now);
        let r = scheduler.retention_at(&state, state.next_review_at);
        assert!((r - 0.7).abs() < 1e-6, "retention at due time = {r}");
    }

    #[test]
    fn test_from_latency() {
        let config = SchedulerConfig::default();
        assert_eq!(ReviewDifficulty::from_latency(500, &config), ReviewDifficulty::EASIEST);
        assert_eq!(ReviewDifficulty::from_latency(60_000, &config), ReviewDifficulty::HARDEST);
        let mid = ReviewDifficulty::from_latency(6000, &config).value();
        assert!((mid - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_slow_correct_review_shrinks_strength() {
        let scheduler = SpacedRepetitionScheduler::default();
        let slow = ReviewDifficulty::from_latency(scheduler.config().slow_latency_ms, scheduler.config());
        assert!(slow.strength_factor() < 1.0);
        let after = scheduler.updated_strength(10.0, true, slow);
        assert!((after - 6.0).abs() < 1e-9);
        assert!(scheduler.updated_strength(10.0, false, slow) < after);
    }

    #[test]
    fn test_next_review_saturates_for_huge_strength() {
        let scheduler = SpacedRepetitionScheduler::new(SchedulerConfig {
            max_strength: f64::MAX,
            ..SchedulerConfig::default()
        });
        let now = Utc::now();
        assert_eq!(scheduler.next_review(1e300, now), DateTime::<Utc>::MAX_UTC);
        assert_eq!(scheduler.next_review(f64::INFINITY, now), DateTime::<Utc>::MAX_UTC);

        let state = scheduler.review(None, "l", "u", true, ReviewDifficulty::EASIEST, now);
        let huge = ReviewItemState { strength: 1e300, ..state };
        let next = scheduler.review(Some(&huge), "l", "u", true, ReviewDifficulty::EASIEST, now);
        assert_eq!(next.next_review_at, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_queue_orders_by_urgency() {
        let scheduler = SpacedRepetitionScheduler::default();
        let now = Utc::now();
        let states = vec![
            reviewed(&scheduler, 5.0, now - Duration::days(1)),
            reviewed(&scheduler, 1.0, now - Duration::days(3)),
            reviewed(&scheduler, 20.0, now - Duration::hours(2)),
        ];
        let queue = scheduler.queue(&states, now, None);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue[0].state.strength, 1.0);
        assert_eq!(queue[2].state.strength, 20.0);
        assert!(queue.windows(2).all(|w| w[0].urgency >= w[1].urgency));
        assert!(queue[0].is_due);
        assert!(!queue[2].is_due);

        let limited = scheduler.queue(&states, now, Some(1));
        assert_eq!(limited.len(), 1);
    }
}
