use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adaptive::types::EstimationMethod;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbilityConfig {
    pub theta_min: f64,
    pub theta_max: f64,
    pub grid_points: usize,
    pub prior_mean: f64,
    pub prior_sd: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub time_budget_ms: u64,
    pub default_method: EstimationMethod,
}

impl Default for AbilityConfig {
    fn default() -> Self {
        Self {
            theta_min: -3.0,
            theta_max: 3.0,
            grid_points: 61,
            prior_mean: 0.0,
            prior_sd: 1.0,
            max_iterations: 100,
            tolerance: 1e-5,
            time_budget_ms: 50,
            default_method: EstimationMethod::ExpectedAPosteriori,
        }
    }
}

impl AbilityConfig {
    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub recency_window: usize,
    pub exploration_rate: f64,
    pub novelty_bonus: f64,
    pub novelty_horizon_days: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            recency_window: 5,
            exploration_rate: 0.05,
            novelty_bonus: 0.1,
            novelty_horizon_days: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub min_sample_size: usize,
    pub a_bounds: (f64, f64),
    pub b_bounds: (f64, f64),
    pub c_bounds: (f64, f64),
    pub fit_guessing: bool,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_sample_size: 10,
            a_bounds: (0.1, 3.0),
            b_bounds: (-3.0, 3.0),
            c_bounds: (0.0, 0.35),
            fit_guessing: false,
            max_iterations: 2000,
            tolerance: 1e-8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracerConfig {
    pub hidden_size: usize,
    pub num_layers: usize,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub grad_clip: f64,
    pub seed: u64,
    /// Steps a learner must have replayed before tracer output is trusted.
    pub warm_steps: usize,
    pub tracer_weight: f64,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            hidden_size: 32,
            num_layers: 2,
            learning_rate: 0.01,
            epochs: 10,
            batch_size: 16,
            grad_clip: 5.0,
            seed: 7,
            warm_steps: 5,
            tracer_weight: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoStateParams {
    pub prior: f64,
    pub slip: f64,
    pub guess: f64,
    pub learn: f64,
}

impl Default for TwoStateParams {
    fn default() -> Self {
        Self {
            prior: 0.1,
            slip: 0.1,
            guess: 0.2,
            learn: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasteryThresholds {
    pub practiced_score: f64,
    pub practiced_min_attempts: u32,
    pub mastered_score: f64,
    pub mastered_confidence: f64,
    pub mastered_min_attempts: u32,
}

impl Default for MasteryThresholds {
    fn default() -> Self {
        Self {
            practiced_score: 0.6,
            practiced_min_attempts: 3,
            mastered_score: 0.85,
            mastered_confidence: 0.8,
            mastered_min_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub initial_strength: f64,
    pub max_strength: f64,
    pub failure_factor: f64,
    pub min_retention: f64,
    pub fast_latency_ms: u64,
    pub slow_latency_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_strength: 1.0,
            max_strength: 3650.0,
            failure_factor: 0.3,
            min_retention: 0.7,
            fast_latency_ms: 2000,
            slow_latency_ms: 10000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_items: usize,
    pub min_items: usize,
    pub target_standard_error: f64,
    pub time_budget_secs: Option<u64>,
    /// Prior responses replayed into a new session's ability estimate.
    pub history_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_items: 20,
            min_items: 3,
            target_standard_error: 0.3,
            time_budget_secs: Some(30 * 60),
            history_window: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdaptiveConfig {
    pub ability: AbilityConfig,
    pub selector: SelectorConfig,
    pub calibration: CalibrationConfig,
    pub tracer: TracerConfig,
    pub two_state: TwoStateParams,
    pub mastery: MasteryThresholds,
    pub scheduler: SchedulerConfig,
    pub session: SessionConfig,
}

impl AdaptiveConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_parse::<f64>("ADAPTIVE_EXPLORATION_RATE") {
            config.selector.exploration_rate = val.clamp(0.0, 1.0);
        }
        if let Some(val) = env_parse::<usize>("ADAPTIVE_RECENCY_WINDOW") {
            config.selector.recency_window = val;
        }
        if let Some(val) = env_parse::<f64>("ADAPTIVE_TARGET_SE") {
            config.session.target_standard_error = val;
        }
        if let Some(val) = env_parse::<usize>("ADAPTIVE_MAX_ITEMS") {
            config.session.max_items = val;
        }
        if let Some(val) = env_parse::<usize>("ADAPTIVE_MIN_CALIBRATION_SAMPLES") {
            config.calibration.min_sample_size = val;
        }
        if let Some(val) = env_parse::<bool>("ADAPTIVE_FIT_GUESSING") {
            config.calibration.fit_guessing = val;
        }
        if let Some(val) = env_parse::<f64>("ADAPTIVE_MIN_RETENTION") {
            config.scheduler.min_retention = val.clamp(0.01, 0.99);
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
