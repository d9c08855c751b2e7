use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type LearnerId = String;
pub type ItemId = String;
pub type ConceptId = String;
pub type CourseId = String;

pub const THETA_MIN: f64 = -3.0;
pub const THETA_MAX: f64 = 3.0;
pub const GUESSING_MAX: f64 = 0.35;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemParams {
    pub a: f64,
    pub b: f64,
    #[serde(default)]
    pub c: f64,
    #[serde(default)]
    pub version: u32,
}

impl Default for ItemParams {
    fn default() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            version: 0,
        }
    }
}

impl ItemParams {
    pub fn new(a: f64, b: f64, c: f64) -> Self {
        Self {
            a,
            b,
            c,
            version: 0,
        }
    }

    /// Discrimination positive, guessing floor in `[0, 0.35)`, everything finite.
    pub fn is_valid(&self) -> bool {
        self.a.is_finite()
            && self.b.is_finite()
            && self.c.is_finite()
            && self.a > 0.0
            && (0.0..GUESSING_MAX).contains(&self.c)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub params: ItemParams,
    #[serde(default)]
    pub concepts: Vec<ConceptId>,
    #[serde(default)]
    pub course_id: Option<CourseId>,
    #[serde(default)]
    pub answer_key: Option<String>,
    #[serde(default)]
    pub exposure_count: u64,
    #[serde(default)]
    pub success_rate: f64,
}

impl Item {
    pub fn new(id: impl Into<String>, params: ItemParams) -> Self {
        Self {
            id: id.into(),
            params,
            concepts: Vec::new(),
            course_id: None,
            answer_key: None,
            exposure_count: 0,
            success_rate: 0.0,
        }
    }

    pub fn with_concepts<I, S>(mut self, concepts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.concepts = concepts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_course(mut self, course_id: impl Into<String>) -> Self {
        self.course_id = Some(course_id.into());
        self
    }

    pub fn with_answer_key(mut self, key: impl Into<String>) -> Self {
        self.answer_key = Some(key.into());
        self
    }

    /// Units scheduled for spaced review when this item is practiced.
    pub fn review_units(&self) -> Vec<String> {
        if self.concepts.is_empty() {
            vec![self.id.clone()]
        } else {
            self.concepts.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFilter {
    #[serde(default)]
    pub course_id: Option<CourseId>,
    #[serde(default)]
    pub concepts: Vec<ConceptId>,
    #[serde(default)]
    pub item_ids: Option<Vec<ItemId>>,
}

impl ItemFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn course(course_id: impl Into<String>) -> Self {
        Self {
            course_id: Some(course_id.into()),
            ..Self::default()
        }
    }

    pub fn items<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            item_ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn matches(&self, item: &Item) -> bool {
        if let Some(ref course) = self.course_id {
            if item.course_id.as_ref() != Some(course) {
                return false;
            }
        }
        if !self.concepts.is_empty() && !item.concepts.iter().any(|c| self.concepts.contains(c)) {
            return false;
        }
        if let Some(ref ids) = self.item_ids {
            if !ids.contains(&item.id) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEvent {
    pub learner_id: LearnerId,
    pub item_id: ItemId,
    #[serde(default)]
    pub session_id: Option<String>,
    pub correct: bool,
    pub theta_before: f64,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "conceptId")]
pub enum AbilityScope {
    Global,
    Concept(ConceptId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMethod {
    MaximumLikelihood,
    #[default]
    ExpectedAPosteriori,
}

impl EstimationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaximumLikelihood => "mle",
            Self::ExpectedAPosteriori => "eap",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilityEstimate {
    pub learner_id: LearnerId,
    pub scope: AbilityScope,
    pub theta: f64,
    pub standard_error: Option<f64>,
    pub method: EstimationMethod,
    pub low_confidence: bool,
    pub response_count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MasteryState {
    #[default]
    NotStarted,
    Learning,
    Practiced,
    Mastered,
}

impl MasteryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Learning => "learning",
            Self::Practiced => "practiced",
            Self::Mastered => "mastered",
        }
    }
}

impl fmt::Display for MasteryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MasterySource {
    Tracer,
    #[default]
    TwoState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptMastery {
    pub learner_id: LearnerId,
    pub concept_id: ConceptId,
    pub course_id: Option<CourseId>,
    pub mastery_probability: f64,
    pub two_state_probability: f64,
    pub confidence: f64,
    pub attempts: u32,
    pub correct: u32,
    pub last_practiced_at: Option<DateTime<Utc>>,
    pub state: MasteryState,
    pub mastered_at: Option<DateTime<Utc>>,
    pub source: MasterySource,
}

impl ConceptMastery {
    pub fn new(
        learner_id: impl Into<String>,
        concept_id: impl Into<String>,
        course_id: Option<CourseId>,
        prior: f64,
    ) -> Self {
        Self {
            learner_id: learner_id.into(),
            concept_id: concept_id.into(),
            course_id,
            mastery_probability: prior,
            two_state_probability: prior,
            confidence: 0.0,
            attempts: 0,
            correct: 0,
            last_practiced_at: None,
            state: MasteryState::NotStarted,
            mastered_at: None,
            source: MasterySource::TwoState,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItemState {
    pub learner_id: LearnerId,
    pub unit_id: String,
    pub strength: f64,
    pub last_review_at: DateTime<Utc>,
    pub next_review_at: DateTime<Utc>,
    pub review_count: u32,
    pub lapses: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationResult {
    pub item_id: ItemId,
    pub a: f64,
    pub b: f64,
    pub c: Option<f64>,
    pub sample_size: usize,
    pub confidence: f64,
    pub neg_log_likelihood: f64,
    pub from_version: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum CalibrationOutcome {
    Calibrated(CalibrationResult),
    InsufficientData {
        item_id: ItemId,
        sample_size: usize,
        required: usize,
    },
    NotConverged {
        item_id: ItemId,
        sample_size: usize,
        iterations: usize,
    },
    /// Fitted, but the catalog's parameters moved on before the swap.
    Stale {
        item_id: ItemId,
        from_version: u32,
        current_version: u32,
    },
}

impl CalibrationOutcome {
    pub fn item_id(&self) -> &str {
        match self {
            Self::Calibrated(result) => &result.item_id,
            Self::InsufficientData { item_id, .. }
            | Self::NotConverged { item_id, .. }
            | Self::Stale { item_id, .. } => item_id,
        }
    }

    pub fn result(&self) -> Option<&CalibrationResult> {
        match self {
            Self::Calibrated(result) => Some(result),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Answer {
    Correct(bool),
    Text(String),
}

impl Answer {
    /// Trimmed, case-insensitive comparison against the answer key.
    pub fn score(&self, answer_key: Option<&str>) -> Option<bool> {
        match self {
            Self::Correct(correct) => Some(*correct),
            Self::Text(text) => {
                answer_key.map(|key| key.trim().to_lowercase() == text.trim().to_lowercase())
            }
        }
    }
}

impl From<bool> for Answer {
    fn from(correct: bool) -> Self {
        Self::Correct(correct)
    }
}
