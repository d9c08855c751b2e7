//! Adaptive testing and learner modeling.

pub mod ability;
pub mod calibration;
pub mod config;
pub mod engine;
pub mod error;
pub mod irt;
pub mod knowledge;
pub mod mastery;
pub mod memory;
pub mod selection;
pub mod session;
pub mod store;
pub mod types;

pub use config::AdaptiveConfig;
pub use engine::{AdaptiveEngine, CalibrationFailure, CalibrationReport, NextAction, SubmitOutcome};
pub use error::{AdaptiveError, AdaptiveResult};
pub use session::{SessionBudget, SessionId, TerminationReason};
pub use store::{InMemoryItemCatalog, InMemoryResponseLog, ItemCatalog, ResponseLog};
pub use types::{
    AbilityEstimate, AbilityScope, Answer, CalibrationOutcome, CalibrationResult, ConceptId,
    ConceptMastery, CourseId, EstimationMethod, Item, ItemFilter, ItemId, ItemParams, LearnerId,
    MasterySource, MasteryState, ResponseEvent, ReviewItemState, GUESSING_MAX, THETA_MAX, THETA_MIN,
};
