//! Memory layer: forgetting curve and spaced-review scheduling.

pub mod forgetting;

pub use forgetting::{
    elapsed_days, retention, DueReview, ReviewDifficulty, SpacedRepetitionScheduler,
};
