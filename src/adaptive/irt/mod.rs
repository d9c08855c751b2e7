//! Item response theory primitives.

pub mod model;
pub mod optimize;

pub use model::{
    clipped_probability, fisher_information, log_likelihood, probability,
    response_log_likelihood, D, PROB_EPSILON,
};
pub use optimize::{minimize_box, minimize_scalar, BoxMinimum, OptimizerOptions, ScalarMinimum};
