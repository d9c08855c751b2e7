use thiserror::Error;

/// Hard failures surfaced to callers. Numerical non-convergence, insufficient
/// data, degenerate parameters and pool exhaustion are reported as values.
#[derive(Debug, Error)]
pub enum AdaptiveError {
    #[error("unknown item: {0}")]
    UnknownItem(String),
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("session {0} is terminated")]
    SessionTerminated(String),
    #[error("session {0} has no pending item")]
    NoPendingItem(String),
    #[error("item {got} was not offered (pending: {expected})")]
    ItemNotOffered { expected: String, got: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("sequence out of chronological order at step {0}")]
    OutOfOrderSequence(usize),
    #[error("stale calibration for {item_id}: result from v{from_version}, catalog at v{current_version}")]
    StaleCalibration {
        item_id: String,
        from_version: u32,
        current_version: u32,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("catalog file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type AdaptiveResult<T> = Result<T, AdaptiveError>;
