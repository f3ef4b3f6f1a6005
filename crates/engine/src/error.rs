use thiserror::Error;

/// Fatal pipeline failures. Pair-level problems never surface here; they
/// are logged, counted, and the run continues.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The audit store failed repeatedly; the run aborts with the store in
    /// its last committed state.
    #[error("audit store failed {consecutive} consecutive times: {message}")]
    Store { consecutive: u32, message: String },

    #[error("internal invariant violated: {0}")]
    Invariant(String),
}
