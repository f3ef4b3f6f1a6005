pub mod error;
pub mod pipeline;
pub mod result;

pub use error::PipelineError;
pub use pipeline::{CancelToken, DedupPipeline, PipelineStats};
pub use result::{Classification, ConfidenceDistribution, DedupResult, PairCandidate};
