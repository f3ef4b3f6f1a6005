pub mod dates;
pub mod normalize;
pub mod processors;
pub mod similarity;

pub use dates::parse_flexible_date;
pub use processors::EntityProcessor;
pub use similarity::{ScoreSet, SimilarityScore, SimilarityScorer};
