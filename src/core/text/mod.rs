pub mod preprocess;
pub mod similarity;

pub use preprocess::{preprocess_lines, ExclusionSet};
pub use similarity::{lines_overlap, similarity_ratio, OverlapCheck, SimilarityEngine};
