pub mod deduplicator;
pub mod frame;

pub use deduplicator::{DedupDecision, DedupOutcome, DedupReason, FrameDeduplicator};
pub use frame::{FfmpegFrameExtractor, FrameRef, FrameSequence, FrameSource};
