// Library crate for the ranked score statistics processor
// This file exposes the public API for integration tests

pub mod api;
pub mod beatmaps;
pub mod maintenance;
pub mod processor;
pub mod queue;
pub mod scores;
pub mod shared;

// Re-export commonly used types for easier access in tests
pub use beatmaps::{BeatmapRepository, RankedStatus};
pub use processor::{ProcessError, ScoreProcessor, UserStats, PROCESSING_VERSION};
pub use queue::ScoreQueue;
pub use scores::{HitResult, HitStatistics, ScoreKey, ScoreSubmission};
pub use shared::{AppError, AppState};
