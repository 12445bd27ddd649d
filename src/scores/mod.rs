pub mod models;
pub mod repository;

pub use models::{HitResult, HitStatistics, ScoreKey, ScoreSubmission};
pub use repository::{InMemoryScoreRepository, PostgresScoreRepository, ScoreRepository};
