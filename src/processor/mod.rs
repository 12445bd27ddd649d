pub mod best;
pub mod conversion;
pub mod gate;
pub mod service;

mod errors;
pub mod ledger;
pub mod stats;

pub use best::{
    BestScoreRecord, BestScoreRepository, BestScoreSelector, InMemoryBestScoreRepository,
    PostgresBestScoreRepository,
};
pub use conversion::{ruleset, ClassicConverter, ConverterRegistry};
pub use errors::ProcessError;
pub use gate::submission_is_eligible;
pub use ledger::{
    InMemoryLedgerRepository, LedgerRepository, LedgerState, PostgresLedgerRepository,
    ProcessedContribution,
};
pub use service::{RetryConfig, ScoreProcessor, ScoreProcessorBuilder, PROCESSING_VERSION};
pub use stats::{
    InMemoryUserStatsRepository, PostgresUserStatsRepository, UserStats, UserStatsRepository,
};
