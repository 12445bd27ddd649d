pub mod migrate;

pub use migrate::{
    run_migration, InMemoryLegacyScoreRepository, LegacyScoreRepository, LegacyScoreRow,
    MigrateScoresArgs, MigrationSummary, PostgresLegacyScoreRepository,
};
