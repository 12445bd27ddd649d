use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Deserialize;
use sqlx::{types::Json, PgPool, Row};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};

use crate::processor::ProcessError;
use crate::scores::{HitStatistics, ScoreRepository, ScoreSubmission};

/// Migrate scores from the legacy score table into the current one.
#[derive(Debug, Clone, Default, Args)]
pub struct MigrateScoresArgs {
    /// Log intended writes without committing them.
    #[arg(long)]
    pub dry_run: bool,

    /// The score id to start migrating from.
    #[arg(long, value_name = "SCORE_ID")]
    pub start_id: Option<u64>,
}

/// A row of the legacy schema: identity columns plus a JSON payload
/// carrying the gameplay data.
#[derive(Debug, Clone)]
pub struct LegacyScoreRow {
    pub score_id: u64,
    pub user_id: u32,
    pub beatmap_id: u32,
    pub ruleset_id: u16,
    pub created_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct LegacyScoreData {
    passed: bool,
    #[serde(default)]
    ranked: bool,
    accuracy: f64,
    max_combo: u32,
    total_score: u32,
    statistics: HitStatistics,
}

impl LegacyScoreRow {
    pub fn into_submission(self) -> Result<ScoreSubmission, ProcessError> {
        let data: LegacyScoreData = serde_json::from_value(self.data).map_err(|e| {
            warn!(score_id = self.score_id, error = %e, "Malformed legacy score payload");
            ProcessError::Repository(format!(
                "Malformed legacy payload for score {}: {e}",
                self.score_id
            ))
        })?;

        Ok(ScoreSubmission {
            score_id: self.score_id,
            user_id: self.user_id,
            beatmap_id: self.beatmap_id,
            ruleset_id: self.ruleset_id,
            passed: data.passed,
            ranked: data.ranked,
            statistics: data.statistics,
            accuracy: data.accuracy,
            max_combo: data.max_combo,
            total_score: data.total_score,
            created_at: self.created_at,
        })
    }
}

/// Read side of the migration: the legacy table, in score id order.
#[async_trait]
pub trait LegacyScoreRepository: Send + Sync {
    /// Rows with `score_id >= start_id` (all rows when `None`), ordered
    /// by ascending score id.
    async fn scores_from(&self, start_id: Option<u64>)
        -> Result<Vec<LegacyScoreRow>, ProcessError>;
}

/// In-memory implementation of LegacyScoreRepository for testing
pub struct InMemoryLegacyScoreRepository {
    rows: Mutex<Vec<LegacyScoreRow>>,
}

impl Default for InMemoryLegacyScoreRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLegacyScoreRepository {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, row: LegacyScoreRow) {
        self.rows.lock().unwrap().push(row);
    }
}

#[async_trait]
impl LegacyScoreRepository for InMemoryLegacyScoreRepository {
    async fn scores_from(
        &self,
        start_id: Option<u64>,
    ) -> Result<Vec<LegacyScoreRow>, ProcessError> {
        let rows = self.rows.lock().unwrap();
        let mut matching: Vec<LegacyScoreRow> = rows
            .iter()
            .filter(|row| start_id.map_or(true, |id| row.score_id >= id))
            .cloned()
            .collect();
        matching.sort_by_key(|row| row.score_id);
        Ok(matching)
    }
}

/// PostgreSQL implementation of LegacyScoreRepository
pub struct PostgresLegacyScoreRepository {
    pool: PgPool,
}

impl PostgresLegacyScoreRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LegacyScoreRepository for PostgresLegacyScoreRepository {
    #[instrument(skip(self))]
    async fn scores_from(
        &self,
        start_id: Option<u64>,
    ) -> Result<Vec<LegacyScoreRow>, ProcessError> {
        let rows = sqlx::query(
            "SELECT score_id, user_id, beatmap_id, ruleset_id, data, created_at \
             FROM legacy_scores WHERE score_id >= $1 ORDER BY score_id",
        )
        .bind(start_id.unwrap_or(0) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to fetch legacy scores from database");
            ProcessError::Repository(e.to_string())
        })?;

        Ok(rows
            .into_iter()
            .map(|row| LegacyScoreRow {
                score_id: row.get::<i64, _>("score_id") as u64,
                user_id: row.get::<i64, _>("user_id") as u32,
                beatmap_id: row.get::<i64, _>("beatmap_id") as u32,
                ruleset_id: row.get::<i16, _>("ruleset_id") as u16,
                created_at: row.get("created_at"),
                data: row.get::<Json<serde_json::Value>, _>("data").0,
            })
            .collect())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct MigrationSummary {
    pub migrated: usize,
    pub cancelled: bool,
}

/// Copies legacy rows into the current score store, in score id order.
///
/// Cancellation is checked between rows: already-written records stay
/// written, the run just stops taking new ones. Dry-run mode performs
/// every read and parse but logs instead of writing.
#[instrument(skip(legacy, scores, cancelled))]
pub async fn run_migration(
    legacy: Arc<dyn LegacyScoreRepository>,
    scores: Arc<dyn ScoreRepository>,
    args: &MigrateScoresArgs,
    cancelled: Arc<AtomicBool>,
) -> Result<MigrationSummary, ProcessError> {
    let rows = legacy.scores_from(args.start_id).await?;
    info!(
        count = rows.len(),
        start_id = args.start_id,
        dry_run = args.dry_run,
        "Starting legacy score migration"
    );

    let mut migrated = 0;
    for row in rows {
        if cancelled.load(Ordering::Relaxed) {
            info!(migrated, "Cancellation requested, stopping migration");
            return Ok(MigrationSummary {
                migrated,
                cancelled: true,
            });
        }

        info!(score_id = row.score_id, "Processing score");
        let submission = row.into_submission()?;

        if args.dry_run {
            info!(
                score_id = submission.score_id,
                user_id = submission.user_id,
                beatmap_id = submission.beatmap_id,
                ruleset_id = submission.ruleset_id,
                passed = submission.passed,
                total_score = submission.total_score,
                "Dry run, would insert score"
            );
        } else {
            scores.record_score(&submission).await?;
            migrated += 1;
        }
    }

    info!(migrated, "Migration finished");
    Ok(MigrationSummary {
        migrated,
        cancelled: false,
    })
}
