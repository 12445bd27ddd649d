use async_trait::async_trait;
use sqlx::{types::Json, PgPool, Row};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::models::{ScoreKey, ScoreSubmission};
use crate::processor::ProcessError;

/// Durable store of submitted scores, queried again when a key's best
/// score has to be recomputed after a revert.
#[async_trait]
pub trait ScoreRepository: Send + Sync {
    /// Records a submission. Redelivery of the same score id is allowed
    /// and overwrites the stored row.
    async fn record_score(&self, score: &ScoreSubmission) -> Result<(), ProcessError>;
    async fn get_score(&self, score_id: u64) -> Result<Option<ScoreSubmission>, ProcessError>;
    async fn scores_for_key(&self, key: &ScoreKey) -> Result<Vec<ScoreSubmission>, ProcessError>;
}

/// In-memory implementation of ScoreRepository for development and testing
pub struct InMemoryScoreRepository {
    scores: Mutex<HashMap<u64, ScoreSubmission>>,
}

impl Default for InMemoryScoreRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryScoreRepository {
    pub fn new() -> Self {
        Self {
            scores: Mutex::new(HashMap::new()),
        }
    }

    pub fn score_count(&self) -> usize {
        self.scores.lock().unwrap().len()
    }
}

#[async_trait]
impl ScoreRepository for InMemoryScoreRepository {
    #[instrument(skip(self, score))]
    async fn record_score(&self, score: &ScoreSubmission) -> Result<(), ProcessError> {
        debug!(score_id = score.score_id, "Recording score in memory");

        let mut scores = self.scores.lock().unwrap();
        scores.insert(score.score_id, score.clone());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_score(&self, score_id: u64) -> Result<Option<ScoreSubmission>, ProcessError> {
        let scores = self.scores.lock().unwrap();
        Ok(scores.get(&score_id).cloned())
    }

    #[instrument(skip(self))]
    async fn scores_for_key(&self, key: &ScoreKey) -> Result<Vec<ScoreSubmission>, ProcessError> {
        let scores = self.scores.lock().unwrap();
        let mut matching: Vec<ScoreSubmission> = scores
            .values()
            .filter(|score| score.key() == *key)
            .cloned()
            .collect();

        // Stable order keeps rescans deterministic.
        matching.sort_by_key(|score| score.score_id);
        Ok(matching)
    }
}

/// PostgreSQL implementation of ScoreRepository
pub struct PostgresScoreRepository {
    pool: PgPool,
}

impl PostgresScoreRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn score_from_row(row: &sqlx::postgres::PgRow) -> ScoreSubmission {
        ScoreSubmission {
            score_id: row.get::<i64, _>("score_id") as u64,
            user_id: row.get::<i64, _>("user_id") as u32,
            beatmap_id: row.get::<i64, _>("beatmap_id") as u32,
            ruleset_id: row.get::<i16, _>("ruleset_id") as u16,
            passed: row.get("passed"),
            ranked: row.get("ranked"),
            statistics: row.get::<Json<_>, _>("statistics").0,
            accuracy: row.get("accuracy"),
            max_combo: row.get::<i64, _>("max_combo") as u32,
            total_score: row.get::<i64, _>("total_score") as u32,
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl ScoreRepository for PostgresScoreRepository {
    #[instrument(skip(self, score))]
    async fn record_score(&self, score: &ScoreSubmission) -> Result<(), ProcessError> {
        debug!(score_id = score.score_id, "Recording score in database");

        sqlx::query(
            "INSERT INTO scores (score_id, user_id, beatmap_id, ruleset_id, passed, ranked, statistics, accuracy, max_combo, total_score, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (score_id) DO UPDATE SET passed = EXCLUDED.passed, ranked = EXCLUDED.ranked, statistics = EXCLUDED.statistics, \
             accuracy = EXCLUDED.accuracy, max_combo = EXCLUDED.max_combo, total_score = EXCLUDED.total_score",
        )
        .bind(score.score_id as i64)
        .bind(score.user_id as i64)
        .bind(score.beatmap_id as i64)
        .bind(score.ruleset_id as i16)
        .bind(score.passed)
        .bind(score.ranked)
        .bind(Json(&score.statistics))
        .bind(score.accuracy)
        .bind(score.max_combo as i64)
        .bind(score.total_score as i64)
        .bind(score.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, score_id = score.score_id, "Failed to record score in database");
            ProcessError::Repository(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_score(&self, score_id: u64) -> Result<Option<ScoreSubmission>, ProcessError> {
        let row = sqlx::query(
            "SELECT score_id, user_id, beatmap_id, ruleset_id, passed, ranked, statistics, accuracy, max_combo, total_score, created_at \
             FROM scores WHERE score_id = $1",
        )
        .bind(score_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, score_id, "Failed to fetch score from database");
            ProcessError::Repository(e.to_string())
        })?;

        Ok(row.as_ref().map(Self::score_from_row))
    }

    #[instrument(skip(self))]
    async fn scores_for_key(&self, key: &ScoreKey) -> Result<Vec<ScoreSubmission>, ProcessError> {
        let rows = sqlx::query(
            "SELECT score_id, user_id, beatmap_id, ruleset_id, passed, ranked, statistics, accuracy, max_combo, total_score, created_at \
             FROM scores WHERE user_id = $1 AND beatmap_id = $2 AND ruleset_id = $3 ORDER BY score_id",
        )
        .bind(key.user_id as i64)
        .bind(key.beatmap_id as i64)
        .bind(key.ruleset_id as i16)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, ?key, "Failed to fetch scores for key from database");
            ProcessError::Repository(e.to_string())
        })?;

        Ok(rows.iter().map(Self::score_from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scores::models::{HitResult, HitStatistics};
    use chrono::Utc;

    fn submission(score_id: u64, user_id: u32, beatmap_id: u32) -> ScoreSubmission {
        ScoreSubmission {
            score_id,
            user_id,
            beatmap_id,
            ruleset_id: 0,
            passed: true,
            ranked: true,
            statistics: [(HitResult::Great, 5)].into_iter().collect::<HitStatistics>(),
            accuracy: 1.0,
            max_combo: 5,
            total_score: 100_000,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn records_and_fetches_scores() {
        let repo = InMemoryScoreRepository::new();
        repo.record_score(&submission(1, 2, 100)).await.unwrap();

        let fetched = repo.get_score(1).await.unwrap().unwrap();
        assert_eq!(fetched.user_id, 2);
        assert!(repo.get_score(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn redelivery_overwrites_without_error() {
        let repo = InMemoryScoreRepository::new();
        repo.record_score(&submission(1, 2, 100)).await.unwrap();

        let mut updated = submission(1, 2, 100);
        updated.total_score = 50_000;
        repo.record_score(&updated).await.unwrap();

        assert_eq!(repo.score_count(), 1);
        let fetched = repo.get_score(1).await.unwrap().unwrap();
        assert_eq!(fetched.total_score, 50_000);
    }

    #[tokio::test]
    async fn scores_for_key_filters_and_orders() {
        let repo = InMemoryScoreRepository::new();
        repo.record_score(&submission(3, 2, 100)).await.unwrap();
        repo.record_score(&submission(1, 2, 100)).await.unwrap();
        repo.record_score(&submission(2, 2, 101)).await.unwrap();
        repo.record_score(&submission(4, 7, 100)).await.unwrap();

        let key = ScoreKey {
            user_id: 2,
            beatmap_id: 100,
            ruleset_id: 0,
        };
        let scores = repo.scores_for_key(&key).await.unwrap();
        let ids: Vec<u64> = scores.iter().map(|s| s.score_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }
}
