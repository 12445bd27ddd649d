use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument, warn};

use super::conversion::ConverterRegistry;
use super::errors::ProcessError;
use super::gate;
use super::ledger::LedgerRepository;
use super::stats::UserStatsRepository;
use crate::beatmaps::RankedStatus;
use crate::scores::{ScoreKey, ScoreRepository, ScoreSubmission};

/// The score currently holding "best" status for its key. At most one
/// holder exists per key at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestScoreRecord {
    pub key: ScoreKey,
    pub score_id: u64,
    pub classic_score: u64,
}

#[async_trait]
pub trait BestScoreRepository: Send + Sync {
    async fn get(&self, key: &ScoreKey) -> Result<Option<BestScoreRecord>, ProcessError>;
    async fn put(&self, record: &BestScoreRecord) -> Result<(), ProcessError>;
    async fn clear(&self, key: &ScoreKey) -> Result<(), ProcessError>;
}

/// In-memory implementation of BestScoreRepository for development and testing
pub struct InMemoryBestScoreRepository {
    records: Mutex<HashMap<ScoreKey, BestScoreRecord>>,
}

impl Default for InMemoryBestScoreRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBestScoreRepository {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl BestScoreRepository for InMemoryBestScoreRepository {
    #[instrument(skip(self))]
    async fn get(&self, key: &ScoreKey) -> Result<Option<BestScoreRecord>, ProcessError> {
        let records = self.records.lock().unwrap();
        Ok(records.get(key).cloned())
    }

    #[instrument(skip(self, record))]
    async fn put(&self, record: &BestScoreRecord) -> Result<(), ProcessError> {
        let mut records = self.records.lock().unwrap();
        records.insert(record.key, record.clone());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear(&self, key: &ScoreKey) -> Result<(), ProcessError> {
        let mut records = self.records.lock().unwrap();
        records.remove(key);
        Ok(())
    }
}

/// PostgreSQL implementation of BestScoreRepository
pub struct PostgresBestScoreRepository {
    pool: PgPool,
}

impl PostgresBestScoreRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BestScoreRepository for PostgresBestScoreRepository {
    #[instrument(skip(self))]
    async fn get(&self, key: &ScoreKey) -> Result<Option<BestScoreRecord>, ProcessError> {
        let row = sqlx::query(
            "SELECT score_id, classic_score FROM best_scores \
             WHERE user_id = $1 AND beatmap_id = $2 AND ruleset_id = $3",
        )
        .bind(key.user_id as i64)
        .bind(key.beatmap_id as i64)
        .bind(key.ruleset_id as i16)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, ?key, "Failed to fetch best score from database");
            ProcessError::Repository(e.to_string())
        })?;

        Ok(row.map(|row| BestScoreRecord {
            key: *key,
            score_id: row.get::<i64, _>("score_id") as u64,
            classic_score: row.get::<i64, _>("classic_score") as u64,
        }))
    }

    #[instrument(skip(self, record))]
    async fn put(&self, record: &BestScoreRecord) -> Result<(), ProcessError> {
        sqlx::query(
            "INSERT INTO best_scores (user_id, beatmap_id, ruleset_id, score_id, classic_score) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id, beatmap_id, ruleset_id) \
             DO UPDATE SET score_id = EXCLUDED.score_id, classic_score = EXCLUDED.classic_score",
        )
        .bind(record.key.user_id as i64)
        .bind(record.key.beatmap_id as i64)
        .bind(record.key.ruleset_id as i16)
        .bind(record.score_id as i64)
        .bind(record.classic_score as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, key = ?record.key, "Failed to store best score in database");
            ProcessError::Repository(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear(&self, key: &ScoreKey) -> Result<(), ProcessError> {
        sqlx::query(
            "DELETE FROM best_scores WHERE user_id = $1 AND beatmap_id = $2 AND ruleset_id = $3",
        )
        .bind(key.user_id as i64)
        .bind(key.beatmap_id as i64)
        .bind(key.ruleset_id as i16)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, ?key, "Failed to clear best score in database");
            ProcessError::Repository(e.to_string())
        })?;

        Ok(())
    }
}

/// Tracks the winning score per key and is the only writer of aggregate
/// deltas. Aggregates are never recomputed by summing raw scores; every
/// change goes through one signed delta here.
pub struct BestScoreSelector {
    best_scores: Arc<dyn BestScoreRepository>,
    user_stats: Arc<dyn UserStatsRepository>,
    scores: Arc<dyn ScoreRepository>,
    ledger: Arc<dyn LedgerRepository>,
    converters: Arc<ConverterRegistry>,
}

impl BestScoreSelector {
    pub fn new(
        best_scores: Arc<dyn BestScoreRepository>,
        user_stats: Arc<dyn UserStatsRepository>,
        scores: Arc<dyn ScoreRepository>,
        ledger: Arc<dyn LedgerRepository>,
        converters: Arc<ConverterRegistry>,
    ) -> Self {
        Self {
            best_scores,
            user_stats,
            scores,
            ledger,
            converters,
        }
    }

    /// Offers a candidate value for the holder slot. Promotes on a
    /// strictly greater value, or an equal value with a lower score id.
    ///
    /// Returns the amount actually added to the aggregate: the delta over
    /// the previous holder on promotion, 0 otherwise. Re-offering the
    /// current holder's own value is a no-op, so redelivery is safe.
    #[instrument(skip(self, score), fields(score_id = score.score_id))]
    pub async fn consider(
        &self,
        score: &ScoreSubmission,
        classic_score: u64,
    ) -> Result<u64, ProcessError> {
        let key = score.key();
        let current = self.best_scores.get(&key).await?;

        let promoted = match &current {
            None => true,
            Some(holder) => {
                classic_score > holder.classic_score
                    || (classic_score == holder.classic_score && score.score_id < holder.score_id)
            }
        };

        if !promoted {
            debug!(classic_score, "Candidate does not beat current best");
            return Ok(0);
        }

        let previous_value = current.map(|holder| holder.classic_score).unwrap_or_default();
        let delta = classic_score as i64 - previous_value as i64;

        self.best_scores
            .put(&BestScoreRecord {
                key,
                score_id: score.score_id,
                classic_score,
            })
            .await?;
        self.user_stats
            .apply_ranked_score_delta(key.user_id, key.ruleset_id, delta)
            .await?;

        debug!(classic_score, delta, "Promoted new best score");
        Ok(delta.max(0) as u64)
    }

    /// Removes a score from contention. Non-holders never contributed,
    /// so only the holder's removal touches aggregates: the subtraction
    /// and the promotion of the next best land as one signed delta.
    #[instrument(skip(self, score), fields(score_id = score.score_id))]
    pub async fn revert(
        &self,
        score: &ScoreSubmission,
        status: Option<RankedStatus>,
    ) -> Result<(), ProcessError> {
        let key = score.key();
        let Some(current) = self.best_scores.get(&key).await? else {
            return Ok(());
        };
        if current.score_id != score.score_id {
            debug!("Score is not the current best, nothing to revert");
            return Ok(());
        }

        let next_best = self.rescan(&key, score.score_id, status).await?;
        let new_value = next_best
            .as_ref()
            .map(|record| record.classic_score)
            .unwrap_or_default();
        let delta = new_value as i64 - current.classic_score as i64;

        match &next_best {
            Some(record) => self.best_scores.put(record).await?,
            None => self.best_scores.clear(&key).await?,
        }
        self.user_stats
            .apply_ranked_score_delta(key.user_id, key.ruleset_id, delta)
            .await?;

        debug!(
            old_value = current.classic_score,
            new_value, delta, "Reverted best score"
        );
        Ok(())
    }

    /// Finds the best remaining candidate for a key: eligible, already
    /// processed, not the score being reverted. Ties go to the lowest
    /// score id.
    async fn rescan(
        &self,
        key: &ScoreKey,
        excluding_score_id: u64,
        status: Option<RankedStatus>,
    ) -> Result<Option<BestScoreRecord>, ProcessError> {
        let candidates = self.scores.scores_for_key(key).await?;
        let mut best: Option<BestScoreRecord> = None;

        for candidate in candidates {
            if candidate.score_id == excluding_score_id {
                continue;
            }
            if !gate::submission_is_eligible(&candidate, status) {
                continue;
            }
            if self.ledger.get(candidate.score_id).await?.is_none() {
                continue;
            }

            let classic_score = self.converters.convert(&candidate)?;
            let better = match &best {
                None => true,
                Some(record) => {
                    classic_score > record.classic_score
                        || (classic_score == record.classic_score
                            && candidate.score_id < record.score_id)
                }
            };
            if better {
                best = Some(BestScoreRecord {
                    key: *key,
                    score_id: candidate.score_id,
                    classic_score,
                });
            }
        }

        Ok(best)
    }
}
