use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::errors::ProcessError;

/// Per (user, ruleset) aggregate counters, readable by external
/// consumers at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: u32,
    pub ruleset_id: u16,
    pub ranked_score: u64,
}

impl UserStats {
    pub fn zero(user_id: u32, ruleset_id: u16) -> Self {
        Self {
            user_id,
            ruleset_id,
            ranked_score: 0,
        }
    }
}

/// Accessor for aggregate counters. The best-contribution selector is
/// the sole writer; each delta application is one atomic unit, so
/// readers never observe a half-finished revert/reapply pair.
#[async_trait]
pub trait UserStatsRepository: Send + Sync {
    /// Returns the stored row, or an all-zero row for users that have
    /// never contributed.
    async fn get(&self, user_id: u32, ruleset_id: u16) -> Result<UserStats, ProcessError>;
    async fn apply_ranked_score_delta(
        &self,
        user_id: u32,
        ruleset_id: u16,
        delta: i64,
    ) -> Result<(), ProcessError>;
}

/// In-memory implementation of UserStatsRepository for development and testing
pub struct InMemoryUserStatsRepository {
    rows: Mutex<HashMap<(u32, u16), u64>>,
}

impl Default for InMemoryUserStatsRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryUserStatsRepository {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl UserStatsRepository for InMemoryUserStatsRepository {
    #[instrument(skip(self))]
    async fn get(&self, user_id: u32, ruleset_id: u16) -> Result<UserStats, ProcessError> {
        let rows = self.rows.lock().unwrap();
        let ranked_score = rows.get(&(user_id, ruleset_id)).copied().unwrap_or_default();
        Ok(UserStats {
            user_id,
            ruleset_id,
            ranked_score,
        })
    }

    #[instrument(skip(self))]
    async fn apply_ranked_score_delta(
        &self,
        user_id: u32,
        ruleset_id: u16,
        delta: i64,
    ) -> Result<(), ProcessError> {
        if delta == 0 {
            return Ok(());
        }

        let mut rows = self.rows.lock().unwrap();
        let counter = rows.entry((user_id, ruleset_id)).or_default();
        *counter = counter.checked_add_signed(delta).ok_or_else(|| {
            warn!(user_id, ruleset_id, delta, "Ranked score delta underflowed");
            ProcessError::Repository(format!(
                "Ranked score underflow for user {user_id} ruleset {ruleset_id}"
            ))
        })?;

        debug!(
            user_id,
            ruleset_id,
            delta,
            ranked_score = *counter,
            "Applied ranked score delta in memory"
        );
        Ok(())
    }
}

/// PostgreSQL implementation of UserStatsRepository
pub struct PostgresUserStatsRepository {
    pool: PgPool,
}

impl PostgresUserStatsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStatsRepository for PostgresUserStatsRepository {
    #[instrument(skip(self))]
    async fn get(&self, user_id: u32, ruleset_id: u16) -> Result<UserStats, ProcessError> {
        let row = sqlx::query(
            "SELECT ranked_score FROM user_stats WHERE user_id = $1 AND ruleset_id = $2",
        )
        .bind(user_id as i64)
        .bind(ruleset_id as i16)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, user_id, ruleset_id, "Failed to fetch user stats from database");
            ProcessError::Repository(e.to_string())
        })?;

        Ok(match row {
            Some(row) => UserStats {
                user_id,
                ruleset_id,
                ranked_score: row.get::<i64, _>("ranked_score") as u64,
            },
            None => UserStats::zero(user_id, ruleset_id),
        })
    }

    // A single upsert statement; the row-level write is the atomic unit
    // concurrent readers are allowed to observe.
    #[instrument(skip(self))]
    async fn apply_ranked_score_delta(
        &self,
        user_id: u32,
        ruleset_id: u16,
        delta: i64,
    ) -> Result<(), ProcessError> {
        if delta == 0 {
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO user_stats (user_id, ruleset_id, ranked_score) \
             VALUES ($1, $2, GREATEST($3, 0)) \
             ON CONFLICT (user_id, ruleset_id) \
             DO UPDATE SET ranked_score = user_stats.ranked_score + $3",
        )
        .bind(user_id as i64)
        .bind(ruleset_id as i16)
        .bind(delta)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, user_id, ruleset_id, delta, "Failed to apply ranked score delta");
            ProcessError::Repository(e.to_string())
        })?;

        debug!(user_id, ruleset_id, delta, "Applied ranked score delta in database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_user_reads_as_zero() {
        let repo = InMemoryUserStatsRepository::new();
        let stats = repo.get(2, 0).await.unwrap();
        assert_eq!(stats.ranked_score, 0);
    }

    #[tokio::test]
    async fn deltas_accumulate_per_user_and_ruleset() {
        let repo = InMemoryUserStatsRepository::new();
        repo.apply_ranked_score_delta(2, 0, 10_081).await.unwrap();
        repo.apply_ranked_score_delta(2, 0, 5_041).await.unwrap();
        repo.apply_ranked_score_delta(2, 3, 100_000).await.unwrap();

        assert_eq!(repo.get(2, 0).await.unwrap().ranked_score, 15_122);
        assert_eq!(repo.get(2, 3).await.unwrap().ranked_score, 100_000);
        assert_eq!(repo.get(7, 0).await.unwrap().ranked_score, 0);
    }

    #[tokio::test]
    async fn negative_delta_subtracts() {
        let repo = InMemoryUserStatsRepository::new();
        repo.apply_ranked_score_delta(2, 0, 10_081).await.unwrap();
        repo.apply_ranked_score_delta(2, 0, -5_040).await.unwrap();

        assert_eq!(repo.get(2, 0).await.unwrap().ranked_score, 5_041);
    }

    #[tokio::test]
    async fn underflow_is_reported_not_wrapped() {
        let repo = InMemoryUserStatsRepository::new();
        repo.apply_ranked_score_delta(2, 0, 100).await.unwrap();

        let result = repo.apply_ranked_score_delta(2, 0, -200).await;
        assert!(matches!(result, Err(ProcessError::Repository(_))));
    }
}
