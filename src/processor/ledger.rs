use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::errors::ProcessError;

/// Where a ledger row sits in the revert-then-reapply cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerState {
    /// The recorded version's contribution is fully applied.
    Applied,
    /// The row was marked for revert but its reapply has not committed.
    /// Rows found in this state on startup must be re-driven before the
    /// key serves new events.
    Reverting,
}

impl LedgerState {
    fn code(self) -> i16 {
        match self {
            LedgerState::Applied => 0,
            LedgerState::Reverting => 1,
        }
    }

    fn from_code(code: i16) -> Result<Self, ProcessError> {
        match code {
            0 => Ok(LedgerState::Applied),
            1 => Ok(LedgerState::Reverting),
            other => Err(ProcessError::Repository(format!(
                "Unknown ledger state code {other}"
            ))),
        }
    }
}

/// Durable record of the last processing outcome for one score.
///
/// Created on first successful processing, updated (never deleted) on
/// every reprocess. `contributed_score` is the amount the score actually
/// added to aggregates when it was considered; 0 if it never won its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedContribution {
    pub score_id: u64,
    pub version: u16,
    pub contributed_score: u64,
    pub state: LedgerState,
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn get(&self, score_id: u64) -> Result<Option<ProcessedContribution>, ProcessError>;
    async fn upsert(&self, entry: &ProcessedContribution) -> Result<(), ProcessError>;
    /// All rows stuck in `Reverting`, i.e. scores whose reapply never
    /// committed. Drained by startup recovery.
    async fn pending_reapply(&self) -> Result<Vec<ProcessedContribution>, ProcessError>;
}

/// In-memory implementation of LedgerRepository for development and testing
pub struct InMemoryLedgerRepository {
    entries: Mutex<HashMap<u64, ProcessedContribution>>,
}

impl Default for InMemoryLedgerRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedgerRepository {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerRepository {
    #[instrument(skip(self))]
    async fn get(&self, score_id: u64) -> Result<Option<ProcessedContribution>, ProcessError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(&score_id).cloned())
    }

    #[instrument(skip(self, entry))]
    async fn upsert(&self, entry: &ProcessedContribution) -> Result<(), ProcessError> {
        debug!(
            score_id = entry.score_id,
            version = entry.version,
            state = ?entry.state,
            "Writing ledger entry in memory"
        );

        let mut entries = self.entries.lock().unwrap();
        entries.insert(entry.score_id, entry.clone());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn pending_reapply(&self) -> Result<Vec<ProcessedContribution>, ProcessError> {
        let entries = self.entries.lock().unwrap();
        let mut pending: Vec<ProcessedContribution> = entries
            .values()
            .filter(|entry| entry.state == LedgerState::Reverting)
            .cloned()
            .collect();
        pending.sort_by_key(|entry| entry.score_id);
        Ok(pending)
    }
}

/// PostgreSQL implementation of LedgerRepository
pub struct PostgresLedgerRepository {
    pool: PgPool,
}

impl PostgresLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn entry_from_row(row: &sqlx::postgres::PgRow) -> Result<ProcessedContribution, ProcessError> {
        Ok(ProcessedContribution {
            score_id: row.get::<i64, _>("score_id") as u64,
            version: row.get::<i16, _>("processed_version") as u16,
            contributed_score: row.get::<i64, _>("contributed_score") as u64,
            state: LedgerState::from_code(row.get("state"))?,
        })
    }
}

#[async_trait]
impl LedgerRepository for PostgresLedgerRepository {
    #[instrument(skip(self))]
    async fn get(&self, score_id: u64) -> Result<Option<ProcessedContribution>, ProcessError> {
        let row = sqlx::query(
            "SELECT score_id, processed_version, contributed_score, state \
             FROM score_process_history WHERE score_id = $1",
        )
        .bind(score_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, score_id, "Failed to fetch ledger entry from database");
            ProcessError::Repository(e.to_string())
        })?;

        row.as_ref().map(Self::entry_from_row).transpose()
    }

    #[instrument(skip(self, entry))]
    async fn upsert(&self, entry: &ProcessedContribution) -> Result<(), ProcessError> {
        debug!(
            score_id = entry.score_id,
            version = entry.version,
            state = ?entry.state,
            "Writing ledger entry in database"
        );

        sqlx::query(
            "INSERT INTO score_process_history (score_id, processed_version, contributed_score, state) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (score_id) DO UPDATE SET processed_version = EXCLUDED.processed_version, \
             contributed_score = EXCLUDED.contributed_score, state = EXCLUDED.state",
        )
        .bind(entry.score_id as i64)
        .bind(entry.version as i16)
        .bind(entry.contributed_score as i64)
        .bind(entry.state.code())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, score_id = entry.score_id, "Failed to write ledger entry to database");
            ProcessError::Repository(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn pending_reapply(&self) -> Result<Vec<ProcessedContribution>, ProcessError> {
        let rows = sqlx::query(
            "SELECT score_id, processed_version, contributed_score, state \
             FROM score_process_history WHERE state = $1 ORDER BY score_id",
        )
        .bind(LedgerState::Reverting.code())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to fetch pending ledger entries from database");
            ProcessError::Repository(e.to_string())
        })?;

        rows.iter().map(Self::entry_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(score_id: u64, version: u16, state: LedgerState) -> ProcessedContribution {
        ProcessedContribution {
            score_id,
            version,
            contributed_score: 10_081,
            state,
        }
    }

    #[tokio::test]
    async fn get_returns_none_for_unprocessed_score() {
        let repo = InMemoryLedgerRepository::new();
        assert!(repo.get(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_entry() {
        let repo = InMemoryLedgerRepository::new();
        repo.upsert(&entry(1, 1, LedgerState::Applied)).await.unwrap();
        repo.upsert(&entry(1, 2, LedgerState::Applied)).await.unwrap();

        let stored = repo.get(1).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn pending_reapply_lists_only_reverting_entries() {
        let repo = InMemoryLedgerRepository::new();
        repo.upsert(&entry(3, 2, LedgerState::Reverting)).await.unwrap();
        repo.upsert(&entry(1, 1, LedgerState::Applied)).await.unwrap();
        repo.upsert(&entry(2, 2, LedgerState::Reverting)).await.unwrap();

        let pending = repo.pending_reapply().await.unwrap();
        let ids: Vec<u64> = pending.iter().map(|e| e.score_id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn state_codes_round_trip() {
        for state in [LedgerState::Applied, LedgerState::Reverting] {
            assert_eq!(LedgerState::from_code(state.code()).unwrap(), state);
        }
        assert!(LedgerState::from_code(7).is_err());
    }
}
