use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use super::models::RankedStatus;
use crate::processor::ProcessError;

/// Read-only view of the beatmap catalog. The processor only ever needs
/// the approval state.
#[async_trait]
pub trait BeatmapRepository: Send + Sync {
    /// Returns `None` for beatmaps unknown to the catalog.
    async fn ranked_status(&self, beatmap_id: u32) -> Result<Option<RankedStatus>, ProcessError>;
}

/// In-memory implementation of BeatmapRepository for development and testing
pub struct InMemoryBeatmapRepository {
    statuses: std::sync::Mutex<HashMap<u32, RankedStatus>>,
}

impl Default for InMemoryBeatmapRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBeatmapRepository {
    pub fn new() -> Self {
        Self {
            statuses: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn set_status(&self, beatmap_id: u32, status: RankedStatus) {
        self.statuses.lock().unwrap().insert(beatmap_id, status);
    }
}

#[async_trait]
impl BeatmapRepository for InMemoryBeatmapRepository {
    #[instrument(skip(self))]
    async fn ranked_status(&self, beatmap_id: u32) -> Result<Option<RankedStatus>, ProcessError> {
        let statuses = self.statuses.lock().unwrap();
        Ok(statuses.get(&beatmap_id).copied())
    }
}

/// PostgreSQL implementation of BeatmapRepository
pub struct PostgresBeatmapRepository {
    pool: PgPool,
}

impl PostgresBeatmapRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BeatmapRepository for PostgresBeatmapRepository {
    #[instrument(skip(self))]
    async fn ranked_status(&self, beatmap_id: u32) -> Result<Option<RankedStatus>, ProcessError> {
        let row = sqlx::query("SELECT approved FROM beatmaps WHERE beatmap_id = $1")
            .bind(beatmap_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                warn!(error = %e, beatmap_id, "Failed to fetch beatmap status from database");
                ProcessError::Repository(e.to_string())
            })?;

        match row {
            Some(row) => {
                let code: i16 = row.get("approved");
                let status = RankedStatus::from_repr(code).ok_or_else(|| {
                    warn!(beatmap_id, code, "Unknown beatmap approval code");
                    ProcessError::Repository(format!(
                        "Unknown approval code {code} for beatmap {beatmap_id}"
                    ))
                })?;
                Ok(Some(status))
            }
            None => {
                debug!(beatmap_id, "Beatmap not found in catalog");
                Ok(None)
            }
        }
    }
}

/// Read-through cache over another BeatmapRepository.
///
/// Approval states change rarely relative to score throughput; every
/// submission triggers a lookup, so the cache keeps the catalog off the
/// hot path. Negative results are cached too.
pub struct CachedBeatmapRepository {
    inner: Arc<dyn BeatmapRepository>,
    cache: RwLock<HashMap<u32, Option<RankedStatus>>>,
}

impl CachedBeatmapRepository {
    pub fn new(inner: Arc<dyn BeatmapRepository>) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl BeatmapRepository for CachedBeatmapRepository {
    async fn ranked_status(&self, beatmap_id: u32) -> Result<Option<RankedStatus>, ProcessError> {
        {
            let cache = self.cache.read().await;
            if let Some(status) = cache.get(&beatmap_id) {
                return Ok(*status);
            }
        }

        let status = self.inner.ranked_status(beatmap_id).await?;

        let mut cache = self.cache.write().await;
        cache.insert(beatmap_id, status);
        Ok(status)
    }
}
