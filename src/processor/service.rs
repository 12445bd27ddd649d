use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use super::best::{BestScoreRepository, BestScoreSelector};
use super::conversion::ConverterRegistry;
use super::errors::ProcessError;
use super::gate;
use super::ledger::{LedgerRepository, LedgerState, ProcessedContribution};
use super::stats::UserStatsRepository;
use crate::beatmaps::BeatmapRepository;
use crate::scores::{ScoreKey, ScoreRepository, ScoreSubmission};

/// Version of the accounting rules baked into this build. Bumping it
/// causes every redelivered score to be reverted and reapplied under the
/// new rules.
pub const PROCESSING_VERSION: u16 = 1;

/// Retry policy for storage conflicts. Backoff doubles per attempt with
/// jitter on top; the attempt cap keeps latency bounded.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(20),
        }
    }
}

/// The reprocessing controller: decides per score whether to skip,
/// first-apply, or revert-then-reapply, and owns per-key serialization.
pub struct ScoreProcessor {
    version: u16,
    scores: Arc<dyn ScoreRepository>,
    beatmaps: Arc<dyn BeatmapRepository>,
    ledger: Arc<dyn LedgerRepository>,
    converters: Arc<ConverterRegistry>,
    selector: BestScoreSelector,
    retry: RetryConfig,
    key_locks: Arc<RwLock<HashMap<ScoreKey, Arc<AsyncMutex<()>>>>>,
}

impl ScoreProcessor {
    pub fn builder(
        scores: Arc<dyn ScoreRepository>,
        beatmaps: Arc<dyn BeatmapRepository>,
        ledger: Arc<dyn LedgerRepository>,
        best_scores: Arc<dyn BestScoreRepository>,
        user_stats: Arc<dyn UserStatsRepository>,
    ) -> ScoreProcessorBuilder {
        ScoreProcessorBuilder::new(scores, beatmaps, ledger, best_scores, user_stats)
    }

    /// Runs one submission through the accounting state machine.
    ///
    /// Safe under redelivery: a score already processed at this version is
    /// a no-op. All operations for the score's key run under the key lock,
    /// so concurrent workers only ever contend across keys in storage.
    #[instrument(skip(self, submission), fields(score_id = submission.score_id))]
    pub async fn process(&self, submission: &ScoreSubmission) -> Result<(), ProcessError> {
        let lock = self.key_lock(&submission.key()).await;
        let _guard = lock.lock().await;

        let mut attempt = 0;
        loop {
            match self.process_locked(submission).await {
                Err(ProcessError::StorageConflict(reason)) if attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        score_id = submission.score_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Storage conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn process_locked(&self, submission: &ScoreSubmission) -> Result<(), ProcessError> {
        // The raw submission is persisted first so later rescans of the
        // key can see it; redelivery overwrites the same row.
        self.scores.record_score(submission).await?;

        let existing = self.ledger.get(submission.score_id).await?;
        if let Some(entry) = &existing {
            if entry.state == LedgerState::Applied && entry.version >= self.version {
                debug!(
                    version = entry.version,
                    "Score already processed at current version"
                );
                return Ok(());
            }
        }

        let status = self.beatmaps.ranked_status(submission.beatmap_id).await?;
        let eligible = gate::submission_is_eligible(submission, status);

        match existing {
            None => {
                if !eligible {
                    debug!("Submission failed the validity gate, skipping");
                    return Ok(());
                }

                let classic_score = self.converters.convert(submission)?;
                let added = self.selector.consider(submission, classic_score).await?;
                self.ledger
                    .upsert(&ProcessedContribution {
                        score_id: submission.score_id,
                        version: self.version,
                        contributed_score: added,
                        state: LedgerState::Applied,
                    })
                    .await?;
                debug!(classic_score, added, "Score processed");
            }
            Some(entry) => {
                // Mark the row before any aggregate mutation: a crash
                // mid-revert leaves a detectable, resumable state.
                self.ledger
                    .upsert(&ProcessedContribution {
                        state: LedgerState::Reverting,
                        ..entry.clone()
                    })
                    .await?;

                // Revert must complete before reapply so the next-best
                // rescan excludes this score while it held the key.
                self.selector.revert(submission, status).await?;

                let added = if eligible {
                    let classic_score = self.converters.convert(submission)?;
                    self.selector.consider(submission, classic_score).await?
                } else {
                    debug!("Reprocessed submission is no longer eligible, revert only");
                    0
                };

                self.ledger
                    .upsert(&ProcessedContribution {
                        score_id: submission.score_id,
                        version: self.version.max(entry.version),
                        contributed_score: added,
                        state: LedgerState::Applied,
                    })
                    .await?;
                debug!(
                    old_version = entry.version,
                    new_version = self.version.max(entry.version),
                    added,
                    "Score reprocessed"
                );
            }
        }

        Ok(())
    }

    /// Re-drives every score left in the reverted-pending-reapply state
    /// by an earlier crash. Must run to completion before workers start
    /// consuming new events.
    #[instrument(skip(self))]
    pub async fn recover_pending(&self) -> Result<usize, ProcessError> {
        let pending = self.ledger.pending_reapply().await?;
        if pending.is_empty() {
            return Ok(0);
        }

        info!(count = pending.len(), "Recovering scores left mid-reprocess");

        for entry in &pending {
            let score = self
                .scores
                .get_score(entry.score_id)
                .await?
                .ok_or(ProcessError::CorruptLedger {
                    score_id: entry.score_id,
                })?;

            if let Err(err) = self.process(&score).await {
                error!(
                    score_id = entry.score_id,
                    error = %err,
                    "Failed to re-drive score during recovery"
                );
                return Err(ProcessError::CorruptLedger {
                    score_id: entry.score_id,
                });
            }
        }

        info!(count = pending.len(), "Recovery complete");
        Ok(pending.len())
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self.retry.base_delay.saturating_mul(1 << attempt.min(8));
        let jitter = rand::rng().random_range(0..=exponential.as_millis() as u64 / 2);
        exponential + Duration::from_millis(jitter)
    }

    async fn key_lock(&self, key: &ScoreKey) -> Arc<AsyncMutex<()>> {
        {
            let guard = self.key_locks.read().await;
            if let Some(lock) = guard.get(key) {
                return lock.clone();
            }
        }

        let mut guard = self.key_locks.write().await;
        guard
            .entry(*key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

pub struct ScoreProcessorBuilder {
    version: u16,
    scores: Arc<dyn ScoreRepository>,
    beatmaps: Arc<dyn BeatmapRepository>,
    ledger: Arc<dyn LedgerRepository>,
    best_scores: Arc<dyn BestScoreRepository>,
    user_stats: Arc<dyn UserStatsRepository>,
    converters: ConverterRegistry,
    retry: RetryConfig,
}

impl ScoreProcessorBuilder {
    fn new(
        scores: Arc<dyn ScoreRepository>,
        beatmaps: Arc<dyn BeatmapRepository>,
        ledger: Arc<dyn LedgerRepository>,
        best_scores: Arc<dyn BestScoreRepository>,
        user_stats: Arc<dyn UserStatsRepository>,
    ) -> Self {
        Self {
            version: PROCESSING_VERSION,
            scores,
            beatmaps,
            ledger,
            best_scores,
            user_stats,
            converters: ConverterRegistry::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Overrides the accounting version. Tests use this to force the
    /// revert-then-reapply path.
    pub fn with_version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    pub fn with_converter(
        mut self,
        ruleset_id: u16,
        converter: super::conversion::ClassicConverter,
    ) -> Self {
        self.converters.register(ruleset_id, converter);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> ScoreProcessor {
        let converters = Arc::new(self.converters);
        let selector = BestScoreSelector::new(
            self.best_scores,
            self.user_stats,
            self.scores.clone(),
            self.ledger.clone(),
            converters.clone(),
        );

        ScoreProcessor {
            version: self.version,
            scores: self.scores,
            beatmaps: self.beatmaps,
            ledger: self.ledger,
            converters,
            selector,
            retry: self.retry,
            key_locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}
