use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use scorekeeper::beatmaps::{InMemoryBeatmapRepository, RankedStatus};
use scorekeeper::processor::{
    InMemoryBestScoreRepository, InMemoryLedgerRepository, InMemoryUserStatsRepository,
    ScoreProcessor, UserStatsRepository, PROCESSING_VERSION,
};
use scorekeeper::scores::{HitResult, HitStatistics, InMemoryScoreRepository, ScoreSubmission};

pub const TEST_USER_ID: u32 = 2;
pub const TEST_BEATMAP_ID: u32 = 100;

/// Shared in-memory repositories plus processors pinned to arbitrary
/// accounting versions, all operating on the same state.
pub struct TestSetup {
    pub scores: Arc<InMemoryScoreRepository>,
    pub beatmaps: Arc<InMemoryBeatmapRepository>,
    pub ledger: Arc<InMemoryLedgerRepository>,
    pub best_scores: Arc<InMemoryBestScoreRepository>,
    pub user_stats: Arc<InMemoryUserStatsRepository>,
    next_score_id: AtomicU64,
}

impl Default for TestSetup {
    fn default() -> Self {
        Self::new()
    }
}

impl TestSetup {
    pub fn new() -> Self {
        Self {
            scores: Arc::new(InMemoryScoreRepository::new()),
            beatmaps: Arc::new(InMemoryBeatmapRepository::new()),
            ledger: Arc::new(InMemoryLedgerRepository::new()),
            best_scores: Arc::new(InMemoryBestScoreRepository::new()),
            user_stats: Arc::new(InMemoryUserStatsRepository::new()),
            next_score_id: AtomicU64::new(1),
        }
    }

    pub fn add_beatmap(&self, beatmap_id: u32, status: RankedStatus) {
        self.beatmaps.set_status(beatmap_id, status);
    }

    pub fn processor(&self) -> ScoreProcessor {
        self.processor_at_version(PROCESSING_VERSION)
    }

    pub fn processor_at_version(&self, version: u16) -> ScoreProcessor {
        ScoreProcessor::builder(
            self.scores.clone(),
            self.beatmaps.clone(),
            self.ledger.clone(),
            self.best_scores.clone(),
            self.user_stats.clone(),
        )
        .with_version(version)
        .build()
    }

    pub fn next_score_id(&self) -> u64 {
        self.next_score_id.fetch_add(1, Ordering::SeqCst)
    }

    pub async fn ranked_score(&self, user_id: u32, ruleset_id: u16) -> u64 {
        self.user_stats
            .get(user_id, ruleset_id)
            .await
            .unwrap()
            .ranked_score
    }
}

/// Builds submissions with the reference defaults: five Greats and a
/// standardised total of 100,000, passing and ranked.
pub struct SubmissionBuilder {
    submission: ScoreSubmission,
}

impl SubmissionBuilder {
    pub fn new(score_id: u64) -> Self {
        Self {
            submission: ScoreSubmission {
                score_id,
                user_id: TEST_USER_ID,
                beatmap_id: TEST_BEATMAP_ID,
                ruleset_id: 0,
                passed: true,
                ranked: true,
                statistics: [(HitResult::Great, 5)].into_iter().collect::<HitStatistics>(),
                accuracy: 1.0,
                max_combo: 5,
                total_score: 100_000,
                created_at: Utc::now(),
            },
        }
    }

    pub fn beatmap(mut self, beatmap_id: u32) -> Self {
        self.submission.beatmap_id = beatmap_id;
        self
    }

    pub fn ruleset(mut self, ruleset_id: u16) -> Self {
        self.submission.ruleset_id = ruleset_id;
        self
    }

    pub fn passed(mut self, passed: bool) -> Self {
        self.submission.passed = passed;
        self
    }

    pub fn ranked(mut self, ranked: bool) -> Self {
        self.submission.ranked = ranked;
        self
    }

    pub fn total_score(mut self, total_score: u32) -> Self {
        self.submission.total_score = total_score;
        self
    }

    pub fn statistics<I>(mut self, statistics: I) -> Self
    where
        I: IntoIterator<Item = (HitResult, u32)>,
    {
        self.submission.statistics = statistics.into_iter().collect();
        self
    }

    /// The reference "worse" attempt: half the total with downgraded
    /// judgements, converting to 5041 on the osu ruleset.
    pub fn reduced(self) -> Self {
        self.total_score(50_000)
            .statistics([(HitResult::Perfect, 0), (HitResult::Ok, 5)])
    }

    pub fn build(self) -> ScoreSubmission {
        self.submission
    }
}
