use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display, EnumIter};

/// Judgement tiers a single hit object can resolve to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HitResult {
    Miss,
    Meh,
    Ok,
    Good,
    Great,
    Perfect,
    SmallTickMiss,
    SmallTickHit,
    LargeTickMiss,
    LargeTickHit,
    SmallBonus,
    LargeBonus,
}

impl HitResult {
    /// Whether this result stands for a full hit object. Tick and bonus
    /// results are auxiliary judgements and do not count as objects.
    pub fn is_combo_object(self) -> bool {
        matches!(
            self,
            HitResult::Miss
                | HitResult::Meh
                | HitResult::Ok
                | HitResult::Good
                | HitResult::Great
                | HitResult::Perfect
                | HitResult::LargeTickMiss
                | HitResult::LargeTickHit
        )
    }
}

/// Per-result judgement counts for one gameplay attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HitStatistics(pub BTreeMap<HitResult, u32>);

impl HitStatistics {
    /// Number of full hit objects the attempt covered.
    pub fn object_count(&self) -> u32 {
        self.0
            .iter()
            .filter(|(result, _)| result.is_combo_object())
            .map(|(_, count)| *count)
            .sum()
    }

    pub fn count(&self, result: HitResult) -> u32 {
        self.0.get(&result).copied().unwrap_or_default()
    }
}

impl FromIterator<(HitResult, u32)> for HitStatistics {
    fn from_iter<T: IntoIterator<Item = (HitResult, u32)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Identity of the aggregation bucket a score competes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScoreKey {
    pub user_id: u32,
    pub beatmap_id: u32,
    pub ruleset_id: u16,
}

/// One gameplay attempt as delivered by the score submission pipeline.
///
/// Immutable from the processor's point of view; all processing metadata
/// lives in the ledger, keyed by `score_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSubmission {
    pub score_id: u64,
    pub user_id: u32,
    pub beatmap_id: u32,
    pub ruleset_id: u16,
    pub passed: bool,
    /// Whether the attempt itself is allowed to award ranked score
    /// (e.g. not invalidated by unranked mods).
    pub ranked: bool,
    pub statistics: HitStatistics,
    pub accuracy: f64,
    pub max_combo: u32,
    pub total_score: u32,
    pub created_at: DateTime<Utc>,
}

impl ScoreSubmission {
    pub fn key(&self) -> ScoreKey {
        ScoreKey {
            user_id: self.user_id,
            beatmap_id: self.beatmap_id,
            ruleset_id: self.ruleset_id,
        }
    }
}
