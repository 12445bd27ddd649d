use crate::beatmaps::RankedStatus;
use crate::scores::ScoreSubmission;

/// Decides whether a submission may affect aggregates at all.
///
/// A failing condition is an ordinary skip, never an error: non-passing
/// and unranked submissions are expected traffic. A beatmap missing from
/// the catalog is treated the same as an unranked one.
pub fn submission_is_eligible(score: &ScoreSubmission, status: Option<RankedStatus>) -> bool {
    score.passed
        && score.ranked
        && status.is_some_and(RankedStatus::awards_ranked_score)
}
