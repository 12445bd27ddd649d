use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::{info, instrument};

use crate::processor::{ProcessedContribution, UserStats};
use crate::scores::ScoreSubmission;
use crate::shared::{AppError, AppState};

/// HTTP handler for submitting a score for processing
///
/// POST /scores
/// Accepts the submission and returns 202; accounting happens on the
/// worker pool.
#[instrument(name = "submit_score", skip(state, submission), fields(score_id = submission.score_id))]
pub async fn submit_score(
    State(state): State<AppState>,
    Json(submission): Json<ScoreSubmission>,
) -> Result<StatusCode, AppError> {
    info!(
        user_id = submission.user_id,
        beatmap_id = submission.beatmap_id,
        ruleset_id = submission.ruleset_id,
        "Score submitted"
    );

    state.queue.enqueue(submission).await?;
    Ok(StatusCode::ACCEPTED)
}

/// HTTP handler for reading a user's aggregate statistics
///
/// GET /users/{user_id}/stats/{ruleset_id}
/// Users without any contribution read as an all-zero row.
#[instrument(name = "get_user_stats", skip(state))]
pub async fn get_user_stats(
    State(state): State<AppState>,
    Path((user_id, ruleset_id)): Path<(u32, u16)>,
) -> Result<Json<UserStats>, AppError> {
    let stats = state.user_stats.get(user_id, ruleset_id).await?;
    Ok(Json(stats))
}

/// HTTP handler for auditing a score's processing record
///
/// GET /scores/{score_id}/status
/// 404 until the score has been processed at least once.
#[instrument(name = "get_score_status", skip(state))]
pub async fn get_score_status(
    State(state): State<AppState>,
    Path(score_id): Path<u64>,
) -> Result<Json<ProcessedContribution>, AppError> {
    let entry = state
        .ledger
        .get(score_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Score {score_id} has not been processed")))?;

    Ok(Json(entry))
}
