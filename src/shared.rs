use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::processor::{LedgerRepository, ProcessError, UserStatsRepository};
use crate::queue::ScoreQueue;

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub queue: ScoreQueue,
    pub user_stats: Arc<dyn UserStatsRepository>,
    pub ledger: Arc<dyn LedgerRepository>,
}

impl AppState {
    pub fn new(
        queue: ScoreQueue,
        user_stats: Arc<dyn UserStatsRepository>,
        ledger: Arc<dyn LedgerRepository>,
    ) -> Self {
        Self {
            queue,
            user_stats,
            ledger,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error")]
    Internal,
}

impl From<ProcessError> for AppError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::QueueClosed => AppError::Unavailable("Score intake is stopped".into()),
            ProcessError::Repository(msg) | ProcessError::StorageConflict(msg) => {
                AppError::DatabaseError(msg)
            }
            ProcessError::UnsupportedRuleset { .. } | ProcessError::CorruptLedger { .. } => {
                AppError::Internal
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::DatabaseError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Database error: {}", msg),
            ),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}
