use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("No converter registered for ruleset {ruleset_id}")]
    UnsupportedRuleset { ruleset_id: u16 },

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    #[error("Score {score_id} is stuck in reverted state and could not be reapplied")]
    CorruptLedger { score_id: u64 },

    #[error("Score queue is closed")]
    QueueClosed,
}
