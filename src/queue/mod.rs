pub mod worker;

pub use worker::spawn_workers;

use tokio::sync::mpsc;
use tracing::debug;

use crate::processor::ProcessError;
use crate::scores::ScoreSubmission;

/// Sending half of the score intake queue.
///
/// The queue is the process-local edge of the externally ordered event
/// stream; delivery guarantees beyond at-least-once are the transport's
/// concern.
#[derive(Clone)]
pub struct ScoreQueue {
    sender: mpsc::Sender<ScoreSubmission>,
}

impl ScoreQueue {
    /// Creates a bounded queue, returning the handle used to enqueue and
    /// the receiver the worker pool consumes.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ScoreSubmission>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    pub async fn enqueue(&self, submission: ScoreSubmission) -> Result<(), ProcessError> {
        debug!(score_id = submission.score_id, "Enqueueing score");
        self.sender
            .send(submission)
            .await
            .map_err(|_| ProcessError::QueueClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scores::{HitResult, HitStatistics};
    use chrono::Utc;

    fn submission(score_id: u64) -> ScoreSubmission {
        ScoreSubmission {
            score_id,
            user_id: 2,
            beatmap_id: 100,
            ruleset_id: 0,
            passed: true,
            ranked: true,
            statistics: [(HitResult::Great, 5)].into_iter().collect::<HitStatistics>(),
            accuracy: 1.0,
            max_combo: 5,
            total_score: 100_000,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn enqueued_scores_reach_the_receiver() {
        let (queue, mut receiver) = ScoreQueue::new(8);
        queue.enqueue(submission(1)).await.unwrap();
        queue.enqueue(submission(2)).await.unwrap();

        assert_eq!(receiver.recv().await.unwrap().score_id, 1);
        assert_eq!(receiver.recv().await.unwrap().score_id, 2);
    }

    #[tokio::test]
    async fn enqueue_after_receiver_dropped_reports_closed() {
        let (queue, receiver) = ScoreQueue::new(8);
        drop(receiver);

        let result = queue.enqueue(submission(1)).await;
        assert!(matches!(result, Err(ProcessError::QueueClosed)));
    }
}
