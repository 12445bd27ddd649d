use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::processor::ScoreProcessor;
use crate::scores::ScoreSubmission;

/// Spawns the worker pool consuming the score queue.
///
/// Workers share the receiver; each submission is taken by exactly one
/// worker. Ordering within a key is the processor's job (per-key locks),
/// so the pool itself can drain freely. A failing score is logged and
/// dropped; the stream keeps flowing.
pub fn spawn_workers(
    processor: Arc<ScoreProcessor>,
    receiver: mpsc::Receiver<ScoreSubmission>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    info!(workers = count, "Starting score processing workers");

    let receiver = Arc::new(AsyncMutex::new(receiver));

    (0..count)
        .map(|worker_id| {
            let processor = processor.clone();
            let receiver = receiver.clone();

            tokio::spawn(async move {
                loop {
                    let next = { receiver.lock().await.recv().await };

                    match next {
                        Some(submission) => {
                            let score_id = submission.score_id;
                            match processor.process(&submission).await {
                                Ok(()) => debug!(worker_id, score_id, "Score processed"),
                                Err(err) => {
                                    error!(
                                        worker_id,
                                        score_id,
                                        error = %err,
                                        "Failed to process score"
                                    );
                                }
                            }
                        }
                        None => break,
                    }
                }

                info!(worker_id, "Score worker stopped");
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beatmaps::{InMemoryBeatmapRepository, RankedStatus};
    use crate::processor::{
        InMemoryBestScoreRepository, InMemoryLedgerRepository, InMemoryUserStatsRepository,
        UserStatsRepository,
    };
    use crate::queue::ScoreQueue;
    use crate::scores::{HitResult, HitStatistics, InMemoryScoreRepository};
    use chrono::Utc;

    fn submission(score_id: u64, beatmap_id: u32) -> ScoreSubmission {
        ScoreSubmission {
            score_id,
            user_id: 2,
            beatmap_id,
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
    async fn pool_drains_queue_and_applies_scores() {
        let scores = Arc::new(InMemoryScoreRepository::new());
        let beatmaps = Arc::new(InMemoryBeatmapRepository::new());
        let ledger = Arc::new(InMemoryLedgerRepository::new());
        let best_scores = Arc::new(InMemoryBestScoreRepository::new());
        let user_stats = Arc::new(InMemoryUserStatsRepository::new());
        beatmaps.set_status(100, RankedStatus::Ranked);
        beatmaps.set_status(101, RankedStatus::Ranked);

        let processor = Arc::new(
            ScoreProcessor::builder(
                scores,
                beatmaps,
                ledger,
                best_scores,
                user_stats.clone(),
            )
            .build(),
        );

        let (queue, receiver) = ScoreQueue::new(8);
        let handles = spawn_workers(processor, receiver, 2);

        queue.enqueue(submission(1, 100)).await.unwrap();
        queue.enqueue(submission(2, 101)).await.unwrap();
        // An unknown ruleset fails that score alone; the pool keeps going.
        let mut broken = submission(3, 100);
        broken.ruleset_id = 99;
        queue.enqueue(broken).await.unwrap();

        drop(queue);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(user_stats.get(2, 0).await.unwrap().ranked_score, 20_162);
    }
}
