use axum::{
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scorekeeper::api;
use scorekeeper::beatmaps::InMemoryBeatmapRepository;
use scorekeeper::maintenance::{self, MigrateScoresArgs, PostgresLegacyScoreRepository};
use scorekeeper::processor::{
    InMemoryBestScoreRepository, InMemoryLedgerRepository, InMemoryUserStatsRepository,
    ScoreProcessor,
};
use scorekeeper::queue::{spawn_workers, ScoreQueue};
use scorekeeper::scores::{InMemoryScoreRepository, PostgresScoreRepository};
use scorekeeper::shared::AppState;

#[derive(Parser)]
#[command(name = "scorekeeper", about = "Ranked score statistics processor")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the processor and its HTTP surface (the default).
    Serve(ServeArgs),
    /// Migrate scores from the legacy score table into the current one.
    MigrateScores(MigrateScoresArgs),
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Address the HTTP surface binds to.
    #[arg(long, default_value = "0.0.0.0:3000")]
    bind: String,

    /// Number of concurrent score processing workers.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Capacity of the score intake queue.
    #[arg(long, default_value_t = 1024)]
    queue_capacity: usize,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scorekeeper=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::MigrateScores(args)) => migrate_scores(args).await,
        Some(Command::Serve(args)) => serve(args).await,
        None => {
            serve(ServeArgs {
                bind: "0.0.0.0:3000".to_string(),
                workers: 4,
                queue_capacity: 1024,
            })
            .await
        }
    }
}

async fn serve(args: ServeArgs) {
    info!("Starting ranked score statistics processor");

    // Create repositories with dependency injection
    // Easy to switch between implementations:
    let scores = Arc::new(InMemoryScoreRepository::new());
    let beatmaps = Arc::new(InMemoryBeatmapRepository::new());
    let ledger = Arc::new(InMemoryLedgerRepository::new());
    let best_scores = Arc::new(InMemoryBestScoreRepository::new());
    let user_stats = Arc::new(InMemoryUserStatsRepository::new());

    // For production with PostgreSQL:
    // let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    // let pool = sqlx::PgPool::connect(&database_url).await.expect("Failed to connect to database");
    // let scores = Arc::new(PostgresScoreRepository::new(pool.clone()));
    // let beatmaps = Arc::new(CachedBeatmapRepository::new(Arc::new(
    //     PostgresBeatmapRepository::new(pool.clone()),
    // )));
    // let ledger = Arc::new(PostgresLedgerRepository::new(pool.clone()));
    // let best_scores = Arc::new(PostgresBestScoreRepository::new(pool.clone()));
    // let user_stats = Arc::new(PostgresUserStatsRepository::new(pool));

    let processor = Arc::new(
        ScoreProcessor::builder(
            scores,
            beatmaps,
            ledger.clone(),
            best_scores,
            user_stats.clone(),
        )
        .build(),
    );

    // Scores left mid-reprocess by a crash must be re-driven before any
    // new events are accepted for their keys.
    match processor.recover_pending().await {
        Ok(0) => {}
        Ok(recovered) => info!(recovered, "Recovered interrupted reprocessing"),
        Err(err) => {
            error!(error = %err, "Ledger recovery failed, refusing to start");
            std::process::exit(1);
        }
    }

    let (queue, receiver) = ScoreQueue::new(args.queue_capacity);
    spawn_workers(processor, receiver, args.workers);

    let app_state = AppState::new(queue, user_stats, ledger);

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/scores", post(api::submit_score))
        .route("/users/:user_id/stats/:ruleset_id", get(api::get_user_stats))
        .route("/scores/:score_id/status", get(api::get_score_status))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let listener = match tokio::net::TcpListener::bind(&args.bind).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, bind = %args.bind, "Failed to bind HTTP listener");
            std::process::exit(1);
        }
    };
    info!("Server running on http://{}", args.bind);

    if let Err(err) = axum::serve(listener, app).await {
        error!(error = %err, "Server stopped unexpectedly");
        std::process::exit(1);
    }
}

async fn migrate_scores(args: MigrateScoresArgs) {
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            error!("DATABASE_URL must be set for migrate-scores");
            std::process::exit(1);
        }
    };

    let pool = match sqlx::PgPool::connect(&database_url).await {
        Ok(pool) => pool,
        Err(err) => {
            error!(error = %err, "Failed to connect to database");
            std::process::exit(1);
        }
    };

    let legacy = Arc::new(PostgresLegacyScoreRepository::new(pool.clone()));
    let scores = Arc::new(PostgresScoreRepository::new(pool));

    // Ctrl-C flips the flag; the migration stops between rows without
    // rolling back anything already written.
    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = cancelled.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Cancellation signal received");
                cancelled.store(true, Ordering::Relaxed);
            }
        });
    }

    match maintenance::run_migration(legacy, scores, &args, cancelled).await {
        Ok(summary) => {
            info!(
                migrated = summary.migrated,
                cancelled = summary.cancelled,
                "Finished"
            );
        }
        Err(err) => {
            error!(error = %err, "Migration failed");
            std::process::exit(1);
        }
    }
}
