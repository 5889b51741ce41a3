//! previsa worker: runs the pre-authorization and catalog embedding queue.

mod config;

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use previsa_core::{CatalogRepository, Notifier};
use previsa_db::{Database, PoolHealth};
use previsa_inference::embedder_from_env;
use previsa_jobs::{
    CatalogEmbeddingHandler, JobQueue, NoopNotifier, PreAuthorizationHandler, QueueBuilder,
    QueueConfig, QueueEvent, WebhookNotifier,
};
use previsa_matching::{GeneratorConfig, MatchingEngine, PreAuthorizationGenerator};

use crate::config::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "previsa_worker=debug,previsa_jobs=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "previsa_worker=debug,previsa_jobs=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("previsa-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = WorkerConfig::from_env();

    info!("Connecting to database...");
    let db = Database::connect_with_config(&config.database_url, config.pool.clone()).await?;
    info!("Database connected");

    if config.run_migrations {
        info!("Running database migrations...");
        db.migrate().await?;
        info!("Database migrations complete");
    }

    let embedder = embedder_from_env()?;
    let catalog: Arc<dyn CatalogRepository> = Arc::new(db.catalog.clone());

    let engine = Arc::new(MatchingEngine::new(
        catalog.clone(),
        Arc::new(db.agreements.clone()),
        embedder.clone(),
    ));
    let generator_config = GeneratorConfig::from_env();
    info!(
        default_plan_id = generator_config.default_plan_id,
        default_provider_id = ?generator_config.default_provider_id,
        "Generator configured"
    );
    let generator = Arc::new(
        PreAuthorizationGenerator::new(engine, Arc::new(db.pre_authorizations.clone()))
            .with_config(generator_config),
    );

    let notifier: Arc<dyn Notifier> = match WebhookNotifier::from_env() {
        Some(webhook) => {
            info!(url = webhook.url(), "Webhook notifications enabled");
            Arc::new(webhook)
        }
        None => {
            info!("WEBHOOK_URL not set, notifications disabled");
            Arc::new(NoopNotifier)
        }
    };

    let queue = QueueBuilder::new(Arc::new(db.jobs.clone()))
        .with_config(QueueConfig::from_env())
        .with_handler(PreAuthorizationHandler::new(generator, notifier))
        .with_handler(CatalogEmbeddingHandler::practices(catalog.clone(), embedder.clone()))
        .with_handler(CatalogEmbeddingHandler::providers(catalog, embedder.clone()))
        .build()?;

    tokio::spawn(log_queue_events(queue.events()));
    queue.start().await?;

    let stats_queue = queue.clone();
    let stats_db = db.clone();
    let stats_embedder = embedder.clone();
    let stats_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.stats_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            log_queue_stats(&stats_queue).await;
            log_pool_health(PoolHealth::of(stats_db.pool()));
            let cache = stats_embedder.stats();
            debug!(hits = cache.hits, misses = cache.misses, "Embedding cache stats");
        }
    });

    info!("Worker running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    stats_task.abort();
    queue.shutdown().await;
    db.pool().close().await;
    info!("Worker stopped");
    Ok(())
}

/// Mirror queue events into structured logs.
async fn log_queue_events(mut rx: broadcast::Receiver<QueueEvent>) {
    loop {
        match rx.recv().await {
            Ok(QueueEvent::JobRetryScheduled {
                job_id,
                job_type,
                attempt,
                delay_ms,
            }) => {
                debug!(subsystem = "jobs", %job_id, %job_type, attempt, delay_ms, "Retry scheduled");
            }
            Ok(QueueEvent::JobFailed {
                job_id,
                job_type,
                error,
            }) => {
                info!(subsystem = "jobs", %job_id, %job_type, %error, "Job failed permanently");
            }
            Ok(event) => debug!(subsystem = "jobs", ?event, "Queue event"),
            Err(RecvError::Lagged(n)) => warn!(missed = n, "Queue event logger lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn log_queue_stats(queue: &JobQueue) {
    match queue.queue_stats().await {
        Ok(stats) => {
            for count in &stats.counts {
                info!(
                    subsystem = "jobs",
                    job_type = %count.job_type,
                    state = %count.state,
                    count = count.count,
                    "Queue stats"
                );
            }
            debug!(active = queue.active_count(), "Active jobs");
        }
        Err(e) => warn!(error = %e, "Failed to read queue stats"),
    }
}

fn log_pool_health(health: PoolHealth) {
    if health.is_exhausted() {
        warn!(subsystem = "db", pool_size = health.size, "No idle database connections");
    } else {
        debug!(subsystem = "db", pool_size = health.size, pool_idle = health.idle, "Pool health");
    }
}
