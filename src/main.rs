//! Transaction Risk Pipeline - Main Entry Point
//!
//! `tx-risk api` accepts transactions over HTTP and queues them on NATS
//! JetStream. `tx-risk worker` consumes the queue, classifies each
//! transaction and persists the high-priority ones to PostgreSQL.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tx_risk_pipeline::{
    api::{self, AppState},
    broker,
    classifier::build_classifier,
    config::AppConfig,
    consumer::TransactionConsumer,
    logging::init_logging,
    metrics::{MetricsReporter, PipelineMetrics},
    pipeline::TransactionPipeline,
    producer::TransactionProducer,
    store::{PgTransactionStore, TransactionStore},
};

use cli::{Cli, Commands};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    init_logging(&config.logging);

    match cli.command {
        Commands::Api => run_api(config).await,
        Commands::Worker => run_worker(config).await,
        Commands::Stats { recent } => show_stats(config, recent).await,
    }
}

/// Serve the ingestion API until Ctrl-C.
///
/// Starts even when NATS or PostgreSQL are down; `/healthz` reports them
/// as degraded until they come up.
async fn run_api(config: AppConfig) -> Result<()> {
    info!("Starting transaction ingestion API");

    let client = broker::connect(&config.nats, "tx-risk-api").await?;
    let producer = TransactionProducer::new(client, &config.nats);
    match producer.declare().await {
        Ok(()) => info!(stream = %config.nats.stream, subject = %producer.subject(), "Stream ready"),
        Err(e) => warn!(error = format!("{e:#}"), "Could not declare stream, continuing"),
    }

    let store = PgTransactionStore::connect_lazy(&config.database);
    if let Err(e) = store.apply_schema().await {
        warn!(error = format!("{e:#}"), "Could not apply database schema, continuing");
    }

    let router = api::create_router(AppState {
        publisher: Arc::new(producer),
        store: Arc::new(store),
    });

    let listener = tokio::net::TcpListener::bind(&config.api.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.api.bind_addr))?;
    info!("API listening on {}", config.api.bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    info!("API stopped");
    Ok(())
}

/// Run the single classification worker until Ctrl-C, then let in-flight
/// messages settle.
async fn run_worker(config: AppConfig) -> Result<()> {
    info!("Starting transaction risk worker");
    info!(
        "Risk threshold: {:.2}, prefetch: {}, processing timeout: {}ms",
        config.detection.risk_threshold,
        config.nats.prefetch,
        config.pipeline.processing_timeout_ms
    );

    let classifier = build_classifier(&config.classifier)?;

    let store = PgTransactionStore::connect(&config.database).await?;
    store.apply_schema().await?;

    let client = broker::connect(&config.nats, "tx-risk-worker").await?;
    let consumer = TransactionConsumer::new(
        broker::jetstream(client),
        &config.nats,
        config.pipeline.requeue_delay(),
    );

    let metrics = Arc::new(PipelineMetrics::new());
    let pipeline = Arc::new(TransactionPipeline::new(
        classifier,
        Arc::new(store),
        config.detection.risk_threshold,
        config.pipeline.processing_timeout(),
        config.nats.prefetch,
        metrics.clone(),
    ));

    let reporter = tokio::spawn(
        MetricsReporter::new(
            metrics.clone(),
            Duration::from_secs(config.pipeline.report_interval_secs),
        )
        .start(),
    );

    info!("Listening on subject: {}", consumer.subject());

    tokio::select! {
        Err(e) = consumer.consume(pipeline) => {
            reporter.abort();
            return Err(e.context("Consumer stopped"));
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, draining in-flight messages");
        }
    }

    if !consumer.drain(DRAIN_TIMEOUT).await {
        warn!(
            timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "Messages still in flight at shutdown; the broker will redeliver them"
        );
    }
    reporter.abort();

    info!("Worker shutting down...");
    metrics.print_summary();
    Ok(())
}

/// Print aggregate statistics and the most recent records to stdout
async fn show_stats(config: AppConfig, recent: i64) -> Result<()> {
    let store = PgTransactionStore::connect(&config.database).await?;
    let stats = store.stats().await.context("Failed to read statistics")?;

    println!("Total transactions:    {}", stats.total);
    println!("High priority:         {}", stats.high_priority);
    println!("Low priority:          {}", stats.low_priority);
    match stats.avg_risk_score {
        Some(avg) => println!("Average risk score:    {avg:.4}"),
        None => println!("Average risk score:    -"),
    }
    match stats.avg_inference_time_ms {
        Some(avg) => println!("Average inference:     {avg:.1} ms"),
        None => println!("Average inference:     -"),
    }

    let records = store
        .recent(recent)
        .await
        .context("Failed to read recent transactions")?;
    if records.is_empty() {
        return Ok(());
    }

    println!();
    println!("Most recent {} transactions:", records.len());
    for record in records {
        println!(
            "  #{:<6} {}  score={:.4}  {}  {:>5.0} ms  {}",
            record.id,
            record.tx_hash,
            record.risk_score,
            record.priority,
            record.inference_time_ms,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
