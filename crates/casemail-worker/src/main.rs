//! Casemail - sync and reclassification worker entry point

mod worker;

use anyhow::Result;
use casemail_common::config::{Config, LoggingConfig};
use casemail_core::{
    AuditDispatcher, ClassificationScorer, ClassificationService, DeltaIngestor, HttpMailProvider,
    Reclassifier,
};
use casemail_storage::db::DatabasePool;
use casemail_storage::repository::{DbCursorRepository, DbDirectoryRepository, DbMessageRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Casemail worker...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;
    info!("Database connection established");

    // Run migrations
    db_pool.migrate().await?;
    info!("Database migrations completed");

    let messages = Arc::new(DbMessageRepository::new(db_pool.clone()));
    let directory = Arc::new(DbDirectoryRepository::new(db_pool.clone()));
    let cursors = Arc::new(DbCursorRepository::new(db_pool.clone()));

    let audit = AuditDispatcher::from_config(&config.audit, Some(db_pool.clone()))?;
    info!(sinks = audit.sink_count(), "Audit dispatcher initialized");

    let classifier = Arc::new(ClassificationService::new(
        messages.clone(),
        directory.clone(),
        ClassificationScorer::new(config.classification.clone()),
        audit.clone(),
    ));

    let provider = Arc::new(HttpMailProvider::new(&config.provider)?);
    let mut ingestor = DeltaIngestor::new(provider, messages.clone(), cursors, config.ingest.clone());
    if config.ingest.classify_on_ingest {
        ingestor = ingestor.with_classifier(classifier.clone());
    }

    let reclassifier = Reclassifier::new(classifier, messages, config.reclassify.clone());

    if config.worker.mailboxes.is_empty() {
        warn!("No mailboxes configured, only reclassification will run");
    }
    let worker = Worker::new(
        Arc::new(ingestor),
        Arc::new(reclassifier),
        config.worker.mailboxes.clone(),
    );

    info!(
        mailboxes = config.worker.mailboxes.len(),
        interval_secs = config.worker.interval_secs,
        "Casemail worker started"
    );

    let interval = Duration::from_secs(config.worker.interval_secs.max(1));
    loop {
        worker.run_cycle().await;

        if config.worker.run_once {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Shutdown signal received");
                break;
            }
        }
    }

    // Deliver outstanding audit events
    audit.flush().await;

    info!("Casemail worker shutdown complete");
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},casemail=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
