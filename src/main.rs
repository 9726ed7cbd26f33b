// src/main.rs
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use contact_crawler::config::{load_config, Config};
use contact_crawler::crawler::{HttpBackend, Orchestrator};
use contact_crawler::database::{self, create_db_pool};
use contact_crawler::models::Result;
use contact_crawler::seeds::load_seeds;

/// Builds the default filter directive from the configured level,
/// falling back to info instead of panicking on a bad value.
fn log_directive(level: &str) -> (Directive, bool) {
    match format!("contact_crawler={}", level).parse() {
        Ok(directive) => (directive, false),
        Err(_) => ("contact_crawler=info".parse().unwrap(), true),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Load configuration
    let config = match load_config("config.yml").await {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load config.yml: {}. Using defaults.", e);
            Config::default()
        }
    };

    // Setup logging
    let (directive, level_fallback) = log_directive(&config.logging.level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .init();
    if level_fallback {
        warn!(
            "Unrecognized logging.level {:?} in config.yml, using info",
            config.logging.level
        );
    }

    // Initialize database
    info!("Initializing database...");
    let db_pool = create_db_pool(&config.output.database_path).await?;

    // Load seeds
    let seeds = load_seeds("seeds.yml").await?;
    if seeds.is_empty() {
        warn!("No valid seeds to crawl, exiting");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let orchestrator = Orchestrator::new(
        config.crawler.clone(),
        config.extraction.clone(),
        Arc::new(HttpBackend),
        db_pool.clone(),
        shutdown_rx,
    );

    // Graceful shutdown: workers finish their current fetch, then stop
    // pulling tasks.
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = shutdown_tx.send(true);
        }
    });

    let summaries = orchestrator.run(seeds).await?;

    // Export everything collected so far
    let records = database::export_emails(&db_pool, None).await?;
    if let Some(parent) = std::path::Path::new(&config.output.export_path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(
        &config.output.export_path,
        serde_json::to_string_pretty(&records)?,
    )
    .await?;
    info!(
        "📄 Exported {} records to {}",
        records.len(),
        config.output.export_path
    );

    let stats = database::get_crawl_stats(&db_pool).await?;
    info!(
        "📊 Totals: {} emails across {} organizations ({} crawls this run)",
        stats.total_emails,
        stats.organizations,
        summaries.len()
    );

    Ok(())
}
