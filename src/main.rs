use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::prelude::*;

use crops_watcher::models::{StoreId, TriggerReason};
use crops_watcher::plugins::AdapterRegistry;
use crops_watcher::publisher::BroadcastTransport;
use crops_watcher::scheduler::ScrapeScheduler;
use crops_watcher::scraper::WebScraper;
use crops_watcher::storage::SqliteStorage;
use crops_watcher::storage::memory::{seed_products, seed_stores};
use crops_watcher::{AppConfig, Orchestrator, TriggerEvent};

#[derive(Parser)]
#[command(name = "crops-watcher", version, about = "Grocery price collection for tracked crops")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one manual scrape and print the run summary as JSON
    Run {
        /// Only scrape these store ids
        #[arg(long = "store")]
        stores: Vec<StoreId>,
    },
    /// Scrape on the configured schedule until Ctrl-C
    Serve,
    /// Health-check every active store
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let _log_guard = init_tracing(&config)?;

    if config.metrics.enabled {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.metrics.port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(port = config.metrics.port, "Metrics exporter listening");
    }

    let (orchestrator, transport) = build_orchestrator(&config).await?;

    match cli.command {
        Command::Run { stores } => {
            let filter = (!stores.is_empty()).then_some(stores);
            let run = orchestrator.run(TriggerReason::Manual, filter).await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        Command::Check => {
            for (store, healthy) in orchestrator.health_check().await? {
                println!(
                    "{:<3} {:<12} {}",
                    store.id,
                    store.name,
                    if healthy { "ok" } else { "unreachable" }
                );
            }
        }
        Command::Serve => serve(&config, orchestrator, transport).await?,
    }

    Ok(())
}

fn init_tracing(config: &AppConfig) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("crops_watcher={}", config.logging.level).parse()?);

    let (file_layer, guard) = match &config.logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "crops-watcher.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(guard)
}

async fn build_orchestrator(config: &AppConfig) -> Result<(Orchestrator, BroadcastTransport)> {
    let storage = Arc::new(SqliteStorage::connect(&config.database).await?);
    storage.seed_if_empty(seed_products(), seed_stores()).await?;

    let scraper = WebScraper::new(config.scraper.clone())?;
    let registry = AdapterRegistry::new();
    registry.initialize_default_adapters(&scraper).await?;

    let transport = BroadcastTransport::new(config.publisher.channel_capacity);
    let orchestrator = Orchestrator::new(
        config.scraper.clone(),
        storage.clone(),
        storage,
        registry,
        Arc::new(transport.clone()),
    );
    Ok((orchestrator, transport))
}

async fn serve(config: &AppConfig, orchestrator: Orchestrator, transport: BroadcastTransport) -> Result<()> {
    info!("Starting CROPS watcher...");

    let mut events = transport.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(
                    product_id = event.product_id,
                    store_id = event.store_id,
                    class = ?event.change_class,
                    new_price = %event.new_price,
                    "Price change"
                ),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Change log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let (triggers, rx) = mpsc::channel(32);
    let server = orchestrator.clone();
    let serve_handle = tokio::spawn(async move { server.serve(rx).await });

    let mut scheduler = ScrapeScheduler::new(config.scheduler.clone(), triggers.clone()).await?;
    scheduler.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    scheduler.shutdown().await?;
    triggers.send(TriggerEvent::Shutdown).await?;
    serve_handle.await?;

    let report = orchestrator.status_report().await;
    info!(
        online = report.online,
        offline = report.offline,
        idle = report.idle,
        "Stopped"
    );
    Ok(())
}
