//! Expense worker binary
//!
//! Run with: cargo run -p partner-expenses --bin expense-worker -- --config worker.toml

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use partner_expenses::config::{IngestConfig, ObjectStoreBackend, QueueBackend};
use partner_expenses::providers::{ExpenseStore, LocalObjectStore, ObjectStoreProvider, QueueProvider};
use partner_expenses::storage::{ExpenseDb, SqliteQueue};
use partner_expenses::{ExpenseWorker, WorkerConfig, WorkerDeps};

#[derive(Debug, Parser)]
#[command(name = "expense-worker", version, about = "Ingest partner expense files from a work queue")]
struct Args {
    /// TOML configuration file (defaults plus environment when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Process a single message and exit
    #[arg(long)]
    once: bool,

    /// Override the work queue name
    #[arg(short, long)]
    queue: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "partner_expenses=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => IngestConfig::from_file(path)?,
        None => IngestConfig::from_env()?,
    };
    if let Some(queue) = args.queue {
        config.queue.queue_name = queue;
        config.validate()?;
    }

    tracing::info!("Configuration loaded");
    tracing::info!("  - Bucket: {} ({:?})", config.object_store.bucket, config.object_store.backend);
    tracing::info!("  - Queue: {} ({:?})", config.queue.queue_name, config.queue.backend);
    tracing::info!("  - Database: {}", config.database.path.display());

    let deps = WorkerDeps {
        object_store: object_store(&config).await?,
        queue: queue(&config).await?,
        store: Arc::new(ExpenseDb::new(&config.database.path)?) as Arc<dyn ExpenseStore>,
    };
    let worker = ExpenseWorker::new(deps, WorkerConfig::from_config(&config))?;

    if args.once {
        match worker.process_next().await? {
            Some(summary) => tracing::info!(
                "Processed message {}: {}",
                summary.message_id,
                serde_json::to_string(&summary)?
            ),
            None => tracing::info!("No message available on {}", config.queue.queue_name),
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested, finishing the current message");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await;
    Ok(())
}

async fn object_store(config: &IngestConfig) -> anyhow::Result<Arc<dyn ObjectStoreProvider>> {
    match config.object_store.backend {
        ObjectStoreBackend::Local => Ok(Arc::new(LocalObjectStore::from_config(&config.object_store)?)),
        #[cfg(feature = "aws")]
        ObjectStoreBackend::S3 => Ok(Arc::new(
            partner_expenses::providers::aws::S3ObjectStore::from_config(&config.object_store).await,
        )),
        #[cfg(not(feature = "aws"))]
        ObjectStoreBackend::S3 => anyhow::bail!("the S3 backend needs the `aws` feature"),
    }
}

async fn queue(config: &IngestConfig) -> anyhow::Result<Arc<dyn QueueProvider>> {
    match config.queue.backend {
        QueueBackend::Sqlite => Ok(Arc::new(SqliteQueue::from_config(&config.queue)?)),
        #[cfg(feature = "aws")]
        QueueBackend::Sqs => Ok(Arc::new(
            partner_expenses::providers::aws::SqsQueue::from_config(&config.queue).await,
        )),
        #[cfg(not(feature = "aws"))]
        QueueBackend::Sqs => anyhow::bail!("the SQS backend needs the `aws` feature"),
    }
}
