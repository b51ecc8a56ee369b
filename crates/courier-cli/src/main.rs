//! courier: run classification workers or submit jobs against Redis.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use courier_core::classify::{ImageJob, Prediction};
use courier_core::{
    CourierConfig, RedisBackend, ReaperLoop, StatusReport, Submitter, Typed, WorkerPool,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod classifier;

use classifier::StemClassifier;

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Queue-backed job dispatch with result correlation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run workers (and the claim reaper) until Ctrl-C
    Worker {
        /// Number of worker tasks (defaults to COURIER_WORKERS)
        #[arg(long)]
        workers: Option<usize>,

        /// Folder the submitted images live in
        #[arg(long, env = "UPLOAD_FOLDER", default_value = "uploads")]
        upload_dir: PathBuf,
    },

    /// Submit one image and wait for its prediction
    Submit {
        image_name: String,

        /// Seconds to wait for the result
        #[arg(long, default_value_t = 30.0)]
        timeout: f64,
    },

    /// Re-deliver expired claims once and exit
    Reap,

    /// Print queue and result store counts as JSON
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=info,courier_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = CourierConfig::from_env().context("reading configuration")?;
    let backend = connect(&config).await?;

    match cli.command {
        Commands::Worker {
            workers,
            upload_dir,
        } => run_worker(&config, backend, workers, upload_dir).await,
        Commands::Submit {
            image_name,
            timeout,
        } => submit(&config, backend, image_name, timeout).await,
        Commands::Reap => {
            let reaper = ReaperLoop::new(Arc::new(backend), config.visibility_timeout);
            let requeued = reaper.run_once().await.context("reaping expired claims")?;
            println!("{requeued}");
            Ok(())
        }
        Commands::Status => {
            let report = StatusReport::collect(&backend, &backend)
                .await
                .context("collecting status")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn connect(config: &CourierConfig) -> Result<RedisBackend> {
    let backend = RedisBackend::connect(&config.redis_url(), &config.queue)
        .await
        .with_context(|| format!("connecting to {}", config.redis_url()))?;
    let backend = match config.result_ttl {
        Some(ttl) => backend.with_result_ttl(ttl),
        None => backend,
    };
    tracing::info!(redis = %config.redis_url(), queue = %config.queue, "connected");
    Ok(backend)
}

async fn run_worker(
    config: &CourierConfig,
    backend: RedisBackend,
    workers: Option<usize>,
    upload_dir: PathBuf,
) -> Result<()> {
    let workers = workers.unwrap_or(config.workers).max(1);
    let backend = Arc::new(backend);

    let (reaper_tx, reaper_rx) = tokio::sync::watch::channel(false);
    let reaper = tokio::spawn(
        ReaperLoop::new(backend.clone(), config.visibility_timeout).run(reaper_rx),
    );

    tracing::info!(upload_dir = %upload_dir.display(), "launching classification workers");
    let pool = WorkerPool::spawn(
        workers,
        backend.clone(),
        backend,
        Arc::new(Typed::new(StemClassifier::new(upload_dir))),
        config.worker_config(),
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("shutdown requested");

    let _ = reaper_tx.send(true);
    pool.shutdown_and_join().await;
    reaper.await.context("reaper task")?;
    Ok(())
}

async fn submit(
    config: &CourierConfig,
    backend: RedisBackend,
    image_name: String,
    timeout: f64,
) -> Result<()> {
    let timeout = Duration::try_from_secs_f64(timeout).context("invalid --timeout")?;
    let backend = Arc::new(backend);
    let submitter =
        Submitter::new(backend.clone(), backend).with_config(config.waiter_config());

    let payload = serde_json::to_value(ImageJob::new(image_name))?;
    let prediction: Prediction = submitter
        .submit_and_wait_as(payload, timeout)
        .await
        .context("classification failed")?;

    println!("{}", serde_json::to_string(&prediction)?);
    Ok(())
}
