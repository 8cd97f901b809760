//! Reel render worker binary.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reel_media::{check_ffmpeg, FfmpegTranscoder};
use reel_models::EncodingConfig;
use reel_origin::OriginClient;
use reel_queue::RedisRenderQueue;
use reel_storage::S3Store;
use reel_worker::{
    metrics, sweep_stale, JobExecutor, PipelineServices, RenderPipeline, WorkerConfig,
    WorkerResult,
};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("reel=info".parse().expect("valid directive"))
        .add_directive("aws_config=warn".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting reel-worker");

    let executor = match build_executor().await {
        Ok(executor) => Arc::new(executor),
        Err(e) => {
            error!("Failed to start worker: {}", e);
            std::process::exit(1);
        }
    };

    // Setup signal handlers
    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

async fn build_executor() -> WorkerResult<JobExecutor> {
    let config = WorkerConfig::from_env()?;
    info!("Worker config: {:?}", config);

    let encoding = EncodingConfig::from_env();

    if let Some(port) = config.metrics_port {
        match metrics::install_exporter(port) {
            Ok(()) => info!("Serving Prometheus metrics on port {}", port),
            Err(e) => warn!("Failed to install metrics exporter: {}", e),
        }
    }

    if let Err(e) = check_ffmpeg() {
        warn!("FFmpeg check failed, transcodes will fail: {}", e);
    }

    match sweep_stale(&config.work_dir, config.scratch_max_age).await {
        Ok(removed) => info!(removed, "Scratch sweep finished"),
        Err(e) => warn!("Scratch sweep failed: {}", e),
    }

    let queue = RedisRenderQueue::from_env()?;
    queue.init().await?;

    let store = S3Store::from_env()?;
    let bucket = store.bucket().to_string();
    let origin = OriginClient::from_env()?;

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("reel-worker/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| reel_worker::WorkerError::config_error(format!("http client: {}", e)))?;

    let services = PipelineServices {
        origin: Arc::new(origin),
        store: Arc::new(store),
        transcoder: Arc::new(FfmpegTranscoder::new(encoding.clone())),
        http,
        bucket,
    };
    let pipeline = RenderPipeline::new(&config, encoding.fps, services);

    Ok(JobExecutor::new(config, Arc::new(queue), pipeline))
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
