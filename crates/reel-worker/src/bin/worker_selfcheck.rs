use std::path::Path;
use std::process::Command;

use reel_queue::RedisRenderQueue;
use reel_worker::WorkerConfig;

const REQUIRED_ENV: &[&str] = &[
    "REDIS_URL",
    "ORIGIN_API_URL",
    "S3_ENDPOINT_URL",
    "S3_ACCESS_KEY_ID",
    "S3_SECRET_ACCESS_KEY",
    "S3_BUCKET",
    "PUBLIC_BASE_URL",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    ensure_env_present(REQUIRED_ENV)?;
    let config = WorkerConfig::from_env()?;

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;
    ensure_ffmpeg()?;
    report_queue().await?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn report_queue() -> anyhow::Result<()> {
    let queue = RedisRenderQueue::from_env()?;
    queue
        .check_connectivity()
        .await
        .map_err(|e| anyhow::anyhow!("redis not reachable: {}", e))?;

    println!(
        "worker-selfcheck: queue backlog={} delayed={} dead_letters={}",
        queue.len().await?,
        queue.delayed_len().await?,
        queue.dlq_len().await?
    );
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;

    let marker = path.join(".selfcheck");
    tokio::fs::write(&marker, b"ok")
        .await
        .map_err(|e| anyhow::anyhow!("work dir {} not writable: {}", path.display(), e))?;
    tokio::fs::remove_file(&marker).await?;
    Ok(())
}

fn ensure_ffmpeg() -> anyhow::Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "ffmpeg -version failed: {:?}",
            output.status
        ));
    }
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
