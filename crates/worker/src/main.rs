use anyhow::Context;
use tokio_util::sync::CancellationToken;

use pulse_infra::{QueueConfig, connect};
use pulse_queue::{Delivery, QueueWorker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pulse_observability::init();

    let config = QueueConfig::from_env().context("loading queue configuration")?;
    let shutdown = CancellationToken::new();

    let client = connect(&config, &shutdown)
        .await
        .with_context(|| format!("connecting to {}", config.redis_url))?;

    let worker = QueueWorker::spawn(client.consumer, config.worker, handle, &shutdown);
    tracing::info!(stream = %config.stream, group = %config.group, "worker running");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutdown requested");
    worker.shutdown().await;

    Ok(())
}

async fn handle(delivery: Delivery) -> anyhow::Result<()> {
    tracing::info!(
        record_id = %delivery.id,
        job_type = delivery.job.job_type().unwrap_or("unknown"),
        workspace_id = delivery.job.workspace_id().unwrap_or("-"),
        reclaimed = delivery.reclaimed,
        "job received"
    );
    Ok(())
}
