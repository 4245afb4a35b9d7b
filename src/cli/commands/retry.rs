//! Retry command: one sweep over failed deliveries.

use crate::config::Settings;

use super::setup::{build_pipeline, shutdown_token};

pub async fn run_retry(settings: &Settings, max_retries: Option<u32>) -> anyhow::Result<()> {
    let pipeline = build_pipeline(settings)?;
    let ceiling = max_retries.unwrap_or(settings.dispatch.sweep_max_retries);
    let cancel = shutdown_token();

    let requeued = pipeline.retry_sweep(ceiling, &cancel).await?;
    if requeued == 0 {
        println!("No failed deliveries under {ceiling} attempts.");
        return Ok(());
    }

    let stats = pipeline.ledger().stats()?;
    let still_failed: usize = stats.by_destination.values().map(|t| t.failed).sum();
    println!("Re-queued {requeued} deliveries; {still_failed} still failed.");
    Ok(())
}
