//! Run command: catch up on the backlog, then scan and watch.

use std::sync::Arc;

use crate::config::Settings;
use crate::pipeline::{run_continuous, run_once};
use crate::watcher::Monitor;

use super::setup::{build_pipeline, shutdown_token};
use super::stats::print_stats;

pub async fn run(settings: &Settings, once: bool) -> anyhow::Result<()> {
    let pipeline = Arc::new(build_pipeline(settings)?);
    let monitor = Arc::new(Monitor::from_config(&settings.watch));
    let cancel = shutdown_token();

    for root in monitor.roots() {
        crate::debug_event!("run", "root", "{}", root.display());
    }

    let sweep = settings
        .dispatch
        .retry_on_startup
        .then_some(settings.dispatch.sweep_max_retries);
    let drained = pipeline.resume(sweep, &cancel).await?;
    if drained.attempted() > 0 {
        crate::log_event!(
            "run",
            "backlog",
            "{} delivered, {} failed",
            drained.succeeded,
            drained.failed
        );
    }

    if once {
        run_once(&pipeline, &monitor, &cancel).await?;
        print_stats(pipeline.ledger(), 0)?;
        return Ok(());
    }

    crate::log_event!("run", "watching", "press Ctrl-C to stop");
    let summary = run_continuous(Arc::clone(&pipeline), monitor, cancel).await?;
    crate::log_event!(
        "run",
        "stopped",
        "{} discovered, {} new, {} errors",
        summary.discovered,
        summary.recorded,
        summary.errors
    );
    Ok(())
}
