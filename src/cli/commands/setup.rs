//! Shared startup steps: ledger, destinations, pipeline, shutdown signal.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::decoder::FitHeaderDecoder;
use crate::destination::{Destination, IntervalsDestination};
use crate::dispatch::{Dispatcher, RetryPolicy};
use crate::ledger::Ledger;
use crate::pipeline::Pipeline;

/// Open the ledger at the configured location.
pub fn open_ledger(settings: &Settings) -> anyhow::Result<Arc<Ledger>> {
    let path = settings.store_path();
    let ledger = Ledger::open(&path)
        .with_context(|| format!("opening ledger at {}", path.display()))?;
    Ok(Arc::new(ledger))
}

/// Destinations enabled in the configuration, in registration order.
pub fn build_destinations(settings: &Settings) -> Vec<Arc<dyn Destination>> {
    let mut destinations: Vec<Arc<dyn Destination>> = Vec::new();
    if settings.intervals.enabled {
        destinations.push(Arc::new(IntervalsDestination::from_config(
            &settings.intervals,
        )));
    }
    destinations
}

/// Validate configuration and assemble the pipeline.
///
/// Fails before any watching starts if the configuration or a
/// destination is invalid, or the ledger cannot be opened.
pub fn build_pipeline(settings: &Settings) -> anyhow::Result<Pipeline> {
    settings.validate()?;

    let dispatcher = Dispatcher::new(
        build_destinations(settings),
        RetryPolicy::from(&settings.dispatch),
    )
    .context("destination configuration")?;
    if dispatcher.is_empty() {
        tracing::warn!("[run] no destinations enabled; files will be recorded but not delivered");
    }

    let ledger = open_ledger(settings)?;
    Ok(Pipeline::new(
        ledger,
        Arc::new(FitHeaderDecoder),
        Arc::new(dispatcher),
    ))
}

/// A token cancelled on Ctrl-C.
pub fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                crate::log_event!("run", "shutdown requested");
                trigger.cancel();
            }
            Err(e) => tracing::error!("[run] failed to listen for ctrl+c: {e}"),
        }
    });
    cancel
}
