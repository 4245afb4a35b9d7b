//! Diagnostics for the watcher, dispatcher and ledger.
//!
//! Every line carries a wall-clock time, level and target, followed by a
//! bracketed component tag so one file's path from discovery to delivery
//! can be followed with grep:
//!
//! ```text
//! 07:42:10.118  INFO fitwatch::watcher::monitor: [watcher] new file: /rides/a.fit (watch)
//! 07:42:10.131  INFO fitwatch::pipeline::processor: [pipeline] recorded: /rides/a.fit as #12 (...)
//! 07:42:11.402  WARN fitwatch::dispatch::dispatcher: [dispatch] Intervals.icu attempt 1/4 failed ...
//! ```
//!
//! Tags in use: `watcher`, `pipeline`, `dispatch`, `ledger`, `intervals`
//! and `run`. Levels come from the `[logging]` table, keyed by module path
//! (`"fitwatch::dispatch" = "debug"`). `-v` lowers the default to `debug`
//! and a set `RUST_LOG` replaces the table entirely.

use std::sync::Once;

use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Local time as `HH:MM:SS.mmm`.
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// `default,module=level,...`, modules in sorted order.
fn filter_directives(config: &LoggingConfig) -> String {
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();

    let mut filter_str = config.default.clone();
    for (module, level) in modules {
        filter_str.push_str(&format!(",{module}={level}"));
    }
    filter_str
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(config))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        tracing_subscriber::registry().with(fmt_layer).init();
    });
}

/// Info-level event tagged with its component.
///
/// # Examples
/// ```ignore
/// log_event!("watcher", "new file", "{}", path.display());
/// log_event!("run", "started");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Debug-level counterpart of [`log_event!`].
///
/// # Examples
/// ```ignore
/// debug_event!("ledger", "migrated", "schema version {version}");
/// ```
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}
