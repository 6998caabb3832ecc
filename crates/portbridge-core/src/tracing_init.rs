//! Logging setup for the portbridge binary.
//!
//! The fmt layer writes to stdout, the same stream the supervisor relays the
//! child's output onto, so bridge diagnostics and child lines interleave in
//! one log. JSON mode lets a log collector tell the two apart: bridge events
//! are JSON objects, relayed lines are whatever the child printed.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"portbridge_daemon=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Build the default filter directive for the given crates at `level`.
///
/// `default_filter(&["portbridge_daemon", "portbridge_core"], "debug")`
/// yields `"portbridge_daemon=debug,portbridge_core=debug"`.
pub fn default_filter(targets: &[&str], level: &str) -> String {
    targets
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}
