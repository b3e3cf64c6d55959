//! Logging setup for the CLI.
//!
//! `RUST_LOG` selects levels (default `bias_harness=info`); set
//! `RUST_LOG_FORMAT=json` for one JSON object per line. Logs go to stderr so
//! prompts and reports on stdout stay clean.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "bias_harness=info";

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    init_with_default(DEFAULT_FILTER);
}

/// Like [`init`], with a different fallback filter (used by `--verbose`).
pub fn init_with_default(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let is_json = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if is_json {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}
