//! Structured logging for harness runs.
//!
//! Scenario, stage and adapter names are recorded as `tracing` fields.
//! `RUST_LOG` overrides the default filter; `FRANKEN_GOLDEN_LOG_FORMAT=json`
//! switches to one JSON object per event for CI artifact collection.

use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_ENV: &str = "FRANKEN_GOLDEN_LOG_FORMAT";

const DEFAULT_DIRECTIVE: &str = "franken_golden=info";

/// Install the global subscriber. Calls after the first are no-ops, so every
/// test may call it.
///
/// Output goes through the libtest writer: captured for passing tests,
/// printed next to the failure otherwise. Thread names are kept because
/// adapters run on `adapter-<name>` threads.
pub fn init() {
    init_with(DEFAULT_DIRECTIVE);
}

/// Like [`init`], with a fallback directive used when `RUST_LOG` is unset
/// (e.g. `"franken_golden=debug"` to see per-stage events).
pub fn init_with(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_target(false)
        .with_thread_names(true);

    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|value| value.trim().eq_ignore_ascii_case("json"));
    if json {
        let _ = builder.json().flatten_event(true).try_init();
    } else {
        let _ = builder.compact().try_init();
    }
}
