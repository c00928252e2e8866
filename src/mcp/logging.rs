//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set. Otherwise the verbosity comes from `LOG_LEVEL`,
//! which also accepts the level names used by Python loggers (`WARNING`,
//! `CRITICAL`, ...). The SSH and driver crates are clamped to `warn` because
//! they are noisy at `info`.

use std::env;

use tracing_subscriber::EnvFilter;

pub(crate) const LOG_LEVEL_ENV_VAR: &str = "LOG_LEVEL";

const DEFAULT_LOG_LEVEL: &str = "info";

const QUIET_DEPENDENCIES: &[&str] = &["russh=warn", "mongodb=warn"];

/// Map a `LOG_LEVEL` value onto a `tracing` level directive.
pub(crate) fn normalize_level(level: &str) -> Option<&'static str> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" | "critical" | "fatal" => Some("error"),
        "off" => Some("off"),
        _ => None,
    }
}

/// Build the filter directive string for a `LOG_LEVEL` value.
pub(crate) fn filter_directives(level: Option<&str>) -> String {
    let level = level
        .and_then(normalize_level)
        .unwrap_or(DEFAULT_LOG_LEVEL);
    let mut directives = vec![level.to_string()];
    directives.extend(QUIET_DEPENDENCIES.iter().map(|d| d.to_string()));
    directives.join(",")
}

fn build_filter() -> EnvFilter {
    if env::var(EnvFilter::DEFAULT_ENV).is_ok()
        && let Ok(filter) = EnvFilter::try_from_default_env()
    {
        return filter;
    }
    let level = env::var(LOG_LEVEL_ENV_VAR).ok();
    EnvFilter::new(filter_directives(level.as_deref()))
}

/// Install the global subscriber. Logs go to stderr so the stdio transport
/// keeps stdout for protocol frames.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter())
        .with_writer(std::io::stderr)
        .init();
}
