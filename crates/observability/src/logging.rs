//! Tracing subscriber initialization.
//!
//! JSON lines by default, filtered through `RUST_LOG`. Security code logs
//! identity ids, field names and decisions, never secrets or token values.

use tracing_subscriber::EnvFilter;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    /// Human-readable output for local runs and tests.
    Pretty,
}

impl LogFormat {
    /// `BASTION_LOG_FORMAT=pretty` selects the human format.
    pub fn from_env() -> Self {
        match std::env::var("BASTION_LOG_FORMAT").as_deref() {
            Ok("pretty") | Ok("text") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Install the global subscriber using `RUST_LOG` (default `info`) and the
/// format from the environment.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with(LogFormat::from_env(), "info");
}

/// Install the global subscriber. Returns `false` when one was already set.
pub fn init_with(format: LogFormat, default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .try_init()
            .is_ok(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        init_with(LogFormat::Pretty, "debug");
        assert!(!init_with(LogFormat::Json, "info"));
    }
}
