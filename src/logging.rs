//! Tracing setup. Logs go to stderr so stdout stays machine-readable.

use tracing_subscriber::EnvFilter;

/// Environment variable holding a tracing filter directive, e.g. `tablesight=debug`.
pub const LOG_ENV_VAR: &str = "TABLESIGHT_LOG";

/// Resolves the filter: an explicit override (the `--log-level` flag) wins, then
/// `TABLESIGHT_LOG`, then the configured level.
pub fn build_filter(override_level: Option<&str>, configured_level: &str) -> EnvFilter {
    if let Some(level) = override_level.filter(|l| !l.trim().is_empty()) {
        if let Ok(filter) = EnvFilter::try_new(level) {
            return filter;
        }
    }
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(configured_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Installs the global fmt subscriber. A second call is a no-op.
pub fn init(override_level: Option<&str>, configured_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(build_filter(override_level, configured_level))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        let filter = build_filter(Some("debug"), "error");
        assert_eq!(filter.to_string(), "debug");
    }
}
