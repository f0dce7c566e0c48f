//! Logging initialization for the Parley services.
//!
//! One fmt layer on a `tracing_subscriber` registry, either JSON or
//! human-readable. Transport internals (`hyper`, `h2`, `tower_http`,
//! `tokio_util`) are clamped to `warn` so conversation-level logs stay
//! readable at `debug`; setting `RUST_LOG` replaces the whole filter.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Modules clamped to `warn` in the default filter.
pub const NOISY_MODULES: &[&str] = &["hyper", "hyper_util", "h2", "tower_http", "tokio_util"];

fn default_directives(level: &str) -> String {
    let mut directives = vec![level.to_string()];
    directives.extend(NOISY_MODULES.iter().map(|module| format!("{module}=warn")));
    directives.join(",")
}

/// Install the global tracing subscriber.
///
/// `level` is the base directive (trace, debug, info, warn, error);
/// `format` selects `"json"` or human-readable output. Safe to call more
/// than once; later calls are ignored.
pub fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let registry = tracing_subscriber::registry().with(filter);

    if format == "json" {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = registry.with(layer).try_init();
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true);
        let _ = registry.with(layer).try_init();
    }

    tracing::info!(level = %level, format = %format, "logging initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_clamp_noisy_modules() {
        let directives = default_directives("debug");
        assert!(directives.starts_with("debug,"));
        for module in NOISY_MODULES {
            assert!(directives.contains(&format!("{module}=warn")));
        }
    }
}
