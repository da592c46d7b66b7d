//! Structured logging setup.

use edge_core::{LogFormat, LogSettings};
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` when set, otherwise the configured level.
pub fn env_filter(settings: &LogSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Logs go to stderr (Spin captures it). Returns `false` when a subscriber
/// was already installed; calling this twice is harmless.
pub fn init_tracing(settings: &LogSettings) -> bool {
    let builder = fmt()
        .with_env_filter(env_filter(settings))
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = match settings.format {
        LogFormat::Json => builder
            .json()
            .with_current_span(false)
            .flatten_event(true)
            .try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let settings = LogSettings::default();
        init_tracing(&settings);
        assert!(!init_tracing(&settings));
    }

    #[test]
    fn test_invalid_level_falls_back() {
        let settings = LogSettings {
            level: "not a directive[".to_string(),
            ..LogSettings::default()
        };
        // Must not panic.
        let _ = env_filter(&settings);
    }
}
