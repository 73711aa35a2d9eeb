//! Logging setup for the engine binary and embedding applications.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{LineEngineError, Result};

/// Set up the global tracing subscriber from the `[logging]` section.
///
/// `RUST_LOG` wins over the configured level when it is set.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::try_new(&config.level)
            .map_err(|e| LineEngineError::config(format!("Invalid log level '{}': {}", config.level, e)))?,
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| LineEngineError::internal(format!("Failed to install subscriber: {}", e)))
}

/// Log a welcome message with version info
pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!("🚀 Starting {} v{}", app_name, version);
}
