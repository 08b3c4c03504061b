//! Logging setup for control point applications.
//!
//! Library code only emits `tracing` events; binaries pick an output mode
//! here once at startup.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Environment variable overriding the default log level or filter
pub const LOG_LEVEL_ENV: &str = "AVCONTROL_LOG_LEVEL";

/// Environment variable selecting the mode for [`init_logging_from_env`]
pub const LOG_MODE_ENV: &str = "AVCONTROL_LOG_MODE";

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No subscriber installed, every event is dropped
    Silent,
    /// Compact stderr output at `info`
    Development,
    /// Pretty output at `debug` with file, line and thread ids
    Debug,
    /// One JSON object per event at `info`, for log shippers
    Json,
}

impl LoggingMode {
    /// Parse a mode name as used in [`LOG_MODE_ENV`]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "silent" => Some(LoggingMode::Silent),
            "development" | "dev" => Some(LoggingMode::Development),
            "debug" => Some(LoggingMode::Debug),
            "json" => Some(LoggingMode::Json),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
}

/// Install a global subscriber for `mode`.
///
/// `AVCONTROL_LOG_LEVEL` (then `RUST_LOG`) overrides the mode's default
/// level, e.g. `AVCONTROL_LOG_LEVEL=av_eventing=trace,info`.
///
/// Fails if a global subscriber is already set.
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => Registry::default()
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .compact(),
            )
            .with(create_env_filter("info")?)
            .try_init()
            .map_err(|e| LoggingError::TracingInit(e.to_string())),
        LoggingMode::Debug => Registry::default()
            .with(
                fmt::layer()
                    .pretty()
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(create_env_filter("debug")?)
            .try_init()
            .map_err(|e| LoggingError::TracingInit(e.to_string())),
        LoggingMode::Json => Registry::default()
            .with(fmt::layer().json().with_current_span(false))
            .with(create_env_filter("info")?)
            .try_init()
            .map_err(|e| LoggingError::TracingInit(e.to_string())),
    }
}

/// Initialize logging with the mode named by `AVCONTROL_LOG_MODE`.
///
/// Unknown or missing values fall back to [`LoggingMode::Development`].
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = std::env::var(LOG_MODE_ENV)
        .ok()
        .and_then(|name| LoggingMode::from_name(&name))
        .unwrap_or(LoggingMode::Development);
    init_logging(mode)
}

fn create_env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    let directives = std::env::var(LOG_LEVEL_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_level.to_string());

    EnvFilter::try_new(&directives).map_err(|e| LoggingError::InvalidFilter(e.to_string()))
}

/// Whether a global subscriber is installed
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}
