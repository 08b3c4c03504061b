//! Error types for the callback server

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum CallbackServerError {
    #[error("No available port found in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },

    #[error("Failed to detect local IP address")]
    LocalAddressUnavailable,

    #[error("Failed to bind callback server: {0}")]
    Bind(String),

    #[error("Callback server failed to start")]
    StartupFailed,

    #[error("Callback server task failed: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
