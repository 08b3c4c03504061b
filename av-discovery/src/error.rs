//! Error types for the discovery system.

use std::io;

/// Error type for discovery operations.
///
/// Network and parse failures of individual advertisements never surface
/// here; they are dropped by the pipeline. These errors are reported by the
/// sources themselves, by description resolution and by configuration.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Socket creation, multicast membership or send/receive failures
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed SSDP message or device description
    #[error("Parse error: {0}")]
    Parse(String),

    /// The device description at `location` could not be fetched or understood
    #[error("Failed to resolve device description at {location}: {reason}")]
    Resolution { location: String, reason: String },

    #[error("Invalid discovery configuration: {0}")]
    InvalidConfig(String),

    /// `start` was called on a pipeline that is already running
    #[error("Discovery pipeline is already running")]
    AlreadyRunning,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;
