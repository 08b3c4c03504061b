//! Error types for the control point

use std::time::Duration;

use av_discovery::DiscoveryError;
use av_eventing::EventingError;
use observable::WaitError;
use soap_client::SoapError;

use crate::devices::TransportState;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// No device with this UDN is known (or it is not of the requested kind)
    #[error("Device not found: {udn}")]
    NotFound { udn: String },

    #[error("Queue index {index} out of range for {len} items")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The device left the network; its proxy no longer talks to it
    #[error("Device {udn} is gone")]
    DeviceGone { udn: String },

    #[error("Device {udn} has no {service} service")]
    MissingService { udn: String, service: String },

    #[error("Unexpected response to {action}: {reason}")]
    InvalidResponse { action: String, reason: String },

    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("No resource of {object_id} is playable on this renderer")]
    NoPlayableResource { object_id: String },

    #[error("Renderer did not report {expected} within {timeout:?}")]
    TransitionTimeout {
        expected: TransportState,
        timeout: Duration,
    },

    #[error("Playback transition failed: {0}")]
    Transition(String),

    #[error("Control point is not running")]
    NotRunning,

    #[error("Control point is already running")]
    AlreadyRunning,

    #[error("SOAP error: {0}")]
    Soap(#[from] SoapError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Eventing error: {0}")]
    Eventing(#[from] EventingError),
}

impl ControlError {
    pub(crate) fn not_found(udn: impl Into<String>) -> Self {
        ControlError::NotFound { udn: udn.into() }
    }

    /// Flatten a failed wait for `expected` into a control error
    pub(crate) fn from_wait(error: WaitError<ControlError>, expected: TransportState) -> Self {
        match error {
            WaitError::Action(e) => e,
            WaitError::Timeout(timeout) => ControlError::TransitionTimeout { expected, timeout },
            WaitError::PredicateFailed => {
                ControlError::Transition("state predicate failed".to_string())
            }
            WaitError::Closed => ControlError::Transition("player state stream closed".to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
