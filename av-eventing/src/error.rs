//! Error types for the notification backend

use callback_server::CallbackServerError;
use soap_client::SoapError;

#[derive(Debug, thiserror::Error)]
pub enum EventingError {
    /// The remote device refused or failed the `SUBSCRIBE` request
    #[error("Failed to subscribe to {service}: {source}")]
    Subscribe {
        service: String,
        #[source]
        source: SoapError,
    },

    /// The remote `UNSUBSCRIBE` failed; the lease has been discarded anyway
    #[error("Failed to unsubscribe {sid}: {source}")]
    Unsubscribe {
        sid: String,
        #[source]
        source: SoapError,
    },

    #[error("No subscription held for {0}")]
    NotSubscribed(String),

    #[error("Notification backend is not running")]
    NotRunning,

    #[error("Invalid eventing configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed event notification: {0}")]
    MalformedEvent(String),

    #[error("Callback server error: {0}")]
    CallbackServer(#[from] CallbackServerError),
}

pub type Result<T> = std::result::Result<T, EventingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_error_display() {
        let error = EventingError::Subscribe {
            service: "urn:schemas-upnp-org:service:AVTransport:1".to_string(),
            source: SoapError::Status(412),
        };
        assert_eq!(
            error.to_string(),
            "Failed to subscribe to urn:schemas-upnp-org:service:AVTransport:1: Unexpected HTTP status 412"
        );
    }

    #[test]
    fn test_callback_server_error_conversion() {
        let error: EventingError = CallbackServerError::StartupFailed.into();
        assert!(matches!(error, EventingError::CallbackServer(_)));
    }
}
