//! Error types for the SOAP client

use thiserror::Error;

/// Errors that can occur during SOAP and GENA communication
#[derive(Debug, Error)]
pub enum SoapError {
    /// Connection, timeout or transport failure
    #[error("Network/HTTP error: {0}")]
    Network(String),

    /// Malformed XML or missing response elements
    #[error("XML parsing error: {0}")]
    Parse(String),

    /// SOAP fault returned by the device, carrying the UPnP error code
    #[error("SOAP fault: error code {0}")]
    Fault(u16),

    /// Non-success HTTP status without a SOAP fault body
    #[error("Unexpected HTTP status {0}")]
    Status(u16),
}

impl SoapError {
    /// Whether the device refused the request outright.
    ///
    /// GENA publishers answer `412 Precondition Failed` for unknown or expired
    /// subscription IDs.
    pub fn is_rejection(&self) -> bool {
        matches!(self, SoapError::Status(400..=499))
    }
}

impl From<reqwest::Error> for SoapError {
    fn from(error: reqwest::Error) -> Self {
        SoapError::Network(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(SoapError::Fault(401).to_string(), "SOAP fault: error code 401");
        assert_eq!(SoapError::Status(412).to_string(), "Unexpected HTTP status 412");
    }

    #[test]
    fn test_rejection_classification() {
        assert!(SoapError::Status(412).is_rejection());
        assert!(!SoapError::Status(503).is_rejection());
        assert!(!SoapError::Network("timed out".to_string()).is_rejection());
    }
}
