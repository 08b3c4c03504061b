//! Identifiers and payloads of subscribable services.

use std::collections::HashMap;
use std::fmt;

/// A service of a remote device that can be subscribed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceRef {
    pub device_udn: String,
    /// e.g. `urn:schemas-upnp-org:service:AVTransport:1`
    pub service_type: String,
    /// Absolute `eventSubURL`
    pub event_sub_url: String,
}

impl ServiceRef {
    pub fn new(
        device_udn: impl Into<String>,
        service_type: impl Into<String>,
        event_sub_url: impl Into<String>,
    ) -> Self {
        Self {
            device_udn: device_udn.into(),
            service_type: service_type.into(),
            event_sub_url: event_sub_url.into(),
        }
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_udn, self.service_type)
    }
}

/// A parsed event notification for a subscribed service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNotification {
    pub service: ServiceRef,
    pub sid: String,
    pub sequence: Option<u32>,
    /// Evented state variables by name, values unescaped
    pub variables: HashMap<String, String>,
}

impl ServiceNotification {
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }
}
