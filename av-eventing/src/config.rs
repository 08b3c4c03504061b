//! Configuration for the notification backend.

use std::net::IpAddr;
use std::time::Duration;

use crate::error::{EventingError, Result};

/// Default first port tried for the callback endpoint
pub const DEFAULT_CALLBACK_PORT: u16 = 51234;

/// Configuration for the [`NotificationBackend`](crate::NotificationBackend)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventingConfig {
    /// Lease duration requested with every SUBSCRIBE; each lease is renewed
    /// at half of what the device grants
    /// Default: 1800 seconds
    pub lease_duration: Duration,

    /// Ports tried for the callback endpoint, `(0, 0)` for an ephemeral port
    /// Default: (51234, 51334)
    pub callback_port_range: (u16, u16),

    /// Address put into the CALLBACK header instead of the detected one
    /// Default: None
    pub advertised_address: Option<IpAddr>,
}

impl Default for EventingConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(1800),
            callback_port_range: (DEFAULT_CALLBACK_PORT, DEFAULT_CALLBACK_PORT + 100),
            advertised_address: None,
        }
    }
}

impl EventingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake-up interval of the renewal loop while no lease is held
    pub fn renewal_period(&self) -> Duration {
        self.lease_duration / 2
    }

    /// Lease duration in whole seconds as sent in the TIMEOUT header
    pub fn lease_seconds(&self) -> u32 {
        u32::try_from(self.lease_duration.as_secs()).unwrap_or(u32::MAX)
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.lease_duration < Duration::from_secs(2) {
            return Err(EventingError::InvalidConfig(
                "Lease duration must be at least 2 seconds".to_string(),
            ));
        }

        if self.lease_duration.as_secs() > u64::from(u32::MAX) {
            return Err(EventingError::InvalidConfig(
                "Lease duration does not fit a TIMEOUT header".to_string(),
            ));
        }

        let (start, end) = self.callback_port_range;
        if start > end {
            return Err(EventingError::InvalidConfig(format!(
                "Invalid callback port range {}-{}: start must not exceed end",
                start, end
            )));
        }

        Ok(())
    }

    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    pub fn with_callback_ports(mut self, start: u16, end: u16) -> Self {
        self.callback_port_range = (start, end);
        self
    }

    pub fn with_advertised_address(mut self, address: IpAddr) -> Self {
        self.advertised_address = Some(address);
        self
    }
}
