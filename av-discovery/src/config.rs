//! Configuration for the discovery pipeline.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::{DiscoveryError, Result};

/// Default interval between M-SEARCH rounds
pub const DEFAULT_SEARCH_INTERVAL: Duration = Duration::from_secs(300);

/// Default search targets: media servers and renderers, version 1.
pub const DEFAULT_SEARCH_TARGETS: [&str; 2] = [
    "urn:schemas-upnp-org:device:MediaServer:1",
    "urn:schemas-upnp-org:device:MediaRenderer:1",
];

/// Configuration for the [`DiscoveryPipeline`](crate::DiscoveryPipeline)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Interval between active searches, the first one runs at start
    /// Default: 300 seconds
    pub search_interval: Duration,

    /// MX value of each M-SEARCH; responses are collected for MX + 1 seconds
    /// Default: 3 seconds
    pub search_timeout: Duration,

    /// Search targets sent with each search round
    /// Default: MediaServer:1 and MediaRenderer:1
    pub search_targets: Vec<String>,

    /// Interface address used to join the multicast group
    /// Default: 0.0.0.0 (OS choice)
    pub listen_address: Ipv4Addr,

    /// Capacity of the raw and typed event channels
    /// Default: 256
    pub channel_capacity: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            search_interval: DEFAULT_SEARCH_INTERVAL,
            search_timeout: Duration::from_secs(3),
            search_targets: DEFAULT_SEARCH_TARGETS.iter().map(|s| s.to_string()).collect(),
            listen_address: Ipv4Addr::UNSPECIFIED,
            channel_capacity: 256,
        }
    }
}

impl DiscoveryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.search_interval.is_zero() {
            return Err(DiscoveryError::InvalidConfig(
                "Search interval must be greater than 0".to_string(),
            ));
        }

        let mx = self.search_timeout.as_secs();
        if !(1..=5).contains(&mx) {
            return Err(DiscoveryError::InvalidConfig(format!(
                "Search timeout must be between 1 and 5 seconds, got {}",
                mx
            )));
        }

        if self.search_targets.is_empty() {
            return Err(DiscoveryError::InvalidConfig(
                "At least one search target is required".to_string(),
            ));
        }

        if self.channel_capacity == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "Channel capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_search_interval(mut self, interval: Duration) -> Self {
        self.search_interval = interval;
        self
    }

    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    pub fn with_search_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_listen_address(mut self, address: Ipv4Addr) -> Self {
        self.listen_address = address;
        self
    }
}
