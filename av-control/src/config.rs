//! Configuration for the control point and its playback controllers.

use std::time::Duration;

use av_discovery::DiscoveryConfig;
use av_eventing::EventingConfig;

use crate::error::{ControlError, Result};

/// Configuration for a [`PlaybackController`](crate::PlaybackController)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// How long play/stop wait for the renderer to report the new state
    /// Default: 10 seconds
    pub transition_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            transition_timeout: Duration::from_secs(10),
        }
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.transition_timeout.is_zero() {
            return Err(ControlError::InvalidConfig(
                "Transition timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_transition_timeout(mut self, timeout: Duration) -> Self {
        self.transition_timeout = timeout;
        self
    }
}

/// Configuration for a [`ControlPoint`](crate::ControlPoint)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlPointConfig {
    pub discovery: DiscoveryConfig,
    pub eventing: EventingConfig,
    pub controller: ControllerConfig,

    /// Timeout for fetching a device description
    /// Default: 5 seconds
    pub description_timeout: Option<Duration>,
}

impl ControlPointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate every part of the configuration
    pub fn validate(&self) -> Result<()> {
        self.discovery
            .validate()
            .map_err(|e| ControlError::InvalidConfig(e.to_string()))?;
        self.eventing
            .validate()
            .map_err(|e| ControlError::InvalidConfig(e.to_string()))?;
        self.controller.validate()?;

        if self.description_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ControlError::InvalidConfig(
                "Description timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective description fetch timeout
    pub fn description_timeout(&self) -> Duration {
        self.description_timeout.unwrap_or(Duration::from_secs(5))
    }

    pub fn with_discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_eventing(mut self, eventing: EventingConfig) -> Self {
        self.eventing = eventing;
        self
    }

    pub fn with_controller(mut self, controller: ControllerConfig) -> Self {
        self.controller = controller;
        self
    }

    pub fn with_description_timeout(mut self, timeout: Duration) -> Self {
        self.description_timeout = Some(timeout);
        self
    }
}
