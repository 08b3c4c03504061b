//! Shared plumbing of the device proxies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use av_discovery::{DeviceDescription, ServiceDescription};
use tracing::debug;

use crate::error::{ControlError, Result};
use crate::invoker::{ActionArgs, ActionInvoker};

/// Description, action invoker and detached flag of one remote device
pub(crate) struct DeviceCore {
    description: DeviceDescription,
    invoker: Arc<dyn ActionInvoker>,
    detached: AtomicBool,
}

impl DeviceCore {
    pub(crate) fn new(description: DeviceDescription, invoker: Arc<dyn ActionInvoker>) -> Self {
        Self {
            description,
            invoker,
            detached: AtomicBool::new(false),
        }
    }

    pub(crate) fn description(&self) -> &DeviceDescription {
        &self.description
    }

    pub(crate) fn udn(&self) -> &str {
        &self.description.udn
    }

    pub(crate) fn service(&self, name: &str) -> Result<&ServiceDescription> {
        self.description
            .find_service(name)
            .ok_or_else(|| ControlError::MissingService {
                udn: self.description.udn.clone(),
                service: name.to_string(),
            })
    }

    pub(crate) fn detach(&self) -> bool {
        !self.detached.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_attached(&self) -> Result<()> {
        if self.is_detached() {
            return Err(ControlError::DeviceGone {
                udn: self.description.udn.clone(),
            });
        }
        Ok(())
    }

    /// Invoke `action` on the service of short type `service`.
    ///
    /// Fails with `DeviceGone` if the device was detached before the call or
    /// while it was in flight.
    pub(crate) async fn call(
        &self,
        service: &str,
        action: &str,
        args: ActionArgs,
    ) -> Result<HashMap<String, String>> {
        self.ensure_attached()?;
        let target = self.service(service)?;

        debug!(udn = %self.udn(), %service, %action, "Calling action");
        let response = self
            .invoker
            .call(&target.control_url, &target.service_type, action, &args)
            .await?;

        self.ensure_attached()?;
        Ok(response)
    }
}

/// Output argument `name` of an action response
pub(crate) fn output<'a>(
    response: &'a HashMap<String, String>,
    action: &str,
    name: &str,
) -> Result<&'a str> {
    response
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| ControlError::InvalidResponse {
            action: action.to_string(),
            reason: format!("missing {name}"),
        })
}
