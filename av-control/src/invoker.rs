//! Action invocation seam between device proxies and the SOAP client.

use std::collections::HashMap;

use async_trait::async_trait;
use soap_client::{SoapClient, SoapError};

/// Input arguments of an action, in declaration order
pub type ActionArgs = Vec<(String, String)>;

/// Invokes a UPnP action and returns its output arguments by name.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    async fn call(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        args: &[(String, String)],
    ) -> Result<HashMap<String, String>, SoapError>;
}

#[async_trait]
impl ActionInvoker for SoapClient {
    async fn call(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        args: &[(String, String)],
    ) -> Result<HashMap<String, String>, SoapError> {
        let args: Vec<(&str, String)> = args
            .iter()
            .map(|(name, value)| (name.as_str(), value.clone()))
            .collect();
        SoapClient::call(self, control_url, service_type, action, &args).await
    }
}

/// Build an argument list from name/value pairs
pub(crate) fn args<const N: usize>(pairs: [(&str, String); N]) -> ActionArgs {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}
