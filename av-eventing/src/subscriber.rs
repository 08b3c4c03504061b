//! GENA request seam used by the notification backend.

use async_trait::async_trait;
use soap_client::{SoapClient, SoapError, SubscriptionResponse};

/// The remote half of a subscription lease.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout_seconds: u32,
    ) -> Result<SubscriptionResponse, SoapError>;

    async fn renew(
        &self,
        event_url: &str,
        sid: &str,
        timeout_seconds: u32,
    ) -> Result<SubscriptionResponse, SoapError>;

    async fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<(), SoapError>;
}

#[async_trait]
impl EventSubscriber for SoapClient {
    async fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout_seconds: u32,
    ) -> Result<SubscriptionResponse, SoapError> {
        SoapClient::subscribe(self, event_url, callback_url, timeout_seconds).await
    }

    async fn renew(
        &self,
        event_url: &str,
        sid: &str,
        timeout_seconds: u32,
    ) -> Result<SubscriptionResponse, SoapError> {
        self.renew_subscription(event_url, sid, timeout_seconds).await
    }

    async fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<(), SoapError> {
        SoapClient::unsubscribe(self, event_url, sid).await
    }
}
