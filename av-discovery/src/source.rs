//! Raw event sources feeding the discovery pipeline.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::error::Result;
use crate::ssdp::RawAdvertisement;

/// Continuous source of unsolicited advertisements.
#[async_trait]
pub trait AdvertisementSource: Send + Sync {
    /// Forward advertisements to `sink` until `shutdown` fires or the sink
    /// is closed.
    async fn listen(
        &self,
        sink: mpsc::Sender<RawAdvertisement>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<()>;
}

/// One-shot active search.
#[async_trait]
pub trait DeviceSearcher: Send + Sync {
    /// Search for `search_target` and return every response received within
    /// the response window derived from `mx`.
    async fn search(&self, search_target: &str, mx: Duration) -> Result<Vec<RawAdvertisement>>;
}
