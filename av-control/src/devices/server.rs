//! Media server proxy.

use std::fmt;
use std::sync::Arc;

use av_discovery::DeviceDescription;
use tracing::debug;

use super::base::{output, DeviceCore};
use crate::didl::DidlLite;
use crate::error::{ControlError, Result};
use crate::invoker::{args, ActionInvoker};

const CONTENT_DIRECTORY: &str = "ContentDirectory";

/// One page of a `BrowseDirectChildren` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseResult {
    pub didl: DidlLite,
    pub number_returned: u32,
    pub total_matches: u32,
}

/// Proxy for a remote media server's content directory
pub struct MediaServer {
    core: DeviceCore,
}

impl MediaServer {
    pub fn new(description: DeviceDescription, invoker: Arc<dyn ActionInvoker>) -> Self {
        Self {
            core: DeviceCore::new(description, invoker),
        }
    }

    pub fn udn(&self) -> &str {
        self.core.udn()
    }

    pub fn friendly_name(&self) -> &str {
        &self.core.description().friendly_name
    }

    pub fn location(&self) -> &str {
        &self.core.description().location
    }

    pub fn description(&self) -> &DeviceDescription {
        self.core.description()
    }

    pub fn is_detached(&self) -> bool {
        self.core.is_detached()
    }

    /// Metadata of a single object
    pub async fn browse_metadata(&self, object_id: &str) -> Result<DidlLite> {
        let result = self.browse(object_id, "BrowseMetadata", 0, 0).await?;
        Ok(result.didl)
    }

    /// Children of a container, `count == 0` requests all of them
    pub async fn browse_children(&self, object_id: &str, start: u32, count: u32) -> Result<BrowseResult> {
        self.browse(object_id, "BrowseDirectChildren", start, count).await
    }

    async fn browse(&self, object_id: &str, flag: &str, start: u32, count: u32) -> Result<BrowseResult> {
        debug!(udn = %self.udn(), %object_id, %flag, "Browsing");
        let response = self
            .core
            .call(
                CONTENT_DIRECTORY,
                "Browse",
                args([
                    ("ObjectID", object_id.to_string()),
                    ("BrowseFlag", flag.to_string()),
                    ("Filter", "*".to_string()),
                    ("StartingIndex", start.to_string()),
                    ("RequestedCount", count.to_string()),
                    ("SortCriteria", String::new()),
                ]),
            )
            .await?;

        let didl = DidlLite::from_xml(output(&response, "Browse", "Result")?)?;
        let number = |name: &str| -> Result<u32> {
            match response.get(name) {
                Some(value) => value.trim().parse().map_err(|_| ControlError::InvalidResponse {
                    action: "Browse".to_string(),
                    reason: format!("{name} is not a number: {value}"),
                }),
                None => Ok(didl.objects.len() as u32),
            }
        };

        Ok(BrowseResult {
            number_returned: number("NumberReturned")?,
            total_matches: number("TotalMatches")?,
            didl,
        })
    }

    pub(crate) fn detach(&self) -> bool {
        self.core.detach()
    }
}

impl fmt::Debug for MediaServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaServer")
            .field("udn", &self.udn())
            .field("friendly_name", &self.friendly_name())
            .finish()
    }
}
