//! UPnP AV device discovery
//!
//! This crate turns SSDP traffic into a stream of typed discovery events for
//! media servers and renderers, and resolves device descriptions.
//!
//! # Quick Start
//!
//! ```no_run
//! use av_discovery::{DiscoveryConfig, DiscoveryPipeline};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), av_discovery::DiscoveryError> {
//! let mut pipeline = DiscoveryPipeline::ssdp(DiscoveryConfig::default());
//! let mut events = pipeline.start()?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{} {} at {:?}", event.event_type, event.udn, event.location);
//! }
//!
//! pipeline.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! Resolving what a `NEW_DEVICE` event points to:
//!
//! ```no_run
//! use av_discovery::{DescriptionResolver, HttpDescriptionResolver};
//!
//! # async fn resolve() -> Result<(), av_discovery::DiscoveryError> {
//! let description = HttpDescriptionResolver::default()
//!     .resolve("http://192.168.99.1:1234/dmr.xml")
//!     .await?;
//! println!("{} ({:?})", description.friendly_name, description.kind());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod description;
mod error;
pub mod event;
pub mod pipeline;
pub mod source;
pub mod ssdp;

pub use config::{DiscoveryConfig, DEFAULT_SEARCH_INTERVAL};
pub use description::{DescriptionResolver, DeviceDescription, HttpDescriptionResolver, ServiceDescription};
pub use error::{DiscoveryError, Result};
pub use event::{is_media_device, udn_from_usn, DiscoveryEvent, DiscoveryEventType, MediaDeviceKind};
pub use pipeline::DiscoveryPipeline;
pub use source::{AdvertisementSource, DeviceSearcher};
pub use ssdp::{AdvertisementKind, RawAdvertisement, SsdpListener, SsdpSearcher};
