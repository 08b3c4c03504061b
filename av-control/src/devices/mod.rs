//! Typed proxies for discovered media devices.

mod base;
pub mod playback_info;
pub mod renderer;
pub mod server;

use std::sync::Arc;

use av_discovery::MediaDeviceKind;

pub use playback_info::{LastChange, PlaybackInfo, TrackInfo, TransportState};
pub use renderer::MediaRenderer;
pub use server::{BrowseResult, MediaServer};

/// A device held by the registry
#[derive(Debug, Clone)]
pub enum MediaDevice {
    Server(Arc<MediaServer>),
    Renderer(Arc<MediaRenderer>),
}

impl MediaDevice {
    pub fn udn(&self) -> &str {
        match self {
            MediaDevice::Server(server) => server.udn(),
            MediaDevice::Renderer(renderer) => renderer.udn(),
        }
    }

    pub fn friendly_name(&self) -> &str {
        match self {
            MediaDevice::Server(server) => server.friendly_name(),
            MediaDevice::Renderer(renderer) => renderer.friendly_name(),
        }
    }

    pub fn kind(&self) -> MediaDeviceKind {
        match self {
            MediaDevice::Server(_) => MediaDeviceKind::MediaServer,
            MediaDevice::Renderer(_) => MediaDeviceKind::MediaRenderer,
        }
    }

    pub fn as_server(&self) -> Option<&Arc<MediaServer>> {
        match self {
            MediaDevice::Server(server) => Some(server),
            MediaDevice::Renderer(_) => None,
        }
    }

    pub fn as_renderer(&self) -> Option<&Arc<MediaRenderer>> {
        match self {
            MediaDevice::Renderer(renderer) => Some(renderer),
            MediaDevice::Server(_) => None,
        }
    }

    /// Cut the proxy off from the network; later calls fail with `DeviceGone`
    pub(crate) async fn detach(&self) {
        match self {
            MediaDevice::Server(server) => {
                server.detach();
            }
            MediaDevice::Renderer(renderer) => {
                renderer.detach().await;
            }
        }
    }
}
