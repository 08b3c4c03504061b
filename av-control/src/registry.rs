//! Device registry fed by the discovery pipeline.
//!
//! The registry holds at most one entry per UDN. New devices get their
//! description resolved and a typed proxy built before they are announced;
//! lost devices are detached and announced as removed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use av_discovery::{DescriptionResolver, DiscoveryEvent, DiscoveryEventType, MediaDeviceKind};
use av_eventing::NotificationBackend;
use observable::{CallbackResult, Observable, Subscription};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::devices::{MediaDevice, MediaRenderer, MediaServer};
use crate::error::{ControlError, Result};
use crate::invoker::ActionInvoker;
use crate::player::ServerLookup;

/// What the registry knows about one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    /// URL of the device description
    pub location: String,
    pub udn: String,
    pub kind: MediaDeviceKind,
    /// Full device type, e.g. `urn:schemas-upnp-org:device:MediaRenderer:1`
    pub device_type: String,
    pub friendly_name: String,
    /// Last advertisement or search response for the device
    pub last_seen: Instant,
}

/// Devices joining and leaving the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Added(DeviceEntry),
    Removed(DeviceEntry),
}

impl DeviceEvent {
    pub fn entry(&self) -> &DeviceEntry {
        match self {
            DeviceEvent::Added(entry) | DeviceEvent::Removed(entry) => entry,
        }
    }

    pub fn is_added(&self) -> bool {
        matches!(self, DeviceEvent::Added(_))
    }
}

struct Record {
    entry: DeviceEntry,
    device: MediaDevice,
}

/// Known media devices by UDN
pub struct Registry {
    resolver: Arc<dyn DescriptionResolver>,
    invoker: Arc<dyn ActionInvoker>,
    backend: NotificationBackend,
    devices: RwLock<HashMap<String, Record>>,
    events: Observable<DeviceEvent>,
}

impl Registry {
    pub fn new(
        resolver: Arc<dyn DescriptionResolver>,
        invoker: Arc<dyn ActionInvoker>,
        backend: NotificationBackend,
    ) -> Self {
        Self {
            resolver,
            invoker,
            backend,
            devices: RwLock::new(HashMap::new()),
            events: Observable::new(),
        }
    }

    /// Consume discovery events until the channel closes.
    ///
    /// Must be the only consumer of the pipeline's receiver.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<DiscoveryEvent>) {
        debug!("Registry consuming discovery events");
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("Discovery stream closed");
    }

    /// Apply one discovery event
    pub async fn handle_event(&self, event: DiscoveryEvent) {
        match event.event_type {
            DiscoveryEventType::NewDevice => self.add_device(event).await,
            DiscoveryEventType::DeviceUpdate => {
                debug!(udn = %event.udn, location = ?event.location, "Ignoring device update");
            }
            DiscoveryEventType::DeviceLost => self.remove_device(&event.udn).await,
        }
    }

    async fn add_device(&self, event: DiscoveryEvent) {
        if self.refresh(&event.udn) {
            return;
        }

        let Some(location) = event.location else {
            warn!(udn = %event.udn, "New device without location");
            return;
        };

        let mut description = match self.resolver.resolve(&location).await {
            Ok(description) => description,
            Err(error) => {
                warn!(udn = %event.udn, %location, %error, "Dropping device, description unavailable");
                return;
            }
        };

        let Some(kind) = description.kind() else {
            debug!(udn = %event.udn, device_type = %description.device_type, "Not a media device");
            return;
        };

        if description.udn != event.udn {
            debug!(
                udn = %event.udn,
                described = %description.udn,
                "Description UDN differs from advertisement"
            );
            description.udn = event.udn.clone();
        }

        let entry = DeviceEntry {
            location,
            udn: event.udn.clone(),
            kind,
            device_type: description.device_type.clone(),
            friendly_name: description.friendly_name.clone(),
            last_seen: Instant::now(),
        };
        let device = match kind {
            MediaDeviceKind::MediaServer => {
                MediaDevice::Server(Arc::new(MediaServer::new(description, self.invoker.clone())))
            }
            MediaDeviceKind::MediaRenderer => MediaDevice::Renderer(MediaRenderer::new(
                description,
                self.invoker.clone(),
                self.backend.clone(),
            )),
        };

        {
            let mut devices = self.devices.write();
            if devices.contains_key(&entry.udn) {
                return;
            }
            devices.insert(
                entry.udn.clone(),
                Record {
                    entry: entry.clone(),
                    device,
                },
            );
        }

        info!(
            udn = %entry.udn,
            kind = %entry.kind,
            name = %entry.friendly_name,
            "Device added"
        );
        self.events.notify(DeviceEvent::Added(entry)).await;
    }

    /// Liveness bookkeeping for a known device
    fn refresh(&self, udn: &str) -> bool {
        match self.devices.write().get_mut(udn) {
            Some(record) => {
                record.entry.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    async fn remove_device(&self, udn: &str) {
        let Some(record) = self.devices.write().remove(udn) else {
            debug!(%udn, "Lost device was not known");
            return;
        };

        record.device.detach().await;
        info!(%udn, kind = %record.entry.kind, "Device removed");
        self.events.notify(DeviceEvent::Removed(record.entry)).await;
    }

    /// Remove every device, announcing each removal
    pub async fn clear(&self) {
        let records: Vec<Record> = self.devices.write().drain().map(|(_, record)| record).collect();
        for record in records {
            record.device.detach().await;
            self.events.notify(DeviceEvent::Removed(record.entry)).await;
        }
    }

    pub fn get_device(&self, udn: &str) -> Result<MediaDevice> {
        self.devices
            .read()
            .get(udn)
            .map(|record| record.device.clone())
            .ok_or_else(|| ControlError::not_found(udn))
    }

    pub fn get_media_server(&self, udn: &str) -> Result<Arc<MediaServer>> {
        match self.get_device(udn)? {
            MediaDevice::Server(server) => Ok(server),
            MediaDevice::Renderer(_) => Err(ControlError::not_found(udn)),
        }
    }

    pub fn get_media_renderer(&self, udn: &str) -> Result<Arc<MediaRenderer>> {
        match self.get_device(udn)? {
            MediaDevice::Renderer(renderer) => Ok(renderer),
            MediaDevice::Server(_) => Err(ControlError::not_found(udn)),
        }
    }

    pub fn entry(&self, udn: &str) -> Option<DeviceEntry> {
        self.devices.read().get(udn).map(|record| record.entry.clone())
    }

    /// All entries, sorted by UDN
    pub fn entries(&self) -> Vec<DeviceEntry> {
        let mut entries: Vec<DeviceEntry> = self
            .devices
            .read()
            .values()
            .map(|record| record.entry.clone())
            .collect();
        entries.sort_by(|a, b| a.udn.cmp(&b.udn));
        entries
    }

    pub fn media_servers(&self) -> Vec<DeviceEntry> {
        self.entries_of(MediaDeviceKind::MediaServer)
    }

    pub fn media_renderers(&self) -> Vec<DeviceEntry> {
        self.entries_of(MediaDeviceKind::MediaRenderer)
    }

    fn entries_of(&self, kind: MediaDeviceKind) -> Vec<DeviceEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.kind == kind)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Receive added/removed device events
    pub async fn on_device_event<F, Fut>(&self, callback: F) -> Subscription
    where
        F: Fn(DeviceEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.events.subscribe(callback).await
    }

    pub fn events(&self) -> Observable<DeviceEvent> {
        self.events.clone()
    }
}

impl ServerLookup for Registry {
    fn media_server(&self, udn: &str) -> Result<Arc<MediaServer>> {
        self.get_media_server(udn)
    }
}
