//! Media renderer proxy.
//!
//! Transport and volume actions go straight to the device. Playback state is
//! published through an [`Observable<PlaybackInfo>`]; the AVTransport and
//! RenderingControl event subscriptions behind it exist only while somebody
//! is subscribed.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use av_discovery::DeviceDescription;
use av_eventing::{NotificationBackend, ServiceNotification, ServiceRef};
use observable::{CallbackResult, Observable, Subscription};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::base::{output, DeviceCore};
use super::playback_info::{LastChange, PlaybackInfo, TransportState};
use crate::error::{ControlError, Result};
use crate::invoker::{args, ActionInvoker};
use crate::protocol_info::{parse_protocol_infos, ProtocolInfoEntry};

const AV_TRANSPORT: &str = "AVTransport";
const RENDERING_CONTROL: &str = "RenderingControl";
const CONNECTION_MANAGER: &str = "ConnectionManager";

/// Live event subscriptions of one renderer
struct EventPump {
    services: Vec<ServiceRef>,
    task: JoinHandle<()>,
}

/// Proxy for a remote media renderer
pub struct MediaRenderer {
    core: DeviceCore,
    backend: NotificationBackend,
    info: Observable<PlaybackInfo>,
    state: Mutex<PlaybackInfo>,
    eventing: tokio::sync::Mutex<Option<EventPump>>,
    /// Set once an event arrived for the current subscriptions
    events_seen: AtomicBool,
}

impl MediaRenderer {
    pub fn new(
        description: DeviceDescription,
        invoker: Arc<dyn ActionInvoker>,
        backend: NotificationBackend,
    ) -> Arc<Self> {
        let renderer = Arc::new(Self {
            core: DeviceCore::new(description, invoker),
            backend,
            info: Observable::with_replay(),
            state: Mutex::new(PlaybackInfo::default()),
            eventing: tokio::sync::Mutex::new(None),
            events_seen: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&renderer);
        renderer.info.set_on_subscription_change(move |count| {
            let weak = weak.clone();
            async move {
                if let Some(renderer) = weak.upgrade() {
                    renderer.on_subscriber_count(count).await;
                }
            }
        });

        renderer
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

    /// Master volume, 0-100
    pub async fn get_volume(&self) -> Result<u8> {
        let response = self
            .core
            .call(
                RENDERING_CONTROL,
                "GetVolume",
                args([("InstanceID", "0".to_string()), ("Channel", "Master".to_string())]),
            )
            .await?;

        let value = output(&response, "GetVolume", "CurrentVolume")?;
        value
            .trim()
            .parse::<u8>()
            .map(|volume| volume.min(100))
            .map_err(|_| ControlError::InvalidResponse {
                action: "GetVolume".to_string(),
                reason: format!("CurrentVolume is not a volume: {value}"),
            })
    }

    /// Set the master volume; values above 100 are clamped
    pub async fn set_volume(&self, volume: u8) -> Result<()> {
        self.core
            .call(
                RENDERING_CONTROL,
                "SetVolume",
                args([
                    ("InstanceID", "0".to_string()),
                    ("Channel", "Master".to_string()),
                    ("DesiredVolume", volume.min(100).to_string()),
                ]),
            )
            .await?;
        Ok(())
    }

    /// Protocols the renderer accepts, unusable entries skipped
    pub async fn get_protocol_info(&self) -> Result<Vec<ProtocolInfoEntry>> {
        let response = self
            .core
            .call(CONNECTION_MANAGER, "GetProtocolInfo", Vec::new())
            .await?;
        Ok(parse_protocol_infos(output(&response, "GetProtocolInfo", "Sink")?))
    }

    pub async fn get_transport_info(&self) -> Result<TransportState> {
        let response = self
            .core
            .call(AV_TRANSPORT, "GetTransportInfo", args([("InstanceID", "0".to_string())]))
            .await?;
        Ok(TransportState::parse(output(
            &response,
            "GetTransportInfo",
            "CurrentTransportState",
        )?))
    }

    /// `SetAVTransportURI` with the DIDL-Lite metadata of the media
    pub async fn set_transport_uri(&self, uri: &str, metadata: &str) -> Result<()> {
        debug!(udn = %self.udn(), %uri, "Setting transport URI");
        self.core
            .call(
                AV_TRANSPORT,
                "SetAVTransportURI",
                args([
                    ("InstanceID", "0".to_string()),
                    ("CurrentURI", uri.to_string()),
                    ("CurrentURIMetaData", metadata.to_string()),
                ]),
            )
            .await?;
        Ok(())
    }

    pub async fn transport_play(&self) -> Result<()> {
        self.core
            .call(
                AV_TRANSPORT,
                "Play",
                args([("InstanceID", "0".to_string()), ("Speed", "1".to_string())]),
            )
            .await?;
        Ok(())
    }

    pub async fn transport_stop(&self) -> Result<()> {
        self.core
            .call(AV_TRANSPORT, "Stop", args([("InstanceID", "0".to_string())]))
            .await?;
        Ok(())
    }

    /// Receive playback info updates.
    ///
    /// The first subscriber starts the renderer's event subscriptions; a late
    /// subscriber immediately gets the latest known info.
    pub async fn subscribe_notifications<F, Fut>(&self, callback: F) -> Subscription
    where
        F: Fn(PlaybackInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.info.subscribe(callback).await
    }

    /// Latest known playback info
    pub fn playback_info(&self) -> PlaybackInfo {
        self.state.lock().clone()
    }

    pub fn playback_observable(&self) -> Observable<PlaybackInfo> {
        self.info.clone()
    }

    /// Mark the renderer as gone and release its event subscriptions
    pub(crate) async fn detach(&self) -> bool {
        let first = self.core.detach();
        if first {
            self.stop_eventing().await;
        }
        first
    }

    async fn on_subscriber_count(self: Arc<Self>, count: usize) {
        if count == 0 {
            self.stop_eventing().await;
        } else if !self.core.is_detached() {
            self.start_eventing().await;
        }
    }

    async fn start_eventing(self: &Arc<Self>) {
        let mut eventing = self.eventing.lock().await;
        if eventing.is_some() {
            return;
        }

        self.events_seen.store(false, Ordering::SeqCst);
        let (sink, notifications) = mpsc::unbounded_channel();
        let mut services = Vec::new();
        for name in [AV_TRANSPORT, RENDERING_CONTROL] {
            let service = match self.core.service(name) {
                Ok(service) => service,
                Err(error) => {
                    warn!(udn = %self.udn(), %error, "Renderer cannot be evented");
                    continue;
                }
            };
            let service = ServiceRef::new(
                self.udn(),
                service.service_type.clone(),
                service.event_sub_url.clone(),
            );
            match self.backend.subscribe(&service, sink.clone()).await {
                Ok(sid) => {
                    debug!(udn = %self.udn(), %sid, service = %service.service_type, "Subscribed to renderer events");
                    services.push(service);
                }
                Err(error) => {
                    warn!(udn = %self.udn(), service = %service.service_type, %error, "Failed to subscribe to renderer events");
                }
            }
        }

        let task = tokio::spawn(pump_notifications(Arc::downgrade(self), notifications));
        *eventing = Some(EventPump { services, task });
        drop(eventing);

        // Devices do not reliably send the initial event, ask for the state
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            if let Some(renderer) = weak.upgrade() {
                renderer.refresh_state().await;
            }
        });
    }

    async fn stop_eventing(&self) {
        let Some(pump) = self.eventing.lock().await.take() else {
            return;
        };

        for service in &pump.services {
            if let Err(error) = self.backend.unsubscribe(service).await {
                debug!(udn = %self.udn(), service = %service.service_type, %error, "Unsubscribe failed");
            }
        }
        pump.task.abort();
        info!(udn = %self.udn(), "Renderer events released");
    }

    async fn refresh_state(&self) {
        let mut change = LastChange::default();
        match self.get_transport_info().await {
            Ok(state) => change.transport_state = Some(state),
            Err(error) => debug!(udn = %self.udn(), %error, "GetTransportInfo failed"),
        }
        match self.get_volume().await {
            Ok(volume) => change.master_volume = Some(volume),
            Err(error) => debug!(udn = %self.udn(), %error, "GetVolume failed"),
        }
        // an event is newer than what we just fetched
        if self.events_seen.load(Ordering::SeqCst) {
            return;
        }
        self.apply_change(&change).await;
    }

    async fn handle_notification(&self, notification: ServiceNotification) {
        let Some(xml) = notification.variable("LastChange") else {
            return;
        };
        self.events_seen.store(true, Ordering::SeqCst);
        match LastChange::parse(xml) {
            Ok(change) => self.apply_change(&change).await,
            Err(error) => {
                warn!(udn = %self.udn(), sid = %notification.sid, %error, "Ignoring malformed LastChange");
            }
        }
    }

    async fn apply_change(&self, change: &LastChange) {
        if change.is_empty() {
            return;
        }
        let updated = {
            let mut state = self.state.lock();
            state.apply(change).then(|| state.clone())
        };
        if let Some(info) = updated {
            debug!(udn = %self.udn(), transport = %info.transport, "Playback info changed");
            self.info.notify(info).await;
        }
    }
}

async fn pump_notifications(
    renderer: Weak<MediaRenderer>,
    mut notifications: mpsc::UnboundedReceiver<ServiceNotification>,
) {
    while let Some(notification) = notifications.recv().await {
        let Some(renderer) = renderer.upgrade() else {
            break;
        };
        renderer.handle_notification(notification).await;
    }
}

impl fmt::Debug for MediaRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaRenderer")
            .field("udn", &self.udn())
            .field("friendly_name", &self.friendly_name())
            .finish()
    }
}
