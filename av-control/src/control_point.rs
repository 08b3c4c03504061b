//! The running control point.
//!
//! Wires discovery, the device registry, the notification backend and one
//! playback controller per renderer together. Construct one [`ControlPoint`]
//! and share it; nothing here is global.

use std::future::Future;
use std::sync::{Arc, Weak};

use av_discovery::{
    AdvertisementSource, DescriptionResolver, DeviceSearcher, DiscoveryPipeline, HttpDescriptionResolver,
    MediaDeviceKind, SsdpListener, SsdpSearcher,
};
use av_eventing::{EventSubscriber, NotificationBackend};
use dashmap::DashMap;
use observable::{CallbackResult, Subscription};
use soap_client::SoapClient;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ControlPointConfig, ControllerConfig};
use crate::controller::PlaybackController;
use crate::devices::{MediaRenderer, MediaServer, PlaybackInfo};
use crate::error::{ControlError, Result};
use crate::invoker::ActionInvoker;
use crate::player::{RendererPlayer, ServerLookup};
use crate::registry::{DeviceEntry, DeviceEvent, Registry};

/// The network-facing pieces a control point is built from
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn DescriptionResolver>,
    pub invoker: Arc<dyn ActionInvoker>,
    pub subscriber: Arc<dyn EventSubscriber>,
    pub listener: Arc<dyn AdvertisementSource>,
    pub searcher: Arc<dyn DeviceSearcher>,
}

impl Collaborators {
    /// HTTP, SOAP and SSDP implementations for a real network
    pub fn network(config: &ControlPointConfig) -> Self {
        let soap = Arc::new(SoapClient::new());
        Self {
            resolver: Arc::new(HttpDescriptionResolver::new(config.description_timeout())),
            invoker: soap.clone(),
            subscriber: soap,
            listener: Arc::new(SsdpListener::new(config.discovery.listen_address)),
            searcher: Arc::new(SsdpSearcher::new()),
        }
    }
}

type Controllers = Arc<DashMap<String, PlaybackController>>;

struct Running {
    consumer: JoinHandle<()>,
    device_events: Subscription,
}

/// A UPnP AV control point
pub struct ControlPoint {
    config: ControlPointConfig,
    registry: Arc<Registry>,
    backend: NotificationBackend,
    pipeline: tokio::sync::Mutex<DiscoveryPipeline>,
    controllers: Controllers,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl ControlPoint {
    pub fn new(config: ControlPointConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let backend = NotificationBackend::new(config.eventing.clone(), collaborators.subscriber);
        let registry = Arc::new(Registry::new(
            collaborators.resolver,
            collaborators.invoker,
            backend.clone(),
        ));
        let pipeline = DiscoveryPipeline::new(
            config.discovery.clone(),
            collaborators.listener,
            collaborators.searcher,
        );

        Ok(Self {
            config,
            registry,
            backend,
            pipeline: tokio::sync::Mutex::new(pipeline),
            controllers: Arc::new(DashMap::new()),
            running: tokio::sync::Mutex::new(None),
        })
    }

    /// Control point on the real network
    pub fn with_network(config: ControlPointConfig) -> Result<Self> {
        let collaborators = Collaborators::network(&config);
        Self::new(config, collaborators)
    }

    pub fn config(&self) -> &ControlPointConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn backend(&self) -> &NotificationBackend {
        &self.backend
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Start eventing, then discovery and the registry consumer
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ControlError::AlreadyRunning);
        }

        self.backend.start().await?;
        let mut device_events = self.watch_renderers().await;

        let events = match self.pipeline.lock().await.start() {
            Ok(events) => events,
            Err(error) => {
                device_events.unsubscribe().await;
                if let Err(stop_error) = self.backend.stop().await {
                    warn!(error = %stop_error, "Failed to stop notification backend");
                }
                return Err(error.into());
            }
        };
        let consumer = tokio::spawn(self.registry.clone().run(events));

        *running = Some(Running {
            consumer,
            device_events,
        });
        info!("Control point started");
        Ok(())
    }

    /// Stop discovery, forget all devices and shut eventing down.
    ///
    /// Does nothing when not running.
    pub async fn stop(&self) -> Result<()> {
        let Some(mut running) = self.running.lock().await.take() else {
            return Ok(());
        };

        self.pipeline.lock().await.stop().await;
        if let Err(error) = running.consumer.await {
            if !error.is_cancelled() {
                warn!(%error, "Registry consumer failed");
            }
        }

        self.registry.clear().await;
        running.device_events.unsubscribe().await;
        let controllers: Vec<PlaybackController> = self
            .controllers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.controllers.clear();
        for controller in controllers {
            controller.release().await;
        }

        self.backend.stop().await?;
        info!("Control point stopped");
        Ok(())
    }

    /// Keep one controller per known renderer
    async fn watch_renderers(&self) -> Subscription {
        let registry: Weak<Registry> = Arc::downgrade(&self.registry);
        let controllers = self.controllers.clone();
        let config = self.config.controller.clone();

        self.registry
            .on_device_event(move |event| {
                let registry = registry.clone();
                let controllers = controllers.clone();
                let config = config.clone();
                async move {
                    track_renderer(&registry, &controllers, &config, event);
                    Ok(())
                }
            })
            .await
    }

    pub fn get_media_server_by_udn(&self, udn: &str) -> Result<Arc<MediaServer>> {
        self.registry.get_media_server(udn)
    }

    pub fn get_media_renderer_by_udn(&self, udn: &str) -> Result<Arc<MediaRenderer>> {
        self.registry.get_media_renderer(udn)
    }

    pub fn get_controller_for_renderer(&self, udn: &str) -> Result<PlaybackController> {
        self.controllers
            .get(udn)
            .map(|controller| controller.value().clone())
            .ok_or_else(|| ControlError::not_found(udn))
    }

    pub fn media_servers(&self) -> Vec<DeviceEntry> {
        self.registry.media_servers()
    }

    pub fn media_renderers(&self) -> Vec<DeviceEntry> {
        self.registry.media_renderers()
    }

    /// Receive added/removed device events
    pub async fn on_device_event<F, Fut>(&self, callback: F) -> Subscription
    where
        F: Fn(DeviceEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.registry.on_device_event(callback).await
    }

    /// Receive playback info of the renderer `udn`
    pub async fn subscribe_notifications<F, Fut>(&self, udn: &str, callback: F) -> Result<Subscription>
    where
        F: Fn(PlaybackInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        let renderer = self.registry.get_media_renderer(udn)?;
        Ok(renderer.subscribe_notifications(callback).await)
    }
}

fn track_renderer(
    registry: &Weak<Registry>,
    controllers: &Controllers,
    config: &ControllerConfig,
    event: DeviceEvent,
) {
    let entry = event.entry();
    if entry.kind != MediaDeviceKind::MediaRenderer {
        return;
    }

    match &event {
        DeviceEvent::Added(entry) => {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let renderer = match registry.get_media_renderer(&entry.udn) {
                Ok(renderer) => renderer,
                Err(error) => {
                    debug!(udn = %entry.udn, %error, "Renderer vanished before its controller was built");
                    return;
                }
            };
            let servers: Arc<dyn ServerLookup> = registry;
            let player = RendererPlayer::new(renderer, servers);
            controllers.insert(
                entry.udn.clone(),
                PlaybackController::new(player, config.clone()),
            );
            debug!(udn = %entry.udn, "Playback controller created");
        }
        DeviceEvent::Removed(entry) => {
            if let Some((udn, controller)) = controllers.remove(&entry.udn) {
                // a transition in flight may hold the controller for a while
                tokio::spawn(async move {
                    controller.release().await;
                    debug!(%udn, "Playback controller released");
                });
            }
        }
    }
}
