//! Discovery pipeline: merges passive advertisements and periodic searches
//! into one ordered stream of [`DiscoveryEvent`]s for media devices.
//!
//! ```text
//! SsdpListener ──┐
//!                ├──► raw channel ──► keep_media_devices ──► to_discovery_event ──► events
//! periodic search┘
//! ```
//!
//! Each stage is a plain function so it can be tested without sockets.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use crate::event::{is_media_device, udn_from_usn, DiscoveryEvent, DiscoveryEventType};
use crate::source::{AdvertisementSource, DeviceSearcher};
use crate::ssdp::{AdvertisementKind, RawAdvertisement, SsdpListener, SsdpSearcher};

/// Filter stage: only media servers and renderers pass.
pub fn keep_media_devices(advertisement: &RawAdvertisement) -> bool {
    is_media_device(&advertisement.notification_type)
}

/// Map stage.
///
/// Alive, update and search responses all announce a present device and map
/// to [`DiscoveryEventType::NewDevice`]; byebye maps to
/// [`DiscoveryEventType::DeviceLost`]. A presence signal without a location
/// cannot be resolved and is dropped.
pub fn to_discovery_event(advertisement: RawAdvertisement) -> Option<DiscoveryEvent> {
    let udn = udn_from_usn(&advertisement.usn, &advertisement.notification_type);

    let (event_type, location) = match advertisement.kind {
        AdvertisementKind::Alive | AdvertisementKind::Update | AdvertisementKind::SearchResponse => {
            (DiscoveryEventType::NewDevice, Some(advertisement.location?))
        }
        AdvertisementKind::ByeBye => (DiscoveryEventType::DeviceLost, None),
    };

    Some(DiscoveryEvent {
        event_type,
        device_type: advertisement.notification_type,
        udn,
        location,
    })
}

/// Both stages composed.
pub fn process(advertisement: RawAdvertisement) -> Option<DiscoveryEvent> {
    if keep_media_devices(&advertisement) {
        to_discovery_event(advertisement)
    } else {
        None
    }
}

struct Running {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

/// Restartable discovery pipeline.
///
/// [`start`](Self::start) spawns the listener, the search loop and the stage
/// task and hands back the event receiver; [`stop`](Self::stop) shuts all of
/// them down. Starting a running pipeline fails with
/// [`DiscoveryError::AlreadyRunning`].
///
/// The receiver must be drained by a single consumer to keep per-device
/// ordering.
pub struct DiscoveryPipeline {
    config: DiscoveryConfig,
    listener: Arc<dyn AdvertisementSource>,
    searcher: Arc<dyn DeviceSearcher>,
    running: Option<Running>,
}

impl DiscoveryPipeline {
    pub fn new(
        config: DiscoveryConfig,
        listener: Arc<dyn AdvertisementSource>,
        searcher: Arc<dyn DeviceSearcher>,
    ) -> Self {
        Self {
            config,
            listener,
            searcher,
            running: None,
        }
    }

    /// Pipeline over real SSDP sockets.
    pub fn ssdp(config: DiscoveryConfig) -> Self {
        let listener = Arc::new(SsdpListener::new(config.listen_address));
        Self::new(config, listener, Arc::new(SsdpSearcher::new()))
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start listening and searching. Must be called within a tokio runtime.
    pub fn start(&mut self) -> Result<mpsc::Receiver<DiscoveryEvent>> {
        if self.running.is_some() {
            return Err(DiscoveryError::AlreadyRunning);
        }
        self.config.validate()?;

        let capacity = self.config.channel_capacity;
        let (raw_tx, raw_rx) = mpsc::channel::<RawAdvertisement>(capacity);
        let (event_tx, event_rx) = mpsc::channel::<DiscoveryEvent>(capacity);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let listener = self.listener.clone();
        let listener_shutdown = shutdown_tx.subscribe();
        let listener_sink = raw_tx.clone();
        let listen_task = tokio::spawn(async move {
            if let Err(e) = listener.listen(listener_sink, listener_shutdown).await {
                warn!("Advertisement listener stopped: {}", e);
            }
        });

        let search_task = tokio::spawn(run_periodic_search(
            self.searcher.clone(),
            self.config.clone(),
            raw_tx,
            shutdown_tx.subscribe(),
        ));

        let stage_task = tokio::spawn(run_stages(raw_rx, event_tx, shutdown_tx.subscribe()));

        info!(
            targets = ?self.config.search_targets,
            interval_secs = self.config.search_interval.as_secs(),
            "Discovery pipeline started"
        );

        self.running = Some(Running {
            shutdown_tx,
            tasks: vec![listen_task, search_task, stage_task],
        });
        Ok(event_rx)
    }

    /// Stop all pipeline tasks. Does nothing if the pipeline is not running.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown_tx.send(());
        for task in running.tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Discovery task failed: {}", e);
                }
            }
        }
        info!("Discovery pipeline stopped");
    }
}

impl Drop for DiscoveryPipeline {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(());
        }
    }
}

async fn run_stages(
    mut raw_rx: mpsc::Receiver<RawAdvertisement>,
    event_tx: mpsc::Sender<DiscoveryEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            raw = raw_rx.recv() => {
                let Some(advertisement) = raw else { break };
                if let Some(event) = process(advertisement) {
                    debug!(udn = %event.udn, event_type = %event.event_type, "Discovery event");
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn run_periodic_search(
    searcher: Arc<dyn DeviceSearcher>,
    config: DiscoveryConfig,
    sink: mpsc::Sender<RawAdvertisement>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(config.search_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("Periodic search cancelled");
                break;
            }
            delivered = async {
                ticker.tick().await;
                search_round(searcher.as_ref(), &config, &sink).await
            } => {
                if !delivered {
                    break;
                }
            }
        }
    }
}

/// Search all targets concurrently and forward the responses.
/// Returns `false` once the sink is closed.
async fn search_round(
    searcher: &dyn DeviceSearcher,
    config: &DiscoveryConfig,
    sink: &mpsc::Sender<RawAdvertisement>,
) -> bool {
    debug!("Searching for AV devices");
    let searches = config
        .search_targets
        .iter()
        .map(|target| searcher.search(target, config.search_timeout));

    for (target, result) in config.search_targets.iter().zip(join_all(searches).await) {
        match result {
            Ok(responses) => {
                for response in responses {
                    if sink.send(response).await.is_err() {
                        return false;
                    }
                }
            }
            Err(e) => warn!(%target, "Search failed: {}", e),
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn advertisement(kind: AdvertisementKind, nt: &str, location: Option<&str>) -> RawAdvertisement {
        RawAdvertisement {
            kind,
            notification_type: nt.to_string(),
            usn: format!("uuid:13bf6358-00b8-101b-8000-74dfbfed7306::{nt}"),
            location: location.map(str::to_string),
        }
    }

    const RENDERER: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";

    #[rstest]
    #[case(AdvertisementKind::Alive, DiscoveryEventType::NewDevice)]
    #[case(AdvertisementKind::Update, DiscoveryEventType::NewDevice)]
    #[case(AdvertisementKind::SearchResponse, DiscoveryEventType::NewDevice)]
    #[case(AdvertisementKind::ByeBye, DiscoveryEventType::DeviceLost)]
    fn test_maps_event_types(#[case] kind: AdvertisementKind, #[case] expected: DiscoveryEventType) {
        let event = process(advertisement(kind, RENDERER, Some("http://192.168.99.1:1234/dmr.xml"))).unwrap();
        assert_eq!(event.event_type, expected);
        assert_eq!(event.udn, "13bf6358-00b8-101b-8000-74dfbfed7306");
        assert_eq!(event.device_type, RENDERER);
    }

    #[test]
    fn test_lost_event_has_no_location() {
        let event = process(advertisement(
            AdvertisementKind::ByeBye,
            RENDERER,
            Some("http://192.168.99.1:1234/dmr.xml"),
        ))
        .unwrap();
        assert_eq!(event.location, None);
    }

    #[test]
    fn test_new_device_keeps_location() {
        let event = process(advertisement(
            AdvertisementKind::Alive,
            RENDERER,
            Some("http://192.168.99.1:1234/dmr.xml"),
        ))
        .unwrap();
        assert_eq!(event.location.as_deref(), Some("http://192.168.99.1:1234/dmr.xml"));
    }

    #[test]
    fn test_presence_without_location_is_dropped() {
        assert!(process(advertisement(AdvertisementKind::Alive, RENDERER, None)).is_none());
    }

    #[rstest]
    #[case("urn:schemas-upnp-org:device:printer:1")]
    #[case("upnp:rootdevice")]
    #[case("urn:schemas-upnp-org:service:AVTransport:1")]
    fn test_non_media_devices_are_filtered(#[case] nt: &str) {
        let raw = advertisement(AdvertisementKind::Alive, nt, Some("http://192.168.99.3:1234/device.xml"));
        assert!(!keep_media_devices(&raw));
        assert!(process(raw).is_none());
    }
}
