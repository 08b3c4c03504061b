//! The playable capability a controller drives, and its renderer adapter.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::BoxFuture;
use observable::{CallbackResult, Observable, Subscription};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::devices::{MediaRenderer, MediaServer, PlaybackInfo, TransportState};
use crate::error::{ControlError, Result};
use crate::protocol_info::match_resources;
use crate::queue::PlaybackItem;

/// Callback receiving reported transport states
pub type StateCallback = Arc<dyn Fn(TransportState) -> BoxFuture<'static, CallbackResult> + Send + Sync>;

/// Something that can play queue items and reports its transport state.
#[async_trait]
pub trait Player: Send + Sync {
    async fn play(&self, item: &PlaybackItem) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Transport states as the player reports them
    fn transport_states(&self) -> Observable<TransportState>;

    async fn subscribe(&self, callback: StateCallback) -> Subscription {
        self.transport_states()
            .subscribe(move |state| callback(state))
            .await
    }
}

/// Finds the media server an item belongs to.
pub trait ServerLookup: Send + Sync {
    fn media_server(&self, udn: &str) -> Result<Arc<MediaServer>>;
}

/// Connection set up on the renderer by the last successful `play`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreparedConnection {
    pub connection_id: u32,
    pub av_transport_id: u32,
    pub rcs_id: u32,
}

struct Forwarding {
    subscription: Subscription,
    task: JoinHandle<()>,
}

/// [`Player`] over a media renderer, fetching items from media servers.
///
/// Transport states are forwarded from the renderer's playback info only
/// while somebody listens to them, repeated states are dropped.
pub struct RendererPlayer {
    renderer: Arc<MediaRenderer>,
    servers: Arc<dyn ServerLookup>,
    states: Observable<TransportState>,
    connection: Mutex<Option<PreparedConnection>>,
    forwarding: tokio::sync::Mutex<Option<Forwarding>>,
}

impl RendererPlayer {
    pub fn new(renderer: Arc<MediaRenderer>, servers: Arc<dyn ServerLookup>) -> Arc<Self> {
        let player = Arc::new(Self {
            renderer,
            servers,
            states: Observable::new(),
            connection: Mutex::new(None),
            forwarding: tokio::sync::Mutex::new(None),
        });

        let weak = Arc::downgrade(&player);
        player.states.set_on_subscription_change(move |count| {
            let weak = weak.clone();
            async move {
                if let Some(player) = weak.upgrade() {
                    player.on_listener_count(count).await;
                }
            }
        });

        player
    }

    pub fn renderer(&self) -> &Arc<MediaRenderer> {
        &self.renderer
    }

    pub fn connection(&self) -> Option<PreparedConnection> {
        *self.connection.lock()
    }

    async fn on_listener_count(self: Arc<Self>, count: usize) {
        let mut forwarding = self.forwarding.lock().await;
        if count == 0 {
            if let Some(mut current) = forwarding.take() {
                current.subscription.unsubscribe().await;
                current.task.abort();
                debug!(udn = %self.renderer.udn(), "Stopped forwarding transport states");
            }
        } else if forwarding.is_none() {
            let (tx, rx) = mpsc::unbounded_channel();
            let subscription = self
                .renderer
                .subscribe_notifications(move |info: PlaybackInfo| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(info.transport);
                        Ok(())
                    }
                })
                .await;
            let task = tokio::spawn(forward_states(Arc::downgrade(&self), rx));
            *forwarding = Some(Forwarding { subscription, task });
            debug!(udn = %self.renderer.udn(), "Forwarding transport states");
        }
    }
}

async fn forward_states(player: Weak<RendererPlayer>, mut states: mpsc::UnboundedReceiver<TransportState>) {
    let mut last = None;
    while let Some(state) = states.recv().await {
        if last == Some(state) {
            continue;
        }
        last = Some(state);
        let Some(player) = player.upgrade() else {
            break;
        };
        player.states.notify(state).await;
    }
}

#[async_trait]
impl Player for RendererPlayer {
    async fn play(&self, item: &PlaybackItem) -> Result<()> {
        let server = self.servers.media_server(&item.server_udn)?;
        let didl = server.browse_metadata(&item.object_id).await?;
        let no_resource = || ControlError::NoPlayableResource {
            object_id: item.object_id.clone(),
        };
        let object = didl.first().ok_or_else(no_resource)?;

        let sink = self.renderer.get_protocol_info().await?;
        let resource = match_resources(&object.resources, &sink)
            .into_iter()
            .next()
            .ok_or_else(no_resource)?;

        info!(
            udn = %self.renderer.udn(),
            object_id = %item.object_id,
            uri = %resource.uri,
            "Playing item"
        );
        self.renderer.set_transport_uri(&resource.uri, &didl.xml).await?;
        *self.connection.lock() = Some(PreparedConnection::default());
        self.renderer.transport_play().await
    }

    async fn stop(&self) -> Result<()> {
        let prepared = self.connection.lock().take();
        if prepared.is_none() {
            debug!(udn = %self.renderer.udn(), "Nothing to stop");
            return Ok(());
        }
        self.renderer.transport_stop().await
    }

    fn transport_states(&self) -> Observable<TransportState> {
        self.states.clone()
    }
}
