//! Routing of incoming event notifications by subscription ID.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};

/// Unparsed GENA event notification.
///
/// Carries the `SID` and `SEQ` headers and the raw `propertyset` body. Parsing
/// the body is left to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    /// Subscription ID from the `SID` header
    pub subscription_id: String,
    /// Event key from the `SEQ` header, `0` for the initial event
    pub sequence: Option<u32>,
    /// Raw XML event body
    pub event_xml: String,
}

/// Routes notifications for registered subscription IDs to a channel.
#[derive(Clone)]
pub struct EventRouter {
    subscriptions: Arc<RwLock<HashSet<String>>>,
    event_sender: mpsc::UnboundedSender<NotificationPayload>,
}

impl EventRouter {
    /// Create a router forwarding to `event_sender`.
    ///
    /// ```
    /// use tokio::sync::mpsc;
    /// use callback_server::router::{EventRouter, NotificationPayload};
    ///
    /// let (tx, _rx) = mpsc::unbounded_channel::<NotificationPayload>();
    /// let router = EventRouter::new(tx);
    /// ```
    pub fn new(event_sender: mpsc::UnboundedSender<NotificationPayload>) -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
            event_sender,
        }
    }

    /// Accept notifications for `subscription_id` from now on.
    pub async fn register(&self, subscription_id: String) {
        debug!(sid = %subscription_id, "Registering subscription for event routing");
        self.subscriptions.write().await.insert(subscription_id);
    }

    /// Stop accepting notifications for `subscription_id`.
    pub async fn unregister(&self, subscription_id: &str) {
        debug!(sid = %subscription_id, "Unregistering subscription");
        self.subscriptions.write().await.remove(subscription_id);
    }

    pub async fn is_registered(&self, subscription_id: &str) -> bool {
        self.subscriptions.read().await.contains(subscription_id)
    }

    pub async fn registered_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Forward a notification if its subscription is registered.
    ///
    /// Returns `false` when the subscription ID is unknown; the payload is
    /// dropped in that case.
    ///
    /// ```
    /// # use tokio::sync::mpsc;
    /// # use callback_server::router::{EventRouter, NotificationPayload};
    /// # #[tokio::main]
    /// # async fn main() {
    /// # let (tx, mut rx) = mpsc::unbounded_channel::<NotificationPayload>();
    /// # let router = EventRouter::new(tx);
    /// router.register("uuid:subscription-123".to_string()).await;
    /// let routed = router
    ///     .route_event(NotificationPayload {
    ///         subscription_id: "uuid:subscription-123".to_string(),
    ///         sequence: Some(0),
    ///         event_xml: "<e:propertyset/>".to_string(),
    ///     })
    ///     .await;
    /// assert!(routed);
    /// # }
    /// ```
    pub async fn route_event(&self, payload: NotificationPayload) -> bool {
        let subs = self.subscriptions.read().await;
        if !subs.contains(&payload.subscription_id) {
            trace!(sid = %payload.subscription_id, "Dropping event for unknown subscription");
            return false;
        }

        // receiver gone means the backend is shutting down
        let _ = self.event_sender.send(payload);
        true
    }
}
