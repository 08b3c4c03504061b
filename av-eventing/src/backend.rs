//! Notification backend: owns the callback endpoint, the subscription leases
//! and the renewal loop.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use callback_server::{CallbackServer, EventRouter, NotificationPayload};
use soap_client::SubscriptionResponse;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::EventingConfig;
use crate::error::{EventingError, Result};
use crate::propertyset::parse_propertyset;
use crate::service::{ServiceNotification, ServiceRef};
use crate::subscriber::EventSubscriber;

/// Snapshot of a held subscription lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationLease {
    pub service: ServiceRef,
    pub subscription_id: String,
    /// When the remote device drops the subscription unless it is renewed
    pub renewal_deadline: Instant,
}

/// Shortest delay between two renewal attempts of one lease
const MIN_RENEWAL_DELAY: Duration = Duration::from_secs(1);
/// Longest delay before retrying a renewal that failed on the network
const RENEWAL_RETRY_DELAY: Duration = Duration::from_secs(60);

struct Lease {
    sid: String,
    granted: Duration,
    renewed_at: Instant,
    /// Next renewal attempt
    due: Instant,
    sink: mpsc::UnboundedSender<ServiceNotification>,
}

impl Lease {
    fn new(
        response: SubscriptionResponse,
        requested: Duration,
        sink: mpsc::UnboundedSender<ServiceNotification>,
    ) -> Self {
        let now = Instant::now();
        let granted = granted_duration(&response, requested);
        Self {
            sid: response.sid,
            granted,
            renewed_at: now,
            due: now + renewal_delay(granted),
            sink,
        }
    }

    fn refresh(&mut self, response: SubscriptionResponse, requested: Duration) {
        let now = Instant::now();
        self.granted = granted_duration(&response, requested);
        self.sid = response.sid;
        self.renewed_at = now;
        self.due = now + renewal_delay(self.granted);
    }

    /// Retry a failed renewal well before the lease runs out
    fn postpone(&mut self) {
        self.due = Instant::now() + (self.granted / 4).clamp(MIN_RENEWAL_DELAY, RENEWAL_RETRY_DELAY);
    }
}

/// The device may grant less than requested; a zero TIMEOUT is taken as
/// the requested duration
fn granted_duration(response: &SubscriptionResponse, requested: Duration) -> Duration {
    match response.timeout_seconds {
        0 => requested,
        seconds => Duration::from_secs(u64::from(seconds)),
    }
}

/// Renew at half the granted lease
fn renewal_delay(granted: Duration) -> Duration {
    (granted / 2).max(MIN_RENEWAL_DELAY)
}

#[derive(Clone)]
struct Endpoint {
    callback_url: String,
    router: Arc<EventRouter>,
}

struct Runtime {
    server: CallbackServer,
    renewal_shutdown: mpsc::Sender<()>,
    renewal_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
}

struct Inner {
    config: EventingConfig,
    subscriber: Arc<dyn EventSubscriber>,
    leases: RwLock<HashMap<ServiceRef, Lease>>,
    /// Wakes the renewal loop when a lease schedule changes
    lease_changed: Arc<Notify>,
    endpoint: RwLock<Option<Endpoint>>,
    runtime: Mutex<Option<Runtime>>,
}

/// Keeps GENA subscriptions alive and routes their notifications.
///
/// One lease is held per subscribed [`ServiceRef`]. Notifications for a
/// lease are parsed and forwarded to the sink given at subscribe time. A
/// background loop renews each lease at half the duration the device
/// granted for it.
///
/// Cloning is cheap; all clones share the same leases and endpoint.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use av_eventing::{EventingConfig, NotificationBackend, ServiceRef};
/// use soap_client::SoapClient;
/// use tokio::sync::mpsc;
///
/// # async fn run() -> av_eventing::Result<()> {
/// let backend = NotificationBackend::new(EventingConfig::default(), Arc::new(SoapClient::new()));
/// backend.start().await?;
///
/// let service = ServiceRef::new(
///     "13bf6358-00b8-101b-8000-74dfbfed7306",
///     "urn:schemas-upnp-org:service:AVTransport:1",
///     "http://192.168.99.1:1234/upnp/event/avt",
/// );
/// let (tx, mut rx) = mpsc::unbounded_channel();
/// let sid = backend.subscribe(&service, tx).await?;
/// println!("subscribed as {sid}");
///
/// if let Some(notification) = rx.recv().await {
///     println!("{:?}", notification.variable("LastChange"));
/// }
///
/// backend.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NotificationBackend {
    inner: Arc<Inner>,
}

impl NotificationBackend {
    pub fn new(config: EventingConfig, subscriber: Arc<dyn EventSubscriber>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                subscriber,
                leases: RwLock::new(HashMap::new()),
                lease_changed: Arc::new(Notify::new()),
                endpoint: RwLock::new(None),
                runtime: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &EventingConfig {
        &self.inner.config
    }

    /// Start the callback endpoint and the renewal loop.
    ///
    /// Starting a running backend does nothing.
    pub async fn start(&self) -> Result<()> {
        let mut runtime = self.inner.runtime.lock().await;
        if runtime.is_some() {
            debug!("Notification backend already running");
            return Ok(());
        }
        self.inner.config.validate()?;

        let (payload_tx, payload_rx) = mpsc::unbounded_channel::<NotificationPayload>();
        let server = CallbackServer::with_advertised_ip(
            self.inner.config.callback_port_range,
            self.inner.config.advertised_address,
            payload_tx,
        )
        .await?;

        let callback_url = server.callback_url().to_string();
        *self.inner.endpoint.write().await = Some(Endpoint {
            callback_url: callback_url.clone(),
            router: server.router().clone(),
        });

        let dispatch_task = tokio::spawn(dispatch_notifications(Arc::downgrade(&self.inner), payload_rx));

        let (renewal_shutdown, shutdown_rx) = mpsc::channel::<()>(1);
        let renewal_task = tokio::spawn(renewal_loop(
            Arc::downgrade(&self.inner),
            self.inner.lease_changed.clone(),
            self.inner.config.renewal_period(),
            shutdown_rx,
        ));

        *runtime = Some(Runtime {
            server,
            renewal_shutdown,
            renewal_task,
            dispatch_task,
        });

        info!(%callback_url, "Notification backend started");
        Ok(())
    }

    /// Unsubscribe every lease (best effort), stop the renewal loop and shut
    /// the callback endpoint down.
    pub async fn stop(&self) -> Result<()> {
        let Some(runtime) = self.inner.runtime.lock().await.take() else {
            return Ok(());
        };

        debug!("Unsubscribing from all service events");
        let leases: Vec<(ServiceRef, Lease)> = self.inner.leases.write().await.drain().collect();
        for (service, lease) in leases {
            if let Err(e) = self
                .inner
                .subscriber
                .unsubscribe(&service.event_sub_url, &lease.sid)
                .await
            {
                warn!(%service, sid = %lease.sid, "Failed to unsubscribe during shutdown: {}", e);
            }
        }

        let _ = runtime.renewal_shutdown.send(()).await;
        if let Err(e) = runtime.renewal_task.await {
            if !e.is_cancelled() {
                warn!("Renewal task failed: {}", e);
            }
        }

        *self.inner.endpoint.write().await = None;
        runtime.server.shutdown().await?;
        runtime.dispatch_task.abort();

        info!("Notification backend stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.inner.runtime.lock().await.is_some()
    }

    /// URL sent in the CALLBACK header, while running.
    pub async fn callback_url(&self) -> Option<String> {
        self.inner
            .endpoint
            .read()
            .await
            .as_ref()
            .map(|endpoint| endpoint.callback_url.clone())
    }

    /// Subscribe to `service` and forward its notifications to `sink`.
    ///
    /// Returns the subscription ID. If a lease for `service` is already held
    /// its ID is returned and `sink` replaces the previous one.
    pub async fn subscribe(
        &self,
        service: &ServiceRef,
        sink: mpsc::UnboundedSender<ServiceNotification>,
    ) -> Result<String> {
        let endpoint = self.endpoint().await?;

        if let Some(lease) = self.inner.leases.write().await.get_mut(service) {
            debug!(%service, sid = %lease.sid, "Already subscribed, replacing sink");
            lease.sink = sink;
            return Ok(lease.sid.clone());
        }

        let response = self
            .inner
            .subscriber
            .subscribe(
                &service.event_sub_url,
                &endpoint.callback_url,
                self.inner.config.lease_seconds(),
            )
            .await
            .map_err(|source| EventingError::Subscribe {
                service: service.to_string(),
                source,
            })?;

        let sid = response.sid.clone();
        endpoint.router.register(sid.clone()).await;

        let previous = self
            .inner
            .leases
            .write()
            .await
            .insert(
                service.clone(),
                Lease::new(response, self.inner.config.lease_duration, sink),
            );
        if let Some(previous) = previous {
            // a concurrent subscribe won the race; its remote lease will lapse
            endpoint.router.unregister(&previous.sid).await;
        }
        self.inner.lease_changed.notify_one();

        info!(%service, %sid, "Subscribed to service events");
        Ok(sid)
    }

    /// Cancel the lease for `service`.
    ///
    /// The lease is discarded even when the remote request fails.
    pub async fn unsubscribe(&self, service: &ServiceRef) -> Result<()> {
        let lease = self
            .inner
            .leases
            .write()
            .await
            .remove(service)
            .ok_or_else(|| EventingError::NotSubscribed(service.to_string()))?;

        if let Some(endpoint) = self.inner.endpoint.read().await.as_ref() {
            endpoint.router.unregister(&lease.sid).await;
        }

        self.inner
            .subscriber
            .unsubscribe(&service.event_sub_url, &lease.sid)
            .await
            .map_err(|source| EventingError::Unsubscribe {
                sid: lease.sid.clone(),
                source,
            })?;

        info!(%service, sid = %lease.sid, "Unsubscribed from service events");
        Ok(())
    }

    /// Current subscription ID for `service`.
    pub async fn subscription_id(&self, service: &ServiceRef) -> Option<String> {
        self.inner
            .leases
            .read()
            .await
            .get(service)
            .map(|lease| lease.sid.clone())
    }

    pub async fn leases(&self) -> Vec<NotificationLease> {
        self.inner
            .leases
            .read()
            .await
            .iter()
            .map(|(service, lease)| NotificationLease {
                service: service.clone(),
                subscription_id: lease.sid.clone(),
                renewal_deadline: lease.renewed_at + lease.granted,
            })
            .collect()
    }

    /// Renew every held lease once, whether due or not.
    ///
    /// A failed renewal is logged and retried after a short delay. A renewal
    /// the device rejects (4xx, typically 412 for an unknown SID) is
    /// replaced by a fresh subscription; if that fails too, the lease is
    /// dropped.
    pub async fn renew_all(&self) {
        let Ok(endpoint) = self.endpoint().await else {
            return;
        };

        let snapshot: Vec<(ServiceRef, String)> = self
            .inner
            .leases
            .read()
            .await
            .iter()
            .map(|(service, lease)| (service.clone(), lease.sid.clone()))
            .collect();

        debug!(count = snapshot.len(), "Renewing all event subscriptions");
        for (service, sid) in snapshot {
            self.renew_lease(&endpoint, &service, &sid).await;
        }
    }

    /// Renew the leases whose renewal time has come
    async fn renew_due(&self) {
        let Ok(endpoint) = self.endpoint().await else {
            return;
        };

        let now = Instant::now();
        let due: Vec<(ServiceRef, String)> = self
            .inner
            .leases
            .read()
            .await
            .iter()
            .filter(|(_, lease)| lease.due <= now)
            .map(|(service, lease)| (service.clone(), lease.sid.clone()))
            .collect();

        if !due.is_empty() {
            debug!(count = due.len(), "Renewing due event subscriptions");
        }
        for (service, sid) in due {
            self.renew_lease(&endpoint, &service, &sid).await;
        }
    }

    /// Earliest renewal time over all held leases
    async fn next_renewal(&self) -> Option<Instant> {
        self.inner.leases.read().await.values().map(|lease| lease.due).min()
    }

    async fn renew_lease(&self, endpoint: &Endpoint, service: &ServiceRef, sid: &str) {
        let lease_seconds = self.inner.config.lease_seconds();

        match self
            .inner
            .subscriber
            .renew(&service.event_sub_url, sid, lease_seconds)
            .await
        {
            Ok(response) => {
                trace!(%service, %sid, "Subscription renewed");
                self.refresh_lease(endpoint, service, sid, response).await;
            }
            Err(e) if e.is_rejection() => {
                warn!(%service, %sid, "Renewal rejected ({}), subscribing again", e);
                match self
                    .inner
                    .subscriber
                    .subscribe(&service.event_sub_url, &endpoint.callback_url, lease_seconds)
                    .await
                {
                    Ok(response) => self.refresh_lease(endpoint, service, sid, response).await,
                    Err(e) => {
                        warn!(%service, %sid, "Resubscription failed, dropping lease: {}", e);
                        let mut leases = self.inner.leases.write().await;
                        if leases.get(service).is_some_and(|lease| lease.sid == sid) {
                            leases.remove(service);
                        }
                        drop(leases);
                        endpoint.router.unregister(sid).await;
                    }
                }
            }
            Err(e) => {
                warn!(%service, %sid, "Renewal failed, retrying shortly: {}", e);
                if let Some(lease) = self
                    .inner
                    .leases
                    .write()
                    .await
                    .get_mut(service)
                    .filter(|lease| lease.sid == sid)
                {
                    lease.postpone();
                }
            }
        }
    }

    async fn refresh_lease(
        &self,
        endpoint: &Endpoint,
        service: &ServiceRef,
        old_sid: &str,
        response: SubscriptionResponse,
    ) {
        let mut leases = self.inner.leases.write().await;
        let Some(lease) = leases.get_mut(service).filter(|lease| lease.sid == old_sid) else {
            debug!(%service, sid = %old_sid, "Lease changed during renewal, keeping the newer one");
            return;
        };

        if response.sid != old_sid {
            info!(%service, old_sid = %old_sid, new_sid = %response.sid, "Subscription ID replaced");
            endpoint.router.unregister(old_sid).await;
            endpoint.router.register(response.sid.clone()).await;
        }

        lease.refresh(response, self.inner.config.lease_duration);
        trace!(%service, granted_secs = lease.granted.as_secs(), "Lease refreshed");
    }

    async fn endpoint(&self) -> Result<Endpoint> {
        self.inner
            .endpoint
            .read()
            .await
            .clone()
            .ok_or(EventingError::NotRunning)
    }
}

/// Sleeps until the earliest lease is due, renews what is due and starts
/// over. `idle_period` bounds the sleep while no lease is held.
async fn renewal_loop(
    inner: Weak<Inner>,
    lease_changed: Arc<Notify>,
    idle_period: Duration,
    mut shutdown: mpsc::Receiver<()>,
) {
    loop {
        let Some(backend) = inner.upgrade().map(|inner| NotificationBackend { inner }) else {
            break;
        };
        let deadline = backend
            .next_renewal()
            .await
            .unwrap_or_else(|| Instant::now() + idle_period);
        drop(backend);

        tokio::select! {
            _ = shutdown.recv() => {
                debug!("Renewal loop cancelled");
                break;
            }
            _ = lease_changed.notified() => {
                trace!("Lease schedule changed");
            }
            _ = sleep_until(deadline) => {
                let Some(inner) = inner.upgrade() else { break };
                NotificationBackend { inner }.renew_due().await;
            }
        }
    }
}

async fn dispatch_notifications(
    inner: Weak<Inner>,
    mut payloads: mpsc::UnboundedReceiver<NotificationPayload>,
) {
    while let Some(payload) = payloads.recv().await {
        let Some(inner) = inner.upgrade() else { break };

        let target = inner
            .leases
            .read()
            .await
            .iter()
            .find(|(_, lease)| lease.sid == payload.subscription_id)
            .map(|(service, lease)| (service.clone(), lease.sink.clone()));

        let Some((service, sink)) = target else {
            trace!(sid = %payload.subscription_id, "Notification for a released lease");
            continue;
        };

        match parse_propertyset(&payload.event_xml) {
            Ok(variables) => {
                let _ = sink.send(ServiceNotification {
                    service,
                    sid: payload.subscription_id,
                    sequence: payload.sequence,
                    variables,
                });
            }
            Err(e) => warn!(%service, "Dropping malformed notification: {}", e),
        }
    }
}
