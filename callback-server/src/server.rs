//! HTTP server receiving UPnP event notifications.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use warp::http::{Method, StatusCode};
use warp::Filter;

use crate::error::CallbackServerError;
use crate::router::{EventRouter, NotificationPayload};

/// HTTP callback endpoint for GENA notifications.
///
/// Binds to a port from a range on all interfaces and advertises
/// `http://<local_ip>:<port>/` as the callback URL. `NOTIFY` requests on any
/// path are validated and routed by their `SID` header.
///
/// # Example
///
/// ```no_run
/// use tokio::sync::mpsc;
/// use callback_server::{CallbackServer, NotificationPayload};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), callback_server::CallbackServerError> {
/// let (tx, _rx) = mpsc::unbounded_channel::<NotificationPayload>();
/// let server = CallbackServer::new((51234, 51334), tx).await?;
/// println!("Subscribe with CALLBACK: <{}>", server.callback_url());
/// server.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct CallbackServer {
    port: u16,
    callback_url: String,
    event_router: Arc<EventRouter>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl CallbackServer {
    /// Start a callback server on the first free port in `port_range`,
    /// advertising the detected local IP address.
    ///
    /// A range of `(0, 0)` binds an ephemeral port.
    pub async fn new(
        port_range: (u16, u16),
        event_sender: mpsc::UnboundedSender<NotificationPayload>,
    ) -> Result<Self, CallbackServerError> {
        Self::with_advertised_ip(port_range, None, event_sender).await
    }

    /// Start a callback server advertising `advertised_ip` instead of the
    /// detected local address.
    pub async fn with_advertised_ip(
        port_range: (u16, u16),
        advertised_ip: Option<IpAddr>,
        event_sender: mpsc::UnboundedSender<NotificationPayload>,
    ) -> Result<Self, CallbackServerError> {
        let (start, end) = port_range;
        let port = Self::find_available_port(start, end)
            .ok_or(CallbackServerError::NoAvailablePort { start, end })?;

        let local_ip = match advertised_ip {
            Some(ip) => ip,
            None => Self::detect_local_ip().ok_or(CallbackServerError::LocalAddressUnavailable)?,
        };

        let event_router = Arc::new(EventRouter::new(event_sender));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<SocketAddr, String>>();

        let server_handle = Self::start_server(port, event_router.clone(), shutdown_rx, ready_tx);

        let bound = ready_rx
            .await
            .map_err(|_| CallbackServerError::StartupFailed)?
            .map_err(CallbackServerError::Bind)?;

        let callback_url = format!("http://{}:{}/", local_ip, bound.port());
        info!(%bound, callback_url = %callback_url, "Callback server listening");

        Ok(Self {
            port: bound.port(),
            callback_url,
            event_router,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    /// URL devices should send notifications to (the `CALLBACK` header value).
    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    /// Port the server is bound to
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Router used to register and unregister subscription IDs.
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.event_router
    }

    /// Stop accepting requests and wait for in-flight ones to finish.
    pub async fn shutdown(mut self) -> Result<(), CallbackServerError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| CallbackServerError::Task(e.to_string()))?;
        }

        info!(port = self.port, "Callback server stopped");
        Ok(())
    }

    fn find_available_port(start: u16, end: u16) -> Option<u16> {
        (start..=end).find(|&port| Self::is_port_available(port))
    }

    fn is_port_available(port: u16) -> bool {
        TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)).is_ok()
    }

    /// Local address used for outbound traffic.
    ///
    /// Connecting a UDP socket sends nothing; it only resolves the route.
    fn detect_local_ip() -> Option<IpAddr> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("239.255.255.250:1900").ok()?;
        let local_addr = socket.local_addr().ok()?;
        Some(local_addr.ip())
    }

    fn start_server(
        port: u16,
        event_router: Arc<EventRouter>,
        mut shutdown_rx: mpsc::Receiver<()>,
        ready_tx: oneshot::Sender<Result<SocketAddr, String>>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let notify_route = warp::method()
                .and(warp::path::full())
                .and(warp::header::optional::<String>("sid"))
                .and(warp::header::optional::<String>("nt"))
                .and(warp::header::optional::<String>("nts"))
                .and(warp::header::optional::<u32>("seq"))
                .and(warp::body::bytes())
                .and_then({
                    let router = event_router.clone();
                    move |method: Method,
                          path: warp::path::FullPath,
                          sid: Option<String>,
                          nt: Option<String>,
                          nts: Option<String>,
                          seq: Option<u32>,
                          body: Bytes| {
                        let router = router.clone();
                        async move {
                            if method.as_str() != "NOTIFY" {
                                return Err(warp::reject::custom(NotNotify));
                            }

                            debug!(
                                path = path.as_str(),
                                sid = ?sid,
                                seq = ?seq,
                                body_bytes = body.len(),
                                "Received NOTIFY"
                            );

                            if !Self::validate_upnp_headers(&sid, &nt, &nts) {
                                warn!(sid = ?sid, nt = ?nt, nts = ?nts, "Rejecting NOTIFY with invalid headers");
                                return Err(warp::reject::custom(InvalidUpnpHeaders));
                            }
                            let subscription_id =
                                sid.ok_or_else(|| warp::reject::custom(InvalidUpnpHeaders))?;

                            let payload = NotificationPayload {
                                subscription_id,
                                sequence: seq,
                                event_xml: String::from_utf8_lossy(&body).into_owned(),
                            };

                            if router.route_event(payload).await {
                                Ok(warp::reply::with_status("", StatusCode::OK))
                            } else {
                                Err(warp::reject::custom(UnknownSubscription))
                            }
                        }
                    }
                });

            let routes = notify_route.recover(handle_rejection);
            let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);

            let bound = warp::serve(routes).try_bind_with_graceful_shutdown(addr, async move {
                shutdown_rx.recv().await;
            });

            match bound {
                Ok((addr, server)) => {
                    let _ = ready_tx.send(Ok(addr));
                    server.await;
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                }
            }
        })
    }

    /// `SID` is required; `NT`/`NTS`, when both present, must be
    /// `upnp:event` / `upnp:propchange`.
    fn validate_upnp_headers(
        sid: &Option<String>,
        nt: &Option<String>,
        nts: &Option<String>,
    ) -> bool {
        if sid.is_none() {
            return false;
        }

        if let (Some(nt_val), Some(nts_val)) = (nt, nts) {
            if nt_val != "upnp:event" || nts_val != "upnp:propchange" {
                return false;
            }
        }

        true
    }
}

#[derive(Debug)]
struct InvalidUpnpHeaders;

impl warp::reject::Reject for InvalidUpnpHeaders {}

#[derive(Debug)]
struct UnknownSubscription;

impl warp::reject::Reject for UnknownSubscription {}

#[derive(Debug)]
struct NotNotify;

impl warp::reject::Reject for NotNotify {}

/// Map rejections to the status codes GENA publishers expect.
async fn handle_rejection(
    err: warp::Rejection,
) -> Result<impl warp::Reply, std::convert::Infallible> {
    let (code, message) = if err.find::<UnknownSubscription>().is_some() {
        (StatusCode::PRECONDITION_FAILED, "Unknown subscription")
    } else if err.find::<InvalidUpnpHeaders>().is_some()
        || err.find::<warp::reject::InvalidHeader>().is_some()
    {
        (StatusCode::BAD_REQUEST, "Invalid UPnP headers")
    } else if err.find::<NotNotify>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Only NOTIFY is accepted")
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(warp::reply::with_status(message, code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_port_available() {
        assert!(CallbackServer::is_port_available(0));

        let listener = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!CallbackServer::is_port_available(port));
        drop(listener);
    }

    #[test]
    fn test_find_available_port_skips_taken_ports() {
        let listener = TcpListener::bind("0.0.0.0:0").unwrap();
        let taken = listener.local_addr().unwrap().port();

        assert_eq!(CallbackServer::find_available_port(taken, taken), None);
    }

    #[test]
    fn test_validate_upnp_headers() {
        let sid = Some("uuid:123".to_string());

        assert!(CallbackServer::validate_upnp_headers(
            &sid,
            &Some("upnp:event".to_string()),
            &Some("upnp:propchange".to_string()),
        ));
        assert!(CallbackServer::validate_upnp_headers(&sid, &None, &None));

        assert!(!CallbackServer::validate_upnp_headers(
            &None,
            &Some("upnp:event".to_string()),
            &Some("upnp:propchange".to_string()),
        ));
        assert!(!CallbackServer::validate_upnp_headers(
            &sid,
            &Some("wrong".to_string()),
            &Some("upnp:propchange".to_string()),
        ));
        assert!(!CallbackServer::validate_upnp_headers(
            &sid,
            &Some("upnp:event".to_string()),
            &Some("wrong".to_string()),
        ));
    }

    #[tokio::test]
    async fn test_callback_server_creation() {
        let (tx, _rx) = mpsc::unbounded_channel();

        let server = CallbackServer::with_advertised_ip(
            (0, 0),
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            tx,
        )
        .await
        .unwrap();

        assert_ne!(server.port(), 0);
        assert_eq!(
            server.callback_url(),
            format!("http://127.0.0.1:{}/", server.port())
        );

        server.shutdown().await.unwrap();
    }
}
