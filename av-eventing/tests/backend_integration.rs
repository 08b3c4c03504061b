//! End-to-end tests for the notification backend: real callback endpoint,
//! real `NOTIFY` requests, scripted remote subscriber.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use av_eventing::{EventSubscriber, EventingConfig, NotificationBackend, ServiceRef};
use reqwest::Method;
use soap_client::{SoapError, SubscriptionResponse};
use tokio::sync::mpsc;
use tokio::time::timeout;

const AVT_PROPERTYSET: &str = r#"<?xml version="1.0"?>
<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
    <e:property>
        <LastChange>&lt;Event xmlns="urn:schemas-upnp-org:metadata-1-0/AVT/"&gt;&lt;InstanceID val="0"&gt;&lt;TransportState val="PLAYING"/&gt;&lt;/InstanceID&gt;&lt;/Event&gt;</LastChange>
    </e:property>
</e:propertyset>"#;

/// Hands out sequential SIDs and records unsubscribes.
#[derive(Default)]
struct FakeSubscriber {
    issued: AtomicUsize,
    unsubscribed: Mutex<Vec<String>>,
}

#[async_trait]
impl EventSubscriber for FakeSubscriber {
    async fn subscribe(
        &self,
        _event_url: &str,
        _callback_url: &str,
        timeout_seconds: u32,
    ) -> Result<SubscriptionResponse, SoapError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SubscriptionResponse {
            sid: format!("uuid:fake-{n}"),
            timeout_seconds,
        })
    }

    async fn renew(
        &self,
        _event_url: &str,
        sid: &str,
        timeout_seconds: u32,
    ) -> Result<SubscriptionResponse, SoapError> {
        Ok(SubscriptionResponse {
            sid: sid.to_string(),
            timeout_seconds,
        })
    }

    async fn unsubscribe(&self, _event_url: &str, sid: &str) -> Result<(), SoapError> {
        self.unsubscribed.lock().unwrap().push(sid.to_string());
        Ok(())
    }
}

fn local_config() -> EventingConfig {
    EventingConfig::new()
        .with_callback_ports(0, 0)
        .with_advertised_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn avt() -> ServiceRef {
    ServiceRef::new(
        "13bf6358-00b8-101b-8000-74dfbfed7306",
        "urn:schemas-upnp-org:service:AVTransport:1",
        "http://192.168.99.1:1234/upnp/event/avt",
    )
}

async fn send_notify(url: &str, sid: &str, seq: u32, body: &str) -> reqwest::StatusCode {
    reqwest::Client::new()
        .request(Method::from_bytes(b"NOTIFY").unwrap(), url)
        .header("SID", sid)
        .header("NT", "upnp:event")
        .header("NTS", "upnp:propchange")
        .header("SEQ", seq.to_string())
        .header("Content-Type", "text/xml; charset=\"utf-8\"")
        .body(body.to_string())
        .send()
        .await
        .expect("Failed to send NOTIFY")
        .status()
}

#[tokio::test]
async fn test_notification_reaches_sink() {
    let backend = NotificationBackend::new(local_config(), Arc::new(FakeSubscriber::default()));
    backend.start().await.unwrap();
    let callback_url = backend.callback_url().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sid = backend.subscribe(&avt(), tx).await.unwrap();

    let status = send_notify(&callback_url, &sid, 0, AVT_PROPERTYSET).await;
    assert_eq!(status, 200);

    let notification = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("Timeout waiting for notification")
        .expect("Sink closed");

    assert_eq!(notification.service, avt());
    assert_eq!(notification.sid, sid);
    assert_eq!(notification.sequence, Some(0));
    let last_change = notification.variable("LastChange").unwrap();
    assert!(last_change.starts_with("<Event"));
    assert!(last_change.contains(r#"<TransportState val="PLAYING"/>"#));

    backend.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_sid_is_refused() {
    let backend = NotificationBackend::new(local_config(), Arc::new(FakeSubscriber::default()));
    backend.start().await.unwrap();
    let callback_url = backend.callback_url().await.unwrap();

    let status = send_notify(&callback_url, "uuid:nobody", 0, AVT_PROPERTYSET).await;
    assert_eq!(status, 412);

    backend.stop().await.unwrap();
}

#[tokio::test]
async fn test_unsubscribed_lease_stops_delivery() {
    let subscriber = Arc::new(FakeSubscriber::default());
    let backend = NotificationBackend::new(local_config(), subscriber.clone());
    backend.start().await.unwrap();
    let callback_url = backend.callback_url().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sid = backend.subscribe(&avt(), tx).await.unwrap();
    backend.unsubscribe(&avt()).await.unwrap();

    assert_eq!(*subscriber.unsubscribed.lock().unwrap(), vec![sid.clone()]);

    let status = send_notify(&callback_url, &sid, 1, AVT_PROPERTYSET).await;
    assert_eq!(status, 412);
    assert!(rx.try_recv().is_err());

    backend.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_releases_every_lease() {
    let subscriber = Arc::new(FakeSubscriber::default());
    let backend = NotificationBackend::new(local_config(), subscriber.clone());
    backend.start().await.unwrap();

    let rcs = ServiceRef::new(
        "13bf6358-00b8-101b-8000-74dfbfed7306",
        "urn:schemas-upnp-org:service:RenderingControl:1",
        "http://192.168.99.1:1234/upnp/event/rcs",
    );
    let (tx, _rx) = mpsc::unbounded_channel();
    backend.subscribe(&avt(), tx.clone()).await.unwrap();
    backend.subscribe(&rcs, tx).await.unwrap();

    backend.stop().await.unwrap();

    let mut released = subscriber.unsubscribed.lock().unwrap().clone();
    released.sort();
    assert_eq!(released, vec!["uuid:fake-1".to_string(), "uuid:fake-2".to_string()]);
    assert!(!backend.is_running().await);
}

#[tokio::test]
async fn test_backend_restarts_after_stop() {
    let backend = NotificationBackend::new(local_config(), Arc::new(FakeSubscriber::default()));
    backend.start().await.unwrap();
    backend.stop().await.unwrap();

    backend.start().await.unwrap();
    assert!(backend.is_running().await);

    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(backend.subscribe(&avt(), tx).await.is_ok());
    backend.stop().await.unwrap();
}
