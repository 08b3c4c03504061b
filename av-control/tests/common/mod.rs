//! Fixtures shared by the control point integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use av_control::ActionInvoker;
use av_discovery::{DeviceDescription, ServiceDescription};
use av_eventing::EventSubscriber;
use soap_client::{SoapError, SubscriptionResponse};

pub const RENDERER_UDN: &str = "13bf6358-00b8-101b-8000-74dfbfed7306";
pub const RENDERER_TYPE: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";
pub const RENDERER_LOCATION: &str = "http://192.168.99.1:1234/dmr.xml";
pub const SERVER_UDN: &str = "f5b1b596-c1d2-11e9-af8b-705681aa5dfd";
pub const SERVER_TYPE: &str = "urn:schemas-upnp-org:device:MediaServer:1";
pub const SERVER_LOCATION: &str = "http://192.168.99.2:9200/plugins/MediaServer.xml";

fn service(base: &str, name: &str) -> ServiceDescription {
    ServiceDescription {
        service_type: format!("urn:schemas-upnp-org:service:{name}:1"),
        service_id: format!("urn:upnp-org:serviceId:{name}"),
        control_url: format!("{base}/{name}/control"),
        event_sub_url: format!("{base}/{name}/event"),
        scpd_url: format!("{base}/{name}/scpd.xml"),
    }
}

pub fn renderer_description() -> DeviceDescription {
    let base = "http://192.168.99.1:1234";
    DeviceDescription {
        location: RENDERER_LOCATION.to_string(),
        device_type: RENDERER_TYPE.to_string(),
        friendly_name: "Living Room".to_string(),
        udn: RENDERER_UDN.to_string(),
        manufacturer: Some("gmrender".to_string()),
        model_name: None,
        services: ["AVTransport", "RenderingControl", "ConnectionManager"]
            .iter()
            .map(|name| service(base, name))
            .collect(),
    }
}

pub fn server_description() -> DeviceDescription {
    let base = "http://192.168.99.2:9200";
    DeviceDescription {
        location: SERVER_LOCATION.to_string(),
        device_type: SERVER_TYPE.to_string(),
        friendly_name: "Music Library".to_string(),
        udn: SERVER_UDN.to_string(),
        manufacturer: None,
        model_name: None,
        services: ["ContentDirectory", "ConnectionManager"]
            .iter()
            .map(|name| service(base, name))
            .collect(),
    }
}

/// Answers actions from a table and records every call
#[derive(Default)]
pub struct FakeInvoker {
    responses: HashMap<String, HashMap<String, String>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeInvoker {
    pub fn with_response(mut self, action: &str, outputs: &[(&str, &str)]) -> Self {
        self.responses.insert(
            action.to_string(),
            outputs
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        );
        self
    }

    pub fn actions(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionInvoker for FakeInvoker {
    async fn call(
        &self,
        _control_url: &str,
        _service_type: &str,
        action: &str,
        _args: &[(String, String)],
    ) -> Result<HashMap<String, String>, SoapError> {
        self.calls.lock().unwrap().push(action.to_string());
        Ok(self.responses.get(action).cloned().unwrap_or_default())
    }
}

/// Hands out sequential SIDs and records unsubscribes
#[derive(Default)]
pub struct FakeSubscriber {
    pub issued: AtomicUsize,
    pub unsubscribed: Mutex<Vec<String>>,
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
