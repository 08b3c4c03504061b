//! Device description parsing and resolution.
//!
//! Parses the UPnP device description XML served at an advertisement's
//! `LOCATION` and resolves service URLs against it.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{DiscoveryError, Result};
use crate::event::{strip_uuid_prefix, MediaDeviceKind};

#[derive(Debug, Deserialize)]
struct Root {
    #[serde(rename = "URLBase", default)]
    url_base: Option<String>,
    device: RawDevice,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDevice {
    device_type: String,
    #[serde(default)]
    friendly_name: String,
    #[serde(default)]
    manufacturer: Option<String>,
    #[serde(default)]
    model_name: Option<String>,
    #[serde(rename = "UDN")]
    udn: String,
    #[serde(default)]
    service_list: Option<RawServiceList>,
}

#[derive(Debug, Deserialize)]
struct RawServiceList {
    #[serde(rename = "service", default)]
    services: Vec<RawService>,
}

#[derive(Debug, Deserialize)]
struct RawService {
    #[serde(rename = "serviceType")]
    service_type: String,
    #[serde(rename = "serviceId", default)]
    service_id: String,
    #[serde(rename = "SCPDURL", default)]
    scpd_url: String,
    #[serde(rename = "controlURL")]
    control_url: String,
    #[serde(rename = "eventSubURL", default)]
    event_sub_url: String,
}

/// A service of a described device, with absolute URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescription {
    pub service_type: String,
    pub service_id: String,
    pub control_url: String,
    pub event_sub_url: String,
    pub scpd_url: String,
}

/// Parsed device description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescription {
    /// URL the description was fetched from
    pub location: String,
    pub device_type: String,
    pub friendly_name: String,
    /// Device UUID without the `uuid:` prefix
    pub udn: String,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    pub services: Vec<ServiceDescription>,
}

impl DeviceDescription {
    /// Parse a description document fetched from `location`.
    ///
    /// Relative service URLs are joined against `URLBase` when present,
    /// otherwise against `location`.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Parse` if the XML is malformed, misses
    /// required fields or contains unusable URLs.
    pub fn from_xml(xml: &str, location: &str) -> Result<Self> {
        let root: Root = quick_xml::de::from_str(xml)
            .map_err(|e| DiscoveryError::Parse(format!("Failed to parse device XML: {}", e)))?;

        let base_str = root.url_base.as_deref().unwrap_or(location);
        let base = Url::parse(base_str)
            .map_err(|e| DiscoveryError::Parse(format!("Invalid base URL {}: {}", base_str, e)))?;

        let services = root
            .device
            .service_list
            .map(|list| list.services)
            .unwrap_or_default()
            .into_iter()
            .map(|service| {
                Ok(ServiceDescription {
                    control_url: join_url(&base, &service.control_url)?,
                    event_sub_url: join_url(&base, &service.event_sub_url)?,
                    scpd_url: join_url(&base, &service.scpd_url)?,
                    service_type: service.service_type,
                    service_id: service.service_id,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            location: location.to_string(),
            device_type: root.device.device_type,
            friendly_name: root.device.friendly_name,
            udn: strip_uuid_prefix(root.device.udn.trim()).to_string(),
            manufacturer: root.device.manufacturer,
            model_name: root.device.model_name,
            services,
        })
    }

    /// Media device class of this description, if any.
    pub fn kind(&self) -> Option<MediaDeviceKind> {
        MediaDeviceKind::classify(&self.device_type)
    }

    /// First service of the given short type, e.g. `"AVTransport"`, any version.
    pub fn find_service(&self, name: &str) -> Option<&ServiceDescription> {
        let prefix = format!("urn:schemas-upnp-org:service:{}:", name);
        self.services
            .iter()
            .find(|service| service.service_type.starts_with(&prefix))
    }
}

fn join_url(base: &Url, relative: &str) -> Result<String> {
    if relative.is_empty() {
        return Ok(String::new());
    }
    base.join(relative.trim())
        .map(String::from)
        .map_err(|e| DiscoveryError::Parse(format!("Invalid service URL {}: {}", relative, e)))
}

/// Fetches and parses device descriptions.
#[async_trait]
pub trait DescriptionResolver: Send + Sync {
    /// Resolve the description at `location`.
    ///
    /// Fails with [`DiscoveryError::Resolution`] on network errors, timeouts
    /// and malformed descriptions.
    async fn resolve(&self, location: &str) -> Result<DeviceDescription>;
}

/// [`DescriptionResolver`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDescriptionResolver {
    http: reqwest::Client,
}

impl HttpDescriptionResolver {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Default for HttpDescriptionResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl DescriptionResolver for HttpDescriptionResolver {
    async fn resolve(&self, location: &str) -> Result<DeviceDescription> {
        let resolution_error = |reason: String| DiscoveryError::Resolution {
            location: location.to_string(),
            reason,
        };

        let response = self
            .http
            .get(location)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| resolution_error(e.to_string()))?;

        let xml = response
            .text()
            .await
            .map_err(|e| resolution_error(e.to_string()))?;

        let description =
            DeviceDescription::from_xml(&xml, location).map_err(|e| resolution_error(e.to_string()))?;
        debug!(
            udn = %description.udn,
            name = %description.friendly_name,
            device_type = %description.device_type,
            "Resolved device description"
        );
        Ok(description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RENDERER_XML: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>FooRenderer</friendlyName>
    <manufacturer>Foo Inc.</manufacturer>
    <modelName>FooRender</modelName>
    <UDN>uuid:13bf6358-00b8-101b-8000-74dfbfed7306</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
        <SCPDURL>/avt.xml</SCPDURL>
        <controlURL>/upnp/control/avt</controlURL>
        <eventSubURL>/upnp/event/avt</eventSubURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:RenderingControl</serviceId>
        <SCPDURL>rcs.xml</SCPDURL>
        <controlURL>upnp/control/rcs</controlURL>
        <eventSubURL>upnp/event/rcs</eventSubURL>
      </service>
    </serviceList>
  </device>
</root>"#;

    #[test]
    fn test_description_from_xml() {
        let description =
            DeviceDescription::from_xml(RENDERER_XML, "http://192.168.99.1:1234/dmr.xml").unwrap();

        assert_eq!(description.udn, "13bf6358-00b8-101b-8000-74dfbfed7306");
        assert_eq!(description.friendly_name, "FooRenderer");
        assert_eq!(description.kind(), Some(MediaDeviceKind::MediaRenderer));
        assert_eq!(description.services.len(), 2);
    }

    #[test]
    fn test_service_urls_are_absolute() {
        let description =
            DeviceDescription::from_xml(RENDERER_XML, "http://192.168.99.1:1234/dmr.xml").unwrap();

        let avt = description.find_service("AVTransport").unwrap();
        assert_eq!(avt.control_url, "http://192.168.99.1:1234/upnp/control/avt");
        assert_eq!(avt.event_sub_url, "http://192.168.99.1:1234/upnp/event/avt");

        let rcs = description.find_service("RenderingControl").unwrap();
        assert_eq!(rcs.control_url, "http://192.168.99.1:1234/upnp/control/rcs");
        assert_eq!(rcs.scpd_url, "http://192.168.99.1:1234/rcs.xml");

        assert!(description.find_service("ContentDirectory").is_none());
    }

    #[test]
    fn test_url_base_overrides_location() {
        let xml = RENDERER_XML.replace(
            "<device>",
            "<URLBase>http://10.0.0.5:49152/</URLBase><device>",
        );
        let description = DeviceDescription::from_xml(&xml, "http://192.168.99.1:1234/dmr.xml").unwrap();
        assert_eq!(
            description.find_service("AVTransport").unwrap().control_url,
            "http://10.0.0.5:49152/upnp/control/avt"
        );
    }

    #[test]
    fn test_description_without_services() {
        let xml = r#"<root><device>
            <deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
            <friendlyName>Footech Media Server</friendlyName>
            <UDN>uuid:f5b1b596-c1d2-11e9-af8b-705681aa5dfd</UDN>
        </device></root>"#;

        let description =
            DeviceDescription::from_xml(xml, "http://192.168.99.2:9200/plugins/MediaServer.xml").unwrap();
        assert_eq!(description.kind(), Some(MediaDeviceKind::MediaServer));
        assert!(description.services.is_empty());
        assert_eq!(description.manufacturer, None);
    }

    #[test]
    fn test_malformed_description() {
        let result = DeviceDescription::from_xml("<root><device>", "http://h/d.xml");
        assert!(matches!(result, Err(DiscoveryError::Parse(_))));
    }

    #[tokio::test]
    async fn test_http_resolver() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/dmr.xml")
            .with_status(200)
            .with_header("content-type", "text/xml")
            .with_body(RENDERER_XML)
            .create_async()
            .await;

        let location = format!("{}/dmr.xml", server.url());
        let description = HttpDescriptionResolver::default().resolve(&location).await.unwrap();

        assert_eq!(description.location, location);
        assert_eq!(
            description.find_service("AVTransport").unwrap().control_url,
            format!("{}/upnp/control/avt", server.url())
        );
    }

    #[tokio::test]
    async fn test_http_resolver_reports_resolution_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing.xml")
            .with_status(404)
            .create_async()
            .await;

        let location = format!("{}/missing.xml", server.url());
        let result = HttpDescriptionResolver::default().resolve(&location).await;
        assert!(matches!(result, Err(DiscoveryError::Resolution { .. })));
    }
}
