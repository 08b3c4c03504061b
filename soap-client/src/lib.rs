//! SOAP client for UPnP device communication
//!
//! This crate provides a minimal async SOAP client for invoking actions on
//! UPnP services, plus the GENA `SUBSCRIBE`/`UNSUBSCRIBE` requests used for
//! event subscriptions. All URLs are absolute; resolving them against a
//! device description is the caller's job.

mod error;

pub use error::SoapError;

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use tracing::{debug, trace};
use xmltree::Element;

/// Response from a UPnP subscription request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionResponse {
    /// Subscription ID returned by the device
    pub sid: String,
    /// Actual timeout granted by the device (in seconds)
    pub timeout_seconds: u32,
}

/// A minimal async SOAP client for UPnP device communication
#[derive(Debug, Clone)]
pub struct SoapClient {
    http: reqwest::Client,
}

impl SoapClient {
    /// Create a new SOAP client with default timeouts
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }

    /// Use an existing HTTP client
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Invoke `action` on the service at `control_url`.
    ///
    /// Argument values are XML-escaped. Returns the output arguments of the
    /// `<action>Response` element by name.
    pub async fn call(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        args: &[(&str, String)],
    ) -> Result<HashMap<String, String>, SoapError> {
        let payload: String = args
            .iter()
            .map(|(name, value)| format!("<{name}>{}</{name}>", escape_xml(value)))
            .collect();

        let body = format!(
            r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:{action} xmlns:u="{service_type}">{payload}</u:{action}></s:Body></s:Envelope>"#,
        );
        let soap_action = format!("\"{}#{}\"", service_type, action);

        debug!(%control_url, %action, "Invoking SOAP action");
        let response = self
            .http
            .post(control_url)
            .header("Content-Type", "text/xml; charset=\"utf-8\"")
            .header("SOAPACTION", soap_action)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let xml_text = response.text().await?;
        trace!(%action, %status, body = %xml_text, "SOAP response");

        let xml = match Element::parse(xml_text.as_bytes()) {
            Ok(xml) => xml,
            Err(e) if status.is_success() => return Err(SoapError::Parse(e.to_string())),
            Err(_) => return Err(SoapError::Status(status.as_u16())),
        };

        let response = self.extract_response(&xml, action)?;
        Ok(response
            .children
            .iter()
            .filter_map(|node| node.as_element())
            .map(|child| {
                let text = child.get_text().map(|t| t.into_owned()).unwrap_or_default();
                (child.name.clone(), text)
            })
            .collect())
    }

    /// Subscribe to events of the service whose event URL is `event_url`.
    ///
    /// # Arguments
    /// * `event_url` - Absolute `eventSubURL` of the service
    /// * `callback_url` - URL where events should be sent
    /// * `timeout_seconds` - Requested subscription timeout in seconds
    pub async fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout_seconds: u32,
    ) -> Result<SubscriptionResponse, SoapError> {
        let response = self
            .http
            .request(gena_method("SUBSCRIBE")?, event_url)
            .header("CALLBACK", format!("<{}>", callback_url))
            .header("NT", "upnp:event")
            .header("TIMEOUT", format!("Second-{}", timeout_seconds))
            .send()
            .await?;

        Self::check_status(response.status())?;

        let sid = header_value(&response, "SID")
            .ok_or_else(|| SoapError::Parse("Missing SID header in SUBSCRIBE response".to_string()))?;
        let timeout_seconds = header_value(&response, "TIMEOUT")
            .and_then(|value| parse_timeout_header(&value))
            .unwrap_or(timeout_seconds);

        Ok(SubscriptionResponse { sid, timeout_seconds })
    }

    /// Renew an existing subscription.
    ///
    /// The returned SID is the one the device reported, or `sid` when the
    /// device omitted the header.
    pub async fn renew_subscription(
        &self,
        event_url: &str,
        sid: &str,
        timeout_seconds: u32,
    ) -> Result<SubscriptionResponse, SoapError> {
        let response = self
            .http
            .request(gena_method("SUBSCRIBE")?, event_url)
            .header("SID", sid)
            .header("TIMEOUT", format!("Second-{}", timeout_seconds))
            .send()
            .await?;

        Self::check_status(response.status())?;

        let sid = header_value(&response, "SID").unwrap_or_else(|| sid.to_string());
        let timeout_seconds = header_value(&response, "TIMEOUT")
            .and_then(|value| parse_timeout_header(&value))
            .unwrap_or(timeout_seconds);

        Ok(SubscriptionResponse { sid, timeout_seconds })
    }

    /// Cancel a subscription
    pub async fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<(), SoapError> {
        let response = self
            .http
            .request(gena_method("UNSUBSCRIBE")?, event_url)
            .header("SID", sid)
            .send()
            .await?;

        Self::check_status(response.status())
    }

    fn check_status(status: StatusCode) -> Result<(), SoapError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(SoapError::Status(status.as_u16()))
        }
    }

    fn extract_response(&self, xml: &Element, action: &str) -> Result<Element, SoapError> {
        let body = xml
            .get_child("Body")
            .ok_or_else(|| SoapError::Parse("Missing SOAP Body".to_string()))?;

        if let Some(fault) = body.get_child("Fault") {
            let error_code = fault
                .get_child("detail")
                .and_then(|d| d.get_child("UPnPError"))
                .and_then(|e| e.get_child("errorCode"))
                .and_then(|c| c.get_text())
                .and_then(|t| t.trim().parse::<u16>().ok())
                .unwrap_or(500);
            return Err(SoapError::Fault(error_code));
        }

        let response_name = format!("{}Response", action);
        body.get_child(response_name.as_str())
            .cloned()
            .ok_or_else(|| SoapError::Parse(format!("Missing {} element", response_name)))
    }
}

impl Default for SoapClient {
    fn default() -> Self {
        Self::new()
    }
}

fn gena_method(name: &str) -> Result<Method, SoapError> {
    Method::from_bytes(name.as_bytes()).map_err(|e| SoapError::Network(e.to_string()))
}

fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
}

/// Parse a GENA `TIMEOUT` header (`Second-1800`). `infinite` is not a number
/// and yields `None`.
pub fn parse_timeout_header(value: &str) -> Option<u32> {
    let value = value.trim();
    let seconds = value
        .strip_prefix("Second-")
        .or_else(|| value.strip_prefix("second-"))?;
    seconds.trim().parse::<u32>().ok()
}

fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}
