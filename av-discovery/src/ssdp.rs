//! SSDP (Simple Service Discovery Protocol) wire adapter.
//!
//! Parses advertisements and search responses into [`RawAdvertisement`]s
//! and provides the UDP-backed [`SsdpListener`] and [`SsdpSearcher`]
//! sources used by the discovery pipeline.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{DiscoveryError, Result};
use crate::source::{AdvertisementSource, DeviceSearcher};

/// SSDP multicast group
pub const SSDP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
/// SSDP port
pub const SSDP_PORT: u16 = 1900;

/// What a raw SSDP message announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdvertisementKind {
    /// `NOTIFY` with `NTS: ssdp:alive`
    Alive,
    /// `NOTIFY` with `NTS: ssdp:byebye`
    ByeBye,
    /// `NOTIFY` with `NTS: ssdp:update`
    Update,
    /// `HTTP/1.1 200 OK` answer to an M-SEARCH
    SearchResponse,
}

/// An SSDP message reduced to the fields discovery needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAdvertisement {
    pub kind: AdvertisementKind,
    /// `NT` header for advertisements, `ST` header for search responses
    pub notification_type: String,
    pub usn: String,
    /// Description URL, absent for byebye messages
    pub location: Option<String>,
}

/// Parse an SSDP datagram.
///
/// Returns `None` for M-SEARCH requests from other control points, unknown
/// `NTS` values and messages missing required headers.
pub fn parse_ssdp_message(message: &str) -> Option<RawAdvertisement> {
    let mut lines = message.lines();
    let start_line = lines.next()?.trim();

    let is_notify = start_line
        .get(..6)
        .map(|method| method.eq_ignore_ascii_case("NOTIFY"))
        .unwrap_or(false);
    let is_response = start_line
        .get(..8)
        .map(|version| version.eq_ignore_ascii_case("HTTP/1.1"))
        .unwrap_or(false)
        && start_line.contains(" 200");

    if !is_notify && !is_response {
        return None;
    }

    let mut nt = None;
    let mut nts = None;
    let mut st = None;
    let mut usn = None;
    let mut location = None;

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        if let Some(value) = extract_header_value(line, "LOCATION:") {
            location = Some(value);
        } else if let Some(value) = extract_header_value(line, "NTS:") {
            nts = Some(value);
        } else if let Some(value) = extract_header_value(line, "NT:") {
            nt = Some(value);
        } else if let Some(value) = extract_header_value(line, "ST:") {
            st = Some(value);
        } else if let Some(value) = extract_header_value(line, "USN:") {
            usn = Some(value);
        }
    }

    let (kind, notification_type) = if is_notify {
        let kind = match nts?.to_ascii_lowercase().as_str() {
            "ssdp:alive" => AdvertisementKind::Alive,
            "ssdp:byebye" => AdvertisementKind::ByeBye,
            "ssdp:update" => AdvertisementKind::Update,
            _ => return None,
        };
        (kind, nt?)
    } else {
        (AdvertisementKind::SearchResponse, st?)
    };

    if kind != AdvertisementKind::ByeBye && location.is_none() {
        return None;
    }

    Some(RawAdvertisement {
        kind,
        notification_type,
        usn: usn?,
        location,
    })
}

/// Build an M-SEARCH request for `search_target`.
pub fn build_msearch(search_target: &str, mx: u64) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}:{}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         USER-AGENT: upnp-av-control/0.2 UPnP/1.0\r\n\
         \r\n",
        SSDP_MULTICAST_ADDR, SSDP_PORT, mx, search_target
    )
}

/// Extract header value from a line like "HEADER: value"
fn extract_header_value(line: &str, header: &str) -> Option<String> {
    let name = line.get(..header.len())?;
    let value = line.get(header.len()..)?;
    if !value.is_empty() && name.eq_ignore_ascii_case(header) {
        Some(value.trim().to_string())
    } else {
        None
    }
}

/// Passive listener for SSDP advertisements on the multicast group.
#[derive(Debug, Clone)]
pub struct SsdpListener {
    interface: Ipv4Addr,
}

impl SsdpListener {
    /// Listen on the interface with address `interface`;
    /// `Ipv4Addr::UNSPECIFIED` lets the OS choose.
    pub fn new(interface: Ipv4Addr) -> Self {
        Self { interface }
    }

    fn create_multicast_socket(&self) -> std::io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, SSDP_PORT);
        socket.bind(&bind_addr.into())?;
        socket.join_multicast_v4(&SSDP_MULTICAST_ADDR, &self.interface)?;
        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket)
    }
}

#[async_trait]
impl AdvertisementSource for SsdpListener {
    async fn listen(
        &self,
        sink: mpsc::Sender<RawAdvertisement>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let socket = self
            .create_multicast_socket()
            .map_err(|e| DiscoveryError::Network(format!("Failed to join SSDP multicast group: {}", e)))?;
        debug!(interface = %self.interface, "SSDP listener started");

        let mut buf = [0u8; 4096];
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("SSDP listener shutting down");
                    break;
                }
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, from)) => {
                            let Ok(text) = std::str::from_utf8(&buf[..len]) else {
                                trace!(%from, "Ignoring non UTF-8 datagram");
                                continue;
                            };
                            if let Some(advertisement) = parse_ssdp_message(text) {
                                if sink.send(advertisement).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            warn!("Error receiving SSDP datagram: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Active M-SEARCH client.
#[derive(Debug, Clone, Default)]
pub struct SsdpSearcher;

impl SsdpSearcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeviceSearcher for SsdpSearcher {
    async fn search(&self, search_target: &str, mx: Duration) -> Result<Vec<RawAdvertisement>> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
            .await
            .map_err(|e| DiscoveryError::Network(format!("Failed to bind UDP socket: {}", e)))?;

        let request = build_msearch(search_target, mx.as_secs().max(1));
        socket
            .send_to(request.as_bytes(), (SSDP_MULTICAST_ADDR, SSDP_PORT))
            .await
            .map_err(|e| DiscoveryError::Network(format!("Failed to send M-SEARCH: {}", e)))?;

        // devices answer within MX seconds; allow one more for the network
        let deadline = Instant::now() + mx + Duration::from_secs(1);
        let mut responses = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => break,
                Ok(Err(e)) => {
                    warn!(target = %search_target, "Error receiving search response: {}", e);
                    break;
                }
                Ok(Ok((len, _))) => {
                    if let Some(response) = std::str::from_utf8(&buf[..len])
                        .ok()
                        .and_then(parse_ssdp_message)
                    {
                        responses.push(response);
                    }
                }
            }
        }

        debug!(target = %search_target, count = responses.len(), "M-SEARCH finished");
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const RENDERER_USN: &str =
        "uuid:13bf6358-00b8-101b-8000-74dfbfed7306::urn:schemas-upnp-org:device:MediaRenderer:1";

    #[test]
    fn test_parse_alive_notify() {
        let message = format!(
            "NOTIFY * HTTP/1.1\r\n\
             HOST: 239.255.255.250:1900\r\n\
             CACHE-CONTROL: max-age=1800\r\n\
             LOCATION: http://192.168.99.1:1234/dmr.xml\r\n\
             NT: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
             NTS: ssdp:alive\r\n\
             SERVER: foonix/1.2 UPnP/1.0 FooRender/1.50\r\n\
             USN: {RENDERER_USN}\r\n\
             \r\n"
        );

        let parsed = parse_ssdp_message(&message).unwrap();
        assert_eq!(
            parsed,
            RawAdvertisement {
                kind: AdvertisementKind::Alive,
                notification_type: "urn:schemas-upnp-org:device:MediaRenderer:1".to_string(),
                usn: RENDERER_USN.to_string(),
                location: Some("http://192.168.99.1:1234/dmr.xml".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_notify_with_non_ascii_headers() {
        let message = format!(
            "NOTIFY * HTTP/1.1\r\n\
             HOST: 239.255.255.250:1900\r\n\
             SERVER: ÜberOS/1.0 UPnP/1.0\r\n\
             Ü: x\r\n\
             LOCATION: http://192.168.99.1:1234/dmr.xml\r\n\
             NT: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
             NTS: ssdp:alive\r\n\
             USN: {RENDERER_USN}\r\n\
             \r\n"
        );

        let parsed = parse_ssdp_message(&message).unwrap();
        assert_eq!(parsed.kind, AdvertisementKind::Alive);
        assert_eq!(parsed.usn, RENDERER_USN);
        assert_eq!(parsed.location.as_deref(), Some("http://192.168.99.1:1234/dmr.xml"));
    }

    #[test]
    fn test_parse_byebye_without_location() {
        let message = format!(
            "NOTIFY * HTTP/1.1\r\n\
             HOST: 239.255.255.250:1900\r\n\
             NT: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
             NTS: ssdp:byebye\r\n\
             USN: {RENDERER_USN}\r\n\
             \r\n"
        );

        let parsed = parse_ssdp_message(&message).unwrap();
        assert_eq!(parsed.kind, AdvertisementKind::ByeBye);
        assert_eq!(parsed.location, None);
    }

    #[test]
    fn test_parse_search_response_uses_st() {
        let message = format!(
            "HTTP/1.1 200 OK\r\n\
             CACHE-CONTROL: max-age=1800\r\n\
             EXT:\r\n\
             location: http://192.168.99.1:1234/dmr.xml\r\n\
             st: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
             usn: {RENDERER_USN}\r\n\
             \r\n"
        );

        let parsed = parse_ssdp_message(&message).unwrap();
        assert_eq!(parsed.kind, AdvertisementKind::SearchResponse);
        assert_eq!(parsed.notification_type, "urn:schemas-upnp-org:device:MediaRenderer:1");
    }

    #[rstest]
    #[case("ssdp:update", Some(AdvertisementKind::Update))]
    #[case("SSDP:ALIVE", Some(AdvertisementKind::Alive))]
    #[case("ssdp:unknown", None)]
    fn test_parse_nts_values(#[case] nts: &str, #[case] expected: Option<AdvertisementKind>) {
        let message = format!(
            "NOTIFY * HTTP/1.1\r\n\
             LOCATION: http://192.168.99.1:1234/dmr.xml\r\n\
             NT: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
             NTS: {nts}\r\n\
             USN: {RENDERER_USN}\r\n\
             \r\n"
        );

        assert_eq!(parse_ssdp_message(&message).map(|a| a.kind), expected);
    }

    #[rstest]
    #[case::msearch_request(
        "M-SEARCH * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nMAN: \"ssdp:discover\"\r\nST: ssdp:all\r\n\r\n"
    )]
    #[case::alive_without_location(
        "NOTIFY * HTTP/1.1\r\nNT: upnp:rootdevice\r\nNTS: ssdp:alive\r\nUSN: uuid:x::upnp:rootdevice\r\n\r\n"
    )]
    #[case::missing_usn(
        "HTTP/1.1 200 OK\r\nLOCATION: http://h/d.xml\r\nST: upnp:rootdevice\r\n\r\n"
    )]
    #[case::error_response(
        "HTTP/1.1 500 Internal Server Error\r\nLOCATION: http://h/d.xml\r\nST: a\r\nUSN: b\r\n\r\n"
    )]
    #[case::empty("")]
    #[case::garbage("This is not a valid SSDP message\r\nSome random text\r\n")]
    fn test_parse_rejects_unusable_messages(#[case] message: &str) {
        assert!(parse_ssdp_message(message).is_none());
    }

    #[test]
    fn test_build_msearch() {
        let request = build_msearch("urn:schemas-upnp-org:device:MediaServer:1", 3);
        assert!(request.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(request.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(request.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(request.contains("MX: 3\r\n"));
        assert!(request.contains("ST: urn:schemas-upnp-org:device:MediaServer:1\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_extract_header_value_case_insensitive() {
        assert_eq!(
            extract_header_value("LoCaTiOn: http://example.com", "LOCATION:"),
            Some("http://example.com".to_string())
        );
        assert_eq!(extract_header_value("LOCATIONS: value", "LOCATION:"), None);
        assert_eq!(extract_header_value("LOCATION:", "LOCATION:"), None);
        assert_eq!(extract_header_value("SERVER: ÜberOS/1.0", "LOCATION:"), None);
        assert_eq!(extract_header_value("NÜ", "NT:"), None);
    }

    #[test]
    fn test_nts_header_is_not_mistaken_for_nt() {
        let message = format!(
            "NOTIFY * HTTP/1.1\r\n\
             NTS: ssdp:byebye\r\n\
             NT: urn:schemas-upnp-org:device:MediaServer:1\r\n\
             USN: {RENDERER_USN}\r\n\
             \r\n"
        );

        let parsed = parse_ssdp_message(&message).unwrap();
        assert_eq!(parsed.notification_type, "urn:schemas-upnp-org:device:MediaServer:1");
    }
}
