//! ConnectionManager protocol info and resource matching.

use std::fmt;

use crate::didl::DidlResource;

/// Transfer protocols a control point can hand to a renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferProtocol {
    HttpGet,
    RtspRtpUdp,
}

impl TransferProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferProtocol::HttpGet => "http-get",
            TransferProtocol::RtspRtpUdp => "rtsp-rtp-udp",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "http-get" => Some(TransferProtocol::HttpGet),
            "rtsp-rtp-udp" => Some(TransferProtocol::RtspRtpUdp),
            _ => None,
        }
    }
}

/// MIME type plus optional `;key=value` parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFormat {
    pub mime_type: String,
    pub parameters: Vec<(String, String)>,
}

impl ContentFormat {
    pub fn parse(value: &str) -> Self {
        let mut parts = value.split(';');
        let mime_type = parts.next().unwrap_or_default().trim().to_string();
        let parameters = parts
            .filter_map(|part| part.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect();
        Self {
            mime_type,
            parameters,
        }
    }
}

/// One `protocol:network:contentFormat:additionalInfo` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolInfoEntry {
    pub protocol: TransferProtocol,
    /// Always `*` for the supported protocols
    pub network: String,
    pub content_format: ContentFormat,
    pub additional_info: String,
}

impl ProtocolInfoEntry {
    /// Parse a single entry.
    ///
    /// Entries with another transfer protocol, a network other than `*` or
    /// fewer than four fields yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        let mut fields = value.trim().splitn(4, ':');
        let protocol = TransferProtocol::parse(fields.next()?)?;
        let network = fields.next()?;
        if network != "*" {
            return None;
        }
        let content_format = ContentFormat::parse(fields.next()?);
        let additional_info = fields.next()?.to_string();

        Some(Self {
            protocol,
            network: network.to_string(),
            content_format,
            additional_info,
        })
    }

    /// Same transfer protocol and MIME type
    pub fn matches(&self, other: &ProtocolInfoEntry) -> bool {
        self.protocol == other.protocol
            && self.content_format.mime_type == other.content_format.mime_type
    }
}

impl fmt::Display for ProtocolInfoEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.protocol.as_str(),
            self.network,
            self.content_format.mime_type,
            self.additional_info
        )
    }
}

/// Parse a comma separated protocol info list, skipping unusable entries
pub fn parse_protocol_infos(value: &str) -> Vec<ProtocolInfoEntry> {
    value
        .split(',')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(ProtocolInfoEntry::parse)
        .collect()
}

/// Resources a renderer with the given sink protocols can play, in
/// document order.
pub fn match_resources<'a>(
    resources: &'a [DidlResource],
    sink_protocols: &[ProtocolInfoEntry],
) -> Vec<&'a DidlResource> {
    resources
        .iter()
        .filter(|resource| {
            ProtocolInfoEntry::parse(&resource.protocol_info).is_some_and(|offered| {
                sink_protocols
                    .iter()
                    .any(|accepted| offered.matches(accepted))
            })
        })
        .collect()
}
