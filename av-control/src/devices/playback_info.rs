//! Renderer playback state assembled from `LastChange` events.

use std::fmt;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use crate::didl::DidlLite;
use crate::error::{ControlError, Result};

/// AVTransport `TransportState`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Transitioning,
    PausedPlayback,
    NoMediaPresent,
    Unknown,
}

impl TransportState {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "STOPPED" => TransportState::Stopped,
            "PLAYING" => TransportState::Playing,
            "TRANSITIONING" => TransportState::Transitioning,
            "PAUSED_PLAYBACK" => TransportState::PausedPlayback,
            "NO_MEDIA_PRESENT" => TransportState::NoMediaPresent,
            _ => TransportState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportState::Stopped => "STOPPED",
            TransportState::Playing => "PLAYING",
            TransportState::Transitioning => "TRANSITIONING",
            TransportState::PausedPlayback => "PAUSED_PLAYBACK",
            TransportState::NoMediaPresent => "NO_MEDIA_PRESENT",
            TransportState::Unknown => "UNKNOWN",
        }
    }

    /// Whether the renderer has finished with its current media
    pub fn is_idle(&self) -> bool {
        matches!(self, TransportState::Stopped | TransportState::NoMediaPresent)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of what a renderer is doing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackInfo {
    pub transport: TransportState,
    /// Master volume, 0-100
    pub volume_percent: Option<u8>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

/// Track details from `CurrentTrackMetaData`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

/// State variables carried by one `LastChange` document.
///
/// Fields are `None` when the event did not mention the variable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastChange {
    pub transport_state: Option<TransportState>,
    pub master_volume: Option<u8>,
    /// `Some(None)` when the renderer cleared its track metadata
    pub track: Option<Option<TrackInfo>>,
}

impl LastChange {
    /// Parse an AVTransport or RenderingControl `LastChange` document
    /// (already unescaped from the property set).
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut change = LastChange::default();
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => change.apply_element(&e)?,
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(ControlError::MalformedMetadata(e.to_string())),
            }
        }
        Ok(change)
    }

    fn apply_element(&mut self, element: &BytesStart<'_>) -> Result<()> {
        match element.local_name().as_ref() {
            b"TransportState" => {
                if let Some(value) = attribute(element, b"val")? {
                    self.transport_state = Some(TransportState::parse(&value));
                }
            }
            b"Volume" => {
                let channel = attribute(element, b"channel")?;
                if channel.as_deref().map_or(true, |c| c == "Master") {
                    if let Some(volume) = attribute(element, b"val")?.and_then(|v| v.trim().parse::<u8>().ok()) {
                        self.master_volume = Some(volume.min(100));
                    }
                }
            }
            b"CurrentTrackMetaData" => {
                let value = attribute(element, b"val")?.unwrap_or_default();
                self.track = Some(parse_track_metadata(&value));
            }
            _ => {}
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.transport_state.is_none() && self.master_volume.is_none() && self.track.is_none()
    }
}

fn parse_track_metadata(value: &str) -> Option<TrackInfo> {
    let value = value.trim();
    if value.is_empty() || value == "NOT_IMPLEMENTED" {
        return None;
    }
    let didl = DidlLite::from_xml(value).ok()?;
    let object = didl.first()?;
    Some(TrackInfo {
        title: Some(object.title.clone()).filter(|t| !t.is_empty()),
        artist: object.artist.clone(),
        album: object.album.clone(),
    })
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| ControlError::MalformedMetadata(e.to_string()))?;
        if attr.key.local_name().as_ref() == name {
            let value = attr
                .unescape_value()
                .map_err(|e| ControlError::MalformedMetadata(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

impl PlaybackInfo {
    /// Merge `change` into this snapshot; returns whether anything changed.
    pub fn apply(&mut self, change: &LastChange) -> bool {
        let before = self.clone();

        if let Some(state) = change.transport_state {
            self.transport = state;
        }
        if let Some(volume) = change.master_volume {
            self.volume_percent = Some(volume);
        }
        if let Some(track) = &change.track {
            let track = track.clone().unwrap_or_default();
            self.title = track.title;
            self.artist = track.artist;
            self.album = track.album;
        }

        *self != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AVT_LAST_CHANGE: &str = r#"<Event xmlns="urn:schemas-upnp-org:metadata-1-0/AVT/"><InstanceID val="0"><TransportState val="PLAYING"/><CurrentTrackURI val="http://192.168.99.2:9200/media/64.flac"/><CurrentTrackMetaData val="&lt;DIDL-Lite xmlns:dc=&quot;http://purl.org/dc/elements/1.1/&quot; xmlns:upnp=&quot;urn:schemas-upnp-org:metadata-1-0/upnp/&quot;&gt;&lt;item id=&quot;64&quot; parentID=&quot;0&quot;&gt;&lt;dc:title&gt;Blue in Green&lt;/dc:title&gt;&lt;upnp:artist&gt;Miles Davis&lt;/upnp:artist&gt;&lt;upnp:album&gt;Kind of Blue&lt;/upnp:album&gt;&lt;/item&gt;&lt;/DIDL-Lite&gt;"/></InstanceID></Event>"#;

    const RCS_LAST_CHANGE: &str = r#"<Event xmlns="urn:schemas-upnp-org:metadata-1-0/RCS/"><InstanceID val="0"><Volume channel="LF" val="80"/><Volume channel="Master" val="21"/><Mute channel="Master" val="0"/></InstanceID></Event>"#;

    #[test]
    fn test_transport_state_round_trip_names() {
        assert_eq!(TransportState::parse("PAUSED_PLAYBACK"), TransportState::PausedPlayback);
        assert_eq!(TransportState::parse("CUSTOM"), TransportState::Unknown);
        assert_eq!(TransportState::NoMediaPresent.to_string(), "NO_MEDIA_PRESENT");
        assert!(TransportState::Stopped.is_idle());
        assert!(!TransportState::Transitioning.is_idle());
    }

    #[test]
    fn test_parse_avtransport_change() {
        let change = LastChange::parse(AVT_LAST_CHANGE).unwrap();
        assert_eq!(change.transport_state, Some(TransportState::Playing));
        assert_eq!(change.master_volume, None);

        let track = change.track.unwrap().unwrap();
        assert_eq!(track.title.as_deref(), Some("Blue in Green"));
        assert_eq!(track.artist.as_deref(), Some("Miles Davis"));
        assert_eq!(track.album.as_deref(), Some("Kind of Blue"));
    }

    #[test]
    fn test_parse_rendering_control_change() {
        let change = LastChange::parse(RCS_LAST_CHANGE).unwrap();
        assert_eq!(change.master_volume, Some(21));
        assert_eq!(change.transport_state, None);
        assert!(change.track.is_none());
    }

    #[test]
    fn test_cleared_track_metadata() {
        let xml = r#"<Event><InstanceID val="0"><TransportState val="STOPPED"/><CurrentTrackMetaData val=""/></InstanceID></Event>"#;
        let change = LastChange::parse(xml).unwrap();
        assert_eq!(change.track, Some(None));

        let xml = r#"<Event><InstanceID val="0"><CurrentTrackMetaData val="NOT_IMPLEMENTED"/></InstanceID></Event>"#;
        assert_eq!(LastChange::parse(xml).unwrap().track, Some(None));
    }

    #[test]
    fn test_apply_reports_changes() {
        let mut info = PlaybackInfo::default();

        assert!(info.apply(&LastChange::parse(AVT_LAST_CHANGE).unwrap()));
        assert_eq!(info.transport, TransportState::Playing);
        assert_eq!(info.title.as_deref(), Some("Blue in Green"));

        assert!(info.apply(&LastChange::parse(RCS_LAST_CHANGE).unwrap()));
        assert_eq!(info.volume_percent, Some(21));

        // same values again
        assert!(!info.apply(&LastChange::parse(RCS_LAST_CHANGE).unwrap()));
        assert!(!info.apply(&LastChange::default()));
    }

    #[test]
    fn test_serialized_names() {
        let info = PlaybackInfo {
            transport: TransportState::PausedPlayback,
            volume_percent: Some(30),
            ..Default::default()
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["transport"], "PAUSED_PLAYBACK");
        assert_eq!(json["volume_percent"], 30);
    }
}
