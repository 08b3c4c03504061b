//! Typed discovery events and media device classification.

use std::fmt;

const MEDIA_SERVER_PREFIX: &str = "urn:schemas-upnp-org:device:MediaServer:";
const MEDIA_RENDERER_PREFIX: &str = "urn:schemas-upnp-org:device:MediaRenderer:";

/// Kind of change a [`DiscoveryEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryEventType {
    NewDevice,
    DeviceUpdate,
    DeviceLost,
}

impl DiscoveryEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryEventType::NewDevice => "NEW_DEVICE",
            DiscoveryEventType::DeviceUpdate => "DEVICE_UPDATE",
            DiscoveryEventType::DeviceLost => "DEVICE_LOST",
        }
    }
}

impl fmt::Display for DiscoveryEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized discovery event for a media device.
///
/// `location` is set for [`DiscoveryEventType::NewDevice`] and
/// [`DiscoveryEventType::DeviceUpdate`] only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEvent {
    pub event_type: DiscoveryEventType,
    /// Device type descriptor, e.g. `urn:schemas-upnp-org:device:MediaRenderer:1`
    pub device_type: String,
    /// Device UUID without the `uuid:` prefix
    pub udn: String,
    pub location: Option<String>,
}

/// The two media device classes a control point cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaDeviceKind {
    MediaServer,
    MediaRenderer,
}

impl MediaDeviceKind {
    /// Classify a device type descriptor.
    ///
    /// Accepts `urn:schemas-upnp-org:device:MediaServer:<v>` and
    /// `urn:schemas-upnp-org:device:MediaRenderer:<v>` where the version
    /// starts with a digit 1-9. Everything else (services, root devices,
    /// printers) yields `None`.
    ///
    /// ```
    /// use av_discovery::MediaDeviceKind;
    ///
    /// assert_eq!(
    ///     MediaDeviceKind::classify("urn:schemas-upnp-org:device:MediaRenderer:2"),
    ///     Some(MediaDeviceKind::MediaRenderer)
    /// );
    /// assert_eq!(MediaDeviceKind::classify("upnp:rootdevice"), None);
    /// ```
    pub fn classify(device_type: &str) -> Option<Self> {
        let (kind, version) = if let Some(version) = device_type.strip_prefix(MEDIA_SERVER_PREFIX) {
            (MediaDeviceKind::MediaServer, version)
        } else if let Some(version) = device_type.strip_prefix(MEDIA_RENDERER_PREFIX) {
            (MediaDeviceKind::MediaRenderer, version)
        } else {
            return None;
        };

        match version.chars().next() {
            Some('1'..='9') => Some(kind),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaDeviceKind::MediaServer => "MediaServer",
            MediaDeviceKind::MediaRenderer => "MediaRenderer",
        }
    }
}

impl fmt::Display for MediaDeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `device_type` names a media server or renderer.
pub fn is_media_device(device_type: &str) -> bool {
    MediaDeviceKind::classify(device_type).is_some()
}

/// Extract the device UUID from a unique service name.
///
/// Removes the `::<device_type>` suffix and then a leading `uuid:`.
///
/// ```
/// use av_discovery::udn_from_usn;
///
/// let usn = "uuid:f5b1b596-c1d2-11e9-af8b-705681aa5dfd::urn:schemas-upnp-org:device:MediaServer:1";
/// assert_eq!(
///     udn_from_usn(usn, "urn:schemas-upnp-org:device:MediaServer:1"),
///     "f5b1b596-c1d2-11e9-af8b-705681aa5dfd"
/// );
/// ```
pub fn udn_from_usn(usn: &str, device_type: &str) -> String {
    let suffix = format!("::{}", device_type);
    let without_type = usn.strip_suffix(suffix.as_str()).unwrap_or(usn);
    strip_uuid_prefix(without_type).to_string()
}

/// Remove a leading `uuid:` from a UDN, if present.
pub fn strip_uuid_prefix(udn: &str) -> &str {
    udn.strip_prefix("uuid:").unwrap_or(udn)
}
