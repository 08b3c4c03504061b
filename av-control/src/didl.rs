//! DIDL-Lite metadata documents.
//!
//! ContentDirectory `Browse` results and AVTransport track metadata are both
//! DIDL-Lite. Only the fields a control point needs are extracted; the raw
//! document is kept so it can be handed back to a renderer unchanged.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;

use crate::error::{ControlError, Result};

/// A `<res>` element of a DIDL-Lite object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DidlResource {
    pub uri: String,
    /// `protocol:network:contentFormat:additionalInfo`
    pub protocol_info: String,
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DidlObjectKind {
    Item,
    Container,
}

/// An `<item>` or `<container>` of a DIDL-Lite document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DidlObject {
    pub kind: DidlObjectKind,
    pub id: String,
    pub parent_id: String,
    /// `upnp:class`, e.g. `object.item.audioItem.musicTrack`
    pub class: String,
    pub title: String,
    /// `upnp:artist`, falling back to `dc:creator`
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_art_uri: Option<String>,
    pub resources: Vec<DidlResource>,
}

/// A parsed DIDL-Lite document together with its source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DidlLite {
    pub objects: Vec<DidlObject>,
    pub xml: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Class,
    Artist,
    Creator,
    Album,
    AlbumArtUri,
    Res,
}

impl Field {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Field::Title),
            b"class" => Some(Field::Class),
            b"artist" => Some(Field::Artist),
            b"creator" => Some(Field::Creator),
            b"album" => Some(Field::Album),
            b"albumArtURI" => Some(Field::AlbumArtUri),
            b"res" => Some(Field::Res),
            _ => None,
        }
    }
}

struct PartialObject {
    object: DidlObject,
    creator: Option<String>,
}

impl PartialObject {
    fn start(kind: DidlObjectKind, element: &BytesStart<'_>) -> Result<Self> {
        Ok(Self {
            object: DidlObject {
                kind,
                id: attribute(element, b"id")?.unwrap_or_default(),
                parent_id: attribute(element, b"parentID")?.unwrap_or_default(),
                class: String::new(),
                title: String::new(),
                artist: None,
                album: None,
                album_art_uri: None,
                resources: Vec::new(),
            },
            creator: None,
        })
    }

    fn apply(&mut self, field: Field, text: String, resource: Option<DidlResource>) {
        let object = &mut self.object;
        match field {
            Field::Title => object.title = text,
            Field::Class => object.class = text,
            Field::Artist => {
                if object.artist.is_none() {
                    object.artist = Some(text);
                }
            }
            Field::Creator => {
                if self.creator.is_none() {
                    self.creator = Some(text);
                }
            }
            Field::Album => {
                if object.album.is_none() {
                    object.album = Some(text);
                }
            }
            Field::AlbumArtUri => {
                if object.album_art_uri.is_none() {
                    object.album_art_uri = Some(text);
                }
            }
            Field::Res => {
                if let Some(mut resource) = resource {
                    resource.uri = text;
                    object.resources.push(resource);
                }
            }
        }
    }

    fn finish(self) -> DidlObject {
        let mut object = self.object;
        if object.artist.is_none() {
            object.artist = self.creator;
        }
        object
    }
}

impl DidlLite {
    /// Parse a DIDL-Lite document.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::MalformedMetadata`] for malformed XML or a
    /// document without a `DIDL-Lite` root.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut saw_root = false;
        let mut objects = Vec::new();
        let mut current: Option<PartialObject> = None;
        let mut field: Option<Field> = None;
        let mut resource: Option<DidlResource> = None;
        let mut text = String::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => match (e.local_name().as_ref(), current.is_some()) {
                    (b"DIDL-Lite", _) => saw_root = true,
                    (b"item", false) => current = Some(PartialObject::start(DidlObjectKind::Item, &e)?),
                    (b"container", false) => {
                        current = Some(PartialObject::start(DidlObjectKind::Container, &e)?)
                    }
                    (name, true) => {
                        field = Field::from_local_name(name);
                        text.clear();
                        if field == Some(Field::Res) {
                            resource = Some(DidlResource {
                                uri: String::new(),
                                protocol_info: attribute(&e, b"protocolInfo")?.unwrap_or_default(),
                                duration: attribute(&e, b"duration")?,
                            });
                        }
                    }
                    _ => {}
                },
                Ok(Event::Empty(e)) => match (e.local_name().as_ref(), current.is_some()) {
                    (b"DIDL-Lite", _) => saw_root = true,
                    (b"item", false) => {
                        objects.push(PartialObject::start(DidlObjectKind::Item, &e)?.finish())
                    }
                    (b"container", false) => {
                        objects.push(PartialObject::start(DidlObjectKind::Container, &e)?.finish())
                    }
                    _ => {}
                },
                Ok(Event::Text(e)) => {
                    if field.is_some() {
                        let unescaped = e.unescape().map_err(malformed)?;
                        text.push_str(&unescaped);
                    }
                }
                Ok(Event::CData(e)) => {
                    if field.is_some() {
                        text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                    }
                }
                Ok(Event::End(e)) => match e.local_name().as_ref() {
                    b"item" | b"container" => {
                        if let Some(partial) = current.take() {
                            objects.push(partial.finish());
                        }
                    }
                    _ => {
                        if let (Some(done), Some(partial)) = (field.take(), current.as_mut()) {
                            partial.apply(done, std::mem::take(&mut text), resource.take());
                        }
                    }
                },
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(malformed(e)),
            }
        }

        if !saw_root {
            return Err(ControlError::MalformedMetadata(
                "document has no DIDL-Lite root".to_string(),
            ));
        }

        Ok(Self {
            objects,
            xml: xml.to_string(),
        })
    }

    pub fn first(&self) -> Option<&DidlObject> {
        self.objects.first()
    }
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(malformed)?;
        if attr.key.local_name().as_ref() == name {
            let value: Cow<'_, str> = attr.unescape_value().map_err(malformed)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn malformed(error: impl std::fmt::Display) -> ControlError {
    ControlError::MalformedMetadata(error.to_string())
}
