//! Parsing of GENA `propertyset` bodies.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{EventingError, Result};

/// Flatten a `<e:propertyset>` document into variable name/value pairs.
///
/// Each `<e:property>` holds a single state variable; its text is returned
/// unescaped, so a `LastChange` value comes back as a plain XML document.
pub fn parse_propertyset(xml: &str) -> Result<HashMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut variables = HashMap::new();
    let mut depth = 0usize;
    let mut in_property = false;
    let mut current: Option<(String, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                let name = e.local_name();
                if depth == 2 && name.as_ref() == b"property" {
                    in_property = true;
                } else if depth == 3 && in_property {
                    let name = String::from_utf8_lossy(name.as_ref()).into_owned();
                    current = Some((name, String::new()));
                }
            }
            Ok(Event::Empty(e)) => {
                if depth == 2 && in_property {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    variables.insert(name, String::new());
                }
            }
            Ok(Event::Text(e)) => {
                if let Some((_, value)) = current.as_mut() {
                    let text = e
                        .unescape()
                        .map_err(|e| EventingError::MalformedEvent(e.to_string()))?;
                    value.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some((_, value)) = current.as_mut() {
                    value.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if depth == 3 {
                    if let Some((name, value)) = current.take() {
                        variables.insert(name, value);
                    }
                } else if depth == 2 {
                    in_property = false;
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(EventingError::MalformedEvent(e.to_string())),
        }
    }

    Ok(variables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_parse_last_change() {
        let xml = r#"<?xml version="1.0"?>
<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
    <e:property>
        <LastChange>&lt;Event xmlns="urn:schemas-upnp-org:metadata-1-0/RCS/"&gt;&lt;InstanceID val="0"&gt;&lt;Volume channel="Master" val="21"/&gt;&lt;/InstanceID&gt;&lt;/Event&gt;</LastChange>
    </e:property>
</e:propertyset>"#;

        let variables = parse_propertyset(xml).unwrap();
        assert_eq!(
            variables.get("LastChange").map(String::as_str),
            Some(r#"<Event xmlns="urn:schemas-upnp-org:metadata-1-0/RCS/"><InstanceID val="0"><Volume channel="Master" val="21"/></InstanceID></Event>"#)
        );
    }

    #[test]
    fn test_parse_multiple_properties() {
        let xml = r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
            <e:property><SourceProtocolInfo></SourceProtocolInfo></e:property>
            <e:property><SinkProtocolInfo>http-get:*:audio/mpeg:*</SinkProtocolInfo></e:property>
            <e:property><CurrentConnectionIDs>0</CurrentConnectionIDs></e:property>
            <e:property><Empty/></e:property>
        </e:propertyset>"#;

        let variables = parse_propertyset(xml).unwrap();
        assert_eq!(variables.len(), 4);
        assert_eq!(variables["SourceProtocolInfo"], "");
        assert_eq!(variables["SinkProtocolInfo"], "http-get:*:audio/mpeg:*");
        assert_eq!(variables["CurrentConnectionIDs"], "0");
        assert_eq!(variables["Empty"], "");
    }

    #[test]
    fn test_parse_cdata_value() {
        let xml = r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
            <e:property><LastChange><![CDATA[<Event/>]]></LastChange></e:property>
        </e:propertyset>"#;

        let variables = parse_propertyset(xml).unwrap();
        assert_eq!(variables["LastChange"], "<Event/>");
    }

    #[rstest]
    #[case("&lt;Event/&gt;", "<Event/>")]
    #[case("Rock &amp; Roll", "Rock & Roll")]
    #[case("&quot;quoted&quot;", "\"quoted\"")]
    #[case("plain", "plain")]
    fn test_values_are_unescaped(#[case] raw: &str, #[case] expected: &str) {
        let xml = format!(
            r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0"><e:property><Value>{raw}</Value></e:property></e:propertyset>"#
        );
        assert_eq!(parse_propertyset(&xml).unwrap()["Value"], expected);
    }

    #[test]
    fn test_parse_malformed() {
        let result = parse_propertyset("<e:propertyset><e:property><A>1</B></e:property>");
        assert!(matches!(result, Err(EventingError::MalformedEvent(_))));
    }
}
