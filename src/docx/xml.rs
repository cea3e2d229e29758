use std::collections::BTreeMap;

use anyhow::{anyhow, Context};
use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::Reader;
use sha2::{Digest, Sha256};

#[derive(Clone, Debug, PartialEq)]
pub enum XmlEvent {
    Decl {
        version: String,
        encoding: Option<String>,
        standalone: Option<String>,
    },
    Start {
        name: String,
        attrs: Vec<(String, String)>,
    },
    End {
        name: String,
    },
    Empty {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text {
        text: String,
    },
    CData {
        text: String,
    },
    Comment {
        text: String,
    },
    PI {
        content: String,
    },
    DocType {
        text: String,
    },
}

impl XmlEvent {
    pub fn empty(name: &str, attrs: &[(&str, &str)]) -> Self {
        XmlEvent::Empty {
            name: name.to_string(),
            attrs: own_attrs(attrs),
        }
    }

    pub fn is_start_of(&self, tag: &str) -> bool {
        matches!(self, XmlEvent::Start { name, .. } if name == tag)
    }

    pub fn is_end_of(&self, tag: &str) -> bool {
        matches!(self, XmlEvent::End { name } if name == tag)
    }
}

fn own_attrs(attrs: &[(&str, &str)]) -> Vec<(String, String)> {
    attrs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// One XML entry of the package as a flat, lossless event stream.
#[derive(Clone)]
pub struct XmlPart {
    pub name: String,
    pub events: Vec<XmlEvent>,
    pub baseline_hash: String,
}

pub fn parse_xml_part(name: &str, xml_bytes: &[u8]) -> anyhow::Result<XmlPart> {
    let events = parse_events(xml_bytes)?;
    let baseline_hash = structure_hash(&events);
    Ok(XmlPart {
        name: name.to_string(),
        events,
        baseline_hash,
    })
}

/// Parses a standalone markup snippet (no declaration required).
pub fn parse_fragment(xml: &str) -> anyhow::Result<Vec<XmlEvent>> {
    parse_events(xml.as_bytes())
}

fn parse_events(xml_bytes: &[u8]) -> anyhow::Result<Vec<XmlEvent>> {
    let mut reader = Reader::from_reader(xml_bytes);
    reader.config_mut().trim_text(false);

    let mut events: Vec<XmlEvent> = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let ev = reader.read_event_into(&mut buf).context("read xml event")?;
        match ev {
            Event::Eof => break,
            Event::Decl(d) => {
                let version = bytes_to_string(d.version().context("decl version")?);
                let encoding = d
                    .encoding()
                    .map(|r| r.map(bytes_to_string))
                    .transpose()
                    .unwrap_or(None);
                let standalone = d
                    .standalone()
                    .map(|r| r.map(bytes_to_string))
                    .transpose()
                    .unwrap_or(None);
                events.push(XmlEvent::Decl {
                    version,
                    encoding,
                    standalone,
                });
            }
            Event::Start(s) => {
                events.push(XmlEvent::Start {
                    name: bytes_to_string(s.name().as_ref()),
                    attrs: collect_attrs(&s)?,
                });
            }
            Event::End(e) => {
                events.push(XmlEvent::End {
                    name: bytes_to_string(e.name().as_ref()),
                });
            }
            Event::Empty(s) => {
                events.push(XmlEvent::Empty {
                    name: bytes_to_string(s.name().as_ref()),
                    attrs: collect_attrs(&s)?,
                });
            }
            Event::Text(t) => {
                let txt = t.unescape().context("unescape text")?.into_owned();
                events.push(XmlEvent::Text { text: txt });
            }
            Event::CData(t) => {
                let txt = bytes_to_string(t.into_inner());
                events.push(XmlEvent::CData { text: txt });
            }
            Event::Comment(t) => {
                let txt = bytes_to_string(t.into_inner());
                events.push(XmlEvent::Comment { text: txt });
            }
            Event::PI(t) => {
                let target = bytes_to_string(t.target());
                let content = bytes_to_string(t.content());
                events.push(XmlEvent::PI {
                    content: format!("{target}{content}"),
                });
            }
            Event::DocType(t) => {
                let txt = bytes_to_string(t.into_inner());
                events.push(XmlEvent::DocType { text: txt });
            }
        }
    }
    Ok(events)
}

fn collect_attrs(s: &BytesStart<'_>) -> anyhow::Result<Vec<(String, String)>> {
    let mut attrs: Vec<(String, String)> = Vec::new();
    for a in s.attributes() {
        let a = a.context("attr")?;
        let key = bytes_to_string(a.key.as_ref());
        // Raw (still escaped) bytes; write_xml_part emits them verbatim so
        // character references such as `&#xD;` survive the round trip.
        let val = bytes_to_string(a.value.as_ref());
        attrs.push((key, val));
    }
    Ok(attrs)
}

fn bytes_to_string(bytes: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(bytes.as_ref()).into_owned()
}

pub fn find_attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

pub fn set_attr_value(ev: &mut XmlEvent, key: &str, value: &str) {
    match ev {
        XmlEvent::Start { attrs, .. } | XmlEvent::Empty { attrs, .. } => {
            for (k, v) in attrs.iter_mut() {
                if k == key {
                    *v = value.to_string();
                    return;
                }
            }
            attrs.push((key.to_string(), value.to_string()));
        }
        _ => {}
    }
}

/// Escapes text for use inside an attribute value stored in raw form.
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Index of the event closing the element opened at `start`.
pub fn subtree_end(events: &[XmlEvent], start: usize) -> Option<usize> {
    match events.get(start)? {
        XmlEvent::Empty { .. } => return Some(start),
        XmlEvent::Start { .. } => {}
        _ => return None,
    }
    let mut depth = 0usize;
    for (i, ev) in events.iter().enumerate().skip(start) {
        match ev {
            XmlEvent::Start { .. } => depth += 1,
            XmlEvent::End { .. } => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn write_xml_part(part: &XmlPart) -> anyhow::Result<Vec<u8>> {
    let mut out: Vec<u8> = Vec::new();

    fn escape_text_into(out: &mut Vec<u8>, text: &str) {
        for ch in text.chars() {
            match ch {
                '&' => out.extend_from_slice(b"&amp;"),
                '<' => out.extend_from_slice(b"&lt;"),
                '>' => out.extend_from_slice(b"&gt;"),
                _ => {
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
    }

    fn write_start_like(out: &mut Vec<u8>, name: &str, attrs: &[(String, String)], empty: bool) {
        out.extend_from_slice(b"<");
        out.extend_from_slice(name.as_bytes());
        // Attribute values are already escaped.
        for (k, v) in attrs {
            out.extend_from_slice(b" ");
            out.extend_from_slice(k.as_bytes());
            out.extend_from_slice(b"=\"");
            out.extend_from_slice(v.as_bytes());
            out.extend_from_slice(b"\"");
        }
        if empty {
            out.extend_from_slice(b"/>");
        } else {
            out.extend_from_slice(b">");
        }
    }

    for ev in &part.events {
        match ev {
            XmlEvent::Decl {
                version,
                encoding,
                standalone,
            } => {
                let d =
                    BytesDecl::new(version.as_str(), encoding.as_deref(), standalone.as_deref());
                let mut writer = quick_xml::Writer::new(Vec::new());
                writer.write_event(Event::Decl(d)).context("write decl")?;
                out.extend_from_slice(&writer.into_inner());
            }
            XmlEvent::Start { name, attrs } => {
                write_start_like(&mut out, name, attrs, false);
            }
            XmlEvent::End { name } => {
                out.extend_from_slice(b"</");
                out.extend_from_slice(name.as_bytes());
                out.extend_from_slice(b">");
            }
            XmlEvent::Empty { name, attrs } => {
                write_start_like(&mut out, name, attrs, true);
            }
            XmlEvent::Text { text } => {
                escape_text_into(&mut out, text);
            }
            XmlEvent::CData { text } => {
                out.extend_from_slice(b"<![CDATA[");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"]]>");
            }
            XmlEvent::Comment { text } => {
                out.extend_from_slice(b"<!--");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"-->");
            }
            XmlEvent::PI { content } => {
                out.extend_from_slice(b"<?");
                out.extend_from_slice(content.as_bytes());
                out.extend_from_slice(b"?>");
            }
            XmlEvent::DocType { text } => {
                out.extend_from_slice(b"<!DOCTYPE");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b">");
            }
        }
    }

    Ok(out)
}

/// Fails when anything but `w:t` content (and `xml:space`) differs from the
/// state captured at parse time.
pub fn verify_structure_unchanged(part: &XmlPart) -> anyhow::Result<()> {
    let cur = structure_hash(&part.events);
    if cur != part.baseline_hash {
        return Err(anyhow!(
            "non-text structure changed in {} (baseline={} current={})",
            part.name,
            part.baseline_hash,
            cur
        ));
    }
    Ok(())
}

fn structure_hash(events: &[XmlEvent]) -> String {
    let mut hasher = Sha256::new();
    let mut stack: Vec<&str> = Vec::new();

    for ev in events {
        match ev {
            XmlEvent::Start { name, attrs } => {
                stack.push(name.as_str());
                hash_start_like(&mut hasher, name, attrs);
            }
            XmlEvent::Empty { name, attrs } => {
                hash_start_like(&mut hasher, name, attrs);
                hash_end_like(&mut hasher, name);
            }
            XmlEvent::End { name } => {
                hash_end_like(&mut hasher, name);
                let _ = stack.pop();
            }
            XmlEvent::Text { text } => {
                if stack.last().copied() == Some("w:t") {
                    continue;
                }
                hasher.update(b"T:");
                hasher.update(text.as_bytes());
                hasher.update(b"\n");
            }
            XmlEvent::Decl {
                version,
                encoding,
                standalone,
            } => {
                hasher.update(b"D:");
                hasher.update(version.as_bytes());
                hasher.update(b"|");
                if let Some(e) = encoding.as_ref() {
                    hasher.update(e.as_bytes());
                }
                hasher.update(b"|");
                if let Some(s) = standalone.as_ref() {
                    hasher.update(s.as_bytes());
                }
                hasher.update(b"\n");
            }
            XmlEvent::CData { text } => {
                hasher.update(b"C:");
                hasher.update(text.as_bytes());
                hasher.update(b"\n");
            }
            XmlEvent::Comment { text } => {
                hasher.update(b"M:");
                hasher.update(text.as_bytes());
                hasher.update(b"\n");
            }
            XmlEvent::PI { content } => {
                hasher.update(b"P:");
                hasher.update(content.as_bytes());
                hasher.update(b"\n");
            }
            XmlEvent::DocType { text } => {
                hasher.update(b"Y:");
                hasher.update(text.as_bytes());
                hasher.update(b"\n");
            }
        }
    }
    hex::encode(hasher.finalize())
}

fn hash_start_like(hasher: &mut Sha256, name: &str, attrs: &[(String, String)]) {
    hasher.update(b"S:");
    hasher.update(name.as_bytes());
    hasher.update(b"|");

    let mut map: BTreeMap<&str, &str> = BTreeMap::new();
    for (k, v) in attrs {
        if k == "xml:space" {
            continue;
        }
        map.insert(k.as_str(), v.as_str());
    }
    for (k, v) in map {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update(b";");
    }
    hasher.update(b"\n");
}

fn hash_end_like(hasher: &mut Sha256, name: &str) {
    hasher.update(b"E:");
    hasher.update(name.as_bytes());
    hasher.update(b"\n");
}
