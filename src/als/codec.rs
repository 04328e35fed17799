//! Gzip + XML codec for `.als` files.
//!
//! Serialization is canonical (tab indentation, `Id` first, whitespace-only
//! text dropped), so loading and re-saving an already-canonical file yields
//! identical XML.

use std::borrow::Cow;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

use super::{DEFAULT_DECLARATION, Document, Element, Node};

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt Live Set: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;

fn corrupt(msg: impl Into<String>) -> CodecError {
    CodecError::Corrupt(msg.into())
}

/// Read and decode a `.als` file.
pub fn load(path: &Path) -> Result<Document> {
    let bytes = fs::read(path)?;
    let doc = decode(&bytes).map_err(|e| match e {
        CodecError::Corrupt(msg) => corrupt(format!("{}: {msg}", path.display())),
        other => other,
    })?;
    log::debug!("Loaded {} ({} bytes compressed)", path.display(), bytes.len());
    Ok(doc)
}

/// Encode and write a document, replacing `path` atomically.
///
/// No validation happens here; see [`crate::validator::validate`].
pub fn save(doc: &Document, path: &Path) -> Result<()> {
    let bytes = encode(doc)?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CodecError::Io(e.error))?;
    log::debug!("Saved {} ({} bytes compressed)", path.display(), bytes.len());
    Ok(())
}

/// Gunzip, UTF-8 decode and parse.
pub fn decode(bytes: &[u8]) -> Result<Document> {
    let mut xml = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut xml)
        .map_err(|e| corrupt(format!("gzip: {e}")))?;
    let text = String::from_utf8(xml).map_err(|e| corrupt(format!("utf-8: {e}")))?;
    parse_xml(&text)
}

pub fn encode(doc: &Document) -> Result<Vec<u8>> {
    let xml = serialize(doc);
    let mut encoder = GzEncoder::new(Vec::with_capacity(xml.len() / 8), Compression::default());
    encoder.write_all(xml.as_bytes())?;
    Ok(encoder.finish()?)
}

/// Parse uncompressed Live Set XML.
pub fn parse_xml(text: &str) -> Result<Document> {
    let text = text.trim_start_matches('\u{feff}');
    let declaration = leading_declaration(text);
    let mut reader = Reader::from_str(text);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(element_from(&start)?),
            Ok(Event::Empty(start)) => {
                let element = element_from(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| corrupt("closing tag without matching opening tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| corrupt(format!("bad text content: {e}")))?;
                push_text(&mut stack, &text)?;
            }
            Ok(Event::CData(c)) => {
                let text = String::from_utf8_lossy(&c).into_owned();
                push_text(&mut stack, &text)?;
            }
            Ok(Event::Eof) => break,
            // Declaration is captured up front; comments and PIs are not part of the format.
            Ok(_) => {}
            Err(e) => {
                return Err(corrupt(format!(
                    "XML error at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(corrupt(format!("unclosed element <{}>", open.tag)));
    }
    let root = root.ok_or_else(|| corrupt("no root element"))?;

    Ok(Document::with_declaration(
        root,
        declaration.unwrap_or(DEFAULT_DECLARATION),
    ))
}

/// Body of a leading `<?xml ...?>`, kept literally for re-serialization.
fn leading_declaration(text: &str) -> Option<&str> {
    let rest = text.trim_start();
    let body = rest.strip_prefix("<?xml")?;
    let end = body.find("?>")?;
    Some(&rest[2..5 + end])
}

fn element_from(start: &BytesStart<'_>) -> Result<Element> {
    let tag = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| corrupt(format!("tag name: {e}")))?
        .to_string();
    let mut element = Element::new(tag);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| corrupt(format!("attribute in <{}>: {e}", element.tag)))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| corrupt(format!("attribute name: {e}")))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| corrupt(format!("attribute {key} in <{}>: {e}", element.tag)))?;
        element.set_attr(&key, value.into_owned());
    }
    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.push(element);
    } else if root.is_some() {
        return Err(corrupt("multiple root elements"));
    } else {
        *root = Some(element);
    }
    Ok(())
}

fn push_text(stack: &mut [Element], text: &str) -> Result<()> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(());
    }
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Text(trimmed.to_string()));
            Ok(())
        }
        None => Err(corrupt("text outside the root element")),
    }
}

/// Canonical XML text of a document.
pub fn serialize(doc: &Document) -> String {
    let mut out = String::with_capacity(64 * 1024);
    out.push_str("<?");
    out.push_str(doc.declaration());
    out.push_str("?>\n");
    write_element(&mut out, &doc.root, 0);
    out
}

/// XML text of a single subtree, without declaration.
pub fn element_to_xml(element: &Element) -> String {
    let mut out = String::new();
    write_element(&mut out, element, 0);
    out
}

/// Parse a single subtree written by [`element_to_xml`].
pub fn element_from_xml(text: &str) -> Result<Element> {
    parse_xml(text).map(|doc| doc.root)
}

fn write_element(out: &mut String, element: &Element, depth: usize) {
    indent(out, depth);
    out.push('<');
    out.push_str(&element.tag);
    if let Some(id) = element.id() {
        write_attr(out, "Id", &id.to_string());
    }
    for (name, value) in element.attributes() {
        write_attr(out, name, value);
    }

    if element.children.is_empty() {
        out.push_str(" />\n");
        return;
    }

    if let [Node::Text(text)] = element.children.as_slice() {
        out.push('>');
        out.push_str(&escape(text.as_str()));
        close_tag(out, &element.tag);
        return;
    }

    out.push_str(">\n");
    for child in &element.children {
        match child {
            Node::Element(e) => write_element(out, e, depth + 1),
            Node::Text(text) => {
                indent(out, depth + 1);
                out.push_str(&escape(text.as_str()));
                out.push('\n');
            }
        }
    }
    indent(out, depth);
    close_tag(out, &element.tag);
}

fn write_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    out.push_str(&escape_attr(value));
    out.push('"');
}

/// Markup escaping plus character references for tab, CR and LF, which a
/// conforming reader would otherwise normalize to spaces inside a quoted
/// attribute value.
fn escape_attr(value: &str) -> Cow<'_, str> {
    let escaped = escape(value);
    if !escaped.contains(['\t', '\n', '\r']) {
        return escaped;
    }
    let mut out = String::with_capacity(escaped.len() + 8);
    for c in escaped.chars() {
        match c {
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn close_tag(out: &mut String, tag: &str) {
    out.push_str("</");
    out.push_str(tag);
    out.push_str(">\n");
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push('\t');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::als::ElementId;
    use crate::als::fixtures::BASE_XML;

    #[test]
    fn attribute_whitespace_survives_a_round_trip() {
        let doc = parse_xml(
            "<Ableton><Annotation Value=\"line1&#10;line2&#13;&#9;x &amp; y\" /></Ableton>",
        )
        .unwrap();
        let value = doc.root.child("Annotation").unwrap().attr("Value").unwrap();
        assert_eq!(value, "line1\nline2\r\tx & y");

        let xml = serialize(&doc);
        assert!(xml.contains(r#"Value="line1&#10;line2&#13;&#9;x &amp; y""#), "{xml}");
        let reparsed = parse_xml(&xml).unwrap();
        assert_eq!(
            reparsed.root.child("Annotation").unwrap().attr("Value"),
            Some("line1\nline2\r\tx & y")
        );
        assert!(matches!(escape_attr("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn canonical_fixture_serializes_verbatim() {
        let doc = parse_xml(BASE_XML).unwrap();
        assert_eq!(serialize(&doc), BASE_XML);
    }

    #[test]
    fn save_then_load_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set.als");
        let doc = parse_xml(BASE_XML).unwrap();

        save(&doc, &path).unwrap();
        let first = load(&path).unwrap();
        save(&first, &path).unwrap();
        let second = load(&path).unwrap();

        assert_eq!(first, doc);
        assert_eq!(serialize(&second), serialize(&first));
    }

    #[test]
    fn non_canonical_input_becomes_stable_after_one_pass() {
        let messy = "<?xml version='1.0' encoding='UTF-8'?><Ableton><LiveSet>\n   <Note>  hello &amp; bye </Note><X B=\"1\" Id=\"5\" A=\"x&lt;y\"/></LiveSet></Ableton>";
        let once = serialize(&parse_xml(messy).unwrap());
        let twice = serialize(&parse_xml(&once).unwrap());
        assert_eq!(once, twice);
        assert!(once.starts_with("<?xml version='1.0' encoding='UTF-8'?>\n"));
        assert!(once.contains("<X Id=\"5\" B=\"1\" A=\"x&lt;y\" />"));
        assert!(once.contains("<Note>hello &amp; bye</Note>"));
    }

    #[test]
    fn missing_declaration_gets_default() {
        let doc = parse_xml("<Ableton />").unwrap();
        assert_eq!(doc.declaration(), DEFAULT_DECLARATION);
    }

    #[test]
    fn opaque_ids_round_trip_verbatim() {
        let doc = parse_xml(r#"<Ableton><X Id="007" /></Ableton>"#).unwrap();
        let x = doc.root.child("X").unwrap();
        assert_eq!(x.id(), Some(&ElementId::Opaque("007".into())));
        assert!(serialize(&doc).contains(r#"<X Id="007" />"#));
    }

    #[test]
    fn ungzipped_bytes_are_corrupt() {
        let err = decode(BASE_XML.as_bytes()).unwrap_err();
        assert!(matches!(err, CodecError::Corrupt(_)), "{err}");
    }

    #[test]
    fn truncated_gzip_is_corrupt() {
        let doc = parse_xml(BASE_XML).unwrap();
        let bytes = encode(&doc).unwrap();
        let err = decode(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, CodecError::Corrupt(_)));
    }

    #[test]
    fn invalid_utf8_is_corrupt() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&[0x3c, 0xff, 0xfe, 0x3e]).unwrap();
        let bytes = encoder.finish().unwrap();
        assert!(matches!(decode(&bytes), Err(CodecError::Corrupt(_))));
    }

    #[test]
    fn malformed_xml_is_corrupt() {
        for bad in [
            "<Ableton><LiveSet></Ableton>",
            "<Ableton><LiveSet>",
            "<Ableton /><Ableton />",
            "",
        ] {
            assert!(
                matches!(parse_xml(bad), Err(CodecError::Corrupt(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("nope.als")).unwrap_err();
        assert!(matches!(err, CodecError::Io(_)));
    }

    #[test]
    fn corrupt_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.als");
        fs::write(&path, b"not gzip").unwrap();
        let msg = load(&path).unwrap_err().to_string();
        assert!(msg.contains("bad.als"), "{msg}");
    }
}
