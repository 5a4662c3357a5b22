//! Owned XML element tree for XUnit documents.
//!
//! Parsing and serialization go through `quick-xml`. The tree keeps
//! element order, attribute order, text, CDATA and comments so that suite
//! subtrees survive a merge untouched.

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::borrow::Cow;
use thiserror::Error;

/// Errors raised while turning text into a [`Document`].
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Low-level XML syntax error (bad tag, mismatched end tag, bad escape).
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error("content is not valid {0}")]
    Undecodable(&'static str),

    #[error("unsupported encoding `{0}`")]
    UnknownEncoding(String),

    #[error("document has no root element")]
    Empty,

    #[error("element <{0}> is never closed")]
    Unclosed(String),

    #[error("closing tag </{0}> has no matching opening tag")]
    UnexpectedEnd(String),

    #[error("document has more than one root element")]
    MultipleRoots,

    #[error("text content outside of the root element")]
    StrayText,
}

/// A child of an [`Element`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
}

/// An XML element with ordered attributes and children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    /// Creates an element with no attributes or children.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Returns the value of an attribute, if present.
    #[cfg(test)]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sets an attribute, replacing any existing value for the same key.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn clear_attributes(&mut self) {
        self.attributes.clear();
    }

    /// Iterates over direct element children.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
    }

    /// Iterates over direct element children with the given tag name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.child_elements().filter(move |el| el.name == name)
    }

    /// Whether any direct child element has the given tag name.
    pub fn has_child(&self, name: &str) -> bool {
        self.children_named(name).next().is_some()
    }

    /// Consumes the element, returning its element children and dropping
    /// text and comments between them.
    pub fn into_child_elements(self) -> Vec<Element> {
        self.children
            .into_iter()
            .filter_map(|node| match node {
                Node::Element(el) => Some(el),
                _ => None,
            })
            .collect()
    }

    /// Removes every descendant element whose tag is in `names`.
    ///
    /// Returns the number of elements removed.
    pub fn remove_descendants(&mut self, names: &[&str]) -> usize {
        let before = self.children.len();
        self.children.retain(|node| match node {
            Node::Element(el) => !names.contains(&el.name.as_str()),
            _ => true,
        });
        let mut removed = before - self.children.len();

        for node in &mut self.children {
            if let Node::Element(el) = node {
                removed += el.remove_descendants(names);
            }
        }

        removed
    }
}

/// A parsed XML document: a single root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub root: Element,
}

impl Document {
    pub fn new(root: Element) -> Self {
        Self { root }
    }

    /// Parses raw file content, decoding it first with [`decode`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocumentError> {
        Self::parse(&decode(bytes)?)
    }

    /// Parses a document from a string.
    ///
    /// The XML declaration, doctype and processing instructions are dropped,
    /// as are comments outside the root element.
    pub fn parse(content: &str) -> Result<Self, DocumentError> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let mut reader = Reader::from_str(content);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    if stack.is_empty() && root.is_some() {
                        return Err(DocumentError::MultipleRoots);
                    }
                    stack.push(element_from_start(&start)?);
                }
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(end) => {
                    let element = stack.pop().ok_or_else(|| {
                        DocumentError::UnexpectedEnd(
                            String::from_utf8_lossy(end.name().as_ref()).into_owned(),
                        )
                    })?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let text = text.unescape()?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(Node::Text(text.into_owned())),
                        None if text.trim().is_empty() => {}
                        None => return Err(DocumentError::StrayText),
                    }
                }
                Event::CData(data) => {
                    let data = String::from_utf8_lossy(&data).into_owned();
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(Node::CData(data)),
                        None => return Err(DocumentError::StrayText),
                    }
                }
                Event::Comment(comment) => {
                    if let Some(parent) = stack.last_mut() {
                        parent
                            .children
                            .push(Node::Comment(String::from_utf8_lossy(&comment).into_owned()));
                    }
                }
                Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
        }

        if let Some(open) = stack.last() {
            return Err(DocumentError::Unclosed(open.name.clone()));
        }

        root.map(Self::new).ok_or(DocumentError::Empty)
    }

    /// Serializes the document as UTF-8 with a leading XML declaration.
    pub fn to_xml_bytes(&self) -> Result<Vec<u8>, quick_xml::Error> {
        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::Text(BytesText::from_escaped("\n")))?;
        write_element(&mut writer, &self.root)?;
        writer.write_event(Event::Text(BytesText::from_escaped("\n")))?;
        Ok(writer.into_inner())
    }

    /// Serializes the document to a `String`.
    #[cfg(test)]
    pub fn to_xml_string(&self) -> Result<String, quick_xml::Error> {
        let bytes = self.to_xml_bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Decodes raw XML bytes to text.
///
/// The encoding comes from the byte-order mark, then from UTF-16 sniffing of
/// the leading `<?`, then from the `encoding` pseudo-attribute of the XML
/// declaration, and defaults to UTF-8. Bytes that are invalid in the chosen
/// encoding are rejected rather than replaced.
pub fn decode(bytes: &[u8]) -> Result<String, DocumentError> {
    let (encoding, bom_len) = match Encoding::for_bom(bytes) {
        Some(found) => found,
        None => (sniff_encoding(bytes)?, 0),
    };

    encoding
        .decode_without_bom_handling_and_without_replacement(&bytes[bom_len..])
        .map(Cow::into_owned)
        .ok_or(DocumentError::Undecodable(encoding.name()))
}

fn sniff_encoding(bytes: &[u8]) -> Result<&'static Encoding, DocumentError> {
    if bytes.starts_with(&[b'<', 0, b'?', 0]) {
        return Ok(UTF_16LE);
    }
    if bytes.starts_with(&[0, b'<', 0, b'?']) {
        return Ok(UTF_16BE);
    }

    let Some(label) = declared_encoding(bytes) else {
        return Ok(UTF_8);
    };
    match Encoding::for_label(label) {
        // an ASCII-compatible declaration cannot describe UTF-16 content
        Some(found) if found == UTF_16LE || found == UTF_16BE => Ok(UTF_8),
        Some(found) => Ok(found),
        None => Err(DocumentError::UnknownEncoding(
            String::from_utf8_lossy(label).into_owned(),
        )),
    }
}

/// The `encoding="..."` value of a leading ASCII XML declaration.
fn declared_encoding(bytes: &[u8]) -> Option<&[u8]> {
    let decl = bytes.strip_prefix(&b"<?xml"[..])?;
    let end = decl.windows(2).position(|w| w == b"?>")?;
    let decl = &decl[..end];

    let at = decl.windows(8).position(|w| w == b"encoding")?;
    let rest = trim_ascii_start(&decl[at + 8..]);
    let rest = trim_ascii_start(rest.strip_prefix(&b"="[..])?);
    let (&quote, rest) = rest.split_first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let len = rest.iter().position(|&b| b == quote)?;
    Some(&rest[..len])
}

fn trim_ascii_start(bytes: &[u8]) -> &[u8] {
    let skip = bytes.iter().take_while(|b| b.is_ascii_whitespace()).count();
    &bytes[skip..]
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element, DocumentError> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()));

    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        element.attributes.push((key, value));
    }

    Ok(element)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), DocumentError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(element));
        return Ok(());
    }

    if root.is_some() {
        return Err(DocumentError::MultipleRoots);
    }
    *root = Some(element);
    Ok(())
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<(), quick_xml::Error> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    for child in &element.children {
        match child {
            Node::Element(el) => write_element(writer, el)?,
            Node::Text(text) => writer.write_event(Event::Text(BytesText::new(text)))?,
            Node::CData(data) => writer.write_event(Event::CData(BytesCData::new(data.as_str())))?,
            Node::Comment(comment) => {
                writer.write_event(Event::Comment(BytesText::from_escaped(comment.as_str())))?
            }
        }
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_elements() {
        let doc = Document::parse(
            r#"<?xml version="1.0"?>
<testsuite name="s" tests="2">
  <testcase name="a"/>
  <testcase name="b"><failure message="boom">trace</failure></testcase>
</testsuite>"#,
        )
        .unwrap();

        assert_eq!(doc.root.name, "testsuite");
        assert_eq!(doc.root.attribute("tests"), Some("2"));

        let cases: Vec<_> = doc.root.children_named("testcase").collect();
        assert_eq!(cases.len(), 2);
        assert!(!cases[0].has_child("failure"));
        assert!(cases[1].has_child("failure"));
    }

    #[test]
    fn test_parse_unescapes_attributes_and_text() {
        let doc =
            Document::parse(r#"<testcase name="a &amp; b">x &lt; y</testcase>"#).unwrap();
        assert_eq!(doc.root.attribute("name"), Some("a & b"));
        assert_eq!(doc.root.children, vec![Node::Text("x < y".to_string())]);
    }

    #[test]
    fn test_parse_rejects_mismatched_tags() {
        let result = Document::parse("<testsuite><testcase></testsuite>");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_rejects_unclosed_root() {
        let result = Document::parse("<testsuites><testsuite/>");
        assert!(matches!(result, Err(DocumentError::Unclosed(name)) if name == "testsuites"));
    }

    #[test]
    fn test_parse_rejects_empty_and_stray_content() {
        assert!(matches!(Document::parse("   "), Err(DocumentError::Empty)));
        assert!(matches!(
            Document::parse("not xml at all"),
            Err(DocumentError::StrayText)
        ));
        assert!(matches!(
            Document::parse("<a/><b/>"),
            Err(DocumentError::MultipleRoots)
        ));
    }

    #[test]
    fn test_serialize_writes_declaration_and_escapes() {
        let mut root = Element::new("testsuites");
        root.set_attribute("tests", "1");
        let mut case = Element::new("testcase");
        case.set_attribute("name", "quote\"d");
        case.children.push(Node::Text("a < b".to_string()));
        root.children.push(Node::Element(case));

        let xml = Document::new(root).to_xml_string().unwrap();

        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains(r#"<testsuites tests="1">"#));
        assert!(xml.contains("a &lt; b"));
        assert!(!xml.contains("quote\"d\""));
    }

    #[test]
    fn test_serialized_document_parses_back() {
        let source = r#"<testsuites><testsuite name="s"><testcase name="t"><error/><![CDATA[raw <data>]]></testcase><!-- note --></testsuite></testsuites>"#;
        let doc = Document::parse(source).unwrap();
        let reparsed = Document::parse(&doc.to_xml_string().unwrap()).unwrap();
        assert_eq!(doc, reparsed);
    }

    #[test]
    fn test_remove_descendants() {
        let mut doc = Document::parse(
            "<testsuite><system-out>x</system-out><testcase><system-err>y</system-err></testcase></testsuite>",
        )
        .unwrap();

        let removed = doc.root.remove_descendants(&["system-out", "system-err"]);

        assert_eq!(removed, 2);
        assert!(!doc.root.has_child("system-out"));
        let case = doc.root.children_named("testcase").next().unwrap();
        assert!(case.children.is_empty());
    }

    #[test]
    fn test_decode_declared_latin1() {
        let mut bytes = br#"<?xml version="1.0" encoding="ISO-8859-1"?><testsuite name="caf"#.to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(br#""/>"#);

        let doc = Document::from_bytes(&bytes).unwrap();

        assert_eq!(doc.root.attribute("name"), Some("caf\u{e9}"));
    }

    #[test]
    fn test_decode_utf16_with_and_without_bom() {
        let text = r#"<?xml version="1.0" encoding="UTF-16"?><testsuite name="s"/>"#;
        let le: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
        let be: Vec<u8> = text.encode_utf16().flat_map(u16::to_be_bytes).collect();
        let mut le_bom = vec![0xFF, 0xFE];
        le_bom.extend_from_slice(&le);

        for bytes in [le_bom, le, be] {
            let doc = Document::from_bytes(&bytes).unwrap();
            assert_eq!(doc.root.attribute("name"), Some("s"));
        }
    }

    #[test]
    fn test_decode_rejects_invalid_utf8_and_unknown_labels() {
        assert!(matches!(
            decode(b"<testsuite name=\"\xFF\"/>"),
            Err(DocumentError::Undecodable("UTF-8"))
        ));
        assert!(matches!(
            decode(br#"<?xml version="1.0" encoding="klingon"?><a/>"#),
            Err(DocumentError::UnknownEncoding(label)) if label == "klingon"
        ));
    }

    #[test]
    fn test_decode_utf16_label_on_ascii_bytes_is_utf8() {
        let doc = Document::from_bytes(br#"<?xml version='1.0' encoding='utf-16'?><a/>"#).unwrap();
        assert_eq!(doc.root.name, "a");
    }

    #[test]
    fn test_set_attribute_replaces_existing() {
        let mut el = Element::new("testsuites");
        el.set_attribute("tests", "1");
        el.set_attribute("tests", "2");
        assert_eq!(el.attributes, vec![("tests".to_string(), "2".to_string())]);
    }
}
