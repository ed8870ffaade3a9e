//! Generic XML document tree.
//!
//! Feeds are first read into a plain element tree (name, attributes, child
//! elements, text) and only then interpreted as RSS or Atom. Attributes and
//! child elements are kept in separate collections, so an attribute and a
//! child element may share a name without colliding (`<link href="..">` vs
//! `<link>..</link>`).
//!
//! Lookups by name always yield a sequence of matching children, so a
//! repeated element (RSS `item`, Atom `link`) and a single occurrence are
//! handled by the same code path.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Maximum element nesting accepted before the document is rejected.
const MAX_DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("XML error at byte {position}: {message}")]
    Xml { position: u64, message: String },
    #[error("Element nesting exceeds {0} levels")]
    TooDeep(usize),
    #[error("Unclosed element <{0}> at end of document")]
    Unclosed(String),
    #[error("Unexpected closing tag </{0}>")]
    UnexpectedEnd(String),
    #[error("Document has more than one root element")]
    MultipleRoots,
}

/// Text content of an element, by shape.
///
/// `Plain` is a bare text element (`<title>Hi</title>`). `WithText` is an
/// element that also carries attributes or child elements
/// (`<title type="html">Hi</title>`, `<guid isPermaLink="false">x</guid>`).
/// Extraction treats both the same through [`TextOrNode::text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOrNode<'a> {
    Plain(&'a str),
    WithText(&'a str),
}

impl<'a> TextOrNode<'a> {
    pub fn text(self) -> &'a str {
        match self {
            TextOrNode::Plain(s) | TextOrNode::WithText(s) => s,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Qualified name as written, including any namespace prefix (`media:content`).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First child element called `name`.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All child elements called `name`, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// The element's text, classified by shape. `None` if it has no text at all.
    pub fn text_or_node(&self) -> Option<TextOrNode<'_>> {
        if self.text.is_empty() {
            return None;
        }
        if self.attributes.is_empty() && self.children.is_empty() {
            Some(TextOrNode::Plain(&self.text))
        } else {
            Some(TextOrNode::WithText(&self.text))
        }
    }

    fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Trim the accumulated text once the element is closed, so whitespace
    /// between mixed-content segments survives.
    fn trim_text(&mut self) {
        let trimmed = self.text.trim();
        if trimmed.len() != self.text.len() {
            self.text = trimmed.to_string();
        }
    }
}

/// Parse `raw` into its root element.
///
/// Returns `Ok(None)` for a document without any element (empty input, bare
/// text, or just a prolog).
pub fn parse_document(raw: &str) -> Result<Option<Element>, TreeError> {
    // SEC-002: quick-xml (0.37) never expands <!ENTITY> declarations; only the
    // five predefined entities and character references are resolved.
    let mut reader = Reader::from_str(raw);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(TreeError::TooDeep(MAX_DEPTH));
                }
                stack.push(start_element(&e, &reader));
            }
            Ok(Event::Empty(e)) => {
                let element = start_element(&e, &reader);
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(e)) => {
                let mut element = stack.pop().ok_or_else(|| {
                    TreeError::UnexpectedEnd(String::from_utf8_lossy(e.name().as_ref()).into_owned())
                })?;
                element.trim_text();
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    match t.unescape() {
                        Ok(text) => top.push_text(&text),
                        Err(err) => {
                            // Unknown entities (&nbsp; and friends) are common in
                            // the wild; keep the raw text rather than failing.
                            tracing::debug!(error = %err, "Keeping unescapable text as-is");
                            top.push_text(&String::from_utf8_lossy(&t));
                        }
                    }
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(top) = stack.last_mut() {
                    top.push_text(&String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(TreeError::Xml {
                    position: reader.error_position(),
                    message: e.to_string(),
                })
            }
            _ => {}
        }
    }

    if let Some(open) = stack.pop() {
        return Err(TreeError::Unclosed(open.name));
    }

    Ok(root)
}

fn start_element(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Element {
    let mut element = Element::new(String::from_utf8_lossy(e.name().as_ref()));

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(err) => {
                tracing::warn!(element = %element.name, error = %err, "Skipping malformed attribute");
                continue;
            }
        };
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        match attr.decode_and_unescape_value(reader.decoder()) {
            Ok(value) => element.attributes.push((key, value.into_owned())),
            Err(err) => {
                tracing::warn!(element = %element.name, attribute = %key, error = %err, "Skipping undecodable attribute");
            }
        }
    }

    element
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), TreeError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(TreeError::MultipleRoots),
    }
    Ok(())
}
