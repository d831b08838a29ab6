use std::ops::Range;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{PrefixDeclaration, ResolveResult};
use quick_xml::NsReader;

use crate::ns::{FieldPath, Namespaces, QualifiedName};
use crate::FeedError;

/// Namespace declaration as written on an element: `None` is the default namespace.
pub type NamespaceDecl = (Option<String>, String);

/// Parsed element with its resolved namespace and source byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub namespace: Option<String>,
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub namespace_decls: Vec<NamespaceDecl>,
    pub text: String,
    pub children: Vec<Element>,
    pub span: Range<usize>,
}

impl Element {
    pub fn is(&self, namespace: Option<&str>, local: &str) -> bool {
        self.name == local && self.namespace.as_deref() == namespace
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// All elements below this one in document order, excluding itself.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }

    /// First element matching `path` in document order.
    pub fn find(&self, path: &FieldPath, ns: &Namespaces) -> Option<&Element> {
        let steps = resolve_steps(&path.steps, ns)?;
        let (first, rest) = steps.split_first()?;
        if path.descendant {
            self.descendants()
                .filter(|el| el.is(first.0, first.1))
                .find_map(|el| el.follow(rest))
        } else {
            self.children
                .iter()
                .filter(|el| el.is(first.0, first.1))
                .find_map(|el| el.follow(rest))
        }
    }

    /// Trimmed text of the first match; `None` when nothing matches.
    pub fn find_text(&self, path: &FieldPath, ns: &Namespaces) -> Option<&str> {
        self.find(path, ns).map(|el| el.text.trim())
    }

    fn follow(&self, steps: &[(Option<&str>, &str)]) -> Option<&Element> {
        match steps.split_first() {
            None => Some(self),
            Some((step, rest)) => self
                .children
                .iter()
                .filter(|el| el.is(step.0, step.1))
                .find_map(|el| el.follow(rest)),
        }
    }
}

fn resolve_steps<'a>(
    steps: &'a [QualifiedName],
    ns: &'a Namespaces,
) -> Option<Vec<(Option<&'a str>, &'a str)>> {
    steps
        .iter()
        .map(|step| match step.prefix.as_deref() {
            Some(prefix) => match ns.resolve(Some(prefix)) {
                Some(uri) => Some((Some(uri), step.local.as_str())),
                None => {
                    tracing::warn!(prefix, "unbound namespace prefix in field path");
                    None
                }
            },
            None => Some((ns.resolve(None), step.local.as_str())),
        })
        .collect()
}

pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.children.iter().rev());
        Some(next)
    }
}

/// One `entry` element plus its self-contained serialized XML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub element: Element,
    pub raw_xml: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPage {
    pub entries: Vec<FeedEntry>,
    pub next_url: Option<String>,
    pub namespaces: Namespaces,
}

/// Parse one fetched feed document.
///
/// Entries and the `rel="next"` link are the root's direct children in the
/// document's default namespace. Prefixes declared on the root are layered
/// over `base` for later field lookups.
///
/// The document must be UTF-8 (a leading byte-order mark is allowed); any
/// other encoding is rejected with [`FeedError::Encoding`].
pub fn parse_page(bytes: &[u8], base: &Namespaces) -> Result<FeedPage, FeedError> {
    let text = std::str::from_utf8(bytes)?;
    let root = parse_document(text)?;
    let namespaces = base.overlay(&root.namespace_decls);
    let feed_ns = namespaces.resolve(None);

    let next_url = root
        .children
        .iter()
        .filter(|el| el.is(feed_ns, "link") && el.attr("rel") == Some("next"))
        .find_map(|el| el.attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty());

    let entries = root
        .children
        .iter()
        .filter(|el| el.is(feed_ns, "entry"))
        .map(|el| FeedEntry {
            raw_xml: with_inherited_namespaces(
                &text[el.span.clone()],
                &root.namespace_decls,
                &el.namespace_decls,
            ),
            element: el.clone(),
        })
        .collect();

    Ok(FeedPage {
        entries,
        next_url,
        namespaces,
    })
}

/// Parse a whole document into its root element.
///
/// Element spans index into `text`, including any leading byte-order mark.
pub fn parse_document(text: &str) -> Result<Element, FeedError> {
    let body = text.strip_prefix('\u{feff}').unwrap_or(text);
    let bom_len = text.len() - body.len();
    let mut reader = NsReader::from_str(body);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let (resolved, event) = reader.read_resolved_event()?;
        let namespace = match resolved {
            ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
            ResolveResult::Unbound => None,
            ResolveResult::Unknown(prefix) => {
                return Err(FeedError::Malformed(format!(
                    "undeclared namespace prefix {:?}",
                    String::from_utf8_lossy(&prefix)
                )))
            }
        };
        let position = bom_len + reader.buffer_position() as usize;

        match event {
            Event::Start(start) => {
                let element = open_element(&start, namespace, text, position)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = open_element(&start, namespace, text, position)?;
                attach(element, &mut stack, &mut root)?;
            }
            Event::End(_) => {
                let mut element = stack.pop().ok_or_else(|| {
                    FeedError::Malformed("closing tag without an open element".into())
                })?;
                element.span.end = position;
                attach(element, &mut stack, &mut root)?;
            }
            // Only text ahead of the first child counts as the element's text.
            Event::Text(t) => {
                if let Some(current) = stack.last_mut().filter(|el| el.children.is_empty()) {
                    current.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(current) = stack.last_mut().filter(|el| el.children.is_empty()) {
                    current.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(FeedError::Malformed(format!(
            "document ended inside <{}>",
            open.name
        )));
    }
    root.ok_or_else(|| FeedError::Malformed("document has no root element".into()))
}

fn open_element(
    start: &BytesStart<'_>,
    namespace: Option<String>,
    text: &str,
    tag_end: usize,
) -> Result<Element, FeedError> {
    let mut attributes = Vec::new();
    let mut namespace_decls = Vec::new();
    for attr in start.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?.into_owned();
        match attr.key.as_namespace_binding() {
            Some(PrefixDeclaration::Default) => namespace_decls.push((None, value)),
            Some(PrefixDeclaration::Named(prefix)) => {
                namespace_decls.push((Some(String::from_utf8_lossy(prefix).into_owned()), value))
            }
            None => attributes.push((
                String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned(),
                value,
            )),
        }
    }

    // Attribute values cannot hold a raw '<', so the last one before the
    // tag's end is where the tag begins.
    let tag_start = text[..tag_end].rfind('<').unwrap_or(0);
    Ok(Element {
        namespace,
        name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        attributes,
        namespace_decls,
        text: String::new(),
        children: Vec::new(),
        span: tag_start..tag_end,
    })
}

fn attach(
    element: Element,
    stack: &mut [Element],
    root: &mut Option<Element>,
) -> Result<(), FeedError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(FeedError::Malformed(
                "document has more than one root element".into(),
            ))
        }
    }
    Ok(())
}

/// Copy the declarations an element inherits into its own start tag so the
/// fragment parses on its own.
fn with_inherited_namespaces(
    fragment: &str,
    inherited: &[NamespaceDecl],
    own: &[NamespaceDecl],
) -> String {
    let missing: Vec<&NamespaceDecl> = inherited
        .iter()
        .filter(|(prefix, _)| !own.iter().any(|(declared, _)| declared == prefix))
        .collect();
    if missing.is_empty() {
        return fragment.to_string();
    }

    let name_end = fragment
        .char_indices()
        .skip(1)
        .find(|(_, c)| c.is_whitespace() || *c == '>' || *c == '/')
        .map(|(i, _)| i)
        .unwrap_or(fragment.len());

    let mut out = String::with_capacity(fragment.len() + missing.len() * 64);
    out.push_str(&fragment[..name_end]);
    for (prefix, uri) in missing {
        let uri = quick_xml::escape::escape(uri.as_str());
        match prefix {
            Some(prefix) => out.push_str(&format!(" xmlns:{prefix}=\"{uri}\"")),
            None => out.push_str(&format!(" xmlns=\"{uri}\"")),
        }
    }
    out.push_str(&fragment[name_end..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:cbc="urn:dgpe:names:draft:codice:schema:xsd:CommonBasicComponents-2">
  <title>Licitaciones</title>
  <link rel="self" href="https://example.org/feed.atom"/>
  <link rel="next" href="https://example.org/feed_2.atom"/>
  <entry>
    <id>urn:1</id>
    <updated>2024-05-10T12:00:00+02:00</updated>
    <summary><![CDATA[Obras & servicios]]></summary>
    <cbc:ContractFolderID>EXP-1 &amp; 2</cbc:ContractFolderID>
  </entry>
  <entry xmlns:cbc="urn:other"><id>urn:2</id><updated>2024-05-09T12:00:00+02:00</updated></entry>
</feed>"#;

    #[test]
    fn parses_entries_and_next_link() {
        let page = parse_page(PAGE.as_bytes(), &Namespaces::well_known()).expect("page");
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.next_url.as_deref(), Some("https://example.org/feed_2.atom"));

        let first = &page.entries[0].element;
        let folder = FieldPath::parse(".//cbc:ContractFolderID").expect("path");
        assert_eq!(first.find_text(&folder, &page.namespaces), Some("EXP-1 & 2"));
        let summary = FieldPath::parse("summary").expect("path");
        assert_eq!(first.find_text(&summary, &page.namespaces), Some("Obras & servicios"));
    }

    #[test]
    fn raw_xml_is_the_entry_bytes_with_inherited_namespaces() {
        let page = parse_page(PAGE.as_bytes(), &Namespaces::well_known()).expect("page");
        let raw = &page.entries[0].raw_xml;
        assert!(raw.starts_with(
            "<entry xmlns=\"http://www.w3.org/2005/Atom\" xmlns:cbc=\"urn:dgpe:names:draft:codice:schema:xsd:CommonBasicComponents-2\">"
        ));
        assert!(raw.ends_with("</entry>"));
        assert!(raw.contains("<cbc:ContractFolderID>EXP-1 &amp; 2</cbc:ContractFolderID>"));

        // Own declaration of cbc is kept, only the default namespace is added.
        let second = &page.entries[1].raw_xml;
        assert!(second.starts_with("<entry xmlns=\"http://www.w3.org/2005/Atom\" xmlns:cbc=\"urn:other\">"));
        assert!(parse_document(second).is_ok());
    }

    #[test]
    fn page_without_entries_or_next_link() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>empty</title></feed>"#;
        let page = parse_page(xml.as_bytes(), &Namespaces::well_known()).expect("page");
        assert!(page.entries.is_empty());
        assert!(page.next_url.is_none());
    }

    #[test]
    fn malformed_documents_are_errors() {
        let ns = Namespaces::well_known();
        assert!(parse_page(b"<feed><entry></feed>", &ns).is_err());
        assert!(parse_page(b"<feed>", &ns).is_err());
        assert!(parse_page(b"", &ns).is_err());
        assert!(parse_page(&[0xff, 0xfe, 0x00], &ns).is_err());
    }

    #[test]
    fn leading_byte_order_mark_keeps_entry_spans_intact() {
        let xml = "\u{feff}<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
            <feed xmlns=\"http://www.w3.org/2005/Atom\">\
            <entry><id>urn:bom</id><updated>2024-05-01T00:00:00Z</updated></entry></feed>";
        let page = parse_page(xml.as_bytes(), &Namespaces::well_known()).expect("page");
        let raw = &page.entries[0].raw_xml;
        assert_eq!(
            raw,
            "<entry xmlns=\"http://www.w3.org/2005/Atom\"><id>urn:bom</id><updated>2024-05-01T00:00:00Z</updated></entry>"
        );
        let reparsed = parse_document(raw).expect("standalone entry");
        assert_eq!(reparsed.name, "entry");
        assert_eq!(reparsed.children.len(), 2);
    }

    #[test]
    fn element_text_stops_at_the_first_child() {
        let xml = r#"<r xmlns:c="urn:c"><c:A>100<c:B/>.5</c:A><c:C><![CDATA[x]]><c:D/>y</c:C></r>"#;
        let root = parse_document(xml).expect("doc");
        let ns = Namespaces::empty().with_prefix("c", "urn:c");
        let amount = FieldPath::parse("c:A").expect("path");
        assert_eq!(root.find_text(&amount, &ns), Some("100"));
        let cdata = FieldPath::parse("c:C").expect("path");
        assert_eq!(root.find_text(&cdata, &ns), Some("x"));
    }

    #[test]
    fn non_utf8_documents_are_encoding_errors() {
        let mut latin1 = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><feed xmlns=\"http://www.w3.org/2005/Atom\"><title>Contrataci".to_vec();
        latin1.push(0xf3);
        latin1.extend_from_slice(b"n</title></feed>");
        let err = parse_page(&latin1, &Namespaces::well_known()).expect_err("latin-1");
        assert!(matches!(err, FeedError::Encoding(_)));
    }

    #[test]
    fn descendant_search_is_document_ordered() {
        let xml = r#"<r xmlns:c="urn:c"><a><c:X>first</c:X></a><c:X>second</c:X></r>"#;
        let root = parse_document(xml).expect("doc");
        let ns = Namespaces::empty().with_prefix("c", "urn:c");
        let path = FieldPath::parse(".//c:X").expect("path");
        assert_eq!(root.find_text(&path, &ns), Some("first"));
        let direct = FieldPath::parse("c:X").expect("path");
        assert_eq!(root.find_text(&direct, &ns), Some("second"));
    }
}
