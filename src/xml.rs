//! XML element model
//!
//! Minimal namespace-aware element tree used for wire envelopes and opaque
//! payloads. Parsing is built on `quick_xml::Reader`; prefixes are resolved
//! while reading so every element and attribute carries its namespace URI.
//! Serialization re-declares namespaces as needed.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};

/// Namespace bound to the reserved `xml` prefix
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
const NETCONF_BASE_NAMESPACE: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct XmlAttribute {
    pub namespace: Option<String>,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// Namespace-resolved XML element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    namespace: Option<String>,
    name: String,
    attributes: Vec<XmlAttribute>,
    /// Prefix declarations carried over from parsed input (prefix, uri)
    prefixes: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

impl XmlElement {
    /// Element in the given namespace
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: if namespace.is_empty() { None } else { Some(namespace) },
            name: name.into(),
            attributes: Vec::new(),
            prefixes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Element without namespace
    pub fn unqualified(name: impl Into<String>) -> Self {
        Self::new(String::new(), name)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace and local name match
    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.name == name && self.namespace.as_deref().unwrap_or("") == namespace
    }

    pub fn attributes(&self) -> &[XmlAttribute] {
        &self.attributes
    }

    pub fn attribute(&self, namespace: Option<&str>, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name && a.namespace.as_deref() == namespace)
            .map(|a| a.value.as_str())
    }

    /// Set an attribute, replacing an existing one with the same name
    pub fn set_attribute(&mut self, namespace: Option<&str>, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attributes
            .iter_mut()
            .find(|a| a.name == name && a.namespace.as_deref() == namespace)
        {
            Some(existing) => existing.value = value,
            None => self.attributes.push(XmlAttribute {
                namespace: namespace.map(String::from),
                name: name.to_string(),
                value,
            }),
        }
    }

    pub fn with_attribute(mut self, namespace: Option<&str>, name: &str, value: impl Into<String>) -> Self {
        self.set_attribute(namespace, name, value);
        self
    }

    /// Copy of this subtree with the given attribute removed everywhere
    pub fn without_attribute(&self, namespace: Option<&str>, name: &str) -> Self {
        let mut copy = self.clone();
        copy.attributes
            .retain(|a| !(a.name == name && a.namespace.as_deref() == namespace));
        copy.children = self
            .children
            .iter()
            .map(|child| match child {
                XmlNode::Element(e) => XmlNode::Element(e.without_attribute(namespace, name)),
                XmlNode::Text(t) => XmlNode::Text(t.clone()),
            })
            .collect();
        copy
    }

    pub fn prefixes(&self) -> &[(String, String)] {
        &self.prefixes
    }

    /// Declare a namespace prefix on this element
    pub fn declare_prefix(&mut self, prefix: impl Into<String>, namespace: impl Into<String>) {
        self.prefixes.push((prefix.into(), namespace.into()));
    }

    pub fn children(&self) -> &[XmlNode] {
        &self.children
    }

    pub fn into_children(self) -> Vec<XmlNode> {
        self.children
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|child| match child {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    pub fn first_child(&self, namespace: &str, name: &str) -> Option<&XmlElement> {
        self.child_elements().find(|e| e.is(namespace, name))
    }

    /// First child with the given local name in any namespace
    pub fn first_child_named(&self, name: &str) -> Option<&XmlElement> {
        self.child_elements().find(|e| e.name == name)
    }

    pub fn has_child_elements(&self) -> bool {
        self.child_elements().next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn push_child(&mut self, child: XmlElement) {
        self.children.push(XmlNode::Element(child));
    }

    /// Insert elements before all existing children, keeping their order
    pub fn prepend_children(&mut self, children: impl IntoIterator<Item = XmlElement>) {
        let front: Vec<XmlNode> = children.into_iter().map(XmlNode::Element).collect();
        self.children.splice(0..0, front);
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.push_child(child);
        self
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if let Some(XmlNode::Text(existing)) = self.children.last_mut() {
            existing.push_str(&text);
        } else {
            self.children.push(XmlNode::Text(text));
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text);
        self
    }

    /// Concatenated text of the direct text children
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|child| match child {
                XmlNode::Text(t) => Some(t.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    // ========================================================================
    // Comparison
    // ========================================================================

    /// Structurally canonical copy: no prefix declarations, no
    /// whitespace-only text, attributes sorted
    pub fn normalized(&self) -> Self {
        let mut attributes = self.attributes.clone();
        attributes.sort();
        let mut normalized = Self {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            attributes,
            prefixes: Vec::new(),
            children: Vec::new(),
        };
        for child in &self.children {
            match child {
                XmlNode::Element(e) => normalized.push_child(e.normalized()),
                XmlNode::Text(t) if t.trim().is_empty() => {}
                XmlNode::Text(t) => normalized.push_text(t.trim()),
            }
        }
        normalized
    }

    /// Equal after normalization
    pub fn is_similar(&self, other: &XmlElement) -> bool {
        self.normalized() == other.normalized()
    }

    // ========================================================================
    // Parsing
    // ========================================================================

    /// Parse a document and return its root element
    pub fn parse(text: &str) -> Result<Self> {
        let mut reader = Reader::from_str(text);
        let mut scopes: Vec<Vec<(String, String)>> = Vec::new();
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event().map_err(xml_error)? {
                Event::Start(start) => {
                    let (element, frame) = open_element(&start, &scopes)?;
                    scopes.push(frame);
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let (element, _) = open_element(&start, &scopes)?;
                    close_element(element, &mut stack, &mut root)?;
                }
                Event::End(_) => {
                    scopes.pop();
                    let element = stack
                        .pop()
                        .ok_or_else(|| Error::MalformedXml("unbalanced end tag".into()))?;
                    close_element(element, &mut stack, &mut root)?;
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(xml_error)?;
                    append_text(&mut stack, &text)?;
                }
                Event::CData(data) => {
                    let text = String::from_utf8(data.into_inner().into_owned()).map_err(xml_error)?;
                    append_text(&mut stack, &text)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(Error::MalformedXml("unexpected end of document".into()));
        }
        root.ok_or_else(|| Error::MalformedXml("document has no root element".into()))
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Compact serialization without XML declaration
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        let mut scope = Vec::new();
        self.write(&mut out, None, &mut scope);
        out
    }

    fn write(&self, out: &mut String, parent_default: Option<&str>, scope: &mut Vec<(String, String)>) {
        let mark = scope.len();
        out.push('<');
        out.push_str(&self.name);

        let namespace = self.namespace.as_deref();
        if namespace != parent_default {
            push_attr(out, "xmlns", namespace.unwrap_or(""));
        }
        for (prefix, uri) in &self.prefixes {
            if lookup_prefix(scope, uri).as_deref() != Some(prefix.as_str()) {
                push_attr(out, &format!("xmlns:{}", prefix), uri);
                scope.push((prefix.clone(), uri.clone()));
            }
        }
        for attr in &self.attributes {
            match &attr.namespace {
                None => push_attr(out, &attr.name, &attr.value),
                Some(uri) => {
                    let prefix = match lookup_prefix(scope, uri) {
                        Some(prefix) => prefix,
                        None => {
                            let prefix = fresh_prefix(scope, uri);
                            push_attr(out, &format!("xmlns:{}", prefix), uri);
                            scope.push((prefix.clone(), uri.clone()));
                            prefix
                        }
                    };
                    push_attr(out, &format!("{}:{}", prefix, attr.name), &attr.value);
                }
            }
        }

        if self.children.is_empty() {
            out.push_str("/>");
        } else {
            out.push('>');
            for child in &self.children {
                match child {
                    XmlNode::Element(e) => e.write(out, namespace, scope),
                    XmlNode::Text(t) => out.push_str(&escape(t.as_str())),
                }
            }
            out.push_str("</");
            out.push_str(&self.name);
            out.push('>');
        }
        scope.truncate(mark);
    }
}

fn xml_error(e: impl std::fmt::Display) -> Error {
    Error::MalformedXml(e.to_string())
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    out.push_str(&escape(value));
    out.push('"');
}

fn lookup_prefix(scope: &[(String, String)], uri: &str) -> Option<String> {
    scope
        .iter()
        .rev()
        .find(|(_, bound)| bound == uri)
        .map(|(prefix, _)| prefix.clone())
}

fn fresh_prefix(scope: &[(String, String)], uri: &str) -> String {
    let used = |candidate: &str| scope.iter().any(|(p, _)| p == candidate);
    if uri == NETCONF_BASE_NAMESPACE && !used("nc") {
        return "nc".to_string();
    }
    (0..)
        .map(|n| format!("ns{}", n))
        .find(|candidate| !used(candidate))
        .unwrap_or_else(|| "ns".to_string())
}

fn split_name(raw: &str) -> (Option<&str>, &str) {
    match raw.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, raw),
    }
}

fn resolve_prefix(
    prefix: &str,
    frame: &[(String, String)],
    scopes: &[Vec<(String, String)>],
) -> Option<String> {
    if prefix == "xml" {
        return Some(XML_NAMESPACE.to_string());
    }
    frame
        .iter()
        .chain(scopes.iter().rev().flatten())
        .find(|(p, _)| p == prefix)
        .map(|(_, uri)| uri.clone())
}

fn open_element(
    start: &BytesStart<'_>,
    scopes: &[Vec<(String, String)>],
) -> Result<(XmlElement, Vec<(String, String)>)> {
    let raw_name = std::str::from_utf8(start.name().as_ref())
        .map_err(xml_error)?
        .to_string();

    let mut frame = Vec::new();
    let mut raw_attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(xml_error)?.to_string();
        let value = attr.unescape_value().map_err(xml_error)?.into_owned();
        if key == "xmlns" {
            frame.push((String::new(), value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            frame.push((prefix.to_string(), value));
        } else {
            raw_attributes.push((key, value));
        }
    }

    let (prefix, local) = split_name(&raw_name);
    let namespace = resolve_prefix(prefix.unwrap_or(""), &frame, scopes);
    if prefix.is_some() && namespace.is_none() {
        return Err(Error::MalformedXml(format!("unbound prefix in element '{}'", raw_name)));
    }

    let mut element = XmlElement::new(namespace.unwrap_or_default(), local);
    for (key, value) in raw_attributes {
        let attr_namespace = match split_name(&key) {
            (Some(prefix), _) => Some(resolve_prefix(prefix, &frame, scopes).ok_or_else(|| {
                Error::MalformedXml(format!("unbound prefix in attribute '{}'", key))
            })?),
            (None, _) => None,
        };
        let (_, local_key) = split_name(&key);
        element.attributes.push(XmlAttribute {
            namespace: attr_namespace,
            name: local_key.to_string(),
            value,
        });
    }
    element.prefixes = frame
        .iter()
        .filter(|(prefix, _)| !prefix.is_empty())
        .cloned()
        .collect();
    Ok((element, frame))
}

fn close_element(
    mut element: XmlElement,
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
) -> Result<()> {
    // Indentation between child elements is not content
    if element.has_child_elements() {
        element
            .children
            .retain(|child| !matches!(child, XmlNode::Text(t) if t.trim().is_empty()));
    }
    match stack.last_mut() {
        Some(parent) => {
            parent.push_child(element);
            Ok(())
        }
        None if root.is_some() => Err(Error::MalformedXml("multiple root elements".into())),
        None => {
            *root = Some(element);
            Ok(())
        }
    }
}

fn append_text(stack: &mut [XmlElement], text: &str) -> Result<()> {
    match stack.last_mut() {
        Some(current) => {
            current.push_text(text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(Error::MalformedXml("text outside of root element".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolves_namespaces() {
        let doc = XmlElement::parse(
            r#"<rpc xmlns="urn:base" xmlns:x="urn:x" message-id="m-1">
                 <x:edit x:operation="merge"><inner/></x:edit>
               </rpc>"#,
        )
        .unwrap();
        assert!(doc.is("urn:base", "rpc"));
        assert_eq!(doc.attribute(None, "message-id"), Some("m-1"));

        let edit = doc.first_child("urn:x", "edit").unwrap();
        assert_eq!(edit.attribute(Some("urn:x"), "operation"), Some("merge"));
        // Unprefixed children inherit the default namespace, not the parent's
        assert!(edit.first_child("urn:base", "inner").is_some());
        // Formatting whitespace is dropped
        assert_eq!(doc.children().len(), 1);
    }

    #[test]
    fn test_parse_errors() {
        assert!(XmlElement::parse("<a><b></a>").is_err());
        assert!(XmlElement::parse("<p:a/>").is_err());
        assert!(XmlElement::parse("").is_err());
        assert!(XmlElement::parse("<a/><b/>").is_err());
    }

    #[test]
    fn test_text_is_unescaped_and_preserved() {
        let doc = XmlElement::parse("<a> x &lt; y </a>").unwrap();
        assert_eq!(doc.text(), " x < y ");
        let cdata = XmlElement::parse("<a><![CDATA[<raw>]]></a>").unwrap();
        assert_eq!(cdata.text(), "<raw>");
    }

    #[test]
    fn test_serialize_declares_namespaces() {
        let element = XmlElement::new("urn:a", "top")
            .with_child(
                XmlElement::new("urn:a", "leaf")
                    .with_attribute(Some(NETCONF_BASE_NAMESPACE), "operation", "replace")
                    .with_text("v & w"),
            )
            .with_child(XmlElement::new("urn:b", "other"));
        assert_eq!(
            element.to_xml(),
            "<top xmlns=\"urn:a\"><leaf xmlns:nc=\"urn:ietf:params:xml:ns:netconf:base:1.0\" \
             nc:operation=\"replace\">v &amp; w</leaf><other xmlns=\"urn:b\"/></top>"
        );
    }

    #[test]
    fn test_serialize_then_parse_is_similar() {
        let original = XmlElement::parse(
            r#"<a xmlns="urn:a" xmlns:p="urn:p"><b p:attr="1">text</b><c xmlns="urn:c"/></a>"#,
        )
        .unwrap();
        let reparsed = XmlElement::parse(&original.to_xml()).unwrap();
        assert!(original.is_similar(&reparsed));
    }

    #[test]
    fn test_without_attribute_is_pure() {
        let original = XmlElement::parse(
            r#"<a xmlns="urn:a" xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0"><b nc:operation="delete"/></a>"#,
        )
        .unwrap();
        let stripped = original.without_attribute(Some(NETCONF_BASE_NAMESPACE), "operation");
        assert!(stripped.first_child("urn:a", "b").unwrap().attributes().is_empty());
        assert_eq!(original.first_child("urn:a", "b").unwrap().attributes().len(), 1);
    }
}
