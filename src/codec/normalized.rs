//! Schema-driven conversion between XML and the tree model
//!
//! The schema decides which [`TreeNode`] variant an element becomes and in
//! which order children are written back out.

use log::debug;

use super::schemaless::write_structural;
use crate::edit::{identifier_element, PayloadEncoder};
use crate::error::{Error, Result};
use crate::qname::QName;
use crate::schema::{find_data_child, flatten_data_nodes, LeafType, ListSchema, SchemaContext, SchemaNode};
use crate::tree::{ContainerNode, LeafListNode, ListNode, NodeId, OpaqueNode, Path, TreeNode, Value};
use crate::xml::XmlElement;

/// Schema node lookup scope: top-level data of the context, or the children
/// of one schema node
#[derive(Clone, Copy)]
enum Scope<'a> {
    Top,
    Children(&'a [SchemaNode]),
}

pub(crate) struct SchemaCodec<'a> {
    context: &'a SchemaContext,
    strict: bool,
}

impl<'a> SchemaCodec<'a> {
    pub(crate) fn new(context: &'a SchemaContext, strict: bool) -> Self {
        Self { context, strict }
    }

    fn lookup(&self, scope: Scope<'a>, name: &QName) -> Option<&'a SchemaNode> {
        match scope {
            Scope::Top => self.context.data_child(name),
            Scope::Children(children) => find_data_child(children, name),
        }
    }

    // ========================================================================
    // Decoding
    // ========================================================================

    /// Decode the children of a `<data>` or `<config>` element
    pub(crate) fn decode_top_level(&self, element: &XmlElement, id: QName) -> Result<ContainerNode> {
        let mut target = ContainerNode::new(id);
        self.decode_into(Scope::Top, element.child_elements(), &mut target)?;
        Ok(target)
    }

    /// Decode `elements` against the given schema children into a
    /// container named `id`
    pub(crate) fn decode_with<'e>(
        &self,
        schema: &'a [SchemaNode],
        elements: impl Iterator<Item = &'e XmlElement>,
        id: QName,
    ) -> Result<ContainerNode> {
        let mut target = ContainerNode::new(id);
        self.decode_into(Scope::Children(schema), elements, &mut target)?;
        Ok(target)
    }

    fn decode_into<'e>(
        &self,
        scope: Scope<'a>,
        elements: impl Iterator<Item = &'e XmlElement>,
        target: &mut ContainerNode,
    ) -> Result<()> {
        for element in elements {
            let name = QName::create(element.namespace().unwrap_or_default(), element.name());
            let Some(schema) = self.lookup(scope, &name) else {
                if self.strict {
                    return Err(Error::UnknownNode {
                        parent: target.id().to_string(),
                        name: name.to_string(),
                    });
                }
                debug!("Skipping unknown element {} under {}", name, target.id());
                continue;
            };
            self.decode_element(schema, element, target)?;
        }
        Ok(())
    }

    fn decode_element(&self, schema: &'a SchemaNode, element: &XmlElement, target: &mut ContainerNode) -> Result<()> {
        match schema {
            SchemaNode::Container(container) => {
                let mut node = ContainerNode::new(container.qname.clone());
                self.decode_into(Scope::Children(&container.children), element.child_elements(), &mut node)?;
                target.insert(node.into());
            }
            SchemaNode::List(list) => {
                let entry = self.decode_entry(list, element)?;
                let list_id = NodeId::new(list.qname.clone());
                match target.child_mut(&list_id) {
                    Some(TreeNode::List(existing)) => existing.push_entry(entry),
                    _ => {
                        target.insert(ListNode::new(list.qname.clone()).with_entry(entry).into());
                    }
                }
            }
            SchemaNode::Leaf(leaf) => {
                let value = parse_leaf(&leaf.qname, leaf.leaf_type, element)?;
                target.insert(TreeNode::leaf(leaf.qname.clone(), value));
            }
            SchemaNode::LeafList(leaf) => {
                let value = parse_leaf(&leaf.qname, leaf.leaf_type, element)?;
                let id = NodeId::new(leaf.qname.clone());
                match target.child_mut(&id) {
                    Some(TreeNode::LeafList(existing)) => existing.push(value),
                    _ => {
                        target.insert(LeafListNode::new(leaf.qname.clone(), vec![value]).into());
                    }
                }
            }
            SchemaNode::AnyData(qname) => {
                target.insert(OpaqueNode::new(qname.clone(), element.clone()).into());
            }
            // Never returned by data child lookup
            SchemaNode::Choice(choice) => {
                return Err(Error::SchemaMismatch {
                    node: choice.qname.to_string(),
                    found: "element".into(),
                    expected: "choice".into(),
                })
            }
        }
        Ok(())
    }

    fn decode_entry(&self, list: &'a ListSchema, element: &XmlElement) -> Result<ContainerNode> {
        let mut content = ContainerNode::new(list.qname.clone());
        self.decode_into(Scope::Children(&list.children), element.child_elements(), &mut content)?;

        let mut keys = Vec::with_capacity(list.keys.len());
        for key in &list.keys {
            match content.child_by_name(key) {
                Some(TreeNode::Leaf(leaf)) => keys.push((key.clone(), leaf.value().clone())),
                _ => {
                    return Err(Error::MissingListKey {
                        list: list.qname.local_name().to_string(),
                        key: key.local_name().to_string(),
                    })
                }
            }
        }
        let mut entry = ContainerNode::new(NodeId::with_keys(list.qname.clone(), keys));
        for child in content.into_children() {
            entry.insert(child);
        }
        Ok(entry)
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Encode the children of `container` against schema children, in
    /// schema order
    pub(crate) fn encode_children(&self, schema: &'a [SchemaNode], container: &ContainerNode) -> Result<Vec<XmlElement>> {
        self.encode_scoped(Scope::Children(schema), container)
    }

    /// Encode top-level data nodes, such as the children of a `<config>`
    pub(crate) fn encode_top_level(&self, container: &ContainerNode) -> Result<Vec<XmlElement>> {
        self.encode_scoped(Scope::Top, container)
    }

    fn encode_scoped(&self, scope: Scope<'a>, container: &ContainerNode) -> Result<Vec<XmlElement>> {
        let mut placed: Vec<(&'a SchemaNode, &TreeNode)> = Vec::new();
        for child in container.children() {
            let schema = self.lookup(scope, child.name()).ok_or_else(|| Error::UnknownNode {
                parent: container.id().to_string(),
                name: child.name().to_string(),
            })?;
            placed.push((schema, child));
        }

        let mut out = Vec::new();
        match scope {
            Scope::Children(schema_children) => {
                for schema in flatten_data_nodes(schema_children) {
                    for (_, child) in placed.iter().filter(|(s, _)| std::ptr::eq(*s, schema)) {
                        out.extend(self.encode_node(schema, child, None)?);
                    }
                }
            }
            // Top-level nodes come from several modules; keep caller order
            Scope::Top => {
                for (schema, child) in placed {
                    out.extend(self.encode_node(schema, child, None)?);
                }
            }
        }
        Ok(out)
    }

    /// Encode one node; `position` supplies key values for a list entry
    /// addressed by a keyed path
    fn encode_node(&self, schema: &'a SchemaNode, node: &TreeNode, position: Option<&NodeId>) -> Result<Vec<XmlElement>> {
        let mismatch = || Error::SchemaMismatch {
            node: node.id().to_string(),
            found: node.kind().to_string(),
            expected: schema.kind().to_string(),
        };
        let element_for = |qname: &QName| XmlElement::new(qname.namespace(), qname.local_name());

        Ok(match (schema, node) {
            (_, TreeNode::Opaque(opaque)) => vec![opaque_element(schema.qname(), opaque)],
            (SchemaNode::Container(container_schema), TreeNode::Container(container)) => {
                let mut element = element_for(&container_schema.qname);
                for child in self.encode_children(&container_schema.children, container)? {
                    element.push_child(child);
                }
                vec![element]
            }
            (SchemaNode::List(list_schema), TreeNode::List(list)) => list
                .entries()
                .iter()
                .map(|entry| self.encode_entry(list_schema, entry, None))
                .collect::<Result<_>>()?,
            (SchemaNode::List(list_schema), TreeNode::Container(entry)) => {
                vec![self.encode_entry(list_schema, entry, position)?]
            }
            (SchemaNode::Leaf(leaf_schema), TreeNode::Leaf(leaf)) => {
                vec![leaf_element(&leaf_schema.qname, leaf.value())]
            }
            (SchemaNode::LeafList(leaf_schema), TreeNode::LeafList(values)) => values
                .values()
                .iter()
                .map(|value| leaf_element(&leaf_schema.qname, value))
                .collect(),
            // Single leaf-list value
            (SchemaNode::LeafList(leaf_schema), TreeNode::Leaf(leaf)) => {
                vec![leaf_element(&leaf_schema.qname, leaf.value())]
            }
            // anydata given as tree nodes is written as-is
            (SchemaNode::AnyData(_), other) => write_structural(other),
            _ => return Err(mismatch()),
        })
    }

    fn encode_entry(&self, schema: &'a ListSchema, entry: &ContainerNode, position: Option<&NodeId>) -> Result<XmlElement> {
        let mut element = XmlElement::new(schema.qname.namespace(), schema.qname.local_name());
        for key in &schema.keys {
            let value = match entry.child_by_name(key) {
                Some(TreeNode::Leaf(leaf)) => Some(leaf.value().clone()),
                _ => entry
                    .id()
                    .key_value(key)
                    .or_else(|| position.and_then(|id| id.key_value(key)))
                    .cloned(),
            };
            let value = value.ok_or_else(|| Error::MissingListKey {
                list: schema.qname.local_name().to_string(),
                key: key.local_name().to_string(),
            })?;
            element.push_child(leaf_element(key, &value));
        }

        let mut rest = ContainerNode::new(entry.id().clone());
        for child in entry.children() {
            if !schema.keys.iter().any(|key| key.matches(child.name())) {
                rest.insert(child.clone());
            }
        }
        for child in self.encode_children(&schema.children, &rest)? {
            element.push_child(child);
        }
        Ok(element)
    }
}

impl PayloadEncoder for SchemaCodec<'_> {
    fn check_path(&self, path: &Path) -> Result<()> {
        self.context.resolve_path(path).map(|_| ())
    }

    fn is_presence_only(&self, path: &Path) -> bool {
        self.context
            .resolve_path(path)
            .ok()
            .and_then(|nodes| nodes.last().map(|node| node.is_presence_only()))
            .unwrap_or(false)
    }

    fn encode(&self, node: &TreeNode, path: &Path) -> Result<Vec<XmlElement>> {
        let nodes = self.context.resolve_path(path)?;
        let schema = nodes.last().copied().ok_or_else(|| Error::InvalidPath {
            path: path.to_string(),
            reason: "empty path".into(),
        })?;
        self.encode_node(schema, node, path.last())
    }

    fn ancestor(&self, path: &Path) -> Result<XmlElement> {
        let nodes = self.context.resolve_path(path)?;
        match (nodes.last(), path.last()) {
            (Some(schema), Some(id)) => {
                let qname = schema.qname();
                let mut element = identifier_element(&NodeId::with_keys(qname.clone(), id.keys().to_vec()));
                if let SchemaNode::List(list) = schema {
                    element = order_keys(element, list);
                }
                Ok(element)
            }
            _ => Err(Error::InvalidPath {
                path: path.to_string(),
                reason: "empty path".into(),
            }),
        }
    }
}

/// Rewrite key leaves of an identifier element into declared key order
fn order_keys(element: XmlElement, list: &ListSchema) -> XmlElement {
    let mut ordered = XmlElement::new(element.namespace().unwrap_or_default(), element.name());
    for key in &list.keys {
        if let Some(leaf) = element.first_child(key.namespace(), key.local_name()) {
            ordered.push_child(leaf.clone());
        }
    }
    ordered
}

fn leaf_element(qname: &QName, value: &Value) -> XmlElement {
    let element = XmlElement::new(qname.namespace(), qname.local_name());
    match value {
        Value::Empty => element,
        other => element.with_text(other.to_text()),
    }
}

/// Opaque payload for a schema node: used as-is when it already is the
/// node's element, otherwise wrapped in it
fn opaque_element(qname: &QName, opaque: &OpaqueNode) -> XmlElement {
    let body = opaque.body();
    if body.is(qname.namespace(), qname.local_name()) {
        body.clone()
    } else {
        XmlElement::new(qname.namespace(), qname.local_name()).with_child(body.clone())
    }
}

fn parse_leaf(qname: &QName, leaf_type: LeafType, element: &XmlElement) -> Result<Value> {
    let text = element.text();
    leaf_type.parse_value(&text).map_err(|reason| Error::InvalidValue {
        leaf: qname.local_name().to_string(),
        value: text.clone(),
        reason,
    })
}
