//! Tree data model
//!
//! Device data is represented as a tagged [`TreeNode`] variant: containers,
//! lists of keyed entries, leaf-lists, leaves and opaque XML blobs. Every node
//! carries a [`NodeId`]; list entries carry key predicates in theirs.

use std::fmt;

use indexmap::IndexMap;

use crate::qname::QName;
use crate::xml::XmlElement;

/// Scalar leaf value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    /// Value of a leaf of type `empty`
    Empty,
    Bool(bool),
    Int(i64),
    Uint(u64),
    String(String),
}

impl Value {
    /// Text form used on the wire
    pub fn to_text(&self) -> String {
        match self {
            Value::Empty => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Uint(u) => u.to_string(),
            Value::String(s) => s.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(u: u32) -> Self {
        Value::Uint(u64::from(u))
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::Uint(u)
    }
}

/// Identity of one position in the tree
///
/// Equality and hashing are exact (key order included). Use [`NodeId::matches`]
/// for value-based predicate matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    name: QName,
    keys: Vec<(QName, Value)>,
}

impl NodeId {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            keys: Vec::new(),
        }
    }

    /// Identifier of a list entry
    pub fn with_keys(name: QName, keys: impl IntoIterator<Item = (QName, Value)>) -> Self {
        Self {
            name,
            keys: keys.into_iter().collect(),
        }
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn keys(&self) -> &[(QName, Value)] {
        &self.keys
    }

    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn key_value(&self, key: &QName) -> Option<&Value> {
        self.keys
            .iter()
            .find(|(name, _)| name.matches(key))
            .map(|(_, value)| value)
    }

    /// Same node name, ignoring key predicates
    pub fn same_name(&self, other: &NodeId) -> bool {
        self.name.matches(&other.name)
    }

    /// Name and key values match, regardless of revision and key order
    pub fn matches(&self, other: &NodeId) -> bool {
        self.same_name(other)
            && self.keys.len() == other.keys.len()
            && self
                .keys
                .iter()
                .all(|(key, value)| other.key_value(key) == Some(value))
    }

    /// True if every key predicate of `self` is satisfied by `other`
    ///
    /// A node id without keys covers every entry of the list.
    pub fn covers(&self, other: &NodeId) -> bool {
        self.same_name(other)
            && self
                .keys
                .iter()
                .all(|(key, value)| other.key_value(key) == Some(value))
    }
}

impl From<QName> for NodeId {
    fn from(name: QName) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name.local_name())?;
        for (key, value) in &self.keys {
            write!(f, "[{}='{}']", key.local_name(), value)?;
        }
        Ok(())
    }
}

/// Root-to-node sequence of node ids; empty means the whole tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path(Vec<NodeId>);

impl Path {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(segments: Vec<NodeId>) -> Self {
        Self(segments)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn segments(&self) -> &[NodeId] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeId> {
        self.0.iter()
    }

    pub fn first(&self) -> Option<&NodeId> {
        self.0.first()
    }

    pub fn last(&self) -> Option<&NodeId> {
        self.0.last()
    }

    /// New path with one more segment
    pub fn child(&self, segment: impl Into<NodeId>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Concatenate `other` below this path
    pub fn join(&self, other: &Path) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    /// Path without its first `n` segments
    pub fn skip(&self, n: usize) -> Self {
        Self(self.0.iter().skip(n).cloned().collect())
    }

    /// True if `self` selects an ancestor of (or the same node as) `other`
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        self.0.len() <= other.0.len()
            && self.0.iter().zip(other.0.iter()).all(|(a, b)| a.covers(b))
    }

    /// One path is a prefix of the other
    pub fn overlaps(&self, other: &Path) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }
}

impl FromIterator<NodeId> for Path {
    fn from_iter<T: IntoIterator<Item = NodeId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<NodeId>> for Path {
    fn from(segments: Vec<NodeId>) -> Self {
        Self(segments)
    }
}

impl<'a> IntoIterator for &'a Path {
    type Item = &'a NodeId;
    type IntoIter = std::slice::Iter<'a, NodeId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.0 {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// Container (or list entry) with children keyed by node id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerNode {
    id: NodeId,
    children: IndexMap<NodeId, TreeNode>,
}

impl ContainerNode {
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            children: IndexMap::new(),
        }
    }

    pub fn with_child(mut self, child: impl Into<TreeNode>) -> Self {
        self.insert(child.into());
        self
    }

    /// Add or replace a child, returning the previous node with the same id
    pub fn insert(&mut self, child: TreeNode) -> Option<TreeNode> {
        self.children.insert(child.id().clone(), child)
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn child(&self, id: &NodeId) -> Option<&TreeNode> {
        self.children
            .get(id)
            .or_else(|| self.children.values().find(|child| child.id().matches(id)))
    }

    pub(crate) fn child_mut(&mut self, id: &NodeId) -> Option<&mut TreeNode> {
        self.children.get_mut(id)
    }

    pub fn child_by_name(&self, name: &QName) -> Option<&TreeNode> {
        self.children.values().find(|child| child.id().name().matches(name))
    }

    pub fn children(&self) -> impl Iterator<Item = &TreeNode> {
        self.children.values()
    }

    pub fn into_children(self) -> impl Iterator<Item = TreeNode> {
        self.children.into_values()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// List node holding keyed entries in document order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListNode {
    id: NodeId,
    entries: Vec<ContainerNode>,
}

impl ListNode {
    pub fn new(name: QName) -> Self {
        Self {
            id: NodeId::new(name),
            entries: Vec::new(),
        }
    }

    pub fn with_entry(mut self, entry: ContainerNode) -> Self {
        self.push_entry(entry);
        self
    }

    /// Append an entry, replacing an existing entry with matching keys
    pub fn push_entry(&mut self, entry: ContainerNode) {
        match self.entries.iter_mut().find(|e| e.id().matches(entry.id())) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn entries(&self) -> &[ContainerNode] {
        &self.entries
    }

    /// Find the entry whose key predicates match `id`
    pub fn entry(&self, id: &NodeId) -> Option<&ContainerNode> {
        self.entries.iter().find(|entry| entry.id().matches(id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafListNode {
    id: NodeId,
    values: Vec<Value>,
}

impl LeafListNode {
    pub fn new(name: QName, values: Vec<Value>) -> Self {
        Self {
            id: NodeId::new(name),
            values,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    id: NodeId,
    value: Value,
}

impl LeafNode {
    pub fn new(name: QName, value: impl Into<Value>) -> Self {
        Self {
            id: NodeId::new(name),
            value: value.into(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// Untyped payload kept as raw XML
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueNode {
    id: NodeId,
    body: XmlElement,
}

impl OpaqueNode {
    pub fn new(name: QName, body: XmlElement) -> Self {
        Self {
            id: NodeId::new(name),
            body,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn body(&self) -> &XmlElement {
        &self.body
    }

    pub fn into_body(self) -> XmlElement {
        self.body
    }
}

/// One node of the data tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    Container(ContainerNode),
    List(ListNode),
    LeafList(LeafListNode),
    Leaf(LeafNode),
    Opaque(OpaqueNode),
}

impl TreeNode {
    pub fn leaf(name: QName, value: impl Into<Value>) -> Self {
        TreeNode::Leaf(LeafNode::new(name, value))
    }

    /// Wrap an XML element as an opaque node named after the element
    pub fn opaque(body: XmlElement) -> Self {
        let name = QName::create(body.namespace().unwrap_or_default(), body.name());
        TreeNode::Opaque(OpaqueNode::new(name, body))
    }

    pub fn id(&self) -> &NodeId {
        match self {
            TreeNode::Container(n) => n.id(),
            TreeNode::List(n) => n.id(),
            TreeNode::LeafList(n) => n.id(),
            TreeNode::Leaf(n) => n.id(),
            TreeNode::Opaque(n) => n.id(),
        }
    }

    pub fn name(&self) -> &QName {
        self.id().name()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TreeNode::Container(_) => "container",
            TreeNode::List(_) => "list",
            TreeNode::LeafList(_) => "leaf-list",
            TreeNode::Leaf(_) => "leaf",
            TreeNode::Opaque(_) => "opaque",
        }
    }

    pub fn as_container(&self) -> Option<&ContainerNode> {
        match self {
            TreeNode::Container(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_opaque(&self) -> Option<&OpaqueNode> {
        match self {
            TreeNode::Opaque(o) => Some(o),
            _ => None,
        }
    }
}

impl From<ContainerNode> for TreeNode {
    fn from(node: ContainerNode) -> Self {
        TreeNode::Container(node)
    }
}

impl From<ListNode> for TreeNode {
    fn from(node: ListNode) -> Self {
        TreeNode::List(node)
    }
}

impl From<LeafListNode> for TreeNode {
    fn from(node: LeafListNode) -> Self {
        TreeNode::LeafList(node)
    }
}

impl From<LeafNode> for TreeNode {
    fn from(node: LeafNode) -> Self {
        TreeNode::Leaf(node)
    }
}

impl From<OpaqueNode> for TreeNode {
    fn from(node: OpaqueNode) -> Self {
        TreeNode::Opaque(node)
    }
}
