//! Schema context
//!
//! The assembled, immutable union of all resolved YANG modules of a device.
//! Choice and case nodes are kept in the schema but are transparent in the
//! data tree: data-child lookups descend through them.

pub mod base;
mod factory;
mod yang;

pub use factory::{assemble, ContextFactory, ResolutionError, YangContextFactory};
pub use yang::{parse_statements, Statement, YangError};

use crate::error::{Error, Result};
use crate::qname::{QName, QNameModule, Revision};
use crate::source::SourceIdentifier;
use crate::tree::{Path, Value};

/// Value space of a leaf, reduced to what the wire codec needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeafType {
    Empty,
    Boolean,
    Int,
    Uint,
    /// Everything carried as text (string, enumeration, identityref, ...)
    #[default]
    String,
}

impl LeafType {
    /// Map a YANG built-in type name
    pub fn from_builtin(name: &str) -> Option<Self> {
        match name {
            "empty" => Some(LeafType::Empty),
            "boolean" => Some(LeafType::Boolean),
            "int8" | "int16" | "int32" | "int64" => Some(LeafType::Int),
            "uint8" | "uint16" | "uint32" | "uint64" => Some(LeafType::Uint),
            "string" | "enumeration" | "identityref" | "union" | "leafref" | "bits" | "binary"
            | "decimal64" | "instance-identifier" => Some(LeafType::String),
            _ => None,
        }
    }

    /// Parse wire text into a typed value
    pub fn parse_value(&self, text: &str) -> std::result::Result<Value, String> {
        match self {
            LeafType::Empty if text.trim().is_empty() => Ok(Value::Empty),
            LeafType::Empty => Err("type empty carries no value".into()),
            LeafType::Boolean => match text.trim() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err("expected 'true' or 'false'".into()),
            },
            LeafType::Int => text.trim().parse().map(Value::Int).map_err(|e| e.to_string()),
            LeafType::Uint => text.trim().parse().map(Value::Uint).map_err(|e| e.to_string()),
            LeafType::String => Ok(Value::String(text.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafSchema {
    pub qname: QName,
    pub leaf_type: LeafType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSchema {
    pub qname: QName,
    pub presence: bool,
    pub children: Vec<SchemaNode>,
    pub actions: Vec<OperationSchema>,
    pub notifications: Vec<NotificationSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSchema {
    pub qname: QName,
    pub keys: Vec<QName>,
    pub children: Vec<SchemaNode>,
    pub actions: Vec<OperationSchema>,
    pub notifications: Vec<NotificationSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseSchema {
    pub qname: QName,
    pub children: Vec<SchemaNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceSchema {
    pub qname: QName,
    pub cases: Vec<CaseSchema>,
}

/// A schema node in the data hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaNode {
    Container(ContainerSchema),
    List(ListSchema),
    Leaf(LeafSchema),
    LeafList(LeafSchema),
    /// anydata or anyxml: content is kept opaque
    AnyData(QName),
    Choice(ChoiceSchema),
}

impl SchemaNode {
    pub fn qname(&self) -> &QName {
        match self {
            SchemaNode::Container(c) => &c.qname,
            SchemaNode::List(l) => &l.qname,
            SchemaNode::Leaf(l) | SchemaNode::LeafList(l) => &l.qname,
            SchemaNode::AnyData(q) => q,
            SchemaNode::Choice(c) => &c.qname,
        }
    }

    /// Data children of a container or list
    pub fn children(&self) -> &[SchemaNode] {
        match self {
            SchemaNode::Container(c) => &c.children,
            SchemaNode::List(l) => &l.children,
            _ => &[],
        }
    }

    pub fn actions(&self) -> &[OperationSchema] {
        match self {
            SchemaNode::Container(c) => &c.actions,
            SchemaNode::List(l) => &l.actions,
            _ => &[],
        }
    }

    pub fn notifications(&self) -> &[NotificationSchema] {
        match self {
            SchemaNode::Container(c) => &c.notifications,
            SchemaNode::List(l) => &l.notifications,
            _ => &[],
        }
    }

    /// Data child lookup, transparent through choice and case
    pub fn data_child(&self, name: &QName) -> Option<&SchemaNode> {
        find_data_child(self.children(), name)
    }

    /// Presence containers and `empty` leaves need no payload to exist
    pub fn is_presence_only(&self) -> bool {
        match self {
            SchemaNode::Container(c) => c.presence,
            SchemaNode::Leaf(l) => l.leaf_type == LeafType::Empty,
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SchemaNode::Container(_) => "container",
            SchemaNode::List(_) => "list",
            SchemaNode::Leaf(_) => "leaf",
            SchemaNode::LeafList(_) => "leaf-list",
            SchemaNode::AnyData(_) => "anydata",
            SchemaNode::Choice(_) => "choice",
        }
    }
}

/// Find a data node among `children`, descending through choices
pub fn find_data_child<'a>(children: &'a [SchemaNode], name: &QName) -> Option<&'a SchemaNode> {
    for node in children {
        match node {
            SchemaNode::Choice(choice) => {
                let found = choice
                    .cases
                    .iter()
                    .find_map(|case| find_data_child(&case.children, name));
                if found.is_some() {
                    return found;
                }
            }
            other if other.qname().matches(name) => return Some(other),
            _ => {}
        }
    }
    None
}

/// Data nodes of `children` in declaration order, choices flattened
pub fn flatten_data_nodes(children: &[SchemaNode]) -> Vec<&SchemaNode> {
    let mut flat = Vec::new();
    for node in children {
        match node {
            SchemaNode::Choice(choice) => {
                for case in &choice.cases {
                    flat.extend(flatten_data_nodes(&case.children));
                }
            }
            other => flat.push(other),
        }
    }
    flat
}

/// An rpc or action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSchema {
    pub qname: QName,
    pub input: Vec<SchemaNode>,
    pub output: Vec<SchemaNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSchema {
    pub qname: QName,
    pub children: Vec<SchemaNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub prefix: String,
    pub revision: Option<Revision>,
}

/// One compiled YANG module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub name: String,
    pub namespace: String,
    pub prefix: String,
    pub revision: Option<Revision>,
    pub imports: Vec<Import>,
    pub children: Vec<SchemaNode>,
    pub rpcs: Vec<OperationSchema>,
    pub notifications: Vec<NotificationSchema>,
}

impl Module {
    pub fn qname_module(&self) -> QNameModule {
        QNameModule::new(self.namespace.clone(), self.revision.clone())
    }

    pub fn source_identifier(&self) -> SourceIdentifier {
        SourceIdentifier::new(self.name.clone(), self.revision.clone())
    }

    /// QName in this module's namespace and revision
    pub fn qname(&self, local_name: &str) -> QName {
        QName::new(self.qname_module(), local_name)
    }
}

/// Assembled set of modules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaContext {
    modules: Vec<Module>,
}

impl SchemaContext {
    pub(crate) fn new(modules: Vec<Module>) -> Self {
        Self { modules }
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn module_by_namespace(&self, namespace: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.namespace == namespace)
    }

    pub fn source_identifiers(&self) -> Vec<SourceIdentifier> {
        self.modules.iter().map(Module::source_identifier).collect()
    }

    /// Top-level data node
    pub fn data_child(&self, name: &QName) -> Option<&SchemaNode> {
        self.module_by_namespace(name.namespace())
            .and_then(|m| find_data_child(&m.children, name))
    }

    pub fn rpc(&self, name: &QName) -> Option<&OperationSchema> {
        self.module_by_namespace(name.namespace())
            .and_then(|m| m.rpcs.iter().find(|rpc| rpc.qname.matches(name)))
    }

    /// Top-level notification
    pub fn notification(&self, name: &QName) -> Option<&NotificationSchema> {
        self.module_by_namespace(name.namespace())
            .and_then(|m| m.notifications.iter().find(|n| n.qname.matches(name)))
    }

    /// Schema nodes along a data path, validating key predicates
    pub fn resolve_path(&self, path: &Path) -> Result<Vec<&SchemaNode>> {
        let mut nodes: Vec<&SchemaNode> = Vec::new();
        let segments = path.segments();
        for (i, segment) in segments.iter().enumerate() {
            let invalid = |reason: &str| Error::InvalidPath {
                path: path.to_string(),
                reason: reason.to_string(),
            };
            let node = match nodes.last() {
                None => self.data_child(segment.name()),
                Some(parent) => parent.data_child(segment.name()),
            }
            .ok_or_else(|| Error::UnknownNode {
                parent: Path::new(segments[..i].to_vec()).to_string(),
                name: segment.name().to_string(),
            })?;

            match node {
                SchemaNode::List(list) => {
                    if let Some((key, _)) = segment
                        .keys()
                        .iter()
                        .find(|(key, _)| !list.keys.iter().any(|k| k.matches(key)))
                    {
                        return Err(invalid(&format!("'{}' is not a key", key.local_name())));
                    }
                    // Unkeyed segments select every entry; keyed ones name exactly one
                    if segment.has_keys() {
                        if let Some(key) = list.keys.iter().find(|k| segment.key_value(k).is_none()) {
                            return Err(Error::MissingListKey {
                                list: list.qname.local_name().to_string(),
                                key: key.local_name().to_string(),
                            });
                        }
                    }
                }
                _ if segment.has_keys() => return Err(invalid("key predicates on a non-list node")),
                SchemaNode::Leaf(_) | SchemaNode::LeafList(_) | SchemaNode::AnyData(_)
                    if i + 1 < segments.len() =>
                {
                    return Err(invalid("cannot descend below a leaf"));
                }
                _ => {}
            }
            nodes.push(node);
        }
        Ok(nodes)
    }

    /// Locate an action by its absolute schema path
    ///
    /// The path lists the data nodes from the top level down to the action
    /// itself. Every segment is matched by namespace and local name, which
    /// tells apart same-named siblings contributed by different modules.
    pub fn find_action(&self, path: &[QName]) -> Option<&OperationSchema> {
        let (action, ancestors) = path.split_last()?;
        let (first, rest) = ancestors.split_first()?;
        let mut node = self.data_child(first)?;
        for segment in rest {
            node = node.data_child(segment)?;
        }
        node.actions().iter().find(|a| a.qname.matches(action))
    }

    /// All actions with their schema paths
    pub fn actions(&self) -> Vec<(Vec<QName>, &OperationSchema)> {
        let mut found = Vec::new();
        for module in &self.modules {
            for node in flatten_data_nodes(&module.children) {
                collect_actions(node, &mut Vec::new(), &mut found);
            }
        }
        found
    }
}

fn collect_actions<'a>(
    node: &'a SchemaNode,
    parents: &mut Vec<QName>,
    found: &mut Vec<(Vec<QName>, &'a OperationSchema)>,
) {
    parents.push(node.qname().clone());
    for action in node.actions() {
        let mut path = parents.clone();
        path.push(action.qname.clone());
        found.push((path, action));
    }
    for child in flatten_data_nodes(node.children()) {
        collect_actions(child, parents, found);
    }
    parents.pop();
}
