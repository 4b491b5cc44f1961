//! Edit-config structures
//!
//! Wraps (path, operation, payload) edits into the `<config>` element of an
//! `edit-config` request. The operation attribute is placed only on the
//! element at the path's tail; ancestors are plain wrappers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::base::NETCONF_BASE_NAMESPACE;
use crate::tree::{NodeId, Path, TreeNode};
use crate::xml::XmlElement;

/// Per-node change operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditOperation {
    Merge,
    Replace,
    Create,
    Delete,
    Remove,
    /// No operation attribute; the default operation applies
    None,
}

impl EditOperation {
    /// Attribute value on the wire
    pub fn xml_value(&self) -> &'static str {
        match self {
            EditOperation::Merge => "merge",
            EditOperation::Replace => "replace",
            EditOperation::Create => "create",
            EditOperation::Delete => "delete",
            EditOperation::Remove => "remove",
            EditOperation::None => "none",
        }
    }

    /// Delete and remove never carry data
    pub fn forbids_payload(&self) -> bool {
        matches!(self, EditOperation::Delete | EditOperation::Remove)
    }

    pub fn requires_payload(&self) -> bool {
        matches!(self, EditOperation::Merge | EditOperation::Replace | EditOperation::Create)
    }
}

impl fmt::Display for EditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.xml_value())
    }
}

impl FromStr for EditOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "merge" => Ok(EditOperation::Merge),
            "replace" => Ok(EditOperation::Replace),
            "create" => Ok(EditOperation::Create),
            "delete" => Ok(EditOperation::Delete),
            "remove" => Ok(EditOperation::Remove),
            "none" => Ok(EditOperation::None),
            other => Err(Error::InvalidArgument(format!("unknown edit operation '{}'", other))),
        }
    }
}

/// One unit of a write request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditEntry {
    path: Path,
    operation: EditOperation,
    payload: Option<TreeNode>,
}

impl EditEntry {
    /// Create an entry, rejecting payloads on delete/remove
    pub fn new(path: Path, operation: EditOperation, payload: Option<TreeNode>) -> Result<Self> {
        if operation.forbids_payload() && payload.is_some() {
            return Err(Error::InvalidEdit {
                path: path.to_string(),
                reason: format!("{} must not carry a payload", operation),
            });
        }
        Ok(Self {
            path,
            operation,
            payload,
        })
    }

    pub fn delete(path: Path) -> Self {
        Self {
            path,
            operation: EditOperation::Delete,
            payload: None,
        }
    }

    pub fn remove(path: Path) -> Self {
        Self {
            path,
            operation: EditOperation::Remove,
            payload: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn operation(&self) -> EditOperation {
        self.operation
    }

    pub fn payload(&self) -> Option<&TreeNode> {
        self.payload.as_ref()
    }
}

/// Turns tree nodes into XML for a given data path
///
/// The schema-aware implementation validates against a schema context; the
/// structural one writes nodes as they are.
pub(crate) trait PayloadEncoder {
    fn check_path(&self, path: &Path) -> Result<()>;

    /// Whether the node at `path` may be created without data
    fn is_presence_only(&self, path: &Path) -> bool;

    /// Encode `node`, which sits at `path`
    fn encode(&self, node: &TreeNode, path: &Path) -> Result<Vec<XmlElement>>;

    /// Wrapper element for the last segment of `path`, key leaves included
    fn ancestor(&self, path: &Path) -> Result<XmlElement>;
}

/// Element for a node id, with its key predicates as leaf children
pub(crate) fn identifier_element(id: &NodeId) -> XmlElement {
    let mut element = XmlElement::new(id.name().namespace(), id.name().local_name());
    for (key, value) in id.keys() {
        element.push_child(XmlElement::new(key.namespace(), key.local_name()).with_text(value.to_text()));
    }
    element
}

fn config_element() -> XmlElement {
    XmlElement::new(NETCONF_BASE_NAMESPACE, "config")
}

fn mark(element: &mut XmlElement, operation: EditOperation) {
    if operation != EditOperation::None {
        element.set_attribute(Some(NETCONF_BASE_NAMESPACE), "operation", operation.xml_value());
    }
}

/// Top-level fragments for one edit entry
fn entry_fragments(encoder: &dyn PayloadEncoder, entry: &EditEntry) -> Result<Vec<XmlElement>> {
    let path = &entry.path;
    let invalid = |reason: &str| Error::InvalidEdit {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    encoder.check_path(path)?;

    let Some(tail) = path.last() else {
        // Whole-datastore edit: every top-level child of the payload
        let Some(TreeNode::Container(root)) = &entry.payload else {
            return Err(invalid("an edit of the datastore root needs a container payload"));
        };
        let mut fragments = Vec::new();
        for child in root.children() {
            let child_path = Path::new(vec![child.id().clone()]);
            for mut element in encoder.encode(child, &child_path)? {
                mark(&mut element, entry.operation);
                fragments.push(element);
            }
        }
        return Ok(fragments);
    };

    let mut fragments = match &entry.payload {
        Some(node) => {
            if !node.id().same_name(tail) {
                return Err(invalid(&format!(
                    "payload node '{}' does not match the path tail",
                    node.name().local_name()
                )));
            }
            let mut encoded = encoder.encode(node, path)?;
            if tail.has_keys() {
                for element in &mut encoded {
                    ensure_keys(element, tail);
                }
            }
            encoded
        }
        None => {
            if entry.operation.requires_payload() && !encoder.is_presence_only(path) {
                return Err(invalid(&format!("{} requires a payload", entry.operation)));
            }
            vec![encoder.ancestor(path)?]
        }
    };
    for element in &mut fragments {
        mark(element, entry.operation);
    }

    let segments = path.segments();
    for depth in (1..segments.len()).rev() {
        let mut parent = encoder.ancestor(&Path::new(segments[..depth].to_vec()))?;
        for element in fragments {
            parent.push_child(element);
        }
        fragments = vec![parent];
    }
    Ok(fragments)
}

/// Put missing key leaves of a list entry in front of its other children
fn ensure_keys(element: &mut XmlElement, id: &NodeId) {
    let missing: Vec<XmlElement> = id
        .keys()
        .iter()
        .filter(|(key, _)| element.first_child(key.namespace(), key.local_name()).is_none())
        .map(|(key, value)| XmlElement::new(key.namespace(), key.local_name()).with_text(value.to_text()))
        .collect();
    element.prepend_children(missing);
}

/// `<config>` element for a single edit
pub(crate) fn build_edit_structure(encoder: &dyn PayloadEncoder, entry: &EditEntry) -> Result<XmlElement> {
    build_batched_edit_structure(encoder, std::slice::from_ref(entry))
}

/// `<config>` element with one fragment per entry, in caller order
///
/// The device applies fragments top to bottom, so a delete listed before a
/// create of the same entry takes effect first.
pub(crate) fn build_batched_edit_structure(
    encoder: &dyn PayloadEncoder,
    entries: &[EditEntry],
) -> Result<XmlElement> {
    if entries.is_empty() {
        return Err(Error::InvalidArgument("no edit entries given".into()));
    }
    let mut config = config_element();
    for entry in entries {
        for fragment in entry_fragments(encoder, entry)? {
            config.push_child(fragment);
        }
    }
    Ok(config)
}
