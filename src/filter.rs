//! Subtree filters and data selection
//!
//! Builds `<filter type="subtree">` selection trees from paths or batched
//! field selections, and selects subtrees back out of reply data.

use crate::error::{Error, Result};
use crate::qname::QName;
use crate::schema::base::NETCONF_BASE_NAMESPACE;
use crate::tree::{ContainerNode, NodeId, Path, TreeNode, Value};
use crate::xml::XmlElement;

/// Root path plus field paths relative to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldsFilter {
    path: Path,
    fields: Vec<Path>,
}

impl FieldsFilter {
    pub fn new(path: Path, fields: Vec<Path>) -> Self {
        Self { path, fields }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fields(&self) -> &[Path] {
        &self.fields
    }
}

/// Split root-relative field paths into one filter per first segment
pub fn fields_from_root(fields: &[Path]) -> Vec<FieldsFilter> {
    let mut filters: Vec<FieldsFilter> = Vec::new();
    for field in fields {
        let Some(first) = field.first() else {
            continue;
        };
        let root = Path::new(vec![first.clone()]);
        let relative = field.skip(1);
        match filters.iter_mut().find(|f| f.path == root) {
            Some(existing) => existing.fields.push(relative),
            None => filters.push(FieldsFilter::new(root, vec![relative])),
        }
    }
    filters
}

/// True if any field path is empty (selects everything below its root)
pub fn contains_empty_path(fields: &[Path]) -> bool {
    fields.iter().any(Path::is_empty)
}

// ============================================================================
// Selection tree
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct Selection {
    name: QName,
    keys: Vec<(QName, Value)>,
    /// Whole subtree selected; descendants are implied
    full: bool,
    children: Vec<Selection>,
}

impl Selection {
    fn new(name: QName) -> Self {
        Self {
            name,
            keys: Vec::new(),
            full: false,
            children: Vec::new(),
        }
    }

    fn key(&self, name: &QName) -> Option<&Value> {
        self.keys.iter().find(|(k, _)| k.matches(name)).map(|(_, v)| v)
    }

    fn check_keys(&self, segment: &NodeId, path: &Path) -> Result<()> {
        for (key, value) in segment.keys() {
            if let Some(existing) = self.key(key) {
                if existing != value {
                    return Err(Error::InconsistentKeys {
                        node: path.to_string(),
                        key: key.local_name().to_string(),
                        first: existing.to_text(),
                        second: value.to_text(),
                    });
                }
            }
        }
        Ok(())
    }

    fn merge_keys(&mut self, segment: &NodeId) {
        for (key, value) in segment.keys() {
            if self.key(key).is_none() {
                self.keys.push((key.clone(), value.clone()));
            }
        }
    }

    fn to_xml(&self) -> XmlElement {
        let mut element = XmlElement::new(self.name.namespace(), self.name.local_name());
        for (key, value) in &self.keys {
            element.push_child(
                XmlElement::new(key.namespace(), key.local_name()).with_text(value.to_text()),
            );
        }
        for child in &self.children {
            // A key leaf is already selected by its content match
            if self.key(&child.name).is_some() && child.children.is_empty() {
                continue;
            }
            element.push_child(child.to_xml());
        }
        element
    }
}

/// Union of selected paths, merged on common prefixes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SelectionTree {
    roots: Vec<Selection>,
}

impl SelectionTree {
    fn insert(&mut self, path: &Path) -> Result<()> {
        let segments = path.segments();
        let mut level = &mut self.roots;
        for (i, segment) in segments.iter().enumerate() {
            // Keyed and unkeyed selections of one list stay separate siblings
            let position = match level
                .iter()
                .position(|s| s.name.matches(segment.name()) && s.keys.is_empty() != segment.has_keys())
            {
                Some(position) => position,
                None => {
                    level.push(Selection::new(segment.name().clone()));
                    level.len() - 1
                }
            };
            let node = &mut level[position];
            node.check_keys(segment, path)?;
            if node.full {
                // Ancestor already selected in full
                return Ok(());
            }
            if i + 1 == segments.len() {
                node.keys = segment.keys().to_vec();
                node.full = true;
                node.children.clear();
                return Ok(());
            }
            node.merge_keys(segment);
            level = &mut node.children;
        }
        Ok(())
    }

    fn into_filter(self) -> XmlElement {
        let mut filter = filter_element();
        for root in &self.roots {
            filter.push_child(root.to_xml());
        }
        filter
    }
}

fn filter_element() -> XmlElement {
    XmlElement::new(NETCONF_BASE_NAMESPACE, "filter").with_attribute(None, "type", "subtree")
}

/// Drop field paths implied by a shorter overlapping one
///
/// An empty path absorbs every other path of the group. When a shorter path
/// replaces longer ones it takes the position of the first of them.
pub fn reduce_fields(fields: &[Path]) -> Vec<Path> {
    if contains_empty_path(fields) {
        return vec![Path::root()];
    }
    let mut kept: Vec<Path> = Vec::new();
    for field in fields {
        if kept.iter().any(|k| k.is_prefix_of(field)) {
            continue;
        }
        match kept.iter().position(|k| field.is_prefix_of(k)) {
            Some(first) => {
                kept[first] = field.clone();
                let mut index = 0;
                kept.retain(|k| {
                    let keep = index <= first || !field.is_prefix_of(k);
                    index += 1;
                    keep
                });
            }
            None => kept.push(field.clone()),
        }
    }
    kept
}

/// Subtree filter selecting the node at `path`
///
/// List segments without key predicates select all entries; key predicates
/// become content-match leaves.
pub fn subtree_filter(path: &Path) -> Result<XmlElement> {
    if path.is_empty() {
        return Err(Error::InvalidFilter(
            "the datastore root cannot be expressed as a subtree filter".into(),
        ));
    }
    let mut tree = SelectionTree::default();
    tree.insert(path)?;
    Ok(tree.into_filter())
}

/// Subtree filter for a batch of field selections
///
/// Groups sharing a root path are merged; overlapping field paths collapse to
/// the shorter one; common ancestors of different groups appear only once.
pub fn fields_subtree_filter(filters: &[FieldsFilter]) -> Result<XmlElement> {
    let mut groups: Vec<(Path, Vec<Path>)> = Vec::new();
    for filter in filters {
        match groups.iter_mut().find(|(root, _)| *root == filter.path) {
            Some((_, fields)) => fields.extend(filter.fields.iter().cloned()),
            None => groups.push((filter.path.clone(), filter.fields.clone())),
        }
    }
    if groups.is_empty() {
        return Err(Error::InvalidFilter("no field selections given".into()));
    }

    let mut tree = SelectionTree::default();
    for (root, fields) in &groups {
        if fields.is_empty() {
            return Err(Error::InvalidFilter(format!("no fields selected below {}", root)));
        }
        for field in reduce_fields(fields) {
            let full = root.join(&field);
            if full.is_empty() {
                return Err(Error::InvalidFilter(
                    "the datastore root cannot be expressed as a subtree filter".into(),
                ));
            }
            tree.insert(&full)?;
        }
    }
    Ok(tree.into_filter())
}

// ============================================================================
// Selection from data
// ============================================================================

/// Select the node at `path` from a decoded data tree
///
/// Returns `None` when any segment is absent. An unkeyed segment naming a list
/// in the middle of the path is followed only if the list has one entry.
pub fn select_from_tree(root: &ContainerNode, path: &Path) -> Option<TreeNode> {
    let segments = path.segments();
    if segments.is_empty() {
        return Some(TreeNode::Container(root.clone()));
    }
    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        let child = current.child_by_name(segment.name())?;
        match child {
            TreeNode::List(list) => {
                let entry = if segment.has_keys() {
                    list.entry(segment)?
                } else if last {
                    return Some(child.clone());
                } else if list.entries().len() == 1 {
                    &list.entries()[0]
                } else {
                    return None;
                };
                if last {
                    return Some(TreeNode::Container(entry.clone()));
                }
                current = entry;
            }
            TreeNode::Container(container) if !segment.has_keys() => {
                if last {
                    return Some(child.clone());
                }
                current = container;
            }
            other if last && !segment.has_keys() => return Some(other.clone()),
            _ => return None,
        }
    }
    None
}

/// Elements at `path` below `data`, matched structurally
pub fn select_from_xml<'a>(data: &'a XmlElement, path: &Path) -> Vec<&'a XmlElement> {
    let mut current = vec![data];
    for segment in path {
        let mut next = Vec::new();
        for element in current {
            next.extend(element.child_elements().filter(|c| element_matches(c, segment)));
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }
    current
}

fn element_matches(element: &XmlElement, segment: &NodeId) -> bool {
    let name = segment.name();
    element.is(name.namespace(), name.local_name())
        && segment.keys().iter().all(|(key, value)| {
            element
                .first_child(key.namespace(), key.local_name())
                .is_some_and(|leaf| leaf.text().trim() == value.to_text())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ListNode;

    const NS: &str = "urn:test";

    fn q(name: &str) -> QName {
        QName::create(NS, name)
    }

    fn path(names: &[&str]) -> Path {
        names.iter().map(|n| NodeId::new(q(n))).collect()
    }

    fn entry_id(list: &str, key: &str, value: &str) -> NodeId {
        NodeId::with_keys(q(list), [(q(key), Value::from(value))])
    }

    #[test]
    fn test_subtree_filter_from_path() {
        let p = Path::new(vec![
            NodeId::new(q("interfaces")),
            entry_id("interface", "name", "eth0"),
            NodeId::new(q("mtu")),
        ]);
        let filter = subtree_filter(&p).unwrap();
        let expected = XmlElement::parse(
            r#"<filter xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" type="subtree">
                 <interfaces xmlns="urn:test"><interface><name>eth0</name><mtu/></interface></interfaces>
               </filter>"#,
        )
        .unwrap();
        assert!(filter.is_similar(&expected), "{}", filter.to_xml());
    }

    #[test]
    fn test_wildcard_list_segment() {
        let filter = subtree_filter(&path(&["netconf-state", "schemas", "schema", "version"])).unwrap();
        assert_eq!(
            filter.to_xml(),
            "<filter xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\" type=\"subtree\">\
             <netconf-state xmlns=\"urn:test\"><schemas><schema><version/></schema></schemas></netconf-state></filter>"
        );
    }

    #[test]
    fn test_empty_field_absorbs_group() {
        let root = path(&["top"]);
        let with_empty = fields_subtree_filter(&[FieldsFilter::new(
            root.clone(),
            vec![path(&["a"]), Path::root(), path(&["b", "c"])],
        )])
        .unwrap();
        let alone = fields_subtree_filter(&[FieldsFilter::new(root, vec![Path::root()])]).unwrap();
        assert_eq!(with_empty, alone);
    }

    #[test]
    fn test_overlapping_fields_keep_ancestor() {
        let root = path(&["top"]);
        let merged = fields_subtree_filter(&[FieldsFilter::new(
            root.clone(),
            vec![path(&["a", "b", "c"]), path(&["a"])],
        )])
        .unwrap();
        let ancestor = fields_subtree_filter(&[FieldsFilter::new(root, vec![path(&["a"])])]).unwrap();
        assert_eq!(merged, ancestor);
    }

    #[test]
    fn test_groups_share_common_ancestor() {
        let filter = fields_subtree_filter(&[
            FieldsFilter::new(path(&["top", "x"]), vec![path(&["a"])]),
            FieldsFilter::new(path(&["top", "y"]), vec![path(&["b"])]),
        ])
        .unwrap();
        let expected = XmlElement::parse(
            r#"<filter xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" type="subtree">
                 <top xmlns="urn:test"><x><a/></x><y><b/></y></top>
               </filter>"#,
        )
        .unwrap();
        assert!(filter.is_similar(&expected), "{}", filter.to_xml());
    }

    #[test]
    fn test_conflicting_keys_fail_fast() {
        let first = Path::new(vec![entry_id("l", "k", "1"), NodeId::new(q("a"))]);
        let second = Path::new(vec![entry_id("l", "k", "2"), NodeId::new(q("b"))]);
        let err = fields_subtree_filter(&[
            FieldsFilter::new(Path::root(), vec![first.clone()]),
            FieldsFilter::new(Path::root(), vec![second]),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::InconsistentKeys { .. }));

        // Same key value on both sides is merged
        let again = Path::new(vec![entry_id("l", "k", "1"), NodeId::new(q("b"))]);
        let filter = fields_subtree_filter(&[FieldsFilter::new(Path::root(), vec![first, again])]).unwrap();
        assert_eq!(filter.child_elements().count(), 1);
    }

    #[test]
    fn test_conflicting_keys_fail_in_either_order() {
        let whole = Path::new(vec![entry_id("l", "k", "1")]);
        let below = Path::new(vec![entry_id("l", "k", "2"), NodeId::new(q("x"))]);
        for fields in [vec![whole.clone(), below.clone()], vec![below, whole]] {
            let result = fields_subtree_filter(&[FieldsFilter::new(Path::root(), fields)]);
            assert!(matches!(result, Err(Error::InconsistentKeys { .. })), "{:?}", result);
        }
    }

    #[test]
    fn test_wildcard_and_keyed_entries_stay_separate() {
        let all = path(&["l", "b"]);
        let one = Path::new(vec![entry_id("l", "k", "1"), NodeId::new(q("a"))]);
        let filter = fields_subtree_filter(&[FieldsFilter::new(Path::root(), vec![all, one])]).unwrap();
        let expected = XmlElement::parse(
            r#"<filter xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" type="subtree">
                 <l xmlns="urn:test"><b/></l>
                 <l xmlns="urn:test"><k>1</k><a/></l>
               </filter>"#,
        )
        .unwrap();
        assert!(filter.is_similar(&expected), "{}", filter.to_xml());
    }

    #[test]
    fn test_root_only_selection_is_rejected() {
        assert!(subtree_filter(&Path::root()).is_err());
        assert!(fields_subtree_filter(&[FieldsFilter::new(Path::root(), vec![Path::root()])]).is_err());
        assert!(fields_subtree_filter(&[]).is_err());
    }

    #[test]
    fn test_fields_from_root_groups_by_first_segment() {
        let filters = fields_from_root(&[path(&["a", "x"]), path(&["b"]), path(&["a", "y"])]);
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].path(), &path(&["a"]));
        assert_eq!(filters[0].fields(), [path(&["x"]), path(&["y"])]);
        assert_eq!(filters[1].fields(), [Path::root()]);
    }

    #[test]
    fn test_reduce_fields_keeps_position() {
        let reduced = reduce_fields(&[path(&["a", "b"]), path(&["c"]), path(&["a"]), path(&["a", "d"])]);
        assert_eq!(reduced, vec![path(&["a"]), path(&["c"])]);
    }

    #[test]
    fn test_select_from_tree() {
        let entry = ContainerNode::new(entry_id("l", "k", "1"))
            .with_child(TreeNode::leaf(q("k"), "1"))
            .with_child(TreeNode::leaf(q("v"), "x"));
        let root = ContainerNode::new(q("data")).with_child(
            ContainerNode::new(q("top")).with_child(ListNode::new(q("l")).with_entry(entry)),
        );

        let leaf = Path::new(vec![NodeId::new(q("top")), entry_id("l", "k", "1"), NodeId::new(q("v"))]);
        assert_eq!(select_from_tree(&root, &leaf), Some(TreeNode::leaf(q("v"), "x")));

        let missing = Path::new(vec![NodeId::new(q("top")), entry_id("l", "k", "2")]);
        assert_eq!(select_from_tree(&root, &missing), None);
        assert_eq!(select_from_tree(&root, &path(&["nothing"])), None);
    }

    #[test]
    fn test_select_from_xml_matches_keys() {
        let data = XmlElement::parse(
            r#"<data xmlns="urn:test"><l><k>1</k><v>a</v></l><l><k>2</k><v>b</v></l></data>"#,
        )
        .unwrap();
        let selected = select_from_xml(&data, &Path::new(vec![entry_id("l", "k", "2")]));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].first_child(NS, "v").unwrap().text(), "b");
        assert_eq!(select_from_xml(&data, &path(&["l"])).len(), 2);
    }
}
