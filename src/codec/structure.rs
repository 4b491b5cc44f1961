//! Filter, selection and edit structures for base operations
//!
//! The schema-aware variant validates paths and decodes read replies before
//! selecting from them. The schemaless variant works on the XML directly and
//! leaves opaque content untouched.

use std::sync::Arc;

use super::{RpcStructureTransformer, SchemaCodec, StructuralEncoder};
use crate::edit::{build_batched_edit_structure, build_edit_structure, EditEntry, EditOperation};
use crate::error::{Error, Result};
use crate::filter::{fields_subtree_filter, select_from_tree, select_from_xml, subtree_filter, FieldsFilter};
use crate::schema::base::{netconf_qname, NETCONF_BASE_NAMESPACE};
use crate::schema::SchemaContext;
use crate::tree::{OpaqueNode, Path, TreeNode};
use crate::xml::XmlElement;

fn filter_node(filter: XmlElement) -> TreeNode {
    OpaqueNode::new(netconf_qname("filter"), filter).into()
}

fn config_node(config: XmlElement) -> TreeNode {
    OpaqueNode::new(netconf_qname("config"), config).into()
}

/// Structure transformer validating against a schema context
#[derive(Debug, Clone)]
pub struct NetconfRpcStructureTransformer {
    context: Arc<SchemaContext>,
    strict: bool,
}

impl NetconfRpcStructureTransformer {
    pub fn new(context: Arc<SchemaContext>) -> Self {
        Self { context, strict: true }
    }

    /// Skip unknown elements when decoding read replies
    pub fn with_strict_parsing(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    fn codec(&self) -> SchemaCodec<'_> {
        SchemaCodec::new(&self.context, self.strict)
    }
}

impl RpcStructureTransformer for NetconfRpcStructureTransformer {
    fn to_filter_structure(&self, path: &Path) -> Result<TreeNode> {
        self.context.resolve_path(path)?;
        subtree_filter(path).map(filter_node)
    }

    fn to_fields_filter_structure(&self, filters: &[FieldsFilter]) -> Result<TreeNode> {
        for filter in filters {
            for field in filter.fields() {
                self.context.resolve_path(&filter.path().join(field))?;
            }
        }
        fields_subtree_filter(filters).map(filter_node)
    }

    fn select_from_data_structure(&self, data: &TreeNode, path: &Path) -> Result<Option<TreeNode>> {
        match data {
            TreeNode::Opaque(opaque) => {
                let tree = self.codec().decode_top_level(opaque.body(), netconf_qname("data"))?;
                Ok(select_from_tree(&tree, path))
            }
            TreeNode::Container(tree) => Ok(select_from_tree(tree, path)),
            other => Err(Error::InvalidArgument(format!(
                "cannot select from a {} node",
                other.kind()
            ))),
        }
    }

    fn create_edit_config_structure(
        &self,
        payload: Option<TreeNode>,
        path: &Path,
        operation: EditOperation,
    ) -> Result<TreeNode> {
        let entry = EditEntry::new(path.clone(), operation, payload)?;
        build_edit_structure(&self.codec(), &entry).map(config_node)
    }

    fn create_batched_edit_config_structure(&self, entries: &[EditEntry]) -> Result<TreeNode> {
        build_batched_edit_structure(&self.codec(), entries).map(config_node)
    }
}

/// Structure transformer working on XML without a schema
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemalessRpcStructureTransformer;

impl SchemalessRpcStructureTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl RpcStructureTransformer for SchemalessRpcStructureTransformer {
    fn to_filter_structure(&self, path: &Path) -> Result<TreeNode> {
        subtree_filter(path).map(filter_node)
    }

    fn to_fields_filter_structure(&self, filters: &[FieldsFilter]) -> Result<TreeNode> {
        fields_subtree_filter(filters).map(filter_node)
    }

    /// Matching elements with their operation attributes removed
    ///
    /// Several matches (an unkeyed list) are returned inside a `<data>`
    /// wrapper in document order.
    fn select_from_data_structure(&self, data: &TreeNode, path: &Path) -> Result<Option<TreeNode>> {
        let TreeNode::Opaque(opaque) = data else {
            return Err(Error::InvalidArgument(format!(
                "schemaless selection needs opaque data, got a {} node",
                data.kind()
            )));
        };
        let mut matches: Vec<XmlElement> = select_from_xml(opaque.body(), path)
            .into_iter()
            .map(|e| e.without_attribute(Some(NETCONF_BASE_NAMESPACE), "operation"))
            .collect();
        Ok(match matches.len() {
            0 => None,
            1 => matches.pop().map(TreeNode::opaque),
            _ => {
                let mut wrapper = XmlElement::new(NETCONF_BASE_NAMESPACE, "data");
                for element in matches {
                    wrapper.push_child(element);
                }
                Some(TreeNode::opaque(wrapper))
            }
        })
    }

    fn create_edit_config_structure(
        &self,
        payload: Option<TreeNode>,
        path: &Path,
        operation: EditOperation,
    ) -> Result<TreeNode> {
        let entry = EditEntry::new(path.clone(), operation, payload)?;
        build_edit_structure(&StructuralEncoder, &entry).map(config_node)
    }

    fn create_batched_edit_config_structure(&self, entries: &[EditEntry]) -> Result<TreeNode> {
        build_batched_edit_structure(&StructuralEncoder, entries).map(config_node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qname::QName;
    use crate::schema::assemble;
    use crate::source::{SchemaSource, SourceIdentifier};
    use crate::tree::{ContainerNode, NodeId, Value};

    const ACME: &str = r#"
        module acme {
            namespace "urn:acme";
            prefix a;
            revision 2023-02-02;

            container c {
                leaf a { type string; }
                list entry {
                    key "id";
                    leaf id { type uint32; }
                    leaf label { type string; }
                }
            }
        }
    "#;

    fn q(name: &str) -> QName {
        QName::create("urn:acme", name)
    }

    fn structure() -> NetconfRpcStructureTransformer {
        let id = SourceIdentifier::parse("acme@2023-02-02").unwrap();
        NetconfRpcStructureTransformer::new(Arc::new(assemble(&[SchemaSource::yang(id, ACME)]).unwrap()))
    }

    fn entry_path(id: u32) -> Path {
        Path::new(vec![
            NodeId::new(q("c")),
            NodeId::with_keys(q("entry"), [(q("id"), Value::from(id))]),
        ])
    }

    fn body(node: &TreeNode) -> &XmlElement {
        node.as_opaque().unwrap().body()
    }

    #[test]
    fn test_filter_rejects_unknown_path() {
        let structure = structure();
        let bad = Path::new(vec![NodeId::new(q("c")), NodeId::new(q("nope"))]);
        assert!(matches!(structure.to_filter_structure(&bad), Err(Error::UnknownNode { .. })));

        let filter = structure.to_filter_structure(&entry_path(4)).unwrap();
        let entry = body(&filter)
            .first_child("urn:acme", "c")
            .and_then(|c| c.first_child("urn:acme", "entry"))
            .unwrap();
        assert_eq!(entry.first_child("urn:acme", "id").unwrap().text(), "4");
    }

    #[test]
    fn test_edit_then_select_returns_payload() {
        let structure = structure();
        let payload: TreeNode = ContainerNode::new(NodeId::with_keys(q("entry"), [(q("id"), Value::Uint(4))]))
            .with_child(TreeNode::leaf(q("id"), Value::Uint(4)))
            .with_child(TreeNode::leaf(q("label"), "four"))
            .into();
        let config = structure
            .create_edit_config_structure(Some(payload.clone()), &entry_path(4), EditOperation::Merge)
            .unwrap();

        let selected = structure
            .select_from_data_structure(&config, &entry_path(4))
            .unwrap()
            .unwrap();
        let TreeNode::Container(selected) = selected else {
            panic!("expected a list entry");
        };
        assert!(selected.id().matches(payload.id()));
        let label = selected.child_by_name(&q("label")).unwrap();
        assert!(matches!(label, TreeNode::Leaf(leaf) if leaf.value() == &Value::from("four")));
    }

    #[test]
    fn test_delete_without_payload_and_presence_rules() {
        let structure = structure();
        let config = structure
            .create_edit_config_structure(None, &entry_path(9), EditOperation::Delete)
            .unwrap();
        let entry = body(&config)
            .first_child("urn:acme", "c")
            .and_then(|c| c.first_child("urn:acme", "entry"))
            .unwrap();
        assert_eq!(entry.attribute(Some(NETCONF_BASE_NAMESPACE), "operation"), Some("delete"));
        assert_eq!(entry.first_child("urn:acme", "id").unwrap().text(), "9");

        let leaf = Path::new(vec![NodeId::new(q("c")), NodeId::new(q("a"))]);
        assert!(matches!(
            structure.create_edit_config_structure(None, &leaf, EditOperation::Create),
            Err(Error::InvalidEdit { .. })
        ));
    }

    #[test]
    fn test_schemaless_select_strips_operation() {
        let structure = SchemalessRpcStructureTransformer::new();
        let data = TreeNode::opaque(
            XmlElement::parse(
                r#"<data xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"
                         xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0">
                     <c xmlns="urn:acme">
                       <entry nc:operation="merge"><id>1</id><label> one </label></entry>
                       <entry><id>2</id></entry>
                     </c>
                   </data>"#,
            )
            .unwrap(),
        );
        let one = structure
            .select_from_data_structure(&data, &entry_path(1))
            .unwrap()
            .unwrap();
        assert!(body(&one).attributes().is_empty());
        assert_eq!(body(&one).first_child("urn:acme", "label").unwrap().text(), " one ");

        let all = Path::new(vec![NodeId::new(q("c")), NodeId::new(q("entry"))]);
        let both = structure.select_from_data_structure(&data, &all).unwrap().unwrap();
        assert!(body(&both).is(NETCONF_BASE_NAMESPACE, "data"));
        assert_eq!(body(&both).child_elements().count(), 2);

        assert!(structure.select_from_data_structure(&data, &entry_path(3)).unwrap().is_none());
    }
}
