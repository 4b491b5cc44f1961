//! Base protocol operations
//!
//! Issues the fixed operation vocabulary (lock, unlock, get, get-config,
//! edit-config, copy-config, commit, discard-changes, validate) through a
//! [`DeviceRpc`], building filters and edit structures with an
//! [`RpcStructureTransformer`]. Holds no state of its own.

use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::codec::{DomRpcResult, RpcStructureTransformer};
use crate::edit::{EditEntry, EditOperation};
use crate::error::{Error, Result};
use crate::filter::{contains_empty_path, fields_from_root, FieldsFilter};
use crate::qname::QName;
use crate::rpc::DeviceRpc;
use crate::schema::base::netconf_qname;
use crate::tree::{ContainerNode, Path, TreeNode, Value};

/// Configuration datastore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datastore {
    Running,
    Candidate,
    Startup,
}

impl Datastore {
    fn name(&self) -> &'static str {
        match self {
            Datastore::Running => "running",
            Datastore::Candidate => "candidate",
            Datastore::Startup => "startup",
        }
    }

    /// `<target>` or `<source>` container selecting this datastore
    fn selector(&self, wrapper: &str) -> TreeNode {
        ContainerNode::new(netconf_qname(wrapper))
            .with_child(TreeNode::leaf(netconf_qname(self.name()), Value::Empty))
            .into()
    }
}

impl fmt::Display for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn input() -> ContainerNode {
    ContainerNode::new(netconf_qname("input"))
}

/// Base operations over one device session
#[derive(Clone)]
pub struct NetconfBaseOps {
    rpc: DeviceRpc,
    structure: Arc<dyn RpcStructureTransformer>,
}

impl NetconfBaseOps {
    pub fn new(rpc: DeviceRpc, structure: Arc<dyn RpcStructureTransformer>) -> Self {
        Self { rpc, structure }
    }

    pub fn rpc(&self) -> &DeviceRpc {
        &self.rpc
    }

    async fn invoke(&self, operation: &str, payload: Option<ContainerNode>) -> Result<DomRpcResult> {
        let rpc: QName = netconf_qname(operation);
        debug!("Issuing {}", operation);
        self.rpc.invoke_rpc(&rpc, payload.as_ref()).await
    }

    // ========================================================================
    // Locking and commit
    // ========================================================================

    pub async fn lock(&self, datastore: Datastore) -> Result<DomRpcResult> {
        self.invoke("lock", Some(input().with_child(datastore.selector("target"))))
            .await
    }

    pub async fn unlock(&self, datastore: Datastore) -> Result<DomRpcResult> {
        self.invoke("unlock", Some(input().with_child(datastore.selector("target"))))
            .await
    }

    pub async fn lock_candidate(&self) -> Result<DomRpcResult> {
        self.lock(Datastore::Candidate).await
    }

    pub async fn unlock_candidate(&self) -> Result<DomRpcResult> {
        self.unlock(Datastore::Candidate).await
    }

    pub async fn lock_running(&self) -> Result<DomRpcResult> {
        self.lock(Datastore::Running).await
    }

    pub async fn unlock_running(&self) -> Result<DomRpcResult> {
        self.unlock(Datastore::Running).await
    }

    pub async fn discard_changes(&self) -> Result<DomRpcResult> {
        self.invoke("discard-changes", None).await
    }

    pub async fn commit(&self) -> Result<DomRpcResult> {
        self.invoke("commit", Some(input())).await
    }

    pub async fn validate(&self, datastore: Datastore) -> Result<DomRpcResult> {
        self.invoke("validate", Some(input().with_child(datastore.selector("source"))))
            .await
    }

    pub async fn validate_candidate(&self) -> Result<DomRpcResult> {
        self.validate(Datastore::Candidate).await
    }

    pub async fn copy_config(&self, source: Datastore, target: Datastore) -> Result<DomRpcResult> {
        let payload = input()
            .with_child(target.selector("target"))
            .with_child(source.selector("source"));
        self.invoke("copy-config", Some(payload)).await
    }

    pub async fn copy_running_to_candidate(&self) -> Result<DomRpcResult> {
        self.copy_config(Datastore::Running, Datastore::Candidate).await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Filter for a path; the datastore root needs none
    fn path_filter(&self, path: Option<&Path>) -> Result<Option<TreeNode>> {
        match path {
            Some(path) if !path.is_empty() => self.structure.to_filter_structure(path).map(Some),
            _ => Ok(None),
        }
    }

    /// Filter for field paths relative to `path`
    fn fields_filter(&self, path: &Path, fields: &[Path]) -> Result<Option<TreeNode>> {
        if fields.is_empty() {
            return Err(Error::InvalidArgument("fields must not be empty".into()));
        }
        if path.is_empty() {
            if contains_empty_path(fields) {
                return Ok(None);
            }
            return self
                .structure
                .to_fields_filter_structure(&fields_from_root(fields))
                .map(Some);
        }
        self.structure
            .to_fields_filter_structure(&[FieldsFilter::new(path.clone(), fields.to_vec())])
            .map(Some)
    }

    async fn read(&self, source: Option<Datastore>, filter: Option<TreeNode>) -> Result<DomRpcResult> {
        let mut payload = input();
        let operation = match source {
            Some(datastore) => {
                payload.insert(datastore.selector("source"));
                "get-config"
            }
            None => "get",
        };
        if let Some(filter) = filter {
            payload.insert(filter);
        }
        self.invoke(operation, Some(payload)).await
    }

    /// `get` with an optional subtree filter for `path`
    pub async fn get(&self, path: Option<&Path>) -> Result<DomRpcResult> {
        let filter = self.path_filter(path)?;
        self.read(None, filter).await
    }

    /// `get` restricted to field paths below `path`
    pub async fn get_fields(&self, path: &Path, fields: &[Path]) -> Result<DomRpcResult> {
        let filter = self.fields_filter(path, fields)?;
        self.read(None, filter).await
    }

    pub async fn get_config(&self, datastore: Datastore, path: Option<&Path>) -> Result<DomRpcResult> {
        let filter = self.path_filter(path)?;
        self.read(Some(datastore), filter).await
    }

    pub async fn get_config_fields(&self, datastore: Datastore, path: &Path, fields: &[Path]) -> Result<DomRpcResult> {
        let filter = self.fields_filter(path, fields)?;
        self.read(Some(datastore), filter).await
    }

    /// Operational and config data at `path`, `None` when absent
    pub async fn get_data(&self, path: &Path, fields: Option<&[Path]>) -> Result<Option<TreeNode>> {
        let result = match fields {
            Some(fields) => self.get_fields(path, fields).await?,
            None => self.get(Some(path)).await?,
        };
        self.extract_data(path, result)
    }

    /// Running configuration at `path`, `None` when absent
    pub async fn get_config_running_data(&self, path: &Path, fields: Option<&[Path]>) -> Result<Option<TreeNode>> {
        let result = match fields {
            Some(fields) => self.get_config_fields(Datastore::Running, path, fields).await?,
            None => self.get_config(Datastore::Running, Some(path)).await?,
        };
        self.extract_data(path, result)
    }

    fn extract_data(&self, path: &Path, result: DomRpcResult) -> Result<Option<TreeNode>> {
        if !result.is_success() {
            return Err(Error::ReadFailed {
                path: path.to_string(),
                errors: result
                    .errors()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            });
        }
        let data = result
            .value()
            .and_then(|value| value.child_by_name(&netconf_qname("data")));
        match data {
            Some(data) => self.structure.select_from_data_structure(data, path),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// `edit-config` with a prepared `<config>` structure
    ///
    /// # Arguments
    /// * `datastore` - Target datastore
    /// * `config` - Structure from [`RpcStructureTransformer::create_edit_config_structure`]
    /// * `default_operation` - Merge, replace or none; omitted when `None`
    /// * `rollback` - Request `rollback-on-error`
    pub async fn edit_config(
        &self,
        datastore: Datastore,
        config: TreeNode,
        default_operation: Option<EditOperation>,
        rollback: bool,
    ) -> Result<DomRpcResult> {
        let mut payload = input().with_child(datastore.selector("target"));
        if let Some(operation) = default_operation {
            if !matches!(operation, EditOperation::Merge | EditOperation::Replace | EditOperation::None) {
                return Err(Error::InvalidArgument(format!(
                    "'{}' is not a default operation",
                    operation
                )));
            }
            payload.insert(TreeNode::leaf(netconf_qname("default-operation"), operation.xml_value()));
        }
        if rollback {
            payload.insert(TreeNode::leaf(netconf_qname("error-option"), "rollback-on-error"));
        }
        payload.insert(config);
        self.invoke("edit-config", Some(payload)).await
    }

    pub async fn edit_config_candidate(&self, config: TreeNode, rollback: bool) -> Result<DomRpcResult> {
        self.edit_config(Datastore::Candidate, config, None, rollback).await
    }

    pub async fn edit_config_running(&self, config: TreeNode, rollback: bool) -> Result<DomRpcResult> {
        self.edit_config(Datastore::Running, config, None, rollback).await
    }

    /// Several edits in one request, applied in the given order
    pub async fn edit_config_batch(
        &self,
        datastore: Datastore,
        entries: &[EditEntry],
        default_operation: Option<EditOperation>,
        rollback: bool,
    ) -> Result<DomRpcResult> {
        let config = self.structure.create_batched_edit_config_structure(entries)?;
        self.edit_config(datastore, config, default_operation, rollback).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::codec::{NetconfMessage, NetconfMessageTransformer, NetconfRpcStructureTransformer};
    use crate::rpc::{RequestSender, TransportError};
    use crate::schema::assemble;
    use crate::schema::base::{BaseSchema, NETCONF_BASE_NAMESPACE};
    use crate::source::{SchemaSource, SourceIdentifier};
    use crate::tree::NodeId;
    use crate::xml::XmlElement;

    const EXAMPLE: &str = r#"
        module example {
            namespace "urn:example";
            prefix ex;
            revision 2024-01-01;

            container c {
                leaf a { type string; }
                list item {
                    key "name";
                    leaf name { type string; }
                    leaf size { type uint32; }
                }
            }

            container d {
                leaf b { type string; }
            }
        }
    "#;

    /// Records requests and answers with a canned reply body
    struct RecordingSender {
        requests: Mutex<Vec<NetconfMessage>>,
        reply_body: String,
    }

    impl RecordingSender {
        fn new(reply_body: &str) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                reply_body: reply_body.to_string(),
            })
        }

        fn requests(&self) -> Vec<NetconfMessage> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RequestSender for RecordingSender {
        async fn send_request(&self, message: NetconfMessage) -> std::result::Result<NetconfMessage, TransportError> {
            let id = message.message_id().unwrap_or_default().to_string();
            self.requests.lock().unwrap().push(message);
            NetconfMessage::parse(&format!(
                r#"<rpc-reply xmlns="{}" message-id="{}">{}</rpc-reply>"#,
                NETCONF_BASE_NAMESPACE, id, self.reply_body
            ))
            .map_err(|e| TransportError::Failure(e.to_string()))
        }
    }

    fn q(name: &str) -> QName {
        QName::create("urn:example", name)
    }

    fn ops(sender: Arc<RecordingSender>) -> NetconfBaseOps {
        let id = SourceIdentifier::parse("example@2024-01-01").unwrap();
        let context = Arc::new(assemble(&[SchemaSource::yang(id, EXAMPLE)]).unwrap());
        let transformer = NetconfMessageTransformer::new(context.clone(), Arc::new(BaseSchema::new().unwrap()));
        NetconfBaseOps::new(
            DeviceRpc::new(Arc::new(transformer), sender),
            Arc::new(NetconfRpcStructureTransformer::new(context)),
        )
    }

    /// Operation element of a recorded request
    fn operation(message: &NetconfMessage) -> XmlElement {
        message.document().child_elements().next().unwrap().clone()
    }

    #[tokio::test]
    async fn test_repeated_operations_differ_only_in_message_id() {
        let sender = RecordingSender::new("<ok/>");
        let ops = ops(sender.clone());
        ops.lock_candidate().await.unwrap();
        ops.lock_candidate().await.unwrap();
        ops.commit().await.unwrap();
        ops.commit().await.unwrap();
        ops.discard_changes().await.unwrap();
        ops.discard_changes().await.unwrap();
        ops.validate_candidate().await.unwrap();
        ops.validate_candidate().await.unwrap();
        ops.unlock_candidate().await.unwrap();
        ops.unlock_candidate().await.unwrap();

        let requests = sender.requests();
        assert_eq!(requests.len(), 10);
        for pair in requests.chunks(2) {
            assert_ne!(pair[0].message_id(), pair[1].message_id());
            let first = pair[0].document().without_attribute(None, "message-id");
            let second = pair[1].document().without_attribute(None, "message-id");
            assert_eq!(first, second);
        }

        let lock = operation(&requests[0]);
        assert!(lock.is(NETCONF_BASE_NAMESPACE, "lock"));
        let target = lock.first_child(NETCONF_BASE_NAMESPACE, "target").unwrap();
        assert!(target.first_child(NETCONF_BASE_NAMESPACE, "candidate").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_config_candidate_replace() {
        let sender = RecordingSender::new("<ok/>");
        let ops = ops(sender.clone());
        let path = Path::new(vec![NodeId::new(q("c")), NodeId::new(q("a"))]);
        let config = ops
            .structure
            .create_edit_config_structure(Some(TreeNode::leaf(q("a"), "v")), &path, EditOperation::Replace)
            .unwrap();
        let result = ops.edit_config_candidate(config, false).await.unwrap();
        assert!(result.is_success());

        let expected = XmlElement::parse(
            r#"<edit-config xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"
                            xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0">
                 <target><candidate/></target>
                 <config><c xmlns="urn:example"><a nc:operation="replace">v</a></c></config>
               </edit-config>"#,
        )
        .unwrap();
        assert!(operation(&sender.requests()[0]).is_similar(&expected));
    }

    #[tokio::test]
    async fn test_edit_config_batch_keeps_order() {
        let sender = RecordingSender::new("<ok/>");
        let ops = ops(sender.clone());
        let item = Path::new(vec![
            NodeId::new(q("c")),
            NodeId::with_keys(q("item"), [(q("name"), Value::from("x"))]),
        ]);
        let payload = ContainerNode::new(NodeId::with_keys(q("item"), [(q("name"), Value::from("x"))]))
            .with_child(TreeNode::leaf(q("size"), 3u32));
        let entries = vec![
            EditEntry::delete(item.clone()),
            EditEntry::new(item, EditOperation::Create, Some(payload.into())).unwrap(),
        ];
        ops.edit_config_batch(Datastore::Running, &entries, Some(EditOperation::None), true)
            .await
            .unwrap();

        let edit = operation(&sender.requests()[0]);
        let names: Vec<&str> = edit.child_elements().map(XmlElement::name).collect();
        assert_eq!(names, ["target", "default-operation", "error-option", "config"]);
        assert_eq!(edit.first_child(NETCONF_BASE_NAMESPACE, "error-option").unwrap().text(), "rollback-on-error");

        let config = edit.first_child(NETCONF_BASE_NAMESPACE, "config").unwrap();
        let operations: Vec<Option<&str>> = config
            .child_elements()
            .map(|c| {
                c.first_child("urn:example", "item")
                    .and_then(|item| item.attribute(Some(NETCONF_BASE_NAMESPACE), "operation"))
            })
            .collect();
        assert_eq!(operations, [Some("delete"), Some("create")]);
    }

    #[tokio::test]
    async fn test_default_operation_is_checked() {
        let ops = ops(RecordingSender::new("<ok/>"));
        let config = TreeNode::opaque(XmlElement::new(NETCONF_BASE_NAMESPACE, "config"));
        let err = ops
            .edit_config(Datastore::Candidate, config, Some(EditOperation::Delete), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_get_data_selects_path() {
        let sender = RecordingSender::new(
            r#"<data><c xmlns="urn:example"><item><name>x</name><size>3</size></item></c></data>"#,
        );
        let ops = ops(sender.clone());
        let item = Path::new(vec![
            NodeId::new(q("c")),
            NodeId::with_keys(q("item"), [(q("name"), Value::from("x"))]),
        ]);
        let node = ops.get_config_running_data(&item, None).await.unwrap().unwrap();
        let TreeNode::Container(entry) = node else {
            panic!("expected a list entry");
        };
        assert!(matches!(entry.child_by_name(&q("size")), Some(TreeNode::Leaf(leaf)) if leaf.value() == &Value::Uint(3)));

        let request = operation(&sender.requests()[0]);
        assert!(request.is(NETCONF_BASE_NAMESPACE, "get-config"));
        let filter = request.first_child(NETCONF_BASE_NAMESPACE, "filter").unwrap();
        assert_eq!(filter.attribute(None, "type"), Some("subtree"));

        let missing = Path::new(vec![NodeId::new(q("d"))]);
        assert!(ops.get_data(&missing, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_errors_fail_data_reads() {
        let ops = ops(RecordingSender::new(
            "<rpc-error><error-type>protocol</error-type><error-tag>access-denied</error-tag>\
             <error-severity>error</error-severity></rpc-error>",
        ));
        let path = Path::new(vec![NodeId::new(q("c"))]);
        assert!(matches!(ops.get_data(&path, None).await, Err(Error::ReadFailed { .. })));
    }

    #[tokio::test]
    async fn test_fields_from_root() {
        let sender = RecordingSender::new("<data/>");
        let ops = ops(sender.clone());
        let fields = vec![
            Path::new(vec![NodeId::new(q("c")), NodeId::new(q("a"))]),
            Path::new(vec![NodeId::new(q("d"))]),
        ];
        ops.get_fields(&Path::root(), &fields).await.unwrap();
        let filter = operation(&sender.requests()[0])
            .first_child(NETCONF_BASE_NAMESPACE, "filter")
            .cloned()
            .unwrap();
        let roots: Vec<&str> = filter.child_elements().map(XmlElement::name).collect();
        assert_eq!(roots, ["c", "d"]);

        // An empty field path below the root reads everything
        ops.get_fields(&Path::root(), &[Path::root()]).await.unwrap();
        assert!(operation(&sender.requests()[1])
            .first_child(NETCONF_BASE_NAMESPACE, "filter")
            .is_none());

        assert!(matches!(
            ops.get_fields(&Path::root(), &[]).await,
            Err(Error::InvalidArgument(_))
        ));
    }
}
