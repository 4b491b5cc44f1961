//! Remote schema sources through ietf-netconf-monitoring
//!
//! [`MonitoringSourceProvider`] downloads module text with `get-schema`.
//! [`NetconfStateSchemas`] lists what the device offers under
//! `netconf-state/schemas`.

use std::collections::BTreeSet;

use async_trait::async_trait;
use log::{debug, trace};

use crate::base_ops::NetconfBaseOps;
use crate::capability::MONITORING_NAMESPACE;
use crate::error::Result;
use crate::qname::Revision;
use crate::rpc::DeviceRpc;
use crate::schema::base::monitoring_qname;
use crate::source::{
    ProvidedSources, SchemaSource, SchemaSourceProvider, SourceFetchError, SourceIdentifier, SourceKind,
};
use crate::tree::{ContainerNode, NodeId, Path, TreeNode, Value};
use crate::xml::XmlElement;

/// Provider name reported for sources offered by the device
pub const MONITORING_PROVIDER: &str = "netconf-monitoring";

/// `get-schema` input for one module in YANG format
pub fn get_schema_request(identifier: &str, version: Option<&Revision>) -> ContainerNode {
    let mut input = ContainerNode::new(monitoring_qname("input"))
        .with_child(TreeNode::leaf(monitoring_qname("identifier"), identifier));
    if let Some(version) = version {
        input.insert(TreeNode::leaf(monitoring_qname("version"), version.as_str()));
    }
    input.with_child(TreeNode::leaf(monitoring_qname("format"), "yang"))
}

/// Schema source provider backed by the device's `get-schema` operation
#[derive(Clone)]
pub struct MonitoringSourceProvider {
    device: String,
    rpc: DeviceRpc,
}

impl MonitoringSourceProvider {
    pub fn new(device: impl Into<String>, rpc: DeviceRpc) -> Self {
        Self {
            device: device.into(),
            rpc,
        }
    }
}

/// Module text carried in the `data` element of a `get-schema` reply
fn schema_text(output: &ContainerNode) -> Option<String> {
    match output.child_by_name(&monitoring_qname("data"))? {
        TreeNode::Opaque(opaque) => Some(opaque.body().text()),
        TreeNode::Leaf(leaf) => Some(leaf.value().to_text()),
        _ => None,
    }
}

#[async_trait]
impl SchemaSourceProvider for MonitoringSourceProvider {
    async fn get_source(&self, id: &SourceIdentifier) -> std::result::Result<SchemaSource, SourceFetchError> {
        debug!("{}: downloading schema {}", self.device, id);
        let failed = |reason: String| SourceFetchError::Failed {
            id: id.clone(),
            reason,
        };
        let request = get_schema_request(id.name(), id.revision());
        let result = self
            .rpc
            .invoke_rpc(&monitoring_qname("get-schema"), Some(&request))
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !result.is_success() {
            // RFC 6022: an unknown schema is reported as invalid-value
            if result.errors().iter().any(|e| e.tag == "invalid-value") {
                return Err(SourceFetchError::NotFound(id.clone()));
            }
            let reasons: Vec<String> = result.errors().iter().map(ToString::to_string).collect();
            return Err(failed(reasons.join("; ")));
        }

        let text = result
            .value()
            .and_then(schema_text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| failed("reply carries no schema text".into()))?;
        trace!("{}: schema {} is {} bytes", self.device, id, text.len());
        Ok(SchemaSource::yang(id.clone(), text))
    }
}

// ============================================================================
// netconf-state/schemas
// ============================================================================

/// One YANG-format entry of `netconf-state/schemas`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSchema {
    id: SourceIdentifier,
    namespace: String,
}

impl RemoteSchema {
    pub fn id(&self) -> &SourceIdentifier {
        &self.id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

fn is_yang_format(format: &str) -> bool {
    format == "yang" || format.ends_with(":yang")
}

fn remote_schema(identifier: &str, version: &str, format: &str, namespace: &str) -> Option<RemoteSchema> {
    if !is_yang_format(format.trim()) {
        trace!("Skipping schema {} in format {}", identifier, format);
        return None;
    }
    let version = version.trim();
    let revision = if version.is_empty() {
        None
    } else {
        match Revision::parse(version) {
            Ok(revision) => Some(revision),
            Err(_) => {
                debug!("Skipping schema {} with version {}", identifier, version);
                return None;
            }
        }
    };
    Some(RemoteSchema {
        id: SourceIdentifier::new(identifier.trim(), revision),
        namespace: namespace.trim().to_string(),
    })
}

/// Schemas the device offers for download
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetconfStateSchemas {
    schemas: Vec<RemoteSchema>,
}

impl NetconfStateSchemas {
    fn path() -> Path {
        Path::new(vec![
            NodeId::new(monitoring_qname("netconf-state")),
            NodeId::new(monitoring_qname("schemas")),
        ])
    }

    /// Read `netconf-state/schemas` from the device
    ///
    /// A device without the container yields an empty listing.
    pub async fn fetch(ops: &NetconfBaseOps) -> Result<Self> {
        let schemas = match ops.get_data(&Self::path(), None).await? {
            Some(node) => Self::from_node(&node),
            None => Self::default(),
        };
        debug!("Device lists {} YANG schemas", schemas.schemas.len());
        Ok(schemas)
    }

    /// Listing from a selected `schemas` node, decoded or opaque
    pub fn from_node(node: &TreeNode) -> Self {
        let schemas = match node {
            TreeNode::Container(container) => Self::from_container(container),
            TreeNode::Opaque(opaque) => Self::from_xml(opaque.body()),
            _ => Vec::new(),
        };
        Self { schemas }
    }

    fn from_container(schemas: &ContainerNode) -> Vec<RemoteSchema> {
        let Some(TreeNode::List(list)) = schemas.child_by_name(&monitoring_qname("schema")) else {
            return Vec::new();
        };
        let text = |entry: &ContainerNode, name: &str| match entry.child_by_name(&monitoring_qname(name)) {
            Some(TreeNode::Leaf(leaf)) => leaf.value().to_text(),
            _ => entry
                .id()
                .key_value(&monitoring_qname(name))
                .map(Value::to_text)
                .unwrap_or_default(),
        };
        list.entries()
            .iter()
            .filter_map(|entry| {
                remote_schema(
                    &text(entry, "identifier"),
                    &text(entry, "version"),
                    &text(entry, "format"),
                    &text(entry, "namespace"),
                )
            })
            .collect()
    }

    fn from_xml(schemas: &XmlElement) -> Vec<RemoteSchema> {
        let text = |entry: &XmlElement, name: &str| {
            entry
                .first_child(MONITORING_NAMESPACE, name)
                .map(XmlElement::text)
                .unwrap_or_default()
        };
        schemas
            .child_elements()
            .filter(|e| e.is(MONITORING_NAMESPACE, "schema"))
            .filter_map(|entry| {
                remote_schema(
                    &text(entry, "identifier"),
                    &text(entry, "version"),
                    &text(entry, "format"),
                    &text(entry, "namespace"),
                )
            })
            .collect()
    }

    pub fn schemas(&self) -> &[RemoteSchema] {
        &self.schemas
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn source_identifiers(&self) -> BTreeSet<SourceIdentifier> {
        self.schemas.iter().map(|s| s.id.clone()).collect()
    }

    pub fn into_provided_sources(self) -> ProvidedSources {
        ProvidedSources::new(
            SourceKind::YangText,
            MONITORING_PROVIDER,
            self.schemas.into_iter().map(|s| s.id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::codec::{NetconfMessage, NetconfMessageTransformer, NetconfRpcStructureTransformer};
    use crate::rpc::{RequestSender, TransportError};
    use crate::schema::base::{BaseSchema, NETCONF_BASE_NAMESPACE};

    /// Replies with a fixed body and remembers the last request
    struct CannedSender {
        body: String,
        last: std::sync::Mutex<Option<NetconfMessage>>,
    }

    impl CannedSender {
        fn new(body: &str) -> Arc<Self> {
            Arc::new(Self {
                body: body.to_string(),
                last: std::sync::Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl RequestSender for CannedSender {
        async fn send_request(&self, message: NetconfMessage) -> std::result::Result<NetconfMessage, TransportError> {
            *self.last.lock().unwrap() = Some(message);
            NetconfMessage::parse(&format!(
                r#"<rpc-reply xmlns="{}" message-id="m-1">{}</rpc-reply>"#,
                NETCONF_BASE_NAMESPACE, self.body
            ))
            .map_err(|e| TransportError::Failure(e.to_string()))
        }
    }

    fn rpc(sender: Arc<CannedSender>) -> DeviceRpc {
        let base = Arc::new(BaseSchema::new().unwrap());
        let transformer = NetconfMessageTransformer::new(base.context().clone(), base);
        DeviceRpc::new(Arc::new(transformer), sender)
    }

    fn id(name: &str, revision: Option<&str>) -> SourceIdentifier {
        SourceIdentifier::new(name, revision.map(|r| Revision::parse(r).unwrap()))
    }

    #[tokio::test]
    async fn test_get_schema_downloads_text() {
        let sender = CannedSender::new(&format!(
            r#"<data xmlns="{}">module foo {{ namespace "urn:foo"; prefix f; }}</data>"#,
            MONITORING_NAMESPACE
        ));
        let provider = MonitoringSourceProvider::new("dev1", rpc(sender.clone()));
        let source = provider.get_source(&id("foo", Some("2020-01-01"))).await.unwrap();
        assert!(source.text().starts_with("module foo"));
        assert_eq!(source.id(), &id("foo", Some("2020-01-01")));

        let request = sender.last.lock().unwrap().clone().unwrap();
        let get_schema = request.document().first_child(MONITORING_NAMESPACE, "get-schema").unwrap();
        assert_eq!(get_schema.first_child(MONITORING_NAMESPACE, "identifier").unwrap().text(), "foo");
        assert_eq!(get_schema.first_child(MONITORING_NAMESPACE, "version").unwrap().text(), "2020-01-01");
        assert_eq!(get_schema.first_child(MONITORING_NAMESPACE, "format").unwrap().text(), "yang");
    }

    #[tokio::test]
    async fn test_get_schema_errors() {
        let missing = MonitoringSourceProvider::new(
            "dev1",
            rpc(CannedSender::new(
                "<rpc-error><error-type>application</error-type><error-tag>invalid-value</error-tag>\
                 <error-severity>error</error-severity></rpc-error>",
            )),
        );
        assert!(matches!(
            missing.get_source(&id("foo", None)).await,
            Err(SourceFetchError::NotFound(_))
        ));

        let empty = MonitoringSourceProvider::new(
            "dev1",
            rpc(CannedSender::new(&format!(r#"<data xmlns="{}"/>"#, MONITORING_NAMESPACE))),
        );
        assert!(matches!(
            empty.get_source(&id("foo", None)).await,
            Err(SourceFetchError::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn test_netconf_state_schemas() {
        let sender = CannedSender::new(&format!(
            r#"<data>
                 <netconf-state xmlns="{ns}">
                   <schemas>
                     <schema><identifier>foo</identifier><version>2020-01-01</version>
                       <format>ncm:yang</format><namespace>urn:foo</namespace><location>NETCONF</location></schema>
                     <schema><identifier>bar</identifier><version></version>
                       <format>yang</format><namespace>urn:bar</namespace></schema>
                     <schema><identifier>baz</identifier><version>2020-01-01</version>
                       <format>yin</format><namespace>urn:baz</namespace></schema>
                   </schemas>
                 </netconf-state>
               </data>"#,
            ns = MONITORING_NAMESPACE
        ));
        let base = BaseSchema::new().unwrap();
        let ops = NetconfBaseOps::new(
            rpc(sender),
            Arc::new(NetconfRpcStructureTransformer::new(base.context().clone()).with_strict_parsing(false)),
        );
        let schemas = NetconfStateSchemas::fetch(&ops).await.unwrap();
        let ids: Vec<&SourceIdentifier> = schemas.schemas().iter().map(RemoteSchema::id).collect();
        assert_eq!(ids, [&id("foo", Some("2020-01-01")), &id("bar", None)]);
        assert_eq!(schemas.schemas()[0].namespace(), "urn:foo");

        let provided = schemas.into_provided_sources();
        assert_eq!(provided.provider(), MONITORING_PROVIDER);
        assert_eq!(provided.sources().len(), 2);
    }

    #[test]
    fn test_opaque_listing() {
        let xml = XmlElement::parse(&format!(
            r#"<schemas xmlns="{}"><schema><identifier>foo</identifier><version>2021-02-03</version>
               <format>yang</format><namespace>urn:foo</namespace></schema></schemas>"#,
            MONITORING_NAMESPACE
        ))
        .unwrap();
        let schemas = NetconfStateSchemas::from_node(&TreeNode::opaque(xml));
        assert_eq!(
            schemas.source_identifiers().into_iter().collect::<Vec<_>>(),
            [id("foo", Some("2021-02-03"))]
        );
    }
}
