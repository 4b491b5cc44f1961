//! Schema-agnostic message transformer
//!
//! Payloads travel as opaque XML. Usable before schema resolution completes
//! and for devices that expose no schemas at all.

use log::trace;

use super::{
    action_envelope, check_rpc_reply, has_ok, is_rpc_error, notification_parts, reply_errors, rpc_envelope,
    ActionTransformer, DeviceNotification, DomRpcResult, ErrorInfo, MessageCounter, NetconfMessage,
    NotificationTransformer, RpcTransformer,
};
use crate::edit::{identifier_element, PayloadEncoder};
use crate::error::{Error, Result};
use crate::qname::QName;
use crate::rpc::TransportError;
use crate::schema::base::netconf_qname;
use crate::tree::{ContainerNode, Path, TreeNode, Value};
use crate::xml::XmlElement;

/// Write a tree node as XML without consulting a schema
pub(crate) fn write_structural(node: &TreeNode) -> Vec<XmlElement> {
    match node {
        TreeNode::Container(container) => vec![write_container(container)],
        TreeNode::List(list) => list.entries().iter().map(write_container).collect(),
        TreeNode::LeafList(values) => values
            .values()
            .iter()
            .map(|value| text_element(values.id().name(), value))
            .collect(),
        TreeNode::Leaf(leaf) => vec![text_element(leaf.id().name(), leaf.value())],
        TreeNode::Opaque(opaque) => vec![opaque.body().clone()],
    }
}

fn write_container(container: &ContainerNode) -> XmlElement {
    let name = container.id().name();
    let mut element = XmlElement::new(name.namespace(), name.local_name());
    for (key, value) in container.id().keys() {
        if container.child_by_name(key).is_none() {
            element.push_child(text_element(key, value));
        }
    }
    for child in container.children() {
        for written in write_structural(child) {
            element.push_child(written);
        }
    }
    element
}

fn text_element(name: &QName, value: &Value) -> XmlElement {
    let element = XmlElement::new(name.namespace(), name.local_name());
    match value {
        Value::Empty => element,
        other => element.with_text(other.to_text()),
    }
}

/// Payload encoder for edits built without a schema
///
/// Paths are not validated and every node may be written without data.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StructuralEncoder;

impl PayloadEncoder for StructuralEncoder {
    fn check_path(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn is_presence_only(&self, _path: &Path) -> bool {
        true
    }

    fn encode(&self, node: &TreeNode, _path: &Path) -> Result<Vec<XmlElement>> {
        Ok(write_structural(node))
    }

    fn ancestor(&self, path: &Path) -> Result<XmlElement> {
        path.last().map(identifier_element).ok_or_else(|| Error::InvalidPath {
            path: path.to_string(),
            reason: "empty path".into(),
        })
    }
}

/// Reply content as an `rpc-reply` container of opaque children
fn opaque_result(reply: std::result::Result<NetconfMessage, TransportError>) -> Result<DomRpcResult> {
    let message = match reply {
        Ok(message) => message,
        Err(e) => return Ok(DomRpcResult::failed(vec![ErrorInfo::transport(e.to_string())])),
    };
    check_rpc_reply(&message)?;
    let document = message.document();
    let errors = reply_errors(document);
    if !errors.iter().all(ErrorInfo::is_warning) {
        return Ok(DomRpcResult::failed(errors));
    }
    if has_ok(document) {
        return Ok(DomRpcResult::new(None, errors));
    }
    let content: Vec<&XmlElement> = document.child_elements().filter(|e| !is_rpc_error(e)).collect();
    if content.is_empty() {
        return Ok(DomRpcResult::new(None, errors));
    }
    let mut value = ContainerNode::new(netconf_qname("rpc-reply"));
    for element in content {
        value.insert(TreeNode::opaque(element.clone()));
    }
    Ok(DomRpcResult::new(Some(value), errors))
}

/// Operation element for `name` with the payload written structurally
///
/// A payload holding exactly one opaque node that already is the operation
/// element is passed through unchanged.
fn operation_element(name: &QName, payload: Option<&ContainerNode>) -> XmlElement {
    let mut element = XmlElement::new(name.namespace(), name.local_name());
    let Some(payload) = payload else {
        return element;
    };
    if payload.len() == 1 {
        if let Some(TreeNode::Opaque(opaque)) = payload.children().next() {
            if opaque.body().is(name.namespace(), name.local_name()) {
                return opaque.body().clone();
            }
        }
    }
    for child in payload.children() {
        for written in write_structural(child) {
            element.push_child(written);
        }
    }
    element
}

/// Transformer passing payloads through as opaque XML
#[derive(Debug, Default)]
pub struct SchemalessMessageTransformer {
    counter: MessageCounter,
}

impl SchemalessMessageTransformer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RpcTransformer for SchemalessMessageTransformer {
    fn to_rpc_request(&self, rpc: &QName, payload: Option<&ContainerNode>) -> Result<NetconfMessage> {
        let message = rpc_envelope(&self.counter.next_id(), operation_element(rpc, payload));
        trace!("Schemaless request for {}: {}", rpc, message);
        Ok(message)
    }

    fn to_rpc_result(
        &self,
        reply: std::result::Result<NetconfMessage, TransportError>,
        _rpc: &QName,
    ) -> Result<DomRpcResult> {
        opaque_result(reply)
    }
}

impl ActionTransformer for SchemalessMessageTransformer {
    fn to_action_request(
        &self,
        action: &[QName],
        target: &Path,
        payload: Option<&ContainerNode>,
    ) -> Result<NetconfMessage> {
        let name = action
            .last()
            .ok_or_else(|| Error::UnknownAction("empty action path".into()))?;
        if target.is_empty() {
            return Err(Error::InvalidPath {
                path: target.to_string(),
                reason: "an action needs a target node".into(),
            });
        }
        let ancestors = target.iter().map(identifier_element).collect();
        let wrapper = action_envelope(ancestors, operation_element(name, payload));
        Ok(rpc_envelope(&self.counter.next_id(), wrapper))
    }

    fn to_action_result(
        &self,
        _action: &[QName],
        reply: std::result::Result<NetconfMessage, TransportError>,
    ) -> Result<DomRpcResult> {
        opaque_result(reply)
    }
}

impl NotificationTransformer for SchemalessMessageTransformer {
    fn to_notification(&self, message: &NetconfMessage) -> Result<DeviceNotification> {
        let (event_time, body) = notification_parts(message)?;
        let name = QName::create(body.namespace().unwrap_or_default(), body.name());
        let content = ContainerNode::new(name.clone()).with_child(TreeNode::opaque(body.clone()));
        Ok(DeviceNotification::new(event_time, vec![name], None, content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ErrorType;
    use crate::schema::base::YANG_1_NAMESPACE;
    use crate::tree::NodeId;

    fn q(name: &str) -> QName {
        QName::create("urn:test", name)
    }

    #[test]
    fn test_opaque_payload_passes_through() {
        let transformer = SchemalessMessageTransformer::new();
        let body = XmlElement::parse(r#"<reboot xmlns="urn:test"><delay>5</delay><![CDATA[ raw ]]></reboot>"#).unwrap();
        let payload = ContainerNode::new(q("input")).with_child(TreeNode::opaque(body.clone()));

        let request = transformer.to_rpc_request(&q("reboot"), Some(&payload)).unwrap();
        assert_eq!(request.message_id(), Some("m-1"));
        assert_eq!(request.document().first_child("urn:test", "reboot"), Some(&body));

        let next = transformer.to_rpc_request(&q("reboot"), None).unwrap();
        assert_eq!(next.message_id(), Some("m-2"));
    }

    #[test]
    fn test_reply_content_is_opaque() {
        let transformer = SchemalessMessageTransformer::new();
        let reply = NetconfMessage::parse(
            r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="m-1">
                 <data><top xmlns="urn:test"><leaf>v</leaf></top></data>
               </rpc-reply>"#,
        )
        .unwrap();
        let result = transformer.to_rpc_result(Ok(reply), &netconf_qname("get")).unwrap();
        let value = result.value().unwrap();
        let data = value.child_by_name(&netconf_qname("data")).and_then(TreeNode::as_opaque).unwrap();
        assert!(data.body().first_child("urn:test", "top").is_some());

        let ok = NetconfMessage::parse(r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><ok/></rpc-reply>"#)
            .unwrap();
        let result = transformer.to_rpc_result(Ok(ok), &netconf_qname("lock")).unwrap();
        assert!(result.value().is_none());
        assert!(result.errors().is_empty());
    }

    #[test]
    fn test_transport_failure_becomes_error_info() {
        let transformer = SchemalessMessageTransformer::new();
        let result = transformer
            .to_rpc_result(Err(TransportError::SessionClosed), &netconf_qname("get"))
            .unwrap();
        assert!(!result.is_success());
        assert_eq!(result.errors()[0].error_type, ErrorType::Transport);
    }

    #[test]
    fn test_structural_action_framing() {
        let transformer = SchemalessMessageTransformer::new();
        let target = Path::new(vec![
            NodeId::new(q("top")),
            NodeId::with_keys(q("item"), [(q("name"), Value::from("a"))]),
        ]);
        let payload = ContainerNode::new(q("input")).with_child(TreeNode::leaf(q("delay"), 3u32));
        let request = transformer
            .to_action_request(&[q("top"), q("item"), q("reset")], &target, Some(&payload))
            .unwrap();

        let action = request.document().first_child(YANG_1_NAMESPACE, "action").unwrap();
        let item = action
            .first_child("urn:test", "top")
            .and_then(|top| top.first_child("urn:test", "item"))
            .unwrap();
        assert_eq!(item.first_child("urn:test", "name").unwrap().text(), "a");
        let reset = item.first_child("urn:test", "reset").unwrap();
        assert_eq!(reset.first_child("urn:test", "delay").unwrap().text(), "3");
    }

    #[test]
    fn test_notification_body_is_opaque() {
        let transformer = SchemalessMessageTransformer::new();
        let message = NetconfMessage::parse(
            r#"<notification xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0">
                 <eventTime>2024-05-01T10:00:00Z</eventTime>
                 <alarm xmlns="urn:test"><severity>major</severity></alarm>
               </notification>"#,
        )
        .unwrap();
        let notification = transformer.to_notification(&message).unwrap();
        assert_eq!(notification.event_time(), "2024-05-01T10:00:00Z");
        assert_eq!(notification.name(), Some(&q("alarm")));
        assert!(matches!(notification.body().child_by_name(&q("alarm")), Some(TreeNode::Opaque(_))));

        let no_time = NetconfMessage::parse(
            r#"<notification xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0"><alarm xmlns="urn:test"/></notification>"#,
        )
        .unwrap();
        assert!(transformer.to_notification(&no_time).is_err());
    }
}
