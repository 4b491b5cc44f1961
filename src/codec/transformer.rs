//! Schema-aware message transformer
//!
//! Encodes rpc and action input and decodes replies and notifications with
//! the device's schema context. Base protocol operations and notifications
//! missing from the device context are looked up in the embedded base schema.

use std::sync::Arc;

use log::{debug, trace};

use super::{
    action_envelope, check_rpc_reply, has_ok, is_data_retrieval, is_rpc_error, notification_parts, reply_errors,
    rpc_envelope, ActionTransformer, DeviceNotification, DomRpcResult, ErrorInfo, MessageCounter, NetconfMessage,
    NotificationTransformer, RpcTransformer, SchemaCodec,
};
use crate::edit::PayloadEncoder;
use crate::error::{Error, Result};
use crate::qname::QName;
use crate::rpc::TransportError;
use crate::schema::base::{netconf_qname, BaseSchema, NETCONF_BASE_NAMESPACE};
use crate::schema::{find_data_child, ListSchema, OperationSchema, SchemaContext, SchemaNode};
use crate::tree::{ContainerNode, NodeId, OpaqueNode, Path, TreeNode, Value};
use crate::xml::XmlElement;

/// Transformer bound to one device schema context
#[derive(Debug)]
pub struct NetconfMessageTransformer {
    context: Arc<SchemaContext>,
    base: Arc<BaseSchema>,
    counter: MessageCounter,
    strict: bool,
}

impl NetconfMessageTransformer {
    /// Create a transformer with strict parsing enabled
    ///
    /// # Arguments
    /// * `context` - Assembled device schema
    /// * `base` - Embedded base schema used for base protocol operations
    pub fn new(context: Arc<SchemaContext>, base: Arc<BaseSchema>) -> Self {
        Self {
            context,
            base,
            counter: MessageCounter::new(),
            strict: true,
        }
    }

    /// Skip unknown elements instead of failing on them
    pub fn with_strict_parsing(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn context(&self) -> &Arc<SchemaContext> {
        &self.context
    }

    /// Rpc schema and the context that defines it
    fn operation(&self, rpc: &QName) -> Result<(&SchemaContext, &OperationSchema)> {
        if let Some(op) = self.context.rpc(rpc) {
            return Ok((self.context.as_ref(), op));
        }
        let base = self.base.context();
        base.rpc(rpc)
            .map(|op| (base.as_ref(), op))
            .ok_or_else(|| Error::UnknownRpc(rpc.to_string()))
    }

    fn action(&self, action: &[QName]) -> Result<&OperationSchema> {
        self.context
            .find_action(action)
            .ok_or_else(|| Error::UnknownAction(describe(action)))
    }

    fn operation_element(&self, codec: &SchemaCodec<'_>, op: &OperationSchema, payload: Option<&ContainerNode>) -> Result<XmlElement> {
        let mut element = XmlElement::new(op.qname.namespace(), op.qname.local_name());
        match payload {
            Some(payload) => {
                for child in codec.encode_children(&op.input, payload)? {
                    element.push_child(child);
                }
            }
            None if !op.input.is_empty() => return Err(Error::MissingPayload(op.qname.local_name().to_string())),
            None => {}
        }
        Ok(element)
    }

    /// Value of a reply without `error` severity errors
    fn decode_output(&self, ctx: &SchemaContext, op: &OperationSchema, reply: &XmlElement) -> Result<Option<ContainerNode>> {
        if is_data_retrieval(&op.qname) {
            let data = reply
                .first_child(NETCONF_BASE_NAMESPACE, "data")
                .cloned()
                .unwrap_or_else(|| XmlElement::new(NETCONF_BASE_NAMESPACE, "data"));
            let value = ContainerNode::new(netconf_qname("rpc-reply"))
                .with_child(OpaqueNode::new(netconf_qname("data"), data));
            return Ok(Some(value));
        }

        if has_ok(reply) {
            if !op.output.is_empty() {
                debug!("{} declares output but the device replied <ok/>", op.qname.local_name());
            }
            return Ok(None);
        }
        let content: Vec<&XmlElement> = reply.child_elements().filter(|e| !is_rpc_error(e)).collect();
        if content.is_empty() {
            return Ok(None);
        }
        if op.output.is_empty() {
            return Err(Error::MalformedMessage(format!(
                "unexpected content in reply to {}",
                op.qname.local_name()
            )));
        }
        let codec = SchemaCodec::new(ctx, self.strict);
        codec
            .decode_with(&op.output, content.into_iter(), op.qname.sibling("output"))
            .map(Some)
    }

    fn reply_result(
        &self,
        ctx: &SchemaContext,
        op: &OperationSchema,
        reply: std::result::Result<NetconfMessage, TransportError>,
    ) -> Result<DomRpcResult> {
        let message = match reply {
            Ok(message) => message,
            Err(e) => return Ok(DomRpcResult::failed(vec![ErrorInfo::transport(e.to_string())])),
        };
        trace!("Reply for {}: {}", op.qname.local_name(), message);
        check_rpc_reply(&message)?;
        let errors = reply_errors(message.document());
        if !errors.iter().all(ErrorInfo::is_warning) {
            return Ok(DomRpcResult::failed(errors));
        }
        let value = self.decode_output(ctx, op, message.document())?;
        Ok(DomRpcResult::new(value, errors))
    }

    /// Look for a notification nested below the data node `element`
    fn nested_notification(
        &self,
        codec: &SchemaCodec<'_>,
        schema: &SchemaNode,
        element: &XmlElement,
        instance: &mut Vec<NodeId>,
        schema_path: &mut Vec<QName>,
    ) -> Result<Option<(Vec<QName>, Path, ContainerNode)>> {
        let id = match schema {
            SchemaNode::List(list) => NodeId::with_keys(list.qname.clone(), entry_keys(list, element)?),
            other => NodeId::new(other.qname().clone()),
        };
        instance.push(id);
        schema_path.push(schema.qname().clone());

        for child in element.child_elements() {
            let name = QName::create(child.namespace().unwrap_or_default(), child.name());
            if let Some(notification) = schema.notifications().iter().find(|n| n.qname.matches(&name)) {
                let body = codec.decode_with(&notification.children, child.child_elements(), notification.qname.clone())?;
                let mut path = schema_path.clone();
                path.push(notification.qname.clone());
                return Ok(Some((path, Path::new(instance.clone()), body)));
            }
            if let Some(next @ (SchemaNode::Container(_) | SchemaNode::List(_))) = schema.data_child(&name) {
                if let Some(found) = self.nested_notification(codec, next, child, instance, schema_path)? {
                    return Ok(Some(found));
                }
            }
        }

        instance.pop();
        schema_path.pop();
        Ok(None)
    }
}

/// Key predicates of a list entry element
fn entry_keys(list: &ListSchema, element: &XmlElement) -> Result<Vec<(QName, Value)>> {
    list.keys
        .iter()
        .map(|key| {
            let missing = || Error::MissingListKey {
                list: list.qname.local_name().to_string(),
                key: key.local_name().to_string(),
            };
            let leaf = element.first_child(key.namespace(), key.local_name()).ok_or_else(missing)?;
            let text = leaf.text();
            let value = match find_data_child(&list.children, key) {
                Some(SchemaNode::Leaf(schema)) => schema.leaf_type.parse_value(&text).map_err(|reason| Error::InvalidValue {
                    leaf: key.local_name().to_string(),
                    value: text.clone(),
                    reason,
                })?,
                _ => Value::String(text),
            };
            Ok((key.clone(), value))
        })
        .collect()
}

fn describe(path: &[QName]) -> String {
    path.iter().map(|q| format!("/{}", q.local_name())).collect()
}

impl RpcTransformer for NetconfMessageTransformer {
    fn to_rpc_request(&self, rpc: &QName, payload: Option<&ContainerNode>) -> Result<NetconfMessage> {
        let (ctx, op) = self.operation(rpc)?;
        let codec = SchemaCodec::new(ctx, self.strict);
        let element = self.operation_element(&codec, op, payload)?;
        let message = rpc_envelope(&self.counter.next_id(), element);
        trace!("Request for {}: {}", rpc, message);
        Ok(message)
    }

    fn to_rpc_result(
        &self,
        reply: std::result::Result<NetconfMessage, TransportError>,
        rpc: &QName,
    ) -> Result<DomRpcResult> {
        let (ctx, op) = self.operation(rpc)?;
        self.reply_result(ctx, op, reply)
    }
}

impl ActionTransformer for NetconfMessageTransformer {
    fn to_action_request(
        &self,
        action: &[QName],
        target: &Path,
        payload: Option<&ContainerNode>,
    ) -> Result<NetconfMessage> {
        let op = self.action(action)?;
        let ancestors = &action[..action.len() - 1];
        let invalid = |reason: &str| Error::InvalidPath {
            path: target.to_string(),
            reason: reason.to_string(),
        };
        if target.len() != ancestors.len()
            || !target.iter().zip(ancestors).all(|(segment, name)| segment.name().matches(name))
        {
            return Err(invalid(&format!("does not lead to action {}", describe(action))));
        }
        let nodes = self.context.resolve_path(target)?;
        for (node, segment) in nodes.iter().zip(target) {
            if matches!(node, SchemaNode::List(_)) && !segment.has_keys() {
                return Err(invalid(&format!("list {} needs key values", segment)));
            }
        }

        let codec = SchemaCodec::new(&self.context, self.strict);
        let mut wrappers = Vec::with_capacity(target.len());
        for depth in 1..=target.len() {
            wrappers.push(codec.ancestor(&Path::new(target.segments()[..depth].to_vec()))?);
        }
        let element = self.operation_element(&codec, op, payload)?;
        let message = rpc_envelope(&self.counter.next_id(), action_envelope(wrappers, element));
        trace!("Action request {}: {}", describe(action), message);
        Ok(message)
    }

    fn to_action_result(
        &self,
        action: &[QName],
        reply: std::result::Result<NetconfMessage, TransportError>,
    ) -> Result<DomRpcResult> {
        let op = self.action(action)?;
        self.reply_result(&self.context, op, reply)
    }
}

impl NotificationTransformer for NetconfMessageTransformer {
    fn to_notification(&self, message: &NetconfMessage) -> Result<DeviceNotification> {
        let (event_time, body) = notification_parts(message)?;
        let name = QName::create(body.namespace().unwrap_or_default(), body.name());

        for ctx in [self.context.as_ref(), self.base.context().as_ref()] {
            if let Some(schema) = ctx.notification(&name) {
                let codec = SchemaCodec::new(ctx, self.strict);
                let content = codec.decode_with(&schema.children, body.child_elements(), schema.qname.clone())?;
                return Ok(DeviceNotification::new(event_time, vec![schema.qname.clone()], None, content));
            }
        }

        let schema = self
            .context
            .data_child(&name)
            .ok_or_else(|| Error::UnknownNotification(name.to_string()))?;
        let codec = SchemaCodec::new(&self.context, self.strict);
        match self.nested_notification(&codec, schema, body, &mut Vec::new(), &mut Vec::new())? {
            Some((schema_path, instance, content)) => {
                Ok(DeviceNotification::new(event_time, schema_path, Some(instance), content))
            }
            None => Err(Error::UnknownNotification(name.to_string())),
        }
    }
}
