//! Message transformation
//!
//! Envelopes, structured protocol errors, the per-session correlation
//! counter, and the transformer traits. Two implementations exist: the
//! schema-aware [`NetconfMessageTransformer`] and the opaque pass-through
//! [`SchemalessMessageTransformer`].

mod normalized;
mod schemaless;
mod structure;
mod transformer;

pub use schemaless::SchemalessMessageTransformer;
pub use structure::{NetconfRpcStructureTransformer, SchemalessRpcStructureTransformer};
pub use transformer::NetconfMessageTransformer;

pub(crate) use normalized::SchemaCodec;
pub(crate) use schemaless::StructuralEncoder;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::edit::{EditEntry, EditOperation};
use crate::error::{Error, Result};
use crate::filter::FieldsFilter;
use crate::qname::QName;
use crate::rpc::TransportError;
use crate::schema::base::{NETCONF_BASE_NAMESPACE, NOTIFICATION_NAMESPACE, YANG_1_NAMESPACE};
use crate::tree::{ContainerNode, Path, TreeNode};
use crate::xml::XmlElement;

// ============================================================================
// Envelope
// ============================================================================

/// One protocol message: rpc, rpc-reply or notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetconfMessage {
    document: XmlElement,
}

impl NetconfMessage {
    pub fn new(document: XmlElement) -> Self {
        Self { document }
    }

    /// Parse a message from its wire text
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self::new(XmlElement::parse(text)?))
    }

    pub fn document(&self) -> &XmlElement {
        &self.document
    }

    pub fn into_document(self) -> XmlElement {
        self.document
    }

    pub fn to_xml(&self) -> String {
        self.document.to_xml()
    }

    /// Correlation id of an rpc or rpc-reply
    pub fn message_id(&self) -> Option<&str> {
        self.document.attribute(None, "message-id")
    }

    pub fn is_rpc_reply(&self) -> bool {
        self.document.is(NETCONF_BASE_NAMESPACE, "rpc-reply")
    }

    pub fn is_notification(&self) -> bool {
        self.document.is(NOTIFICATION_NAMESPACE, "notification")
    }
}

impl fmt::Display for NetconfMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

/// Session-scoped source of request correlation ids
#[derive(Debug, Default)]
pub struct MessageCounter {
    next: AtomicU64,
}

impl MessageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id; ids repeat only once the u64 range is exhausted
    pub fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        format!("m-{}", n)
    }
}

/// `<rpc>` envelope around an operation element
pub(crate) fn rpc_envelope(message_id: &str, operation: XmlElement) -> NetconfMessage {
    let rpc = XmlElement::new(NETCONF_BASE_NAMESPACE, "rpc")
        .with_attribute(None, "message-id", message_id)
        .with_child(operation);
    NetconfMessage::new(rpc)
}

/// Fail unless the message is an `<rpc-reply>`
pub(crate) fn check_rpc_reply(message: &NetconfMessage) -> Result<()> {
    if message.is_rpc_reply() {
        Ok(())
    } else {
        Err(Error::MalformedMessage(format!(
            "expected rpc-reply, got '{}'",
            message.document().name()
        )))
    }
}

pub(crate) fn has_ok(reply: &XmlElement) -> bool {
    reply.first_child(NETCONF_BASE_NAMESPACE, "ok").is_some()
}

pub(crate) fn is_rpc_error(element: &XmlElement) -> bool {
    element.is(NETCONF_BASE_NAMESPACE, "rpc-error")
}

/// `<action>` wrapper around the ancestor chain of an action element
///
/// `ancestors` run from the top-level node down to the action's parent.
pub(crate) fn action_envelope(ancestors: Vec<XmlElement>, action: XmlElement) -> XmlElement {
    let mut element = action;
    for mut parent in ancestors.into_iter().rev() {
        parent.push_child(element);
        element = parent;
    }
    XmlElement::new(YANG_1_NAMESPACE, "action").with_child(element)
}

/// Split a notification into its `eventTime` text and its body element
pub(crate) fn notification_parts(message: &NetconfMessage) -> Result<(String, &XmlElement)> {
    if !message.is_notification() {
        return Err(Error::MalformedMessage(format!(
            "expected notification, got '{}'",
            message.document().name()
        )));
    }
    let document = message.document();
    let event_time = document
        .first_child(NOTIFICATION_NAMESPACE, "eventTime")
        .map(|e| e.text().trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| Error::MalformedMessage("notification without eventTime".into()))?;

    let mut bodies = document
        .child_elements()
        .filter(|e| !e.is(NOTIFICATION_NAMESPACE, "eventTime"));
    match (bodies.next(), bodies.next()) {
        (Some(body), None) => Ok((event_time, body)),
        (None, _) => Err(Error::MalformedMessage("notification without content".into())),
        (Some(_), Some(_)) => Err(Error::MalformedMessage(
            "notification with more than one content element".into(),
        )),
    }
}

/// `get` and `get-config` replies keep their data opaque
pub(crate) fn is_data_retrieval(rpc: &QName) -> bool {
    rpc.namespace() == NETCONF_BASE_NAMESPACE && matches!(rpc.local_name(), "get" | "get-config")
}

// ============================================================================
// Errors reported by the device
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Transport,
    Rpc,
    Protocol,
    Application,
}

impl ErrorType {
    fn parse(text: &str) -> Self {
        match text {
            "transport" => ErrorType::Transport,
            "rpc" => ErrorType::Rpc,
            "protocol" => ErrorType::Protocol,
            _ => ErrorType::Application,
        }
    }
}

/// One `<rpc-error>` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ErrorInfo {
    pub severity: ErrorSeverity,
    pub error_type: ErrorType,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Serialized content of `<error-info>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

/// Name used by callers that think in rpc terms
pub type RpcError = ErrorInfo;

impl ErrorInfo {
    /// Read an `<rpc-error>` element
    pub fn from_element(element: &XmlElement) -> Self {
        let text = |name: &str| {
            element
                .first_child_named(name)
                .map(|child| child.text().trim().to_string())
                .filter(|text| !text.is_empty())
        };
        let severity = match text("error-severity").as_deref() {
            Some("warning") => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        };
        let info = element
            .first_child_named("error-info")
            .filter(|info| !info.is_empty())
            .map(|info| {
                if info.has_child_elements() {
                    info.child_elements().map(XmlElement::to_xml).collect()
                } else {
                    info.text().trim().to_string()
                }
            });
        Self {
            severity,
            error_type: ErrorType::parse(text("error-type").as_deref().unwrap_or_default()),
            tag: text("error-tag").unwrap_or_else(|| "operation-failed".into()),
            app_tag: text("error-app-tag"),
            path: text("error-path"),
            message: text("error-message"),
            info,
        }
    }

    /// Failure of the transport itself, not reported by the device
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            severity: ErrorSeverity::Error,
            error_type: ErrorType::Transport,
            tag: "operation-failed".into(),
            app_tag: None,
            path: None,
            message: Some(message.into()),
            info: None,
        }
    }

    pub fn is_warning(&self) -> bool {
        self.severity == ErrorSeverity::Warning
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.error_type, self.tag)?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

/// All `<rpc-error>` children of a reply
pub fn reply_errors(reply: &XmlElement) -> Vec<ErrorInfo> {
    reply
        .child_elements()
        .filter(|e| is_rpc_error(e))
        .map(ErrorInfo::from_element)
        .collect()
}

// ============================================================================
// Results
// ============================================================================

/// Decoded reply: an optional output tree plus the reported errors
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DomRpcResult {
    value: Option<ContainerNode>,
    errors: Vec<ErrorInfo>,
}

impl DomRpcResult {
    pub fn new(value: Option<ContainerNode>, errors: Vec<ErrorInfo>) -> Self {
        Self { value, errors }
    }

    pub fn success(value: Option<ContainerNode>) -> Self {
        Self::new(value, Vec::new())
    }

    pub fn failed(errors: Vec<ErrorInfo>) -> Self {
        Self::new(None, errors)
    }

    pub fn value(&self) -> Option<&ContainerNode> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<ContainerNode> {
        self.value
    }

    pub fn errors(&self) -> &[ErrorInfo] {
        &self.errors
    }

    /// No error with severity `error` was reported
    pub fn is_success(&self) -> bool {
        self.errors.iter().all(ErrorInfo::is_warning)
    }
}

/// Decoded notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNotification {
    event_time: String,
    schema_path: Vec<QName>,
    instance_path: Option<Path>,
    body: ContainerNode,
}

impl DeviceNotification {
    pub fn new(event_time: String, schema_path: Vec<QName>, instance_path: Option<Path>, body: ContainerNode) -> Self {
        Self {
            event_time,
            schema_path,
            instance_path,
            body,
        }
    }

    /// `eventTime` exactly as sent by the device
    pub fn event_time(&self) -> &str {
        &self.event_time
    }

    /// Schema path down to the notification; one element for top-level ones
    pub fn schema_path(&self) -> &[QName] {
        &self.schema_path
    }

    /// Data path of the node a nested notification was raised on
    pub fn instance_path(&self) -> Option<&Path> {
        self.instance_path.as_ref()
    }

    pub fn body(&self) -> &ContainerNode {
        &self.body
    }

    /// Type tag of the notification
    pub fn name(&self) -> Option<&QName> {
        self.schema_path.last()
    }
}

// ============================================================================
// Transformer traits
// ============================================================================

/// Flat rpc framing
pub trait RpcTransformer: Send + Sync {
    /// Wrap `payload` as the input of `rpc` and assign the next message id
    fn to_rpc_request(&self, rpc: &QName, payload: Option<&ContainerNode>) -> Result<NetconfMessage>;

    /// Decode a reply, or the transport failure that replaced it
    ///
    /// Protocol errors are returned inside the result; only malformed
    /// content fails.
    fn to_rpc_result(
        &self,
        reply: std::result::Result<NetconfMessage, TransportError>,
        rpc: &QName,
    ) -> Result<DomRpcResult>;
}

/// Subtree-scoped operation framing
pub trait ActionTransformer: Send + Sync {
    /// `action` is the schema path from the top-level node to the action,
    /// `target` the data path of the node the action is invoked on
    fn to_action_request(
        &self,
        action: &[QName],
        target: &Path,
        payload: Option<&ContainerNode>,
    ) -> Result<NetconfMessage>;

    fn to_action_result(
        &self,
        action: &[QName],
        reply: std::result::Result<NetconfMessage, TransportError>,
    ) -> Result<DomRpcResult>;
}

pub trait NotificationTransformer: Send + Sync {
    fn to_notification(&self, message: &NetconfMessage) -> Result<DeviceNotification>;
}

/// Builders for the structures base operations put into requests and read
/// back out of replies
pub trait RpcStructureTransformer: Send + Sync {
    /// `<filter>` selecting the node at `path`
    fn to_filter_structure(&self, path: &Path) -> Result<TreeNode>;

    /// `<filter>` for a batch of field selections
    fn to_fields_filter_structure(&self, filters: &[FieldsFilter]) -> Result<TreeNode>;

    /// Pick the node at `path` out of the `data` child of a read reply
    fn select_from_data_structure(&self, data: &TreeNode, path: &Path) -> Result<Option<TreeNode>>;

    /// `<config>` for one edit
    fn create_edit_config_structure(
        &self,
        payload: Option<TreeNode>,
        path: &Path,
        operation: EditOperation,
    ) -> Result<TreeNode>;

    /// `<config>` with one fragment per entry, in caller order
    fn create_batched_edit_config_structure(&self, entries: &[EditEntry]) -> Result<TreeNode>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_counter_never_repeats() {
        let counter = std::sync::Arc::new(MessageCounter::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || (0..100).map(|_| counter.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut ids: Vec<String> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 400);
    }

    #[test]
    fn test_message_counter_wraps_at_end_of_range() {
        let counter = MessageCounter {
            next: AtomicU64::new(u64::MAX - 1),
        };
        assert_eq!(counter.next_id(), format!("m-{}", u64::MAX));
        assert_eq!(counter.next_id(), "m-0");
    }

    #[test]
    fn test_error_info_from_element() {
        let reply = XmlElement::parse(
            r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="m-1">
                 <rpc-error>
                   <error-type>application</error-type>
                   <error-tag>data-exists</error-tag>
                   <error-severity>error</error-severity>
                   <error-path>/top/item</error-path>
                   <error-message>entry exists</error-message>
                   <error-info><bad-element>item</bad-element></error-info>
                 </rpc-error>
                 <rpc-error>
                   <error-type>protocol</error-type>
                   <error-tag>operation-not-supported</error-tag>
                   <error-severity>warning</error-severity>
                 </rpc-error>
               </rpc-reply>"#,
        )
        .unwrap();
        let errors = reply_errors(&reply);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].error_type, ErrorType::Application);
        assert_eq!(errors[0].tag, "data-exists");
        assert_eq!(errors[0].message.as_deref(), Some("entry exists"));
        assert_eq!(errors[0].path.as_deref(), Some("/top/item"));
        assert!(errors[0].info.as_deref().unwrap().contains("bad-element"));
        assert!(errors[1].is_warning());

        let result = DomRpcResult::failed(errors);
        assert!(!result.is_success());
    }

    #[test]
    fn test_error_info_serializes_kebab_case() {
        let json = serde_json::to_value(ErrorInfo::transport("session closed")).unwrap();
        assert_eq!(json["error-type"], "transport");
        assert_eq!(json["severity"], "error");
        assert!(json.get("app-tag").is_none());
    }
}
