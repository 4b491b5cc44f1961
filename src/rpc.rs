//! Transport collaborator and rpc invocation
//!
//! The session layer is represented only by [`RequestSender`]: it takes a
//! request envelope and resolves to the matching reply.

use std::sync::Arc;

use async_trait::async_trait;
use log::trace;
use thiserror::Error;

use crate::codec::{ActionTransformer, DomRpcResult, NetconfMessage, RpcTransformer};
use crate::error::Result;
use crate::qname::QName;
use crate::tree::{ContainerNode, Path};

/// Session-level failure reported by the transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Session closed")]
    SessionClosed,

    #[error("Request timed out")]
    Timeout,

    #[error("Transport failure: {0}")]
    Failure(String),
}

/// Sends one request and awaits its reply
#[async_trait]
pub trait RequestSender: Send + Sync {
    async fn send_request(&self, message: NetconfMessage) -> std::result::Result<NetconfMessage, TransportError>;
}

/// Rpc service of one device session
#[derive(Clone)]
pub struct DeviceRpc {
    transformer: Arc<dyn RpcTransformer>,
    sender: Arc<dyn RequestSender>,
}

impl DeviceRpc {
    pub fn new(transformer: Arc<dyn RpcTransformer>, sender: Arc<dyn RequestSender>) -> Self {
        Self { transformer, sender }
    }

    /// Encode, send and decode one rpc
    ///
    /// Transport failures and device errors are reported inside the
    /// result; encoding and decoding failures are returned as errors.
    pub async fn invoke_rpc(&self, rpc: &QName, payload: Option<&ContainerNode>) -> Result<DomRpcResult> {
        let request = self.transformer.to_rpc_request(rpc, payload)?;
        trace!("Invoking {} as {:?}", rpc, request.message_id());
        let reply = self.sender.send_request(request).await;
        self.transformer.to_rpc_result(reply, rpc)
    }
}

/// Action service of one device session
#[derive(Clone)]
pub struct DeviceAction {
    transformer: Arc<dyn ActionTransformer>,
    sender: Arc<dyn RequestSender>,
}

impl DeviceAction {
    pub fn new(transformer: Arc<dyn ActionTransformer>, sender: Arc<dyn RequestSender>) -> Self {
        Self { transformer, sender }
    }

    pub async fn invoke_action(
        &self,
        action: &[QName],
        target: &Path,
        payload: Option<&ContainerNode>,
    ) -> Result<DomRpcResult> {
        let request = self.transformer.to_action_request(action, target, payload)?;
        trace!("Invoking action on {} as {:?}", target, request.message_id());
        let reply = self.sender.send_request(request).await;
        self.transformer.to_action_result(action, reply)
    }
}
