//! netconf-connector: schema-aware NETCONF device connector core
//!
//! This crate turns typed data trees into NETCONF wire messages and back,
//! builds the subtree filters and edit-config structures the base operations
//! need, and resolves the YANG schema a device advertises into a schema
//! context. Transport and sessions stay outside: the crate is handed a
//! [`RequestSender`] and works through it.
//!
//! # Key Features
//!
//! - **Codec**: schema-aware [`NetconfMessageTransformer`] and opaque
//!   [`SchemalessMessageTransformer`]
//!   - rpc requests with per-session `message-id` correlation
//!   - replies decoded to typed trees with structured [`ErrorInfo`] lists
//!   - actions framed in `<action>`, notifications top-level or nested
//!
//! - **Filters and edits**: subtree filters from paths and field lists,
//!   edit-config structures with `nc:operation` on the target node only,
//!   batched edits kept in caller order
//!
//! - **Base operations**: lock, unlock, get, get-config, edit-config,
//!   copy-config, commit, discard-changes, validate via [`NetconfBaseOps`]
//!
//! - **Schema resolution**: [`SchemaSetup`] fetches missing sources through
//!   `get-schema`, retries without conflicting sources, substitutes known-bad
//!   revisions and reports what could not be resolved
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use netconf_connector::{
//!     BaseSchema, ConnectorConfig, DeviceRpc, MonitoringSourceProvider, NetconfBaseOps,
//!     NetconfMessageTransformer, NetconfRpcStructureTransformer, RequestSender, SchemaRepository,
//!     SchemaSetup, SessionPreferences, YangContextFactory,
//! };
//!
//! async fn connect(sender: Arc<dyn RequestSender>, hello: Vec<String>) -> netconf_connector::Result<()> {
//!     let config = ConnectorConfig::from_file("connector.json")?;
//!     let base = Arc::new(BaseSchema::new()?);
//!
//!     // The base schema is enough to download device schemas
//!     let bootstrap = NetconfMessageTransformer::new(base.context().clone(), base.clone());
//!     let provider = MonitoringSourceProvider::new("router1", DeviceRpc::new(Arc::new(bootstrap), sender.clone()));
//!
//!     let schema = SchemaSetup::new(
//!         "router1",
//!         SessionPreferences::from_capabilities(&hello),
//!         Arc::new(SchemaRepository::with_base_sources()),
//!         Arc::new(provider),
//!         Arc::new(YangContextFactory),
//!         config.resolver_config(),
//!     )
//!     .resolve()
//!     .await?;
//!
//!     let transformer = NetconfMessageTransformer::new(schema.context().clone(), base)
//!         .with_strict_parsing(config.strict_parsing);
//!     let ops = NetconfBaseOps::new(
//!         DeviceRpc::new(Arc::new(transformer), sender),
//!         Arc::new(NetconfRpcStructureTransformer::new(schema.context().clone())),
//!     );
//!     ops.lock_candidate().await?;
//!     ops.commit().await?;
//!     ops.unlock_candidate().await?;
//!     Ok(())
//! }
//! ```

mod base_ops;
pub mod capability;
pub mod codec;
mod config;
mod edit;
mod error;
pub mod filter;
mod monitoring;
mod notification;
mod qname;
mod resolver;
mod rpc;
pub mod schema;
mod source;
mod tree;
mod xml;

pub use base_ops::{Datastore, NetconfBaseOps};
pub use capability::{Capability, CapabilityOrigin, SessionPreferences};
pub use codec::{
    ActionTransformer, DeviceNotification, DomRpcResult, ErrorInfo, ErrorSeverity, ErrorType,
    MessageCounter, NetconfMessage, NetconfMessageTransformer, NetconfRpcStructureTransformer,
    NotificationTransformer, RpcError, RpcStructureTransformer, RpcTransformer,
    SchemalessMessageTransformer, SchemalessRpcStructureTransformer,
};
pub use config::{ConnectorConfig, ResolverConfig, SourceQuirk};
pub use edit::{EditEntry, EditOperation};
pub use error::{Error, Result};
pub use filter::FieldsFilter;
pub use monitoring::{
    get_schema_request, MonitoringSourceProvider, NetconfStateSchemas, RemoteSchema, MONITORING_PROVIDER,
};
pub use notification::{is_capability_change, NotificationFilter, NotificationHandler, NotificationListener};
pub use qname::{QName, QNameModule, Revision};
pub use resolver::{
    AvailableCapability, DeviceCapabilities, DeviceSchema, FailureReason, ResolutionState, SchemaSetup,
};
pub use rpc::{DeviceAction, DeviceRpc, RequestSender, TransportError};
pub use schema::base::BaseSchema;
pub use schema::{ContextFactory, ResolutionError, SchemaContext, YangContextFactory};
pub use source::{
    ProvidedSources, SchemaRepository, SchemaSource, SchemaSourceProvider, SourceFetchError,
    SourceIdentifier, SourceKind,
};
pub use tree::{ContainerNode, LeafListNode, LeafNode, ListNode, NodeId, OpaqueNode, Path, TreeNode, Value};
pub use xml::{XmlAttribute, XmlElement, XmlNode};
