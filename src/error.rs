//! Error types for netconf-connector

use thiserror::Error;

use crate::rpc::TransportError;
use crate::schema::ResolutionError;

/// Result type alias for netconf-connector operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in netconf-connector operations
#[derive(Error, Debug)]
pub enum Error {
    /// XML could not be parsed
    #[error("Malformed XML: {0}")]
    MalformedXml(String),

    /// Well-formed XML that is not a valid protocol message
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Revision date not in YYYY-MM-DD form
    #[error("Invalid revision '{0}'")]
    InvalidRevision(String),

    #[error("Unknown RPC: {0}")]
    UnknownRpc(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Unknown notification: {0}")]
    UnknownNotification(String),

    /// Element or node with no schema definition
    #[error("Unknown schema node '{name}' under {parent}")]
    UnknownNode { parent: String, name: String },

    /// Tree node shape disagrees with its schema definition
    #[error("{node} is a {found} but the schema defines a {expected}")]
    SchemaMismatch {
        node: String,
        found: String,
        expected: String,
    },

    /// List entry without a declared key leaf
    #[error("List entry {list} is missing key leaf '{key}'")]
    MissingListKey { list: String, key: String },

    /// Two selections disagree on a key value for the same list segment
    #[error("Inconsistent key values for {node}: '{key}' is both '{first}' and '{second}'")]
    InconsistentKeys {
        node: String,
        key: String,
        first: String,
        second: String,
    },

    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// EditEntry violating payload rules
    #[error("Invalid edit of {path}: {reason}")]
    InvalidEdit { path: String, reason: String },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// RPC with declared input invoked without payload
    #[error("Missing input payload for {0}")]
    MissingPayload(String),

    #[error("Invalid value '{value}' for leaf {leaf}: {reason}")]
    InvalidValue {
        leaf: String,
        value: String,
        reason: String,
    },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Read returned protocol errors instead of data
    #[error("Unable to read data at {path}: {errors}")]
    ReadFailed { path: String, errors: String },

    /// Retry loop ran out of sources
    #[error("{0}: No more sources for schema context")]
    EmptySchemaContext(String),

    /// Terminal schema resolution failure
    #[error("{device}: schema resolution failed after {attempts} attempt(s): {cause}")]
    ResolutionFailed {
        device: String,
        attempts: usize,
        #[source]
        cause: ResolutionError,
    },

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
