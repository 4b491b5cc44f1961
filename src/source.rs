//! Schema sources
//!
//! A schema source is one YANG module text identified by name and revision.
//! Sources come from a local [`SchemaRepository`] or from a remote provider
//! (see [`crate::monitoring::MonitoringSourceProvider`]).

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::Result;
use crate::qname::Revision;

/// Name and optional revision of a schema source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceIdentifier {
    name: String,
    revision: Option<Revision>,
}

impl SourceIdentifier {
    pub fn new(name: impl Into<String>, revision: Option<Revision>) -> Self {
        Self {
            name: name.into(),
            revision,
        }
    }

    /// Parse `name` or `name@revision`
    pub fn parse(value: &str) -> Result<Self> {
        match value.split_once('@') {
            Some((name, rev)) => Ok(Self::new(name, Some(Revision::parse(rev)?))),
            None => Ok(Self::new(value, None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn revision(&self) -> Option<&Revision> {
        self.revision.as_ref()
    }

    /// Relaxed matching used only during fallback resolution
    ///
    /// An identifier without revision matches any revision of the same name.
    pub fn matches_fallback(&self, other: &SourceIdentifier) -> bool {
        self.name == other.name && (self.revision.is_none() || self.revision == other.revision)
    }
}

impl fmt::Display for SourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.revision {
            Some(rev) => write!(f, "{}@{}", self.name, rev),
            None => f.write_str(&self.name),
        }
    }
}

/// Syntactic kind of a schema source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum SourceKind {
    #[default]
    YangText,
    Other(String),
}

/// A schema source with its text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSource {
    id: SourceIdentifier,
    kind: SourceKind,
    text: String,
}

impl SchemaSource {
    pub fn new(id: SourceIdentifier, kind: SourceKind, text: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            text: text.into(),
        }
    }

    /// YANG text source
    pub fn yang(id: SourceIdentifier, text: impl Into<String>) -> Self {
        Self::new(id, SourceKind::YangText, text)
    }

    pub fn id(&self) -> &SourceIdentifier {
        &self.id
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Set of sources obtainable from one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvidedSources {
    kind: SourceKind,
    provider: String,
    sources: BTreeSet<SourceIdentifier>,
}

impl ProvidedSources {
    pub fn new(
        kind: SourceKind,
        provider: impl Into<String>,
        sources: impl IntoIterator<Item = SourceIdentifier>,
    ) -> Self {
        Self {
            kind,
            provider: provider.into(),
            sources: sources.into_iter().collect(),
        }
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn sources(&self) -> &BTreeSet<SourceIdentifier> {
        &self.sources
    }
}

/// Errors reported by a [`SchemaSourceProvider`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceFetchError {
    #[error("Schema source {0} not found")]
    NotFound(SourceIdentifier),

    #[error("Fetching schema source {id} failed: {reason}")]
    Failed { id: SourceIdentifier, reason: String },
}

/// Anything that can hand out schema sources asynchronously
#[async_trait]
pub trait SchemaSourceProvider: Send + Sync {
    async fn get_source(
        &self,
        id: &SourceIdentifier,
    ) -> std::result::Result<SchemaSource, SourceFetchError>;
}

/// In-memory schema source store
#[derive(Debug, Clone, Default)]
pub struct SchemaRepository {
    sources: HashMap<SourceIdentifier, SchemaSource>,
}

impl SchemaRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository pre-loaded with the embedded base protocol schemas
    pub fn with_base_sources() -> Self {
        let mut repo = Self::new();
        for source in crate::schema::base::base_sources() {
            repo.register(source);
        }
        repo
    }

    /// Register a source, replacing any source with the same identifier
    pub fn register(&mut self, source: SchemaSource) {
        log::trace!("Registering schema source {}", source.id());
        self.sources.insert(source.id().clone(), source);
    }

    pub fn contains(&self, id: &SourceIdentifier) -> bool {
        self.sources.contains_key(id)
    }

    /// Exact lookup by name and revision
    pub fn get(&self, id: &SourceIdentifier) -> Option<&SchemaSource> {
        self.sources.get(id)
    }

    /// Fallback lookup: latest registered revision of the named source
    ///
    /// Only identifiers without revision take part in fallback matching.
    pub fn find_fallback(&self, id: &SourceIdentifier) -> Option<&SchemaSource> {
        if id.revision().is_some() {
            return self.get(id);
        }
        self.sources
            .values()
            .filter(|source| id.matches_fallback(source.id()))
            .max_by(|a, b| a.id().revision().cmp(&b.id().revision()))
    }

    /// Exact lookup, then fallback for revision-less identifiers
    pub fn lookup(&self, id: &SourceIdentifier) -> Option<&SchemaSource> {
        self.get(id).or_else(|| self.find_fallback(id))
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &SourceIdentifier> {
        self.sources.keys()
    }

    /// Describe the repository contents as one provided-sources set
    pub fn provided_sources(&self) -> ProvidedSources {
        ProvidedSources::new(
            SourceKind::YangText,
            "local-repository",
            self.sources.keys().cloned(),
        )
    }
}

#[async_trait]
impl SchemaSourceProvider for SchemaRepository {
    async fn get_source(
        &self,
        id: &SourceIdentifier,
    ) -> std::result::Result<SchemaSource, SourceFetchError> {
        self.lookup(id)
            .cloned()
            .ok_or_else(|| SourceFetchError::NotFound(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str, rev: Option<&str>) -> SourceIdentifier {
        SourceIdentifier::new(name, rev.map(|r| Revision::parse(r).unwrap()))
    }

    #[test]
    fn test_identifier_parse_and_display() {
        let parsed = SourceIdentifier::parse("ietf-inet-types@2013-07-15").unwrap();
        assert_eq!(parsed, id("ietf-inet-types", Some("2013-07-15")));
        assert_eq!(parsed.to_string(), "ietf-inet-types@2013-07-15");
        assert_eq!(SourceIdentifier::parse("foo").unwrap(), id("foo", None));
    }

    #[test]
    fn test_identifier_equality_uses_revision() {
        assert_ne!(id("foo", None), id("foo", Some("2020-01-01")));
        assert!(id("foo", None).matches_fallback(&id("foo", Some("2020-01-01"))));
        assert!(!id("foo", Some("2019-01-01")).matches_fallback(&id("foo", Some("2020-01-01"))));
    }

    #[test]
    fn test_repository_fallback_picks_latest() {
        let mut repo = SchemaRepository::new();
        repo.register(SchemaSource::yang(id("foo", Some("2019-01-01")), "old"));
        repo.register(SchemaSource::yang(id("foo", Some("2020-01-01")), "new"));

        // Exact lookups never fall back
        assert!(repo.get(&id("foo", None)).is_none());
        assert_eq!(repo.lookup(&id("foo", None)).unwrap().text(), "new");
        assert!(repo.lookup(&id("foo", Some("2021-01-01"))).is_none());
    }

    #[tokio::test]
    async fn test_repository_as_provider() {
        let mut repo = SchemaRepository::new();
        repo.register(SchemaSource::yang(id("foo", Some("2020-01-01")), "text"));

        let source = repo.get_source(&id("foo", Some("2020-01-01"))).await.unwrap();
        assert_eq!(source.text(), "text");
        assert_eq!(
            repo.get_source(&id("bar", None)).await,
            Err(SourceFetchError::NotFound(id("bar", None)))
        );
    }
}
