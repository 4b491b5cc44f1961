//! Schema resolution controller
//!
//! Turns the capabilities a device advertises into a [`SchemaContext`]:
//!
//! 1. Map module capabilities to source identifiers and split them into
//!    locally available and remote sources.
//! 2. Fetch the remote sources concurrently. A failed fetch downgrades its
//!    capability instead of failing the device.
//! 3. Assemble a context. On failure drop (or, for known quirks, replace)
//!    the offending sources and try again, up to a bounded number of
//!    attempts.
//!
//! Dropping the future returned by [`SchemaSetup::resolve`] cancels the
//! outstanding fetches and any further attempts.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::capability::{Capability, CapabilityOrigin, SessionPreferences};
use crate::config::ResolverConfig;
use crate::error::{Error, Result};
use crate::schema::base::notifications_source_id;
use crate::schema::{ContextFactory, ResolutionError, SchemaContext};
use crate::source::{ProvidedSources, SchemaRepository, SchemaSource, SchemaSourceProvider, SourceIdentifier};

/// Why a capability is missing from the resolved set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// Source could not be obtained
    MissingSource,
    /// Source was obtained but could not be assembled
    UnableToResolve,
}

/// A capability together with where it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableCapability {
    pub capability: String,
    pub origin: CapabilityOrigin,
}

impl AvailableCapability {
    fn new(capability: impl Into<String>, origin: CapabilityOrigin) -> Self {
        Self {
            capability: capability.into(),
            origin,
        }
    }
}

/// Outcome of resolution as seen by the device's capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceCapabilities {
    /// Module capabilities backed by a source in the context
    pub resolved: Vec<AvailableCapability>,
    /// Module capabilities left out, keyed by capability URI
    pub unresolved: BTreeMap<String, FailureReason>,
    pub non_module: Vec<AvailableCapability>,
}

impl DeviceCapabilities {
    pub fn is_resolved(&self, capability: &str) -> bool {
        self.resolved.iter().any(|c| c.capability == capability)
    }
}

/// Resolved schema of one device
#[derive(Debug, Clone)]
pub struct DeviceSchema {
    capabilities: DeviceCapabilities,
    context: Arc<SchemaContext>,
    substitutions: Vec<(SourceIdentifier, SourceIdentifier)>,
    attempts: usize,
}

impl DeviceSchema {
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub fn context(&self) -> &Arc<SchemaContext> {
        &self.context
    }

    /// Advertised sources replaced by known-good ones, as (advertised, used)
    pub fn substitutions(&self) -> &[(SourceIdentifier, SourceIdentifier)] {
        &self.substitutions
    }

    /// Number of context assembly attempts it took
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn into_context(self) -> Arc<SchemaContext> {
        self.context
    }
}

/// Resolution progress, logged at trace level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    Start,
    FetchingSources,
    ContextBuilding { attempt: usize },
    ConflictRetry,
    Success,
    Failure,
}

impl fmt::Display for ResolutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionState::Start => f.write_str("start"),
            ResolutionState::FetchingSources => f.write_str("fetching-sources"),
            ResolutionState::ContextBuilding { attempt } => write!(f, "context-building (attempt {})", attempt),
            ResolutionState::ConflictRetry => f.write_str("conflict-retry"),
            ResolutionState::Success => f.write_str("success"),
            ResolutionState::Failure => f.write_str("failure"),
        }
    }
}

/// A source the working set needs and the capability that asked for it
#[derive(Debug, Clone)]
struct Requirement {
    capability: Option<(Capability, CapabilityOrigin)>,
}

/// One resolution run for one device
pub struct SchemaSetup {
    device: String,
    preferences: SessionPreferences,
    repository: Arc<SchemaRepository>,
    remote: Arc<dyn SchemaSourceProvider>,
    factory: Arc<dyn ContextFactory>,
    config: ResolverConfig,
    provided: Vec<ProvidedSources>,
    state: ResolutionState,
}

impl SchemaSetup {
    /// Prepare resolution for one device
    ///
    /// # Arguments
    /// * `device` - Device name used in logs and errors
    /// * `preferences` - Capabilities of the session
    /// * `repository` - Locally available sources, including replacements for quirks
    /// * `remote` - Provider for sources the repository lacks
    /// * `factory` - Context assembly
    /// * `config` - Retry bound, quirks and notification handling
    pub fn new(
        device: impl Into<String>,
        preferences: SessionPreferences,
        repository: Arc<SchemaRepository>,
        remote: Arc<dyn SchemaSourceProvider>,
        factory: Arc<dyn ContextFactory>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            device: device.into(),
            preferences,
            repository,
            remote,
            factory,
            config,
            provided: Vec::new(),
            state: ResolutionState::Start,
        }
    }

    /// Also resolve sources the device offers without advertising them
    pub fn with_provided_sources(mut self, provided: impl IntoIterator<Item = ProvidedSources>) -> Self {
        self.provided.extend(provided);
        self
    }

    fn transition(&mut self, next: ResolutionState) {
        trace!("{}: resolution {} -> {}", self.device, self.state, next);
        self.state = next;
    }

    /// Sources to resolve, keyed by the identifier that was asked for
    fn requirements(&self) -> BTreeMap<SourceIdentifier, Requirement> {
        let mut required = BTreeMap::new();
        for (capability, origin) in self.preferences.module_capabilities() {
            if let Some(id) = capability.source_identifier() {
                required.insert(
                    id,
                    Requirement {
                        capability: Some((capability.clone(), origin)),
                    },
                );
            }
        }
        for provided in &self.provided {
            for id in provided.sources() {
                required
                    .entry(id.clone())
                    .or_insert(Requirement { capability: None });
            }
        }
        if self.config.add_notification_sources && self.preferences.is_notifications_supported() {
            if let Some(id) = notifications_source_id() {
                required.entry(id).or_insert(Requirement { capability: None });
            }
        }
        required
    }

    /// Resolve the device schema
    pub async fn resolve(mut self) -> Result<DeviceSchema> {
        let required = self.requirements();
        let mut unresolved: BTreeMap<SourceIdentifier, FailureReason> = BTreeMap::new();

        self.transition(ResolutionState::FetchingSources);
        let mut working: BTreeMap<SourceIdentifier, SchemaSource> = BTreeMap::new();
        let mut remote_ids = Vec::new();
        for id in required.keys() {
            match self.repository.get(id) {
                Some(source) => {
                    working.insert(id.clone(), source.clone());
                }
                None => remote_ids.push(id.clone()),
            }
        }
        debug!(
            "{}: {} sources available locally, fetching {}",
            self.device,
            working.len(),
            remote_ids.len()
        );
        let remote = self.remote.clone();
        let fetched = join_all(remote_ids.iter().map(|id| remote.get_source(id))).await;
        for (id, result) in remote_ids.into_iter().zip(fetched) {
            match result {
                Ok(source) => {
                    debug!("{}: fetched {}", self.device, id);
                    working.insert(id, source);
                }
                Err(e) => match self.repository.find_fallback(&id) {
                    Some(source) if id.revision().is_none() => {
                        info!(
                            "{}: {}, falling back to local {}",
                            self.device,
                            e,
                            source.id()
                        );
                        working.insert(id, source.clone());
                    }
                    _ => {
                        warn!("{}: {}, leaving it out", self.device, e);
                        unresolved.insert(id, FailureReason::MissingSource);
                    }
                },
            }
        }

        let mut substitutions = Vec::new();
        let mut attempts = 0;
        let context = loop {
            if working.is_empty() {
                self.transition(ResolutionState::Failure);
                return Err(Error::EmptySchemaContext(self.device.clone()));
            }
            attempts += 1;
            self.transition(ResolutionState::ContextBuilding { attempt: attempts });
            let sources: Vec<SchemaSource> = working.values().cloned().collect();
            let error = match self.factory.create_context(&sources).await {
                Ok(context) => break context,
                Err(e) => e,
            };
            debug!("{}: attempt {} failed: {}", self.device, attempts, error);

            if attempts >= self.config.max_attempts {
                return Err(self.fail(attempts, error));
            }
            self.transition(ResolutionState::ConflictRetry);

            let offending: BTreeSet<SourceIdentifier> = error.offending().into_iter().collect();
            let keys: Vec<SourceIdentifier> = working
                .iter()
                .filter(|(_, source)| offending.contains(source.id()))
                .map(|(key, _)| key.clone())
                .collect();
            if keys.is_empty() {
                // Nothing to remove, the next attempt would fail the same way
                return Err(self.fail(attempts, error));
            }
            for key in keys {
                if let Some(replacement) = self.substitute(&key, &working) {
                    warn!(
                        "{}: replacing {} with known-good {}",
                        self.device,
                        key,
                        replacement.id()
                    );
                    substitutions.push((key.clone(), replacement.id().clone()));
                    working.insert(key, replacement);
                } else {
                    warn!("{}: {} does not resolve, leaving it out", self.device, key);
                    working.remove(&key);
                    unresolved.insert(key, FailureReason::UnableToResolve);
                }
            }
        };

        self.transition(ResolutionState::Success);
        let capabilities = self.capabilities(&required, &working, &unresolved);
        info!(
            "{}: schema resolved with {} modules ({} capabilities left out) after {} attempt(s)",
            self.device,
            context.modules().len(),
            capabilities.unresolved.len(),
            attempts
        );
        Ok(DeviceSchema {
            capabilities,
            context: Arc::new(context),
            substitutions,
            attempts,
        })
    }

    /// Known-good replacement for `key`, unless it was replaced already
    fn substitute(&self, key: &SourceIdentifier, working: &BTreeMap<SourceIdentifier, SchemaSource>) -> Option<SchemaSource> {
        let current = working.get(key)?;
        if current.id() != key {
            return None;
        }
        let quirk = self.config.quirk_for(key)?;
        self.repository.get(&quirk.replacement()).cloned()
    }

    fn fail(&mut self, attempts: usize, cause: ResolutionError) -> Error {
        self.transition(ResolutionState::Failure);
        info!("{}: schema resolution failed: {}", self.device, cause);
        Error::ResolutionFailed {
            device: self.device.clone(),
            attempts,
            cause,
        }
    }

    fn capabilities(
        &self,
        required: &BTreeMap<SourceIdentifier, Requirement>,
        working: &BTreeMap<SourceIdentifier, SchemaSource>,
        unresolved: &BTreeMap<SourceIdentifier, FailureReason>,
    ) -> DeviceCapabilities {
        let mut capabilities = DeviceCapabilities::default();
        for (id, requirement) in required {
            let Some((capability, origin)) = &requirement.capability else {
                continue;
            };
            if working.contains_key(id) {
                capabilities
                    .resolved
                    .push(AvailableCapability::new(capability.uri(), *origin));
            } else {
                let reason = unresolved.get(id).copied().unwrap_or(FailureReason::UnableToResolve);
                capabilities.unresolved.insert(capability.uri().to_string(), reason);
            }
        }
        capabilities.non_module = self
            .preferences
            .non_module_capabilities()
            .map(|(uri, origin)| AvailableCapability::new(uri, origin))
            .collect();
        capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::capability::NOTIFICATION;
    use crate::qname::Revision;
    use crate::schema::base::base_sources;
    use crate::schema::{assemble, YangContextFactory};
    use crate::source::SourceFetchError;

    const A: &str = "module a { namespace urn:a; prefix a; revision 2020-01-01; container top; }";
    const CLASH: &str = "module other { namespace urn:a; prefix o; revision 2020-01-01; }";
    const BROKEN: &str = "module broken {";

    /// Remote provider serving a fixed set of sources
    #[derive(Default)]
    struct MapProvider {
        sources: HashMap<SourceIdentifier, SchemaSource>,
    }

    impl MapProvider {
        fn with(mut self, id: &str, text: &str) -> Self {
            let id = SourceIdentifier::parse(id).unwrap();
            self.sources.insert(id.clone(), SchemaSource::yang(id, text));
            self
        }
    }

    #[async_trait]
    impl SchemaSourceProvider for MapProvider {
        async fn get_source(&self, id: &SourceIdentifier) -> std::result::Result<SchemaSource, SourceFetchError> {
            self.sources
                .get(id)
                .cloned()
                .ok_or_else(|| SourceFetchError::NotFound(id.clone()))
        }
    }

    /// Sets its flag when dropped
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Remote provider whose fetches never complete
    #[derive(Default)]
    struct HangingProvider {
        started: AtomicUsize,
        dropped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SchemaSourceProvider for HangingProvider {
        async fn get_source(&self, _id: &SourceIdentifier) -> std::result::Result<SchemaSource, SourceFetchError> {
            let _flag = DropFlag(self.dropped.clone());
            self.started.fetch_add(1, Ordering::SeqCst);
            futures::future::pending().await
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ContextFactory for CountingFactory {
        async fn create_context(&self, sources: &[SchemaSource]) -> std::result::Result<SchemaContext, ResolutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assemble(sources)
        }
    }

    fn setup(capabilities: &[&str], remote: MapProvider) -> SchemaSetup {
        SchemaSetup::new(
            "dev1",
            SessionPreferences::from_capabilities(capabilities),
            Arc::new(SchemaRepository::with_base_sources()),
            Arc::new(remote),
            Arc::new(YangContextFactory),
            ResolverConfig::default(),
        )
    }

    const CAP_A: &str = "urn:a?module=a&revision=2020-01-01";
    const CAP_OTHER: &str = "urn:a?module=other&revision=2020-01-01";

    #[tokio::test]
    async fn test_conflicting_source_is_excluded() {
        let remote = MapProvider::default()
            .with("a@2020-01-01", A)
            .with("other@2020-01-01", CLASH);
        let schema = setup(&[CAP_A, CAP_OTHER], remote).resolve().await.unwrap();

        assert_eq!(schema.attempts(), 2);
        assert!(schema.context().module("a").is_some());
        assert!(schema.context().module("other").is_none());
        let capabilities = schema.capabilities();
        assert!(capabilities.is_resolved(CAP_A));
        assert_eq!(capabilities.unresolved.get(CAP_OTHER), Some(&FailureReason::UnableToResolve));
    }

    #[tokio::test]
    async fn test_quirk_revision_is_substituted() {
        let monitoring = base_sources()
            .into_iter()
            .find(|s| s.id().name() == "ietf-netconf-monitoring")
            .unwrap();
        let advertised =
            "urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring?module=ietf-netconf-monitoring&revision=2010-06-22";
        // The device serves text declaring a newer revision than advertised
        let remote = MapProvider::default().with("ietf-netconf-monitoring@2010-06-22", monitoring.text());
        let schema = setup(&[advertised], remote).resolve().await.unwrap();

        assert!(schema.capabilities().is_resolved(advertised));
        assert!(schema.capabilities().unresolved.is_empty());
        assert_eq!(
            schema.substitutions(),
            [(
                SourceIdentifier::parse("ietf-netconf-monitoring@2010-06-22").unwrap(),
                SourceIdentifier::parse("ietf-netconf-monitoring@2010-10-04").unwrap(),
            )]
        );
        assert!(schema.context().module("ietf-netconf-monitoring").is_some());
    }

    #[tokio::test]
    async fn test_fetch_failure_downgrades_capability() {
        let missing = "urn:missing?module=missing&revision=2020-01-01";
        let remote = MapProvider::default().with("a@2020-01-01", A);
        let schema = setup(&[CAP_A, missing, NOTIFICATION], remote).resolve().await.unwrap();

        assert_eq!(schema.attempts(), 1);
        assert!(schema.capabilities().is_resolved(CAP_A));
        assert_eq!(schema.capabilities().unresolved.get(missing), Some(&FailureReason::MissingSource));
        assert_eq!(schema.capabilities().non_module.len(), 1);
        // The notification capability pulls in the notifications module
        assert!(schema.context().module("notifications").is_some());
    }

    #[tokio::test]
    async fn test_nothing_left_to_resolve() {
        let remote = MapProvider::default().with("broken", BROKEN);
        let err = setup(&["urn:broken?module=broken"], remote).resolve().await.unwrap_err();
        assert!(matches!(err, Error::EmptySchemaContext(_)));
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let remote = MapProvider::default()
            .with("a@2020-01-01", A)
            .with("other@2020-01-01", CLASH);
        let config = ResolverConfig {
            max_attempts: 1,
            ..ResolverConfig::default()
        };
        let setup = SchemaSetup::new(
            "dev1",
            SessionPreferences::from_capabilities([CAP_A, CAP_OTHER]),
            Arc::new(SchemaRepository::new()),
            Arc::new(remote),
            Arc::new(YangContextFactory),
            config,
        );
        match setup.resolve().await {
            Err(Error::ResolutionFailed { attempts, cause, .. }) => {
                assert_eq!(attempts, 1);
                assert_eq!(cause.offending(), vec![SourceIdentifier::parse("other@2020-01-01").unwrap()]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_provided_sources_are_resolved() {
        let remote = MapProvider::default().with("a@2020-01-01", A);
        let provided = ProvidedSources::new(
            Default::default(),
            "netconf-monitoring",
            [SourceIdentifier::parse("a@2020-01-01").unwrap()],
        );
        let schema = setup(&[], remote)
            .with_provided_sources([provided])
            .resolve()
            .await
            .unwrap();
        assert!(schema.context().module("a").is_some());
        assert!(schema.capabilities().resolved.is_empty());
    }

    #[tokio::test]
    async fn test_revision_less_capability_prefers_remote() {
        const A_NEWER: &str = "module a { namespace urn:a; prefix a; revision 2021-01-01; container top; }";
        let advertised = "urn:a?module=a";
        let mut repository = SchemaRepository::new();
        repository.register(SchemaSource::yang(SourceIdentifier::parse("a@2020-01-01").unwrap(), A));
        let repository = Arc::new(repository);
        let resolve = |remote: MapProvider| {
            SchemaSetup::new(
                "dev1",
                SessionPreferences::from_capabilities([advertised]),
                repository.clone(),
                Arc::new(remote),
                Arc::new(YangContextFactory),
                ResolverConfig::default(),
            )
            .resolve()
        };

        let schema = resolve(MapProvider::default().with("a", A_NEWER)).await.unwrap();
        let module = schema.context().module("a").unwrap();
        assert_eq!(module.revision, Revision::parse("2021-01-01").ok());

        // Remote fetch fails, the newest local revision stands in
        let schema = resolve(MapProvider::default()).await.unwrap();
        let module = schema.context().module("a").unwrap();
        assert_eq!(module.revision, Revision::parse("2020-01-01").ok());
        assert!(schema.capabilities().is_resolved(advertised));
        assert!(schema.capabilities().unresolved.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_resolution_cancels_fetches() {
        let provider = Arc::new(HangingProvider::default());
        let factory = Arc::new(CountingFactory::default());
        let setup = SchemaSetup::new(
            "dev1",
            SessionPreferences::from_capabilities([CAP_A]),
            Arc::new(SchemaRepository::new()),
            provider.clone(),
            factory.clone(),
            ResolverConfig::default(),
        );

        let outcome = tokio::time::timeout(Duration::from_millis(50), setup.resolve()).await;
        assert!(outcome.is_err());
        assert_eq!(provider.started.load(Ordering::SeqCst), 1);
        assert!(provider.dropped.load(Ordering::SeqCst));
        assert_eq!(factory.calls.load(Ordering::SeqCst), 0);
    }
}
