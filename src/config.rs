//! Connector configuration
//!
//! Loaded from JSON. Every field has a default, so an empty object is a
//! valid configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::qname::Revision;
use crate::source::SourceIdentifier;

/// Default bound on context assembly attempts per resolution
pub const DEFAULT_MAX_RESOLUTION_ATTEMPTS: usize = 10;

/// Known-bad advertised revision of a source and its replacement
///
/// When the advertised revision fails to resolve and the replacement is
/// available locally, the replacement is used instead of dropping the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceQuirk {
    pub name: String,
    pub advertised_revision: Revision,
    pub replacement_revision: Revision,
}

impl SourceQuirk {
    /// True if `id` is the known-bad advertised source
    pub fn applies_to(&self, id: &SourceIdentifier) -> bool {
        id.name() == self.name && id.revision() == Some(&self.advertised_revision)
    }

    pub fn replacement(&self) -> SourceIdentifier {
        SourceIdentifier::new(self.name.clone(), Some(self.replacement_revision.clone()))
    }
}

/// ietf-netconf-monitoring is widely advertised with a revision whose text
/// declares 2010-10-04
fn default_quirks() -> Vec<SourceQuirk> {
    match (Revision::parse("2010-06-22"), Revision::parse("2010-10-04")) {
        (Ok(advertised_revision), Ok(replacement_revision)) => vec![SourceQuirk {
            name: "ietf-netconf-monitoring".into(),
            advertised_revision,
            replacement_revision,
        }],
        _ => Vec::new(),
    }
}

/// Settings for the schema resolution controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    pub max_attempts: usize,
    pub add_notification_sources: bool,
    pub quirks: Vec<SourceQuirk>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RESOLUTION_ATTEMPTS,
            add_notification_sources: true,
            quirks: default_quirks(),
        }
    }
}

impl ResolverConfig {
    /// Quirk covering the advertised source `id`, if any
    pub fn quirk_for(&self, id: &SourceIdentifier) -> Option<&SourceQuirk> {
        self.quirks.iter().find(|quirk| quirk.applies_to(id))
    }
}

/// Top-level connector configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConnectorConfig {
    /// Fail on reply elements the schema does not define
    pub strict_parsing: bool,
    pub max_resolution_attempts: usize,
    /// Resolve the notifications module when the device supports notifications
    pub add_notification_sources: bool,
    pub quirks: Vec<SourceQuirk>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            strict_parsing: true,
            max_resolution_attempts: DEFAULT_MAX_RESOLUTION_ATTEMPTS,
            add_notification_sources: true,
            quirks: default_quirks(),
        }
    }
}

impl ConnectorConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_json(&content)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        if config.max_resolution_attempts == 0 {
            return Err(Error::Config("max-resolution-attempts must be at least 1".into()));
        }
        Ok(config)
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            max_attempts: self.max_resolution_attempts,
            add_notification_sources: self.add_notification_sources,
            quirks: self.quirks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = ConnectorConfig::from_json("{}").unwrap();
        assert_eq!(config, ConnectorConfig::default());
        assert!(config.strict_parsing);
        assert_eq!(config.quirks.len(), 1);

        let advertised = SourceIdentifier::parse("ietf-netconf-monitoring@2010-06-22").unwrap();
        let resolver = config.resolver_config();
        let quirk = resolver.quirk_for(&advertised).unwrap();
        assert_eq!(quirk.replacement().to_string(), "ietf-netconf-monitoring@2010-10-04");
        assert!(resolver
            .quirk_for(&SourceIdentifier::parse("ietf-netconf-monitoring@2010-10-04").unwrap())
            .is_none());
    }

    #[test]
    fn test_kebab_case_fields() {
        let config = ConnectorConfig::from_json(
            r#"{
                "strict-parsing": false,
                "max-resolution-attempts": 3,
                "quirks": [
                    {"name": "vendor-types", "advertised-revision": "2019-01-01", "replacement-revision": "2019-06-01"}
                ]
            }"#,
        )
        .unwrap();
        assert!(!config.strict_parsing);
        assert!(config.add_notification_sources);
        assert_eq!(config.resolver_config().max_attempts, 3);
        assert_eq!(config.quirks[0].name, "vendor-types");
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            ConnectorConfig::from_json(r#"{"max-resolution-attempts": 0}"#),
            Err(Error::Config(_))
        ));
        let bad_revision = r#"{"quirks": [{"name": "x", "advertised-revision": "June", "replacement-revision": "2019-06-01"}]}"#;
        assert!(matches!(ConnectorConfig::from_json(bad_revision), Err(Error::Json(_))));
        assert!(matches!(ConnectorConfig::from_file("/nonexistent/connector.json"), Err(Error::Config(_))));
    }
}
