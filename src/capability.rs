//! Capability parsing and session preferences
//!
//! Devices advertise capability URIs in their hello message. Module
//! capabilities look like `namespace?module=name&revision=date&features=a,b`,
//! everything else (`urn:ietf:params:netconf:capability:candidate:1.0`, ...)
//! is a protocol capability.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::qname::{QName, QNameModule, Revision};
use crate::source::SourceIdentifier;

// ============================================================================
// Well-known capability URNs
// ============================================================================

pub const BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";
pub const BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";
pub const CANDIDATE: &str = "urn:ietf:params:netconf:capability:candidate:1.0";
pub const WRITABLE_RUNNING: &str = "urn:ietf:params:netconf:capability:writable-running:1.0";
pub const ROLLBACK_ON_ERROR: &str = "urn:ietf:params:netconf:capability:rollback-on-error:1.0";
pub const VALIDATE_1_0: &str = "urn:ietf:params:netconf:capability:validate:1.0";
pub const VALIDATE_1_1: &str = "urn:ietf:params:netconf:capability:validate:1.1";
pub const STARTUP: &str = "urn:ietf:params:netconf:capability:startup:1.0";
pub const NOTIFICATION: &str = "urn:ietf:params:netconf:capability:notification:1.0";
pub const INTERLEAVE: &str = "urn:ietf:params:netconf:capability:interleave:1.0";
/// Namespace of the ietf-netconf-monitoring module
pub const MONITORING_NAMESPACE: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring";

/// Where a capability came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityOrigin {
    #[default]
    DeviceAdvertised,
    UserDefined,
}

/// A parsed capability URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    uri: String,
    namespace: String,
    module: Option<String>,
    revision: Option<Revision>,
    features: Vec<String>,
    deviations: Vec<String>,
}

impl Capability {
    /// Parse a capability URI
    ///
    /// Parsing never fails: anything without a `module=` parameter is a
    /// protocol (non-module) capability. An unparsable revision is dropped
    /// with a warning.
    pub fn parse(uri: &str) -> Self {
        let uri = uri.trim();
        let (namespace, query) = match uri.split_once('?') {
            Some((ns, q)) => (ns, Some(q)),
            None => (uri, None),
        };

        let mut capability = Self {
            uri: uri.to_string(),
            namespace: namespace.to_string(),
            module: None,
            revision: None,
            features: Vec::new(),
            deviations: Vec::new(),
        };

        let Some(query) = query else {
            return capability;
        };

        for param in query.split('&') {
            // Some devices double-escape the separator and send "amp;revision="
            let param = param.strip_prefix("amp;").unwrap_or(param);
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            match key {
                "module" => capability.module = Some(value.to_string()),
                "revision" => match Revision::parse(value) {
                    Ok(rev) => capability.revision = Some(rev),
                    Err(_) => log::warn!("Ignoring invalid revision '{}' in capability {}", value, uri),
                },
                "features" => capability.features = split_list(value),
                "deviations" => capability.deviations = split_list(value),
                _ => {}
            }
        }
        capability
    }

    /// Build a module capability URI
    pub fn for_module(namespace: &str, module: &str, revision: Option<&Revision>) -> Self {
        let uri = match revision {
            Some(rev) => format!("{}?module={}&revision={}", namespace, module, rev),
            None => format!("{}?module={}", namespace, module),
        };
        Self::parse(&uri)
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn module_name(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn revision(&self) -> Option<&Revision> {
        self.revision.as_ref()
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn deviations(&self) -> &[String] {
        &self.deviations
    }

    pub fn is_module_based(&self) -> bool {
        self.module.is_some()
    }

    /// The schema source backing a module capability
    pub fn source_identifier(&self) -> Option<SourceIdentifier> {
        self.module
            .as_ref()
            .map(|name| SourceIdentifier::new(name.clone(), self.revision.clone()))
    }

    /// Module capability as a QName (namespace, revision, module name)
    pub fn qname(&self) -> Option<QName> {
        self.module.as_ref().map(|name| {
            QName::new(
                QNameModule::new(self.namespace.clone(), self.revision.clone()),
                name.clone(),
            )
        })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Capabilities negotiated for one session
#[derive(Debug, Clone, Default)]
pub struct SessionPreferences {
    session_id: Option<u32>,
    non_module: BTreeMap<String, CapabilityOrigin>,
    modules: BTreeMap<QName, (Capability, CapabilityOrigin)>,
}

impl SessionPreferences {
    /// Build preferences from advertised capability strings
    pub fn from_capabilities<I, S>(capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut prefs = Self::default();
        for cap in capabilities {
            prefs.add(Capability::parse(cap.as_ref()), CapabilityOrigin::DeviceAdvertised);
        }
        prefs
    }

    pub fn with_session_id(mut self, session_id: u32) -> Self {
        self.session_id = Some(session_id);
        self
    }

    fn add(&mut self, capability: Capability, origin: CapabilityOrigin) {
        match capability.qname() {
            Some(qname) => {
                self.modules.insert(qname, (capability, origin));
            }
            None => {
                self.non_module.insert(capability.uri().to_string(), origin);
            }
        }
    }

    /// Merge user-defined module capabilities on top of the advertised ones
    pub fn with_additional_modules<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for cap in capabilities {
            let capability = Capability::parse(cap.as_ref());
            if capability.is_module_based() {
                self.add(capability, CapabilityOrigin::UserDefined);
            } else {
                log::debug!("Ignoring non-module user capability {}", capability.uri());
            }
        }
        self
    }

    pub fn session_id(&self) -> Option<u32> {
        self.session_id
    }

    pub fn module_capabilities(&self) -> impl Iterator<Item = (&Capability, CapabilityOrigin)> {
        self.modules.values().map(|(cap, origin)| (cap, *origin))
    }

    pub fn non_module_capabilities(&self) -> impl Iterator<Item = (&str, CapabilityOrigin)> {
        self.non_module.iter().map(|(uri, origin)| (uri.as_str(), *origin))
    }

    pub fn contains_non_module(&self, uri: &str) -> bool {
        self.non_module.contains_key(uri)
    }

    /// Non-module capability lookup ignoring any `?` parameters
    pub fn contains_partial_non_module(&self, uri: &str) -> bool {
        self.non_module
            .keys()
            .any(|cap| cap.split('?').next() == Some(uri))
    }

    /// Module lookup by namespace and module name, ignoring revision
    pub fn contains_module(&self, namespace: &str, module: &str) -> bool {
        self.modules
            .keys()
            .any(|q| q.namespace() == namespace && q.local_name() == module)
    }

    pub fn is_candidate_supported(&self) -> bool {
        self.contains_partial_non_module(CANDIDATE)
    }

    pub fn is_running_writable(&self) -> bool {
        self.contains_partial_non_module(WRITABLE_RUNNING)
    }

    pub fn is_rollback_supported(&self) -> bool {
        self.contains_partial_non_module(ROLLBACK_ON_ERROR)
    }

    pub fn is_validate_supported(&self) -> bool {
        self.contains_partial_non_module(VALIDATE_1_0) || self.contains_partial_non_module(VALIDATE_1_1)
    }

    pub fn is_notifications_supported(&self) -> bool {
        self.contains_partial_non_module(NOTIFICATION)
    }

    pub fn is_monitoring_supported(&self) -> bool {
        self.modules
            .keys()
            .any(|q| q.namespace() == MONITORING_NAMESPACE)
    }
}
