//! Qualified names
//!
//! YANG nodes are identified by a module namespace, the module revision and a
//! local name. Lookups inside a schema context and comparisons between trees
//! coming from different sources only consider namespace and local name, so
//! both strict (`==`) and loose (`matches`) comparisons are provided.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A YANG revision date in `YYYY-MM-DD` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Revision(String);

impl Revision {
    /// Parse and validate a revision date
    pub fn parse(value: &str) -> Result<Self> {
        let bytes = value.as_bytes();
        let well_formed = bytes.len() == 10
            && bytes[4] == b'-'
            && bytes[7] == b'-'
            && bytes
                .iter()
                .enumerate()
                .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
        if !well_formed {
            return Err(Error::InvalidRevision(value.to_string()));
        }

        let month: u32 = value[5..7].parse().unwrap_or(0);
        let day: u32 = value[8..10].parse().unwrap_or(0);
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return Err(Error::InvalidRevision(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Revision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Revision {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Revision> for String {
    fn from(revision: Revision) -> Self {
        revision.0
    }
}

/// Namespace and optional revision of a YANG module
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QNameModule {
    namespace: String,
    revision: Option<Revision>,
}

impl QNameModule {
    pub fn new(namespace: impl Into<String>, revision: Option<Revision>) -> Self {
        Self {
            namespace: namespace.into(),
            revision,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn revision(&self) -> Option<&Revision> {
        self.revision.as_ref()
    }
}

/// A qualified name: module plus local name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    module: QNameModule,
    local_name: String,
}

impl QName {
    pub fn new(module: QNameModule, local_name: impl Into<String>) -> Self {
        Self {
            module,
            local_name: local_name.into(),
        }
    }

    /// Create a QName without revision
    pub fn create(namespace: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self::new(QNameModule::new(namespace, None), local_name)
    }

    /// Create a QName bound to a module revision
    ///
    /// # Arguments
    /// * `namespace` - Module namespace URI
    /// * `revision` - Module revision (`YYYY-MM-DD`)
    /// * `local_name` - Node name inside the module
    pub fn with_revision(
        namespace: impl Into<String>,
        revision: &str,
        local_name: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self::new(
            QNameModule::new(namespace, Some(Revision::parse(revision)?)),
            local_name,
        ))
    }

    pub fn module(&self) -> &QNameModule {
        &self.module
    }

    pub fn namespace(&self) -> &str {
        self.module.namespace()
    }

    pub fn revision(&self) -> Option<&Revision> {
        self.module.revision()
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// A name in the same module
    pub fn sibling(&self, local_name: impl Into<String>) -> Self {
        Self::new(self.module.clone(), local_name)
    }

    /// Compare namespace and local name, ignoring revisions
    pub fn matches(&self, other: &QName) -> bool {
        self.local_name == other.local_name && self.namespace() == other.namespace()
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.revision() {
            Some(rev) => write!(f, "({}?revision={}){}", self.namespace(), rev, self.local_name),
            None => write!(f, "({}){}", self.namespace(), self.local_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_validation() {
        assert!(Revision::parse("2013-07-15").is_ok());
        assert!(Revision::parse("2013-7-15").is_err());
        assert!(Revision::parse("2013-13-01").is_err());
        assert!(Revision::parse("latest").is_err());
    }

    #[test]
    fn test_revision_ordering() {
        let older = Revision::parse("2010-06-22").unwrap();
        let newer = Revision::parse("2010-10-04").unwrap();
        assert!(older < newer);
    }

    #[test]
    fn test_qname_matches_ignores_revision() {
        let with_rev = QName::with_revision("urn:test", "2020-01-01", "c").unwrap();
        let without = QName::create("urn:test", "c");
        assert_ne!(with_rev, without);
        assert!(with_rev.matches(&without));
        assert!(!with_rev.matches(&QName::create("urn:other", "c")));
    }

    #[test]
    fn test_qname_display() {
        let q = QName::with_revision("urn:test", "2020-01-01", "c").unwrap();
        assert_eq!(q.to_string(), "(urn:test?revision=2020-01-01)c");
        assert_eq!(QName::create("urn:test", "c").to_string(), "(urn:test)c");
    }
}
