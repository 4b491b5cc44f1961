//! Embedded base protocol schemas
//!
//! Subsets of `ietf-netconf`, `notifications`, `ietf-netconf-monitoring` and
//! `ietf-netconf-notifications` covering the operations and data this crate
//! issues and reads itself. They back the base operations before (or
//! without) a device schema and serve as known-good replacement sources.

use std::sync::Arc;

use crate::capability::MONITORING_NAMESPACE;
use crate::error::{Error, Result};
use crate::qname::{QName, Revision};
use crate::schema::{assemble, SchemaContext};
use crate::source::{SchemaSource, SourceIdentifier};

pub const NETCONF_BASE_NAMESPACE: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
pub const NOTIFICATION_NAMESPACE: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";
pub const NETCONF_NOTIFICATIONS_NAMESPACE: &str =
    "urn:ietf:params:xml:ns:yang:ietf-netconf-notifications";
/// Namespace of the `action` wrapper element
pub const YANG_1_NAMESPACE: &str = "urn:ietf:params:xml:ns:yang:1";

/// QName in the base protocol namespace
pub fn netconf_qname(local_name: &str) -> QName {
    QName::create(NETCONF_BASE_NAMESPACE, local_name)
}

/// QName in the notification namespace
pub fn notification_qname(local_name: &str) -> QName {
    QName::create(NOTIFICATION_NAMESPACE, local_name)
}

/// QName in the monitoring namespace
pub fn monitoring_qname(local_name: &str) -> QName {
    QName::create(MONITORING_NAMESPACE, local_name)
}

const IETF_NETCONF: &str = r#"
module ietf-netconf {
  namespace "urn:ietf:params:xml:ns:netconf:base:1.0";
  prefix nc;

  revision 2011-06-01 {
    description "NETCONF protocol operations (subset)";
  }

  typedef session-id-type {
    type uint32;
  }

  rpc get-config {
    input {
      container source {
        choice config-source {
          leaf candidate { type empty; }
          leaf running { type empty; }
          leaf startup { type empty; }
        }
      }
      anyxml filter;
    }
    output {
      anyxml data;
    }
  }

  rpc edit-config {
    input {
      container target {
        choice config-target {
          leaf candidate { type empty; }
          leaf running { type empty; }
        }
      }
      leaf default-operation {
        type enumeration {
          enum merge;
          enum replace;
          enum none;
        }
      }
      leaf test-option {
        type enumeration {
          enum test-then-set;
          enum set;
          enum test-only;
        }
      }
      leaf error-option {
        type enumeration {
          enum stop-on-error;
          enum continue-on-error;
          enum rollback-on-error;
        }
      }
      choice edit-content {
        anyxml config;
        leaf url { type string; }
      }
    }
  }

  rpc copy-config {
    input {
      container target {
        choice config-target {
          leaf candidate { type empty; }
          leaf running { type empty; }
          leaf startup { type empty; }
          leaf url { type string; }
        }
      }
      container source {
        choice config-source {
          leaf candidate { type empty; }
          leaf running { type empty; }
          leaf startup { type empty; }
          leaf url { type string; }
          anyxml config;
        }
      }
    }
  }

  rpc delete-config {
    input {
      container target {
        choice config-target {
          leaf startup { type empty; }
          leaf url { type string; }
        }
      }
    }
  }

  rpc lock {
    input {
      container target {
        choice config-target {
          leaf candidate { type empty; }
          leaf running { type empty; }
          leaf startup { type empty; }
        }
      }
    }
  }

  rpc unlock {
    input {
      container target {
        choice config-target {
          leaf candidate { type empty; }
          leaf running { type empty; }
          leaf startup { type empty; }
        }
      }
    }
  }

  rpc get {
    input {
      anyxml filter;
    }
    output {
      anyxml data;
    }
  }

  rpc close-session;

  rpc kill-session {
    input {
      leaf session-id { type session-id-type; }
    }
  }

  rpc commit {
    input {
      leaf confirmed { type empty; }
      leaf confirm-timeout { type uint32; }
      leaf persist { type string; }
      leaf persist-id { type string; }
    }
  }

  rpc cancel-commit {
    input {
      leaf persist-id { type string; }
    }
  }

  rpc discard-changes;

  rpc validate {
    input {
      container source {
        choice config-source {
          leaf candidate { type empty; }
          leaf running { type empty; }
          leaf startup { type empty; }
          leaf url { type string; }
          anyxml config;
        }
      }
    }
  }
}
"#;

const NOTIFICATIONS: &str = r#"
module notifications {
  namespace "urn:ietf:params:xml:ns:netconf:notification:1.0";
  prefix ncEvent;

  revision 2008-07-14;

  rpc create-subscription {
    input {
      leaf stream { type string; }
      anyxml filter;
      leaf startTime { type string; }
      leaf stopTime { type string; }
    }
  }
}
"#;

const IETF_NETCONF_MONITORING: &str = r#"
module ietf-netconf-monitoring {
  namespace "urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring";
  prefix ncm;

  revision 2010-10-04;

  identity schema-format;

  container netconf-state {
    config false;

    container capabilities {
      leaf-list capability { type string; }
    }

    container schemas {
      list schema {
        key "identifier version format";
        leaf identifier { type string; }
        leaf version { type string; }
        leaf format {
          type identityref { base schema-format; }
        }
        leaf namespace { type string; }
        leaf-list location { type string; }
      }
    }
  }

  rpc get-schema {
    input {
      leaf identifier { type string; }
      leaf version { type string; }
      leaf format {
        type identityref { base schema-format; }
      }
    }
    output {
      anyxml data;
    }
  }
}
"#;

const IETF_NETCONF_NOTIFICATIONS: &str = r#"
module ietf-netconf-notifications {
  namespace "urn:ietf:params:xml:ns:yang:ietf-netconf-notifications";
  prefix ncn;

  revision 2012-02-06;

  notification netconf-capability-change {
    container changed-by {
      choice server-or-user {
        leaf server { type empty; }
        leaf username { type string; }
      }
    }
    leaf-list added-capability { type string; }
    leaf-list deleted-capability { type string; }
    leaf-list modified-capability { type string; }
  }

  notification netconf-session-end {
    leaf username { type string; }
    leaf session-id { type uint32; }
    leaf termination-reason { type string; }
  }
}
"#;

const BASE_MODULES: [(&str, &str, &str); 4] = [
    ("ietf-netconf", "2011-06-01", IETF_NETCONF),
    ("notifications", "2008-07-14", NOTIFICATIONS),
    ("ietf-netconf-monitoring", "2010-10-04", IETF_NETCONF_MONITORING),
    ("ietf-netconf-notifications", "2012-02-06", IETF_NETCONF_NOTIFICATIONS),
];

/// Identifier of the embedded `notifications` module
pub fn notifications_source_id() -> Option<SourceIdentifier> {
    Revision::parse("2008-07-14")
        .ok()
        .map(|rev| SourceIdentifier::new("notifications", Some(rev)))
}

/// The embedded base sources with their identifiers
pub fn base_sources() -> Vec<SchemaSource> {
    BASE_MODULES
        .iter()
        .filter_map(|(name, revision, text)| {
            Revision::parse(revision)
                .ok()
                .map(|rev| SchemaSource::yang(SourceIdentifier::new(*name, Some(rev)), *text))
        })
        .collect()
}

/// Assembled base protocol schema
#[derive(Debug, Clone)]
pub struct BaseSchema {
    context: Arc<SchemaContext>,
}

impl BaseSchema {
    pub fn new() -> Result<Self> {
        let context = assemble(&base_sources()).map_err(|cause| Error::ResolutionFailed {
            device: "base-schema".into(),
            attempts: 1,
            cause,
        })?;
        Ok(Self {
            context: Arc::new(context),
        })
    }

    pub fn context(&self) -> &Arc<SchemaContext> {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaNode;

    #[test]
    fn test_base_schema_assembles() {
        let base = BaseSchema::new().unwrap();
        let ctx = base.context();
        assert_eq!(ctx.modules().len(), 4);
        for rpc in ["get", "get-config", "edit-config", "lock", "unlock", "commit", "discard-changes", "validate"] {
            assert!(ctx.rpc(&netconf_qname(rpc)).is_some(), "missing rpc {}", rpc);
        }
        assert!(ctx.rpc(&notification_qname("create-subscription")).is_some());
        assert!(ctx.rpc(&monitoring_qname("get-schema")).is_some());
    }

    #[test]
    fn test_monitoring_schema_list_keys() {
        let base = BaseSchema::new().unwrap();
        let state = base.context().data_child(&monitoring_qname("netconf-state")).unwrap();
        let schema = state
            .data_child(&monitoring_qname("schemas"))
            .and_then(|s| s.data_child(&monitoring_qname("schema")))
            .unwrap();
        match schema {
            SchemaNode::List(list) => assert_eq!(list.keys.len(), 3),
            other => panic!("unexpected {}", other.kind()),
        }
    }
}
