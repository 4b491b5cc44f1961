//! Schema context assembly
//!
//! Turns a set of schema sources into a [`SchemaContext`], or reports which
//! sources prevent assembly so the resolution controller can retry without
//! them.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use thiserror::Error;

use super::yang::{check_unique, compile_module, parse_statements, CompiledModule, PendingAugment};
use super::{Module, SchemaContext, SchemaNode};
use crate::qname::QName;
use crate::source::{SchemaSource, SourceIdentifier, SourceKind};

/// Why a set of sources could not be assembled
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// A required source was not part of the set
    #[error("Schema source {0} is not available")]
    MissingSource(SourceIdentifier),

    /// A source is unparsable or conflicts with another source
    #[error("Unable to resolve {id}: {reason}")]
    FailedSource { id: SourceIdentifier, reason: String },

    /// Some sources import modules that are not present
    #[error("Unsatisfied imports: {}", describe_unsatisfied(.unsatisfied))]
    UnsatisfiedImports {
        /// Source -> names of the imports it could not satisfy
        unsatisfied: BTreeMap<SourceIdentifier, Vec<String>>,
        /// Sources whose imports were all satisfied
        resolved: Vec<SourceIdentifier>,
    },

    #[error("No schema sources to assemble")]
    NoSources,
}

impl ResolutionError {
    /// Sources to drop before the next attempt
    pub fn offending(&self) -> Vec<SourceIdentifier> {
        match self {
            ResolutionError::MissingSource(id) => vec![id.clone()],
            ResolutionError::FailedSource { id, .. } => vec![id.clone()],
            ResolutionError::UnsatisfiedImports { unsatisfied, .. } => {
                unsatisfied.keys().cloned().collect()
            }
            ResolutionError::NoSources => Vec::new(),
        }
    }
}

fn describe_unsatisfied(unsatisfied: &BTreeMap<SourceIdentifier, Vec<String>>) -> String {
    unsatisfied
        .iter()
        .map(|(id, imports)| format!("{} -> [{}]", id, imports.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Builds schema contexts from sources
#[async_trait]
pub trait ContextFactory: Send + Sync {
    async fn create_context(
        &self,
        sources: &[SchemaSource],
    ) -> std::result::Result<SchemaContext, ResolutionError>;
}

/// Default factory compiling YANG text sources
#[derive(Debug, Clone, Copy, Default)]
pub struct YangContextFactory;

#[async_trait]
impl ContextFactory for YangContextFactory {
    async fn create_context(
        &self,
        sources: &[SchemaSource],
    ) -> std::result::Result<SchemaContext, ResolutionError> {
        assemble(sources)
    }
}

fn failed(id: &SourceIdentifier, reason: impl Into<String>) -> ResolutionError {
    ResolutionError::FailedSource {
        id: id.clone(),
        reason: reason.into(),
    }
}

/// Assemble a context from YANG sources
///
/// # Arguments
/// * `sources` - Sources to compile; identifiers with a revision must match
///   the latest revision declared by the module text
pub fn assemble(sources: &[SchemaSource]) -> std::result::Result<SchemaContext, ResolutionError> {
    if sources.is_empty() {
        return Err(ResolutionError::NoSources);
    }

    let mut compiled: Vec<(SourceIdentifier, CompiledModule)> = Vec::new();
    for source in sources {
        let id = source.id();
        if let SourceKind::Other(kind) = source.kind() {
            return Err(failed(id, format!("unsupported source kind '{}'", kind)));
        }
        let statement = parse_statements(source.text()).map_err(|e| failed(id, e.to_string()))?;
        let module = compile_module(&statement).map_err(|e| failed(id, e.to_string()))?;

        if module.module.name != id.name() {
            return Err(failed(id, format!("source declares module '{}'", module.module.name)));
        }
        if id.revision().is_some() && module.module.revision.as_ref() != id.revision() {
            let declared = module
                .module
                .revision
                .as_ref()
                .map_or_else(|| "no revision".to_string(), |r| format!("revision {}", r));
            return Err(failed(id, format!("source declares {}", declared)));
        }
        if let Some((other, _)) = compiled.iter().find(|(_, m)| m.module.name == module.module.name) {
            return Err(failed(id, format!("module already provided by {}", other)));
        }
        if let Some((other, _)) = compiled
            .iter()
            .find(|(_, m)| m.module.namespace == module.module.namespace)
        {
            return Err(failed(
                id,
                format!("namespace {} already used by {}", module.module.namespace, other),
            ));
        }
        compiled.push((id.clone(), module));
    }

    check_imports(&compiled)?;

    let (ids, modules): (Vec<_>, Vec<_>) = compiled.into_iter().unzip();
    let mut augments = Vec::new();
    let mut modules: Vec<Module> = modules
        .into_iter()
        .enumerate()
        .map(|(i, compiled)| {
            augments.extend(compiled.augments.into_iter().map(|augment| (i, augment)));
            compiled.module
        })
        .collect();

    apply_augments(&ids, &mut modules, augments)?;
    log::debug!("Assembled schema context from {} module(s)", modules.len());
    Ok(SchemaContext::new(modules))
}

fn check_imports(
    compiled: &[(SourceIdentifier, CompiledModule)],
) -> std::result::Result<(), ResolutionError> {
    let available: HashMap<&str, &CompiledModule> = compiled
        .iter()
        .map(|(_, m)| (m.module.name.as_str(), m))
        .collect();
    let satisfied = |import: &super::Import| {
        available.get(import.module.as_str()).is_some_and(|m| {
            import.revision.is_none() || import.revision == m.module.revision
        })
    };

    // Fixpoint: a module resolves once all of its imports resolved
    let mut resolved: BTreeSet<&str> = BTreeSet::new();
    loop {
        let before = resolved.len();
        for (_, m) in compiled {
            if !resolved.contains(m.module.name.as_str())
                && m.module
                    .imports
                    .iter()
                    .all(|i| satisfied(i) && resolved.contains(i.module.as_str()))
            {
                resolved.insert(m.module.name.as_str());
            }
        }
        if resolved.len() == before {
            break;
        }
    }

    if resolved.len() == compiled.len() {
        return Ok(());
    }

    let mut unsatisfied = BTreeMap::new();
    let mut resolved_ids = Vec::new();
    for (id, m) in compiled {
        if resolved.contains(m.module.name.as_str()) {
            resolved_ids.push(id.clone());
            continue;
        }
        let missing = m
            .module
            .imports
            .iter()
            .filter(|i| !resolved.contains(i.module.as_str()) || !satisfied(i))
            .map(|i| match &i.revision {
                Some(rev) => format!("{}@{}", i.module, rev),
                None => i.module.clone(),
            })
            .collect();
        unsatisfied.insert(id.clone(), missing);
    }
    Err(ResolutionError::UnsatisfiedImports {
        unsatisfied,
        resolved: resolved_ids,
    })
}

fn apply_augments(
    ids: &[SourceIdentifier],
    modules: &mut [Module],
    augments: Vec<(usize, PendingAugment)>,
) -> std::result::Result<(), ResolutionError> {
    let namespaces: HashMap<String, String> = modules
        .iter()
        .map(|m| (m.name.clone(), m.namespace.clone()))
        .collect();

    // Augments may target nodes added by other augments, so retry until stuck
    let mut pending = augments;
    while !pending.is_empty() {
        let before = pending.len();
        let mut remaining = Vec::new();
        for (owner, augment) in pending {
            let target = resolve_target(&modules[owner], &namespaces, &augment)
                .map_err(|reason| failed(&ids[owner], reason))?;
            match find_target_mut(modules, &target) {
                Some(node) => insert_augment(node, augment).map_err(|reason| failed(&ids[owner], reason))?,
                None => remaining.push((owner, augment)),
            }
        }
        if remaining.len() == before {
            let (owner, augment) = &remaining[0];
            return Err(failed(
                &ids[*owner],
                format!("augment target {} not found", augment.target_text),
            ));
        }
        pending = remaining;
    }
    Ok(())
}

fn resolve_target(
    owner: &Module,
    namespaces: &HashMap<String, String>,
    augment: &PendingAugment,
) -> std::result::Result<Vec<QName>, String> {
    augment
        .target
        .iter()
        .map(|(prefix, local)| {
            let namespace = match prefix.as_deref() {
                None => owner.namespace.clone(),
                Some(p) if p == owner.prefix => owner.namespace.clone(),
                Some(p) => {
                    let import = owner
                        .imports
                        .iter()
                        .find(|i| i.prefix == p)
                        .ok_or_else(|| format!("unknown prefix '{}' in augment {}", p, augment.target_text))?;
                    namespaces
                        .get(&import.module)
                        .cloned()
                        .ok_or_else(|| format!("imported module '{}' not loaded", import.module))?
                }
            };
            Ok(QName::create(namespace, local.clone()))
        })
        .collect()
}

fn find_target_mut<'a>(modules: &'a mut [Module], target: &[QName]) -> Option<&'a mut SchemaNode> {
    let (first, rest) = target.split_first()?;
    let module = modules.iter_mut().find(|m| m.namespace == first.namespace())?;
    let mut node = find_child_mut(&mut module.children, first)?;
    for segment in rest {
        node = match node {
            SchemaNode::Container(c) => find_child_mut(&mut c.children, segment)?,
            SchemaNode::List(l) => find_child_mut(&mut l.children, segment)?,
            _ => return None,
        };
    }
    Some(node)
}

fn find_child_mut<'a>(children: &'a mut [SchemaNode], name: &QName) -> Option<&'a mut SchemaNode> {
    for node in children.iter_mut() {
        match node {
            SchemaNode::Choice(choice) => {
                for case in choice.cases.iter_mut() {
                    if let Some(found) = find_child_mut(&mut case.children, name) {
                        return Some(found);
                    }
                }
            }
            other => {
                if other.qname().matches(name) {
                    return Some(other);
                }
            }
        }
    }
    None
}

fn insert_augment(node: &mut SchemaNode, augment: PendingAugment) -> std::result::Result<(), String> {
    let (children, actions, notifications) = match node {
        SchemaNode::Container(c) => (&mut c.children, &mut c.actions, &mut c.notifications),
        SchemaNode::List(l) => (&mut l.children, &mut l.actions, &mut l.notifications),
        other => {
            return Err(format!(
                "augment target {} is a {}",
                augment.target_text,
                other.kind()
            ))
        }
    };
    children.extend(augment.children);
    check_unique(children, 0).map_err(|e| format!("augment {}: {}", augment.target_text, e.message))?;
    actions.extend(augment.actions);
    notifications.extend(augment.notifications);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: &str, text: &str) -> SchemaSource {
        SchemaSource::yang(SourceIdentifier::parse(id).unwrap(), text)
    }

    const A: &str = "module a { namespace urn:a; prefix a; revision 2020-01-01; container top; }";
    const B: &str = r#"module b { namespace urn:b; prefix b; import a { prefix a; }
        augment /a:top { leaf x { type string; } } }"#;

    #[test]
    fn test_assemble_with_augment() {
        let ctx = assemble(&[source("a@2020-01-01", A), source("b", B)]).unwrap();
        let top = ctx.data_child(&QName::create("urn:a", "top")).unwrap();
        assert!(top.data_child(&QName::create("urn:b", "x")).is_some());
    }

    #[test]
    fn test_unparsable_source_is_named() {
        let err = assemble(&[source("a@2020-01-01", A), source("b", "module b {")]).unwrap_err();
        assert_eq!(err.offending(), vec![SourceIdentifier::parse("b").unwrap()]);
    }

    #[test]
    fn test_revision_mismatch() {
        let err = assemble(&[source("a@2019-01-01", A)]).unwrap_err();
        assert!(matches!(err, ResolutionError::FailedSource { .. }));
        assert!(err.to_string().contains("revision 2020-01-01"));
    }

    #[test]
    fn test_unsatisfied_imports() {
        let c = "module c { namespace urn:c; prefix c; import b { prefix b; } }";
        let err = assemble(&[source("b", B), source("c", c)]).unwrap_err();
        match err {
            ResolutionError::UnsatisfiedImports { unsatisfied, resolved } => {
                // c is unresolved transitively through b
                assert_eq!(unsatisfied.len(), 2);
                assert!(resolved.is_empty());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_conflicting_augments() {
        let b2 = r#"module b2 { namespace urn:b2; prefix b; import b { prefix other; } import a { prefix a; }
            augment /a:top { leaf x { type string; } } }"#;
        // Distinct namespaces: both augments coexist
        assert!(assemble(&[source("a@2020-01-01", A), source("b", B), source("b2", b2)]).is_ok());

        let dup = "module d { namespace urn:a2; prefix d; import a { prefix a; } augment /a:top { leaf x { type string; } } augment /a:top { leaf x { type string; } } }";
        let err = assemble(&[source("a@2020-01-01", A), source("d", dup)]).unwrap_err();
        assert_eq!(err.offending(), vec![SourceIdentifier::parse("d").unwrap()]);
    }

    #[test]
    fn test_namespace_conflict() {
        let clash = "module other { namespace urn:a; prefix o; }";
        let err = assemble(&[source("a@2020-01-01", A), source("other", clash)]).unwrap_err();
        assert_eq!(err.offending(), vec![SourceIdentifier::parse("other").unwrap()]);
    }
}
