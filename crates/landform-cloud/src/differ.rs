//! Differ
//!
//! Classifies every address found in the resource graph or the recorded
//! state into a [`Change`].

use crate::action::{Change, ChangeKind, ChangeSet};
use crate::error::{CloudError, ProviderError, Result};
use crate::provider::ProviderRegistry;
use crate::state::{StateRecord, StateSnapshot, fingerprint};
use landform_core::{Address, Attributes, Outputs, ResourceGraph, evaluate};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Compare a resource graph against recorded state
pub struct Differ<'a> {
    graph: &'a ResourceGraph,
    providers: &'a ProviderRegistry,
}

impl<'a> Differ<'a> {
    pub fn new(graph: &'a ResourceGraph, providers: &'a ProviderRegistry) -> Self {
        Self { graph, providers }
    }

    /// Changes needed to reach the declared state
    ///
    /// Nodes are visited dependencies first, so a dependency that is about
    /// to be created or replaced makes the attributes referencing it
    /// unknown in its dependents.
    pub fn diff(&self, snapshot: &StateSnapshot) -> Result<ChangeSet> {
        let mut changes = ChangeSet::new();
        let mut outputs: BTreeMap<Address, Outputs> = BTreeMap::new();
        let mut replaced: BTreeSet<Address> = BTreeSet::new();

        for address in self.graph.topological_order() {
            let Some(node) = self.graph.get(&address) else {
                continue;
            };
            let record = snapshot.get(&address);

            if !node.enabled() {
                if let Some(record) = record {
                    changes.insert(destroy(record));
                }
                continue;
            }

            let provider = self
                .providers
                .resolve(&address, node.spec.provider.as_deref())?;
            let schema = provider.schema(&address.resource_type).ok_or_else(|| {
                CloudError::UnsupportedResource {
                    address: address.clone(),
                    resource_type: address.resource_type.clone(),
                }
            })?;

            let evaluated = evaluate(&node.spec, &outputs)?;

            let Some(record) = record else {
                outputs.insert(address.clone(), Outputs::Pending);
                changes.insert(Change {
                    address,
                    kind: ChangeKind::Create,
                    provider: provider.name().to_string(),
                    before: None,
                    changed: evaluated.values.keys().cloned().collect(),
                    after: Some(evaluated.values),
                    forces_replacement: BTreeSet::new(),
                    unknown: evaluated.unknown,
                });
                continue;
            };

            let unchanged = evaluated.is_fully_known()
                && fingerprint(&evaluated.values) == record.fingerprint
                && record.provider == provider.name();

            let mut changed = if unchanged {
                BTreeSet::new()
            } else {
                changed_fields(&record.inputs, &evaluated.values)
            };
            changed.extend(evaluated.unknown.iter().cloned());

            // A field pointing at a replaced resource cannot be repointed in
            // place: the old target is deleted before its successor exists
            let references_replaced = |field: &str| {
                node.spec.attributes.get(field).is_some_and(|expr| {
                    expr.referenced_addresses()
                        .iter()
                        .any(|target| replaced.contains(target))
                })
            };
            let mut forces_replacement: BTreeSet<String> = changed
                .iter()
                .filter(|field| {
                    schema.requires_replacement(field) || references_replaced(field.as_str())
                })
                .cloned()
                .collect();
            if record.provider != provider.name() {
                forces_replacement.insert("provider".to_string());
            }

            let kind = if forces_replacement.is_empty() && changed.is_empty() {
                ChangeKind::NoOp
            } else if forces_replacement.is_empty() {
                ChangeKind::UpdateInPlace
            } else {
                ChangeKind::Replace
            };

            let visible = match kind {
                ChangeKind::NoOp => Outputs::Known(record.outputs.clone()),
                ChangeKind::UpdateInPlace if evaluated.is_fully_known() => {
                    let mut merged = record.outputs.clone();
                    merged.extend(evaluated.values.clone());
                    Outputs::Known(merged)
                }
                _ => Outputs::Pending,
            };
            outputs.insert(address.clone(), visible);
            if kind == ChangeKind::Replace {
                replaced.insert(address.clone());
            }

            debug!(%address, %kind, changed = changed.len(), "Classified resource");
            changes.insert(Change {
                address,
                kind,
                provider: provider.name().to_string(),
                before: Some(record.inputs.clone()),
                after: Some(evaluated.values),
                changed,
                forces_replacement,
                unknown: evaluated.unknown,
            });
        }

        // Recorded but no longer declared
        for record in snapshot.iter() {
            if !self.graph.contains(&record.address) {
                changes.insert(destroy(record));
            }
        }

        info!(summary = %changes.summary(), "Diff complete");
        Ok(changes)
    }
}

/// Destroy every recorded resource
pub fn diff_destroy_all(snapshot: &StateSnapshot) -> ChangeSet {
    let mut changes = ChangeSet::new();
    for record in snapshot.iter() {
        changes.insert(destroy(record));
    }
    changes
}

fn destroy(record: &StateRecord) -> Change {
    Change {
        address: record.address.clone(),
        kind: ChangeKind::Destroy,
        provider: record.provider.clone(),
        before: Some(record.inputs.clone()),
        after: None,
        changed: BTreeSet::new(),
        forces_replacement: BTreeSet::new(),
        unknown: BTreeSet::new(),
    }
}

/// Attribute names whose values differ, including added and removed ones
fn changed_fields(before: &Attributes, after: &Attributes) -> BTreeSet<String> {
    before
        .keys()
        .chain(after.keys())
        .filter(|key| before.get(*key) != after.get(*key))
        .cloned()
        .collect()
}

/// Read every recorded resource back from its provider
///
/// Resources that no longer exist are dropped so they are planned for
/// creation again. Attributes that drifted from what was applied replace
/// the recorded inputs, so the diff plans them back.
pub async fn refresh(snapshot: &StateSnapshot, providers: &ProviderRegistry) -> Result<StateSnapshot> {
    let mut refreshed = snapshot.clone();

    for record in snapshot.iter() {
        let provider = match providers.get(&record.provider) {
            Some(provider) => provider,
            None => providers.resolve(&record.address, None)?,
        };

        let current = match provider.read(&record.resource_type, &record.id).await {
            Ok(current) => current,
            Err(ProviderError::NotFound(_)) => None,
            Err(source) => {
                return Err(CloudError::Provider {
                    address: record.address.clone(),
                    source,
                });
            }
        };

        let Some(current) = current else {
            warn!(address = %record.address, id = %record.id, "Resource no longer exists");
            refreshed.records.remove(&record.address);
            continue;
        };

        if let Some(entry) = refreshed.records.get_mut(&record.address) {
            for (key, applied) in &record.inputs {
                if let Some(actual) = current.get(key)
                    && actual != applied
                {
                    warn!(address = %record.address, attribute = %key, "Attribute drifted");
                    entry.inputs.insert(key.clone(), actual.clone());
                }
            }
            entry.fingerprint = fingerprint(&entry.inputs);
            entry.outputs = current;
        }
    }

    Ok(refreshed)
}
