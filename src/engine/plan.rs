//! Diff the compiled graph against the recorded state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde_json::Value;

use crate::decl::file::TopologyFile;
use crate::decl::validate;
use crate::engine::graph::{levels, ResourceGraph};
use crate::engine::resource::{segments, Address, AttributeRef, Segment};
use crate::provider::{Provider, ProviderError};
use crate::state::snapshot::StateSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Action {
    Create,
    Update,
    Replace,
    Delete,
}

impl Action {
    pub fn symbol(&self) -> &'static str {
        match self {
            Action::Create => "+",
            Action::Update => "~",
            Action::Replace => "-/+",
            Action::Delete => "-",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Replace => "replace",
            Action::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// What the provider reported for a recorded resource that differs from state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    Missing,
    Modified,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub address: Address,
    pub action: Action,
    /// Top-level properties that differ from state.
    pub changed: Vec<String>,
    pub drift: Option<Drift>,
    /// Set when this change only happens because a dependency is replaced.
    pub caused_by: Option<Address>,
}

impl Change {
    fn new(address: &Address, action: Action) -> Self {
        Change {
            address: address.clone(),
            action,
            changed: vec![],
            drift: None,
            caused_by: None,
        }
    }

    pub fn reason(&self) -> String {
        if let Some(drift) = &self.drift {
            return match drift {
                Drift::Missing => "deleted outside of topoctl".to_string(),
                Drift::Modified => "modified outside of topoctl".to_string(),
            };
        }
        if let Some(cause) = &self.caused_by {
            return format!("{cause} is replaced");
        }
        if self.changed.is_empty() {
            String::new()
        } else {
            self.changed.join(", ")
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    /// Deletes in reverse dependency order, then the rest in apply order.
    pub changes: Vec<Change>,
    /// Recorded resources no longer declared, kept because pruning is off.
    pub orphans: Vec<Address>,
    pub unchanged: usize,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn deletes(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(|c| c.action == Action::Delete)
    }

    pub fn count(&self, action: Action) -> usize {
        self.changes.iter().filter(|c| c.action == action).count()
    }

    pub fn get(&self, address: &Address) -> Option<&Change> {
        self.changes.iter().find(|c| &c.address == address)
    }

    /// Non-delete changes grouped into waves of independent resources.
    pub fn waves(&self, graph: &ResourceGraph) -> Result<Vec<Vec<Address>>> {
        let empty = BTreeSet::new();
        let edges: BTreeMap<&Address, &BTreeSet<Address>> = self
            .changes
            .iter()
            .filter(|c| c.action != Action::Delete)
            .map(|c| {
                let deps = graph
                    .get(&c.address)
                    .map(|r| &r.dependencies)
                    .unwrap_or(&empty);
                (&c.address, deps)
            })
            .collect();
        Ok(levels(&edges)?)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} to create, {} to update, {} to replace, {} to delete",
            self.count(Action::Create),
            self.count(Action::Update),
            self.count(Action::Replace),
            self.count(Action::Delete)
        )
    }
}

fn changed_keys(recorded: &Value, desired: &Value) -> Vec<String> {
    let empty = serde_json::Map::new();
    let old = recorded.as_object().unwrap_or(&empty);
    let new = desired.as_object().unwrap_or(&empty);
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    keys.into_iter()
        .filter(|k| old.get(*k) != new.get(*k))
        .cloned()
        .collect()
}

/// Whether any placeholder inside `value` reads an attribute of `address`.
fn mentions(value: &Value, address: &Address) -> bool {
    match value {
        Value::String(s) => segments(s).into_iter().any(|segment| match segment {
            Segment::Placeholder(inner) => {
                AttributeRef::from_str(inner).is_ok_and(|r| &r.address == address)
            }
            Segment::Text(_) => false,
        }),
        Value::Array(items) => items.iter().any(|v| mentions(v, address)),
        Value::Object(map) => map.values().any(|v| mentions(v, address)),
        _ => false,
    }
}

/// Read every recorded resource back from the provider. Resources that still
/// exist get their attributes refreshed in `state`.
pub async fn refresh<P: Provider>(
    provider: &P,
    state: &mut StateSnapshot,
) -> Result<BTreeMap<Address, Drift>, ProviderError> {
    let mut drift = BTreeMap::new();
    for (address, recorded) in state.resources.iter_mut() {
        match provider.read(recorded.kind, &recorded.id).await? {
            None => {
                log::warn!("{address} ({}) no longer exists", recorded.id);
                drift.insert(address.clone(), Drift::Missing);
            }
            Some(observed) => {
                if observed.fingerprint != recorded.fingerprint {
                    log::warn!("{address} was modified outside of topoctl");
                    drift.insert(address.clone(), Drift::Modified);
                }
                recorded.attributes.extend(observed.attributes);
            }
        }
    }
    Ok(drift)
}

/// Refuse before any create when the network wants more zones than the region has.
pub async fn preflight<P: Provider>(provider: &P, file: &TopologyFile) -> Result<()> {
    let available = provider.available_zones(&file.project.region).await?;
    log::debug!(
        "Region {} offers {available} availability zone(s)",
        file.project.region
    );
    validate::check_zone_capacity(file, available)?;
    Ok(())
}

/// Everything `plan` and `apply` do before touching anything: zone capacity,
/// optional refresh, then the diff.
pub async fn prepare<P: Provider>(
    provider: &P,
    file: &TopologyFile,
    graph: &ResourceGraph,
    state: &mut StateSnapshot,
    refresh_first: bool,
    prune: bool,
) -> Result<Plan> {
    preflight(provider, file).await?;
    let drift = if refresh_first {
        refresh(provider, state).await?
    } else {
        BTreeMap::new()
    };
    compute(graph, state, &drift, prune)
}

pub fn compute(
    graph: &ResourceGraph,
    state: &StateSnapshot,
    drift: &BTreeMap<Address, Drift>,
    prune: bool,
) -> Result<Plan> {
    let mut plan = Plan::default();

    // Deletes go first, dependents before their dependencies.
    let orphans: BTreeMap<&Address, &BTreeSet<Address>> = state
        .resources
        .iter()
        .filter(|(address, _)| graph.get(address).is_none())
        .map(|(address, recorded)| (address, &recorded.dependencies))
        .collect();
    let orphan_waves = levels(&orphans)?;
    for address in orphan_waves.into_iter().rev().flatten() {
        if prune {
            plan.changes.push(Change::new(&address, Action::Delete));
        } else {
            plan.orphans.push(address);
        }
    }

    let mut replaced: BTreeSet<Address> = BTreeSet::new();
    for address in graph.order()? {
        let Some(resource) = graph.get(&address) else {
            continue;
        };
        let Some(recorded) = state.resources.get(&address) else {
            plan.changes.push(Change::new(&address, Action::Create));
            continue;
        };

        let changed = changed_keys(&recorded.properties, &resource.properties);
        let replacement_keys = address.kind.replacement_keys();

        let mut change = if !changed.is_empty() {
            let action = if changed.iter().any(|k| replacement_keys.contains(&k.as_str())) {
                Action::Replace
            } else {
                Action::Update
            };
            let mut change = Change::new(&address, action);
            change.changed = changed;
            Some(change)
        } else {
            match drift.get(&address) {
                Some(Drift::Missing) => {
                    let mut change = Change::new(&address, Action::Create);
                    change.drift = Some(Drift::Missing);
                    Some(change)
                }
                Some(Drift::Modified) => {
                    let mut change = Change::new(&address, Action::Update);
                    change.drift = Some(Drift::Modified);
                    Some(change)
                }
                None => None,
            }
        };

        // A dependency getting a new identity forces this resource to follow.
        if change.as_ref().is_none_or(|c| c.action == Action::Update) {
            let causes: Vec<&Address> = resource
                .dependencies
                .iter()
                .filter(|dep| replaced.contains(*dep))
                .filter(|dep| mentions(&resource.properties, dep))
                .collect();
            let forcing = causes.iter().copied().find(|cause| {
                replacement_keys.iter().any(|key| {
                    resource
                        .properties
                        .get(*key)
                        .is_some_and(|v| mentions(v, cause))
                })
            });
            if let Some(cause) = forcing.or(causes.first().copied()) {
                let action = if forcing.is_some() {
                    Action::Replace
                } else {
                    Action::Update
                };
                let entry = change.get_or_insert_with(|| Change::new(&address, action));
                entry.action = action;
                if entry.changed.is_empty() && entry.drift.is_none() {
                    entry.caused_by = Some(cause.clone());
                }
            }
        }

        match change {
            Some(change) => {
                // Recreating a vanished resource also hands out a new identity.
                if change.action == Action::Replace || change.drift == Some(Drift::Missing) {
                    replaced.insert(address.clone());
                }
                plan.changes.push(change);
            }
            None => plan.unchanged += 1,
        }
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::template::{render, TopologyParams, API};
    use crate::engine::graph::compile;
    use crate::engine::resource::ResourceKind;
    use crate::image::ImageArtifact;
    use crate::state::snapshot::ResourceState;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn images(file: &TopologyFile) -> BTreeMap<String, ImageArtifact> {
        file.services
            .iter()
            .flat_map(|s| s.containers.iter())
            .map(|c| {
                let digest = format!("sha256:{:0>64}", c.name.len());
                (
                    c.name.clone(),
                    ImageArtifact::new(&c.repository, &digest, &c.build.context, &c.build.recipe),
                )
            })
            .collect()
    }

    fn graph() -> ResourceGraph {
        let file = render(&TopologyParams::default());
        compile(&file, &images(&file)).unwrap()
    }

    /// State as if `graph` had been applied verbatim.
    fn applied(graph: &ResourceGraph) -> StateSnapshot {
        let mut state = StateSnapshot::default();
        for (address, resource) in &graph.resources {
            state.resources.insert(
                address.clone(),
                ResourceState {
                    kind: address.kind,
                    id: format!("{}-1", address.kind.id_prefix()),
                    properties: resource.properties.clone(),
                    fingerprint: resource.fingerprint(),
                    attributes: BTreeMap::new(),
                    dependencies: resource.dependencies.clone(),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
            );
        }
        state
    }

    #[test]
    fn empty_state_creates_everything() {
        let graph = graph();
        let plan = compute(&graph, &StateSnapshot::default(), &BTreeMap::new(), false).unwrap();
        assert_eq!(plan.count(Action::Create), graph.resources.len());
        assert_eq!(plan.unchanged, 0);
    }

    #[test]
    fn unchanged_descriptor_plans_nothing() {
        let graph = graph();
        let plan = compute(&graph, &applied(&graph), &BTreeMap::new(), false).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged, graph.resources.len());
    }

    #[test]
    fn desired_count_change_is_an_update() {
        let graph = graph();
        let state = applied(&graph);
        let mut file = render(&TopologyParams::default());
        file.services[0].desired_count = 3;
        let changed = compile(&file, &images(&file)).unwrap();

        let plan = compute(&changed, &state, &BTreeMap::new(), false).unwrap();
        assert_eq!(plan.changes.len(), 1);
        let change = &plan.changes[0];
        assert_eq!(change.address, Address::new(ResourceKind::Service, API));
        assert_eq!(change.action, Action::Update);
        assert_eq!(change.changed, vec!["desired_count".to_string()]);
    }

    #[test]
    fn cidr_change_replaces_network_and_cascades() {
        let graph = graph();
        let state = applied(&graph);
        let mut file = render(&TopologyParams::default());
        file.network.cidr = "10.1.0.0/16".into();
        let changed = compile(&file, &images(&file)).unwrap();

        let plan = compute(&changed, &state, &BTreeMap::new(), false).unwrap();
        let network = Address::new(ResourceKind::Network, "airtek-vpc");
        assert_eq!(plan.get(&network).unwrap().action, Action::Replace);

        // The rule set's network id is a replacement key, the cluster's is not.
        let rule_set = plan.get(&Address::new(ResourceKind::RuleSet, "web")).unwrap();
        assert_eq!(rule_set.action, Action::Replace);
        assert_eq!(rule_set.caused_by.as_ref(), Some(&network));
        let cluster = plan.get(&Address::new(ResourceKind::Cluster, "cluster")).unwrap();
        assert_eq!(cluster.action, Action::Update);
        // Untouched and unrelated.
        assert!(plan.get(&Address::new(ResourceKind::Repository, "web-repo")).is_none());
    }

    #[test]
    fn orphans_are_kept_unless_pruning() {
        let graph = graph();
        let mut state = applied(&graph);
        let stale = Address::new(ResourceKind::Repository, "old-repo");
        let mut recorded = state
            .resources
            .get(&Address::new(ResourceKind::Repository, "web-repo"))
            .unwrap()
            .clone();
        recorded.properties = serde_json::json!({"name": "old-repo"});
        state.resources.insert(stale.clone(), recorded);

        let kept = compute(&graph, &state, &BTreeMap::new(), false).unwrap();
        assert!(kept.is_empty());
        assert_eq!(kept.orphans, vec![stale.clone()]);

        let pruned = compute(&graph, &state, &BTreeMap::new(), true).unwrap();
        assert_eq!(pruned.deletes().count(), 1);
        assert_eq!(pruned.changes[0].address, stale);
    }

    #[test]
    fn pruned_deletes_run_dependents_first() {
        let graph = graph();
        let state = applied(&graph);
        let plan = compute(&ResourceGraph::default(), &state, &BTreeMap::new(), true).unwrap();
        let position = |kind| {
            plan.changes
                .iter()
                .position(|c| c.address.kind == kind)
                .unwrap()
        };
        assert!(position(ResourceKind::Service) < position(ResourceKind::Cluster));
        assert!(position(ResourceKind::Cluster) < position(ResourceKind::Network));
        assert!(position(ResourceKind::Listener) < position(ResourceKind::LoadBalancer));
    }

    #[test]
    fn drift_turns_into_changes() {
        let graph = graph();
        let state = applied(&graph);
        let api = Address::new(ResourceKind::Service, API);
        let repo = Address::new(ResourceKind::Repository, "api-repo");
        let drift = BTreeMap::from([
            (api.clone(), Drift::Modified),
            (repo.clone(), Drift::Missing),
        ]);

        let plan = compute(&graph, &state, &drift, false).unwrap();
        assert_eq!(plan.get(&api).unwrap().action, Action::Update);
        assert_eq!(plan.get(&repo).unwrap().action, Action::Create);
        assert_eq!(plan.get(&repo).unwrap().drift, Some(Drift::Missing));
    }
}
