pub mod balancer;
pub mod network;
pub mod ports;
pub mod rules;
pub mod service;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_REGION: &str = "local-1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDeclaration {
    pub name: String,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

/// The whole desired state, as written in `topology.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyFile {
    pub project: ProjectDeclaration,
    /// Output name to attribute reference, e.g. `listener.listener1.hostname`.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    pub network: network::NetworkDeclaration,
    pub cluster: network::ClusterDeclaration,
    pub namespace: network::NamespaceDeclaration,
    pub load_balancer: balancer::LoadBalancerDeclaration,
    #[serde(default, rename = "rule_set")]
    pub rule_sets: Vec<rules::RuleSetDeclaration>,
    #[serde(default, rename = "repository")]
    pub repositories: Vec<service::RepositoryDeclaration>,
    #[serde(default, rename = "service")]
    pub services: Vec<service::ServiceDeclaration>,
}

impl TopologyFile {
    pub fn service(&self, name: &str) -> Option<&service::ServiceDeclaration> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn rule_set(&self, name: &str) -> Option<&rules::RuleSetDeclaration> {
        self.rule_sets.iter().find(|r| r.name == name)
    }

    pub fn repository(&self, name: &str) -> Option<&service::RepositoryDeclaration> {
        self.repositories.iter().find(|r| r.name == name)
    }
}
