use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::decl::file::network::SubnetRole;
use crate::decl::file::ports::Port;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDeclaration {
    pub name: String,
}

/// Build context and recipe, both relative to the descriptor directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDeclaration {
    pub context: PathBuf,
    pub recipe: PathBuf,
}

/// Environment value: a literal string or the internal URL of another service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Literal(String),
    Discovery {
        discovery: String,
        port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default = "default_scheme")]
        scheme: String,
    },
}

fn default_scheme() -> String {
    "http".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDeclaration {
    pub name: String,
    pub repository: String,
    #[serde(default)]
    pub ports: Vec<Port>,
    pub build: BuildDeclaration,
    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDeclaration {
    pub name: String,
    pub subnets: SubnetRole,
    pub rule_sets: Vec<String>,
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(rename = "container")]
    pub containers: Vec<ContainerDeclaration>,
}

fn default_desired_count() -> u32 {
    1
}

impl ServiceDeclaration {
    pub fn exposes(&self, port: u16) -> bool {
        self.containers
            .iter()
            .flat_map(|c| c.ports.iter())
            .any(|p| p.number() == port)
    }

    /// Services this one must wait for: explicit ones plus discovery env targets.
    pub fn service_dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = self.depends_on.iter().map(String::as_str).collect();
        for container in &self.containers {
            for value in container.env.values() {
                if let EnvValue::Discovery { discovery, .. } = value {
                    if !deps.contains(&discovery.as_str()) {
                        deps.push(discovery);
                    }
                }
            }
        }
        deps
    }
}
