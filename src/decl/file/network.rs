use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetRole {
    Public,
    Private,
}

impl fmt::Display for SubnetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubnetRole::Public => f.write_str("public"),
            SubnetRole::Private => f.write_str("private"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDeclaration {
    pub name: String,
    pub cidr: String,
    pub subnets: Vec<SubnetRole>,
    #[serde(default = "default_zones")]
    pub availability_zones: u8,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

fn default_zones() -> u8 {
    2
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDeclaration {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordType {
    A,
    #[serde(rename = "AAAA")]
    Aaaa,
    #[serde(rename = "SRV")]
    Srv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingPolicy {
    Multivalue,
    Weighted,
}

/// A DNS record kept in sync with the task addresses of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDeclaration {
    pub name: String,
    #[serde(default = "default_record_type")]
    pub record_type: RecordType,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default = "default_routing")]
    pub routing_policy: RoutingPolicy,
    /// Consecutive failed health signals before the record drops an address.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_record_type() -> RecordType {
    RecordType::A
}

fn default_ttl() -> u32 {
    10
}

fn default_routing() -> RoutingPolicy {
    RoutingPolicy::Multivalue
}

fn default_failure_threshold() -> u32 {
    1
}

/// Private DNS zone scoped to the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "record")]
    pub records: Vec<RecordDeclaration>,
}

impl NamespaceDeclaration {
    pub fn record(&self, name: &str) -> Option<&RecordDeclaration> {
        self.records.iter().find(|r| r.name == name)
    }

    /// Fully qualified name a record answers on.
    pub fn fqdn(&self, record: &str) -> String {
        format!("{}.{}", record, self.name)
    }
}
