use serde::{Deserialize, Serialize};
use std::fmt;

use crate::decl::file::ports::PortRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleProtocol {
    Tcp,
    Udp,
    Icmp,
    All,
}

impl fmt::Display for RuleProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuleProtocol::Tcp => "tcp",
            RuleProtocol::Udp => "udp",
            RuleProtocol::Icmp => "icmp",
            RuleProtocol::All => "all",
        };
        f.write_str(s)
    }
}

/// One traffic permission. The peer is a set of CIDR blocks, a set of other
/// rule sets (by name), or both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDeclaration {
    pub protocol: RuleProtocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cidr_blocks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_sets: Vec<String>,
}

impl RuleDeclaration {
    /// Ports covered by the rule. `all` rules without explicit ports cover everything.
    pub fn port_range(&self) -> PortRange {
        self.ports.unwrap_or(PortRange::ALL)
    }

    pub fn is_open_to_anywhere(&self) -> bool {
        self.cidr_blocks.iter().any(|c| c.trim() == "0.0.0.0/0")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Explicit confirmation that an open ingress rule may guard a private service.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub acknowledge_open_ingress: bool,
    #[serde(default)]
    pub ingress: Vec<RuleDeclaration>,
    #[serde(default)]
    pub egress: Vec<RuleDeclaration>,
}

impl RuleSetDeclaration {
    pub fn has_open_ingress(&self) -> bool {
        self.ingress.iter().any(RuleDeclaration::is_open_to_anywhere)
    }
}
