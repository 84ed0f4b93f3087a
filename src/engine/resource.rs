use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    RuleSet,
    Cluster,
    Repository,
    Image,
    Namespace,
    Discovery,
    LoadBalancer,
    TargetGroup,
    Listener,
    Service,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 11] = [
        ResourceKind::Network,
        ResourceKind::RuleSet,
        ResourceKind::Cluster,
        ResourceKind::Repository,
        ResourceKind::Image,
        ResourceKind::Namespace,
        ResourceKind::Discovery,
        ResourceKind::LoadBalancer,
        ResourceKind::TargetGroup,
        ResourceKind::Listener,
        ResourceKind::Service,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::RuleSet => "rule_set",
            ResourceKind::Cluster => "cluster",
            ResourceKind::Repository => "repository",
            ResourceKind::Image => "image",
            ResourceKind::Namespace => "namespace",
            ResourceKind::Discovery => "discovery",
            ResourceKind::LoadBalancer => "load_balancer",
            ResourceKind::TargetGroup => "target_group",
            ResourceKind::Listener => "listener",
            ResourceKind::Service => "service",
        }
    }

    /// Properties the provider cannot change in place.
    pub fn replacement_keys(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Network => &["cidr", "availability_zones", "subnets"],
            ResourceKind::RuleSet => &["network"],
            ResourceKind::Cluster => &["name"],
            ResourceKind::Repository => &["name"],
            ResourceKind::Image => &["reference"],
            ResourceKind::Namespace => &["name", "network"],
            ResourceKind::Discovery => &["name", "namespace", "record_type"],
            ResourceKind::LoadBalancer => &["kind", "external", "subnets"],
            ResourceKind::TargetGroup => &["port", "protocol", "load_balancer"],
            ResourceKind::Listener => &["target_group"],
            ResourceKind::Service => &["cluster", "name"],
        }
    }

    /// Short prefix used for provider-assigned identifiers.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ResourceKind::Network => "vpc",
            ResourceKind::RuleSet => "sg",
            ResourceKind::Cluster => "cluster",
            ResourceKind::Repository => "repo",
            ResourceKind::Image => "img",
            ResourceKind::Namespace => "ns",
            ResourceKind::Discovery => "srv",
            ResourceKind::LoadBalancer => "lb",
            ResourceKind::TargetGroup => "tg",
            ResourceKind::Listener => "lsn",
            ResourceKind::Service => "svc",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown resource kind '{s}'"))
    }
}

/// `<kind>.<name>`, unique within a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub kind: ResourceKind,
    pub name: String,
}

impl Address {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Address {
            kind,
            name: name.into(),
        }
    }

    /// Placeholder for an attribute only known once this resource exists.
    pub fn attr(&self, attribute: &str) -> String {
        format!("${{{self}.{attribute}}}")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once('.')
            .ok_or_else(|| anyhow::anyhow!("Invalid address '{s}'. Expected <kind>.<name>"))?;
        if name.is_empty() {
            return Err(anyhow::anyhow!("Invalid address '{s}': empty name"));
        }
        Ok(Address::new(kind.parse()?, name))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Free text from the descriptor. `$` is doubled so it never opens a
/// placeholder.
pub fn literal(text: &str) -> String {
    text.replace('$', "$$")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    /// Body of a `${...}` placeholder.
    Placeholder(&'a str),
}

/// Split compiled text into literal runs and placeholders, undoing `$$`.
pub fn segments(text: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(at) = rest.find('$') {
        if at > 0 {
            out.push(Segment::Text(&rest[..at]));
        }
        let tail = &rest[at..];
        let body = tail
            .strip_prefix("${")
            .and_then(|t| t.find('}').map(|end| &t[..end]));
        if let Some(body) = body {
            out.push(Segment::Placeholder(body));
            rest = &tail[body.len() + 3..];
        } else {
            out.push(Segment::Text("$"));
            rest = tail.strip_prefix("$$").unwrap_or(&tail[1..]);
        }
    }
    if !rest.is_empty() {
        out.push(Segment::Text(rest));
    }
    out
}

/// Attribute reference such as `listener.listener1.hostname`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRef {
    pub address: Address,
    pub attribute: String,
}

impl FromStr for AttributeRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, attribute) = s.rsplit_once('.').ok_or_else(|| {
            anyhow::anyhow!("Invalid reference '{s}'. Expected <kind>.<name>.<attribute>")
        })?;
        Ok(AttributeRef {
            address: address.parse()?,
            attribute: attribute.to_string(),
        })
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.address, self.attribute)
    }
}
