use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalancerKind {
    Network,
    Application,
}

impl fmt::Display for BalancerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalancerKind::Network => f.write_str("network"),
            BalancerKind::Application => f.write_str("application"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficProtocol {
    Tcp,
    Udp,
    Tls,
    Http,
    Https,
}

impl TrafficProtocol {
    /// Protocol a target group must speak to accept traffic from a listener
    /// of this protocol. TLS and HTTPS terminate at the balancer.
    pub fn backend(&self) -> TrafficProtocol {
        match self {
            TrafficProtocol::Tls => TrafficProtocol::Tcp,
            TrafficProtocol::Https => TrafficProtocol::Http,
            other => *other,
        }
    }

    pub fn allowed_on(&self, kind: BalancerKind) -> bool {
        match kind {
            BalancerKind::Network => matches!(
                self,
                TrafficProtocol::Tcp | TrafficProtocol::Udp | TrafficProtocol::Tls
            ),
            BalancerKind::Application => {
                matches!(self, TrafficProtocol::Http | TrafficProtocol::Https)
            }
        }
    }

    /// Whether the container side of this protocol is a TCP port.
    pub fn is_stream(&self) -> bool {
        !matches!(self, TrafficProtocol::Udp)
    }
}

impl fmt::Display for TrafficProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrafficProtocol::Tcp => "TCP",
            TrafficProtocol::Udp => "UDP",
            TrafficProtocol::Tls => "TLS",
            TrafficProtocol::Http => "HTTP",
            TrafficProtocol::Https => "HTTPS",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerDeclaration {
    pub name: String,
    pub port: u16,
    pub protocol: TrafficProtocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroupDeclaration {
    pub name: String,
    pub port: u16,
    pub protocol: TrafficProtocol,
    /// Service whose tasks register as targets.
    pub service: String,
    #[serde(default, rename = "listener")]
    pub listeners: Vec<ListenerDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerDeclaration {
    pub name: String,
    pub kind: BalancerKind,
    #[serde(default = "default_external")]
    pub external: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_sets: Vec<String>,
    #[serde(default, rename = "target_group")]
    pub target_groups: Vec<TargetGroupDeclaration>,
}

fn default_external() -> bool {
    true
}

impl LoadBalancerDeclaration {
    pub fn listeners(
        &self,
    ) -> impl Iterator<Item = (&TargetGroupDeclaration, &ListenerDeclaration)> {
        self.target_groups
            .iter()
            .flat_map(|tg| tg.listeners.iter().map(move |l| (tg, l)))
    }
}
