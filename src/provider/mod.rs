//! The boundary to the cloud. The engine only ever talks to a [`Provider`].

pub mod local;
pub mod remote;

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::{CliConfig, ProviderKind};
use crate::engine::resource::{segments, Address, AttributeRef, ResourceKind, Segment};
use crate::state::snapshot::StateSnapshot;
use local::LocalProvider;
use remote::RemoteProvider;

pub type Attributes = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Worth retrying: throttling, timeouts, flaky networking.
    #[error("transient provider error: {0}")]
    Transient(String),
    /// The provider refused the request (quota, bad parameter combination).
    #[error("provider rejected request: {0}")]
    Rejected(String),
    #[error("{kind} '{id}' not found")]
    NotFound { kind: ResourceKind, id: String },
    #[error("unresolved reference {0}")]
    Unresolved(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// A resource with every placeholder substituted, ready for the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedResource {
    pub address: Address,
    pub properties: Value,
    /// Fingerprint of the unresolved desired properties.
    pub fingerprint: String,
}

impl ResolvedResource {
    pub fn kind(&self) -> ResourceKind {
        self.address.kind
    }

    pub fn str_prop(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    pub fn u64_prop(&self, key: &str) -> Option<u64> {
        self.properties.get(key).and_then(Value::as_u64)
    }
}

/// What the provider currently reports for a recorded resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observed {
    pub fingerprint: String,
    pub attributes: Attributes,
}

#[allow(async_fn_in_trait)]
pub trait Provider {
    fn name(&self) -> &str;

    async fn available_zones(&self, region: &str) -> Result<u8, ProviderError>;

    /// Returns the new resource's id and attributes.
    async fn create(
        &self,
        resource: &ResolvedResource,
    ) -> Result<(String, Attributes), ProviderError>;

    async fn update(
        &self,
        id: &str,
        resource: &ResolvedResource,
    ) -> Result<Attributes, ProviderError>;

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError>;

    /// `None` when the resource no longer exists.
    async fn read(&self, kind: ResourceKind, id: &str) -> Result<Option<Observed>, ProviderError>;
}

/// The provider selected by configuration.
pub enum AnyProvider {
    Local(LocalProvider),
    Remote(RemoteProvider),
}

impl AnyProvider {
    pub fn open(config: &CliConfig, client: &reqwest::Client) -> anyhow::Result<Self> {
        match config.provider() {
            ProviderKind::Local => {
                Ok(AnyProvider::Local(LocalProvider::open(&config.state_dir())?))
            }
            ProviderKind::Remote => Ok(AnyProvider::Remote(RemoteProvider::new(config, client)?)),
        }
    }

    pub fn as_local(&self) -> Option<&LocalProvider> {
        match self {
            AnyProvider::Local(local) => Some(local),
            AnyProvider::Remote(_) => None,
        }
    }

    /// Hostnames and identifiers of a local cloud follow the descriptor's region.
    pub fn in_region(self, region: &str) -> Self {
        match self {
            AnyProvider::Local(local) => AnyProvider::Local(local.in_region(region)),
            remote => remote,
        }
    }
}

impl Provider for AnyProvider {
    fn name(&self) -> &str {
        match self {
            AnyProvider::Local(p) => p.name(),
            AnyProvider::Remote(p) => p.name(),
        }
    }

    async fn available_zones(&self, region: &str) -> Result<u8, ProviderError> {
        match self {
            AnyProvider::Local(p) => p.available_zones(region).await,
            AnyProvider::Remote(p) => p.available_zones(region).await,
        }
    }

    async fn create(
        &self,
        resource: &ResolvedResource,
    ) -> Result<(String, Attributes), ProviderError> {
        match self {
            AnyProvider::Local(p) => p.create(resource).await,
            AnyProvider::Remote(p) => p.create(resource).await,
        }
    }

    async fn update(
        &self,
        id: &str,
        resource: &ResolvedResource,
    ) -> Result<Attributes, ProviderError> {
        match self {
            AnyProvider::Local(p) => p.update(id, resource).await,
            AnyProvider::Remote(p) => p.update(id, resource).await,
        }
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError> {
        match self {
            AnyProvider::Local(p) => p.delete(kind, id).await,
            AnyProvider::Remote(p) => p.delete(kind, id).await,
        }
    }

    async fn read(&self, kind: ResourceKind, id: &str) -> Result<Option<Observed>, ProviderError> {
        match self {
            AnyProvider::Local(p) => p.read(kind, id).await,
            AnyProvider::Remote(p) => p.read(kind, id).await,
        }
    }
}

fn resolve_str(text: &str, state: &StateSnapshot) -> Result<String, ProviderError> {
    let mut out = String::with_capacity(text.len());
    for segment in segments(text) {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Placeholder(inner) => {
                let reference = AttributeRef::from_str(inner)
                    .map_err(|_| ProviderError::Unresolved(inner.to_string()))?;
                let value = state
                    .attribute(&reference)
                    .ok_or_else(|| ProviderError::Unresolved(reference.to_string()))?;
                out.push_str(value);
            }
        }
    }
    Ok(out)
}

/// Substitute `${address.attr}` placeholders from recorded state.
pub fn resolve_value(value: &Value, state: &StateSnapshot) -> Result<Value, ProviderError> {
    Ok(match value {
        Value::String(s) => Value::String(resolve_str(s, state)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_value(v, state))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), resolve_value(v, state)?)))
                .collect::<Result<_, ProviderError>>()?,
        ),
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::resource::literal;
    use crate::state::snapshot::ResourceState;
    use chrono::Utc;
    use serde_json::json;

    fn state_with_network() -> StateSnapshot {
        let mut state = StateSnapshot::default();
        state.resources.insert(
            Address::new(ResourceKind::Network, "vpc"),
            ResourceState {
                kind: ResourceKind::Network,
                id: "vpc-1".into(),
                properties: json!({}),
                fingerprint: String::new(),
                attributes: BTreeMap::from([(
                    "public_subnet_ids".to_string(),
                    "subnet-a,subnet-b".to_string(),
                )]),
                dependencies: Default::default(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        );
        state
    }

    #[test]
    fn placeholders_resolve_inside_nested_values() {
        let state = state_with_network();
        let value = json!({
            "network": "${network.vpc.id}",
            "subnets": ["${network.vpc.public_subnet_ids}"],
            "label": "in ${network.vpc.id}!",
            "count": 2,
        });
        assert_eq!(
            resolve_value(&value, &state).unwrap(),
            json!({
                "network": "vpc-1",
                "subnets": ["subnet-a,subnet-b"],
                "label": "in vpc-1!",
                "count": 2,
            })
        );
    }

    #[test]
    fn escaped_literal_text_is_kept_verbatim() {
        let state = state_with_network();
        let compiled = format!("{} on {}", literal("${HOME}/app"), "${network.vpc.id}");
        assert_eq!(
            resolve_value(&json!(compiled), &state).unwrap(),
            json!("${HOME}/app on vpc-1")
        );
    }

    #[test]
    fn unknown_attribute_is_unresolved() {
        let state = state_with_network();
        let err = resolve_value(&json!("${cluster.c.id}"), &state).unwrap_err();
        assert_eq!(err, ProviderError::Unresolved("cluster.c.id".to_string()));
        assert!(!err.is_retryable());
    }
}
