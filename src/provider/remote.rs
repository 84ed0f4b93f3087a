//! Provider backed by the topology HTTP API.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CliConfig;
use crate::engine::resource::{Address, ResourceKind};
use crate::error;
use crate::provider::{Attributes, Observed, Provider, ProviderError, ResolvedResource};

#[derive(Debug, Serialize)]
struct ResourceRequest<'a> {
    kind: ResourceKind,
    address: &'a Address,
    properties: &'a Value,
    fingerprint: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResourceResponse {
    id: String,
    fingerprint: String,
    #[serde(default)]
    attributes: Attributes,
}

#[derive(Debug, Deserialize)]
struct ZonesResponse {
    zones: Vec<String>,
}

pub struct RemoteProvider {
    client: Client,
    base: String,
    token: String,
}

impl RemoteProvider {
    pub fn new(config: &CliConfig, client: &Client) -> anyhow::Result<Self> {
        Ok(RemoteProvider {
            client: client.clone(),
            base: config.url(""),
            token: config.token()?.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base.trim_end_matches('/'), path)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        operation: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| error::from_transport(e, operation))?;
        error::handle_http_error(response, operation).await
    }

    async fn body<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<T, ProviderError> {
        response
            .json()
            .await
            .map_err(|e| ProviderError::Rejected(format!("{operation}: malformed response: {e}")))
    }
}

impl Provider for RemoteProvider {
    fn name(&self) -> &str {
        "remote"
    }

    async fn available_zones(&self, region: &str) -> Result<u8, ProviderError> {
        let operation = format!("list zones of {region}");
        let response = self
            .send(self.client.get(self.url(&format!("/regions/{region}/zones"))), &operation)
            .await?;
        let zones: ZonesResponse = Self::body(response, &operation).await?;
        Ok(zones.zones.len().min(u8::MAX as usize) as u8)
    }

    async fn create(
        &self,
        resource: &ResolvedResource,
    ) -> Result<(String, Attributes), ProviderError> {
        let operation = format!("create {}", resource.address);
        let request = ResourceRequest {
            kind: resource.kind(),
            address: &resource.address,
            properties: &resource.properties,
            fingerprint: &resource.fingerprint,
        };
        let response = self
            .send(self.client.post(self.url("/resources")).json(&request), &operation)
            .await?;
        let created: ResourceResponse = Self::body(response, &operation).await?;
        log::debug!("{} created as {}", resource.address, created.id);
        Ok((created.id, created.attributes))
    }

    async fn update(
        &self,
        id: &str,
        resource: &ResolvedResource,
    ) -> Result<Attributes, ProviderError> {
        let operation = format!("update {}", resource.address);
        let request = ResourceRequest {
            kind: resource.kind(),
            address: &resource.address,
            properties: &resource.properties,
            fingerprint: &resource.fingerprint,
        };
        let response = self
            .client
            .put(self.url(&format!("/resources/{id}")))
            .json(&request)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| error::from_transport(e, &operation))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound {
                kind: resource.kind(),
                id: id.to_string(),
            });
        }
        let response = error::handle_http_error(response, &operation).await?;
        let updated: ResourceResponse = Self::body(response, &operation).await?;
        Ok(updated.attributes)
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError> {
        let operation = format!("delete {kind} {id}");
        let response = self
            .client
            .delete(self.url(&format!("/resources/{kind}/{id}")))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| error::from_transport(e, &operation))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        error::handle_http_error(response, &operation).await?;
        Ok(())
    }

    async fn read(&self, kind: ResourceKind, id: &str) -> Result<Option<Observed>, ProviderError> {
        let operation = format!("read {kind} {id}");
        let response = self
            .client
            .get(self.url(&format!("/resources/{kind}/{id}")))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| error::from_transport(e, &operation))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = error::handle_http_error(response, &operation).await?;
        let observed: ResourceResponse = Self::body(response, &operation).await?;
        Ok(Some(Observed {
            fingerprint: observed.fingerprint,
            attributes: observed.attributes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_carries_kind_and_address() {
        let address = Address::new(ResourceKind::Service, "infraapi");
        let properties = json!({"desired_count": 1});
        let body = serde_json::to_value(ResourceRequest {
            kind: ResourceKind::Service,
            address: &address,
            properties: &properties,
            fingerprint: "abc",
        })
        .unwrap();
        assert_eq!(body["kind"], "service");
        assert_eq!(body["address"], "service.infraapi");
        assert_eq!(body["properties"]["desired_count"], 1);
    }

    #[test]
    fn response_attributes_are_optional() {
        let parsed: ResourceResponse =
            serde_json::from_str(r#"{"id":"svc-1","fingerprint":"f"}"#).unwrap();
        assert_eq!(parsed.id, "svc-1");
        assert!(parsed.attributes.is_empty());
    }
}
