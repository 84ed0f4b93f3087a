//! A simulated cloud that lives in a JSON file next to the state.
//!
//! It honours the observable contract of the real primitives: ids, subnet
//! allocation, task addresses, balancer hostnames and DNS answers for
//! discovery records. Nothing is actually scheduled or routed.

use std::collections::{BTreeMap, VecDeque};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{Context, Result};
use cidr::Ipv4Cidr;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::engine::graph::fingerprint;
use crate::engine::resource::{Address, ResourceKind};
use crate::network;
use crate::provider::{Attributes, Observed, Provider, ProviderError, ResolvedResource};

pub const CLOUD_FILE: &str = "cloud.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub ip: String,
    pub subnet_id: String,
    /// Consecutive failed health signals.
    #[serde(default)]
    pub failed_checks: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudResource {
    pub kind: ResourceKind,
    pub address: Address,
    pub properties: Value,
    pub fingerprint: String,
    pub attributes: Attributes,
    /// Subnet id to CIDR, networks only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subnets: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalCloud {
    pub regions: BTreeMap<String, u8>,
    pub resources: BTreeMap<String, CloudResource>,
}

impl LocalCloud {
    fn default_regions() -> BTreeMap<String, u8> {
        BTreeMap::from([("local-1".to_string(), 3), ("local-2".to_string(), 2)])
    }

    fn require(
        &self,
        kind: ResourceKind,
        id: Option<&str>,
    ) -> Result<&CloudResource, ProviderError> {
        let id = id.unwrap_or_default();
        self.resources
            .get(id)
            .filter(|r| r.kind == kind)
            .ok_or_else(|| ProviderError::Rejected(format!("{kind} '{id}' does not exist")))
    }

    fn used_ips(&self) -> Vec<String> {
        self.resources
            .values()
            .flat_map(|r| r.tasks.iter().map(|t| t.ip.clone()))
            .collect()
    }

    fn subnet_cidr(&self, subnet_id: &str) -> Option<Ipv4Cidr> {
        self.resources
            .values()
            .find_map(|r| r.subnets.get(subnet_id))
            .and_then(|c| Ipv4Cidr::from_str(c).ok())
    }

    /// Ids of other resources whose properties mention `id`.
    fn dependents(&self, id: &str) -> Vec<String> {
        self.resources
            .iter()
            .filter(|(other, r)| other.as_str() != id && r.properties.to_string().contains(id))
            .map(|(other, _)| other.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: &'static str,
    pub address: Option<Address>,
}

struct Fault {
    kind: Option<ResourceKind>,
    error: ProviderError,
}

pub struct LocalProvider {
    region: String,
    path: Option<PathBuf>,
    cloud: Mutex<LocalCloud>,
    faults: Mutex<VecDeque<Fault>>,
    calls: Mutex<Vec<Call>>,
}

fn short_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &hex[..8])
}

fn suffix(id: &str) -> &str {
    id.split_once('-').map(|(_, rest)| rest).unwrap_or(id)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LocalProvider {
    pub fn in_memory() -> Self {
        LocalProvider {
            region: crate::decl::file::DEFAULT_REGION.to_string(),
            path: None,
            cloud: Mutex::new(LocalCloud {
                regions: LocalCloud::default_regions(),
                resources: BTreeMap::new(),
            }),
            faults: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Open (or start) the simulated cloud stored in `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(CLOUD_FILE);
        let mut cloud: LocalCloud = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("{} is corrupt", path.display()))?
        } else {
            LocalCloud::default()
        };
        if cloud.regions.is_empty() {
            cloud.regions = LocalCloud::default_regions();
        }
        log::debug!(
            "Local cloud {} holds {} resource(s)",
            path.display(),
            cloud.resources.len()
        );
        Ok(LocalProvider {
            region: crate::decl::file::DEFAULT_REGION.to_string(),
            path: Some(path),
            cloud: Mutex::new(cloud),
            faults: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Region used for hostnames and identifiers of created resources.
    pub fn in_region(mut self, region: &str) -> Self {
        self.region = region.to_string();
        self
    }

    pub fn with_region(self, region: &str, zones: u8) -> Self {
        lock(&self.cloud).regions.insert(region.to_string(), zones);
        self
    }

    /// Fail the next operation on `kind` (any kind when `None`) with `error`.
    pub fn inject_fault(&self, kind: Option<ResourceKind>, error: ProviderError) {
        lock(&self.faults).push_back(Fault { kind, error });
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn mutating_calls(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| matches!(c.op, "create" | "update" | "delete"))
            .count()
    }

    pub fn snapshot(&self) -> LocalCloud {
        lock(&self.cloud).clone()
    }

    fn record(&self, op: &'static str, address: Option<&Address>) {
        lock(&self.calls).push(Call {
            op,
            address: address.cloned(),
        });
    }

    fn take_fault(&self, kind: ResourceKind) -> Option<ProviderError> {
        let mut faults = lock(&self.faults);
        let index = faults
            .iter()
            .position(|f| f.kind.is_none_or(|k| k == kind))?;
        faults.remove(index).map(|f| f.error)
    }

    fn persist(&self, cloud: &LocalCloud) -> Result<(), ProviderError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let write = || -> Result<()> {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(path, serde_json::to_vec_pretty(cloud)?)?;
            Ok(())
        };
        write().map_err(|e| ProviderError::Transient(format!("Failed to persist local cloud: {e}")))
    }

    /// Addresses a DNS query for `fqdn` returns: task IPs of the services
    /// registered with that record which have not crossed its failure threshold.
    pub fn resolve(&self, fqdn: &str) -> Vec<Ipv4Addr> {
        let cloud = lock(&self.cloud);
        let Some((record_id, record)) = cloud.resources.iter().find(|(_, r)| {
            r.kind == ResourceKind::Discovery
                && r.attributes.get("fqdn").map(String::as_str) == Some(fqdn)
        }) else {
            return vec![];
        };
        let threshold = record
            .properties
            .get("failure_threshold")
            .and_then(Value::as_u64)
            .unwrap_or(1) as u32;

        let mut addresses: Vec<Ipv4Addr> = cloud
            .resources
            .values()
            .filter(|r| {
                r.kind == ResourceKind::Service
                    && r.properties.get("discovery").and_then(Value::as_str)
                        == Some(record_id.as_str())
            })
            .flat_map(|r| r.tasks.iter())
            .filter(|t| t.failed_checks < threshold)
            .filter_map(|t| t.ip.parse().ok())
            .collect();
        addresses.sort();
        addresses
    }

    /// Feed one health signal for the task at `ip`.
    pub fn report_health(&self, ip: &str, healthy: bool) -> bool {
        let mut cloud = lock(&self.cloud);
        for resource in cloud.resources.values_mut() {
            if let Some(task) = resource.tasks.iter_mut().find(|t| t.ip == ip) {
                task.failed_checks = if healthy { 0 } else { task.failed_checks + 1 };
                return true;
            }
        }
        false
    }

    /// Change a resource behind the engine's back.
    pub fn tamper(&self, id: &str, key: &str, value: Value) -> bool {
        let mut cloud = lock(&self.cloud);
        let Some(resource) = cloud.resources.get_mut(id) else {
            return false;
        };
        if let Some(map) = resource.properties.as_object_mut() {
            map.insert(key.to_string(), value);
        }
        resource.fingerprint = fingerprint(&resource.properties);
        true
    }

    pub fn remove_out_of_band(&self, id: &str) -> bool {
        lock(&self.cloud).resources.remove(id).is_some()
    }

    fn place_tasks(
        cloud: &LocalCloud,
        resource: &ResolvedResource,
        existing: Vec<Task>,
    ) -> Result<Vec<Task>, ProviderError> {
        let desired = resource.u64_prop("desired_count").unwrap_or(0) as usize;
        let subnets: Vec<String> = resource
            .str_prop("subnets")
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if desired > 0 && subnets.is_empty() {
            return Err(ProviderError::Rejected(format!(
                "{} has no subnets to place tasks in",
                resource.address
            )));
        }

        let mut tasks: Vec<Task> = existing
            .into_iter()
            .filter(|t| subnets.contains(&t.subnet_id))
            .take(desired)
            .collect();
        let mut used = cloud.used_ips();
        while tasks.len() < desired {
            let subnet_id = &subnets[tasks.len() % subnets.len()];
            let cidr = cloud.subnet_cidr(subnet_id).ok_or_else(|| {
                ProviderError::Rejected(format!("subnet '{subnet_id}' does not exist"))
            })?;
            let ip = network::next_ip(cidr, &used)
                .map_err(|e| ProviderError::Rejected(e.to_string()))?;
            used.push(ip.clone());
            tasks.push(Task {
                ip,
                subnet_id: subnet_id.clone(),
                failed_checks: 0,
            });
        }
        Ok(tasks)
    }

    /// Check references and derive attributes for a create or update.
    fn materialize(
        cloud: &LocalCloud,
        region: &str,
        id: &str,
        resource: &ResolvedResource,
        previous: Option<&CloudResource>,
    ) -> Result<CloudResource, ProviderError> {
        let p = resource;
        let mut attributes = Attributes::new();
        let mut subnets = BTreeMap::new();
        let mut tasks = Vec::new();

        match resource.kind() {
            ResourceKind::Network => {
                let layout = p
                    .properties
                    .get("layout")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let mut by_role: BTreeMap<String, Vec<String>> = BTreeMap::new();
                for (index, subnet) in layout.iter().enumerate() {
                    let role = subnet.get("role").and_then(Value::as_str).unwrap_or("private");
                    let cidr = subnet.get("cidr").and_then(Value::as_str).unwrap_or_default();
                    let subnet_id = previous
                        .and_then(|prev| {
                            prev.subnets
                                .iter()
                                .find(|(_, c)| c.as_str() == cidr)
                                .map(|(s, _)| s.clone())
                        })
                        .unwrap_or_else(|| format!("subnet-{}-{index}", suffix(id)));
                    subnets.insert(subnet_id.clone(), cidr.to_string());
                    by_role.entry(role.to_string()).or_default().push(subnet_id);
                }
                for role in ["public", "private"] {
                    attributes.insert(
                        format!("{role}_subnet_ids"),
                        by_role.get(role).map(|ids| ids.join(",")).unwrap_or_default(),
                    );
                }
                attributes.insert("cidr".into(), p.str_prop("cidr").unwrap_or_default().into());
            }
            ResourceKind::RuleSet => {
                cloud.require(ResourceKind::Network, p.str_prop("network"))?;
                for direction in ["ingress", "egress"] {
                    for rule in p.properties[direction].as_array().into_iter().flatten() {
                        for peer in rule["rule_sets"].as_array().into_iter().flatten() {
                            let peer = peer.as_str().unwrap_or_default();
                            if peer != "self" {
                                cloud.require(ResourceKind::RuleSet, Some(peer))?;
                            }
                        }
                    }
                }
            }
            ResourceKind::Cluster => {
                cloud.require(ResourceKind::Network, p.str_prop("network"))?;
                let name = p.str_prop("name").unwrap_or_default();
                attributes.insert("arn".into(), format!("arn:local:{region}:cluster/{name}"));
            }
            ResourceKind::Repository => {
                attributes.insert(
                    "url".into(),
                    format!(
                        "registry.{region}.localhost/{}",
                        p.str_prop("name").unwrap_or_default()
                    ),
                );
            }
            ResourceKind::Image => {
                let url = p.str_prop("repository_url").unwrap_or_default();
                let reference = p.str_prop("reference").unwrap_or_default();
                let tag = reference.rsplit_once(':').map(|(_, t)| t).unwrap_or("latest");
                attributes.insert("uri".into(), format!("{url}:{tag}"));
                attributes.insert("digest".into(), p.str_prop("digest").unwrap_or_default().into());
            }
            ResourceKind::Namespace => {
                cloud.require(ResourceKind::Network, p.str_prop("network"))?;
                attributes.insert("hosted_zone".into(), format!("Z{}", suffix(id).to_uppercase()));
            }
            ResourceKind::Discovery => {
                cloud.require(ResourceKind::Namespace, p.str_prop("namespace"))?;
                attributes.insert("fqdn".into(), p.str_prop("fqdn").unwrap_or_default().into());
                attributes.insert("arn".into(), format!("arn:local:{region}:service/{id}"));
            }
            ResourceKind::LoadBalancer => {
                for rule_set in p.properties["rule_sets"].as_array().into_iter().flatten() {
                    cloud.require(ResourceKind::RuleSet, rule_set.as_str())?;
                }
                let hostname = previous
                    .and_then(|prev| prev.attributes.get("hostname").cloned())
                    .unwrap_or_else(|| {
                        format!(
                            "{}-{}.elb.{region}.localhost",
                            p.str_prop("name").unwrap_or("lb"),
                            suffix(id)
                        )
                    });
                attributes.insert("hostname".into(), hostname);
            }
            ResourceKind::TargetGroup => {
                cloud.require(ResourceKind::LoadBalancer, p.str_prop("load_balancer"))?;
                attributes.insert("arn".into(), format!("arn:local:{region}:targetgroup/{id}"));
            }
            ResourceKind::Listener => {
                cloud.require(ResourceKind::TargetGroup, p.str_prop("target_group"))?;
                let lb = cloud.require(ResourceKind::LoadBalancer, p.str_prop("load_balancer"))?;
                let hostname = lb.attributes.get("hostname").cloned().unwrap_or_default();
                let port = p.u64_prop("port").unwrap_or(80);
                attributes.insert("endpoint".into(), format!("{hostname}:{port}"));
                attributes.insert("hostname".into(), hostname);
            }
            ResourceKind::Service => {
                cloud.require(ResourceKind::Cluster, p.str_prop("cluster"))?;
                for rule_set in p.properties["rule_sets"].as_array().into_iter().flatten() {
                    cloud.require(ResourceKind::RuleSet, rule_set.as_str())?;
                }
                if let Some(record) = p.str_prop("discovery") {
                    cloud.require(ResourceKind::Discovery, Some(record))?;
                }
                for binding in p.properties["target_groups"].as_array().into_iter().flatten() {
                    cloud.require(ResourceKind::TargetGroup, binding["target_group"].as_str())?;
                }
                let existing = previous.map(|prev| prev.tasks.clone()).unwrap_or_default();
                tasks = Self::place_tasks(cloud, resource, existing)?;
                attributes.insert(
                    "task_ips".into(),
                    tasks.iter().map(|t| t.ip.as_str()).collect::<Vec<_>>().join(","),
                );
            }
        }

        Ok(CloudResource {
            kind: resource.kind(),
            address: resource.address.clone(),
            properties: resource.properties.clone(),
            fingerprint: resource.fingerprint.clone(),
            attributes,
            subnets,
            tasks,
        })
    }
}

impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn available_zones(&self, region: &str) -> Result<u8, ProviderError> {
        self.record("zones", None);
        lock(&self.cloud)
            .regions
            .get(region)
            .copied()
            .ok_or_else(|| ProviderError::Rejected(format!("unknown region '{region}'")))
    }

    async fn create(
        &self,
        resource: &ResolvedResource,
    ) -> Result<(String, Attributes), ProviderError> {
        self.record("create", Some(&resource.address));
        if let Some(error) = self.take_fault(resource.kind()) {
            return Err(error);
        }
        let mut cloud = lock(&self.cloud);
        let id = short_id(resource.kind().id_prefix());
        let created = Self::materialize(&cloud, &self.region, &id, resource, None)?;
        let attributes = created.attributes.clone();
        cloud.resources.insert(id.clone(), created);
        if let Err(e) = self.persist(&cloud) {
            cloud.resources.remove(&id);
            return Err(e);
        }
        log::debug!("local: created {} as {id}", resource.address);
        Ok((id, attributes))
    }

    async fn update(
        &self,
        id: &str,
        resource: &ResolvedResource,
    ) -> Result<Attributes, ProviderError> {
        self.record("update", Some(&resource.address));
        if let Some(error) = self.take_fault(resource.kind()) {
            return Err(error);
        }
        let mut cloud = lock(&self.cloud);
        let previous = cloud
            .resources
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound {
                kind: resource.kind(),
                id: id.to_string(),
            })?;
        let updated = Self::materialize(&cloud, &self.region, id, resource, Some(&previous))?;
        let attributes = updated.attributes.clone();
        cloud.resources.insert(id.to_string(), updated);
        if let Err(e) = self.persist(&cloud) {
            cloud.resources.insert(id.to_string(), previous);
            return Err(e);
        }
        log::debug!("local: updated {} ({id})", resource.address);
        Ok(attributes)
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError> {
        self.record("delete", None);
        if let Some(error) = self.take_fault(kind) {
            return Err(error);
        }
        let mut cloud = lock(&self.cloud);
        if !cloud.resources.contains_key(id) {
            return Err(ProviderError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        let dependents = cloud.dependents(id);
        if !dependents.is_empty() {
            return Err(ProviderError::Rejected(format!(
                "{kind} '{id}' is still in use by {}",
                dependents.join(", ")
            )));
        }
        let removed = cloud.resources.remove(id);
        if let Err(e) = self.persist(&cloud) {
            if let Some(removed) = removed {
                cloud.resources.insert(id.to_string(), removed);
            }
            return Err(e);
        }
        log::debug!("local: deleted {kind} {id}");
        Ok(())
    }

    async fn read(&self, kind: ResourceKind, id: &str) -> Result<Option<Observed>, ProviderError> {
        self.record("read", None);
        Ok(lock(&self.cloud)
            .resources
            .get(id)
            .filter(|r| r.kind == kind)
            .map(|r| Observed {
                fingerprint: r.fingerprint.clone(),
                attributes: r.attributes.clone(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolved(kind: ResourceKind, name: &str, properties: Value) -> ResolvedResource {
        ResolvedResource {
            address: Address::new(kind, name),
            fingerprint: fingerprint(&properties),
            properties,
        }
    }

    fn network() -> ResolvedResource {
        resolved(
            ResourceKind::Network,
            "vpc",
            json!({
                "cidr": "10.0.0.0/16",
                "layout": [
                    {"role": "public", "zone": "local-1a", "cidr": "10.0.0.0/18", "route_table": "public"},
                    {"role": "private", "zone": "local-1a", "cidr": "10.0.64.0/18", "route_table": "private"},
                ],
            }),
        )
    }

    #[tokio::test]
    async fn network_exposes_subnets_by_role() {
        let provider = LocalProvider::in_memory();
        let (id, attributes) = provider.create(&network()).await.unwrap();
        assert!(id.starts_with("vpc-"));
        assert_eq!(attributes["public_subnet_ids"].split(',').count(), 1);
        assert_eq!(attributes["private_subnet_ids"].split(',').count(), 1);
        assert_ne!(attributes["public_subnet_ids"], attributes["private_subnet_ids"]);
    }

    #[tokio::test]
    async fn dangling_reference_is_rejected() {
        let provider = LocalProvider::in_memory();
        let err = provider
            .create(&resolved(
                ResourceKind::Cluster,
                "c",
                json!({"name": "c", "network": "vpc-missing"}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
    }

    #[tokio::test]
    async fn delete_refuses_while_in_use() {
        let provider = LocalProvider::in_memory();
        let (vpc, _) = provider.create(&network()).await.unwrap();
        let (cluster, _) = provider
            .create(&resolved(
                ResourceKind::Cluster,
                "c",
                json!({"name": "c", "network": vpc}),
            ))
            .await
            .unwrap();

        let err = provider.delete(ResourceKind::Network, &vpc).await.unwrap_err();
        assert!(err.to_string().contains("still in use"));
        provider.delete(ResourceKind::Cluster, &cluster).await.unwrap();
        provider.delete(ResourceKind::Network, &vpc).await.unwrap();
        assert!(provider.read(ResourceKind::Network, &vpc).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn service_tasks_answer_their_record() {
        let provider = LocalProvider::in_memory();
        let (vpc, net) = provider.create(&network()).await.unwrap();
        let (cluster, _) = provider
            .create(&resolved(ResourceKind::Cluster, "c", json!({"name": "c", "network": vpc})))
            .await
            .unwrap();
        let (ns, _) = provider
            .create(&resolved(
                ResourceKind::Namespace,
                "airtek",
                json!({"name": "airtek", "network": vpc}),
            ))
            .await
            .unwrap();
        let (record, attributes) = provider
            .create(&resolved(
                ResourceKind::Discovery,
                "infraapi",
                json!({
                    "name": "infraapi",
                    "namespace": ns,
                    "fqdn": "infraapi.airtek",
                    "failure_threshold": 1,
                }),
            ))
            .await
            .unwrap();
        assert_eq!(attributes["fqdn"], "infraapi.airtek");

        let service = |count: u64| {
            resolved(
                ResourceKind::Service,
                "infraapi",
                json!({
                    "name": "infraapi",
                    "cluster": cluster,
                    "subnets": net["private_subnet_ids"],
                    "rule_sets": [],
                    "desired_count": count,
                    "discovery": record,
                    "target_groups": [],
                }),
            )
        };
        let (svc, attributes) = provider.create(&service(2)).await.unwrap();
        let ips = provider.resolve("infraapi.airtek");
        assert_eq!(ips.len(), 2);
        assert!(ips.iter().all(|ip| ip.octets()[..2] == [10, 0]));
        assert_eq!(attributes["task_ips"].split(',').count(), 2);

        let first = ips[0].to_string();
        assert!(provider.report_health(&first, false));
        assert_eq!(provider.resolve("infraapi.airtek").len(), 1);

        provider.update(&svc, &service(1)).await.unwrap();
        assert!(provider.resolve("infraapi.airtek").len() <= 1);
        assert!(provider.resolve("nothing.airtek").is_empty());
    }

    #[tokio::test]
    async fn injected_fault_fires_once() {
        let provider = LocalProvider::in_memory();
        provider.inject_fault(
            Some(ResourceKind::Network),
            ProviderError::Transient("throttled".into()),
        );
        assert!(provider.create(&network()).await.is_err());
        assert!(provider.create(&network()).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_region_is_rejected() {
        let provider = LocalProvider::in_memory().with_region("edge-9", 1);
        assert_eq!(provider.available_zones("edge-9").await.unwrap(), 1);
        assert!(provider.available_zones("nowhere").await.is_err());
    }

    #[tokio::test]
    async fn cloud_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let provider = LocalProvider::open(dir.path()).unwrap();
            provider.create(&network()).await.unwrap().0
        };
        let reopened = LocalProvider::open(dir.path()).unwrap();
        assert!(reopened.read(ResourceKind::Network, &id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_write_leaves_no_resource_behind() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::open(dir.path()).unwrap();
        // A directory where the cloud file belongs makes every write fail.
        std::fs::create_dir(dir.path().join(CLOUD_FILE)).unwrap();

        let err = provider.create(&network()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(provider.snapshot().resources.is_empty());

        std::fs::remove_dir(dir.path().join(CLOUD_FILE)).unwrap();
        let (id, _) = provider.create(&network()).await.unwrap();
        assert_eq!(provider.snapshot().resources.keys().collect::<Vec<_>>(), vec![&id]);
    }
}
