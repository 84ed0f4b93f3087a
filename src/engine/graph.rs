//! Compiles a descriptor into addressed resources with explicit dependency
//! edges, and orders them.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use anyhow::Result;
use cidr::Ipv4Cidr;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::decl::file::network::SubnetRole;
use crate::decl::file::rules::RuleDeclaration;
use crate::decl::file::service::{EnvValue, ServiceDeclaration};
use crate::decl::file::TopologyFile;
use crate::decl::validate::ValidationError;
use crate::engine::resource::{literal, Address, AttributeRef, ResourceKind};
use crate::image::ImageArtifact;
use crate::network;

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub address: Address,
    /// Canonical desired properties. May hold `${address.attr}` placeholders.
    pub properties: Value,
    pub dependencies: BTreeSet<Address>,
}

impl Resource {
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.properties)
    }
}

/// SHA-256 over the canonical JSON encoding (object keys are sorted).
pub fn fingerprint(properties: &Value) -> String {
    let encoded = serde_json::to_vec(properties).unwrap_or_default();
    format!("{:x}", Sha256::digest(&encoded))
}

#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    pub region: String,
    pub resources: BTreeMap<Address, Resource>,
    pub outputs: BTreeMap<String, AttributeRef>,
}

impl ResourceGraph {
    pub fn get(&self, address: &Address) -> Option<&Resource> {
        self.resources.get(address)
    }

    fn insert(&mut self, address: Address, properties: Value, dependencies: BTreeSet<Address>) {
        self.resources.insert(
            address.clone(),
            Resource {
                address,
                properties,
                dependencies,
            },
        );
    }

    /// Dependency levels: every resource lands one wave after its deepest
    /// dependency. Resources inside a wave are independent of each other.
    pub fn waves(&self) -> Result<Vec<Vec<Address>>, ValidationError> {
        let edges: BTreeMap<&Address, &BTreeSet<Address>> = self
            .resources
            .iter()
            .map(|(a, r)| (a, &r.dependencies))
            .collect();
        levels(&edges)
    }

    pub fn order(&self) -> Result<Vec<Address>, ValidationError> {
        Ok(self.waves()?.into_iter().flatten().collect())
    }
}

/// Kahn's algorithm, grouped by level. Dependencies outside the map are
/// treated as already satisfied.
pub fn levels(
    edges: &BTreeMap<&Address, &BTreeSet<Address>>,
) -> Result<Vec<Vec<Address>>, ValidationError> {
    let mut pending: BTreeMap<&Address, BTreeSet<&Address>> = edges
        .iter()
        .map(|(a, deps)| {
            (
                *a,
                deps.iter().filter(|d| edges.contains_key(d)).collect(),
            )
        })
        .collect();

    let mut waves = Vec::new();
    while !pending.is_empty() {
        let ready: Vec<&Address> = pending
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(a, _)| *a)
            .collect();
        if ready.is_empty() {
            let stuck: Vec<String> = pending.keys().map(|a| a.to_string()).collect();
            return Err(ValidationError::DependencyCycle(stuck.join(", ")));
        }
        for address in &ready {
            pending.remove(address);
        }
        for deps in pending.values_mut() {
            for address in &ready {
                deps.remove(address);
            }
        }
        waves.push(ready.into_iter().cloned().collect());
    }
    Ok(waves)
}

fn rule_json(rule: &RuleDeclaration, owner: &Address, deps: &mut BTreeSet<Address>) -> Value {
    let range = rule.port_range();
    let peers: Vec<String> = rule
        .rule_sets
        .iter()
        .map(|name| {
            let peer = Address::new(ResourceKind::RuleSet, name);
            if &peer == owner {
                "self".to_string()
            } else {
                let placeholder = peer.attr("id");
                deps.insert(peer);
                placeholder
            }
        })
        .collect();
    json!({
        "protocol": rule.protocol.to_string(),
        "from_port": range.from,
        "to_port": range.to,
        "cidr_blocks": rule.cidr_blocks,
        "rule_sets": peers,
    })
}

fn subnet_ids(network: &Address, role: SubnetRole) -> String {
    network.attr(&format!("{role}_subnet_ids"))
}

/// The internal URL a discovery env entry renders to.
pub fn discovery_url(
    file: &TopologyFile,
    service: &str,
    port: u16,
    path: Option<&str>,
    scheme: &str,
) -> Option<String> {
    let record = file.service(service)?.discovery.as_deref()?;
    Some(format!(
        "{scheme}://{}:{port}{}",
        file.namespace.fqdn(record),
        path.unwrap_or("")
    ))
}

/// Compile a validated descriptor. `images` maps container name to its
/// content-addressed artifact.
pub fn compile(
    file: &TopologyFile,
    images: &BTreeMap<String, ImageArtifact>,
) -> Result<ResourceGraph> {
    let mut graph = ResourceGraph {
        region: file.project.region.clone(),
        ..Default::default()
    };

    let net = &file.network;
    let network_address = Address::new(ResourceKind::Network, &net.name);
    let cidr = Ipv4Cidr::from_str(&net.cidr)
        .map_err(|e| anyhow::anyhow!("Invalid CIDR '{}': {}", net.cidr, e))?;
    let layout = network::subnet_layout(
        cidr,
        &net.subnets,
        net.availability_zones,
        &file.project.region,
    )?;
    graph.insert(
        network_address.clone(),
        json!({
            "name": net.name,
            "region": file.project.region,
            "cidr": net.cidr,
            "availability_zones": net.availability_zones,
            "subnets": net.subnets,
            "layout": layout,
            "tags": net
                .tags
                .iter()
                .map(|(k, v)| (literal(k), literal(v)))
                .collect::<BTreeMap<_, _>>(),
        }),
        BTreeSet::new(),
    );

    for set in &file.rule_sets {
        let address = Address::new(ResourceKind::RuleSet, &set.name);
        let mut deps = BTreeSet::from([network_address.clone()]);
        let ingress: Vec<Value> = set
            .ingress
            .iter()
            .map(|r| rule_json(r, &address, &mut deps))
            .collect();
        let egress: Vec<Value> = set
            .egress
            .iter()
            .map(|r| rule_json(r, &address, &mut deps))
            .collect();
        graph.insert(
            address,
            json!({
                "name": set.name,
                "description": literal(&set.description),
                "network": network_address.attr("id"),
                "ingress": ingress,
                "egress": egress,
            }),
            deps,
        );
    }

    let cluster_address = Address::new(ResourceKind::Cluster, &file.cluster.name);
    graph.insert(
        cluster_address.clone(),
        json!({
            "name": file.cluster.name,
            "network": network_address.attr("id"),
        }),
        BTreeSet::from([network_address.clone()]),
    );

    for repo in &file.repositories {
        graph.insert(
            Address::new(ResourceKind::Repository, &repo.name),
            json!({ "name": repo.name }),
            BTreeSet::new(),
        );
    }

    let namespace_address = Address::new(ResourceKind::Namespace, &file.namespace.name);
    graph.insert(
        namespace_address.clone(),
        json!({
            "name": file.namespace.name,
            "description": literal(&file.namespace.description),
            "network": network_address.attr("id"),
        }),
        BTreeSet::from([network_address.clone()]),
    );
    for record in &file.namespace.records {
        graph.insert(
            Address::new(ResourceKind::Discovery, &record.name),
            json!({
                "name": record.name,
                "namespace": namespace_address.attr("id"),
                "fqdn": file.namespace.fqdn(&record.name),
                "record_type": record.record_type,
                "ttl": record.ttl,
                "routing_policy": record.routing_policy,
                "failure_threshold": record.failure_threshold,
            }),
            BTreeSet::from([namespace_address.clone()]),
        );
    }

    let lb = &file.load_balancer;
    let lb_address = Address::new(ResourceKind::LoadBalancer, &lb.name);
    let mut lb_deps = BTreeSet::from([network_address.clone()]);
    let lb_rule_sets: Vec<String> = lb
        .rule_sets
        .iter()
        .map(|name| {
            let address = Address::new(ResourceKind::RuleSet, name);
            let placeholder = address.attr("id");
            lb_deps.insert(address);
            placeholder
        })
        .collect();
    let lb_role = if lb.external {
        SubnetRole::Public
    } else {
        SubnetRole::Private
    };
    graph.insert(
        lb_address.clone(),
        json!({
            "name": lb.name,
            "kind": lb.kind,
            "external": lb.external,
            "subnets": subnet_ids(&network_address, lb_role),
            "rule_sets": lb_rule_sets,
        }),
        lb_deps,
    );
    for tg in &lb.target_groups {
        let tg_address = Address::new(ResourceKind::TargetGroup, &tg.name);
        graph.insert(
            tg_address.clone(),
            json!({
                "name": tg.name,
                "port": tg.port,
                "protocol": tg.protocol.to_string(),
                "load_balancer": lb_address.attr("id"),
                "network": network_address.attr("id"),
            }),
            BTreeSet::from([lb_address.clone(), network_address.clone()]),
        );
        for listener in &tg.listeners {
            graph.insert(
                Address::new(ResourceKind::Listener, &listener.name),
                json!({
                    "name": listener.name,
                    "port": listener.port,
                    "protocol": listener.protocol.to_string(),
                    "load_balancer": lb_address.attr("id"),
                    "target_group": tg_address.attr("id"),
                }),
                BTreeSet::from([lb_address.clone(), tg_address.clone()]),
            );
        }
    }

    for service in &file.services {
        compile_service(file, service, images, &network_address, &cluster_address, &mut graph)?;
    }

    for (name, reference) in &file.outputs {
        graph
            .outputs
            .insert(name.clone(), AttributeRef::from_str(reference)?);
    }

    // Cycles are a descriptor error, surface them now rather than at apply.
    graph.waves()?;
    Ok(graph)
}

fn compile_service(
    file: &TopologyFile,
    service: &ServiceDeclaration,
    images: &BTreeMap<String, ImageArtifact>,
    network_address: &Address,
    cluster_address: &Address,
    graph: &mut ResourceGraph,
) -> Result<()> {
    let address = Address::new(ResourceKind::Service, &service.name);
    let mut deps = BTreeSet::from([network_address.clone(), cluster_address.clone()]);

    let rule_sets: Vec<String> = service
        .rule_sets
        .iter()
        .map(|name| {
            let rs = Address::new(ResourceKind::RuleSet, name);
            let placeholder = rs.attr("id");
            deps.insert(rs);
            placeholder
        })
        .collect();

    let discovery = service.discovery.as_ref().map(|record| {
        let record_address = Address::new(ResourceKind::Discovery, record);
        let placeholder = record_address.attr("id");
        deps.insert(record_address);
        placeholder
    });

    for other in service.service_dependencies() {
        deps.insert(Address::new(ResourceKind::Service, other));
        // The dependency's name must answer before this service starts.
        if let Some(record) = file.service(other).and_then(|s| s.discovery.as_ref()) {
            deps.insert(Address::new(ResourceKind::Discovery, record));
        }
    }

    let mut containers = Vec::with_capacity(service.containers.len());
    for container in &service.containers {
        let artifact = images.get(&container.name).ok_or_else(|| {
            anyhow::anyhow!("No image artifact for container '{}'", container.name)
        })?;
        let image_address = Address::new(ResourceKind::Image, &container.name);
        let repository_url =
            Address::new(ResourceKind::Repository, &container.repository).attr("url");
        graph.insert(
            image_address.clone(),
            json!({
                "repository": container.repository,
                "repository_url": repository_url,
                "digest": artifact.digest,
                "reference": artifact.reference,
                "context": literal(&artifact.context.to_string_lossy()),
                "recipe": literal(&artifact.recipe.to_string_lossy()),
            }),
            BTreeSet::from([Address::new(
                ResourceKind::Repository,
                &container.repository,
            )]),
        );
        deps.insert(image_address.clone());

        let mut env = BTreeMap::new();
        for (key, value) in &container.env {
            let rendered = match value {
                EnvValue::Literal(text) => literal(text),
                EnvValue::Discovery {
                    discovery,
                    port,
                    path,
                    scheme,
                } => discovery_url(file, discovery, *port, path.as_deref(), scheme).ok_or_else(
                    || anyhow::anyhow!("Service '{discovery}' has no discovery record"),
                )?,
            };
            env.insert(key.clone(), rendered);
        }

        containers.push(json!({
            "name": container.name,
            "image": artifact.reference,
            "image_uri": image_address.attr("uri"),
            "ports": container.ports.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            "env": env,
        }));
    }

    let mut target_groups = Vec::new();
    for tg in file
        .load_balancer
        .target_groups
        .iter()
        .filter(|tg| tg.service == service.name)
    {
        let tg_address = Address::new(ResourceKind::TargetGroup, &tg.name);
        let container = service
            .containers
            .iter()
            .find(|c| c.ports.iter().any(|p| p.number() == tg.port))
            .map(|c| c.name.clone());
        target_groups.push(json!({
            "target_group": tg_address.attr("id"),
            "container": container,
            "port": tg.port,
        }));
        deps.insert(tg_address);
    }

    graph.insert(
        address,
        json!({
            "name": service.name,
            "cluster": cluster_address.attr("id"),
            "subnet_role": service.subnets,
            "subnets": subnet_ids(network_address, service.subnets),
            "rule_sets": rule_sets,
            "desired_count": service.desired_count,
            "discovery": discovery,
            "target_groups": target_groups,
            "containers": containers,
        }),
        deps,
    );
    Ok(())
}
