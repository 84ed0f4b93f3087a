//! Static checks on a descriptor. Everything here runs before any provider
//! call; all problems are collected so a single run reports them together.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use cidr::Ipv4Cidr;
use oci_spec::distribution::Reference;
use thiserror::Error;

use crate::decl::file::balancer::BalancerKind;
use crate::decl::file::network::SubnetRole;
use crate::decl::file::rules::{RuleDeclaration, RuleProtocol};
use crate::decl::file::service::EnvValue;
use crate::decl::file::TopologyFile;
use crate::engine::resource::AttributeRef;
use crate::network;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("network '{network}': invalid CIDR '{cidr}': {reason}")]
    InvalidCidr {
        network: String,
        cidr: String,
        reason: String,
    },
    #[error("network '{0}' must declare at least one subnet role")]
    NoSubnetRoles(String),
    #[error("network '{0}' declares subnet role '{1}' more than once")]
    DuplicateSubnetRole(String, SubnetRole),
    #[error("network '{0}' must span at least one availability zone")]
    NoAvailabilityZones(String),
    #[error("network '{0}': {1}")]
    SubnetLayout(String, String),
    #[error("region '{region}' has {available} availability zones but the network asks for {requested}")]
    TooManyZones {
        region: String,
        requested: u8,
        available: u8,
    },
    #[error("{kind} '{name}' is declared more than once")]
    Duplicate { kind: &'static str, name: String },
    #[error("{owner}: {kind} '{name}' is not declared")]
    DanglingReference {
        owner: String,
        kind: &'static str,
        name: String,
    },
    #[error("rule set '{rule_set}' {direction} rule {index}: port range {from}-{to} is reversed")]
    ReversedPortRange {
        rule_set: String,
        direction: &'static str,
        index: usize,
        from: u16,
        to: u16,
    },
    #[error("rule set '{rule_set}' {direction} rule {index}: {protocol} rules need explicit ports")]
    MissingPorts {
        rule_set: String,
        direction: &'static str,
        index: usize,
        protocol: RuleProtocol,
    },
    #[error("rule set '{rule_set}' {direction} rule {index}: needs cidr_blocks or rule_sets")]
    NoPeer {
        rule_set: String,
        direction: &'static str,
        index: usize,
    },
    #[error("rule set '{rule_set}': invalid CIDR block '{cidr}'")]
    InvalidRuleCidr { rule_set: String, cidr: String },
    #[error(
        "service '{service}' runs on private subnets but rule set '{rule_set}' admits ingress from 0.0.0.0/0; restrict it to the front-end rule set or set acknowledge_open_ingress = true"
    )]
    OpenPrivateIngress { service: String, rule_set: String },
    #[error("repository '{name}' is not a valid image repository name: {reason}")]
    InvalidRepositoryName { name: String, reason: String },
    #[error("discovery record '{0}' must have a time-to-live greater than zero")]
    ZeroTtl(String),
    #[error("discovery record '{0}' must have a failure threshold of at least 1")]
    ZeroFailureThreshold(String),
    #[error("discovery record '{record}' is used by both '{first}' and '{second}'")]
    SharedRecord {
        record: String,
        first: String,
        second: String,
    },
    #[error("load balancer '{0}': rule sets can only be attached to application balancers")]
    RuleSetsOnNetworkBalancer(String),
    #[error("{owner}: protocol {protocol} is not available on a {kind} balancer")]
    ProtocolNotAllowed {
        owner: String,
        protocol: String,
        kind: BalancerKind,
    },
    #[error("listener '{listener}' ({listener_protocol}) cannot forward to target group '{target_group}' ({group_protocol})")]
    IncompatibleListener {
        listener: String,
        listener_protocol: String,
        target_group: String,
        group_protocol: String,
    },
    #[error("listener port {0} is bound more than once")]
    DuplicateListenerPort(u16),
    #[error("target group '{target_group}' port {port} is not a {transport} port of service '{service}'")]
    TargetPortMismatch {
        target_group: String,
        port: u16,
        transport: &'static str,
        service: String,
    },
    #[error("service '{0}' must declare at least one container")]
    NoContainers(String),
    #[error("service '{service}' is placed on {role} subnets but the network has none")]
    MissingSubnetRole { service: String, role: SubnetRole },
    #[error("service '{0}' depends on itself")]
    SelfDependency(String),
    #[error("container '{container}': recipe '{recipe}' is outside build context '{context}'")]
    RecipeOutsideContext {
        container: String,
        recipe: String,
        context: String,
    },
    #[error("container '{container}' env '{key}': service '{service}' has no discovery record")]
    UndiscoverableService {
        container: String,
        key: String,
        service: String,
    },
    #[error("container '{container}' env '{key}': service '{service}' does not expose port {port}")]
    UnexposedPort {
        container: String,
        key: String,
        service: String,
        port: u16,
    },
    #[error("output '{output}': {reason}")]
    InvalidOutput { output: String, reason: String },
    #[error("dependency cycle between {0}")]
    DependencyCycle(String),
}

/// Every problem found in one descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "descriptor has {} problem(s):", self.0.len())?;
        for error in &self.0 {
            writeln!(f, "  - {error}")?;
        }
        Ok(())
    }
}

impl ValidationErrors {
    pub fn contains(&self, predicate: impl Fn(&ValidationError) -> bool) -> bool {
        self.0.iter().any(predicate)
    }
}

fn duplicates<'a>(
    kind: &'static str,
    names: impl Iterator<Item = &'a str>,
    errors: &mut Vec<ValidationError>,
) {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            errors.push(ValidationError::Duplicate {
                kind,
                name: name.to_string(),
            });
        }
    }
}

/// Collapse `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root_or_above = matches!(
                    out.components().next_back(),
                    None | Some(Component::ParentDir)
                );
                if at_root_or_above {
                    out.push("..");
                } else {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn recipe_inside_context(context: &Path, recipe: &Path) -> bool {
    let context = normalize(context);
    let recipe = normalize(recipe);
    recipe != context && recipe.starts_with(&context) && !recipe.starts_with("..")
}

pub fn validate(file: &TopologyFile) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    check_network(file, &mut errors);
    check_rule_sets(file, &mut errors);
    check_repositories(file, &mut errors);
    check_discovery(file, &mut errors);
    check_balancer(file, &mut errors);
    check_services(file, &mut errors);
    check_outputs(file, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

/// Region capacity is only known to the provider, so this runs at plan time,
/// still ahead of any create call.
pub fn check_zone_capacity(
    file: &TopologyFile,
    available: u8,
) -> Result<(), ValidationError> {
    if file.network.availability_zones > available {
        return Err(ValidationError::TooManyZones {
            region: file.project.region.clone(),
            requested: file.network.availability_zones,
            available,
        });
    }
    Ok(())
}

fn check_network(file: &TopologyFile, errors: &mut Vec<ValidationError>) {
    let net = &file.network;
    if net.subnets.is_empty() {
        errors.push(ValidationError::NoSubnetRoles(net.name.clone()));
    }
    let mut roles = BTreeSet::new();
    for role in &net.subnets {
        if !roles.insert(*role) {
            errors.push(ValidationError::DuplicateSubnetRole(net.name.clone(), *role));
        }
    }
    if net.availability_zones == 0 {
        errors.push(ValidationError::NoAvailabilityZones(net.name.clone()));
    }

    match Ipv4Cidr::from_str(&net.cidr) {
        Ok(cidr) => {
            if let Err(e) = network::subnet_layout(
                cidr,
                &net.subnets,
                net.availability_zones,
                &file.project.region,
            ) {
                errors.push(ValidationError::SubnetLayout(net.name.clone(), e.to_string()));
            }
        }
        Err(e) => errors.push(ValidationError::InvalidCidr {
            network: net.name.clone(),
            cidr: net.cidr.clone(),
            reason: e.to_string(),
        }),
    }
}

fn check_rule(
    file: &TopologyFile,
    rule_set: &str,
    direction: &'static str,
    index: usize,
    rule: &RuleDeclaration,
    errors: &mut Vec<ValidationError>,
) {
    match rule.ports {
        Some(range) if !range.is_well_formed() => {
            errors.push(ValidationError::ReversedPortRange {
                rule_set: rule_set.to_string(),
                direction,
                index,
                from: range.from,
                to: range.to,
            });
        }
        None if matches!(rule.protocol, RuleProtocol::Tcp | RuleProtocol::Udp) => {
            errors.push(ValidationError::MissingPorts {
                rule_set: rule_set.to_string(),
                direction,
                index,
                protocol: rule.protocol,
            });
        }
        _ => {}
    }

    if rule.cidr_blocks.is_empty() && rule.rule_sets.is_empty() {
        errors.push(ValidationError::NoPeer {
            rule_set: rule_set.to_string(),
            direction,
            index,
        });
    }
    for cidr in &rule.cidr_blocks {
        if Ipv4Cidr::from_str(cidr.trim()).is_err() {
            errors.push(ValidationError::InvalidRuleCidr {
                rule_set: rule_set.to_string(),
                cidr: cidr.clone(),
            });
        }
    }
    for peer in &rule.rule_sets {
        if file.rule_set(peer).is_none() {
            errors.push(ValidationError::DanglingReference {
                owner: format!("rule set '{rule_set}'"),
                kind: "rule set",
                name: peer.clone(),
            });
        }
    }
}

fn check_rule_sets(file: &TopologyFile, errors: &mut Vec<ValidationError>) {
    duplicates(
        "rule set",
        file.rule_sets.iter().map(|r| r.name.as_str()),
        errors,
    );
    for set in &file.rule_sets {
        for (index, rule) in set.ingress.iter().enumerate() {
            check_rule(file, &set.name, "ingress", index, rule, errors);
        }
        for (index, rule) in set.egress.iter().enumerate() {
            check_rule(file, &set.name, "egress", index, rule, errors);
        }
    }
}

fn check_repositories(file: &TopologyFile, errors: &mut Vec<ValidationError>) {
    duplicates(
        "repository",
        file.repositories.iter().map(|r| r.name.as_str()),
        errors,
    );
    for repo in &file.repositories {
        if let Err(e) = Reference::from_str(&format!("{}:latest", repo.name)) {
            errors.push(ValidationError::InvalidRepositoryName {
                name: repo.name.clone(),
                reason: e.to_string(),
            });
        }
    }
}

fn check_discovery(file: &TopologyFile, errors: &mut Vec<ValidationError>) {
    duplicates(
        "discovery record",
        file.namespace.records.iter().map(|r| r.name.as_str()),
        errors,
    );
    for record in &file.namespace.records {
        if record.ttl == 0 {
            errors.push(ValidationError::ZeroTtl(record.name.clone()));
        }
        if record.failure_threshold == 0 {
            errors.push(ValidationError::ZeroFailureThreshold(record.name.clone()));
        }
    }
}

fn check_balancer(file: &TopologyFile, errors: &mut Vec<ValidationError>) {
    let lb = &file.load_balancer;
    if lb.kind == BalancerKind::Network && !lb.rule_sets.is_empty() {
        errors.push(ValidationError::RuleSetsOnNetworkBalancer(lb.name.clone()));
    }
    for name in &lb.rule_sets {
        if file.rule_set(name).is_none() {
            errors.push(ValidationError::DanglingReference {
                owner: format!("load balancer '{}'", lb.name),
                kind: "rule set",
                name: name.clone(),
            });
        }
    }

    duplicates(
        "target group",
        lb.target_groups.iter().map(|t| t.name.as_str()),
        errors,
    );
    duplicates(
        "listener",
        lb.listeners().map(|(_, l)| l.name.as_str()),
        errors,
    );

    let mut ports = HashSet::new();
    for tg in &lb.target_groups {
        if !tg.protocol.backend().allowed_on(lb.kind) && !tg.protocol.allowed_on(lb.kind) {
            errors.push(ValidationError::ProtocolNotAllowed {
                owner: format!("target group '{}'", tg.name),
                protocol: tg.protocol.to_string(),
                kind: lb.kind,
            });
        }

        match file.service(&tg.service) {
            None => errors.push(ValidationError::DanglingReference {
                owner: format!("target group '{}'", tg.name),
                kind: "service",
                name: tg.service.clone(),
            }),
            Some(service) => {
                let stream = tg.protocol.is_stream();
                let exposed = service
                    .containers
                    .iter()
                    .flat_map(|c| c.ports.iter())
                    .any(|p| p.number() == tg.port && p.is_tcp() == stream);
                if !exposed {
                    errors.push(ValidationError::TargetPortMismatch {
                        target_group: tg.name.clone(),
                        port: tg.port,
                        transport: if stream { "tcp" } else { "udp" },
                        service: service.name.clone(),
                    });
                }
            }
        }

        for listener in &tg.listeners {
            if !listener.protocol.allowed_on(lb.kind) {
                errors.push(ValidationError::ProtocolNotAllowed {
                    owner: format!("listener '{}'", listener.name),
                    protocol: listener.protocol.to_string(),
                    kind: lb.kind,
                });
            }
            if listener.protocol.backend() != tg.protocol.backend() {
                errors.push(ValidationError::IncompatibleListener {
                    listener: listener.name.clone(),
                    listener_protocol: listener.protocol.to_string(),
                    target_group: tg.name.clone(),
                    group_protocol: tg.protocol.to_string(),
                });
            }
            if !ports.insert(listener.port) {
                errors.push(ValidationError::DuplicateListenerPort(listener.port));
            }
        }
    }
}

fn check_services(file: &TopologyFile, errors: &mut Vec<ValidationError>) {
    duplicates(
        "service",
        file.services.iter().map(|s| s.name.as_str()),
        errors,
    );
    duplicates(
        "container",
        file.services
            .iter()
            .flat_map(|s| s.containers.iter().map(|c| c.name.as_str())),
        errors,
    );

    let mut record_owner: Vec<(&str, &str)> = Vec::new();
    for service in &file.services {
        let owner = format!("service '{}'", service.name);
        if service.containers.is_empty() {
            errors.push(ValidationError::NoContainers(service.name.clone()));
        }
        if !file.network.subnets.contains(&service.subnets) {
            errors.push(ValidationError::MissingSubnetRole {
                service: service.name.clone(),
                role: service.subnets,
            });
        }

        for name in &service.rule_sets {
            match file.rule_set(name) {
                None => errors.push(ValidationError::DanglingReference {
                    owner: owner.clone(),
                    kind: "rule set",
                    name: name.clone(),
                }),
                Some(set) => {
                    if service.subnets == SubnetRole::Private
                        && set.has_open_ingress()
                        && !set.acknowledge_open_ingress
                    {
                        errors.push(ValidationError::OpenPrivateIngress {
                            service: service.name.clone(),
                            rule_set: set.name.clone(),
                        });
                    }
                }
            }
        }

        if let Some(record) = &service.discovery {
            if file.namespace.record(record).is_none() {
                errors.push(ValidationError::DanglingReference {
                    owner: owner.clone(),
                    kind: "discovery record",
                    name: record.clone(),
                });
            }
            match record_owner.iter().find(|(r, _)| *r == record.as_str()) {
                Some((_, first)) => errors.push(ValidationError::SharedRecord {
                    record: record.clone(),
                    first: first.to_string(),
                    second: service.name.clone(),
                }),
                None => record_owner.push((record.as_str(), service.name.as_str())),
            }
        }

        for dep in &service.depends_on {
            if dep == &service.name {
                errors.push(ValidationError::SelfDependency(service.name.clone()));
            } else if file.service(dep).is_none() {
                errors.push(ValidationError::DanglingReference {
                    owner: owner.clone(),
                    kind: "service",
                    name: dep.clone(),
                });
            }
        }

        for container in &service.containers {
            if file.repository(&container.repository).is_none() {
                errors.push(ValidationError::DanglingReference {
                    owner: format!("container '{}'", container.name),
                    kind: "repository",
                    name: container.repository.clone(),
                });
            }
            if !recipe_inside_context(&container.build.context, &container.build.recipe) {
                errors.push(ValidationError::RecipeOutsideContext {
                    container: container.name.clone(),
                    recipe: container.build.recipe.display().to_string(),
                    context: container.build.context.display().to_string(),
                });
            }
            for (key, value) in &container.env {
                let EnvValue::Discovery {
                    discovery, port, ..
                } = value
                else {
                    continue;
                };
                match file.service(discovery) {
                    None => errors.push(ValidationError::DanglingReference {
                        owner: format!("container '{}' env '{key}'", container.name),
                        kind: "service",
                        name: discovery.clone(),
                    }),
                    Some(target) => {
                        if target.discovery.is_none() {
                            errors.push(ValidationError::UndiscoverableService {
                                container: container.name.clone(),
                                key: key.clone(),
                                service: target.name.clone(),
                            });
                        }
                        if !target.exposes(*port) {
                            errors.push(ValidationError::UnexposedPort {
                                container: container.name.clone(),
                                key: key.clone(),
                                service: target.name.clone(),
                                port: *port,
                            });
                        }
                    }
                }
            }
        }
    }
}

fn check_outputs(file: &TopologyFile, errors: &mut Vec<ValidationError>) {
    use crate::engine::resource::ResourceKind;

    for (output, reference) in &file.outputs {
        let parsed = match AttributeRef::from_str(reference) {
            Ok(parsed) => parsed,
            Err(e) => {
                errors.push(ValidationError::InvalidOutput {
                    output: output.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let name = parsed.address.name.as_str();
        let lb = &file.load_balancer;
        let declared = match parsed.address.kind {
            ResourceKind::Network => file.network.name == name,
            ResourceKind::Cluster => file.cluster.name == name,
            ResourceKind::Namespace => file.namespace.name == name,
            ResourceKind::Discovery => file.namespace.record(name).is_some(),
            ResourceKind::LoadBalancer => lb.name == name,
            ResourceKind::TargetGroup => lb.target_groups.iter().any(|t| t.name == name),
            ResourceKind::Listener => lb.listeners().any(|(_, l)| l.name == name),
            ResourceKind::RuleSet => file.rule_set(name).is_some(),
            ResourceKind::Repository => file.repository(name).is_some(),
            ResourceKind::Service => file.service(name).is_some(),
            ResourceKind::Image => file
                .services
                .iter()
                .any(|s| s.containers.iter().any(|c| c.name == name)),
        };
        if !declared {
            errors.push(ValidationError::InvalidOutput {
                output: output.clone(),
                reason: format!("{} is not declared", parsed.address),
            });
        }
    }
}
