//! The reference web/api topology, rendered from a handful of parameters.
//!
//! One descriptor covers every variant: the balancer kind and how strict the
//! back-end ingress is are the only things that differ between them.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::decl::file::balancer::{
    BalancerKind, ListenerDeclaration, LoadBalancerDeclaration, TargetGroupDeclaration,
    TrafficProtocol,
};
use crate::decl::file::network::{
    ClusterDeclaration, NamespaceDeclaration, NetworkDeclaration, RecordDeclaration, RecordType,
    RoutingPolicy, SubnetRole,
};
use crate::decl::file::ports::{Port, PortRange};
use crate::decl::file::rules::{RuleDeclaration, RuleProtocol, RuleSetDeclaration};
use crate::decl::file::service::{
    BuildDeclaration, ContainerDeclaration, EnvValue, RepositoryDeclaration, ServiceDeclaration,
};
use crate::decl::file::{ProjectDeclaration, TopologyFile, DEFAULT_REGION};

pub const SERVICE_PORT: u16 = 5000;
pub const PUBLIC_PORT: u16 = 80;
pub const WEB: &str = "infraweb";
pub const API: &str = "infraapi";

#[derive(Debug, Clone)]
pub struct TopologyParams {
    pub name: String,
    pub region: String,
    pub cidr: String,
    pub availability_zones: u8,
    pub balancer: BalancerKind,
    /// Let the back end accept traffic from anywhere instead of only from the web rule set.
    pub open_backend: bool,
    pub build_context: PathBuf,
}

impl Default for TopologyParams {
    fn default() -> Self {
        TopologyParams {
            name: "airtek".to_string(),
            region: DEFAULT_REGION.to_string(),
            cidr: "10.0.0.0/16".to_string(),
            availability_zones: 2,
            balancer: BalancerKind::Network,
            open_backend: false,
            build_context: PathBuf::from("./infra-team-test/"),
        }
    }
}

fn allow_all_egress() -> RuleDeclaration {
    RuleDeclaration {
        protocol: RuleProtocol::All,
        ports: None,
        cidr_blocks: vec!["0.0.0.0/0".to_string()],
        rule_sets: vec![],
    }
}

fn service_ingress(cidr_blocks: Vec<String>, rule_sets: Vec<String>) -> RuleDeclaration {
    RuleDeclaration {
        protocol: RuleProtocol::Tcp,
        ports: Some(PortRange::single(SERVICE_PORT)),
        cidr_blocks,
        rule_sets,
    }
}

fn record(name: &str) -> RecordDeclaration {
    RecordDeclaration {
        name: name.to_string(),
        record_type: RecordType::A,
        ttl: 10,
        routing_policy: RoutingPolicy::Multivalue,
        failure_threshold: 1,
    }
}

fn container(name: &str, repository: &str, context: &PathBuf, dir: &str) -> ContainerDeclaration {
    ContainerDeclaration {
        name: name.to_string(),
        repository: repository.to_string(),
        ports: vec![Port::Tcp(SERVICE_PORT)],
        build: BuildDeclaration {
            context: context.clone(),
            recipe: context.join(dir).join("Dockerfile"),
        },
        env: BTreeMap::new(),
    }
}

pub fn render(params: &TopologyParams) -> TopologyFile {
    let web_rules = RuleSetDeclaration {
        name: "web".to_string(),
        description: "HTTP access from anywhere.".to_string(),
        acknowledge_open_ingress: false,
        ingress: vec![service_ingress(vec!["0.0.0.0/0".to_string()], vec![])],
        egress: vec![allow_all_egress()],
    };

    let api_rules = if params.open_backend {
        RuleSetDeclaration {
            name: "api".to_string(),
            description: "Access from anywhere.".to_string(),
            acknowledge_open_ingress: true,
            ingress: vec![service_ingress(vec!["0.0.0.0/0".to_string()], vec![])],
            egress: vec![allow_all_egress()],
        }
    } else {
        RuleSetDeclaration {
            name: "api".to_string(),
            description: "Only allow access from the web rule set.".to_string(),
            acknowledge_open_ingress: false,
            ingress: vec![service_ingress(vec![], vec!["web".to_string()])],
            egress: vec![allow_all_egress()],
        }
    };

    let (listener_protocol, group_protocol, balancer_rules) = match params.balancer {
        BalancerKind::Network => (TrafficProtocol::Tcp, TrafficProtocol::Tcp, vec![]),
        BalancerKind::Application => (
            TrafficProtocol::Http,
            TrafficProtocol::Http,
            vec!["web".to_string()],
        ),
    };

    let api = ServiceDeclaration {
        name: API.to_string(),
        subnets: SubnetRole::Private,
        rule_sets: vec!["api".to_string()],
        desired_count: 1,
        discovery: Some(API.to_string()),
        depends_on: vec![],
        containers: vec![container(API, "api-repo", &params.build_context, "infra-api")],
    };

    let mut web_container = container(WEB, "web-repo", &params.build_context, "infra-web");
    web_container.env.insert(
        "ApiAddress".to_string(),
        EnvValue::Discovery {
            discovery: API.to_string(),
            port: SERVICE_PORT,
            path: Some("/WeatherForecast".to_string()),
            scheme: "http".to_string(),
        },
    );
    let web = ServiceDeclaration {
        name: WEB.to_string(),
        subnets: SubnetRole::Public,
        rule_sets: vec!["web".to_string()],
        desired_count: 1,
        discovery: Some(WEB.to_string()),
        depends_on: vec![],
        containers: vec![web_container],
    };

    let vpc_name = format!("{}-vpc", params.name);
    TopologyFile {
        project: ProjectDeclaration {
            name: params.name.clone(),
            region: params.region.clone(),
        },
        outputs: BTreeMap::from([("url".to_string(), "listener.listener1.hostname".to_string())]),
        network: NetworkDeclaration {
            name: vpc_name.clone(),
            cidr: params.cidr.clone(),
            subnets: vec![SubnetRole::Public, SubnetRole::Private],
            availability_zones: params.availability_zones,
            tags: BTreeMap::from([("Name".to_string(), vpc_name)]),
        },
        cluster: ClusterDeclaration {
            name: "cluster".to_string(),
        },
        namespace: NamespaceDeclaration {
            name: params.name.clone(),
            description: params.name.clone(),
            records: vec![record(WEB), record(API)],
        },
        load_balancer: LoadBalancerDeclaration {
            name: "lb".to_string(),
            kind: params.balancer,
            external: true,
            rule_sets: balancer_rules,
            target_groups: vec![TargetGroupDeclaration {
                name: "web-tg".to_string(),
                port: SERVICE_PORT,
                protocol: group_protocol,
                service: WEB.to_string(),
                listeners: vec![ListenerDeclaration {
                    name: "listener1".to_string(),
                    port: PUBLIC_PORT,
                    protocol: listener_protocol,
                }],
            }],
        },
        rule_sets: vec![web_rules, api_rules],
        repositories: vec![
            RepositoryDeclaration {
                name: "web-repo".to_string(),
            },
            RepositoryDeclaration {
                name: "api-repo".to_string(),
            },
        ],
        services: vec![api, web],
    }
}
