use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use topoctl::commands::Workspace;
use topoctl::config::CliConfig;
use topoctl::decl::file::service::{EnvValue, RepositoryDeclaration};
use topoctl::decl::file::TopologyFile;
use topoctl::decl::load;
use topoctl::decl::template::{render, TopologyParams, API, WEB};
use topoctl::engine::apply::{ApplyReport, Engine, RetryPolicy};
use topoctl::engine::graph::ResourceGraph;
use topoctl::engine::plan::{self, Action, Drift, Plan};
use topoctl::engine::resource::{Address, ResourceKind};
use topoctl::image::DockerBuilder;
use topoctl::provider::local::LocalProvider;
use topoctl::provider::ProviderError;
use topoctl::state::snapshot::StateStore;

struct Fixture {
    dir: TempDir,
    config: CliConfig,
    store: StateStore,
    provider: LocalProvider,
}

fn fixture_with(file: &TopologyFile) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let sources = [
        ("infra-api", "class WeatherForecast {}\n"),
        ("infra-web", "<h1>weather</h1>\n"),
    ];
    for (service, source) in sources {
        let path = dir.path().join("infra-team-test").join(service);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("Dockerfile"), "FROM mcr.microsoft.com/dotnet/aspnet:6.0\n").unwrap();
        fs::write(path.join("Program.cs"), source).unwrap();
    }
    load::write(dir.path(), file).unwrap();

    let config = CliConfig::local(dir.path());
    let store = StateStore::new(&config.state_dir());
    let provider = LocalProvider::open(&config.state_dir()).unwrap();
    Fixture {
        dir,
        config,
        store,
        provider,
    }
}

fn fixture() -> Fixture {
    fixture_with(&render(&TopologyParams::default()))
}

impl Fixture {
    fn rewrite(&self, file: &TopologyFile) {
        load::write(self.dir.path(), file).unwrap();
    }

    async fn plan(&self, refresh: bool, prune: bool) -> anyhow::Result<Plan> {
        let workspace = Workspace::load(&self.config)?;
        let mut state = self.store.load()?;
        plan::prepare(
            &self.provider,
            &workspace.file,
            &workspace.graph,
            &mut state,
            refresh,
            prune,
        )
        .await
    }

    async fn apply(&self, refresh: bool, prune: bool) -> ApplyReport {
        self.apply_with(refresh, prune, None).await
    }

    async fn apply_with(
        &self,
        refresh: bool,
        prune: bool,
        builder: Option<DockerBuilder>,
    ) -> ApplyReport {
        let workspace = Workspace::load(&self.config).unwrap();
        let mut state = self.store.load().unwrap();
        let plan = plan::prepare(
            &self.provider,
            &workspace.file,
            &workspace.graph,
            &mut state,
            refresh,
            prune,
        )
        .await
        .unwrap();
        let mut engine =
            Engine::new(&self.provider, &self.store).with_retry(RetryPolicy::immediate(3));
        if let Some(builder) = builder {
            engine = engine.with_builder(builder);
        }
        engine
            .apply(&workspace.graph, &plan, &mut state, &workspace.images)
            .await
            .unwrap()
    }

    fn id_of(&self, address: &Address) -> String {
        self.store.load().unwrap().resources[address].id.clone()
    }
}

fn service(name: &str) -> Address {
    Address::new(ResourceKind::Service, name)
}

#[tokio::test]
async fn reference_topology_comes_up() {
    let fx = fixture();
    let report = fx.apply(false, false).await;
    assert!(report.succeeded(), "{:?}", report.failure);

    let url = &report.outputs["url"];
    assert!(url.starts_with("lb-"));
    assert!(url.ends_with(".elb.local-1.localhost"));
    assert_eq!(fx.provider.resolve("infraapi.airtek").len(), 1);
    assert_eq!(fx.provider.resolve("infraweb.airtek").len(), 1);

    let state = fx.store.load().unwrap();
    assert_eq!(state.outputs["url"], *url);
    assert_eq!(
        state.resources[&service(WEB)].properties["containers"][0]["env"]["ApiAddress"],
        json!("http://infraapi.airtek:5000/WeatherForecast")
    );

    // The back end sits in a private subnet, the front end in a public one.
    let network = &state.resources[&Address::new(ResourceKind::Network, "airtek-vpc")];
    let api_ip = fx.provider.resolve("infraapi.airtek")[0];
    let web_ip = fx.provider.resolve("infraweb.airtek")[0];
    let cloud = fx.provider.snapshot();
    let subnet_of = |ip: std::net::Ipv4Addr| {
        cloud
            .resources
            .values()
            .flat_map(|r| r.tasks.iter())
            .find(|t| t.ip == ip.to_string())
            .map(|t| t.subnet_id.clone())
            .unwrap()
    };
    assert!(network.attributes["private_subnet_ids"].contains(&subnet_of(api_ip)));
    assert!(network.attributes["public_subnet_ids"].contains(&subnet_of(web_ip)));
}

#[tokio::test]
async fn reapplying_unchanged_descriptor_changes_nothing() {
    let fx = fixture();
    assert!(fx.apply(false, false).await.succeeded());
    let calls = fx.provider.mutating_calls();

    let plan = fx.plan(true, false).await.unwrap();
    assert!(plan.is_empty(), "{:?}", plan.changes);

    let report = fx.apply(false, false).await;
    assert!(report.applied.is_empty());
    assert_eq!(fx.provider.mutating_calls(), calls);
}

#[tokio::test]
async fn too_many_zones_fail_before_any_create() {
    let fx = fixture_with(&render(&TopologyParams {
        availability_zones: 4,
        ..TopologyParams::default()
    }));
    let err = fx.plan(false, false).await.unwrap_err();
    assert!(err.to_string().contains("has 3 availability zones"));
    assert_eq!(fx.provider.mutating_calls(), 0);
}

#[tokio::test]
async fn transient_errors_are_retried() {
    let fx = fixture();
    fx.provider.inject_fault(
        Some(ResourceKind::Network),
        ProviderError::Transient("throttled".into()),
    );
    let report = fx.apply(false, false).await;
    assert!(report.succeeded());

    let network = Address::new(ResourceKind::Network, "airtek-vpc");
    let attempts = fx
        .provider
        .calls()
        .iter()
        .filter(|c| c.op == "create" && c.address.as_ref() == Some(&network))
        .count();
    assert_eq!(attempts, 2);
}

#[tokio::test]
async fn rejection_halts_and_keeps_applied_resources() {
    let fx = fixture();
    fx.provider.inject_fault(
        Some(ResourceKind::Service),
        ProviderError::Rejected("service quota exceeded".into()),
    );
    let report = fx.apply(false, false).await;
    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.address, service(API));
    assert_eq!(failure.action, Action::Create);

    let state = fx.store.load().unwrap();
    assert!(state.resources.contains_key(&Address::new(ResourceKind::Network, "airtek-vpc")));
    assert!(!state.resources.contains_key(&service(API)));
    assert!(!state.resources.contains_key(&service(WEB)));
    assert!(state.outputs.is_empty());

    // The next run picks up where the failed one stopped.
    let plan = fx.plan(false, false).await.unwrap();
    assert_eq!(plan.count(Action::Create), 2);
    assert!(fx.apply(false, false).await.succeeded());
    assert_eq!(fx.provider.resolve("infraapi.airtek").len(), 1);
}

#[tokio::test]
async fn drift_is_detected_and_repaired() {
    let fx = fixture();
    assert!(fx.apply(false, false).await.succeeded());

    let api_id = fx.id_of(&service(API));
    let repo = Address::new(ResourceKind::Repository, "web-repo");
    let repo_id = fx.id_of(&repo);
    assert!(fx.provider.tamper(&api_id, "desired_count", json!(4)));
    assert!(fx.provider.remove_out_of_band(&repo_id));

    // Without refresh nothing looks different.
    assert!(fx.plan(false, false).await.unwrap().is_empty());

    let plan = fx.plan(true, false).await.unwrap();
    let api = plan.get(&service(API)).unwrap();
    assert_eq!(api.action, Action::Update);
    assert_eq!(api.drift, Some(Drift::Modified));
    let missing = plan.get(&repo).unwrap();
    assert_eq!(missing.action, Action::Create);
    assert_eq!(missing.drift, Some(Drift::Missing));

    assert!(fx.apply(true, false).await.succeeded());
    assert!(fx.plan(true, false).await.unwrap().is_empty());
    assert_eq!(fx.provider.resolve("infraapi.airtek").len(), 1);
}

#[tokio::test]
async fn removed_declarations_are_pruned_only_on_request() {
    let mut file = render(&TopologyParams::default());
    file.repositories.push(RepositoryDeclaration {
        name: "scratch-repo".into(),
    });
    let fx = fixture_with(&file);
    assert!(fx.apply(false, false).await.succeeded());
    let scratch = Address::new(ResourceKind::Repository, "scratch-repo");
    let scratch_id = fx.id_of(&scratch);

    file.repositories.pop();
    fx.rewrite(&file);

    let kept = fx.plan(false, false).await.unwrap();
    assert!(kept.is_empty());
    assert_eq!(kept.orphans, vec![scratch.clone()]);

    let report = fx.apply(false, true).await;
    assert_eq!(report.applied, vec![(scratch.clone(), Action::Delete)]);
    assert!(fx.provider.snapshot().resources.get(&scratch_id).is_none());
    assert!(!fx.store.load().unwrap().resources.contains_key(&scratch));
}

#[tokio::test]
async fn pruning_everything_deletes_dependents_first() {
    let fx = fixture();
    assert!(fx.apply(false, false).await.succeeded());

    // The local cloud refuses to delete anything still referenced, so a
    // clean teardown proves the order.
    let mut state = fx.store.load().unwrap();
    let empty = ResourceGraph::default();
    let plan = plan::compute(&empty, &state, &BTreeMap::new(), true).unwrap();
    let report = Engine::new(&fx.provider, &fx.store)
        .with_retry(RetryPolicy::immediate(1))
        .apply(&empty, &plan, &mut state, &BTreeMap::new())
        .await
        .unwrap();
    assert!(report.succeeded(), "{:?}", report.failure);
    assert!(fx.provider.snapshot().resources.is_empty());
    assert!(fx.store.load().unwrap().resources.is_empty());
}

#[tokio::test]
async fn network_replacement_moves_everything_across() {
    let fx = fixture();
    assert!(fx.apply(false, false).await.succeeded());

    let mut file = render(&TopologyParams::default());
    file.network.cidr = "10.1.0.0/16".into();
    fx.rewrite(&file);

    let plan = fx.plan(false, false).await.unwrap();
    let network = Address::new(ResourceKind::Network, "airtek-vpc");
    assert_eq!(plan.get(&network).unwrap().action, Action::Replace);

    let report = fx.apply(false, false).await;
    assert!(report.succeeded(), "{:?}", report.failure);

    let networks: Vec<_> = fx
        .provider
        .snapshot()
        .resources
        .into_values()
        .filter(|r| r.kind == ResourceKind::Network)
        .collect();
    assert_eq!(networks.len(), 1);
    assert_eq!(networks[0].properties["cidr"], json!("10.1.0.0/16"));

    let api = fx.provider.resolve("infraapi.airtek");
    assert_eq!(api.len(), 1);
    assert_eq!(api[0].octets()[..2], [10, 1]);
    assert!(fx.plan(true, false).await.unwrap().is_empty());
}

#[tokio::test]
async fn stale_state_is_refused_before_any_change() {
    let fx = fixture();
    let workspace = Workspace::load(&fx.config).unwrap();
    let mut stale = fx.store.load().unwrap();
    let mut fresh = fx.store.load().unwrap();
    fx.store.save(&mut fresh).unwrap();

    let plan = plan::compute(&workspace.graph, &stale, &BTreeMap::new(), false).unwrap();
    let err = Engine::new(&fx.provider, &fx.store)
        .apply(&workspace.graph, &plan, &mut stale, &workspace.images)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("changed since it was read"));
    assert_eq!(fx.provider.mutating_calls(), 0);
}

#[tokio::test]
async fn edited_context_replaces_images_only() {
    let fx = fixture();
    assert!(fx.apply(false, false).await.succeeded());

    let first = Workspace::load(&fx.config).unwrap();
    let second = Workspace::load(&fx.config).unwrap();
    assert_eq!(first.images[API].reference, second.images[API].reference);
    assert!(first.images[API].reference.starts_with("api-repo:"));

    fs::write(
        fx.dir.path().join("infra-team-test/infra-api/Program.cs"),
        "class WeatherForecast { int TemperatureC; }\n",
    )
    .unwrap();
    let plan = fx.plan(false, false).await.unwrap();

    // Both services build from the same context, so both references move.
    for name in [API, WEB] {
        let image = plan.get(&Address::new(ResourceKind::Image, name)).unwrap();
        assert_eq!(image.action, Action::Replace);
        assert_eq!(plan.get(&service(name)).unwrap().action, Action::Update);
    }
    assert!(plan.get(&Address::new(ResourceKind::Network, "airtek-vpc")).is_none());

    assert!(fx.apply(false, false).await.succeeded());
    let images = fx
        .provider
        .snapshot()
        .resources
        .into_values()
        .filter(|r| r.kind == ResourceKind::Image)
        .count();
    assert_eq!(images, 2);
}

#[tokio::test]
async fn literal_env_text_reaches_the_service_verbatim() {
    let mut file = render(&TopologyParams::default());
    let web = file.services.iter_mut().find(|s| s.name == WEB).unwrap();
    web.containers[0]
        .env
        .insert("GREETING".to_string(), EnvValue::Literal("${HOME}/app".to_string()));
    let fx = fixture_with(&file);

    let report = fx.apply(false, false).await;
    assert!(report.succeeded(), "{:?}", report.failure);
    let cloud = fx.provider.snapshot();
    let deployed = &cloud.resources[&fx.id_of(&service(WEB))];
    assert_eq!(deployed.properties["containers"][0]["env"]["GREETING"], json!("${HOME}/app"));
    assert!(fx.plan(true, false).await.unwrap().is_empty());
}

/// A stand-in for the docker CLI that records its arguments, one call per line.
struct FakeDocker {
    program: PathBuf,
    log: PathBuf,
}

impl FakeDocker {
    #[cfg(unix)]
    fn install(dir: &Path) -> Self {
        use std::os::unix::fs::PermissionsExt;

        let program = dir.join("fake-docker");
        let log = dir.join("docker.log");
        fs::write(&program, format!("#!/bin/sh\necho \"$@\" >> '{}'\n", log.display())).unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();
        FakeDocker { program, log }
    }

    fn builder(&self, root: &Path) -> DockerBuilder {
        DockerBuilder::new(root).with_program(self.program.to_string_lossy())
    }

    fn calls(&self, verb: &str) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .filter(|line| line.split_whitespace().next() == Some(verb))
            .map(str::to_string)
            .collect()
    }
}

/// The web image builds from its own folder, so editing the api sources
/// leaves its digest alone.
fn separate_contexts() -> TopologyFile {
    let mut file = render(&TopologyParams::default());
    let web = file.services.iter_mut().find(|s| s.name == WEB).unwrap();
    web.containers[0].build.context = PathBuf::from("./infra-team-test/infra-web/");
    web.containers[0].build.recipe = PathBuf::from("./infra-team-test/infra-web/Dockerfile");
    file
}

#[cfg(unix)]
#[tokio::test]
async fn images_are_built_once_per_content() {
    let fx = fixture_with(&separate_contexts());
    let tools = tempfile::tempdir().unwrap();
    let docker = FakeDocker::install(tools.path());

    assert!(fx.apply_with(false, false, Some(docker.builder(fx.dir.path()))).await.succeeded());
    assert_eq!(docker.calls("build").len(), 2);
    assert_eq!(docker.calls("push").len(), 2);

    // Unchanged contexts: nothing to do, nothing built.
    assert!(fx.apply_with(false, false, Some(docker.builder(fx.dir.path()))).await.succeeded());
    assert_eq!(docker.calls("build").len(), 2);

    // A recreated image whose content is already in the registry is not pushed again.
    let api_image = Address::new(ResourceKind::Image, API);
    assert!(fx.provider.remove_out_of_band(&fx.id_of(&api_image)));
    let report = fx.apply_with(true, false, Some(docker.builder(fx.dir.path()))).await;
    assert!(report.succeeded(), "{:?}", report.failure);
    assert!(report.applied.contains(&(api_image, Action::Create)));
    assert_eq!(docker.calls("push").len(), 2);

    fs::write(
        fx.dir.path().join("infra-team-test/infra-api/Program.cs"),
        "class WeatherForecast { string Summary; }\n",
    )
    .unwrap();
    assert!(fx.apply_with(false, false, Some(docker.builder(fx.dir.path()))).await.succeeded());
    assert_eq!(docker.calls("build").len(), 3);
    let pushes = docker.calls("push");
    assert_eq!(pushes.len(), 3);
    assert!(pushes[2].contains("/api-repo:"));
}

#[cfg(unix)]
#[tokio::test]
async fn moving_a_container_to_another_repository_pushes_there() {
    let mut file = render(&TopologyParams::default());
    let fx = fixture_with(&file);
    let tools = tempfile::tempdir().unwrap();
    let docker = FakeDocker::install(tools.path());
    assert!(fx.apply_with(false, false, Some(docker.builder(fx.dir.path()))).await.succeeded());

    file.repositories.push(RepositoryDeclaration {
        name: "api-repo-v2".into(),
    });
    let api = file.services.iter_mut().find(|s| s.name == API).unwrap();
    api.containers[0].repository = "api-repo-v2".into();
    fx.rewrite(&file);

    let report = fx.apply_with(false, false, Some(docker.builder(fx.dir.path()))).await;
    assert!(report.succeeded(), "{:?}", report.failure);
    let pushes = docker.calls("push");
    assert_eq!(pushes.len(), 3);
    assert!(pushes[2].contains("/api-repo-v2:"));
}
