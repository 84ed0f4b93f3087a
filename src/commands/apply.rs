use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use console::{style, Emoji};
use dialoguer::Confirm;
use reqwest::Client;

use crate::commands::plan::{prune_arg, refresh_arg};
use crate::commands::{print_plan, Workspace};
use crate::config::CliConfig;
use crate::default_spinner;
use crate::engine::apply::Engine;
use crate::engine::plan::prepare;
use crate::image::DockerBuilder;
use crate::provider::{AnyProvider, Provider};
use crate::state::snapshot::StateStore;

static ROCKET: Emoji = Emoji("🚀 ", "");
static CHECK: Emoji = Emoji("✅ ", "");
static ERROR: Emoji = Emoji("❌ ", "");

pub fn command() -> Command {
    Command::new("apply")
        .alias("up")
        .about("Create or update the declared topology")
        .arg(prune_arg())
        .arg(refresh_arg())
        .arg(
            Arg::new("yes")
                .long("yes")
                .short('y')
                .help("Apply without asking for confirmation")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("docker")
                .long("docker")
                .help("Build and push images with the docker CLI")
                .action(ArgAction::SetTrue),
        )
}

pub async fn handle(
    config: &mut CliConfig,
    client: &Client,
    args: &clap::ArgMatches,
) -> Result<()> {
    let workspace = Workspace::load(config)?;
    let provider = AnyProvider::open(config, client)?.in_region(&workspace.file.project.region);
    let store = StateStore::new(&config.state_dir());
    let mut state = store.load()?;

    let progress = default_spinner();
    progress.set_prefix("Planning");
    let plan = prepare(
        &provider,
        &workspace.file,
        &workspace.graph,
        &mut state,
        args.get_flag("refresh"),
        args.get_flag("prune"),
    )
    .await;
    progress.finish_and_clear();
    let plan = plan?;

    if plan.is_empty() {
        println!("{}Nothing to do. {} resource(s) up to date.", CHECK, plan.unchanged);
        return Ok(());
    }

    print_plan(&plan);
    println!("\n{}", style(plan.summary()).bold());
    if !args.get_flag("yes") {
        let confirm = Confirm::new()
            .with_prompt(format!("Apply these changes with the {} provider?", provider.name()))
            .default(false)
            .interact()?;
        if !confirm {
            return Err(anyhow::anyhow!("Apply cancelled"));
        }
    }

    let progress = default_spinner();
    progress.set_prefix("Applying");
    let mut engine = Engine::new(&provider, &store).with_progress(progress.clone());
    if args.get_flag("docker") {
        engine = engine.with_builder(DockerBuilder::new(config.root()));
    }
    let report = engine
        .apply(&workspace.graph, &plan, &mut state, &workspace.images)
        .await;
    progress.finish_and_clear();
    let report = report?;

    if let Some(failure) = &report.failure {
        println!(
            "{}{} of {} failed after {} change(s); state keeps what was applied.",
            ERROR,
            failure.action,
            style(&failure.address).bold(),
            report.applied.len()
        );
        return Err(anyhow::anyhow!("{}", failure.error));
    }

    println!(
        "{}Applied {} change(s) to {}",
        ROCKET,
        report.applied.len(),
        style(&workspace.file.project.name).bold().green()
    );
    for (name, value) in &report.outputs {
        println!("  {} = {}", style(name).bold(), style(value).cyan());
    }
    Ok(())
}
