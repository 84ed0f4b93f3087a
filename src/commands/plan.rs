use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use console::{style, Emoji};
use reqwest::Client;

use crate::commands::{print_plan, Workspace};
use crate::config::CliConfig;
use crate::default_spinner;
use crate::engine::plan::prepare;
use crate::provider::{AnyProvider, Provider};
use crate::state::snapshot::StateStore;

static SEARCH: Emoji = Emoji("🔍 ", "");
static CHECK: Emoji = Emoji("✅ ", "");

pub fn prune_arg() -> Arg {
    Arg::new("prune")
        .long("prune")
        .help("Delete recorded resources that are no longer declared")
        .action(ArgAction::SetTrue)
}

pub fn refresh_arg() -> Arg {
    Arg::new("refresh")
        .long("refresh")
        .short('r')
        .help("Read recorded resources back from the provider to detect drift")
        .action(ArgAction::SetTrue)
}

pub fn command() -> Command {
    Command::new("plan")
        .about("Show what apply would change")
        .arg(prune_arg())
        .arg(refresh_arg())
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
    progress.set_message(format!("{SEARCH}Comparing with {} state...", provider.name()));
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
        println!(
            "{}No changes. {} resource(s) up to date.",
            CHECK,
            plan.unchanged
        );
        if !plan.orphans.is_empty() {
            print_plan(&plan);
        }
        return Ok(());
    }

    println!("{}", style(format!("Plan for {}", workspace.file.project.name)).bold());
    print_plan(&plan);
    println!("\n{}", style(plan.summary()).bold());
    Ok(())
}
