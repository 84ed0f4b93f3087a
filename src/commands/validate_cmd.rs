use anyhow::Result;
use clap::Command;
use console::{style, Emoji};

use crate::commands::Workspace;
use crate::config::CliConfig;

static CHECK: Emoji = Emoji("✅ ", "");

pub fn command() -> Command {
    Command::new("validate")
        .alias("check")
        .about("Check the descriptor without contacting the provider")
}

pub async fn handle(config: &mut CliConfig, _args: &clap::ArgMatches) -> Result<()> {
    let workspace = Workspace::load(config)?;
    let waves = workspace.graph.waves()?;
    println!(
        "{}{} is valid: {} resources in {} dependency waves",
        CHECK,
        style(&workspace.file.project.name).bold().green(),
        workspace.graph.resources.len(),
        waves.len()
    );
    for (name, artifact) in &workspace.images {
        log::debug!("image {name}: {}", artifact.reference);
    }
    Ok(())
}
