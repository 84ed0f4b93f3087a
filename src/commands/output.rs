use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use console::style;

use crate::config::CliConfig;
use crate::state::snapshot::StateStore;

pub fn command() -> Command {
    Command::new("output")
        .about("Print outputs recorded by the last apply")
        .arg(
            Arg::new("name")
                .help("Print only this output's raw value")
                .index(1),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Output in JSON format")
                .action(ArgAction::SetTrue),
        )
}

pub async fn handle(config: &mut CliConfig, args: &clap::ArgMatches) -> Result<()> {
    let state = StateStore::new(&config.state_dir()).load()?;

    if let Some(name) = args.get_one::<String>("name") {
        let value = state
            .outputs
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("No output named '{name}'. Has apply run?"))?;
        println!("{value}");
        return Ok(());
    }

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&state.outputs)?);
        return Ok(());
    }

    if state.outputs.is_empty() {
        println!("{} No outputs recorded.", style("ℹ️").dim());
        return Ok(());
    }
    for (name, value) in &state.outputs {
        println!("{} = {}", style(name).bold(), style(value).cyan());
    }
    Ok(())
}
