use std::path::PathBuf;

use anyhow::Result;
use clap::{Arg, Command};
use reqwest::Client;

use topoctl::commands;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
    let matches = Command::new("topoctl")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Declare, plan and apply a web/api container topology")
        .subcommand_required(true)
        .arg(
            Arg::new("directory")
                .short('C')
                .long("directory")
                .global(true)
                .value_name("DIR")
                .help("Run as if started in DIR"),
        )
        .subcommand(commands::init::command())
        .subcommand(commands::validate_cmd::command())
        .subcommand(commands::plan::command())
        .subcommand(commands::apply::command())
        .subcommand(commands::output::command())
        .subcommand(topoctl::state::command())
        .subcommand(commands::images::command())
        .subcommand(commands::dns::command())
        .subcommand(topoctl::login::command())
        .subcommand(topoctl::login::logout_command())
        .get_matches();

    let r = run(&matches).await;
    if let Err(e) = r {
        log::debug!("Error: {e:?}");
        eprintln!("{} {:#}", console::style("error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(matches: &clap::ArgMatches) -> Result<()> {
    let mut config = topoctl::config::CliConfig::init()?;
    if let Some(dir) = matches.get_one::<String>("directory") {
        config.set_root(&PathBuf::from(dir));
    }
    let http_client = Client::new();

    match matches.subcommand() {
        Some(("init", args)) => commands::init::handle(&mut config, args).await,
        Some(("validate", args)) => commands::validate_cmd::handle(&mut config, args).await,
        Some(("plan", args)) => commands::plan::handle(&mut config, &http_client, args).await,
        Some(("apply", args)) => commands::apply::handle(&mut config, &http_client, args).await,
        Some(("output", args)) => commands::output::handle(&mut config, args).await,
        Some(("state", args)) => topoctl::state::handle(&mut config, &http_client, args).await,
        Some(("image", args)) => commands::images::handle(&mut config, args).await,
        Some(("resolve", args)) => commands::dns::handle(&mut config, &http_client, args).await,
        Some(("login", args)) => topoctl::login::handle(&mut config, args).await,
        Some(("logout", args)) => topoctl::login::handle_logout(&mut config, args).await,
        _ => Err(anyhow::anyhow!("Unknown command")),
    }
}
