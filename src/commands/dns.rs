use anyhow::Result;
use clap::{Arg, Command};
use console::{style, Emoji};
use reqwest::Client;

use crate::config::CliConfig;
use crate::provider::AnyProvider;

static GLOBE: Emoji = Emoji("🌐 ", "");

pub fn command() -> Command {
    Command::new("resolve")
        .about("Answer a discovery DNS query against the local cloud")
        .arg(
            Arg::new("fqdn")
                .help("Record name such as infraapi.airtek")
                .required(true)
                .index(1),
        )
}

pub async fn handle(
    config: &mut CliConfig,
    client: &Client,
    args: &clap::ArgMatches,
) -> Result<()> {
    let fqdn = args
        .get_one::<String>("fqdn")
        .ok_or_else(|| anyhow::anyhow!("A name to resolve is required"))?;
    let provider = AnyProvider::open(config, client)?;
    let local = provider.as_local().ok_or_else(|| {
        anyhow::anyhow!("resolve only works with the local provider; query the namespace's DNS instead")
    })?;

    let addresses = local.resolve(fqdn.trim_end_matches('.'));
    if addresses.is_empty() {
        return Err(anyhow::anyhow!("{fqdn}: no healthy addresses"));
    }
    println!("{}{}", GLOBE, style(fqdn).bold());
    for address in addresses {
        println!("  {}", style(address).green());
    }
    Ok(())
}
