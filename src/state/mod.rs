use crate::config::CliConfig;
use crate::engine::resource::Address;
use crate::resolve::Identifiable;
use anyhow::Result;
use clap::{Arg, Command};
use reqwest::Client;

use snapshot::{ResourceState, StateSnapshot};

mod list;
mod show;
pub mod snapshot;

/// A recorded resource together with its address.
pub struct Entry<'a> {
    pub address: &'a Address,
    pub state: &'a ResourceState,
}

impl Identifiable for Entry<'_> {
    fn id(&self) -> &str {
        &self.state.id
    }
    fn address(&self) -> String {
        self.address.to_string()
    }
    fn name(&self) -> &str {
        &self.address.name
    }
}

pub fn entries(snapshot: &StateSnapshot) -> Vec<Entry<'_>> {
    snapshot
        .resources
        .iter()
        .map(|(address, state)| Entry { address, state })
        .collect()
}

pub fn command() -> Command {
    Command::new("state")
        .about("Inspect the recorded state")
        .subcommand_required(false)
        .subcommand(
            Command::new("list")
                .alias("ls")
                .about("List recorded resources")
                .arg(
                    Arg::new("kind")
                        .long("kind")
                        .short('k')
                        .help("Only list resources of this kind"),
                ),
        )
        .subcommand(
            Command::new("show")
                .alias("get")
                .about("Show one recorded resource")
                .arg(
                    Arg::new("resource")
                        .help("Address (kind.name), name, provider id, or id prefix")
                        .required(true)
                        .index(1),
                ),
        )
}

pub async fn handle(
    config: &mut CliConfig,
    _http_client: &Client,
    state_matches: &clap::ArgMatches,
) -> Result<()> {
    match state_matches.subcommand() {
        Some(("list", args)) | Some(("ls", args)) => list::list_resources(config, args),
        Some(("show", args)) | Some(("get", args)) => show::show_resource(config, args),
        Some((_, _)) => Err(anyhow::anyhow!("Unknown state command")),
        None => list::list_resources(config, &clap::ArgMatches::default()),
    }
}
