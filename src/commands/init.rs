use std::path::PathBuf;

use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use console::{style, Emoji};
use dialoguer::Confirm;

use crate::config::CliConfig;
use crate::decl::file::balancer::BalancerKind;
use crate::decl::load::{self, DESCRIPTOR_FILE};
use crate::decl::template::{render, TopologyParams};

static SPARKLE: Emoji = Emoji("✨ ", "");
static WARNING: Emoji = Emoji("⚠️  ", "");

pub fn command() -> Command {
    Command::new("init")
        .about(format!("Write a {DESCRIPTOR_FILE} for the web/api reference topology"))
        .arg(
            Arg::new("name")
                .long("name")
                .help("Project name, also the discovery namespace")
                .default_value("airtek"),
        )
        .arg(
            Arg::new("region")
                .long("region")
                .help("Region to deploy into")
                .default_value(crate::decl::file::DEFAULT_REGION),
        )
        .arg(
            Arg::new("cidr")
                .long("cidr")
                .help("IPv4 CIDR block of the network")
                .default_value("10.0.0.0/16"),
        )
        .arg(
            Arg::new("zones")
                .long("zones")
                .help("Number of availability zones")
                .value_parser(clap::value_parser!(u8))
                .default_value("2"),
        )
        .arg(
            Arg::new("balancer")
                .long("balancer")
                .short('b')
                .help("Kind of the public load balancer")
                .value_parser(["network", "application"])
                .default_value("network"),
        )
        .arg(
            Arg::new("context")
                .long("context")
                .help("Build context shared by both images")
                .default_value("./infra-team-test/"),
        )
        .arg(
            Arg::new("open-backend")
                .long("open-backend")
                .help("Allow the back end to accept traffic from anywhere")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("yes")
                .long("yes")
                .short('y')
                .help("Do not ask for confirmation")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("force")
                .long("force")
                .short('f')
                .help("Overwrite an existing descriptor")
                .action(ArgAction::SetTrue),
        )
}

pub fn params_from(args: &clap::ArgMatches) -> TopologyParams {
    let defaults = TopologyParams::default();
    let string = |id: &str| args.get_one::<String>(id).cloned();
    TopologyParams {
        name: string("name").unwrap_or(defaults.name),
        region: string("region").unwrap_or(defaults.region),
        cidr: string("cidr").unwrap_or(defaults.cidr),
        availability_zones: args
            .get_one::<u8>("zones")
            .copied()
            .unwrap_or(defaults.availability_zones),
        balancer: match string("balancer").as_deref() {
            Some("application") => BalancerKind::Application,
            _ => BalancerKind::Network,
        },
        open_backend: args.get_flag("open-backend"),
        build_context: string("context")
            .map(PathBuf::from)
            .unwrap_or(defaults.build_context),
    }
}

pub async fn handle(config: &mut CliConfig, args: &clap::ArgMatches) -> Result<()> {
    let params = params_from(args);
    let path = config.root().join(DESCRIPTOR_FILE);
    if path.exists() && !args.get_flag("force") {
        return Err(anyhow::anyhow!(
            "{} already exists. Pass --force to overwrite it",
            path.display()
        ));
    }

    if params.open_backend && !args.get_flag("yes") {
        println!(
            "{}The back end will accept traffic on port {} from {}, not only from the web tier.",
            WARNING,
            crate::decl::template::SERVICE_PORT,
            style("0.0.0.0/0").bold().red()
        );
        let confirm = Confirm::new()
            .with_prompt("Open the back end to the internet anyway?")
            .default(false)
            .interact()?;
        if !confirm {
            return Err(anyhow::anyhow!("Aborted. Re-run without --open-backend"));
        }
    }

    let file = render(&params);
    let written = load::write(config.root(), &file)?;
    log::debug!("Rendered descriptor with {} services", file.services.len());
    println!(
        "{}Wrote {} ({} balancer, {} zone(s), region {})",
        SPARKLE,
        style(written.display()).bold().green(),
        params.balancer,
        params.availability_zones,
        params.region
    );
    Ok(())
}
