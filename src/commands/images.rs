use anyhow::Result;
use clap::Command;
use console::Emoji;

use crate::config::CliConfig;
use crate::decl::load;
use crate::image;

static PACKAGE: Emoji = Emoji("📦 ", "");

pub fn command() -> Command {
    Command::new("image")
        .about("Container image helpers")
        .subcommand_required(true)
        .subcommand(
            Command::new("digest")
                .about("Print the content-addressed reference of every container image"),
        )
}

pub async fn handle(config: &mut CliConfig, args: &clap::ArgMatches) -> Result<()> {
    match args.subcommand() {
        Some(("digest", _)) => {
            let file = load::find_and_load(config.root())?;
            let artifacts = image::resolve_all(config.root(), &file)?;
            let content = artifacts
                .iter()
                .map(|(container, artifact)| {
                    vec![
                        container.clone(),
                        artifact.reference.clone(),
                        artifact.digest.clone(),
                    ]
                })
                .collect();
            crate::table::draw_table(
                format!("{PACKAGE} Images"),
                vec!["CONTAINER".into(), "REFERENCE".into(), "DIGEST".into()],
                content,
            );
            Ok(())
        }
        _ => Err(anyhow::anyhow!("Unknown image command")),
    }
}
