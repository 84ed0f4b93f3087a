//! Top-level verbs working on the descriptor in the current directory.

use std::collections::BTreeMap;

use anyhow::{Context, Result};

use crate::config::CliConfig;
use crate::decl::file::TopologyFile;
use crate::decl::{load, validate};
use crate::engine::graph::{compile, ResourceGraph};
use crate::engine::plan::{Action, Plan};
use crate::image::{self, ImageArtifact};

pub mod apply;
pub mod dns;
pub mod images;
pub mod init;
pub mod output;
pub mod plan;
pub mod validate_cmd;

/// A loaded, validated and compiled descriptor.
pub struct Workspace {
    pub file: TopologyFile,
    pub images: BTreeMap<String, ImageArtifact>,
    pub graph: ResourceGraph,
}

impl Workspace {
    pub fn load(config: &CliConfig) -> Result<Self> {
        let mut file = load::find_and_load(config.root())?;
        let region = config.region(&file.project.region).to_string();
        if region != file.project.region {
            log::debug!("Region overridden to {region}");
            file.project.region = region;
        }
        Workspace::from_file(config, file)
    }

    pub fn from_file(config: &CliConfig, file: TopologyFile) -> Result<Self> {
        validate::validate(&file)?;
        let images = image::resolve_all(config.root(), &file)?;
        let graph = compile(&file, &images).context("Failed to compile descriptor")?;
        Ok(Workspace {
            file,
            images,
            graph,
        })
    }
}

pub fn print_plan(plan: &Plan) {
    for change in &plan.changes {
        let symbol = match change.action {
            Action::Create => console::style(change.action.symbol()).green(),
            Action::Update => console::style(change.action.symbol()).yellow(),
            Action::Replace => console::style(change.action.symbol()).magenta(),
            Action::Delete => console::style(change.action.symbol()).red(),
        };
        let reason = change.reason();
        if reason.is_empty() {
            println!("  {symbol} {}", console::style(&change.address).bold());
        } else {
            println!(
                "  {symbol} {} {}",
                console::style(&change.address).bold(),
                console::style(format!("({reason})")).dim()
            );
        }
    }
    for orphan in &plan.orphans {
        println!(
            "  {} {} {}",
            console::style("?").dim(),
            console::style(orphan).bold(),
            console::style("(no longer declared, kept; pass --prune to delete)").dim()
        );
    }
}
