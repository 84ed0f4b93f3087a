use crate::config::CliConfig;
use crate::resolve::resolve_id;
use crate::state::snapshot::StateStore;
use crate::state::{entries, Entry};
use anyhow::Result;
use console::{style, Emoji};

static RESOURCE: Emoji = Emoji("📦 ", "");

pub fn show_resource(config: &CliConfig, args: &clap::ArgMatches) -> Result<()> {
    let input = args
        .get_one::<String>("resource")
        .ok_or_else(|| anyhow::anyhow!("A resource is required"))?;

    let snapshot = StateStore::new(&config.state_dir()).load()?;
    let entries = entries(&snapshot);
    let entry = resolve_id(input, &entries, "resource")?;
    display_resource(entry)
}

fn display_resource(entry: &Entry<'_>) -> Result<()> {
    let header = format!("{} {}", RESOURCE, entry.address);
    println!("{}", style(&header).bold());
    println!("{}", "━".repeat(header.chars().count() + 5));
    println!("ID:           {}", style(&entry.state.id).yellow());
    println!("Kind:         {}", style(entry.state.kind).cyan());
    println!(
        "Created:      {}",
        style(entry.state.created_at.format("%Y-%m-%d %H:%M:%S")).dim()
    );
    println!(
        "Updated:      {}",
        style(entry.state.updated_at.format("%Y-%m-%d %H:%M:%S")).dim()
    );
    let fingerprint = &entry.state.fingerprint;
    println!("Fingerprint:  {}", style(&fingerprint[..12.min(fingerprint.len())]).dim());

    if !entry.state.dependencies.is_empty() {
        println!("\n{}", style("Depends on").bold());
        for dependency in &entry.state.dependencies {
            println!("  {dependency}");
        }
    }
    if !entry.state.attributes.is_empty() {
        println!("\n{}", style("Attributes").bold());
        for (key, value) in &entry.state.attributes {
            println!("  {:<20} {}", key, style(value).green());
        }
    }
    println!("\n{}", style("Properties").bold());
    println!("{}", serde_json::to_string_pretty(&entry.state.properties)?);
    Ok(())
}
