use crate::config::CliConfig;
use crate::engine::resource::ResourceKind;
use crate::state::snapshot::StateStore;
use anyhow::Result;
use console::Emoji;

static LIST: Emoji = Emoji("📋 ", "");

pub fn list_resources(config: &CliConfig, args: &clap::ArgMatches) -> Result<()> {
    let kind = args
        .try_get_one::<String>("kind")
        .ok()
        .flatten()
        .map(|k| k.parse::<ResourceKind>())
        .transpose()?;

    let store = StateStore::new(&config.state_dir());
    let snapshot = store.load()?;

    let headers = vec![
        "ADDRESS".to_string(),
        "ID".to_string(),
        "UPDATED".to_string(),
    ];
    let content: Vec<Vec<String>> = snapshot
        .resources
        .iter()
        .filter(|(address, _)| kind.is_none_or(|k| address.kind == k))
        .map(|(address, resource)| {
            vec![
                address.to_string(),
                resource.id.clone(),
                resource.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]
        })
        .collect();

    crate::table::draw_table(
        format!("{} Resources (serial {})", LIST, snapshot.serial),
        headers,
        content,
    );
    Ok(())
}
