use crate::decl::file::TopologyFile;
use anyhow::{Context, Result};
use std::path::Path;

pub const DESCRIPTOR_FILE: &str = "topology.toml";

pub fn find_and_load(root: &Path) -> Result<TopologyFile> {
    let path = root.join(DESCRIPTOR_FILE);
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "No {} file found in the specified directory: {}",
            DESCRIPTOR_FILE,
            root.display()
        ));
    }

    log::debug!("Loading descriptor from {}", path.display());
    let file_content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse(&file_content).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn parse(content: &str) -> Result<TopologyFile> {
    Ok(toml::from_str(content)?)
}

pub fn write(root: &Path, file: &TopologyFile) -> Result<std::path::PathBuf> {
    let path = root.join(DESCRIPTOR_FILE);
    std::fs::create_dir_all(root)?;
    std::fs::write(&path, toml::to_string_pretty(file)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
