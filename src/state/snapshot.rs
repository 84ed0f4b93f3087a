//! The last-applied state: what exists, under which provider id, and with
//! which properties. Read once before planning, written after applying.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::engine::resource::{Address, AttributeRef, ResourceKind};
use crate::image::ImageArtifact;

pub const FORMAT_VERSION: u32 = 1;
pub const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub kind: ResourceKind,
    pub id: String,
    /// Desired properties as last applied, placeholders unresolved.
    pub properties: Value,
    pub fingerprint: String,
    /// Values reported by the provider (id, hostname, subnet ids, ...).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub dependencies: BTreeSet<Address>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub format_version: u32,
    /// Bumped on every write. A writer must hold the serial it read.
    pub serial: u64,
    pub lineage: Uuid,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub resources: BTreeMap<Address, ResourceState>,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// Images already built and pushed, by remote reference.
    #[serde(default)]
    pub images: BTreeMap<String, ImageArtifact>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        StateSnapshot {
            format_version: FORMAT_VERSION,
            serial: 0,
            lineage: Uuid::new_v4(),
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
            images: BTreeMap::new(),
        }
    }
}

impl StateSnapshot {
    pub fn attribute(&self, reference: &AttributeRef) -> Option<&str> {
        let resource = self.resources.get(&reference.address)?;
        if reference.attribute == "id" {
            return Some(&resource.id);
        }
        resource
            .attributes
            .get(&reference.attribute)
            .map(String::as_str)
    }
}

/// File-backed snapshot storage with optimistic concurrency on `serial`.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(dir: &Path) -> Self {
        StateStore {
            path: dir.join(STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<StateSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state {}", self.path.display()))?;
        let snapshot: StateSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("State file {} is corrupt", self.path.display()))?;
        if snapshot.format_version > FORMAT_VERSION {
            return Err(anyhow::anyhow!(
                "State file {} has format version {}, this build understands up to {}",
                self.path.display(),
                snapshot.format_version,
                FORMAT_VERSION
            ));
        }
        Ok(Some(snapshot))
    }

    /// The current snapshot, or a fresh empty one.
    pub fn load(&self) -> Result<StateSnapshot> {
        Ok(self.read()?.unwrap_or_default())
    }

    /// Fails when someone else wrote since `snapshot` was loaded.
    pub fn ensure_current(&self, snapshot: &StateSnapshot) -> Result<()> {
        if let Some(current) = self.read()? {
            if current.lineage != snapshot.lineage || current.serial != snapshot.serial {
                return Err(anyhow::anyhow!(
                    "State {} changed since it was read (serial {} on disk, {} in memory); re-run plan",
                    self.path.display(),
                    current.serial,
                    snapshot.serial
                ));
            }
        }
        Ok(())
    }

    /// Write `snapshot` as the next version.
    pub fn save(&self, snapshot: &mut StateSnapshot) -> Result<()> {
        self.ensure_current(snapshot)?;

        snapshot.serial += 1;
        snapshot.updated_at = Utc::now();
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        log::debug!("State saved at serial {}", snapshot.serial);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = StateStore::new(dir.path()).load().unwrap();
        assert_eq!(snapshot.serial, 0);
        assert!(snapshot.resources.is_empty());
    }

    #[test]
    fn save_bumps_serial_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut snapshot = store.load().unwrap();
        snapshot.outputs.insert("url".into(), "lb.example".into());
        store.save(&mut snapshot).unwrap();
        store.save(&mut snapshot).unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.serial, 2);
        assert_eq!(reloaded.outputs["url"], "lb.example");
        assert_eq!(reloaded.lineage, snapshot.lineage);
    }

    #[test]
    fn stale_writer_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut first = store.load().unwrap();
        store.save(&mut first).unwrap();

        let mut a = store.load().unwrap();
        let mut b = store.load().unwrap();
        store.save(&mut a).unwrap();
        let err = store.save(&mut b).unwrap_err();
        assert!(err.to_string().contains("changed since it was read"));
    }
}
