//! Content-addressed container images.
//!
//! The image reference is derived from a digest over the build context, so an
//! unchanged context always produces the same reference and never triggers a
//! rebuild.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use oci_spec::distribution::Reference;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::process::Command;

use crate::decl::file::TopologyFile;
use crate::decl::file::service::BuildDeclaration;

/// Directories never sent to the builder.
const SKIPPED_DIRS: [&str; 3] = [".git", ".topoctl", "target"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    pub repository: String,
    /// `sha256:<hex>` over the context contents and recipe path.
    pub digest: String,
    /// `<repository>:<first 12 hex digits of the digest>`.
    pub reference: String,
    pub context: PathBuf,
    pub recipe: PathBuf,
}

impl ImageArtifact {
    pub fn new(repository: &str, digest: &str, context: &Path, recipe: &Path) -> Self {
        let hex = digest.trim_start_matches("sha256:");
        ImageArtifact {
            repository: repository.to_string(),
            digest: digest.to_string(),
            reference: format!("{}:{}", repository, &hex[..hex.len().min(12)]),
            context: context.to_path_buf(),
            recipe: recipe.to_path_buf(),
        }
    }

    /// Reference pushed to the registry behind `repository_url`.
    pub fn remote_reference(&self, repository_url: &str) -> Result<Reference> {
        let tag = self
            .reference
            .rsplit_once(':')
            .map(|(_, tag)| tag)
            .unwrap_or("latest");
        let text = format!("{}:{}", repository_url.trim_end_matches('/'), tag);
        Reference::from_str(&text)
            .map_err(|e| anyhow::anyhow!("Invalid image reference '{text}': {e}"))
    }
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read build context {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            let skipped = entry
                .file_name()
                .to_str()
                .is_some_and(|name| SKIPPED_DIRS.contains(&name));
            if !skipped {
                collect_files(&path, files)?;
            }
        } else if file_type.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

/// Digest a build context. Paths are relative to `root` (the descriptor directory).
pub fn content_digest(root: &Path, build: &BuildDeclaration) -> Result<String> {
    let context = root
        .join(&build.context)
        .canonicalize()
        .with_context(|| format!("Build context {} does not exist", build.context.display()))?;
    let recipe = root
        .join(&build.recipe)
        .canonicalize()
        .with_context(|| format!("Build recipe {} does not exist", build.recipe.display()))?;
    let recipe_rel = recipe.strip_prefix(&context).map_err(|_| {
        anyhow::anyhow!(
            "Build recipe {} resolves outside context {}",
            recipe.display(),
            context.display()
        )
    })?;

    let mut files = Vec::new();
    collect_files(&context, &mut files)?;

    let mut hasher = Sha256::new();
    hasher.update(b"recipe\0");
    hasher.update(recipe_rel.to_string_lossy().replace('\\', "/").as_bytes());
    hasher.update(b"\0");
    for file in files {
        let rel = file.strip_prefix(&context).unwrap_or(&file);
        let content = std::fs::read(&file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        hasher.update(rel.to_string_lossy().replace('\\', "/").as_bytes());
        hasher.update(b"\0");
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(&content);
    }
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

pub fn artifact_for(
    root: &Path,
    repository: &str,
    build: &BuildDeclaration,
) -> Result<ImageArtifact> {
    let digest = content_digest(root, build)?;
    Ok(ImageArtifact::new(repository, &digest, &build.context, &build.recipe))
}

/// Artifacts for every container in the descriptor, keyed by container name.
pub fn resolve_all(root: &Path, file: &TopologyFile) -> Result<BTreeMap<String, ImageArtifact>> {
    let mut artifacts = BTreeMap::new();
    for service in &file.services {
        for container in &service.containers {
            let artifact = artifact_for(root, &container.repository, &container.build)
                .with_context(|| {
                    format!("Failed to digest image for container '{}'", container.name)
                })?;
            log::debug!("{} -> {}", container.name, artifact.reference);
            artifacts.insert(container.name.clone(), artifact);
        }
    }
    Ok(artifacts)
}

/// Builds and pushes images with the local `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerBuilder {
    root: PathBuf,
    program: String,
}

impl DockerBuilder {
    pub fn new(root: &Path) -> Self {
        DockerBuilder {
            root: root.to_path_buf(),
            program: std::env::var("TOPOCTL_DOCKER").unwrap_or_else(|_| "docker".to_string()),
        }
    }

    /// Use `program` instead of `docker` or `$TOPOCTL_DOCKER`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        log::debug!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(&self.root)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.program))?;
        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "{} {} failed: {}",
                self.program,
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }

    pub async fn build_and_push(
        &self,
        artifact: &ImageArtifact,
        repository_url: &str,
    ) -> Result<String> {
        let remote = artifact.remote_reference(repository_url)?.to_string();
        let recipe = artifact.recipe.to_string_lossy();
        let context = artifact.context.to_string_lossy();
        self.run(&["build", "-f", &recipe, "-t", &remote, &context]).await?;
        self.run(&["push", &remote]).await?;
        log::info!("Pushed {remote}");
        Ok(remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn context() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let api = dir.path().join("infra-team-test/infra-api");
        fs::create_dir_all(&api).unwrap();
        fs::write(api.join("Dockerfile"), "FROM scratch\n").unwrap();
        fs::write(api.join("Program.cs"), "class Api {}\n").unwrap();
        dir
    }

    fn build() -> BuildDeclaration {
        BuildDeclaration {
            context: PathBuf::from("./infra-team-test/"),
            recipe: PathBuf::from("./infra-team-test/infra-api/Dockerfile"),
        }
    }

    #[test]
    fn unchanged_context_yields_same_reference() {
        let dir = context();
        let first = artifact_for(dir.path(), "api-repo", &build()).unwrap();
        let second = artifact_for(dir.path(), "api-repo", &build()).unwrap();
        assert_eq!(first.reference, second.reference);
        assert!(first.reference.starts_with("api-repo:"));
        assert_eq!(first.reference.len(), "api-repo:".len() + 12);
    }

    #[test]
    fn edited_file_changes_digest() {
        let dir = context();
        let before = content_digest(dir.path(), &build()).unwrap();
        fs::write(
            dir.path().join("infra-team-test/infra-api/Program.cs"),
            "class Api { int x; }\n",
        )
        .unwrap();
        assert_ne!(before, content_digest(dir.path(), &build()).unwrap());
    }

    #[test]
    fn git_directory_is_ignored() {
        let dir = context();
        let before = content_digest(dir.path(), &build()).unwrap();
        let git = dir.path().join("infra-team-test/.git");
        fs::create_dir_all(&git).unwrap();
        fs::write(git.join("HEAD"), "ref: refs/heads/main\n").unwrap();
        assert_eq!(before, content_digest(dir.path(), &build()).unwrap());
    }

    #[test]
    fn recipe_outside_context_is_refused() {
        let dir = context();
        fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        let escaping = BuildDeclaration {
            context: PathBuf::from("./infra-team-test/"),
            recipe: PathBuf::from("./Dockerfile"),
        };
        assert!(content_digest(dir.path(), &escaping).is_err());
    }

    #[test]
    fn remote_reference_keeps_content_tag() {
        let artifact = ImageArtifact::new(
            "api-repo",
            "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
            Path::new("ctx"),
            Path::new("ctx/Dockerfile"),
        );
        let remote = artifact
            .remote_reference("registry.local:5000/airtek/api-repo")
            .unwrap();
        assert_eq!(remote.tag(), Some("0123456789ab"));
        assert_eq!(remote.registry(), "registry.local:5000");
    }
}
