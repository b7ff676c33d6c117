//! Optional project-context analysis used to enrich auto-created sessions.

use std::path::Path;

use async_trait::async_trait;
use log::trace;
use serde::{Deserialize, Serialize};

/// What an analyzer could tell about a project directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub project_type: Option<String>,
    pub tags: Vec<String>,
}

#[async_trait]
pub trait ProjectAnalyzer: Send + Sync {
    async fn analyze(&self, path: &Path) -> std::io::Result<ProjectMetadata>;
}

/// Build manifests and the ecosystem they identify, in priority order.
const MANIFESTS: [(&str, &str); 10] = [
    ("Cargo.toml", "rust"),
    ("package.json", "node"),
    ("pyproject.toml", "python"),
    ("requirements.txt", "python"),
    ("go.mod", "go"),
    ("pom.xml", "java"),
    ("build.gradle", "java"),
    ("Gemfile", "ruby"),
    ("composer.json", "php"),
    ("CMakeLists.txt", "cpp"),
];

/// Detects the project type from well-known manifest files at the root.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestAnalyzer;

#[async_trait]
impl ProjectAnalyzer for ManifestAnalyzer {
    async fn analyze(&self, path: &Path) -> std::io::Result<ProjectMetadata> {
        // Fails with NotFound for a missing directory.
        tokio::fs::metadata(path).await?;

        let mut metadata = ProjectMetadata::default();
        for (manifest, ecosystem) in MANIFESTS {
            if tokio::fs::try_exists(path.join(manifest)).await? {
                trace!("found {} in {}", manifest, path.display());
                metadata.project_type.get_or_insert_with(|| ecosystem.to_string());
                if !metadata.tags.iter().any(|t| t == ecosystem) {
                    metadata.tags.push(ecosystem.to_string());
                }
            }
        }
        if tokio::fs::try_exists(path.join(".git")).await? {
            metadata.tags.push("git".to_string());
        }
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn detects_first_manifest_as_type_and_tags_all() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();

        let metadata = ManifestAnalyzer.analyze(dir.path()).await.unwrap();
        assert_eq!(metadata.project_type.as_deref(), Some("rust"));
        assert_eq!(metadata.tags, vec!["rust", "node", "git"]);
    }

    #[tokio::test]
    async fn plain_directory_has_no_type() {
        let dir = TempDir::new().unwrap();
        let metadata = ManifestAnalyzer.analyze(dir.path()).await.unwrap();
        assert_eq!(metadata, ProjectMetadata::default());
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");
        assert!(ManifestAnalyzer.analyze(&missing).await.is_err());
    }
}
