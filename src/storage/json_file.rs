//! JSON document backend.
//!
//! The store is one JSON array rewritten in full on every insert:
//! read the file, push the record, write the file. There is no file lock
//! and no version check, so concurrent writers race and the last write wins,
//! silently discarding the other writer's record. A crash mid-write can leave
//! a truncated document. Both are accepted for this fallback backend.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

use super::{page_in_memory, ArtifactBackend, StoreError};
use crate::artifacts::{Artifact, ListQuery};

#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn read_all(&self) -> Result<Vec<Artifact>, StoreError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    async fn write_all(&self, artifacts: &[Artifact]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(artifacts)?;
        fs::write(&self.path, contents).await?;
        tracing::debug!(
            "Wrote {} artifacts to {}",
            artifacts.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl ArtifactBackend for JsonFileBackend {
    fn name(&self) -> &'static str {
        "json_file"
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Artifact>, StoreError> {
        Ok(page_in_memory(self.read_all().await?, query))
    }

    async fn get(&self, id: &str) -> Result<Option<Artifact>, StoreError> {
        Ok(self.read_all().await?.into_iter().find(|a| a.id == id))
    }

    async fn insert(&self, artifact: &Artifact) -> Result<(), StoreError> {
        let mut artifacts = self.read_all().await?;
        artifacts.push(artifact.clone());
        self.write_all(&artifacts).await
    }
}
