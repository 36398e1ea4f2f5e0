//! Write-once artifact storage for stage outputs.
//!
//! Layout: `{root}/{candidate_id}/{stage}_{hash}.{json|md}`, where `hash` is
//! the first 16 hex chars of the content's SHA-256. Identical content maps to
//! the same file; an existing file is never overwritten.
//!
//! Failure records go to `{root}/{candidate_id}/error_{unix_ms}_{hash}.json`.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::domain::Stage;

/// Hash content (first 16 chars of SHA256)
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

/// Stage artifact files under one root directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Save a structured stage output
    pub async fn save_json(
        &self,
        candidate_id: &str,
        stage: Stage,
        data: &serde_json::Value,
    ) -> std::io::Result<PathBuf> {
        let content = serde_json::to_string_pretty(data)?;
        self.save(candidate_id, stage, "json", &content).await
    }

    /// Save a free-text stage output
    pub async fn save_text(&self, candidate_id: &str, stage: Stage, text: &str) -> std::io::Result<PathBuf> {
        self.save(candidate_id, stage, "md", text).await
    }

    /// Save a failure record next to the candidate's stage outputs
    pub async fn save_error(&self, candidate_id: &str, record: &serde_json::Value) -> std::io::Result<PathBuf> {
        let content = serde_json::to_string_pretty(record)?;
        let prefix = format!("error_{}", Utc::now().timestamp_millis());
        self.write_once(candidate_id, &prefix, "json", &content).await
    }

    async fn save(&self, candidate_id: &str, stage: Stage, ext: &str, content: &str) -> std::io::Result<PathBuf> {
        self.write_once(candidate_id, stage.as_str(), ext, content).await
    }

    async fn write_once(&self, candidate_id: &str, prefix: &str, ext: &str, content: &str) -> std::io::Result<PathBuf> {
        let dir = self.root.join(sanitize(candidate_id));
        fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("{}_{}.{}", prefix, hash_content(content), ext));
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => file,
            // Same hash, same content
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(path),
            Err(e) => return Err(e),
        };
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(path)
    }
}

/// Keep candidate ids safe as directory names
fn sanitize(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_content() {
        let hash = hash_content("test input");
        assert_eq!(hash.len(), 16);
        assert_eq!(hash, hash_content("test input"));
        assert_ne!(hash, hash_content("different input"));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("hn_123"), "hn_123");
        assert_eq!(sanitize("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize(""), "_");
    }

    #[tokio::test]
    async fn test_save_is_write_once() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());

        let first = store
            .save_json("hn_1", Stage::Evaluation, &serde_json::json!({"discard": false}))
            .await
            .unwrap();
        let second = store
            .save_json("hn_1", Stage::Evaluation, &serde_json::json!({"discard": false}))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with(temp.path().join("hn_1")));
        assert!(first.file_name().unwrap().to_string_lossy().starts_with("evaluation_"));

        let draft = store.save_text("hn_1", Stage::Drafting, "# Draft").await.unwrap();
        assert_eq!(draft.extension().unwrap(), "md");
        assert_eq!(tokio::fs::read_to_string(&draft).await.unwrap(), "# Draft");
    }

    #[tokio::test]
    async fn test_save_error_record() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());

        let path = store
            .save_error("hn_2", &serde_json::json!({"stage": "drafting", "category": "fatal"}))
            .await
            .unwrap();
        assert!(path.starts_with(temp.path().join("hn_2")));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("error_"));

        let saved: serde_json::Value = serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(saved["category"], "fatal");
    }
}
