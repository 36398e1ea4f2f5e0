//! Local JSON files, for manual curation and offline runs.
//!
//! Each file holds one post object or an array of them. Posts need a title;
//! ids are prefixed `file_` so they never collide with other sources.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::adapters::{CallError, Source};
use crate::config::FileSourceConfig;
use crate::domain::Candidate;

const ID_PREFIX: &str = "file_";
const MAX_DERIVED_ID_CHARS: usize = 50;

/// Posts read from files matched by glob patterns
pub struct FileSource {
    config: FileSourceConfig,
}

impl FileSource {
    pub fn new(config: FileSourceConfig) -> Self {
        Self { config }
    }

    /// Expand every configured pattern into existing files, in pattern order
    fn matched_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for pattern in &self.config.paths {
            let entries = match glob::glob(pattern) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(pattern, error = %e, "Invalid file source pattern");
                    continue;
                }
            };

            let before = files.len();
            for entry in entries {
                match entry {
                    Ok(path) if path.is_file() && !files.contains(&path) => files.push(path),
                    Ok(_) => {}
                    Err(e) => warn!(pattern, error = %e, "Unreadable path"),
                }
            }
            if files.len() == before {
                warn!(pattern, "No files matched");
            }
        }
        files
    }

    async fn read_file(path: &Path) -> Result<Vec<Candidate>, CallError> {
        let content = tokio::fs::read_to_string(path).await?;
        let data: Value = serde_json::from_str(&content)?;
        Ok(parse_posts(data))
    }
}

/// Normalize a file's JSON into candidates, skipping untitled entries
fn parse_posts(data: Value) -> Vec<Candidate> {
    let items = match data {
        Value::Array(items) => items,
        other => vec![other],
    };
    items.iter().filter_map(normalize_post).collect()
}

fn normalize_post(item: &Value) -> Option<Candidate> {
    let title = text(item, &["title"]).filter(|t| !t.trim().is_empty())?;

    let raw_id = text(item, &["id"])
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| title.chars().take(MAX_DERIVED_ID_CHARS).collect());
    let id = if raw_id.starts_with(ID_PREFIX) {
        raw_id
    } else {
        format!("{}{}", ID_PREFIX, raw_id)
    };

    let created_secs = number(item, &["created_utc", "timestamp"]).unwrap_or(0.0);

    Some(Candidate {
        id,
        title,
        body: text(item, &["body", "content"]).unwrap_or_default(),
        score: number(item, &["score"]).unwrap_or(0.0) as i64,
        url: text(item, &["url"]).unwrap_or_default(),
        source: "file".to_string(),
        author: text(item, &["author"]).unwrap_or_else(|| "unknown".to_string()),
        created_at: Utc
            .timestamp_opt(created_secs as i64, 0)
            .single()
            .unwrap_or_default(),
        num_comments: number(item, &["num_comments"]).unwrap_or(0.0) as i64,
    })
}

/// First present key as a string; numbers are stringified
fn text(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match item.get(*key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// First present key as a number; numeric strings are accepted
fn number(item: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match item.get(*key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[async_trait]
impl Source for FileSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch_candidates(&self) -> Result<Vec<Candidate>, CallError> {
        let mut candidates = Vec::new();

        for path in self.matched_files() {
            match Self::read_file(&path).await {
                Ok(mut posts) => {
                    debug!(path = %path.display(), count = posts.len(), "Read posts");
                    candidates.append(&mut posts);
                }
                // A bad file never hides the good ones
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to read posts file"),
            }
        }

        candidates.truncate(self.config.post_limit);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_post() {
        let candidate = normalize_post(&json!({
            "id": "landlord-sheet",
            "title": "Tracking rent by hand",
            "content": "Every month I rebuild the same sheet",
            "score": "12",
            "created_utc": 1700000000.5
        }))
        .unwrap();

        assert_eq!(candidate.id, "file_landlord-sheet");
        assert_eq!(candidate.body, "Every month I rebuild the same sheet");
        assert_eq!(candidate.score, 12);
        assert_eq!(candidate.author, "unknown");
        assert_eq!(candidate.source, "file");
        assert_eq!(candidate.created_at.timestamp(), 1_700_000_000);

        // Already prefixed ids are kept, missing ids derive from the title
        assert_eq!(normalize_post(&json!({"id": "file_x", "title": "T"})).unwrap().id, "file_x");
        assert_eq!(normalize_post(&json!({"title": "No id here"})).unwrap().id, "file_No id here");

        assert!(normalize_post(&json!({"id": "x", "body": "untitled"})).is_none());
        assert!(normalize_post(&json!({"title": "   "})).is_none());
    }

    #[tokio::test]
    async fn test_fetch_from_globbed_files() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("a.json"),
            json!([{"id": "1", "title": "One"}, {"title": ""}, {"id": "2", "title": "Two"}]).to_string(),
        )
        .unwrap();
        std::fs::write(temp.path().join("b.json"), json!({"id": "3", "title": "Three"}).to_string()).unwrap();
        std::fs::write(temp.path().join("broken.json"), "{not json").unwrap();

        let source = FileSource::new(FileSourceConfig {
            paths: vec![temp.path().join("*.json").display().to_string()],
            post_limit: 100,
        });

        let mut ids: Vec<String> = source
            .fetch_candidates()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["file_1", "file_2", "file_3"]);
    }

    #[tokio::test]
    async fn test_post_limit() {
        let temp = TempDir::new().unwrap();
        let posts: Vec<Value> = (0..5).map(|i| json!({"id": i, "title": format!("Post {}", i)})).collect();
        let path = temp.path().join("posts.json");
        std::fs::write(&path, Value::Array(posts).to_string()).unwrap();

        let source = FileSource::new(FileSourceConfig {
            paths: vec![path.display().to_string()],
            post_limit: 2,
        });
        assert_eq!(source.fetch_candidates().await.unwrap().len(), 2);
    }
}
