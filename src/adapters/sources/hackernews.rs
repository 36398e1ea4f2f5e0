//! Hacker News source over the public Algolia search API.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::adapters::{CallError, Source};
use crate::config::HackerNewsConfig;
use crate::domain::Candidate;

const ITEM_URL: &str = "https://news.ycombinator.com/item?id=";

/// Ask HN / Show HN style posts above a minimum score
pub struct HackerNewsSource {
    config: HackerNewsConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "objectID", default)]
    object_id: String,
    title: Option<String>,
    story_title: Option<String>,
    story_text: Option<String>,
    comment_text: Option<String>,
    points: Option<i64>,
    author: Option<String>,
    created_at_i: Option<i64>,
    num_comments: Option<i64>,
}

impl Hit {
    /// Normalize a hit; orphaned comments without a title are dropped
    fn into_candidate(self) -> Option<Candidate> {
        let title = self
            .title
            .or(self.story_title)
            .filter(|t| !t.trim().is_empty())?;

        let url = if self.object_id.is_empty() {
            "https://news.ycombinator.com/".to_string()
        } else {
            format!("{}{}", ITEM_URL, self.object_id)
        };

        Some(Candidate {
            id: format!("hn_{}", self.object_id),
            title,
            body: self.story_text.or(self.comment_text).unwrap_or_default(),
            score: self.points.unwrap_or(0),
            url,
            source: "hackernews".to_string(),
            author: self.author.unwrap_or_else(|| "unknown".to_string()),
            created_at: self
                .created_at_i
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                .unwrap_or_default(),
            num_comments: self.num_comments.unwrap_or(0),
        })
    }
}

impl HackerNewsSource {
    pub fn new(config: HackerNewsConfig) -> Result<Self, CallError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { config, client })
    }

    async fn fetch_by_tag(&self, tag: &str) -> Result<Vec<Candidate>, CallError> {
        let url = format!("{}/search", self.config.api_base.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .query(&[
                ("tags", tag.to_string()),
                ("numericFilters", format!("points>={}", self.config.min_score)),
                ("hitsPerPage", self.config.post_limit.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::from_status(status.as_u16(), body));
        }

        let search: SearchResponse = response.json().await?;
        Ok(parse_hits(search))
    }
}

fn parse_hits(search: SearchResponse) -> Vec<Candidate> {
    search.hits.into_iter().filter_map(Hit::into_candidate).collect()
}

/// Map a configured story type to its search tag
fn search_tag(story_type: &str) -> Option<&'static str> {
    match story_type.trim().to_ascii_lowercase().as_str() {
        "ask_hn" => Some("ask_hn"),
        "show_hn" => Some("show_hn"),
        "story" => Some("story"),
        "poll" => Some("poll"),
        _ => None,
    }
}

#[async_trait]
impl Source for HackerNewsSource {
    fn name(&self) -> &str {
        "hackernews"
    }

    /// Fetch every story type, highest score first.
    ///
    /// One failing tag is skipped; the call fails only when every tag failed.
    async fn fetch_candidates(&self) -> Result<Vec<Candidate>, CallError> {
        let mut candidates = Vec::new();
        let mut last_error = None;

        for story_type in &self.config.story_types {
            let Some(tag) = search_tag(story_type) else {
                warn!(story_type, "Unknown story type, skipping");
                continue;
            };

            match self.fetch_by_tag(tag).await {
                Ok(mut posts) => {
                    debug!(tag, count = posts.len(), "Fetched hackernews posts");
                    candidates.append(&mut posts);
                }
                Err(e) => {
                    warn!(tag, error = %e, "Failed to fetch hackernews posts");
                    last_error = Some(e);
                }
            }
        }

        if candidates.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        // A post can carry more than one tag
        let mut seen = HashSet::new();
        candidates.retain(|c| seen.insert(c.id.clone()));
        candidates.sort_by(|a, b| b.score.cmp(&a.score));
        candidates.truncate(self.config.post_limit);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hits() {
        let search: SearchResponse = serde_json::from_value(serde_json::json!({
            "hits": [
                {
                    "objectID": "123",
                    "title": "Ask HN: How do you track rental expenses?",
                    "story_text": "Spreadsheets keep breaking",
                    "points": 57,
                    "author": "landlord",
                    "created_at_i": 1700000000,
                    "num_comments": 12
                },
                {
                    "objectID": "124",
                    "comment_text": "orphaned comment",
                    "points": 3
                }
            ]
        }))
        .unwrap();

        let candidates = parse_hits(search);
        assert_eq!(candidates.len(), 1);

        let candidate = &candidates[0];
        assert_eq!(candidate.id, "hn_123");
        assert_eq!(candidate.url, "https://news.ycombinator.com/item?id=123");
        assert_eq!(candidate.body, "Spreadsheets keep breaking");
        assert_eq!(candidate.score, 57);
        assert_eq!(candidate.source, "hackernews");
        assert_eq!(candidate.created_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_search_tag_mapping() {
        assert_eq!(search_tag("ask_hn"), Some("ask_hn"));
        assert_eq!(search_tag("SHOW_HN"), Some("show_hn"));
        assert_eq!(search_tag("jobs"), None);
    }
}
