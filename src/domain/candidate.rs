//! Candidates ingested from content sources.
//!
//! Every source normalizes its items into the same shape, so the rest of the
//! pipeline never needs to know where a candidate came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One ingested item being evaluated for productization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Source-unique identifier (e.g. `hn_123`, `file_my-post`)
    pub id: String,

    /// Title of the post/article
    pub title: String,

    /// Body text (may be empty for link posts)
    #[serde(default)]
    pub body: String,

    /// Score/upvotes/points at fetch time
    #[serde(default)]
    pub score: i64,

    /// Link to the original item
    #[serde(default)]
    pub url: String,

    /// Source tag that produced this candidate
    pub source: String,

    /// Author handle
    #[serde(default)]
    pub author: String,

    /// When the original item was created
    pub created_at: DateTime<Utc>,

    /// Number of comments at fetch time
    #[serde(default)]
    pub num_comments: i64,
}

impl Candidate {
    /// Render the candidate as plain text for a generative prompt.
    ///
    /// The body is truncated to keep evaluation prompts bounded.
    pub fn to_prompt_text(&self, max_body_chars: usize) -> String {
        let body: String = self.body.chars().take(max_body_chars).collect();
        format!(
            "Title: {}\nSource: {}\nAuthor: {}\nScore: {}\nComments: {}\nContent: {}\n",
            self.title, self.source, self.author, self.score, self.num_comments, body
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_text_truncates_body() {
        let candidate = Candidate {
            id: "hn_1".to_string(),
            title: "Spreadsheets for landlords".to_string(),
            body: "x".repeat(100),
            score: 42,
            url: String::new(),
            source: "hackernews".to_string(),
            author: "pg".to_string(),
            created_at: Utc::now(),
            num_comments: 7,
        };

        let text = candidate.to_prompt_text(10);
        assert!(text.contains("Title: Spreadsheets for landlords"));
        assert!(text.contains(&format!("Content: {}\n", "x".repeat(10))));
        assert!(!text.contains(&"x".repeat(11)));
    }
}
