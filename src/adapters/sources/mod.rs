//! Content sources and the registry that builds them from configuration.

mod file;
mod hackernews;

use std::fmt;

use anyhow::{Context, Result};

use super::Source;
use crate::config::Settings;

pub use file::FileSource;
pub use hackernews::HackerNewsSource;

/// Closed set of supported sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    HackerNews,
    File,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::HackerNews, SourceKind::File];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::HackerNews => "hackernews",
            Self::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build every enabled source. Fails on an unknown or unusable source.
pub fn build_sources(settings: &Settings) -> Result<Vec<Box<dyn Source>>> {
    let mut sources: Vec<Box<dyn Source>> = Vec::new();

    for name in &settings.sources.enabled {
        let kind = SourceKind::parse(name).with_context(|| format!("Unknown source '{}'", name))?;
        // Enabling a source twice would ingest it twice
        if sources.iter().any(|s| s.name() == kind.as_str()) {
            continue;
        }

        let source: Box<dyn Source> = match kind {
            SourceKind::HackerNews => Box::new(
                HackerNewsSource::new(settings.sources.hackernews.clone())
                    .context("Failed to build hackernews source")?,
            ),
            SourceKind::File => {
                if settings.sources.file.paths.is_empty() {
                    anyhow::bail!("File source enabled without any paths");
                }
                Box::new(FileSource::new(settings.sources.file.clone()))
            }
        };
        sources.push(source);
    }

    Ok(sources)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::ConfigFile;

    fn settings(enabled: &[&str]) -> Settings {
        let mut settings = Settings::resolve(ConfigFile::default(), None, PathBuf::from("/tmp/autopilot"));
        settings.sources.enabled = enabled.iter().map(|s| s.to_string()).collect();
        settings
    }

    #[test]
    fn test_source_kind_parse() {
        assert_eq!(SourceKind::parse("hackernews"), Some(SourceKind::HackerNews));
        assert_eq!(SourceKind::parse(" File "), Some(SourceKind::File));
        assert_eq!(SourceKind::parse("reddit"), None);
    }

    #[test]
    fn test_build_sources() {
        let mut with_files = settings(&["file", "hackernews", "file"]);
        with_files.sources.file.paths = vec!["*.json".to_string()];

        let sources = build_sources(&with_files).unwrap();
        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["file", "hackernews"]);
    }

    #[test]
    fn test_build_sources_rejects_unusable_config() {
        assert!(build_sources(&settings(&["rss"])).is_err());
        // File source without paths
        assert!(build_sources(&settings(&["file"])).is_err());
    }
}
