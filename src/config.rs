//! Configuration for autopilot.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (AUTOPILOT_HOME, AUTOPILOT_CONFIG, AUTOPILOT_KILL_SWITCH,
//!    AUTOPILOT_DRY_RUN, OPENAI_API_KEY, GUMROAD_ACCESS_TOKEN)
//! 2. Config file (.autopilot/config.yaml)
//! 3. Defaults (~/.autopilot)
//!
//! Config file discovery:
//! - AUTOPILOT_CONFIG names the file explicitly
//! - Otherwise searches current directory and parents for .autopilot/config.yaml
//! - Relative paths in the config file resolve against its .autopilot/ directory

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapters::SourceKind;
use crate::core::{BudgetLimits, FeedbackSettings, Pricing, RetryPolicy, RetrySettings};

const CONFIG_DIR: &str = ".autopilot";
const CONFIG_FILE: &str = "config.yaml";

/// Every validation failure found in one pass
#[derive(Debug, Error)]
#[error("invalid configuration: {}", .0.join("; "))]
pub struct ConfigError(pub Vec<String>);

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub budget: BudgetLimits,
    #[serde(default)]
    pub pricing: Pricing,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub sales: FeedbackSettings,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub storefront: StorefrontConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .autopilot/)
    pub home: Option<String>,
    /// Ledger database file (relative to home)
    pub database: Option<String>,
    /// Artifact directory (relative to home)
    pub artifacts: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_max_regeneration_attempts")]
    pub max_regeneration_attempts: u32,

    #[serde(default)]
    pub kill_switch: bool,

    /// Storefront calls are simulated
    #[serde(default = "default_true")]
    pub dry_run: bool,
}

fn default_max_regeneration_attempts() -> u32 {
    1
}
fn default_true() -> bool {
    true
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_regeneration_attempts: default_max_regeneration_attempts(),
            kill_switch: false,
            dry_run: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Source tags to ingest from
    #[serde(default = "default_enabled_sources")]
    pub enabled: Vec<String>,
    #[serde(default)]
    pub hackernews: HackerNewsConfig,
    #[serde(default)]
    pub file: FileSourceConfig,
}

fn default_enabled_sources() -> Vec<String> {
    vec!["hackernews".to_string()]
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_sources(),
            hackernews: HackerNewsConfig::default(),
            file: FileSourceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HackerNewsConfig {
    #[serde(default = "default_hn_api_base")]
    pub api_base: String,
    /// Algolia tags: ask_hn, show_hn, story, poll
    #[serde(default = "default_story_types")]
    pub story_types: Vec<String>,
    #[serde(default = "default_min_score")]
    pub min_score: u32,
    #[serde(default = "default_hn_post_limit")]
    pub post_limit: usize,
    #[serde(default = "default_source_timeout")]
    pub timeout_seconds: u64,
}

fn default_hn_api_base() -> String {
    "https://hn.algolia.com/api/v1".to_string()
}
fn default_story_types() -> Vec<String> {
    vec!["ask_hn".to_string(), "show_hn".to_string()]
}
fn default_min_score() -> u32 {
    10
}
fn default_hn_post_limit() -> usize {
    50
}
fn default_source_timeout() -> u64 {
    10
}

impl Default for HackerNewsConfig {
    fn default() -> Self {
        Self {
            api_base: default_hn_api_base(),
            story_types: default_story_types(),
            min_score: default_min_score(),
            post_limit: default_hn_post_limit(),
            timeout_seconds: default_source_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSourceConfig {
    /// Glob patterns of JSON files
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default = "default_file_post_limit")]
    pub post_limit: usize,
}

fn default_file_post_limit() -> usize {
    100
}

impl Default for FileSourceConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            post_limit: default_file_post_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_api_base")]
    pub api_base: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_llm_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: default_llm_api_base(),
            timeout_seconds: default_llm_timeout(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorefrontConfig {
    #[serde(default = "default_storefront_api_base")]
    pub api_base: String,
    #[serde(default = "default_storefront_timeout")]
    pub timeout_seconds: u64,
}

fn default_storefront_api_base() -> String {
    "https://api.gumroad.com/v2".to_string()
}
fn default_storefront_timeout() -> u64 {
    30
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            api_base: default_storefront_api_base(),
            timeout_seconds: default_storefront_timeout(),
        }
    }
}

/// Resolved settings with absolute paths and secrets applied
#[derive(Debug, Clone)]
pub struct Settings {
    /// State directory
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,

    /// Ledger database file, relative paths resolve against `home`
    pub database: Option<PathBuf>,
    /// Artifact directory, relative paths resolve against `home`
    pub artifacts: Option<PathBuf>,

    pub budget: BudgetLimits,
    pub pricing: Pricing,
    pub pipeline: PipelineSettings,
    pub retry: RetrySettings,
    pub sales: FeedbackSettings,
    pub sources: SourcesConfig,
    pub llm: LlmConfig,
    pub storefront: StorefrontConfig,

    pub openai_api_key: Option<String>,
    pub gumroad_access_token: Option<String>,
}

impl Settings {
    /// Load settings from the process environment and the discovered config file
    pub fn load() -> Result<Self> {
        let default_home = dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(CONFIG_DIR);
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        let config_file = match env("AUTOPILOT_CONFIG") {
            Some(path) => Some(PathBuf::from(path)),
            None => find_config_file(),
        };

        let mut settings = match config_file {
            Some(ref path) => Self::from_file(path, default_home)?,
            None => Self::resolve(ConfigFile::default(), None, default_home),
        };
        settings.apply_env(env);
        Ok(settings)
    }

    /// Load one config file, without environment overrides
    pub fn from_file(path: &Path, default_home: PathBuf) -> Result<Self> {
        let config = load_config_file(path)?;
        Ok(Self::resolve(config, Some(path.to_path_buf()), default_home))
    }

    /// Resolve the paths of a parsed config file
    pub fn resolve(config: ConfigFile, config_file: Option<PathBuf>, default_home: PathBuf) -> Self {
        // home is relative to .autopilot/
        let home = match (&config.paths.home, &config_file) {
            (Some(home), Some(file)) => resolve_path(file.parent().unwrap_or(Path::new(".")), home),
            (Some(home), None) => PathBuf::from(home),
            (None, _) => default_home,
        };

        Self {
            home,
            config_file,
            database: config.paths.database.map(PathBuf::from),
            artifacts: config.paths.artifacts.map(PathBuf::from),
            budget: config.budget,
            pricing: config.pricing,
            pipeline: config.pipeline,
            retry: config.retry,
            sales: config.sales,
            sources: config.sources,
            llm: config.llm,
            storefront: config.storefront,
            openai_api_key: None,
            gumroad_access_token: None,
        }
    }

    /// Apply environment overrides through a lookup function
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(home) = env("AUTOPILOT_HOME") {
            self.home = PathBuf::from(home);
        }
        if let Some(value) = env("AUTOPILOT_KILL_SWITCH") {
            self.pipeline.kill_switch = parse_flag(&value);
        }
        if let Some(value) = env("AUTOPILOT_DRY_RUN") {
            self.pipeline.dry_run = parse_flag(&value);
        }
        if let Some(key) = env("OPENAI_API_KEY") {
            self.openai_api_key = Some(key);
        }
        if let Some(token) = env("GUMROAD_ACCESS_TOKEN") {
            self.gumroad_access_token = Some(token);
        }
    }

    /// Get the ledger database path ($AUTOPILOT_HOME/autopilot.db)
    pub fn database_path(&self) -> PathBuf {
        match &self.database {
            Some(path) => self.home.join(path),
            None => self.home.join("autopilot.db"),
        }
    }

    /// Get the artifacts directory ($AUTOPILOT_HOME/artifacts)
    pub fn artifacts_dir(&self) -> PathBuf {
        match &self.artifacts {
            Some(path) => self.home.join(path),
            None => self.home.join("artifacts"),
        }
    }

    /// Check every range and requirement, reporting all failures together
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let mut problems = Vec::new();
        let mut check = |ok: bool, problem: String| {
            if !ok {
                problems.push(problem);
            }
        };

        let budget = &self.budget;
        check(
            (1_000..=1_000_000).contains(&budget.max_tokens_per_run),
            format!("budget.max_tokens_per_run must be 1000..=1000000, got {}", budget.max_tokens_per_run),
        );
        check(
            (0.01..=1_000.0).contains(&budget.max_usd_per_run),
            format!("budget.max_usd_per_run must be 0.01..=1000, got {}", budget.max_usd_per_run),
        );
        check(
            (1.0..=10_000.0).contains(&budget.max_usd_lifetime),
            format!("budget.max_usd_lifetime must be 1..=10000, got {}", budget.max_usd_lifetime),
        );
        check(
            self.pricing.input_per_1k >= 0.0 && self.pricing.output_per_1k >= 0.0,
            "pricing must not be negative".to_string(),
        );

        check(
            self.pipeline.max_regeneration_attempts <= 5,
            format!(
                "pipeline.max_regeneration_attempts must be 0..=5, got {}",
                self.pipeline.max_regeneration_attempts
            ),
        );

        check(
            (0.0..=1.0).contains(&self.sales.refund_rate_max),
            format!("sales.refund_rate_max must be 0..=1, got {}", self.sales.refund_rate_max),
        );
        check(
            self.sales.zero_sales_suppression_count >= 1,
            "sales.zero_sales_suppression_count must be at least 1".to_string(),
        );
        check(
            self.sales.lookback_days >= 1,
            "sales.lookback_days must be at least 1".to_string(),
        );

        for (name, policy) in [
            ("source", &self.retry.source),
            ("generative", &self.retry.generative),
            ("storefront", &self.retry.storefront),
        ] {
            for problem in policy_problems(name, policy) {
                check(false, problem);
            }
        }

        check(
            !self.sources.enabled.is_empty(),
            "sources.enabled must name at least one source".to_string(),
        );
        for name in &self.sources.enabled {
            match SourceKind::parse(name) {
                Some(SourceKind::File) => check(
                    !self.sources.file.paths.is_empty(),
                    "sources.file.paths must list at least one path".to_string(),
                ),
                Some(SourceKind::HackerNews) => check(
                    !self.sources.hackernews.story_types.is_empty(),
                    "sources.hackernews.story_types must not be empty".to_string(),
                ),
                None => check(false, format!("unknown source '{}'", name)),
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError(problems))
        }
    }
}

fn policy_problems(name: &str, policy: &RetryPolicy) -> Vec<String> {
    let mut problems = Vec::new();
    if policy.max_attempts < 1 {
        problems.push(format!("retry.{}.max_attempts must be at least 1", name));
    }
    if policy.min_wait_ms > policy.max_wait_ms {
        problems.push(format!("retry.{}.min_wait_ms must not exceed max_wait_ms", name));
    }
    if policy.multiplier < 1.0 {
        problems.push(format!("retry.{}.multiplier must be at least 1", name));
    }
    problems
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    // An empty file is a valid, all-default config
    if content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }

    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to a base directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn defaults() -> Settings {
        Settings::resolve(ConfigFile::default(), None, PathBuf::from("/test/.autopilot"))
    }

    #[test]
    fn test_defaults() {
        let settings = defaults();
        assert_eq!(settings.database_path(), PathBuf::from("/test/.autopilot/autopilot.db"));
        assert_eq!(settings.artifacts_dir(), PathBuf::from("/test/.autopilot/artifacts"));
        assert_eq!(settings.budget.max_tokens_per_run, 50_000);
        assert_eq!(settings.pipeline.max_regeneration_attempts, 1);
        assert!(settings.pipeline.dry_run);
        assert!(!settings.pipeline.kill_switch);
        assert_eq!(settings.sources.enabled, vec!["hackernews"]);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();

        let config_path = dir.join(CONFIG_FILE);
        std::fs::write(
            &config_path,
            r#"
paths:
  home: ./state
  database: ledger.db
budget:
  max_usd_per_run: 2.5
pipeline:
  max_regeneration_attempts: 2
  dry_run: false
retry:
  generative:
    max_attempts: 6
    min_wait_ms: 500
    max_wait_ms: 10000
    multiplier: 3.0
sources:
  enabled: [file]
  file:
    paths: ["posts/*.json"]
"#,
        )
        .unwrap();

        let settings = Settings::from_file(&config_path, PathBuf::from("/unused")).unwrap();
        assert_eq!(settings.home, dir.join("state"));
        assert_eq!(settings.database_path(), dir.join("state").join("ledger.db"));
        assert_eq!(settings.budget.max_usd_per_run, 2.5);
        // Unspecified fields keep their defaults
        assert_eq!(settings.budget.max_tokens_per_run, 50_000);
        assert_eq!(settings.pipeline.max_regeneration_attempts, 2);
        assert!(!settings.pipeline.dry_run);
        assert_eq!(settings.retry.generative.max_attempts, 6);
        assert_eq!(settings.retry.source.max_attempts, 3);
        assert_eq!(settings.sources.file.paths, vec!["posts/*.json"]);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_retry_policy() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join(CONFIG_FILE);
        std::fs::write(&config_path, "retry:\n  generative:\n    max_attempts: 6\n").unwrap();

        let settings = Settings::from_file(&config_path, PathBuf::from("/unused")).unwrap();
        assert_eq!(settings.retry.generative.max_attempts, 6);
        assert_eq!(settings.retry.generative.min_wait_ms, 1_000);
        assert_eq!(settings.retry.generative.max_wait_ms, 60_000);
        assert_eq!(settings.retry.storefront, RetrySettings::default().storefront);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("AUTOPILOT_HOME", "/srv/autopilot"),
            ("AUTOPILOT_KILL_SWITCH", "true"),
            ("AUTOPILOT_DRY_RUN", "0"),
            ("OPENAI_API_KEY", "sk-test"),
        ]
        .into_iter()
        .collect();

        let mut settings = defaults();
        settings.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(settings.home, PathBuf::from("/srv/autopilot"));
        assert_eq!(settings.database_path(), PathBuf::from("/srv/autopilot/autopilot.db"));
        assert!(settings.pipeline.kill_switch);
        assert!(!settings.pipeline.dry_run);
        assert_eq!(settings.openai_api_key.as_deref(), Some("sk-test"));
        assert!(settings.gumroad_access_token.is_none());
    }

    #[test]
    fn test_validation_reports_every_problem() {
        let mut settings = defaults();
        settings.budget.max_tokens_per_run = 10;
        settings.budget.max_usd_per_run = 0.0;
        settings.pipeline.max_regeneration_attempts = 9;
        settings.sales.refund_rate_max = 1.5;
        settings.retry.source.min_wait_ms = 60_000;
        settings.sources.enabled = vec!["file".to_string(), "reddit".to_string()];

        let err = settings.validate().unwrap_err();
        assert_eq!(err.0.len(), 7);
        let message = err.to_string();
        assert!(message.contains("max_tokens_per_run"));
        assert!(message.contains("retry.source.min_wait_ms"));
        assert!(message.contains("sources.file.paths"));
        assert!(message.contains("unknown source 'reddit'"));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/./subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" yes "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("off"));
    }
}
