use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::platform::Platform;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Platform picked for ambiguous identifiers without prompting
  #[serde(deserialize_with = "deserialize_platform")]
  pub default_platform: Option<Platform>,
  pub cache: CacheConfig,
  pub fetch: FetchConfig,
  pub agent: AgentConfig,
  /// Direct Jira access; without it Jira tickets go through the agent
  pub jira: Option<JiraConfig>,
  pub github: GithubConfig,
  pub linear: LinearConfig,
}

/// Accepts any spelling `Platform::from_str` does (`linear`, `gh`, `AZURE_DEVOPS`).
fn deserialize_platform<'de, D>(deserializer: D) -> Result<Option<Platform>, D::Error>
where
  D: Deserializer<'de>,
{
  let v: Option<String> = Option::deserialize(deserializer)?;
  v.map(|s| s.parse().map_err(serde::de::Error::custom)).transpose()
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
  Memory,
  #[default]
  Sqlite,
  None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub backend: CacheBackend,
  pub ttl_secs: u64,
  /// Maximum live entries; `null` or `0` means unbounded
  pub max_entries: Option<usize>,
  /// SQLite database location (defaults to the data directory)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      backend: CacheBackend::default(),
      ttl_secs: 3600,
      max_entries: Some(512),
      path: None,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_secs(self.ttl_secs)
  }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FetcherKind {
  Direct,
  Agent,
  None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
  pub timeout_secs: u64,
  pub primary: FetcherKind,
  pub fallback: FetcherKind,
}

impl Default for FetchConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 60,
      primary: FetcherKind::Direct,
      fallback: FetcherKind::Agent,
    }
  }
}

impl FetchConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
  pub command: String,
  pub args: Vec<String>,
}

impl Default for AgentConfig {
  fn default() -> Self {
    Self {
      command: "claude".to_string(),
      args: vec!["-p".to_string()],
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
  /// Auto-detect based on URL: .atlassian.net = cloud, else on-premise
  #[default]
  Auto,
  /// Jira Cloud - uses Basic auth (email + API token as password)
  Cloud,
  /// Jira On-premise - uses Bearer auth (PAT)
  Onpremise,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraConfig {
  pub url: String,
  pub email: String,
  /// Authentication type: auto, cloud, or onpremise
  #[serde(default)]
  pub auth_type: AuthType,
}

impl JiraConfig {
  pub fn is_cloud(&self) -> bool {
    match self.auth_type {
      AuthType::Cloud => true,
      AuthType::Onpremise => false,
      AuthType::Auto => self.url.contains(".atlassian.net"),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
  pub api_url: String,
}

impl Default for GithubConfig {
  fn default() -> Self {
    Self {
      api_url: "https://api.github.com".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinearConfig {
  pub api_url: String,
}

impl Default for LinearConfig {
  fn default() -> Self {
    Self {
      api_url: "https://api.linear.app/graphql".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tix.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tix/config.yaml
  ///
  /// Without any file every setting takes its default.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.apply_overrides(|name| std::env::var(name).ok())?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tix.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tix").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Apply `TIX_*` overrides. `lookup` resolves a variable name to its value.
  fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(v) = lookup("TIX_DEFAULT_PLATFORM") {
      self.default_platform = Some(v.parse().map_err(|e| eyre!("TIX_DEFAULT_PLATFORM: {}", e))?);
    }
    if let Some(v) = lookup("TIX_CACHE_TTL") {
      self.cache.ttl_secs = parse_number("TIX_CACHE_TTL", &v)?;
    }
    if let Some(v) = lookup("TIX_CACHE_MAX_SIZE") {
      self.cache.max_entries = Some(parse_number("TIX_CACHE_MAX_SIZE", &v)?);
    }
    if let Some(v) = lookup("TIX_CACHE_BACKEND") {
      self.cache.backend = match v.trim().to_lowercase().as_str() {
        "memory" => CacheBackend::Memory,
        "sqlite" => CacheBackend::Sqlite,
        "none" => CacheBackend::None,
        other => return Err(eyre!("TIX_CACHE_BACKEND: unknown backend '{}'", other)),
      };
    }
    if let Some(v) = lookup("TIX_FETCH_TIMEOUT") {
      self.fetch.timeout_secs = parse_number("TIX_FETCH_TIMEOUT", &v)?;
    }
    Ok(())
  }

  /// Get the Jira API token from environment variables.
  ///
  /// Checks TIX_JIRA_TOKEN first, then JIRA_API_TOKEN as fallback.
  pub fn jira_token() -> Option<String> {
    first_env(&["TIX_JIRA_TOKEN", "JIRA_API_TOKEN"])
  }

  /// Checks TIX_GITHUB_TOKEN, then GITHUB_TOKEN.
  pub fn github_token() -> Option<String> {
    first_env(&["TIX_GITHUB_TOKEN", "GITHUB_TOKEN"])
  }

  /// Checks TIX_LINEAR_TOKEN, then LINEAR_API_KEY.
  pub fn linear_token() -> Option<String> {
    first_env(&["TIX_LINEAR_TOKEN", "LINEAR_API_KEY"])
  }
}

fn first_env(names: &[&str]) -> Option<String> {
  names
    .iter()
    .filter_map(|name| std::env::var(name).ok())
    .find(|v| !v.trim().is_empty())
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
  value
    .trim()
    .parse()
    .map_err(|_| eyre!("{}: expected a non-negative integer, got '{}'", name, value))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use std::io::Write;

  fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
  }

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.cache.backend, CacheBackend::Sqlite);
    assert_eq!(config.cache.ttl(), Duration::from_secs(3600));
    assert_eq!(config.cache.max_entries, Some(512));
    assert_eq!(config.fetch.timeout(), Duration::from_secs(60));
    assert_eq!(config.fetch.primary, FetcherKind::Direct);
    assert_eq!(config.fetch.fallback, FetcherKind::Agent);
    assert_eq!(config.agent.command, "claude");
    assert!(config.jira.is_none());
  }

  #[test]
  fn test_load_partial_file() {
    let file = write_config(
      r#"
default_platform: linear
cache:
  backend: memory
  ttl_secs: 60
fetch:
  primary: none
jira:
  url: https://acme.atlassian.net
  email: dev@acme.test
"#,
    );
    let config = Config::load_from_path(file.path()).unwrap();
    assert_eq!(config.default_platform, Some(Platform::Linear));
    assert_eq!(config.cache.backend, CacheBackend::Memory);
    assert_eq!(config.cache.ttl_secs, 60);
    assert_eq!(config.cache.max_entries, Some(512));
    assert_eq!(config.fetch.primary, FetcherKind::None);
    assert_eq!(config.fetch.fallback, FetcherKind::Agent);
    assert!(config.jira.unwrap().is_cloud());
    assert_eq!(config.github.api_url, "https://api.github.com");
  }

  #[test]
  fn test_invalid_file_is_an_error() {
    let file = write_config("cache:\n  backend: floppy\n");
    let err = Config::load_from_path(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
  }

  #[test]
  fn test_explicit_missing_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/definitely/not/here/tix.yaml"))).is_err());
  }

  #[test]
  fn test_env_overrides_file() {
    let file = write_config("cache:\n  ttl_secs: 60\n");
    let mut config = Config::load_from_path(file.path()).unwrap();
    let env: HashMap<&str, &str> = [
      ("TIX_CACHE_TTL", "120"),
      ("TIX_CACHE_MAX_SIZE", "10"),
      ("TIX_CACHE_BACKEND", "none"),
      ("TIX_FETCH_TIMEOUT", "5"),
      ("TIX_DEFAULT_PLATFORM", "gh"),
    ]
    .into_iter()
    .collect();
    config
      .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
      .unwrap();

    assert_eq!(config.cache.ttl_secs, 120);
    assert_eq!(config.cache.max_entries, Some(10));
    assert_eq!(config.cache.backend, CacheBackend::None);
    assert_eq!(config.fetch.timeout_secs, 5);
    assert_eq!(config.default_platform, Some(Platform::Github));
  }

  #[test]
  fn test_bad_env_value_is_an_error() {
    let mut config = Config::default();
    let err = config
      .apply_overrides(|name| (name == "TIX_CACHE_TTL").then(|| "soon".to_string()))
      .unwrap_err();
    assert!(err.to_string().contains("TIX_CACHE_TTL"));
  }

  #[test]
  fn test_jira_auth_detection() {
    let mut jira = JiraConfig {
      url: "https://jira.internal.example".into(),
      email: "dev@example.test".into(),
      auth_type: AuthType::Auto,
    };
    assert!(!jira.is_cloud());
    jira.auth_type = AuthType::Cloud;
    assert!(jira.is_cloud());
  }
}
