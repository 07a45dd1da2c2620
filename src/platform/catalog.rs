//! Static registry of URL and identifier patterns per platform.

use std::collections::BTreeMap;

use regex::Regex;

use super::Platform;

// Trailing `(?:[/?#].*)?` lets URLs carry slugs, query strings and fragments.
const JIRA_URLS: &[&str] = &[
  r"(?i)^https?://(?P<host>[^/\s]+)/browse/(?P<key>[A-Z][A-Z0-9_]+-\d+)(?:[/?#].*)?$",
  r"(?i)^https?://(?P<host>[^/\s]+)/\S*[?&]selectedIssue=(?P<key>[A-Z][A-Z0-9_]+-\d+)(?:&.*)?$",
];
const JIRA_IDS: &[&str] = &[r"^(?P<key>[A-Za-z][A-Za-z0-9_]+-\d+)$"];

const LINEAR_URLS: &[&str] = &[
  r"(?i)^https?://linear\.app/(?P<workspace>[\w-]+)/issue/(?P<key>[A-Z][A-Z0-9]*-\d+)(?:[/?#].*)?$",
];
const LINEAR_IDS: &[&str] = &[r"^(?P<key>[A-Za-z][A-Za-z0-9]*-\d+)$"];

const GITHUB_URLS: &[&str] = &[
  r"(?i)^https?://(?:www\.)?github\.com/(?P<owner>[\w.-]+)/(?P<repo>[\w.-]+)/(?P<kind>issues|pull)/(?P<number>\d+)(?:[/?#].*)?$",
];
const GITHUB_IDS: &[&str] = &[r"^(?P<owner>[\w.-]+)/(?P<repo>[\w.-]+)#(?P<number>\d+)$"];

const AZURE_DEVOPS_URLS: &[&str] = &[
  r"(?i)^https?://dev\.azure\.com/(?P<org>[^/\s]+)/(?P<project>[^/\s]+)/_workitems/edit/(?P<number>\d+)(?:[/?#].*)?$",
  r"(?i)^https?://(?P<org>[\w-]+)\.visualstudio\.com/(?P<project>[^/\s]+)/_workitems/edit/(?P<number>\d+)(?:[/?#].*)?$",
];
const AZURE_DEVOPS_IDS: &[&str] = &[r"(?i)^AB#(?P<number>\d+)$"];

const MONDAY_URLS: &[&str] = &[
  r"(?i)^https?://(?P<account>[\w-]+)\.monday\.com/boards/(?P<board>\d+)(?:/views/\d+)?/pulses/(?P<item>\d+)(?:[/?#].*)?$",
];

const TRELLO_URLS: &[&str] =
  &[r"(?i)^https?://(?:www\.)?trello\.com/c/(?P<short_link>[A-Za-z0-9]{8})(?:[/?#].*)?$"];

/// Built-in pattern sources for a platform: (url patterns, id patterns).
pub fn builtin_sources(platform: Platform) -> (&'static [&'static str], &'static [&'static str]) {
  match platform {
    Platform::Jira => (JIRA_URLS, JIRA_IDS),
    Platform::Linear => (LINEAR_URLS, LINEAR_IDS),
    Platform::Github => (GITHUB_URLS, GITHUB_IDS),
    Platform::AzureDevops => (AZURE_DEVOPS_URLS, AZURE_DEVOPS_IDS),
    Platform::Monday => (MONDAY_URLS, &[]),
    Platform::Trello => (TRELLO_URLS, &[]),
  }
}

/// Compiled recognition patterns for a single platform.
#[derive(Debug, Clone)]
pub struct PlatformPatterns {
  platform: Platform,
  url_patterns: Vec<Regex>,
  id_patterns: Vec<Regex>,
}

impl PlatformPatterns {
  pub fn new(platform: Platform, urls: &[&str], ids: &[&str]) -> Result<Self, regex::Error> {
    Ok(Self {
      platform,
      url_patterns: urls.iter().map(|p| Regex::new(p)).collect::<Result<_, _>>()?,
      id_patterns: ids.iter().map(|p| Regex::new(p)).collect::<Result<_, _>>()?,
    })
  }

  /// Patterns shipped with tix for `platform`.
  pub fn builtin(platform: Platform) -> Result<Self, regex::Error> {
    let (urls, ids) = builtin_sources(platform);
    Self::new(platform, urls, ids)
  }

  pub fn platform(&self) -> Platform {
    self.platform
  }

  /// Named captures of the first URL pattern matching `input`.
  pub fn match_url(&self, input: &str) -> Option<BTreeMap<String, String>> {
    first_capture(&self.url_patterns, input)
  }

  /// Named captures of the first bare-identifier pattern matching `input`.
  pub fn match_id(&self, input: &str) -> Option<BTreeMap<String, String>> {
    first_capture(&self.id_patterns, input)
  }

  /// URL patterns first, then identifier patterns.
  pub fn capture(&self, input: &str) -> Option<BTreeMap<String, String>> {
    let input = input.trim();
    self.match_url(input).or_else(|| self.match_id(input))
  }
}

fn first_capture(patterns: &[Regex], input: &str) -> Option<BTreeMap<String, String>> {
  patterns.iter().find_map(|re| {
    let caps = re.captures(input)?;
    Some(
      re.capture_names()
        .flatten()
        .filter_map(|name| {
          caps
            .name(name)
            .map(|m| (name.to_string(), m.as_str().to_string()))
        })
        .collect(),
    )
  })
}

/// Ordered registry of platform patterns. Order is registration order and is
/// the order detection results are reported in.
#[derive(Debug, Clone, Default)]
pub struct PlatformCatalog {
  entries: Vec<PlatformPatterns>,
}

impl PlatformCatalog {
  /// An empty catalog.
  pub fn new() -> Self {
    Self::default()
  }

  /// Catalog with every built-in platform registered.
  pub fn builtin() -> Result<Self, regex::Error> {
    let mut catalog = Self::new();
    for platform in Platform::ALL {
      let (urls, ids) = builtin_sources(platform);
      catalog.register(platform, urls, ids)?;
    }
    Ok(catalog)
  }

  /// Register (or replace, keeping its position) the patterns for `platform`.
  pub fn register(
    &mut self,
    platform: Platform,
    urls: &[&str],
    ids: &[&str],
  ) -> Result<(), regex::Error> {
    let patterns = PlatformPatterns::new(platform, urls, ids)?;
    match self.entries.iter_mut().find(|e| e.platform == platform) {
      Some(existing) => *existing = patterns,
      None => self.entries.push(patterns),
    }
    Ok(())
  }

  pub fn patterns(&self, platform: Platform) -> Option<&PlatformPatterns> {
    self.entries.iter().find(|e| e.platform == platform)
  }

  pub fn iter(&self) -> impl Iterator<Item = &PlatformPatterns> {
    self.entries.iter()
  }

  pub fn platforms(&self) -> Vec<Platform> {
    self.entries.iter().map(|e| e.platform).collect()
  }
}
