//! Supported ticket platforms and input detection.

mod catalog;
mod detector;

pub use catalog::{PlatformCatalog, PlatformPatterns};
pub use detector::{Detection, PlatformDetector};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the ticket systems tix knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
  Jira,
  Linear,
  Github,
  AzureDevops,
  Monday,
  Trello,
}

impl Platform {
  /// Every platform, in catalog registration order.
  pub const ALL: [Platform; 6] = [
    Platform::Jira,
    Platform::Linear,
    Platform::Github,
    Platform::AzureDevops,
    Platform::Monday,
    Platform::Trello,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Platform::Jira => "JIRA",
      Platform::Linear => "LINEAR",
      Platform::Github => "GITHUB",
      Platform::AzureDevops => "AZURE_DEVOPS",
      Platform::Monday => "MONDAY",
      Platform::Trello => "TRELLO",
    }
  }

  /// Human-friendly name for prompts.
  pub fn display_name(&self) -> &'static str {
    match self {
      Platform::Jira => "Jira",
      Platform::Linear => "Linear",
      Platform::Github => "GitHub",
      Platform::AzureDevops => "Azure DevOps",
      Platform::Monday => "Monday",
      Platform::Trello => "Trello",
    }
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

impl FromStr for Platform {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
    match normalized.as_str() {
      "jira" => Ok(Platform::Jira),
      "linear" => Ok(Platform::Linear),
      "github" | "gh" => Ok(Platform::Github),
      "azure_devops" | "azuredevops" | "azure" | "ado" => Ok(Platform::AzureDevops),
      "monday" => Ok(Platform::Monday),
      "trello" => Ok(Platform::Trello),
      _ => Err(format!(
        "unknown platform '{}' (expected one of: {})",
        s,
        Platform::ALL
          .iter()
          .map(|p| p.as_str().to_lowercase())
          .collect::<Vec<_>>()
          .join(", ")
      )),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_aliases() {
    assert_eq!("gh".parse::<Platform>().unwrap(), Platform::Github);
    assert_eq!("Azure-DevOps".parse::<Platform>().unwrap(), Platform::AzureDevops);
    assert_eq!("TRELLO".parse::<Platform>().unwrap(), Platform::Trello);
    assert!("bugzilla".parse::<Platform>().is_err());
  }

  #[test]
  fn test_display_round_trips_through_serde_name() {
    let json = serde_json::to_string(&Platform::AzureDevops).unwrap();
    assert_eq!(json, "\"AZURE_DEVOPS\"");
    assert_eq!(Platform::AzureDevops.to_string(), "AZURE_DEVOPS");
  }
}
