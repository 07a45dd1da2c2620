//! The platform-agnostic ticket record every provider normalizes into.

pub mod payload;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::Platform;

/// Maximum length of the derived branch summary.
const BRANCH_SUMMARY_MAX: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("ticket id must not be empty")]
pub struct EmptyTicketId;

/// Normalized, non-empty ticket identifier (e.g. `PROJ-123`, `owner/repo#42`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TicketId(String);

impl TicketId {
  pub fn new(id: impl Into<String>) -> Result<Self, EmptyTicketId> {
    let id = id.into().trim().to_string();
    if id.is_empty() {
      return Err(EmptyTicketId);
    }
    Ok(Self(id))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl TryFrom<String> for TicketId {
  type Error = EmptyTicketId;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::new(value)
  }
}

impl From<TicketId> for String {
  fn from(id: TicketId) -> Self {
    id.0
  }
}

impl fmt::Display for TicketId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
  Open,
  InProgress,
  Review,
  Done,
  Closed,
  Blocked,
  #[default]
  Unknown,
}

impl TicketStatus {
  /// Best-effort mapping of a free-form status name shared by every provider.
  pub fn from_keyword(name: &str) -> Self {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
      return Self::Unknown;
    }
    if name.contains("block") || name.contains("stuck") || name.contains("on hold") {
      Self::Blocked
    } else if name.contains("review") || name.contains("qa") || name.contains("testing") {
      Self::Review
    } else if name.contains("progress")
      || name.contains("doing")
      || name.contains("working")
      || name.contains("started")
      || name == "active"
    {
      Self::InProgress
    } else if name.contains("done")
      || name.contains("complete")
      || name.contains("resolved")
      || name.contains("merged")
    {
      Self::Done
    } else if name.contains("closed")
      || name.contains("cancel")
      || name.contains("won't")
      || name.contains("removed")
      || name.contains("archived")
    {
      Self::Closed
    } else if name.contains("open")
      || name.contains("to do")
      || name.contains("todo")
      || name.contains("backlog")
      || name.contains("new")
      || name.contains("triage")
    {
      Self::Open
    } else {
      Self::Unknown
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketType {
  Feature,
  Bug,
  Task,
  Maintenance,
  #[default]
  Unknown,
}

impl TicketType {
  /// Map an issue-type name or label to a ticket type.
  pub fn from_keyword(name: &str) -> Self {
    let name = name.trim().to_lowercase();
    match name.as_str() {
      "bug" | "defect" | "incident" | "hotfix" | "regression" => Self::Bug,
      "feature" | "story" | "user story" | "enhancement" | "epic" | "improvement" => Self::Feature,
      "task" | "sub-task" | "subtask" | "chore item" => Self::Task,
      "maintenance" | "chore" | "tech debt" | "refactor" | "dependencies" => Self::Maintenance,
      _ if name.contains("bug") || name.starts_with("fix") => Self::Bug,
      _ if name.contains("feature") => Self::Feature,
      _ if name.contains("debt") || name.contains("maintenance") => Self::Maintenance,
      _ => Self::Unknown,
    }
  }

  /// First label that maps to a known type wins.
  pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
    labels
      .iter()
      .map(|l| Self::from_keyword(l.as_ref()))
      .find(|t| *t != Self::Unknown)
      .unwrap_or(Self::Unknown)
  }

  fn branch_prefix(&self) -> &'static str {
    match self {
      Self::Feature => "feature",
      Self::Bug => "fix",
      Self::Maintenance => "chore",
      Self::Task | Self::Unknown => "task",
    }
  }
}

/// Normalized ticket. Immutable once built; use the `with_*` methods to derive
/// a modified copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericTicket {
  id: TicketId,
  platform: Platform,
  url: String,
  title: String,
  description: String,
  status: TicketStatus,
  #[serde(rename = "type")]
  ticket_type: TicketType,
  assignee: Option<String>,
  labels: Vec<String>,
  created_at: Option<DateTime<Utc>>,
  updated_at: Option<DateTime<Utc>>,
  branch_summary: String,
  #[serde(default)]
  metadata: BTreeMap<String, serde_json::Value>,
}

impl GenericTicket {
  pub fn builder(platform: Platform, id: TicketId) -> TicketBuilder {
    TicketBuilder {
      ticket: GenericTicket {
        id,
        platform,
        url: String::new(),
        title: String::new(),
        description: String::new(),
        status: TicketStatus::Unknown,
        ticket_type: TicketType::Unknown,
        assignee: None,
        labels: Vec::new(),
        created_at: None,
        updated_at: None,
        branch_summary: String::new(),
        metadata: BTreeMap::new(),
      },
    }
  }

  pub fn id(&self) -> &TicketId {
    &self.id
  }

  pub fn platform(&self) -> Platform {
    self.platform
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn title(&self) -> &str {
    &self.title
  }

  pub fn description(&self) -> &str {
    &self.description
  }

  pub fn status(&self) -> TicketStatus {
    self.status
  }

  pub fn ticket_type(&self) -> TicketType {
    self.ticket_type
  }

  pub fn assignee(&self) -> Option<&str> {
    self.assignee.as_deref()
  }

  pub fn labels(&self) -> &[String] {
    &self.labels
  }

  pub fn created_at(&self) -> Option<DateTime<Utc>> {
    self.created_at
  }

  pub fn updated_at(&self) -> Option<DateTime<Utc>> {
    self.updated_at
  }

  pub fn branch_summary(&self) -> &str {
    &self.branch_summary
  }

  pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
    &self.metadata
  }

  /// Suggested git branch, e.g. `fix/eng-42-fix-crash`.
  pub fn branch_name(&self) -> String {
    format!(
      "{}/{}-{}",
      self.ticket_type.branch_prefix(),
      slugify(self.id.as_str(), BRANCH_SUMMARY_MAX),
      self.branch_summary
    )
  }

  /// Copy filed under `id`. Used when a payload names the ticket differently
  /// from the id it was requested by.
  pub fn with_id(&self, id: TicketId) -> Self {
    Self {
      id,
      ..self.clone()
    }
  }

  #[cfg(test)]
  pub fn with_title(&self, title: impl Into<String>) -> Self {
    let title = title.into();
    Self {
      branch_summary: branch_summary(&title),
      title,
      ..self.clone()
    }
  }
}

/// Builder used by providers; computes the derived fields on `build`.
#[derive(Debug)]
pub struct TicketBuilder {
  ticket: GenericTicket,
}

impl TicketBuilder {
  pub fn url(mut self, url: impl Into<String>) -> Self {
    self.ticket.url = url.into();
    self
  }

  pub fn title(mut self, title: impl Into<String>) -> Self {
    self.ticket.title = title.into();
    self
  }

  pub fn description(mut self, description: impl Into<String>) -> Self {
    self.ticket.description = description.into();
    self
  }

  pub fn status(mut self, status: TicketStatus) -> Self {
    self.ticket.status = status;
    self
  }

  pub fn ticket_type(mut self, ticket_type: TicketType) -> Self {
    self.ticket.ticket_type = ticket_type;
    self
  }

  pub fn assignee(mut self, assignee: Option<String>) -> Self {
    self.ticket.assignee = assignee.filter(|a| !a.trim().is_empty());
    self
  }

  pub fn labels(mut self, labels: Vec<String>) -> Self {
    self.ticket.labels = labels;
    self
  }

  pub fn created_at(mut self, at: Option<DateTime<Utc>>) -> Self {
    self.ticket.created_at = at;
    self
  }

  pub fn updated_at(mut self, at: Option<DateTime<Utc>>) -> Self {
    self.ticket.updated_at = at;
    self
  }

  pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
    if !value.is_null() {
      self.ticket.metadata.insert(key.into(), value);
    }
    self
  }

  pub fn build(mut self) -> GenericTicket {
    self.ticket.branch_summary = branch_summary(&self.ticket.title);
    self.ticket
  }
}

fn branch_summary(title: &str) -> String {
  let slug = slugify(title, BRANCH_SUMMARY_MAX);
  if slug.is_empty() {
    "untitled".to_string()
  } else {
    slug
  }
}

/// Lowercase ASCII alphanumerics joined by single dashes, cut at `max` chars on
/// a dash boundary when one exists.
fn slugify(text: &str, max: usize) -> String {
  let mut slug = String::with_capacity(text.len());
  for c in text.chars() {
    if c.is_ascii_alphanumeric() {
      slug.push(c.to_ascii_lowercase());
    } else if !slug.is_empty() && !slug.ends_with('-') {
      slug.push('-');
    }
  }
  let slug = slug.trim_end_matches('-');
  if slug.len() <= max {
    return slug.to_string();
  }
  let cut = &slug[..max];
  match cut.rfind('-') {
    Some(idx) if idx > 0 => cut[..idx].to_string(),
    _ => cut.trim_end_matches('-').to_string(),
  }
}
