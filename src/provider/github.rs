use regex::Regex;

use super::{agent_prompt, capture, TicketProvider};
use crate::error::TicketError;
use crate::platform::{Platform, PlatformPatterns};
use crate::ticket::payload::{bool_at, str_at, string_list_at, timestamp_at, value_at, RawPayload};
use crate::ticket::{GenericTicket, TicketId, TicketStatus, TicketType};

const SHAPE: &str = r#"{
  "number": 123,
  "title": "...",
  "body": "...",
  "html_url": "https://github.com/<owner>/<repo>/issues/123",
  "state": "open",
  "state_reason": null,
  "labels": [{"name": "bug"}],
  "assignee": {"login": "..."},
  "user": {"login": "..."},
  "milestone": {"title": "..."},
  "created_at": "2024-01-01T00:00:00Z",
  "updated_at": "2024-01-01T00:00:00Z"
}"#;

pub struct GithubProvider {
  patterns: PlatformPatterns,
  html_url: Regex,
  prompt: String,
}

impl GithubProvider {
  /// Provider parsing input with `patterns`.
  pub fn new(patterns: PlatformPatterns) -> Result<Self, regex::Error> {
    Ok(Self {
      patterns,
      html_url: Regex::new(r"github\.com/(?P<owner>[\w.-]+)/(?P<repo>[\w.-]+)/(?:issues|pull)/\d+")?,
      prompt: agent_prompt(SHAPE),
    })
  }

  /// `owner/repo` from `html_url`, or from the API `repository_url`.
  fn repository(&self, payload: &RawPayload) -> Option<String> {
    if let Some(url) = str_at(payload, "html_url") {
      if let Some(caps) = self.html_url.captures(&url) {
        return Some(format!("{}/{}", &caps["owner"], &caps["repo"]));
      }
    }
    let api = str_at(payload, "repository_url")?;
    let (_, repo) = api.split_once("/repos/")?;
    Some(repo.trim_end_matches('/').to_string())
  }
}

impl TicketProvider for GithubProvider {
  fn platform(&self) -> Platform {
    Platform::Github
  }

  fn parse_input(&self, input: &str) -> Result<TicketId, TicketError> {
    let fields = capture(
      &self.patterns,
      input,
      "an owner/repo#number reference or issue/pull request URL",
    )?;
    TicketId::new(reference(fields.get("owner")?, fields.get("repo")?, fields.get("number")?))
      .map_err(|e| TicketError::parse(Platform::Github, input, e.to_string()))
  }

  fn normalize(&self, payload: &RawPayload) -> Result<GenericTicket, TicketError> {
    let number = str_at(payload, "number")
      .ok_or_else(|| TicketError::normalize(Platform::Github, "payload has no 'number' identifier"))?;
    let repository = self.repository(payload).ok_or_else(|| {
      TicketError::normalize(Platform::Github, "payload does not name its repository")
    })?;
    let id = TicketId::new(format!("{}#{}", repository.to_lowercase(), number))
      .map_err(|e| TicketError::normalize(Platform::Github, e.to_string()))?;

    let labels = string_list_at(payload, "labels", "name");
    let is_pull = value_at(payload, "pull_request").is_some();

    Ok(
      GenericTicket::builder(Platform::Github, id)
        .url(str_at(payload, "html_url").unwrap_or_default())
        .title(str_at(payload, "title").unwrap_or_default())
        .description(str_at(payload, "body").unwrap_or_default())
        .status(status_of(payload, &labels))
        .ticket_type(TicketType::from_labels(&labels))
        .assignee(str_at(payload, "assignee.login"))
        .labels(labels)
        .created_at(timestamp_at(payload, "created_at"))
        .updated_at(timestamp_at(payload, "updated_at"))
        .metadata("author", value_at(payload, "user.login").cloned().unwrap_or_default())
        .metadata("milestone", value_at(payload, "milestone.title").cloned().unwrap_or_default())
        .metadata("pull_request", serde_json::Value::Bool(is_pull))
        .build(),
    )
  }

  fn prompt_template(&self) -> &str {
    &self.prompt
  }

  fn required_fields(&self) -> &'static [&'static str] {
    &["number", "title", "html_url"]
  }
}

/// GitHub owner and repository names are case-insensitive.
fn reference(owner: &str, repo: &str, number: &str) -> String {
  format!("{}/{}#{}", owner, repo, number).to_lowercase()
}

/// Open issues are refined by workflow labels (`blocked`, `in progress`).
fn status_of(payload: &RawPayload, labels: &[String]) -> TicketStatus {
  let from_labels = labels
    .iter()
    .map(|l| TicketStatus::from_keyword(l))
    .find(|s| matches!(s, TicketStatus::Blocked | TicketStatus::InProgress | TicketStatus::Review));
  match str_at(payload, "state").map(|s| s.to_lowercase()).as_deref() {
    Some("open") => match from_labels {
      Some(status) => status,
      None if bool_at(payload, "draft") == Some(true) => TicketStatus::InProgress,
      None => TicketStatus::Open,
    },
    Some("closed") | Some("merged") => {
      let merged = value_at(payload, "pull_request.merged_at").is_some();
      match str_at(payload, "state_reason").as_deref() {
        _ if merged => TicketStatus::Done,
        Some("not_planned") | Some("duplicate") => TicketStatus::Closed,
        _ => TicketStatus::Done,
      }
    }
    Some(other) => TicketStatus::from_keyword(other),
    None => TicketStatus::Unknown,
  }
}
