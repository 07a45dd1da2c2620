use serde_json::Value;

use super::{agent_prompt, capture, require_id, TicketProvider};
use crate::error::TicketError;
use crate::platform::{Platform, PlatformPatterns};
use crate::ticket::payload::{rich_text, str_at, string_list_at, timestamp_at, value_at, RawPayload};
use crate::ticket::{GenericTicket, TicketId, TicketStatus, TicketType};

const SHAPE: &str = r#"{
  "key": "PROJ-123",
  "url": "https://example.atlassian.net/browse/PROJ-123",
  "fields": {
    "summary": "...",
    "description": "...",
    "status": {"name": "In Progress", "statusCategory": {"key": "indeterminate"}},
    "issuetype": {"name": "Bug"},
    "assignee": {"displayName": "..."},
    "priority": {"name": "High"},
    "labels": ["..."],
    "created": "2024-01-01T00:00:00.000+0000",
    "updated": "2024-01-01T00:00:00.000+0000"
  }
}"#;

pub struct JiraProvider {
  patterns: PlatformPatterns,
  prompt: String,
}

impl JiraProvider {
  /// Provider parsing input with `patterns`.
  pub fn new(patterns: PlatformPatterns) -> Result<Self, regex::Error> {
    Ok(Self {
      patterns,
      prompt: agent_prompt(SHAPE),
    })
  }
}

impl TicketProvider for JiraProvider {
  fn platform(&self) -> Platform {
    Platform::Jira
  }

  fn parse_input(&self, input: &str) -> Result<TicketId, TicketError> {
    let fields = capture(&self.patterns, input, "a Jira issue key (PROJ-123) or browse URL")?;
    TicketId::new(fields.get("key")?.to_uppercase())
      .map_err(|e| TicketError::parse(Platform::Jira, input, e.to_string()))
  }

  fn normalize(&self, payload: &RawPayload) -> Result<GenericTicket, TicketError> {
    let id = require_id(Platform::Jira, payload, "key", str::to_uppercase)?;

    let status = status_of(
      str_at(payload, "fields.status.statusCategory.key").as_deref(),
      str_at(payload, "fields.status.name").as_deref(),
    );
    let labels = string_list_at(payload, "fields.labels", "name");
    let ticket_type = str_at(payload, "fields.issuetype.name")
      .map(|name| TicketType::from_keyword(&name))
      .filter(|t| *t != TicketType::Unknown)
      .unwrap_or_else(|| TicketType::from_labels(&labels));

    let url = str_at(payload, "url")
      .or_else(|| browse_url_from_self(payload, id.as_str()))
      .unwrap_or_default();

    Ok(
      GenericTicket::builder(Platform::Jira, id)
        .url(url)
        .title(str_at(payload, "fields.summary").unwrap_or_default())
        .description(rich_text(value_at(payload, "fields.description")).unwrap_or_default())
        .status(status)
        .ticket_type(ticket_type)
        .assignee(str_at(payload, "fields.assignee.displayName"))
        .labels(labels)
        .created_at(timestamp_at(payload, "fields.created"))
        .updated_at(timestamp_at(payload, "fields.updated"))
        .metadata("status_name", value_at(payload, "fields.status.name").cloned().unwrap_or(Value::Null))
        .metadata("priority", value_at(payload, "fields.priority.name").cloned().unwrap_or(Value::Null))
        .metadata("reporter", value_at(payload, "fields.reporter.displayName").cloned().unwrap_or(Value::Null))
        .build(),
    )
  }

  fn prompt_template(&self) -> &str {
    &self.prompt
  }

  fn required_fields(&self) -> &'static [&'static str] {
    &["key"]
  }
}

/// Status category is authoritative for done/new; the status name refines
/// in-flight states (review, blocked).
fn status_of(category: Option<&str>, name: Option<&str>) -> TicketStatus {
  let from_name = name.map(TicketStatus::from_keyword).unwrap_or_default();
  match category {
    Some("done") if from_name == TicketStatus::Closed => TicketStatus::Closed,
    Some("done") => TicketStatus::Done,
    Some("new") if from_name == TicketStatus::Blocked => TicketStatus::Blocked,
    Some("new") => TicketStatus::Open,
    Some("indeterminate") => match from_name {
      TicketStatus::Review | TicketStatus::Blocked => from_name,
      _ => TicketStatus::InProgress,
    },
    _ => from_name,
  }
}

/// REST `self` links look like `https://host/rest/api/2/issue/10001`.
fn browse_url_from_self(payload: &RawPayload, key: &str) -> Option<String> {
  let self_link = str_at(payload, "self")?;
  let base = self_link.split("/rest/").next()?;
  Some(format!("{}/browse/{}", base, key))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::payload;
  use serde_json::json;

  fn provider() -> JiraProvider {
    JiraProvider::new(PlatformPatterns::builtin(Platform::Jira).unwrap()).unwrap()
  }

  #[test]
  fn test_parse_input() {
    let p = provider();
    assert_eq!(p.parse_input("proj-12").unwrap().as_str(), "PROJ-12");
    assert_eq!(
      p.parse_input("https://acme.atlassian.net/browse/ABC-9").unwrap().as_str(),
      "ABC-9"
    );
    assert_eq!(
      p.parse_input("https://acme.atlassian.net/jira/software/projects/ABC/boards/1?selectedIssue=ABC-10")
        .unwrap()
        .as_str(),
      "ABC-10"
    );
    assert!(matches!(
      p.parse_input("acme/widgets#1"),
      Err(TicketError::Parse { platform: Platform::Jira, .. })
    ));
  }

  #[test]
  fn test_normalize_full_payload() {
    let p = provider();
    let ticket = p
      .normalize(&payload(json!({
        "key": "abc-9",
        "self": "https://acme.atlassian.net/rest/api/2/issue/10001",
        "fields": {
          "summary": "Login button broken",
          "description": {"type": "doc", "content": [
            {"type": "paragraph", "content": [{"type": "text", "text": "Steps"}]}
          ]},
          "status": {"name": "In Review", "statusCategory": {"key": "indeterminate"}},
          "issuetype": {"name": "Bug"},
          "assignee": {"displayName": "Sam"},
          "labels": ["frontend"],
          "priority": {"name": "High"},
          "created": "2024-03-01T10:00:00.000+0000"
        }
      })))
      .unwrap();

    assert_eq!(ticket.id().as_str(), "ABC-9");
    assert_eq!(ticket.url(), "https://acme.atlassian.net/browse/ABC-9");
    assert_eq!(ticket.description(), "Steps");
    assert_eq!(ticket.status(), TicketStatus::Review);
    assert_eq!(ticket.ticket_type(), TicketType::Bug);
    assert_eq!(ticket.assignee(), Some("Sam"));
    assert_eq!(ticket.metadata()["priority"], "High");
    assert!(ticket.created_at().is_some());
  }

  #[test]
  fn test_normalize_tolerates_missing_optional_fields() {
    let p = provider();
    let ticket = p.normalize(&payload(json!({"key": "ABC-1", "fields": "garbage"}))).unwrap();
    assert_eq!(ticket.title(), "");
    assert_eq!(ticket.status(), TicketStatus::Unknown);
    assert!(ticket.labels().is_empty());
  }

  #[test]
  fn test_normalize_requires_key() {
    let p = provider();
    let err = p.normalize(&payload(json!({"fields": {"summary": "x"}}))).unwrap_err();
    assert!(matches!(err, TicketError::Normalize { .. }));
  }

  #[test]
  fn test_status_category_mapping() {
    assert_eq!(status_of(Some("done"), Some("Done")), TicketStatus::Done);
    assert_eq!(status_of(Some("done"), Some("Won't Fix")), TicketStatus::Closed);
    assert_eq!(status_of(Some("new"), Some("To Do")), TicketStatus::Open);
    assert_eq!(status_of(Some("indeterminate"), Some("Doing")), TicketStatus::InProgress);
    assert_eq!(status_of(None, Some("Blocked")), TicketStatus::Blocked);
  }
}
