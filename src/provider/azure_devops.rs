use serde_json::Value;

use super::{agent_prompt, capture, require_id, TicketProvider};
use crate::error::TicketError;
use crate::platform::{Platform, PlatformPatterns};
use crate::ticket::payload::{parse_timestamp, rich_text, str_at, value_at, RawPayload};
use crate::ticket::{GenericTicket, TicketId, TicketStatus, TicketType};

const SHAPE: &str = r#"{
  "id": 123,
  "url": "https://dev.azure.com/<org>/<project>/_workitems/edit/123",
  "fields": {
    "System.Title": "...",
    "System.Description": "...",
    "System.State": "Active",
    "System.WorkItemType": "Bug",
    "System.AssignedTo": {"displayName": "..."},
    "System.Tags": "tag-one; tag-two",
    "System.CreatedDate": "2024-01-01T00:00:00Z",
    "System.ChangedDate": "2024-01-01T00:00:00Z",
    "Microsoft.VSTS.Common.Priority": 2
  }
}"#;

pub struct AzureDevopsProvider {
  patterns: PlatformPatterns,
  prompt: String,
}

impl AzureDevopsProvider {
  /// Provider parsing input with `patterns`.
  pub fn new(patterns: PlatformPatterns) -> Result<Self, regex::Error> {
    Ok(Self {
      patterns,
      prompt: agent_prompt(SHAPE),
    })
  }
}

/// Work item field by its reference name. Reference names contain dots, so
/// they cannot go through the dotted-path helpers.
fn field<'a>(payload: &'a RawPayload, name: &str) -> Option<&'a Value> {
  value_at(payload, "fields")?.get(name).filter(|v| !v.is_null())
}

fn field_str(payload: &RawPayload, name: &str) -> Option<String> {
  match field(payload, name)? {
    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

fn status_of(state: &str) -> TicketStatus {
  match state.trim().to_lowercase().as_str() {
    "new" | "proposed" | "to do" => TicketStatus::Open,
    "active" | "committed" | "in progress" => TicketStatus::InProgress,
    "resolved" => TicketStatus::Review,
    "closed" | "done" => TicketStatus::Done,
    "removed" => TicketStatus::Closed,
    other => TicketStatus::from_keyword(other),
  }
}

fn type_of(work_item_type: &str) -> TicketType {
  match work_item_type.trim().to_lowercase().as_str() {
    "user story" | "product backlog item" | "feature" | "epic" => TicketType::Feature,
    "bug" | "issue" | "impediment" => TicketType::Bug,
    "task" => TicketType::Task,
    other => TicketType::from_keyword(other),
  }
}

impl TicketProvider for AzureDevopsProvider {
  fn platform(&self) -> Platform {
    Platform::AzureDevops
  }

  fn parse_input(&self, input: &str) -> Result<TicketId, TicketError> {
    let fields = capture(&self.patterns, input, "an AB#123 reference or work item URL")?;
    TicketId::new(fields.get("number")?)
      .map_err(|e| TicketError::parse(Platform::AzureDevops, input, e.to_string()))
  }

  fn normalize(&self, payload: &RawPayload) -> Result<GenericTicket, TicketError> {
    let id = require_id(Platform::AzureDevops, payload, "id", str::to_string)?;

    let labels: Vec<String> = field_str(payload, "System.Tags")
      .map(|tags| {
        tags
          .split(';')
          .map(str::trim)
          .filter(|t| !t.is_empty())
          .map(String::from)
          .collect()
      })
      .unwrap_or_default();

    let ticket_type = field_str(payload, "System.WorkItemType")
      .map(|t| type_of(&t))
      .filter(|t| *t != TicketType::Unknown)
      .unwrap_or_else(|| TicketType::from_labels(&labels));

    let assignee = match field(payload, "System.AssignedTo") {
      Some(Value::Object(identity)) => identity
        .get("displayName")
        .or_else(|| identity.get("uniqueName"))
        .and_then(Value::as_str)
        .map(String::from),
      Some(Value::String(name)) => Some(name.clone()),
      _ => None,
    };

    let url = str_at(payload, "_links.html.href")
      .or_else(|| str_at(payload, "url"))
      .unwrap_or_default();

    Ok(
      GenericTicket::builder(Platform::AzureDevops, id)
        .url(url)
        .title(field_str(payload, "System.Title").unwrap_or_default())
        .description(rich_text(field(payload, "System.Description")).unwrap_or_default())
        .status(field_str(payload, "System.State").map(|s| status_of(&s)).unwrap_or_default())
        .ticket_type(ticket_type)
        .assignee(assignee)
        .labels(labels)
        .created_at(field_str(payload, "System.CreatedDate").and_then(|s| parse_timestamp(&s)))
        .updated_at(field_str(payload, "System.ChangedDate").and_then(|s| parse_timestamp(&s)))
        .metadata("state", field(payload, "System.State").cloned().unwrap_or_default())
        .metadata(
          "priority",
          field(payload, "Microsoft.VSTS.Common.Priority").cloned().unwrap_or_default(),
        )
        .metadata("area_path", field(payload, "System.AreaPath").cloned().unwrap_or_default())
        .build(),
    )
  }

  fn prompt_template(&self) -> &str {
    &self.prompt
  }

  fn required_fields(&self) -> &'static [&'static str] {
    &["id", "fields"]
  }
}
