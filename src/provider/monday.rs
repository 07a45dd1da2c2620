use serde_json::Value;

use super::{agent_prompt, capture, require_id, TicketProvider};
use crate::error::TicketError;
use crate::platform::{Platform, PlatformPatterns};
use crate::ticket::payload::{str_at, timestamp_at, value_at, RawPayload};
use crate::ticket::{GenericTicket, TicketId, TicketStatus, TicketType};

const SHAPE: &str = r#"{
  "id": "1234567890",
  "name": "...",
  "url": "https://<account>.monday.com/boards/<board>/pulses/1234567890",
  "board": {"id": "...", "name": "..."},
  "group": {"title": "..."},
  "column_values": [
    {"id": "status", "text": "Working on it"},
    {"id": "person", "text": "..."},
    {"id": "tags", "text": "tag-one, tag-two"}
  ],
  "created_at": "2024-01-01T00:00:00Z",
  "updated_at": "2024-01-01T00:00:00Z"
}"#;

pub struct MondayProvider {
  patterns: PlatformPatterns,
  prompt: String,
}

impl MondayProvider {
  /// Provider parsing input with `patterns`.
  pub fn new(patterns: PlatformPatterns) -> Result<Self, regex::Error> {
    Ok(Self {
      patterns,
      prompt: agent_prompt(SHAPE),
    })
  }
}

/// Text of the first column whose id or type matches one of `ids`.
fn column_text(payload: &RawPayload, ids: &[&str]) -> Option<String> {
  let Some(Value::Array(columns)) = value_at(payload, "column_values") else {
    return None;
  };
  columns.iter().find_map(|column| {
    let matches = ["id", "type"]
      .iter()
      .filter_map(|k| column.get(*k).and_then(Value::as_str))
      .any(|v| ids.contains(&v));
    if !matches {
      return None;
    }
    column
      .get("text")
      .and_then(Value::as_str)
      .map(str::trim)
      .filter(|t| !t.is_empty())
      .map(String::from)
  })
}

fn status_of(text: &str) -> TicketStatus {
  match text.trim().to_lowercase().as_str() {
    "working on it" => TicketStatus::InProgress,
    "stuck" => TicketStatus::Blocked,
    "not started" => TicketStatus::Open,
    other => TicketStatus::from_keyword(other),
  }
}

impl TicketProvider for MondayProvider {
  fn platform(&self) -> Platform {
    Platform::Monday
  }

  fn parse_input(&self, input: &str) -> Result<TicketId, TicketError> {
    let fields = capture(&self.patterns, input, "a monday.com item URL")?;
    TicketId::new(fields.get("item")?)
      .map_err(|e| TicketError::parse(Platform::Monday, input, e.to_string()))
  }

  fn normalize(&self, payload: &RawPayload) -> Result<GenericTicket, TicketError> {
    let id = require_id(Platform::Monday, payload, "id", str::to_string)?;

    let status = column_text(payload, &["status"])
      .or_else(|| str_at(payload, "status"))
      .map(|s| status_of(&s))
      .unwrap_or_default();

    let labels: Vec<String> = column_text(payload, &["tags"])
      .map(|tags| tags.split(',').map(str::trim).filter(|t| !t.is_empty()).map(String::from).collect())
      .unwrap_or_default();

    Ok(
      GenericTicket::builder(Platform::Monday, id)
        .url(str_at(payload, "url").unwrap_or_default())
        .title(str_at(payload, "name").unwrap_or_default())
        .description(str_at(payload, "description").unwrap_or_default())
        .status(status)
        .ticket_type(TicketType::from_labels(&labels))
        .assignee(column_text(payload, &["person", "people"]))
        .labels(labels)
        .created_at(timestamp_at(payload, "created_at"))
        .updated_at(timestamp_at(payload, "updated_at"))
        .metadata("board", value_at(payload, "board.name").cloned().unwrap_or_default())
        .metadata("group", value_at(payload, "group.title").cloned().unwrap_or_default())
        .build(),
    )
  }

  fn prompt_template(&self) -> &str {
    &self.prompt
  }

  fn required_fields(&self) -> &'static [&'static str] {
    &["id", "name"]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::payload;
  use serde_json::json;

  fn provider() -> MondayProvider {
    MondayProvider::new(PlatformPatterns::builtin(Platform::Monday).unwrap()).unwrap()
  }

  #[test]
  fn test_parse_item_url() {
    let p = provider();
    assert_eq!(
      p.parse_input("https://acme.monday.com/boards/111/pulses/222").unwrap().as_str(),
      "222"
    );
    assert_eq!(
      p.parse_input("https://acme.monday.com/boards/111/views/9/pulses/333").unwrap().as_str(),
      "333"
    );
    assert!(p.parse_input("222").is_err());
  }

  #[test]
  fn test_normalize_columns() {
    let p = provider();
    let ticket = p
      .normalize(&payload(json!({
        "id": "222",
        "name": "Launch page",
        "column_values": [
          {"id": "status", "text": "Stuck"},
          {"id": "person", "text": "Lee"},
          {"id": "tags", "text": "feature, web"}
        ],
        "board": {"name": "Marketing"}
      })))
      .unwrap();

    assert_eq!(ticket.status(), TicketStatus::Blocked);
    assert_eq!(ticket.assignee(), Some("Lee"));
    assert_eq!(ticket.ticket_type(), TicketType::Feature);
    assert_eq!(ticket.metadata()["board"], "Marketing");
  }

  #[test]
  fn test_status_without_columns() {
    let p = provider();
    let ticket = p
      .normalize(&payload(json!({"id": 5, "name": "x", "status": "Done"})))
      .unwrap();
    assert_eq!(ticket.id().as_str(), "5");
    assert_eq!(ticket.status(), TicketStatus::Done);
  }
}
