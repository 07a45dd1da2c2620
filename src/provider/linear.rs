use super::{agent_prompt, capture, require_id, TicketProvider};
use crate::error::TicketError;
use crate::platform::{Platform, PlatformPatterns};
use crate::ticket::payload::{str_at, string_list_at, timestamp_at, value_at, RawPayload};
use crate::ticket::{GenericTicket, TicketId, TicketStatus, TicketType};

const SHAPE: &str = r#"{
  "identifier": "ENG-42",
  "title": "...",
  "description": "...",
  "url": "https://linear.app/<workspace>/issue/ENG-42",
  "state": {"name": "In Progress", "type": "started"},
  "assignee": {"name": "..."},
  "labels": {"nodes": [{"name": "Bug"}]},
  "priority": 2,
  "team": {"key": "ENG"},
  "createdAt": "2024-01-01T00:00:00.000Z",
  "updatedAt": "2024-01-01T00:00:00.000Z"
}"#;

pub struct LinearProvider {
  patterns: PlatformPatterns,
  prompt: String,
}

impl LinearProvider {
  /// Provider parsing input with `patterns`.
  pub fn new(patterns: PlatformPatterns) -> Result<Self, regex::Error> {
    Ok(Self {
      patterns,
      prompt: agent_prompt(SHAPE),
    })
  }
}

impl TicketProvider for LinearProvider {
  fn platform(&self) -> Platform {
    Platform::Linear
  }

  fn parse_input(&self, input: &str) -> Result<TicketId, TicketError> {
    let fields = capture(&self.patterns, input, "a Linear identifier (ENG-42) or issue URL")?;
    TicketId::new(fields.get("key")?.to_uppercase())
      .map_err(|e| TicketError::parse(Platform::Linear, input, e.to_string()))
  }

  fn normalize(&self, payload: &RawPayload) -> Result<GenericTicket, TicketError> {
    let id = require_id(Platform::Linear, payload, "identifier", str::to_uppercase)?;

    let status = match str_at(payload, "state.type").as_deref() {
      Some("backlog") | Some("unstarted") | Some("triage") => TicketStatus::Open,
      Some("started") => match TicketStatus::from_keyword(&str_at(payload, "state.name").unwrap_or_default()) {
        TicketStatus::Review => TicketStatus::Review,
        _ => TicketStatus::InProgress,
      },
      Some("completed") => TicketStatus::Done,
      Some("canceled") => TicketStatus::Closed,
      _ => TicketStatus::from_keyword(&str_at(payload, "state.name").unwrap_or_default()),
    };

    // Agents sometimes flatten `labels.nodes` into a plain list.
    let mut labels = string_list_at(payload, "labels.nodes", "name");
    if labels.is_empty() {
      labels = string_list_at(payload, "labels", "name");
    }

    let assignee = str_at(payload, "assignee.displayName").or_else(|| str_at(payload, "assignee.name"));

    Ok(
      GenericTicket::builder(Platform::Linear, id)
        .url(str_at(payload, "url").unwrap_or_default())
        .title(str_at(payload, "title").unwrap_or_default())
        .description(str_at(payload, "description").unwrap_or_default())
        .status(status)
        .ticket_type(TicketType::from_labels(&labels))
        .assignee(assignee)
        .labels(labels)
        .created_at(timestamp_at(payload, "createdAt"))
        .updated_at(timestamp_at(payload, "updatedAt"))
        .metadata("state_name", value_at(payload, "state.name").cloned().unwrap_or_default())
        .metadata("priority", value_at(payload, "priority").cloned().unwrap_or_default())
        .metadata("team", value_at(payload, "team.key").cloned().unwrap_or_default())
        .build(),
    )
  }

  fn prompt_template(&self) -> &str {
    &self.prompt
  }

  fn required_fields(&self) -> &'static [&'static str] {
    &["identifier", "title"]
  }
}
