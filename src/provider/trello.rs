use super::{agent_prompt, capture, TicketProvider};
use crate::error::TicketError;
use crate::platform::{Platform, PlatformPatterns};
use crate::ticket::payload::{bool_at, str_at, string_list_at, timestamp_at, value_at, RawPayload};
use crate::ticket::{GenericTicket, TicketId, TicketStatus, TicketType};

const SHAPE: &str = r#"{
  "id": "5f1a...",
  "shortLink": "AbCd1234",
  "name": "...",
  "desc": "...",
  "url": "https://trello.com/c/AbCd1234/...",
  "closed": false,
  "list": {"name": "Doing"},
  "labels": [{"name": "bug"}],
  "members": [{"fullName": "..."}],
  "dateLastActivity": "2024-01-01T00:00:00.000Z",
  "due": null
}"#;

pub struct TrelloProvider {
  patterns: PlatformPatterns,
  prompt: String,
}

impl TrelloProvider {
  /// Provider parsing input with `patterns`.
  pub fn new(patterns: PlatformPatterns) -> Result<Self, regex::Error> {
    Ok(Self {
      patterns,
      prompt: agent_prompt(SHAPE),
    })
  }
}

impl TicketProvider for TrelloProvider {
  fn platform(&self) -> Platform {
    Platform::Trello
  }

  fn parse_input(&self, input: &str) -> Result<TicketId, TicketError> {
    let fields = capture(&self.patterns, input, "a trello.com card URL")?;
    TicketId::new(fields.get("short_link")?)
      .map_err(|e| TicketError::parse(Platform::Trello, input, e.to_string()))
  }

  fn normalize(&self, payload: &RawPayload) -> Result<GenericTicket, TicketError> {
    // Card URLs carry the short link, so prefer it as the id.
    let id = str_at(payload, "shortLink")
      .or_else(|| str_at(payload, "id"))
      .and_then(|id| TicketId::new(id).ok())
      .ok_or_else(|| TicketError::normalize(Platform::Trello, "payload has no 'shortLink' or 'id'"))?;

    let status = if bool_at(payload, "closed") == Some(true) {
      TicketStatus::Closed
    } else {
      str_at(payload, "list.name")
        .map(|name| TicketStatus::from_keyword(&name))
        .unwrap_or_default()
    };
    let labels = string_list_at(payload, "labels", "name");

    Ok(
      GenericTicket::builder(Platform::Trello, id)
        .url(str_at(payload, "url").or_else(|| str_at(payload, "shortUrl")).unwrap_or_default())
        .title(str_at(payload, "name").unwrap_or_default())
        .description(str_at(payload, "desc").unwrap_or_default())
        .status(status)
        .ticket_type(TicketType::from_labels(&labels))
        .assignee(str_at(payload, "members.0.fullName"))
        .labels(labels)
        .updated_at(timestamp_at(payload, "dateLastActivity"))
        .metadata("list", value_at(payload, "list.name").cloned().unwrap_or_default())
        .metadata("due", value_at(payload, "due").cloned().unwrap_or_default())
        .build(),
    )
  }

  fn prompt_template(&self) -> &str {
    &self.prompt
  }

  fn required_fields(&self) -> &'static [&'static str] {
    &["shortLink", "name"]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::payload;
  use serde_json::json;

  fn provider() -> TrelloProvider {
    TrelloProvider::new(PlatformPatterns::builtin(Platform::Trello).unwrap()).unwrap()
  }

  #[test]
  fn test_parse_card_url() {
    let p = provider();
    assert_eq!(
      p.parse_input("https://trello.com/c/AbCd1234/17-fix-login").unwrap().as_str(),
      "AbCd1234"
    );
    assert!(p.parse_input("AbCd1234").is_err());
  }

  #[test]
  fn test_normalize_card() {
    let p = provider();
    let ticket = p
      .normalize(&payload(json!({
        "id": "5f1a0000",
        "shortLink": "AbCd1234",
        "name": "Fix login",
        "list": {"name": "Doing"},
        "labels": [{"name": "bug"}, {"name": ""}],
        "members": [{"fullName": "Kim"}]
      })))
      .unwrap();

    assert_eq!(ticket.id().as_str(), "AbCd1234");
    assert_eq!(ticket.status(), TicketStatus::InProgress);
    assert_eq!(ticket.ticket_type(), TicketType::Bug);
    assert_eq!(ticket.labels(), ["bug".to_string()]);
    assert_eq!(ticket.assignee(), Some("Kim"));
  }

  #[test]
  fn test_short_link_is_required() {
    let p = provider();
    assert!(p.required_fields().contains(&"shortLink"));
  }

  #[test]
  fn test_closed_card_and_id_fallback() {
    let p = provider();
    let ticket = p
      .normalize(&payload(json!({"id": "5f1a0000", "name": "Old", "closed": true, "list": {"name": "Doing"}})))
      .unwrap();
    assert_eq!(ticket.id().as_str(), "5f1a0000");
    assert_eq!(ticket.status(), TicketStatus::Closed);
  }
}
