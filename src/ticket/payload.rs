//! Lenient accessors over raw, platform-shaped payloads.
//!
//! Every lookup treats a node as possibly missing or of the wrong type and
//! returns `None` rather than failing, so normalization only fails when the
//! ticket id itself is absent.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

/// Unstructured payload as returned by a fetcher.
pub type RawPayload = Map<String, Value>;

/// Walk a dotted path (`state.type`, `labels.nodes.0.name`). Numeric segments
/// index into arrays.
pub fn value_at<'a>(payload: &'a RawPayload, path: &str) -> Option<&'a Value> {
  let mut segments = path.split('.');
  let mut current = payload.get(segments.next()?)?;
  for segment in segments {
    current = match current {
      Value::Object(map) => map.get(segment)?,
      Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
      _ => return None,
    };
  }
  if current.is_null() {
    None
  } else {
    Some(current)
  }
}

/// String at `path`; numbers and booleans are rendered, blank strings are `None`.
pub fn str_at(payload: &RawPayload, path: &str) -> Option<String> {
  match value_at(payload, path)? {
    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

pub fn bool_at(payload: &RawPayload, path: &str) -> Option<bool> {
  match value_at(payload, path)? {
    Value::Bool(b) => Some(*b),
    Value::String(s) => s.parse().ok(),
    _ => None,
  }
}

/// Collect strings from an array at `path`. Elements may be plain strings or
/// objects carrying `field` (e.g. `[{"name": "bug"}]`). Anything else is skipped.
pub fn string_list_at(payload: &RawPayload, path: &str, field: &str) -> Vec<String> {
  let Some(Value::Array(items)) = value_at(payload, path) else {
    return Vec::new();
  };
  items
    .iter()
    .filter_map(|item| match item {
      Value::String(s) => Some(s.as_str()),
      Value::Object(obj) => obj.get(field).and_then(Value::as_str),
      _ => None,
    })
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(String::from)
    .collect()
}

/// Parse an RFC 3339 / ISO 8601 timestamp (also the Jira `+0000` offset form
/// and bare dates).
pub fn timestamp_at(payload: &RawPayload, path: &str) -> Option<DateTime<Utc>> {
  parse_timestamp(&str_at(payload, path)?)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
    return Some(dt.with_timezone(&Utc));
  }
  if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
    return Some(dt.and_utc());
  }
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .ok()
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .map(|dt| dt.and_utc())
}

/// Dotted paths from `required` that are missing or null in `payload`.
pub fn missing_fields<'a>(payload: &RawPayload, required: &[&'a str]) -> Vec<&'a str> {
  required
    .iter()
    .copied()
    .filter(|path| value_at(payload, path).is_none())
    .collect()
}

/// Plain text from either a string or an Atlassian document (ADF) node.
pub fn rich_text(value: Option<&Value>) -> Option<String> {
  let value = value?;
  if let Some(s) = value.as_str() {
    return Some(s.to_string());
  }
  let content = value.get("content").and_then(Value::as_array)?;
  let mut text = String::new();
  extract_adf_text(content, &mut text);
  let text = text.trim_end().to_string();
  if text.is_empty() {
    None
  } else {
    Some(text)
  }
}

fn extract_adf_text(content: &[Value], output: &mut String) {
  for node in content {
    let Some(node_type) = node.get("type").and_then(Value::as_str) else {
      continue;
    };
    match node_type {
      "text" => {
        if let Some(text) = node.get("text").and_then(Value::as_str) {
          output.push_str(text);
        }
      }
      "hardBreak" => output.push('\n'),
      _ => {
        if let Some(children) = node.get("content").and_then(Value::as_array) {
          extract_adf_text(children, output);
        }
        if matches!(node_type, "paragraph" | "heading" | "codeBlock") {
          output.push('\n');
        }
      }
    }
  }
}
