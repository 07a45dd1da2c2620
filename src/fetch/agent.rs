//! Fetcher that asks an agent CLI to retrieve the ticket.
//!
//! The provider's prompt template is rendered for the ticket and passed to the
//! configured command (`claude -p` by default). The first JSON object in the
//! command's stdout is the payload.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use super::{TicketFetcher, DEFAULT_FETCH_TIMEOUT};
use crate::error::FetchError;
use crate::platform::Platform;
use crate::provider::ProviderRegistry;
use crate::ticket::payload::RawPayload;
use crate::ticket::TicketId;

const NAME: &str = "agent";

/// Longest stderr tail kept in error messages.
const STDERR_TAIL: usize = 400;

pub struct AgentFetcher {
  command: String,
  args: Vec<String>,
  providers: Arc<ProviderRegistry>,
  timeout: Duration,
}

impl AgentFetcher {
  pub fn new(command: impl Into<String>, args: Vec<String>, providers: Arc<ProviderRegistry>) -> Self {
    Self {
      command: command.into(),
      args,
      providers,
      timeout: DEFAULT_FETCH_TIMEOUT,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  fn build_command(&self, prompt: &str) -> Command {
    let mut cmd = Command::new(&self.command);
    cmd
      .args(&self.args)
      .arg(prompt)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      // Dropping the fetch future (timeout) must not leave the agent running.
      .kill_on_drop(true);
    cmd
  }
}

#[async_trait]
impl TicketFetcher for AgentFetcher {
  fn name(&self) -> &str {
    NAME
  }

  fn supports(&self, platform: Platform) -> bool {
    self.providers.get(platform).is_some()
  }

  fn default_timeout(&self) -> Duration {
    self.timeout
  }

  async fn fetch(&self, ticket_id: &TicketId, platform: Platform) -> Result<RawPayload, FetchError> {
    let provider = self
      .providers
      .get(platform)
      .ok_or_else(|| FetchError::Transient {
        fetcher: NAME.to_string(),
        message: format!("no prompt template for {}", platform),
      })?;
    let prompt = render_prompt(provider.prompt_template(), ticket_id, platform);

    debug!(command = %self.command, %platform, ticket = %ticket_id, "Running agent fetch");
    let output = self
      .build_command(&prompt)
      .output()
      .await
      .map_err(|e| FetchError::Transient {
        fetcher: NAME.to_string(),
        message: format!("failed to run '{}': {}", self.command, e),
      })?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(FetchError::Transient {
        fetcher: NAME.to_string(),
        message: format!("'{}' exited with {}: {}", self.command, output.status, tail(stderr.trim())),
      });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    extract_json_object(&stdout).ok_or_else(|| FetchError::InvalidPayload {
      fetcher: NAME.to_string(),
      message: "agent output contained no JSON object".to_string(),
    })
  }
}

fn render_prompt(template: &str, ticket_id: &TicketId, platform: Platform) -> String {
  template
    .replace("{ticket_id}", ticket_id.as_str())
    .replace("{platform}", platform.display_name())
}

fn tail(s: &str) -> &str {
  if s.len() <= STDERR_TAIL {
    return s;
  }
  let mut start = s.len() - STDERR_TAIL;
  while !s.is_char_boundary(start) {
    start += 1;
  }
  &s[start..]
}

/// First JSON object in `text`: the whole text, a fenced ```json block, or the
/// first `{` that starts a parseable object.
fn extract_json_object(text: &str) -> Option<RawPayload> {
  let trimmed = text.trim();
  if let Ok(Value::Object(map)) = serde_json::from_str(trimmed) {
    return Some(map);
  }

  if let Some(start) = trimmed.find("```json") {
    let body = &trimmed[start + "```json".len()..];
    if let Some(end) = body.find("```") {
      if let Ok(Value::Object(map)) = serde_json::from_str(body[..end].trim()) {
        return Some(map);
      }
    }
  }

  trimmed.match_indices('{').find_map(|(idx, _)| {
    let mut stream = serde_json::Deserializer::from_str(&trimmed[idx..]).into_iter::<Value>();
    match stream.next() {
      Some(Ok(Value::Object(map))) => Some(map),
      _ => None,
    }
  })
}
