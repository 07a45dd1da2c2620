//! Test fixtures shared across modules.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::disambiguate::Disambiguator;
use crate::error::{FetchError, TicketError};
use crate::fetch::TicketFetcher;
use crate::platform::Platform;
use crate::ticket::payload::RawPayload;
use crate::ticket::{GenericTicket, TicketId};

pub fn ticket(platform: Platform, id: &str) -> GenericTicket {
  GenericTicket::builder(platform, TicketId::new(id).unwrap())
    .title(format!("Ticket {}", id))
    .build()
}

/// Unwrap a `json!` object literal into a payload.
pub fn payload(value: Value) -> RawPayload {
  match value {
    Value::Object(map) => map,
    other => panic!("payload fixture must be an object, got {other}"),
  }
}

/// Fetcher returning a canned result and counting calls.
pub struct FakeFetcher {
  name: String,
  result: Result<RawPayload, FetchError>,
  platforms: Option<Vec<Platform>>,
  delay: Option<Duration>,
  timeout: Duration,
  scope: Option<String>,
  calls: AtomicUsize,
}

impl FakeFetcher {
  fn with_result(name: &str, result: Result<RawPayload, FetchError>) -> Self {
    Self {
      name: name.to_string(),
      result,
      platforms: None,
      delay: None,
      timeout: crate::fetch::DEFAULT_FETCH_TIMEOUT,
      scope: None,
      calls: AtomicUsize::new(0),
    }
  }

  pub fn ok(name: &str, payload: RawPayload) -> Self {
    Self::with_result(name, Ok(payload))
  }

  pub fn err(name: &str, error: FetchError) -> Self {
    Self::with_result(name, Err(error))
  }

  /// Restrict support to `platforms`.
  pub fn only(mut self, platforms: &[Platform]) -> Self {
    self.platforms = Some(platforms.to_vec());
    self
  }

  /// Sleep before answering (tokio time, so paused clocks apply).
  pub fn delayed(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn scope(mut self, scope: &str) -> Self {
    self.scope = Some(scope.to_string());
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl TicketFetcher for FakeFetcher {
  fn name(&self) -> &str {
    &self.name
  }

  fn supports(&self, platform: Platform) -> bool {
    self
      .platforms
      .as_ref()
      .map_or(true, |platforms| platforms.contains(&platform))
  }

  fn default_timeout(&self) -> Duration {
    self.timeout
  }

  fn credential_scope(&self, _platform: Platform) -> Option<String> {
    self.scope.clone()
  }

  async fn fetch(&self, _ticket_id: &TicketId, _platform: Platform) -> Result<RawPayload, FetchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    self.result.clone()
  }
}

/// Disambiguator that answers with a fixed choice (or refuses) and counts calls.
pub struct CountingDisambiguator {
  choice: Option<Platform>,
  calls: AtomicUsize,
}

impl CountingDisambiguator {
  pub fn choosing(platform: Platform) -> Self {
    Self {
      choice: Some(platform),
      calls: AtomicUsize::new(0),
    }
  }

  pub fn refusing() -> Self {
    Self {
      choice: None,
      calls: AtomicUsize::new(0),
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Disambiguator for CountingDisambiguator {
  async fn choose(&self, candidates: &[Platform], context: &str) -> Result<Platform, TicketError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.choice.ok_or_else(|| TicketError::Ambiguous {
      input: context.to_string(),
      candidates: candidates.to_vec(),
    })
  }
}
