//! Per-platform providers: parse user input into a ticket id and normalize raw
//! payloads into [`GenericTicket`]s.

mod azure_devops;
mod github;
mod jira;
mod linear;
mod monday;
mod trello;

pub use azure_devops::AzureDevopsProvider;
pub use github::GithubProvider;
pub use jira::JiraProvider;
pub use linear::LinearProvider;
pub use monday::MondayProvider;
pub use trello::TrelloProvider;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::TicketError;
use crate::platform::{Platform, PlatformCatalog, PlatformPatterns};
use crate::ticket::payload::{str_at, RawPayload};
use crate::ticket::{GenericTicket, TicketId};

/// Parsing and normalization for one platform.
pub trait TicketProvider: Send + Sync {
  fn platform(&self) -> Platform;

  /// Normalize a URL or bare identifier into this platform's ticket id.
  fn parse_input(&self, input: &str) -> Result<TicketId, TicketError>;

  /// Build a ticket from a validated payload. Fails only when the payload has
  /// no usable ticket id.
  fn normalize(&self, payload: &RawPayload) -> Result<GenericTicket, TicketError>;

  /// Instructions for agent-mediated fetching. `{ticket_id}` and `{platform}`
  /// are substituted before use.
  fn prompt_template(&self) -> &str;

  /// Dotted payload paths a fetched payload must contain.
  fn required_fields(&self) -> &'static [&'static str];
}

/// Explicitly built dispatch table from platform to provider.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
  providers: HashMap<Platform, Arc<dyn TicketProvider>>,
}

impl ProviderRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry with a provider for every built-in platform, parsing with the
  /// built-in patterns.
  #[cfg(test)]
  pub fn builtin() -> Result<Self, regex::Error> {
    Self::from_catalog(&PlatformCatalog::builtin()?)
  }

  /// Registry whose providers parse with the same patterns `catalog` detects
  /// with. Platforms missing from the catalog fall back to built-in patterns.
  pub fn from_catalog(catalog: &PlatformCatalog) -> Result<Self, regex::Error> {
    let patterns = |platform: Platform| match catalog.patterns(platform) {
      Some(patterns) => Ok(patterns.clone()),
      None => PlatformPatterns::builtin(platform),
    };
    let mut registry = Self::new();
    registry.register(Arc::new(JiraProvider::new(patterns(Platform::Jira)?)?));
    registry.register(Arc::new(LinearProvider::new(patterns(Platform::Linear)?)?));
    registry.register(Arc::new(GithubProvider::new(patterns(Platform::Github)?)?));
    registry.register(Arc::new(AzureDevopsProvider::new(patterns(Platform::AzureDevops)?)?));
    registry.register(Arc::new(MondayProvider::new(patterns(Platform::Monday)?)?));
    registry.register(Arc::new(TrelloProvider::new(patterns(Platform::Trello)?)?));
    Ok(registry)
  }

  /// Add or replace the provider for its platform.
  pub fn register(&mut self, provider: Arc<dyn TicketProvider>) {
    self.providers.insert(provider.platform(), provider);
  }

  pub fn get(&self, platform: Platform) -> Option<Arc<dyn TicketProvider>> {
    self.providers.get(&platform).cloned()
  }
}

/// Named captures of one successful match.
struct Captures<'a> {
  platform: Platform,
  input: &'a str,
  fields: BTreeMap<String, String>,
}

impl Captures<'_> {
  /// Captured group `name`. Patterns registered at runtime may lack it.
  fn get(&self, name: &str) -> Result<&str, TicketError> {
    self.fields.get(name).map(String::as_str).ok_or_else(|| {
      TicketError::parse(self.platform, self.input, format!("pattern has no '{}' group", name))
    })
  }
}

/// Captures for `input`, or a parse error naming what was expected.
fn capture<'a>(patterns: &PlatformPatterns, input: &'a str, expected: &str) -> Result<Captures<'a>, TicketError> {
  let input = input.trim();
  let fields = patterns
    .capture(input)
    .ok_or_else(|| TicketError::parse(patterns.platform(), input, format!("expected {}", expected)))?;
  Ok(Captures {
    platform: patterns.platform(),
    input,
    fields,
  })
}

/// Ticket id at `path`, or a normalize error.
fn require_id(
  platform: Platform,
  payload: &RawPayload,
  path: &str,
  normalize: impl Fn(&str) -> String,
) -> Result<TicketId, TicketError> {
  str_at(payload, path)
    .map(|raw| normalize(&raw))
    .and_then(|id| TicketId::new(id).ok())
    .ok_or_else(|| TicketError::normalize(platform, format!("payload has no '{}' identifier", path)))
}

/// Prompt asking the agent for a single JSON object with the given shape.
fn agent_prompt(shape: &str) -> String {
  format!(
    "Fetch the {{platform}} ticket {{ticket_id}} using the tools available to you.\n\
     Respond with exactly one JSON object and nothing else. Use this shape, \
     omitting fields you cannot find and never inventing values:\n{}\n",
    shape
  )
}
