//! Raw ticket fetchers and the primary/fallback strategy that drives them.

mod agent;
mod direct;
mod strategy;

pub use agent::AgentFetcher;
pub use direct::DirectApiFetcher;
pub use strategy::{FetchOutcome, FetchRequest, FetchStrategy};

use std::time::Duration;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::platform::Platform;
use crate::ticket::payload::RawPayload;
use crate::ticket::TicketId;

/// Timeout used when neither the call nor the fetcher specifies one.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Retrieves an unstructured payload for a ticket on a platform.
///
/// Interpreting the payload is the provider's job; fetchers only promise the
/// shape the provider's prompt template / API mapping describes.
#[async_trait]
pub trait TicketFetcher: Send + Sync {
  /// Short name used in logs and error messages.
  fn name(&self) -> &str;

  fn supports(&self, platform: Platform) -> bool;

  fn default_timeout(&self) -> Duration {
    DEFAULT_FETCH_TIMEOUT
  }

  /// Identifies the credential used for `platform`. Two fetchers reporting the
  /// same scope share an authentication failure.
  fn credential_scope(&self, _platform: Platform) -> Option<String> {
    None
  }

  async fn fetch(&self, ticket_id: &TicketId, platform: Platform)
    -> Result<RawPayload, FetchError>;
}
