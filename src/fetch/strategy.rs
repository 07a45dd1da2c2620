//! Primary/fallback fetch protocol.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::TicketFetcher;
use crate::error::{FetchError, FetchErrorClass, TicketError};
use crate::platform::Platform;
use crate::ticket::payload::{missing_fields, RawPayload};
use crate::ticket::TicketId;

/// Arguments shared by both attempts of one fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
  pub ticket_id: &'a TicketId,
  pub platform: Platform,
  /// Dotted payload paths that must be present for the payload to be accepted.
  pub required_fields: &'a [&'a str],
  /// Overrides the fetcher's default timeout.
  pub timeout: Option<Duration>,
}

/// A validated payload and the fetcher that produced it.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
  pub payload: RawPayload,
  pub fetcher: String,
  pub used_fallback: bool,
}

/// Ordered primary/fallback pair of fetchers.
///
/// - Primary not covering the platform: fallback is called directly.
/// - Primary failing: fallback is tried once with the same arguments, unless
///   the primary failed authentication with a credential the fallback shares.
/// - Both failing: the fallback's error is surfaced. The primary's error is
///   attached unless the fallback hit the same hard failure.
#[derive(Clone)]
pub struct FetchStrategy {
  primary: Option<Arc<dyn TicketFetcher>>,
  fallback: Option<Arc<dyn TicketFetcher>>,
}

impl FetchStrategy {
  pub fn new(
    primary: Option<Arc<dyn TicketFetcher>>,
    fallback: Option<Arc<dyn TicketFetcher>>,
  ) -> Self {
    Self { primary, fallback }
  }

  /// Whether any configured fetcher covers `platform`.
  pub fn supports(&self, platform: Platform) -> bool {
    self.primary_for(platform).is_some() || self.fallback_for(platform).is_some()
  }

  fn primary_for(&self, platform: Platform) -> Option<&Arc<dyn TicketFetcher>> {
    self.primary.as_ref().filter(|f| f.supports(platform))
  }

  fn fallback_for(&self, platform: Platform) -> Option<&Arc<dyn TicketFetcher>> {
    self.fallback.as_ref().filter(|f| f.supports(platform))
  }

  pub async fn fetch(&self, req: FetchRequest<'_>) -> Result<FetchOutcome, TicketError> {
    let primary = self.primary_for(req.platform);
    let fallback = self.fallback_for(req.platform);

    let fetch_error = |error: FetchError, primary: Option<FetchError>, fallback_attempted: bool| {
      TicketError::Fetch {
        platform: req.platform,
        ticket_id: req.ticket_id.to_string(),
        error,
        primary,
        fallback_attempted,
      }
    };

    let Some(primary) = primary else {
      let Some(fallback) = fallback else {
        return Err(TicketError::unsupported(
          req.ticket_id.as_str(),
          format!("no configured fetcher supports {}", req.platform),
        ));
      };
      return attempt(fallback, &req)
        .await
        .map(|payload| outcome(payload, fallback, true))
        .map_err(|e| fetch_error(e, None, true));
    };

    let primary_err = match attempt(primary, &req).await {
      Ok(payload) => return Ok(outcome(payload, primary, false)),
      Err(e) => e,
    };

    let Some(fallback) = fallback else {
      return Err(fetch_error(primary_err, None, false));
    };

    if primary_err.class() == FetchErrorClass::Auth && shares_credential(primary, fallback, req.platform) {
      warn!(
        primary = primary.name(),
        fallback = fallback.name(),
        platform = %req.platform,
        "Fallback uses the same rejected credential, not retrying"
      );
      return Err(fetch_error(primary_err, None, false));
    }

    warn!(
      primary = primary.name(),
      fallback = fallback.name(),
      ticket = %req.ticket_id,
      error = %primary_err,
      "Primary fetch failed, trying fallback"
    );

    match attempt(fallback, &req).await {
      Ok(payload) => Ok(outcome(payload, fallback, true)),
      Err(fallback_err) => {
        let same_hard_failure =
          !fallback_err.is_recoverable() && fallback_err.class() == primary_err.class();
        let primary = if same_hard_failure {
          None
        } else {
          Some(primary_err)
        };
        Err(fetch_error(fallback_err, primary, true))
      }
    }
  }
}

fn outcome(payload: RawPayload, fetcher: &Arc<dyn TicketFetcher>, used_fallback: bool) -> FetchOutcome {
  FetchOutcome {
    payload,
    fetcher: fetcher.name().to_string(),
    used_fallback,
  }
}

fn shares_credential(a: &Arc<dyn TicketFetcher>, b: &Arc<dyn TicketFetcher>, platform: Platform) -> bool {
  match (a.credential_scope(platform), b.credential_scope(platform)) {
    (Some(a), Some(b)) => a == b,
    _ => false,
  }
}

/// One bounded, validated fetch.
async fn attempt(fetcher: &Arc<dyn TicketFetcher>, req: &FetchRequest<'_>) -> Result<RawPayload, FetchError> {
  let timeout = req.timeout.unwrap_or_else(|| fetcher.default_timeout());
  info!(
    fetcher = fetcher.name(),
    platform = %req.platform,
    ticket = %req.ticket_id,
    timeout_secs = timeout.as_secs_f64(),
    "Fetching ticket"
  );

  let payload = match tokio::time::timeout(timeout, fetcher.fetch(req.ticket_id, req.platform)).await {
    Ok(result) => result?,
    Err(_) => {
      warn!(fetcher = fetcher.name(), ticket = %req.ticket_id, "Fetch timed out");
      return Err(FetchError::Timeout {
        fetcher: fetcher.name().to_string(),
        after: timeout,
      });
    }
  };

  validate(fetcher.name(), &payload, req.required_fields)?;
  Ok(payload)
}

fn validate(fetcher: &str, payload: &RawPayload, required: &[&str]) -> Result<(), FetchError> {
  if payload.is_empty() {
    return Err(FetchError::InvalidPayload {
      fetcher: fetcher.to_string(),
      message: "empty response".to_string(),
    });
  }
  let missing = missing_fields(payload, required);
  if !missing.is_empty() {
    return Err(FetchError::InvalidPayload {
      fetcher: fetcher.to_string(),
      message: format!("missing required fields: {}", missing.join(", ")),
    });
  }
  Ok(())
}
