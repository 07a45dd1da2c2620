//! Error types for ticket acquisition.
//!
//! Both enums are `Clone` because a single coalesced fetch hands the same
//! outcome to every waiter.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::platform::Platform;

/// Failure reported by a single fetcher attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  #[error("{fetcher} timed out after {}s", .after.as_secs_f64())]
  Timeout { fetcher: String, after: Duration },

  #[error("{fetcher} failed: {message}")]
  Transient { fetcher: String, message: String },

  #[error("{fetcher} returned an invalid payload: {message}")]
  InvalidPayload { fetcher: String, message: String },

  #[error("{fetcher} is not authorized: {message}")]
  Auth { fetcher: String, message: String },

  #[error("{fetcher} could not find the ticket: {message}")]
  NotFound { fetcher: String, message: String },
}

/// Coarse classification used to decide fallback behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorClass {
  Timeout,
  Transient,
  InvalidPayload,
  Auth,
  NotFound,
}

impl FetchError {
  pub fn class(&self) -> FetchErrorClass {
    match self {
      Self::Timeout { .. } => FetchErrorClass::Timeout,
      Self::Transient { .. } => FetchErrorClass::Transient,
      Self::InvalidPayload { .. } => FetchErrorClass::InvalidPayload,
      Self::Auth { .. } => FetchErrorClass::Auth,
      Self::NotFound { .. } => FetchErrorClass::NotFound,
    }
  }

  /// Timeouts, transient integration errors and malformed payloads.
  pub fn is_recoverable(&self) -> bool {
    matches!(
      self.class(),
      FetchErrorClass::Timeout | FetchErrorClass::Transient | FetchErrorClass::InvalidPayload
    )
  }

  /// Name of the fetcher that produced this error.
  pub fn fetcher(&self) -> &str {
    match self {
      Self::Timeout { fetcher, .. }
      | Self::Transient { fetcher, .. }
      | Self::InvalidPayload { fetcher, .. }
      | Self::Auth { fetcher, .. }
      | Self::NotFound { fetcher, .. } => fetcher,
    }
  }
}

/// Terminal failure of a ticket operation.
#[derive(Debug, Clone, Error)]
pub enum TicketError {
  #[error("unsupported input '{input}': {reason}")]
  Unsupported { input: String, reason: String },

  #[error("'{input}' matches {}; could not pick one", PlatformList(.candidates))]
  Ambiguous {
    input: String,
    candidates: Vec<Platform>,
  },

  #[error("cannot parse '{input}' as a {platform} ticket: {reason}")]
  Parse {
    platform: Platform,
    input: String,
    reason: String,
  },

  #[error("{}", describe_fetch(.platform, .ticket_id, .error, .primary.as_ref(), .fallback_attempted))]
  Fetch {
    platform: Platform,
    ticket_id: String,
    /// The error surfaced to the caller (the fallback's when one ran).
    error: FetchError,
    /// The primary's error, kept only when both attempts failed recoverably.
    primary: Option<FetchError>,
    fallback_attempted: bool,
  },

  #[error("cannot normalize {platform} payload: {reason}")]
  Normalize { platform: Platform, reason: String },
}

impl TicketError {
  pub fn unsupported(input: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::Unsupported {
      input: input.into(),
      reason: reason.into(),
    }
  }

  pub fn parse(platform: Platform, input: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::Parse {
      platform,
      input: input.into(),
      reason: reason.into(),
    }
  }

  pub fn normalize(platform: Platform, reason: impl Into<String>) -> Self {
    Self::Normalize {
      platform,
      reason: reason.into(),
    }
  }
}

fn describe_fetch(
  platform: &Platform,
  ticket_id: &str,
  error: &FetchError,
  primary: Option<&FetchError>,
  fallback_attempted: &bool,
) -> String {
  let mut msg = format!("failed to fetch {} ticket {}: {}", platform, ticket_id, error);
  if *fallback_attempted {
    match primary {
      Some(p) => msg.push_str(&format!(" (fallback attempted after: {})", p)),
      None => msg.push_str(" (fallback attempted)"),
    }
  }
  msg
}

struct PlatformList<'a>(&'a [Platform]);

impl fmt::Display for PlatformList<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, platform) in self.0.iter().enumerate() {
      if i > 0 {
        f.write_str(", ")?;
      }
      write!(f, "{}", platform)?;
    }
    Ok(())
  }
}
