//! Core traits and types for the ticket cache.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::Platform;
use crate::ticket::{GenericTicket, TicketId};

/// Cache slot identity: one live entry per (platform, ticket id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
  pub platform: Platform,
  pub ticket_id: TicketId,
}

impl CacheKey {
  pub fn new(platform: Platform, ticket_id: TicketId) -> Self {
    Self {
      platform,
      ticket_id,
    }
  }

  pub fn for_ticket(ticket: &GenericTicket) -> Self {
    Self::new(ticket.platform(), ticket.id().clone())
  }

  /// Inverse of `Display`: `"<PLATFORM>:<ticket_id>"`.
  pub fn parse(s: &str) -> Option<Self> {
    let (platform, id) = s.split_once(':')?;
    Some(Self::new(platform.parse().ok()?, TicketId::new(id).ok()?))
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.platform, self.ticket_id)
  }
}

/// A cached ticket with its freshness metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub ticket: GenericTicket,
  pub cached_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
  /// ETag-style validator for conditional re-fetch.
  pub validator: Option<String>,
}

impl CacheEntry {
  pub fn new(ticket: GenericTicket, ttl: Duration, validator: Option<String>) -> Self {
    let cached_at = Utc::now();
    Self {
      ticket,
      cached_at,
      expires_at: expiry(cached_at, ttl),
      validator,
    }
  }

  pub fn key(&self) -> CacheKey {
    CacheKey::for_ticket(&self.ticket)
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now > self.expires_at
  }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
  let latest = latest_expiry();
  chrono::Duration::from_std(ttl)
    .ok()
    .and_then(|ttl| now.checked_add_signed(ttl))
    .map_or(latest, |at| at.min(latest))
}

/// Last instant with a four-digit year. Persisted expiries stay fixed-width
/// and compare correctly as text.
fn latest_expiry() -> DateTime<Utc> {
  NaiveDate::from_ymd_opt(9999, 12, 31)
    .and_then(|day| day.and_hms_micro_opt(23, 59, 59, 999_999))
    .map_or(DateTime::<Utc>::MAX_UTC, |at| DateTime::from_naive_utc_and_offset(at, Utc))
}

/// Thread-safe ticket cache with TTL expiry and optional LRU bound.
///
/// Operations never fail: a backend that cannot read or write logs the problem
/// and behaves as a miss.
pub trait TicketCache: Send + Sync {
  /// Live ticket for `key`. Counts as a use for LRU purposes; expired entries
  /// are removed and reported as a miss.
  fn get(&self, key: &CacheKey) -> Option<GenericTicket>;

  /// Live entry with metadata. Does not refresh recency.
  fn get_entry(&self, key: &CacheKey) -> Option<CacheEntry>;

  /// Store `ticket`, replacing any entry for the same key. `None` uses the
  /// backend's default TTL.
  fn set(&self, ticket: GenericTicket, ttl: Option<Duration>, validator: Option<String>);

  fn invalidate(&self, key: &CacheKey);

  fn clear(&self);

  fn clear_platform(&self, platform: Platform);

  /// Number of live entries.
  fn size(&self) -> usize;

  /// Keys of live entries, least recently used first.
  fn keys(&self) -> Vec<CacheKey>;
}

/// Where a ticket returned by the service came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
  /// Served from the cache without fetching
  Cache,
  /// Fetched by this request
  Network,
  /// Fetched by a concurrent request for the same key that this one joined
  Shared,
}

/// A ticket and how it was obtained.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
    }
  }

  pub fn from_network(data: T, shared: bool) -> Self {
    Self {
      data,
      source: if shared {
        CacheSource::Shared
      } else {
        CacheSource::Network
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_display_and_parse() {
    let key = CacheKey::new(Platform::Github, TicketId::new("acme/widgets#4").unwrap());
    assert_eq!(key.to_string(), "GITHUB:acme/widgets#4");
    assert_eq!(CacheKey::parse("GITHUB:acme/widgets#4"), Some(key));
    assert_eq!(CacheKey::parse("GITHUB:"), None);
    assert_eq!(CacheKey::parse("NOPE:X-1"), None);
  }

  #[test]
  fn test_huge_ttl_saturates() {
    let ticket = GenericTicket::builder(Platform::Jira, TicketId::new("A-1").unwrap()).build();
    let entry = CacheEntry::new(ticket, Duration::MAX, None);
    assert!(!entry.is_expired(Utc::now()));
    assert_eq!(entry.expires_at, latest_expiry());
    assert!(entry.expires_at.to_rfc3339().starts_with("9999-12-31T23:59:59"));
  }
}
