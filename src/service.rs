//! Ticket orchestration: detect, disambiguate, parse, serve from cache or
//! fetch, normalize and store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheKey, CacheResult, TicketCache};
use crate::disambiguate::{Disambiguator, RefuseDisambiguator};
use crate::error::TicketError;
use crate::fetch::{FetchRequest, FetchStrategy};
use crate::platform::{Detection, Platform, PlatformDetector};
use crate::provider::{ProviderRegistry, TicketProvider};
use crate::ticket::payload::str_at;
use crate::ticket::GenericTicket;

/// Default lifetime of a cached ticket.
pub const DEFAULT_TICKET_TTL: Duration = Duration::from_secs(3600);

type InFlight = Shared<BoxFuture<'static, Result<GenericTicket, TicketError>>>;

/// Per-call options for [`TicketService::get_ticket_with`].
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
  /// Skip detection and treat the input as belonging to this platform.
  pub hint: Option<Platform>,
  /// Ignore any cached copy. The fetched ticket is still stored.
  pub refresh: bool,
  /// Per-attempt fetch timeout.
  pub timeout: Option<Duration>,
}

/// Entry point for ticket lookups. Cheap to clone; clones share the cache and
/// the in-flight fetch table.
#[derive(Clone)]
pub struct TicketService {
  inner: Arc<Inner>,
}

struct Inner {
  detector: PlatformDetector,
  providers: Arc<ProviderRegistry>,
  cache: Arc<dyn TicketCache>,
  strategy: FetchStrategy,
  disambiguator: Arc<dyn Disambiguator>,
  default_platform: Option<Platform>,
  ttl: Duration,
  in_flight: Mutex<HashMap<CacheKey, InFlight>>,
}

pub struct TicketServiceBuilder {
  detector: PlatformDetector,
  providers: Arc<ProviderRegistry>,
  cache: Arc<dyn TicketCache>,
  strategy: FetchStrategy,
  disambiguator: Arc<dyn Disambiguator>,
  default_platform: Option<Platform>,
  ttl: Duration,
}

impl TicketServiceBuilder {
  pub fn disambiguator(mut self, disambiguator: Arc<dyn Disambiguator>) -> Self {
    self.disambiguator = disambiguator;
    self
  }

  /// Platform chosen without asking when it is among several candidates.
  pub fn default_platform(mut self, platform: Option<Platform>) -> Self {
    self.default_platform = platform;
    self
  }

  pub fn ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn build(self) -> TicketService {
    TicketService {
      inner: Arc::new(Inner {
        detector: self.detector,
        providers: self.providers,
        cache: self.cache,
        strategy: self.strategy,
        disambiguator: self.disambiguator,
        default_platform: self.default_platform,
        ttl: self.ttl,
        in_flight: Mutex::new(HashMap::new()),
      }),
    }
  }
}

impl TicketService {
  pub fn builder(
    detector: PlatformDetector,
    providers: Arc<ProviderRegistry>,
    cache: Arc<dyn TicketCache>,
    strategy: FetchStrategy,
  ) -> TicketServiceBuilder {
    TicketServiceBuilder {
      detector,
      providers,
      cache,
      strategy,
      disambiguator: Arc::new(RefuseDisambiguator),
      default_platform: None,
      ttl: DEFAULT_TICKET_TTL,
    }
  }

  pub async fn get_ticket(&self, input: &str, hint: Option<Platform>) -> Result<GenericTicket, TicketError> {
    let options = GetOptions {
      hint,
      ..GetOptions::default()
    };
    self.get_ticket_with(input, &options).await.map(|r| r.data)
  }

  /// Full lookup, reporting whether the ticket came from the cache, a fresh
  /// fetch, or a concurrent fetch this call joined.
  pub async fn get_ticket_with(
    &self,
    input: &str,
    options: &GetOptions,
  ) -> Result<CacheResult<GenericTicket>, TicketError> {
    let (provider, key) = self.resolve(input, options.hint).await?;

    if !options.refresh {
      if let Some(ticket) = self.inner.cache.get(&key) {
        debug!(key = %key, "Cache hit");
        return Ok(CacheResult::from_cache(ticket));
      }
    }

    let (fetch, joined) = {
      let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
      if let Some(existing) = in_flight.get(&key) {
        (existing.clone(), true)
      } else {
        // A fetch may have completed between the first check and taking the lock.
        if !options.refresh {
          if let Some(ticket) = self.inner.cache.get(&key) {
            return Ok(CacheResult::from_cache(ticket));
          }
        }
        let fetch = self.start_fetch(provider, key.clone(), options.timeout);
        in_flight.insert(key.clone(), fetch.clone());
        (fetch, false)
      }
    };

    if joined {
      debug!(key = %key, "Joining in-flight fetch");
    }
    let ticket = fetch.await?;
    Ok(CacheResult::from_network(ticket, joined))
  }

  /// Drop the cached copy of the ticket `input` refers to.
  pub async fn invalidate(&self, input: &str, hint: Option<Platform>) -> Result<CacheKey, TicketError> {
    let (_, key) = self.resolve(input, hint).await?;
    self.inner.cache.invalidate(&key);
    info!(key = %key, "Invalidated cached ticket");
    Ok(key)
  }

  pub fn clear_cache(&self, platform: Option<Platform>) {
    match platform {
      Some(platform) => self.inner.cache.clear_platform(platform),
      None => self.inner.cache.clear(),
    }
    info!(platform = ?platform, "Cleared ticket cache");
  }

  /// The cached entry for `input`, without fetching.
  pub async fn peek(&self, input: &str, hint: Option<Platform>) -> Result<Option<CacheEntry>, TicketError> {
    let (_, key) = self.resolve(input, hint).await?;
    Ok(self.inner.cache.get_entry(&key))
  }

  pub fn detect(&self, input: &str) -> Vec<Detection> {
    self.inner.detector.detect(input)
  }

  pub fn platforms(&self) -> Vec<Platform> {
    self.inner.detector.platforms()
  }

  /// Live cache entries, least recently used first.
  pub fn cached_entries(&self) -> Vec<CacheEntry> {
    let cache = &self.inner.cache;
    cache.keys().iter().filter_map(|key| cache.get_entry(key)).collect()
  }

  /// Settle the platform for `input` and parse it into a cache key.
  async fn resolve(
    &self,
    input: &str,
    hint: Option<Platform>,
  ) -> Result<(Arc<dyn TicketProvider>, CacheKey), TicketError> {
    let input = input.trim();
    let platform = match hint {
      Some(platform) => platform,
      None => self.choose_platform(input).await?,
    };

    let provider = self
      .inner
      .providers
      .get(platform)
      .ok_or_else(|| TicketError::unsupported(input, format!("no provider registered for {}", platform)))?;
    let ticket_id = provider.parse_input(input)?;
    Ok((provider, CacheKey::new(platform, ticket_id)))
  }

  async fn choose_platform(&self, input: &str) -> Result<Platform, TicketError> {
    let candidates = self.inner.detector.candidates(input);
    match candidates.as_slice() {
      [] => Err(TicketError::unsupported(input, "no known platform recognizes this input")),
      [only] => Ok(*only),
      _ => match self.inner.default_platform.filter(|p| candidates.contains(p)) {
        Some(platform) => {
          debug!(input, %platform, "Ambiguous input resolved by default platform");
          Ok(platform)
        }
        None => self.inner.disambiguator.choose(&candidates, input).await,
      },
    }
  }

  /// Shared future that fetches, normalizes and stores one ticket, then
  /// removes itself from the in-flight table.
  fn start_fetch(&self, provider: Arc<dyn TicketProvider>, key: CacheKey, timeout: Option<Duration>) -> InFlight {
    let inner = self.inner.clone();
    async move {
      let result = inner.fetch_and_store(provider.as_ref(), &key, timeout).await;
      inner
        .in_flight
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&key);
      result
    }
    .boxed()
    .shared()
  }
}

impl Inner {
  async fn fetch_and_store(
    &self,
    provider: &dyn TicketProvider,
    key: &CacheKey,
    timeout: Option<Duration>,
  ) -> Result<GenericTicket, TicketError> {
    let outcome = self
      .strategy
      .fetch(FetchRequest {
        ticket_id: &key.ticket_id,
        platform: key.platform,
        required_fields: provider.required_fields(),
        timeout,
      })
      .await?;

    let ticket = provider.normalize(&outcome.payload)?;
    let validator = str_at(&outcome.payload, "etag").or_else(|| str_at(&outcome.payload, "_etag"));

    // Lookups go through the requested key, so the ticket must be filed under it.
    let ticket = if ticket.id() == &key.ticket_id {
      ticket
    } else {
      warn!(requested = %key, returned = %ticket.id(), "Fetched ticket id differs from the requested one");
      ticket.with_id(key.ticket_id.clone())
    };
    self.cache.set(ticket.clone(), Some(self.ttl), validator);

    info!(
      key = %key,
      fetcher = %outcome.fetcher,
      used_fallback = outcome.used_fallback,
      "Fetched ticket"
    );
    Ok(ticket)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryCache};
  use crate::error::FetchError;
  use crate::fetch::TicketFetcher;
  use crate::platform::PlatformCatalog;
  use crate::testing::{payload, CountingDisambiguator, FakeFetcher};
  use crate::ticket::payload::RawPayload;
  use crate::ticket::{TicketStatus, TicketType};
  use serde_json::json;

  const LINEAR_URL: &str = "https://linear.app/acme/issue/ENG-42/fix-crash";

  fn linear_payload() -> RawPayload {
    payload(json!({
      "identifier": "ENG-42",
      "title": "Fix crash",
      "state": {"name": "In Progress", "type": "started"},
      "labels": {"nodes": [{"name": "Bug"}]},
      "_etag": "W/\"v1\""
    }))
  }

  struct Harness {
    service: TicketService,
    primary: Arc<FakeFetcher>,
    fallback: Arc<FakeFetcher>,
    disambiguator: Arc<CountingDisambiguator>,
  }

  fn harness(primary: FakeFetcher, fallback: FakeFetcher, disambiguator: CountingDisambiguator) -> Harness {
    let primary = Arc::new(primary);
    let fallback = Arc::new(fallback);
    let disambiguator = Arc::new(disambiguator);
    let detector = PlatformDetector::new(Arc::new(PlatformCatalog::builtin().unwrap()));
    let strategy = FetchStrategy::new(
      Some(primary.clone() as Arc<dyn TicketFetcher>),
      Some(fallback.clone() as Arc<dyn TicketFetcher>),
    );
    let service = TicketService::builder(
      detector,
      Arc::new(ProviderRegistry::builtin().unwrap()),
      Arc::new(MemoryCache::new(DEFAULT_TICKET_TTL, Some(16))),
      strategy,
    )
    .disambiguator(disambiguator.clone())
    .build();
    Harness {
      service,
      primary,
      fallback,
      disambiguator,
    }
  }

  fn simple() -> Harness {
    harness(
      FakeFetcher::ok("direct", linear_payload()),
      FakeFetcher::ok("agent", linear_payload()),
      CountingDisambiguator::refusing(),
    )
  }

  fn transient(name: &str) -> FetchError {
    FetchError::Transient {
      fetcher: name.into(),
      message: "unavailable".into(),
    }
  }

  #[tokio::test]
  async fn test_second_lookup_is_served_from_cache() {
    let h = simple();
    let first = h.service.get_ticket_with(LINEAR_URL, &GetOptions::default()).await.unwrap();
    let second = h.service.get_ticket_with(LINEAR_URL, &GetOptions::default()).await.unwrap();

    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(first.data, second.data);
    assert_eq!(h.primary.calls(), 1);
    assert_eq!(h.fallback.calls(), 0);
  }

  #[tokio::test]
  async fn test_linear_end_to_end() {
    let h = harness(
      FakeFetcher::err("direct", transient("direct")),
      FakeFetcher::ok("agent", linear_payload()),
      CountingDisambiguator::refusing(),
    );
    let ticket = h.service.get_ticket(LINEAR_URL, None).await.unwrap();

    assert_eq!(ticket.platform(), Platform::Linear);
    assert_eq!(ticket.id().as_str(), "ENG-42");
    assert_eq!(ticket.status(), TicketStatus::InProgress);
    assert_eq!(ticket.ticket_type(), TicketType::Bug);
    assert_eq!(h.primary.calls(), 1);
    assert_eq!(h.fallback.calls(), 1);

    let entry = h.service.peek("ENG-42", Some(Platform::Linear)).await.unwrap().unwrap();
    assert_eq!(entry.ticket, ticket);
    assert_eq!(entry.validator.as_deref(), Some("W/\"v1\""));
  }

  #[tokio::test]
  async fn test_primary_without_coverage_is_skipped() {
    let h = harness(
      FakeFetcher::ok("direct", linear_payload()).only(&[Platform::Jira]),
      FakeFetcher::ok("agent", linear_payload()),
      CountingDisambiguator::refusing(),
    );
    h.service.get_ticket(LINEAR_URL, None).await.unwrap();
    assert_eq!(h.primary.calls(), 0);
    assert_eq!(h.fallback.calls(), 1);
  }

  #[tokio::test]
  async fn test_ambiguous_id_asks_once() {
    let h = harness(
      FakeFetcher::ok("direct", linear_payload()),
      FakeFetcher::ok("agent", linear_payload()),
      CountingDisambiguator::choosing(Platform::Linear),
    );
    let ticket = h.service.get_ticket("ENG-42", None).await.unwrap();
    assert_eq!(ticket.platform(), Platform::Linear);
    assert_eq!(h.disambiguator.calls(), 1);
  }

  #[tokio::test]
  async fn test_url_input_never_asks() {
    let h = harness(
      FakeFetcher::ok("direct", linear_payload()),
      FakeFetcher::ok("agent", linear_payload()),
      CountingDisambiguator::choosing(Platform::Jira),
    );
    let ticket = h.service.get_ticket(LINEAR_URL, None).await.unwrap();
    assert_eq!(ticket.platform(), Platform::Linear);
    assert_eq!(h.disambiguator.calls(), 0);
  }

  #[tokio::test]
  async fn test_default_platform_resolves_ambiguity() {
    let primary = Arc::new(FakeFetcher::ok("direct", linear_payload()));
    let disambiguator = Arc::new(CountingDisambiguator::refusing());
    let service = TicketService::builder(
      PlatformDetector::new(Arc::new(PlatformCatalog::builtin().unwrap())),
      Arc::new(ProviderRegistry::builtin().unwrap()),
      Arc::new(MemoryCache::new(DEFAULT_TICKET_TTL, None)),
      FetchStrategy::new(Some(primary as Arc<dyn TicketFetcher>), None),
    )
    .disambiguator(disambiguator.clone())
    .default_platform(Some(Platform::Linear))
    .build();

    let ticket = service.get_ticket("eng-42", None).await.unwrap();
    assert_eq!(ticket.platform(), Platform::Linear);
    assert_eq!(disambiguator.calls(), 0);
  }

  #[tokio::test]
  async fn test_cancelled_disambiguation_is_ambiguous() {
    let h = simple();
    match h.service.get_ticket("ENG-42", None).await.unwrap_err() {
      TicketError::Ambiguous { candidates, .. } => {
        assert_eq!(candidates, vec![Platform::Jira, Platform::Linear]);
      }
      other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.disambiguator.calls(), 1);
    assert_eq!(h.primary.calls(), 0);
  }

  #[tokio::test]
  async fn test_unrecognized_input_is_unsupported() {
    let h = simple();
    assert!(matches!(
      h.service.get_ticket("just some words", None).await,
      Err(TicketError::Unsupported { .. })
    ));
  }

  #[tokio::test]
  async fn test_hint_skips_detection_but_still_parses() {
    let h = simple();
    assert!(matches!(
      h.service.get_ticket("ENG-42", Some(Platform::Github)).await,
      Err(TicketError::Parse { platform: Platform::Github, .. })
    ));
    assert_eq!(h.disambiguator.calls(), 0);
    assert_eq!(h.primary.calls(), 0);
  }

  #[tokio::test]
  async fn test_refresh_bypasses_cache_and_restores() {
    let h = simple();
    h.service.get_ticket(LINEAR_URL, None).await.unwrap();
    let refreshed = h
      .service
      .get_ticket_with(
        LINEAR_URL,
        &GetOptions {
          refresh: true,
          ..GetOptions::default()
        },
      )
      .await
      .unwrap();
    assert_eq!(refreshed.source, CacheSource::Network);
    assert_eq!(h.primary.calls(), 2);
    assert!(h.service.peek(LINEAR_URL, None).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_invalidate_and_clear() {
    let h = simple();
    h.service.get_ticket(LINEAR_URL, None).await.unwrap();

    let key = h.service.invalidate(LINEAR_URL, None).await.unwrap();
    assert_eq!(key.to_string(), "LINEAR:ENG-42");
    assert!(h.service.peek(LINEAR_URL, None).await.unwrap().is_none());

    h.service.get_ticket(LINEAR_URL, None).await.unwrap();
    assert_eq!(h.primary.calls(), 2);
    assert_eq!(h.service.cached_entries().len(), 1);

    h.service.clear_cache(Some(Platform::Jira));
    assert_eq!(h.service.cached_entries().len(), 1);
    h.service.clear_cache(None);
    assert!(h.service.cached_entries().is_empty());
  }

  #[tokio::test]
  async fn test_failed_fetch_is_not_cached() {
    let h = harness(
      FakeFetcher::err("direct", transient("direct")),
      FakeFetcher::err("agent", transient("agent")),
      CountingDisambiguator::refusing(),
    );
    assert!(matches!(
      h.service.get_ticket(LINEAR_URL, None).await,
      Err(TicketError::Fetch { fallback_attempted: true, .. })
    ));
    assert!(h.service.cached_entries().is_empty());
    assert!(h.service.inner.in_flight.lock().unwrap().is_empty());
  }

  fn github_payload(html_url: &str) -> RawPayload {
    payload(json!({"number": 12, "title": "Crash", "state": "open", "html_url": html_url}))
  }

  async fn lookup_three_times(h: &Harness, input: &str) -> Vec<GenericTicket> {
    let mut tickets = Vec::new();
    for _ in 0..3 {
      tickets.push(h.service.get_ticket(input, None).await.unwrap());
    }
    tickets
  }

  #[tokio::test]
  async fn test_owner_case_does_not_defeat_cache() {
    let body = github_payload("https://github.com/acme/widgets/issues/12");
    let h = harness(
      FakeFetcher::ok("direct", body.clone()),
      FakeFetcher::ok("agent", body),
      CountingDisambiguator::refusing(),
    );
    let tickets = lookup_three_times(&h, "Acme/Widgets#12").await;
    assert_eq!(h.primary.calls(), 1);
    assert_eq!(tickets[2].id().as_str(), "acme/widgets#12");
    assert!(h.service.peek("https://github.com/ACME/widgets/issues/12", None).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_ticket_is_filed_under_requested_id() {
    // Transferred issue: the payload names its new repository.
    let body = github_payload("https://github.com/acme/gadgets/issues/12");
    let h = harness(
      FakeFetcher::ok("direct", body.clone()),
      FakeFetcher::ok("agent", body),
      CountingDisambiguator::refusing(),
    );
    let tickets = lookup_three_times(&h, "acme/widgets#12").await;
    assert_eq!(h.primary.calls(), 1);
    assert_eq!(tickets[0].id().as_str(), "acme/widgets#12");
    assert_eq!(h.service.cached_entries().len(), 1);
  }

  #[tokio::test]
  async fn test_trello_payload_without_short_link_is_rejected() {
    let body = payload(json!({"id": "5f1a00000000000000000000", "name": "Fix login"}));
    let h = harness(
      FakeFetcher::ok("direct", body.clone()),
      FakeFetcher::ok("agent", body),
      CountingDisambiguator::refusing(),
    );
    assert!(matches!(
      h.service.get_ticket("https://trello.com/c/AbCd1234/17-fix-login", None).await,
      Err(TicketError::Fetch { .. })
    ));
    assert!(h.service.cached_entries().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_misses_share_one_fetch() {
    let h = harness(
      FakeFetcher::ok("direct", linear_payload()).delayed(Duration::from_millis(200)),
      FakeFetcher::ok("agent", linear_payload()),
      CountingDisambiguator::refusing(),
    );

    let lookups = (0..5).map(|_| {
      let service = h.service.clone();
      async move { service.get_ticket_with(LINEAR_URL, &GetOptions::default()).await }
    });
    let results = futures::future::join_all(lookups).await;

    let sources: Vec<CacheSource> = results.into_iter().map(|r| r.unwrap().source).collect();
    assert_eq!(sources.iter().filter(|s| **s == CacheSource::Network).count(), 1);
    assert_eq!(sources.iter().filter(|s| **s == CacheSource::Shared).count(), 4);
    assert_eq!(h.primary.calls(), 1);
    assert!(h.service.inner.in_flight.lock().unwrap().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_call_timeout_overrides_fetcher_default() {
    let h = harness(
      FakeFetcher::ok("direct", linear_payload()).delayed(Duration::from_secs(30)),
      FakeFetcher::ok("agent", linear_payload()),
      CountingDisambiguator::refusing(),
    );
    let result = h
      .service
      .get_ticket_with(
        LINEAR_URL,
        &GetOptions {
          timeout: Some(Duration::from_secs(1)),
          ..GetOptions::default()
        },
      )
      .await
      .unwrap();
    assert_eq!(result.data.id().as_str(), "ENG-42");
    assert_eq!(h.fallback.calls(), 1);
  }
}
