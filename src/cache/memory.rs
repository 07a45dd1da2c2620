//! In-memory TTL + LRU cache.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use tracing::debug;

use super::traits::{CacheEntry, CacheKey, TicketCache};
use crate::platform::Platform;
use crate::ticket::GenericTicket;

/// In-memory ticket cache.
///
/// Entries live in an `IndexMap` ordered by recency (front = least recently
/// used). The map and its ordering sit behind one mutex, so lookups, recency
/// updates and eviction are a single critical section.
pub struct MemoryCache {
  entries: Mutex<IndexMap<CacheKey, CacheEntry>>,
  default_ttl: Duration,
  max_entries: Option<usize>,
}

impl MemoryCache {
  /// `max_entries` of `None` or `Some(0)` means unbounded.
  pub fn new(default_ttl: Duration, max_entries: Option<usize>) -> Self {
    Self {
      entries: Mutex::new(IndexMap::new()),
      default_ttl,
      max_entries: max_entries.filter(|m| *m > 0),
    }
  }

  fn lock(&self) -> MutexGuard<'_, IndexMap<CacheKey, CacheEntry>> {
    // Every mutation is a single IndexMap call, so a poisoned map is still consistent.
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn evict(&self, map: &mut IndexMap<CacheKey, CacheEntry>) {
    let now = Utc::now();
    map.retain(|_, entry| !entry.is_expired(now));

    if let Some(max) = self.max_entries {
      while map.len() > max {
        if let Some((key, _)) = map.shift_remove_index(0) {
          debug!(%key, "Evicted least recently used ticket");
        }
      }
    }
  }
}

impl TicketCache for MemoryCache {
  fn get(&self, key: &CacheKey) -> Option<GenericTicket> {
    let mut map = self.lock();
    let idx = map.get_index_of(key)?;

    if map[idx].is_expired(Utc::now()) {
      map.shift_remove_index(idx);
      debug!(%key, "Dropped expired ticket");
      return None;
    }

    let last = map.len() - 1;
    map.move_index(idx, last);
    Some(map[last].ticket.clone())
  }

  fn get_entry(&self, key: &CacheKey) -> Option<CacheEntry> {
    let mut map = self.lock();
    let idx = map.get_index_of(key)?;

    if map[idx].is_expired(Utc::now()) {
      map.shift_remove_index(idx);
      return None;
    }

    Some(map[idx].clone())
  }

  fn set(&self, ticket: GenericTicket, ttl: Option<Duration>, validator: Option<String>) {
    let entry = CacheEntry::new(ticket, ttl.unwrap_or(self.default_ttl), validator);
    let key = entry.key();

    let mut map = self.lock();
    // Remove first so a re-set moves the key to the most-recent end.
    map.shift_remove(&key);
    map.insert(key, entry);
    self.evict(&mut map);
  }

  fn invalidate(&self, key: &CacheKey) {
    self.lock().shift_remove(key);
  }

  fn clear(&self) {
    self.lock().clear();
  }

  fn clear_platform(&self, platform: Platform) {
    self.lock().retain(|key, _| key.platform != platform);
  }

  fn size(&self) -> usize {
    let now = Utc::now();
    let mut map = self.lock();
    map.retain(|_, entry| !entry.is_expired(now));
    map.len()
  }

  fn keys(&self) -> Vec<CacheKey> {
    let now = Utc::now();
    let mut map = self.lock();
    map.retain(|_, entry| !entry.is_expired(now));
    map.keys().cloned().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::ticket;
  use std::sync::Arc;
  use std::thread;

  fn key(id: &str) -> CacheKey {
    CacheKey::for_ticket(&ticket(Platform::Jira, id))
  }

  #[test]
  fn test_get_before_and_after_ttl() {
    let cache = MemoryCache::new(Duration::from_secs(3600), None);
    cache.set(ticket(Platform::Jira, "A-1"), Some(Duration::from_millis(50)), None);

    assert_eq!(cache.get(&key("A-1")).unwrap().id().as_str(), "A-1");
    thread::sleep(Duration::from_millis(80));
    assert!(cache.get(&key("A-1")).is_none());
    assert_eq!(cache.size(), 0);
  }

  #[test]
  fn test_default_ttl_applies() {
    let cache = MemoryCache::new(Duration::from_millis(30), None);
    cache.set(ticket(Platform::Jira, "A-1"), None, None);
    assert!(cache.get_entry(&key("A-1")).is_some());
    thread::sleep(Duration::from_millis(60));
    assert!(cache.get_entry(&key("A-1")).is_none());
  }

  #[test]
  fn test_lru_evicts_least_recently_touched() {
    let cache = MemoryCache::new(Duration::from_secs(3600), Some(3));
    for id in ["A-1", "A-2", "A-3"] {
      cache.set(ticket(Platform::Jira, id), None, None);
    }
    cache.set(ticket(Platform::Jira, "A-4"), None, None);

    assert_eq!(cache.size(), 3);
    assert!(cache.get(&key("A-1")).is_none());
    assert!(cache.get(&key("A-2")).is_some());
  }

  #[test]
  fn test_get_protects_from_eviction() {
    let cache = MemoryCache::new(Duration::from_secs(3600), Some(3));
    for id in ["A-1", "A-2", "A-3"] {
      cache.set(ticket(Platform::Jira, id), None, None);
    }
    assert!(cache.get(&key("A-1")).is_some());
    cache.set(ticket(Platform::Jira, "A-4"), None, None);

    assert!(cache.get(&key("A-1")).is_some());
    assert!(cache.get(&key("A-2")).is_none());
    assert!(cache.get(&key("A-3")).is_some());
  }

  #[test]
  fn test_get_entry_does_not_refresh_recency() {
    let cache = MemoryCache::new(Duration::from_secs(3600), Some(2));
    cache.set(ticket(Platform::Jira, "A-1"), None, Some("etag-1".into()));
    cache.set(ticket(Platform::Jira, "A-2"), None, None);

    let entry = cache.get_entry(&key("A-1")).unwrap();
    assert_eq!(entry.validator.as_deref(), Some("etag-1"));

    cache.set(ticket(Platform::Jira, "A-3"), None, None);
    assert!(cache.get_entry(&key("A-1")).is_none());
  }

  #[test]
  fn test_reset_replaces_single_entry() {
    let cache = MemoryCache::new(Duration::from_secs(3600), None);
    cache.set(ticket(Platform::Jira, "A-1"), None, None);
    cache.set(ticket(Platform::Jira, "A-1").with_title("Renamed"), None, None);
    assert_eq!(cache.size(), 1);
    assert_eq!(cache.get(&key("A-1")).unwrap().title(), "Renamed");
  }

  #[test]
  fn test_invalidate_and_clear_platform() {
    let cache = MemoryCache::new(Duration::from_secs(3600), None);
    cache.set(ticket(Platform::Jira, "A-1"), None, None);
    cache.set(ticket(Platform::Jira, "A-2"), None, None);
    cache.set(ticket(Platform::Linear, "ENG-1"), None, None);

    cache.invalidate(&key("A-1"));
    assert_eq!(cache.size(), 2);

    cache.clear_platform(Platform::Jira);
    assert_eq!(
      cache.keys(),
      vec![CacheKey::for_ticket(&ticket(Platform::Linear, "ENG-1"))]
    );

    cache.clear();
    assert_eq!(cache.size(), 0);
  }

  #[test]
  fn test_concurrent_access_respects_bound() {
    let cache = Arc::new(MemoryCache::new(Duration::from_secs(3600), Some(16)));
    let handles: Vec<_> = (0..8)
      .map(|t| {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
          for i in 0..200 {
            let id = format!("T{}-{}", t, i % 40);
            cache.set(ticket(Platform::Jira, &id), None, None);
            cache.get(&CacheKey::for_ticket(&ticket(Platform::Jira, &id)));
          }
        })
      })
      .collect();
    for h in handles {
      h.join().unwrap();
    }
    assert_eq!(cache.size(), 16);
    assert_eq!(cache.keys().len(), 16);
  }
}
