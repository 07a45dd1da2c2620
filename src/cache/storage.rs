//! Persistent SQLite cache backend and the no-op backend.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use super::traits::{CacheEntry, CacheKey, TicketCache};
use crate::platform::Platform;
use crate::ticket::{GenericTicket, TicketId};

/// Cache backend that never stores anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopCache;

impl TicketCache for NoopCache {
  fn get(&self, _key: &CacheKey) -> Option<GenericTicket> {
    None // Always miss
  }

  fn get_entry(&self, _key: &CacheKey) -> Option<CacheEntry> {
    None
  }

  fn set(&self, _ticket: GenericTicket, _ttl: Option<Duration>, _validator: Option<String>) {
    // Discard
  }

  fn invalidate(&self, _key: &CacheKey) {}

  fn clear(&self) {}

  fn clear_platform(&self, _platform: Platform) {}

  fn size(&self) -> usize {
    0
  }

  fn keys(&self) -> Vec<CacheKey> {
    Vec::new()
  }
}

/// SQLite-based cache storage, one JSON-serialized entry per row.
///
/// Unreadable rows are deleted and reported as misses. Storage errors are
/// logged and never surface to callers.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  default_ttl: Duration,
  max_entries: Option<usize>,
}

/// Schema for the cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ticket_cache (
    platform TEXT NOT NULL,
    ticket_id TEXT NOT NULL,
    data BLOB NOT NULL,
    validator TEXT,
    cached_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    last_used INTEGER NOT NULL,
    PRIMARY KEY (platform, ticket_id)
);

CREATE INDEX IF NOT EXISTS idx_ticket_cache_last_used ON ticket_cache(last_used);
CREATE INDEX IF NOT EXISTS idx_ticket_cache_expires ON ticket_cache(expires_at);
"#;

impl SqliteStorage {
  /// Open (or create) the cache database. `None` uses the default location.
  pub fn open(
    path: Option<&Path>,
    default_ttl: Duration,
    max_entries: Option<usize>,
  ) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
      default_ttl,
      max_entries: max_entries.filter(|m| *m > 0),
    };
    storage.run_migrations()?;

    debug!(path = %path.display(), "Opened ticket cache");
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tix").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn load(&self, key: &CacheKey, touch: bool) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;
    let platform = key.platform.as_str();
    let ticket_id = key.ticket_id.as_str();

    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM ticket_cache WHERE platform = ? AND ticket_id = ?",
        params![platform, ticket_id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key, e))?;

    let Some(data) = data else {
      return Ok(None);
    };

    let entry = match serde_json::from_slice::<CacheEntry>(&data) {
      Ok(entry) if entry.key() == *key => entry,
      Ok(entry) => {
        warn!(%key, stored = %entry.key(), "Cache row holds a different ticket, deleting");
        delete_row(&conn, key)?;
        return Ok(None);
      }
      Err(e) => {
        warn!(%key, error = %e, "Corrupt cache row, deleting");
        delete_row(&conn, key)?;
        return Ok(None);
      }
    };

    if entry.is_expired(Utc::now()) {
      debug!(%key, "Dropped expired ticket");
      delete_row(&conn, key)?;
      return Ok(None);
    }

    if touch {
      let tick = next_tick(&conn)?;
      conn
        .execute(
          "UPDATE ticket_cache SET last_used = ? WHERE platform = ? AND ticket_id = ?",
          params![tick, platform, ticket_id],
        )
        .map_err(|e| eyre!("Failed to update cache recency: {}", e))?;
    }

    Ok(Some(entry))
  }

  fn store(&self, entry: &CacheEntry) -> Result<()> {
    let mut conn = self.lock()?;
    let key = entry.key();
    let data =
      serde_json::to_vec(entry).map_err(|e| eyre!("Failed to serialize cache entry: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let tick = next_tick(&tx)?;
    tx.execute(
      "INSERT OR REPLACE INTO ticket_cache
         (platform, ticket_id, data, validator, cached_at, expires_at, last_used)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        key.platform.as_str(),
        key.ticket_id.as_str(),
        data,
        entry.validator,
        format_time(entry.cached_at),
        format_time(entry.expires_at),
        tick
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    purge_expired(&tx)?;

    if let Some(max) = self.max_entries {
      let count: i64 = tx
        .query_row("SELECT COUNT(*) FROM ticket_cache", [], |row| row.get(0))
        .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;
      let excess = count - max as i64;
      if excess > 0 {
        let evicted = tx
          .execute(
            "DELETE FROM ticket_cache WHERE rowid IN
               (SELECT rowid FROM ticket_cache ORDER BY last_used ASC LIMIT ?)",
            params![excess],
          )
          .map_err(|e| eyre!("Failed to evict cache entries: {}", e))?;
        debug!(evicted, "Evicted least recently used tickets");
      }
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn execute(&self, sql: &str, platform: Option<Platform>) -> Result<()> {
    let conn = self.lock()?;
    let result = match platform {
      Some(p) => conn.execute(sql, params![p.as_str()]),
      None => conn.execute(sql, []),
    };
    result.map_err(|e| eyre!("Failed to update cache: {}", e))?;
    Ok(())
  }

  fn live_keys(&self) -> Result<Vec<CacheKey>> {
    let conn = self.lock()?;
    purge_expired(&conn)?;

    let mut stmt = conn
      .prepare("SELECT platform, ticket_id FROM ticket_cache ORDER BY last_used ASC")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
      })
      .map_err(|e| eyre!("Failed to list cache entries: {}", e))?
      .filter_map(|r| r.ok())
      .filter_map(|(platform, id)| {
        Some(CacheKey::new(platform.parse().ok()?, TicketId::new(id).ok()?))
      })
      .collect();

    Ok(keys)
  }
}

impl TicketCache for SqliteStorage {
  fn get(&self, key: &CacheKey) -> Option<GenericTicket> {
    self
      .load(key, true)
      .unwrap_or_else(|e| {
        warn!(%key, error = %e, "Cache read failed");
        None
      })
      .map(|entry| entry.ticket)
  }

  fn get_entry(&self, key: &CacheKey) -> Option<CacheEntry> {
    self.load(key, false).unwrap_or_else(|e| {
      warn!(%key, error = %e, "Cache read failed");
      None
    })
  }

  fn set(&self, ticket: GenericTicket, ttl: Option<Duration>, validator: Option<String>) {
    let entry = CacheEntry::new(ticket, ttl.unwrap_or(self.default_ttl), validator);
    if let Err(e) = self.store(&entry) {
      warn!(key = %entry.key(), error = %e, "Cache write failed");
    }
  }

  fn invalidate(&self, key: &CacheKey) {
    let result = self.lock().and_then(|conn| delete_row(&conn, key));
    if let Err(e) = result {
      warn!(%key, error = %e, "Cache invalidate failed");
    }
  }

  fn clear(&self) {
    if let Err(e) = self.execute("DELETE FROM ticket_cache", None) {
      warn!(error = %e, "Cache clear failed");
    }
  }

  fn clear_platform(&self, platform: Platform) {
    if let Err(e) = self.execute("DELETE FROM ticket_cache WHERE platform = ?", Some(platform)) {
      warn!(%platform, error = %e, "Cache clear failed");
    }
  }

  fn size(&self) -> usize {
    self.keys().len()
  }

  fn keys(&self) -> Vec<CacheKey> {
    self.live_keys().unwrap_or_else(|e| {
      warn!(error = %e, "Cache listing failed");
      Vec::new()
    })
  }
}

fn delete_row(conn: &Connection, key: &CacheKey) -> Result<()> {
  conn
    .execute(
      "DELETE FROM ticket_cache WHERE platform = ? AND ticket_id = ?",
      params![key.platform.as_str(), key.ticket_id.as_str()],
    )
    .map_err(|e| eyre!("Failed to delete cache entry {}: {}", key, e))?;
  Ok(())
}

fn purge_expired(conn: &Connection) -> Result<()> {
  conn
    .execute(
      "DELETE FROM ticket_cache WHERE expires_at < ?",
      params![format_time(Utc::now())],
    )
    .map_err(|e| eyre!("Failed to purge expired entries: {}", e))?;
  Ok(())
}

/// Monotonic recency counter.
fn next_tick(conn: &Connection) -> Result<i64> {
  conn
    .query_row(
      "SELECT COALESCE(MAX(last_used), 0) + 1 FROM ticket_cache",
      [],
      |row| row.get(0),
    )
    .map_err(|e| eyre!("Failed to read cache recency: {}", e))
}

/// Fixed-width UTC timestamps so string comparison orders them.
fn format_time(at: DateTime<Utc>) -> String {
  at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
