//! Ticket cache: TTL expiry, optional LRU bound, and interchangeable backends.
//!
//! - `MemoryCache` keeps entries in process memory
//! - `SqliteStorage` persists one JSON entry per key so restarts keep warm entries
//! - `NoopCache` disables caching entirely

mod memory;
mod storage;
mod traits;

pub use memory::MemoryCache;
pub use storage::{NoopCache, SqliteStorage};
pub use traits::{CacheEntry, CacheKey, CacheResult, CacheSource, TicketCache};
