//! # Prezenta Cache
//!
//! Named, versioned cache sets of response snapshots.
//!
//! ## Architecture
//!
//! ```text
//! CacheStore (open / keys / delete)
//!     └── cache set "Sistem-prezena-1"
//!             └── CacheKey (GET url) → CacheEntry (status, headers, body)
//! ```
//!
//! Two backends implement [`CacheStore`]: [`MemoryCacheStore`] for the
//! lifetime of the process and [`SqliteCacheStore`] for cache sets that
//! survive restarts.

use futures::future::BoxFuture;
use thiserror::Error;

pub mod entry;
pub mod memory;
pub mod sqlite;

pub use entry::{CacheEntry, CacheKey};
pub use memory::MemoryCacheStore;
pub use sqlite::SqliteCacheStore;

// ==================== Errors ====================

/// Errors that can occur in cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Unsupported request method for caching: {0}")]
    UnsupportedMethod(String),

    #[error("Failed to read response body: {0}")]
    Body(#[from] prezenta_net::NetError),

    #[error("Corrupt cache entry for {url}: {reason}")]
    Corrupt { url: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

// ==================== Store ====================

/// Key-value store of name-scoped cache sets.
///
/// Writes to a set that does not exist yet create it, the same way
/// [`CacheStore::open`] does. Concurrent writes to one key are
/// last-write-wins.
pub trait CacheStore: Send + Sync {
    /// Open a cache set, creating it if missing.
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Check whether a cache set exists.
    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Names of all cache sets, in creation order.
    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Delete a cache set and all of its entries. Returns whether it existed.
    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Look up an entry in one cache set.
    fn match_entry<'a>(
        &'a self,
        name: &'a str,
        key: &'a CacheKey,
    ) -> BoxFuture<'a, Result<Option<CacheEntry>>>;

    /// Store an entry, replacing any previous entry for the key.
    fn put<'a>(&'a self, name: &'a str, key: CacheKey, entry: CacheEntry)
        -> BoxFuture<'a, Result<()>>;

    /// Store several entries at once; either all of them land or none do.
    fn put_all<'a>(
        &'a self,
        name: &'a str,
        entries: Vec<(CacheKey, CacheEntry)>,
    ) -> BoxFuture<'a, Result<()>>;

    /// Keys stored in a cache set, in insertion order. Empty if the set is
    /// missing.
    fn entry_keys<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<CacheKey>>>;
}
