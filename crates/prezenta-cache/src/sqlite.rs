//! SQLite-backed cache store.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use prezenta_net::ResponseType;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, trace};

use crate::{CacheEntry, CacheError, CacheKey, CacheStore, Result};

/// Database schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Cache sets persisted in a SQLite database.
///
/// Every query runs on tokio's blocking pool, one at a time behind the
/// connection lock.
pub struct SqliteCacheStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCacheStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::Storage(format!(
                    "Failed to create cache directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened cache database");
        Self::with_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` against the connection off the async executor.
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| CacheError::Storage("connection lock poisoned".to_string()))?;
            op(&mut conn)
        })
        .await
        .map_err(|e| CacheError::Storage(format!("cache task failed: {e}")))?
    }
}

impl CacheStore for SqliteCacheStore {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        let name = name.to_string();
        self.run(move |conn| ensure_set(conn, &name)).boxed()
    }

    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>> {
        let name = name.to_string();
        self.run(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM cache_sets WHERE name = ?1",
                    params![name],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .boxed()
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM cache_sets ORDER BY rowid")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(names)
        })
        .boxed()
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>> {
        let name = name.to_string();
        self.run(move |conn| {
            let removed =
                conn.execute("DELETE FROM cache_sets WHERE name = ?1", params![name])?;
            if removed > 0 {
                debug!(cache = %name, "Deleted cache set");
            }
            Ok(removed > 0)
        })
        .boxed()
    }

    fn match_entry<'a>(
        &'a self,
        name: &'a str,
        key: &'a CacheKey,
    ) -> BoxFuture<'a, Result<Option<CacheEntry>>> {
        let name = name.to_string();
        let key = key.clone();
        self.run(move |conn| find_entry(conn, &name, &key)).boxed()
    }

    fn put<'a>(
        &'a self,
        name: &'a str,
        key: CacheKey,
        entry: CacheEntry,
    ) -> BoxFuture<'a, Result<()>> {
        self.put_all(name, vec![(key, entry)])
    }

    fn put_all<'a>(
        &'a self,
        name: &'a str,
        entries: Vec<(CacheKey, CacheEntry)>,
    ) -> BoxFuture<'a, Result<()>> {
        let name = name.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            ensure_set(&tx, &name)?;
            for (key, entry) in &entries {
                upsert_entry(&tx, &name, key, entry)?;
            }
            tx.commit()?;
            Ok(())
        })
        .boxed()
    }

    fn entry_keys<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<CacheKey>>> {
        let name = name.to_string();
        self.run(move |conn| {
            let mut stmt = conn
                .prepare("SELECT url FROM cache_entries WHERE cache_name = ?1 ORDER BY rowid")?;
            let keys = stmt
                .query_map(params![name], |row| row.get::<_, String>(0))?
                .map(|url| url.map(CacheKey::from_stored))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .boxed()
    }
}

/// Raw columns of a `cache_entries` row.
struct StoredRow {
    url: String,
    status: u16,
    status_text: String,
    headers: String,
    response_type: String,
    body: Vec<u8>,
    cached_at: i64,
}

impl StoredRow {
    fn into_entry(self) -> Result<CacheEntry> {
        let corrupt = |reason: String| CacheError::Corrupt {
            url: self.url.clone(),
            reason,
        };
        let response_type: ResponseType = self
            .response_type
            .parse()
            .map_err(|e: prezenta_net::NetError| corrupt(e.to_string()))?;
        let cached_at: DateTime<Utc> = DateTime::from_timestamp_millis(self.cached_at)
            .ok_or_else(|| corrupt(format!("bad timestamp {}", self.cached_at)))?;
        let headers: Vec<(String, Vec<u8>)> = serde_json::from_str(&self.headers)?;

        Ok(CacheEntry {
            url: self.url,
            status: self.status,
            status_text: self.status_text,
            headers,
            response_type,
            body: self.body,
            cached_at,
        })
    }
}

fn find_entry(conn: &Connection, name: &str, key: &CacheKey) -> Result<Option<CacheEntry>> {
    let row = conn
        .query_row(
            "SELECT url, status, status_text, headers, response_type, body, cached_at
             FROM cache_entries WHERE cache_name = ?1 AND url = ?2",
            params![name, key.as_str()],
            |row| {
                Ok(StoredRow {
                    url: row.get(0)?,
                    status: row.get(1)?,
                    status_text: row.get(2)?,
                    headers: row.get(3)?,
                    response_type: row.get(4)?,
                    body: row.get(5)?,
                    cached_at: row.get(6)?,
                })
            },
        )
        .optional()?;

    trace!(cache = name, url = %key, hit = row.is_some(), "Cache lookup");
    row.map(StoredRow::into_entry).transpose()
}

fn ensure_set(conn: &Connection, name: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO cache_sets (name, created_at) VALUES (?1, ?2)",
        params![name, Utc::now().timestamp_millis()],
    )?;
    Ok(())
}

/// Insert or overwrite an entry in place, so the key keeps its position.
fn upsert_entry(conn: &Connection, name: &str, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
    let headers = serde_json::to_string(&entry.headers)?;
    conn.execute(
        "INSERT INTO cache_entries
            (cache_name, url, status, status_text, headers, response_type, body, cached_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT (cache_name, url) DO UPDATE SET
            status = excluded.status,
            status_text = excluded.status_text,
            headers = excluded.headers,
            response_type = excluded.response_type,
            body = excluded.body,
            cached_at = excluded.cached_at",
        params![
            name,
            key.as_str(),
            entry.status,
            entry.status_text,
            headers,
            entry.response_type.as_str(),
            entry.body,
            entry.cached_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

/// Create the schema if the database is new.
fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version INTEGER NOT NULL,
            applied_at INTEGER NOT NULL
        );
        "#,
    )?;

    let version: i32 = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);

    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS cache_sets (
            name TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cache_entries (
            cache_name TEXT NOT NULL REFERENCES cache_sets(name) ON DELETE CASCADE,
            url TEXT NOT NULL,
            status INTEGER NOT NULL,
            status_text TEXT NOT NULL,
            headers TEXT NOT NULL,
            response_type TEXT NOT NULL,
            body BLOB NOT NULL,
            cached_at INTEGER NOT NULL,
            PRIMARY KEY (cache_name, url)
        );
        "#,
    )?;

    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
        params![SCHEMA_VERSION, Utc::now().timestamp()],
    )?;

    Ok(())
}
