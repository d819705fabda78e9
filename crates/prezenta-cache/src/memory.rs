//! In-process cache store.

use futures::future::BoxFuture;
use futures::FutureExt;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::trace;

use crate::{CacheEntry, CacheKey, CacheStore, Result};

/// One cache set.
#[derive(Debug, Default)]
struct Cache {
    /// Creation sequence number, orders `keys()`.
    seq: u64,

    /// Insertion order of keys.
    order: Vec<CacheKey>,

    /// Cached entries.
    entries: HashMap<CacheKey, CacheEntry>,
}

impl Cache {
    fn new(seq: u64) -> Self {
        Self {
            seq,
            ..Default::default()
        }
    }

    fn match_entry(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    fn put(&mut self, key: CacheKey, entry: CacheEntry) {
        if self.entries.insert(key.clone(), entry).is_none() {
            self.order.push(key);
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    next_seq: u64,
    caches: HashMap<String, Cache>,
}

impl Inner {
    fn open(&mut self, name: &str) -> &mut Cache {
        let next_seq = &mut self.next_seq;
        self.caches.entry(name.to_string()).or_insert_with(|| {
            *next_seq += 1;
            Cache::new(*next_seq)
        })
    }
}

/// Cache sets kept in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    inner: RwLock<Inner>,
}

impl MemoryCacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCacheStore {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            self.inner.write().await.open(name);
            Ok(())
        }
        .boxed()
    }

    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>> {
        async move { Ok(self.inner.read().await.caches.contains_key(name)) }.boxed()
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        async move {
            let inner = self.inner.read().await;
            let mut names: Vec<(&String, u64)> =
                inner.caches.iter().map(|(name, c)| (name, c.seq)).collect();
            names.sort_by_key(|(_, seq)| *seq);
            Ok(names.into_iter().map(|(name, _)| name.clone()).collect())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>> {
        async move { Ok(self.inner.write().await.caches.remove(name).is_some()) }.boxed()
    }

    fn match_entry<'a>(
        &'a self,
        name: &'a str,
        key: &'a CacheKey,
    ) -> BoxFuture<'a, Result<Option<CacheEntry>>> {
        async move {
            let inner = self.inner.read().await;
            let entry = inner
                .caches
                .get(name)
                .and_then(|cache| cache.match_entry(key))
                .cloned();
            trace!(cache = name, url = %key, hit = entry.is_some(), "Cache lookup");
            Ok(entry)
        }
        .boxed()
    }

    fn put<'a>(
        &'a self,
        name: &'a str,
        key: CacheKey,
        entry: CacheEntry,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            self.inner.write().await.open(name).put(key, entry);
            Ok(())
        }
        .boxed()
    }

    fn put_all<'a>(
        &'a self,
        name: &'a str,
        entries: Vec<(CacheKey, CacheEntry)>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut inner = self.inner.write().await;
            let cache = inner.open(name);
            for (key, entry) in entries {
                cache.put(key, entry);
            }
            Ok(())
        }
        .boxed()
    }

    fn entry_keys<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<CacheKey>>> {
        async move {
            Ok(self
                .inner
                .read()
                .await
                .caches
                .get(name)
                .map(|cache| cache.order.clone())
                .unwrap_or_default())
        }
        .boxed()
    }
}
