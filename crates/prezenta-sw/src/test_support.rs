//! Fakes shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use hashbrown::HashMap;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use prezenta_cache::{CacheEntry, CacheError, CacheKey, CacheStore, MemoryCacheStore};
use prezenta_common::WorkerConfig;
use prezenta_net::{Fetcher, NetError, Request, Response, ResponseType};
use tokio::sync::{mpsc, RwLock, Semaphore};
use url::Url;

use crate::{Clients, OfflineWorker, ServiceWorkerEvent};

pub fn config() -> WorkerConfig {
    WorkerConfig::for_origin(Url::parse("https://prezenta.example/").unwrap())
}

#[derive(Clone)]
struct Scripted {
    status: u16,
    body: String,
    response_type: ResponseType,
}

/// Fetcher answering from a per-path script. Unscripted paths get a 200
/// basic `page <path>` response.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<HashMap<String, Scripted>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, path: &str, status: u16, body: &str) {
        self.respond_typed(path, status, body, ResponseType::Basic);
    }

    pub fn respond_typed(&self, path: &str, status: u16, body: &str, ty: ResponseType) {
        self.script.lock().unwrap().insert(
            path.to_string(),
            Scripted {
                status,
                body: body.to_string(),
                response_type: ty,
            },
        );
    }

    /// Make every fetch reject as if there were no connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::RequestFailed("connection refused".to_string()));
        }

        let path = request.url.path().to_string();
        let scripted = self
            .script
            .lock()
            .unwrap()
            .get(&path)
            .cloned()
            .unwrap_or_else(|| Scripted {
                status: 200,
                body: format!("page {path}"),
                response_type: ResponseType::Basic,
            });

        Ok(Response::new(
            StatusCode::from_u16(scripted.status).unwrap(),
            scripted.body,
        )
        .with_header(CONTENT_TYPE, HeaderValue::from_static("text/html"))
        .with_url(request.url.clone())
        .with_type(scripted.response_type))
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        future::ready(self.answer(&request)).boxed()
    }
}

/// Store whose every operation fails.
pub struct FailingStore;

fn fail<'a, T: Send + 'a>() -> BoxFuture<'a, prezenta_cache::Result<T>> {
    future::ready(Err(CacheError::Storage("disk full".to_string()))).boxed()
}

impl CacheStore for FailingStore {
    fn open<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, prezenta_cache::Result<()>> {
        fail()
    }

    fn has<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, prezenta_cache::Result<bool>> {
        fail()
    }

    fn keys(&self) -> BoxFuture<'_, prezenta_cache::Result<Vec<String>>> {
        fail()
    }

    fn delete<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, prezenta_cache::Result<bool>> {
        fail()
    }

    fn match_entry<'a>(
        &'a self,
        _name: &'a str,
        _key: &'a CacheKey,
    ) -> BoxFuture<'a, prezenta_cache::Result<Option<CacheEntry>>> {
        fail()
    }

    fn put<'a>(
        &'a self,
        _name: &'a str,
        _key: CacheKey,
        _entry: CacheEntry,
    ) -> BoxFuture<'a, prezenta_cache::Result<()>> {
        fail()
    }

    fn put_all<'a>(
        &'a self,
        _name: &'a str,
        _entries: Vec<(CacheKey, CacheEntry)>,
    ) -> BoxFuture<'a, prezenta_cache::Result<()>> {
        fail()
    }

    fn entry_keys<'a>(
        &'a self,
        _name: &'a str,
    ) -> BoxFuture<'a, prezenta_cache::Result<Vec<CacheKey>>> {
        fail()
    }
}

/// Memory store whose single-entry writes wait until [`GatedStore::open_gate`]
/// lets them through. Batch writes and reads are not held.
pub struct GatedStore {
    inner: MemoryCacheStore,
    gate: Semaphore,
}

impl GatedStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryCacheStore::new(),
            gate: Semaphore::new(0),
        }
    }

    pub fn open_gate(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

impl CacheStore for GatedStore {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, prezenta_cache::Result<()>> {
        self.inner.open(name)
    }

    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, prezenta_cache::Result<bool>> {
        self.inner.has(name)
    }

    fn keys(&self) -> BoxFuture<'_, prezenta_cache::Result<Vec<String>>> {
        self.inner.keys()
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, prezenta_cache::Result<bool>> {
        self.inner.delete(name)
    }

    fn match_entry<'a>(
        &'a self,
        name: &'a str,
        key: &'a CacheKey,
    ) -> BoxFuture<'a, prezenta_cache::Result<Option<CacheEntry>>> {
        self.inner.match_entry(name, key)
    }

    fn put<'a>(
        &'a self,
        name: &'a str,
        key: CacheKey,
        entry: CacheEntry,
    ) -> BoxFuture<'a, prezenta_cache::Result<()>> {
        async move {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| CacheError::Storage(e.to_string()))?;
            self.inner.put(name, key, entry).await
        }
        .boxed()
    }

    fn put_all<'a>(
        &'a self,
        name: &'a str,
        entries: Vec<(CacheKey, CacheEntry)>,
    ) -> BoxFuture<'a, prezenta_cache::Result<()>> {
        self.inner.put_all(name, entries)
    }

    fn entry_keys<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, prezenta_cache::Result<Vec<CacheKey>>> {
        self.inner.entry_keys(name)
    }
}

/// Shared pieces a worker is built from.
pub struct Harness {
    pub store: Arc<dyn CacheStore>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub clients: Arc<RwLock<Clients>>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
    event_rx: mpsc::UnboundedReceiver<ServiceWorkerEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_parts(
            Arc::new(MemoryCacheStore::new()),
            Arc::new(ScriptedFetcher::new()),
        )
    }

    pub fn with_parts(store: Arc<dyn CacheStore>, fetcher: Arc<ScriptedFetcher>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            store,
            fetcher,
            clients: Arc::new(RwLock::new(Clients::new())),
            event_tx,
            event_rx,
        }
    }

    pub fn worker(&self, config: &WorkerConfig) -> OfflineWorker {
        OfflineWorker::new(
            config,
            Arc::clone(&self.store),
            self.fetcher.clone(),
            Arc::clone(&self.clients),
            self.event_tx.clone(),
        )
        .unwrap()
    }

    pub fn drain_events(&mut self) -> Vec<ServiceWorkerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }
}
