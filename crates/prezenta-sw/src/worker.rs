//! The offline worker and its event handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::try_join_all;
use http::StatusCode;
use prezenta_cache::{CacheEntry, CacheKey, CacheStore};
use prezenta_common::WorkerConfig;
use prezenta_net::{Fetcher, Request, Response, ResponseType};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::{
    offline_response, Clients, ControlMessage, Result, ServiceWorkerError, ServiceWorkerEvent,
    WorkerId, WorkerState,
};

/// Where a fetch answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    /// Stored entry from the current cache set.
    Cache,
    /// Network response, whether or not it was cached.
    Network,
    /// Synthetic offline response.
    Offline,
    /// No active worker; the request went straight to the network.
    Passthrough,
}

/// Answer to an intercepted request.
#[derive(Debug)]
pub struct FetchOutcome {
    pub response: Response,
    pub source: FetchSource,
}

/// Result of the install handler.
#[derive(Debug)]
pub struct InstallReport {
    /// Manifest entries written to the cache set.
    pub cached: usize,
    /// Why population failed, if it did. Install still completes.
    pub error: Option<ServiceWorkerError>,
}

impl InstallReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of the activate handler.
#[derive(Debug, Default)]
pub struct ActivateReport {
    /// Cache sets deleted.
    pub deleted: Vec<String>,
    /// Clients taken over.
    pub claimed: Vec<String>,
    /// Cleanup failure, if any. Activation still completes.
    pub error: Option<ServiceWorkerError>,
}

/// One running instance of the offline worker, bound to a cache version.
pub struct OfflineWorker {
    id: WorkerId,
    version: String,
    scope: Url,
    manifest: Vec<Url>,
    skip_waiting_on_install: bool,
    claim_clients: bool,

    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<RwLock<Clients>>,

    state: RwLock<WorkerState>,
    skip_waiting: AtomicBool,

    /// Background cache writes. Locked only to spawn into or take the set.
    pending: Mutex<JoinSet<()>>,

    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl OfflineWorker {
    /// Create a worker for `config`.
    pub fn new(
        config: &WorkerConfig,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<RwLock<Clients>>,
        event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            id: WorkerId::new(),
            version: config.cache_version.clone(),
            scope: config.origin.clone(),
            manifest: config.manifest_urls()?,
            skip_waiting_on_install: config.skip_waiting_on_install,
            claim_clients: config.claim_clients,
            store,
            fetcher,
            clients,
            state: RwLock::new(WorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
            pending: Mutex::new(JoinSet::new()),
            event_tx,
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Name of the cache set this worker owns.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    pub(crate) async fn set_state(&self, state: WorkerState) {
        *self.state.write().await = state;
        debug!(worker = %self.id, version = %self.version, state = %state, "Worker state changed");
        let _ = self.event_tx.send(ServiceWorkerEvent::StateChange {
            worker_id: self.id,
            version: self.version.clone(),
            new_state: state,
        });
    }

    /// Ask to supersede the current active worker as soon as this one is
    /// installed.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    // ==================== Install ====================

    /// Pre-cache the manifest into the current cache set.
    ///
    /// Population is all-or-nothing and its failure is only reported: the
    /// worker always ends up installed.
    pub async fn install(&self) -> InstallReport {
        self.set_state(WorkerState::Installing).await;

        let report = match self.precache().await {
            Ok(cached) => {
                info!(cache = %self.version, cached, "Opened cache and stored manifest");
                InstallReport {
                    cached,
                    error: None,
                }
            }
            Err(e) => {
                warn!(cache = %self.version, error = %e, "Cache failed");
                InstallReport {
                    cached: 0,
                    error: Some(e),
                }
            }
        };

        self.set_state(WorkerState::Installed).await;
        if self.skip_waiting_on_install {
            self.skip_waiting();
        }
        report
    }

    async fn precache(&self) -> Result<usize> {
        self.store.open(&self.version).await?;

        let fetches = self.manifest.iter().map(|url| async move {
            let request = Request::get(url.clone());
            let key = CacheKey::for_request(&request)?;
            let response =
                self.fetcher
                    .fetch(request)
                    .await
                    .map_err(|e| ServiceWorkerError::Precache {
                        url: url.to_string(),
                        reason: e.to_string(),
                    })?;
            if !response.ok() {
                return Err(ServiceWorkerError::Precache {
                    url: url.to_string(),
                    reason: format!("status {}", response.status),
                });
            }
            let entry = CacheEntry::snapshot(&key, response).await?;
            Ok::<_, ServiceWorkerError>((key, entry))
        });

        let entries = try_join_all(fetches).await?;
        let cached = entries.len();
        self.store.put_all(&self.version, entries).await?;
        Ok(cached)
    }

    // ==================== Activate ====================

    /// Delete stale cache sets, then take over open clients.
    pub async fn activate(&self) -> ActivateReport {
        self.set_state(WorkerState::Activating).await;

        let mut report = ActivateReport::default();
        if let Err(e) = self.prune_caches(&mut report.deleted).await {
            warn!(cache = %self.version, error = %e, "Cache cleanup failed");
            report.error = Some(e);
        }

        if self.claim_clients {
            report.claimed = self.claim().await;
        }

        self.set_state(WorkerState::Activated).await;
        report
    }

    async fn prune_caches(&self, deleted: &mut Vec<String>) -> Result<()> {
        for name in self.store.keys().await? {
            if name == self.version {
                continue;
            }
            info!(cache = %name, "Deleting old cache");
            if self.store.delete(&name).await? {
                let _ = self
                    .event_tx
                    .send(ServiceWorkerEvent::CacheDeleted { name: name.clone() });
                deleted.push(name);
            }
        }
        Ok(())
    }

    /// Become the controller of every in-scope client.
    pub async fn claim(&self) -> Vec<String> {
        let claimed = self.clients.write().await.claim(self.id, &self.scope);
        for client_id in &claimed {
            let _ = self.event_tx.send(ServiceWorkerEvent::ControllerChange {
                client_id: client_id.clone(),
                worker_id: self.id,
            });
        }
        if !claimed.is_empty() {
            debug!(worker = %self.id, clients = claimed.len(), "Claimed clients");
        }
        claimed
    }

    // ==================== Fetch ====================

    /// Answer an intercepted request.
    pub async fn handle_fetch(&self, request: Request) -> Response {
        self.respond(request).await.response
    }

    /// Answer an intercepted request, reporting where the answer came from.
    pub async fn respond(&self, request: Request) -> FetchOutcome {
        if let Some(response) = self.lookup(&request).await {
            trace!(url = %request.url, "Serving from cache");
            return FetchOutcome {
                response,
                source: FetchSource::Cache,
            };
        }

        let network_request = request.clone();
        let response = match self.fetcher.fetch(network_request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Fetch failed");
                return FetchOutcome {
                    response: offline_response(),
                    source: FetchSource::Offline,
                };
            }
        };

        if !is_cacheable(&response) {
            debug!(
                url = %request.url,
                status = %response.status,
                response_type = %response.response_type,
                "Not caching response"
            );
            return FetchOutcome {
                response,
                source: FetchSource::Network,
            };
        }

        let response = match response.tee().await {
            Ok((response, copy)) => {
                self.store_in_background(&request, copy);
                response
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Fetch failed while reading body");
                return FetchOutcome {
                    response: offline_response(),
                    source: FetchSource::Offline,
                };
            }
        };

        FetchOutcome {
            response,
            source: FetchSource::Network,
        }
    }

    async fn lookup(&self, request: &Request) -> Option<Response> {
        let key = CacheKey::for_request(request).ok()?;
        let entry = match self.store.match_entry(&self.version, &key).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(url = %key, error = %e, "Cache lookup failed");
                return None;
            }
        };
        match entry.to_response() {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(url = %key, error = %e, "Ignoring unreadable cache entry");
                None
            }
        }
    }

    fn store_in_background(&self, request: &Request, copy: Response) {
        let key = match CacheKey::for_request(request) {
            Ok(key) => key,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache write failed");
                return;
            }
        };

        let store = Arc::clone(&self.store);
        let version = self.version.clone();
        let mut pending = self.pending();
        pending.spawn(async move {
            let result = match CacheEntry::snapshot(&key, copy).await {
                Ok(entry) => store.put(&version, key.clone(), entry).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => trace!(cache = %version, url = %key, "Cached response"),
                Err(e) => warn!(cache = %version, url = %key, error = %e, "Cache write failed"),
            }
        });
        while pending.try_join_next().is_some() {}
    }

    fn pending(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Background cache writes not yet awaited by [`settle`](Self::settle).
    pub fn pending_writes(&self) -> usize {
        self.pending().len()
    }

    /// Wait for every background cache write, including ones started while
    /// waiting. Requests keep being served meanwhile.
    pub async fn settle(&self) {
        loop {
            let mut writes = std::mem::take(&mut *self.pending());
            if writes.is_empty() {
                break;
            }
            while let Some(joined) = writes.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Cache write task failed");
                }
            }
        }
    }

    // ==================== Message ====================

    /// Handle a control message. Returns the recognized message, if any;
    /// everything else is ignored.
    pub fn handle_message(&self, data: &Value) -> Option<ControlMessage> {
        let message = ControlMessage::parse(data);
        match message {
            Some(ControlMessage::SkipWaiting) => {
                debug!(worker = %self.id, "Skip waiting requested");
                self.skip_waiting();
            }
            None => trace!(worker = %self.id, "Ignoring unrecognized message"),
        }
        message
    }
}

/// Only clean, successful, same-origin responses are persisted.
fn is_cacheable(response: &Response) -> bool {
    response.status == StatusCode::OK && response.response_type == ResponseType::Basic
}
