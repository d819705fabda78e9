//! Lifecycle orchestration for one scope.
//!
//! A registration owns up to three workers (installing, waiting, active),
//! decides when a waiting worker takes over and routes fetches and control
//! messages to the right one.

use std::sync::Arc;

use prezenta_cache::CacheStore;
use prezenta_common::WorkerConfig;
use prezenta_net::{Fetcher, NetError, Request};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, trace};
use url::Url;

use crate::{
    ActivateReport, Client, Clients, ControlMessage, FetchOutcome, FetchSource, InstallReport,
    OfflineWorker, Result, ServiceWorkerError, ServiceWorkerEvent, WorkerState,
};

#[derive(Default)]
struct Slots {
    installing: Option<Arc<OfflineWorker>>,
    waiting: Option<Arc<OfflineWorker>>,
    active: Option<Arc<OfflineWorker>>,
    /// Superseded workers whose cache writes `settle` still has to await.
    retired: Vec<Arc<OfflineWorker>>,
}

impl Slots {
    async fn retire(&mut self, worker: Arc<OfflineWorker>) {
        worker.set_state(WorkerState::Redundant).await;
        self.retired.push(worker);
    }
}

/// Workers registered for one scope.
pub struct Registration {
    scope: Url,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<RwLock<Clients>>,
    slots: RwLock<Slots>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl Registration {
    /// Create a registration with no workers yet.
    pub fn new(
        scope: Url,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                scope,
                store,
                fetcher,
                clients: Arc::new(RwLock::new(Clients::new())),
                slots: RwLock::new(Slots::default()),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn clients(&self) -> Arc<RwLock<Clients>> {
        Arc::clone(&self.clients)
    }

    pub async fn installing(&self) -> Option<Arc<OfflineWorker>> {
        self.slots.read().await.installing.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<OfflineWorker>> {
        self.slots.read().await.waiting.clone()
    }

    pub async fn active(&self) -> Option<Arc<OfflineWorker>> {
        self.slots.read().await.active.clone()
    }

    /// Install a new worker for `config`, then activate it if nothing holds
    /// it back.
    pub async fn install(
        &self,
        config: &WorkerConfig,
    ) -> Result<(Arc<OfflineWorker>, InstallReport)> {
        if !config.origin.as_str().starts_with(self.scope.as_str()) {
            return Err(ServiceWorkerError::StateError(format!(
                "origin {} is outside scope {}",
                config.origin, self.scope
            )));
        }

        let worker = Arc::new(OfflineWorker::new(
            config,
            Arc::clone(&self.store),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.clients),
            self.event_tx.clone(),
        )?);
        info!(worker = %worker.id(), version = worker.version(), "Installing worker");

        {
            let mut slots = self.slots.write().await;
            if let Some(old) = slots.installing.replace(Arc::clone(&worker)) {
                slots.retire(old).await;
            }
        }

        let report = worker.install().await;

        let mut slots = self.slots.write().await;
        let still_current = slots
            .installing
            .as_ref()
            .is_some_and(|w| w.id() == worker.id());
        if still_current {
            slots.installing = None;
            if let Some(old) = slots.waiting.replace(Arc::clone(&worker)) {
                slots.retire(old).await;
            }
            self.try_activate(&mut slots).await;
        }

        Ok((worker, report))
    }

    /// Promote the waiting worker if it asked to skip waiting or the active
    /// worker no longer controls any client.
    async fn try_activate(&self, slots: &mut Slots) -> Option<ActivateReport> {
        let waiting = slots.waiting.as_ref()?;
        let ready = waiting.skip_waiting_requested()
            || match &slots.active {
                None => true,
                Some(active) => self
                    .clients
                    .read()
                    .await
                    .controlled_by(active.id())
                    .is_empty(),
            };
        if !ready {
            debug!(worker = %waiting.id(), "Worker waiting for clients to be released");
            return None;
        }

        let worker = slots.waiting.take()?;
        if let Some(old) = slots.active.take() {
            let moved = self.clients.write().await.transfer(old.id(), worker.id());
            for client_id in moved {
                let _ = self.event_tx.send(ServiceWorkerEvent::ControllerChange {
                    client_id,
                    worker_id: worker.id(),
                });
            }
            info!(old = %old.id(), new = %worker.id(), "Worker superseded");
            slots.retire(old).await;
        }

        let report = worker.activate().await;
        slots.active = Some(worker);
        Some(report)
    }

    /// Deliver a control message from a client. The waiting worker gets it
    /// first, then the installing one, then the active one.
    pub async fn post_message(&self, data: &Value) -> Option<ControlMessage> {
        let mut slots = self.slots.write().await;
        let target = slots
            .waiting
            .clone()
            .or_else(|| slots.installing.clone())
            .or_else(|| slots.active.clone());
        let Some(worker) = target else {
            trace!("Message posted with no worker registered");
            return None;
        };

        let message = worker.handle_message(data);
        if message.is_some() {
            self.try_activate(&mut slots).await;
        }
        message
    }

    /// Route a request through the active worker. Without one the request
    /// goes straight to the network and its failure is the caller's.
    pub async fn handle_fetch(&self, request: Request) -> std::result::Result<FetchOutcome, NetError> {
        let active = self.active().await;
        match active {
            Some(worker) => Ok(worker.respond(request).await),
            None => {
                let response = self.fetcher.fetch(request).await?;
                Ok(FetchOutcome {
                    response,
                    source: FetchSource::Passthrough,
                })
            }
        }
    }

    /// A page was opened. In-scope pages are controlled by the active
    /// worker from the start.
    pub async fn open_client(&self, url: Url) -> Client {
        let controller = match self.active().await {
            Some(worker) if url.as_str().starts_with(self.scope.as_str()) => Some(worker.id()),
            _ => None,
        };
        self.clients.write().await.open_window(url, controller)
    }

    /// A page was closed. Once the active worker controls no page, a waiting
    /// worker takes over.
    pub async fn close_client(&self, id: &str) -> Option<ActivateReport> {
        self.clients.write().await.remove(id);
        let mut slots = self.slots.write().await;
        self.try_activate(&mut slots).await
    }

    /// Wait for the background cache writes of the active worker and of
    /// every worker superseded since the last call.
    pub async fn settle(&self) {
        let (retired, active) = {
            let mut slots = self.slots.write().await;
            (std::mem::take(&mut slots.retired), slots.active.clone())
        };
        for worker in retired.iter().chain(active.iter()) {
            worker.settle().await;
        }
    }

    /// Discard every worker. Cache sets are left in place.
    pub async fn unregister(&self) {
        let mut slots = self.slots.write().await;
        let workers = [
            slots.installing.take(),
            slots.waiting.take(),
            slots.active.take(),
        ];
        for worker in workers.into_iter().flatten() {
            self.clients.write().await.release(worker.id());
            slots.retire(worker).await;
        }
        info!(scope = %self.scope, "Registration cleared");
    }
}
