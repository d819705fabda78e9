//! # Prezenta Offline Worker
//!
//! Cache-first request handling for the attendance app, modelled on the
//! service worker lifecycle.
//!
//! ## Features
//!
//! - **Install**: pre-cache the manifest into the current cache set
//! - **Activate**: delete every cache set but the current version, claim
//!   open clients
//! - **Fetch**: serve from cache, fall back to network, cache clean
//!   responses, synthesize a 503 when offline
//! - **Message**: `{"type": "SKIP_WAITING"}` forces supersession
//!
//! ## Architecture
//!
//! ```text
//! Registration (one scope)
//!     ├── installing (OfflineWorker)
//!     ├── waiting (OfflineWorker)
//!     ├── active (OfflineWorker) ──> Clients it controls
//!     │
//!     ├── CacheStore (shared) ──> cache set per version
//!     └── Fetcher (shared)
//! ```

use thiserror::Error;

pub mod clients;
pub mod lifecycle;
pub mod message;
pub mod offline;
pub mod registration;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use clients::{Client, ClientType, Clients};
pub use lifecycle::{ServiceWorkerEvent, WorkerId, WorkerState};
pub use message::ControlMessage;
pub use offline::{offline_response, OFFLINE_BODY, OFFLINE_STATUS_TEXT};
pub use registration::Registration;
pub use worker::{ActivateReport, FetchOutcome, FetchSource, InstallReport, OfflineWorker};

// ==================== Errors ====================

/// Errors that can occur in offline worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Failed to precache {url}: {reason}")]
    Precache { url: String, reason: String },

    #[error("Cache error: {0}")]
    Cache(#[from] prezenta_cache::CacheError),

    #[error("Network error: {0}")]
    Network(#[from] prezenta_net::NetError),

    #[error("Config error: {0}")]
    Config(#[from] prezenta_common::ConfigError),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
