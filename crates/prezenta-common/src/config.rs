//! Worker configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::{ConfigError, Result};

/// Version string of the cache set the worker owns.
pub const DEFAULT_CACHE_VERSION: &str = "Sistem-prezena-1";

/// Paths pre-cached at install time.
pub const DEFAULT_MANIFEST: &[&str] = &[
    "/",
    "/static/manifest.json",
    "/register",
    "/reregister-device",
    "/student/scan",
    "/verify",
];

const DEFAULT_ORIGIN: &str = "http://localhost:5000/";

/// Offline worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name of the current cache set. Bumping it discards every older set on
    /// the next activation.
    pub cache_version: String,

    /// Origin the worker serves; manifest paths resolve against it and
    /// responses from it are classified as basic.
    pub origin: Url,

    /// Paths pre-cached at install time
    pub manifest: Vec<String>,

    /// Supersede the waiting worker as soon as install finishes
    pub skip_waiting_on_install: bool,

    /// Take control of open clients right after activation
    pub claim_clients: bool,

    /// Cache store backend
    pub store: StoreConfig,

    /// User agent sent by the HTTP fetcher
    pub user_agent: String,

    /// Request timeout for the HTTP fetcher. Unset means the worker does not
    /// configure one.
    pub request_timeout_secs: Option<u64>,
}

/// Cache store backend selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Cache sets live for the lifetime of the process
    #[default]
    Memory,
    /// Cache sets persisted in a SQLite database
    Sqlite {
        #[serde(default)]
        path: Option<PathBuf>,
    },
}

impl StoreConfig {
    /// Database path for the SQLite backend, falling back to the per-user
    /// data directory.
    pub fn sqlite_path(&self) -> Option<PathBuf> {
        match self {
            StoreConfig::Memory => None,
            StoreConfig::Sqlite { path: Some(path) } => Some(path.clone()),
            StoreConfig::Sqlite { path: None } => Some(
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("prezenta")
                    .join("offline-cache.db"),
            ),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_version: DEFAULT_CACHE_VERSION.to_string(),
            origin: Url::parse(DEFAULT_ORIGIN).expect("default origin is a valid URL"),
            manifest: DEFAULT_MANIFEST.iter().map(|p| p.to_string()).collect(),
            skip_waiting_on_install: true,
            claim_clients: true,
            store: StoreConfig::default(),
            user_agent: format!("Prezenta-Offline/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: None,
        }
    }
}

impl WorkerConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: WorkerConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a config for the given origin, keeping every other default.
    pub fn for_origin(origin: Url) -> Self {
        Self {
            origin,
            ..Default::default()
        }
    }

    /// Check the config for values the worker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cache_version.trim().is_empty() {
            return Err(ConfigError::invalid("cache_version is empty"));
        }
        if self.origin.cannot_be_a_base() {
            return Err(ConfigError::invalid(format!(
                "origin {} cannot be used as a base URL",
                self.origin
            )));
        }
        self.manifest_urls().map(|_| ())
    }

    /// Manifest paths resolved against the origin.
    pub fn manifest_urls(&self) -> Result<Vec<Url>> {
        self.manifest
            .iter()
            .map(|path| {
                if !path.starts_with('/') {
                    return Err(ConfigError::invalid(format!(
                        "manifest entry {path:?} is not an absolute path"
                    )));
                }
                Ok(self.origin.join(path)?)
            })
            .collect()
    }
}
