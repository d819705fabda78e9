//! Worker identity, lifecycle states and events.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Worker state.
///
/// `Parsed → Installing → Installed (waiting) → Activating → Activated`,
/// and `Redundant` once superseded or unregistered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Constructed, install not started.
    #[default]
    Parsed,
    /// Pre-caching the manifest.
    Installing,
    /// Installed, waiting to take over.
    Installed,
    /// Cleaning up old cache sets and claiming clients.
    Activating,
    /// Active and answering fetches.
    Activated,
    /// Superseded or discarded.
    Redundant,
}

impl WorkerState {
    /// Whether the worker is waiting for activation.
    pub fn is_waiting(&self) -> bool {
        matches!(self, WorkerState::Installed)
    }

    /// Check if the worker is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Redundant)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        worker_id: WorkerId,
        version: String,
        new_state: WorkerState,
    },
    /// A client got a new controller.
    ControllerChange {
        client_id: String,
        worker_id: WorkerId,
    },
    /// A stale cache set was deleted during activation.
    CacheDeleted { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_ids_are_unique() {
        assert_ne!(WorkerId::new(), WorkerId::new());
    }

    #[test]
    fn test_state_helpers() {
        assert_eq!(WorkerState::default(), WorkerState::Parsed);
        assert!(WorkerState::Installed.is_waiting());
        assert!(!WorkerState::Activated.is_waiting());
        assert!(WorkerState::Redundant.is_terminal());
        assert_eq!(WorkerState::Activating.to_string(), "activating");
    }
}
