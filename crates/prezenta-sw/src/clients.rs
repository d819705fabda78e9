//! Client contexts (open pages) and which worker controls them.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

use crate::WorkerId;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
}

/// A client (open page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Worker whose fetch handler serves this client.
    pub controller: Option<WorkerId>,
}

impl Client {
    /// Whether the client lives under `scope`.
    pub fn in_scope(&self, scope: &Url) -> bool {
        self.url.as_str().starts_with(scope.as_str())
    }
}

/// Clients registry.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Register a newly opened window.
    pub fn open_window(&mut self, url: Url, controller: Option<WorkerId>) -> Client {
        let client = Client {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            controller,
        };
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Number of clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Clients currently controlled by `worker`.
    pub fn controlled_by(&self, worker: WorkerId) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| c.controller == Some(worker))
            .collect()
    }

    /// Make `worker` the controller of every in-scope client it does not
    /// already control. Returns the IDs of the clients that changed hands.
    pub fn claim(&mut self, worker: WorkerId, scope: &Url) -> Vec<String> {
        let mut claimed: Vec<String> = self
            .clients
            .values_mut()
            .filter(|c| c.in_scope(scope) && c.controller != Some(worker))
            .map(|c| {
                c.controller = Some(worker);
                c.id.clone()
            })
            .collect();
        claimed.sort();
        claimed
    }

    /// Hand every client controlled by `from` over to `to`.
    pub fn transfer(&mut self, from: WorkerId, to: WorkerId) -> Vec<String> {
        let mut moved: Vec<String> = self
            .clients
            .values_mut()
            .filter(|c| c.controller == Some(from))
            .map(|c| {
                c.controller = Some(to);
                c.id.clone()
            })
            .collect();
        moved.sort();
        moved
    }

    /// Drop `worker` as controller wherever it is one.
    pub fn release(&mut self, worker: WorkerId) {
        for client in self.clients.values_mut() {
            if client.controller == Some(worker) {
                client.controller = None;
            }
        }
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_open_window() {
        let mut clients = Clients::new();
        let client = clients.open_window(url("https://prezenta.example/student/scan"), None);

        assert_eq!(client.client_type, ClientType::Window);
        assert!(client.controller.is_none());
        assert!(clients.get(&client.id).is_some());
        assert_eq!(clients.len(), 1);
    }

    #[test]
    fn test_claim_only_in_scope() {
        let mut clients = Clients::new();
        let worker = WorkerId::new();
        let scope = url("https://prezenta.example/");

        let inside = clients.open_window(url("https://prezenta.example/verify"), None);
        let outside = clients.open_window(url("https://other.example/"), None);

        assert_eq!(clients.claim(worker, &scope), vec![inside.id.clone()]);
        assert_eq!(clients.get(&inside.id).unwrap().controller, Some(worker));
        assert!(clients.get(&outside.id).unwrap().controller.is_none());

        // Claiming again changes nothing.
        assert!(clients.claim(worker, &scope).is_empty());
    }

    #[test]
    fn test_controlled_by_and_remove() {
        let mut clients = Clients::new();
        let worker = WorkerId::new();
        let a = clients.open_window(url("https://prezenta.example/"), Some(worker));
        clients.open_window(url("https://prezenta.example/register"), None);

        assert_eq!(clients.controlled_by(worker).len(), 1);
        clients.remove(&a.id);
        assert!(clients.controlled_by(worker).is_empty());
    }

    #[test]
    fn test_transfer_and_release() {
        let mut clients = Clients::new();
        let old = WorkerId::new();
        let new = WorkerId::new();
        let a = clients.open_window(url("https://prezenta.example/"), Some(old));
        let b = clients.open_window(url("https://prezenta.example/verify"), None);

        assert_eq!(clients.transfer(old, new), vec![a.id.clone()]);
        assert_eq!(clients.get(&a.id).unwrap().controller, Some(new));
        assert!(clients.get(&b.id).unwrap().controller.is_none());

        clients.release(new);
        assert!(clients.controlled_by(new).is_empty());
    }
}
