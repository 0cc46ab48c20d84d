use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::storage::{keys, SecureStore};

/// Shared view of whether the backend is reachable.
///
/// Components flip it as requests succeed or fail; anyone interested in
/// transitions (the queue drainer, the UI) subscribes to the watch channel.
#[derive(Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
    store: Arc<SecureStore>,
}

impl Connectivity {
    pub fn new(store: Arc<SecureStore>, online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self {
            tx: Arc::new(tx),
            store,
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the flag. Returns true when this call changed it.
    pub fn set_online(&self, online: bool) -> bool {
        if online {
            if let Err(e) = self.store.set(keys::LAST_ONLINE, &Utc::now().to_rfc3339()) {
                warn!(error = %e, "Failed to record last-online time");
            }
        }

        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// When the backend was last known to be reachable, across restarts.
    pub fn last_online(&self) -> Option<DateTime<Utc>> {
        let raw = self.store.get(keys::LAST_ONLINE)?;
        DateTime::parse_from_rfc3339(&raw)
            .ok()
            .map(|time| time.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryKvBackend, StorageKey};

    fn connectivity(online: bool) -> Connectivity {
        let store = Arc::new(SecureStore::new(
            Arc::new(MemoryKvBackend::new()),
            &StorageKey::from_bytes([5u8; 32]),
        ));
        Connectivity::new(store, online)
    }

    #[test]
    fn test_transitions_are_reported_once() {
        let connectivity = connectivity(true);
        assert!(!connectivity.set_online(true));
        assert!(connectivity.set_online(false));
        assert!(!connectivity.set_online(false));
        assert!(!connectivity.is_online());
        assert!(connectivity.set_online(true));
    }

    #[test]
    fn test_last_online_is_recorded() {
        let connectivity = connectivity(false);
        assert!(connectivity.last_online().is_none());
        connectivity.set_online(true);
        assert!(connectivity.last_online().is_some());
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let connectivity = connectivity(false);
        let mut rx = connectivity.subscribe();
        connectivity.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
