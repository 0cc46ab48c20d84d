use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::Connectivity;
use crate::api::{ApiClient, ApiError};
use crate::storage::{keys, SecureStore};

/// A mutating request waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl QueuedOperation {
    pub fn new(method: &Method, url: &str, body: Option<Value>) -> Self {
        Self {
            method: method.as_str().to_string(),
            url: url.to_string(),
            body,
            timestamp: Utc::now(),
        }
    }

    pub fn http_method(&self) -> Result<Method, ApiError> {
        Method::from_bytes(self.method.as_bytes())
            .map_err(|_| ApiError::BadRequest(format!("invalid method {}", self.method)))
    }
}

/// Whatever actually performs a replayed operation.
pub trait OperationSender: Send + Sync {
    fn send<'a>(&'a self, operation: &'a QueuedOperation) -> BoxFuture<'a, Result<Value, ApiError>>;
}

/// Sends operations through the API client with whatever token is current
/// at replay time, not the one present when the operation was queued.
pub struct AuthorizedSender {
    client: ApiClient,
    store: Arc<SecureStore>,
}

impl AuthorizedSender {
    pub fn new(client: ApiClient, store: Arc<SecureStore>) -> Self {
        Self { client, store }
    }
}

impl OperationSender for AuthorizedSender {
    fn send<'a>(&'a self, operation: &'a QueuedOperation) -> BoxFuture<'a, Result<Value, ApiError>> {
        Box::pin(async move {
            let method = operation.http_method()?;
            let client = self.client.with_token(self.store.get(keys::AUTH_TOKEN));
            client.send(method, &operation.url, operation.body.as_ref()).await
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub processed: usize,
    pub failed: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    Sent(Value),
    /// Stored for replay; the caller should report "queued", not failure
    Queued,
}

#[derive(Default)]
struct QueueState {
    /// Operations that failed during the current drain, in original order
    retained: Vec<QueuedOperation>,
    in_flight: Option<QueuedOperation>,
    pending: VecDeque<QueuedOperation>,
}

impl QueueState {
    /// Everything still owed to the server, in replay order.
    fn snapshot(&self) -> Vec<QueuedOperation> {
        self.retained
            .iter()
            .chain(self.in_flight.iter())
            .chain(self.pending.iter())
            .cloned()
            .collect()
    }

    fn len(&self) -> usize {
        self.retained.len() + usize::from(self.in_flight.is_some()) + self.pending.len()
    }
}

/// Durable FIFO of mutating requests.
///
/// The queue is written through to the secure store after every change, so
/// a crash mid-drain loses nothing that was not already acknowledged.
pub struct OfflineQueue {
    store: Arc<SecureStore>,
    sender: Arc<dyn OperationSender>,
    connectivity: Connectivity,
    state: Mutex<QueueState>,
    drain: tokio::sync::Mutex<()>,
}

impl OfflineQueue {
    /// Create the queue, loading anything a previous run left behind.
    pub fn new(
        store: Arc<SecureStore>,
        sender: Arc<dyn OperationSender>,
        connectivity: Connectivity,
    ) -> Self {
        let pending: VecDeque<QueuedOperation> = store
            .get_json::<Vec<QueuedOperation>>(keys::OFFLINE_QUEUE)
            .unwrap_or_default()
            .into();
        if !pending.is_empty() {
            info!(count = pending.len(), "Loaded offline queue");
        }
        Self {
            store,
            sender,
            connectivity,
            state: Mutex::new(QueueState {
                pending,
                ..QueueState::default()
            }),
            drain: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, state: &QueueState) {
        let snapshot = state.snapshot();
        let result = if snapshot.is_empty() {
            self.store.remove(keys::OFFLINE_QUEUE)
        } else {
            self.store.set_json(keys::OFFLINE_QUEUE, &snapshot)
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist offline queue");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn operations(&self) -> Vec<QueuedOperation> {
        self.lock().snapshot()
    }

    /// Append an operation and persist the queue.
    pub fn queue_operation(&self, method: Method, url: &str, body: Option<Value>) {
        let operation = QueuedOperation::new(&method, url, body);
        debug!(method = %operation.method, url = %operation.url, "Queueing operation");
        let mut state = self.lock();
        state.pending.push_back(operation);
        self.persist(&state);
    }

    /// Try a mutating call now; if the backend is unreachable, queue it.
    pub async fn execute_or_queue(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<MutationOutcome, ApiError> {
        if !self.connectivity.is_online() {
            self.queue_operation(method, url, body);
            return Ok(MutationOutcome::Queued);
        }

        let operation = QueuedOperation::new(&method, url, body);
        match self.sender.send(&operation).await {
            Ok(value) => Ok(MutationOutcome::Sent(value)),
            Err(e) if e.is_transient() => {
                warn!(error = %e, url = url, "Request failed, queueing for later");
                self.connectivity.set_online(false);
                let mut state = self.lock();
                state.pending.push_back(operation);
                self.persist(&state);
                Ok(MutationOutcome::Queued)
            }
            Err(e) => Err(e),
        }
    }

    /// Replay the queue if the backend is believed reachable.
    pub async fn process_queue(&self) -> SyncReport {
        if !self.connectivity.is_online() {
            debug!("Offline, skipping queue replay");
            return SyncReport {
                remaining: self.len(),
                ..SyncReport::default()
            };
        }
        self.drain_queue().await
    }

    /// Replay the queue now, regardless of the connectivity flag.
    pub async fn synchronize(&self) -> SyncReport {
        self.drain_queue().await
    }

    async fn drain_queue(&self) -> SyncReport {
        let _drain = self.drain.lock().await;
        let batch = self.lock().pending.len();
        let mut report = SyncReport::default();

        // Operations queued while draining wait for the next drain
        for _ in 0..batch {
            let operation = {
                let mut state = self.lock();
                let Some(operation) = state.pending.pop_front() else {
                    break;
                };
                state.in_flight = Some(operation.clone());
                operation
            };

            let result = self.sender.send(&operation).await;

            let mut state = self.lock();
            state.in_flight = None;
            match result {
                Ok(_) => {
                    report.processed += 1;
                    debug!(method = %operation.method, url = %operation.url, "Replayed operation");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(method = %operation.method, url = %operation.url, error = %e, "Replay failed, keeping operation");
                    state.retained.push(operation);
                }
            }
            self.persist(&state);
        }

        let mut state = self.lock();
        let retained = std::mem::take(&mut state.retained);
        for operation in retained.into_iter().rev() {
            state.pending.push_front(operation);
        }
        self.persist(&state);
        report.remaining = state.pending.len();

        info!(
            processed = report.processed,
            failed = report.failed,
            remaining = report.remaining,
            "Offline queue drained"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryKvBackend, StorageKey};
    use std::collections::HashSet;

    /// Records every call and fails the URLs it is told to fail.
    #[derive(Default)]
    struct ScriptedSender {
        calls: Mutex<Vec<String>>,
        failing: Mutex<HashSet<String>>,
    }

    impl ScriptedSender {
        fn fail(&self, url: &str) {
            self.failing.lock().unwrap().insert(url.to_string());
        }

        fn recover(&self, url: &str) {
            self.failing.lock().unwrap().remove(url);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl OperationSender for ScriptedSender {
        fn send<'a>(&'a self, operation: &'a QueuedOperation) -> BoxFuture<'a, Result<Value, ApiError>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(operation.url.clone());
                if self.failing.lock().unwrap().contains(&operation.url) {
                    Err(ApiError::ServerError("scripted failure".to_string()))
                } else {
                    Ok(Value::Null)
                }
            })
        }
    }

    fn setup(online: bool) -> (Arc<SecureStore>, Arc<ScriptedSender>, OfflineQueue) {
        let store = Arc::new(SecureStore::new(
            Arc::new(MemoryKvBackend::new()),
            &StorageKey::from_bytes([11u8; 32]),
        ));
        let sender = Arc::new(ScriptedSender::default());
        let connectivity = Connectivity::new(store.clone(), online);
        let queue = OfflineQueue::new(store.clone(), sender.clone(), connectivity);
        (store, sender, queue)
    }

    fn urls(queue: &OfflineQueue) -> Vec<String> {
        queue.operations().into_iter().map(|op| op.url).collect()
    }

    #[tokio::test]
    async fn test_replays_in_fifo_order() {
        let (_, sender, queue) = setup(true);
        queue.queue_operation(Method::POST, "/a", None);
        queue.queue_operation(Method::PUT, "/b", Some(serde_json::json!({"x": 1})));

        let report = queue.process_queue().await;
        assert_eq!(sender.calls(), vec!["/a", "/b"]);
        assert_eq!(report, SyncReport { processed: 2, failed: 0, remaining: 0 });
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failed_operation_stays_and_success_does_not_rerun() {
        let (_, sender, queue) = setup(true);
        queue.queue_operation(Method::POST, "/a", None);
        queue.queue_operation(Method::POST, "/b", None);
        sender.fail("/a");

        let report = queue.process_queue().await;
        assert_eq!(report, SyncReport { processed: 1, failed: 1, remaining: 1 });
        assert_eq!(urls(&queue), vec!["/a"]);

        sender.recover("/a");
        queue.process_queue().await;
        assert_eq!(sender.calls(), vec!["/a", "/b", "/a"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failures_keep_relative_order() {
        let (_, sender, queue) = setup(true);
        for url in ["/a", "/b", "/c", "/d"] {
            queue.queue_operation(Method::POST, url, None);
        }
        sender.fail("/a");
        sender.fail("/c");

        queue.synchronize().await;
        assert_eq!(urls(&queue), vec!["/a", "/c"]);
    }

    #[tokio::test]
    async fn test_queue_survives_restart() {
        let (store, sender, queue) = setup(true);
        queue.queue_operation(Method::DELETE, "/quiz/1", None);
        queue.queue_operation(Method::POST, "/quiz/2/answers", Some(serde_json::json!([1, 2])));
        drop(queue);

        let connectivity = Connectivity::new(store.clone(), true);
        let reloaded = OfflineQueue::new(store, sender.clone(), connectivity);
        assert_eq!(urls(&reloaded), vec!["/quiz/1", "/quiz/2/answers"]);
        assert_eq!(reloaded.operations()[0].method, "DELETE");
    }

    #[tokio::test]
    async fn test_process_queue_waits_for_connectivity() {
        let (_, sender, queue) = setup(false);
        queue.queue_operation(Method::POST, "/a", None);

        let report = queue.process_queue().await;
        assert_eq!(report, SyncReport { processed: 0, failed: 0, remaining: 1 });
        assert!(sender.calls().is_empty());

        // A forced sync ignores the flag
        let report = queue.synchronize().await;
        assert_eq!(report.processed, 1);
    }

    #[tokio::test]
    async fn test_execute_or_queue() {
        let (_, sender, queue) = setup(true);
        let outcome = queue.execute_or_queue(Method::POST, "/ok", None).await.unwrap();
        assert_eq!(outcome, MutationOutcome::Sent(Value::Null));
        assert!(queue.is_empty());

        sender.fail("/down");
        let outcome = queue.execute_or_queue(Method::POST, "/down", None).await.unwrap();
        assert_eq!(outcome, MutationOutcome::Queued);
        assert_eq!(urls(&queue), vec!["/down"]);

        // Now offline: queued without trying
        let outcome = queue.execute_or_queue(Method::POST, "/later", None).await.unwrap();
        assert_eq!(outcome, MutationOutcome::Queued);
        assert_eq!(sender.calls(), vec!["/ok", "/down"]);
    }

    #[tokio::test]
    async fn test_empty_queue_removes_persisted_entry() {
        let (store, _, queue) = setup(true);
        queue.queue_operation(Method::POST, "/a", None);
        assert!(store.get(keys::OFFLINE_QUEUE).is_some());
        queue.synchronize().await;
        assert!(store.get(keys::OFFLINE_QUEUE).is_none());
    }
}
