//! Per-process wiring.
//!
//! `AppContext` builds every component once, connects them with a few
//! background tasks, and tears the tasks down again in `cleanup`. Front-ends
//! hold one context for the life of the process.

use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::activity::{ActivityConfig, ActivityTracker};
use crate::api::ApiClient;
use crate::auth::{AuthBackend, AuthGateway, HttpBackend, IpcBackend, MockBackend};
use crate::config::{BackendKind, Config};
use crate::host::{
    CredentialStore, GuardStatus, HostBridge, HostEvent, HostHandle, HostNotice, HostProcess,
    HostReply, HostSettings, SystemProcessLister,
};
use crate::offline::{AuthorizedSender, Connectivity, OfflineQueue, OperationSender};
use crate::session::{Session, SessionEvent, SessionManager, SessionTimeouts};
use crate::storage::{
    resolve_storage_key, FileKvBackend, KvBackend, MemoryKvBackend, SecureStore, StorageKey,
};

/// File holding the host's user table, next to the main store.
const HOST_STORE_FILE: &str = "host_users.json";

/// Lifetime of tokens issued by the host credential store.
const HOST_TOKEN_LIFETIME_HOURS: i64 = crate::host::credentials::DEFAULT_TOKEN_LIFETIME_HOURS;

pub struct AppContext {
    config: Config,
    store: Arc<SecureStore>,
    session: SessionManager,
    connectivity: Connectivity,
    gateway: Arc<AuthGateway>,
    tracker: Arc<ActivityTracker>,
    queue: Arc<OfflineQueue>,
    host: Option<HostHandle>,
    restored: Option<Session>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppContext {
    /// Build the context from on-disk state. Must be called from within a
    /// tokio runtime.
    pub fn initialize(config: Config) -> Result<Self> {
        let data_dir = config.data_dir()?;
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let key = resolve_storage_key(&data_dir)?;
        let backend: Arc<dyn KvBackend> = Arc::new(FileKvBackend::in_dir(&data_dir)?);
        let host_backend: Arc<dyn KvBackend> =
            Arc::new(FileKvBackend::open(data_dir.join(HOST_STORE_FILE))?);
        Self::build(config, backend, key, host_backend)
    }

    /// Build the context over a caller-supplied store and key. The host's
    /// user table, if a host is started, is kept in memory.
    pub fn initialize_with(config: Config, backend: Arc<dyn KvBackend>, key: StorageKey) -> Result<Self> {
        Self::build(config, backend, key, Arc::new(MemoryKvBackend::new()))
    }

    fn build(
        config: Config,
        backend: Arc<dyn KvBackend>,
        key: StorageKey,
        host_backend: Arc<dyn KvBackend>,
    ) -> Result<Self> {
        let store = Arc::new(SecureStore::new(backend, &key));
        let session = SessionManager::new(Arc::clone(&store), SessionTimeouts::from_config(&config));
        // Optimistic until a request says otherwise
        let connectivity = Connectivity::new(Arc::clone(&store), true);

        let host = if config.desktop || config.backend == BackendKind::Ipc {
            if !config.desktop {
                warn!("IPC backend selected without desktop mode, starting host anyway");
            }
            Some(Self::start_host(&config, host_backend))
        } else {
            None
        };
        let bridge = host.as_ref().map(HostHandle::bridge);

        let client = ApiClient::with_timeout(&config.api_base_url, config.request_timeout())
            .context("Failed to build HTTP client")?;
        let auth_backend: Arc<dyn AuthBackend> = match (config.backend, &bridge) {
            (BackendKind::Mock, _) => Arc::new(MockBackend::new()),
            (BackendKind::Http, _) => Arc::new(HttpBackend::new(client.clone())),
            (BackendKind::Ipc, Some(bridge)) => Arc::new(IpcBackend::new(bridge.clone())),
            (BackendKind::Ipc, None) => anyhow::bail!("IPC backend requires the host process"),
        };
        info!(backend = auth_backend.name(), desktop = config.desktop, "Authentication backend selected");

        let gateway = Arc::new(AuthGateway::new(
            auth_backend,
            session.clone(),
            Arc::clone(&store),
            connectivity.clone(),
            config.max_offline_age(),
        ));
        let pruned = gateway.offline_credentials().prune();
        if pruned > 0 {
            info!(count = pruned, "Dropped stale offline credentials");
        }

        let tracker = Arc::new(ActivityTracker::new(
            session.clone(),
            bridge.clone(),
            ActivityConfig::from_config(&config),
        ));
        let sender: Arc<dyn OperationSender> =
            Arc::new(AuthorizedSender::new(client, Arc::clone(&store)));
        let queue = Arc::new(OfflineQueue::new(Arc::clone(&store), sender, connectivity.clone()));

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(forward_lifecycle(
            session.subscribe(),
            Arc::clone(&tracker),
            bridge,
        )));
        tasks.push(tokio::spawn(drain_on_reconnect(
            connectivity.clone(),
            Arc::clone(&queue),
        )));
        if let Some(ref host) = host {
            tasks.push(tokio::spawn(follow_host(host.subscribe(), session.clone())));
        }
        if let Some(every) = config.connectivity_probe_interval() {
            tasks.push(tokio::spawn(probe_connectivity(Arc::clone(&gateway), every)));
        }

        // Subscribed above, so a restore is forwarded like any other session
        let restored = session.restore();

        Ok(Self {
            config,
            store,
            session,
            connectivity,
            gateway,
            tracker,
            queue,
            host,
            restored,
            tasks: Mutex::new(tasks),
        })
    }

    fn start_host(config: &Config, host_backend: Arc<dyn KvBackend>) -> HostHandle {
        let credentials = Arc::new(CredentialStore::new(
            host_backend,
            chrono::Duration::hours(HOST_TOKEN_LIFETIME_HOURS),
        ));
        let host = HostProcess::spawn(
            HostSettings::from_config(config),
            credentials,
            Box::new(SystemProcessLister),
        );
        if config.backend == BackendKind::Http
            && !host.navigation().allows_navigation(&config.api_base_url)
        {
            warn!(url = %config.api_base_url, "API origin is not on the navigation allow-list");
        }
        host
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<SecureStore> {
        &self.store
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn gateway(&self) -> &AuthGateway {
        &self.gateway
    }

    pub fn tracker(&self) -> &ActivityTracker {
        &self.tracker
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn host(&self) -> Option<&HostHandle> {
        self.host.as_ref()
    }

    pub fn bridge(&self) -> Option<HostBridge> {
        self.host.as_ref().map(HostHandle::bridge)
    }

    /// The session picked up from a previous run, if any.
    pub fn restored_session(&self) -> Option<&Session> {
        self.restored.as_ref()
    }

    pub fn subscribe_host(&self) -> Option<broadcast::Receiver<HostEvent>> {
        self.host.as_ref().map(HostHandle::subscribe)
    }

    /// Current guard state, or `None` without a host.
    pub async fn guard_status(&self) -> Option<GuardStatus> {
        let bridge = self.bridge()?;
        let reply = bridge.invoke("get-guard-status", json!({})).await?;
        match HostReply::into_result(reply).and_then(|data| {
            serde_json::from_value(data)
                .map_err(|e| crate::api::ApiError::InvalidResponse(e.to_string()))
        }) {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(error = %e, "Guard status unavailable");
                None
            }
        }
    }

    /// Switch alt-tab prevention on the host. Returns the state the host
    /// reports, or `None` without a host.
    pub async fn set_alt_tab_prevention(&self, enabled: bool) -> Option<bool> {
        let bridge = self.bridge()?;
        let reply = bridge
            .invoke("toggle-alt-tab-prevention", json!({ "enabled": enabled }))
            .await?;
        HostReply::into_result(reply)
            .ok()
            .and_then(|data| data.get("enabled").and_then(serde_json::Value::as_bool))
    }

    /// End any session and wipe this device's store: tokens, cached offline
    /// logins, and queued operations. The storage key is left to the caller.
    pub fn forget_device(&self) -> Result<()> {
        self.session.end_session();
        self.store.clear().context("Failed to clear secure store")?;
        info!("Local data forgotten");
        Ok(())
    }

    /// Stop background work. Stored session data is kept for the next run.
    pub fn cleanup(&self) {
        let tasks = std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            task.abort();
        }
        self.tracker.uninstall();
        self.session.shutdown();
        if let Some(ref host) = self.host {
            host.shutdown();
        }
        debug!("Context cleaned up");
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Mirror session lifecycle into the host and attach or detach the
/// activity tracker.
async fn forward_lifecycle(
    mut events: broadcast::Receiver<SessionEvent>,
    tracker: Arc<ActivityTracker>,
    bridge: Option<HostBridge>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "Lifecycle forwarder fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let notice = match event {
            SessionEvent::Created {
                session_id,
                persistent,
                ..
            } => {
                tracker.install();
                Some(HostNotice::SessionCreated {
                    session_id,
                    persistent,
                })
            }
            SessionEvent::Restored {
                session_id,
                persistent,
                ..
            } => {
                tracker.install();
                Some(HostNotice::SessionRestored {
                    session_id,
                    persistent,
                })
            }
            SessionEvent::Expired { session_id } | SessionEvent::TokenExpired { session_id } => {
                tracker.uninstall();
                Some(HostNotice::SessionExpired { session_id })
            }
            SessionEvent::Ended { session_id } => {
                tracker.uninstall();
                Some(HostNotice::SessionEnded { session_id })
            }
            SessionEvent::Expiring { remaining_secs, .. } => {
                debug!(remaining_secs, "Session expiring soon");
                None
            }
        };
        if let (Some(notice), Some(bridge)) = (notice, bridge.as_ref()) {
            bridge.notify(&notice);
        }
    }
}

/// Replay the offline queue every time connectivity comes back.
async fn drain_on_reconnect(connectivity: Connectivity, queue: Arc<OfflineQueue>) {
    let mut rx = connectivity.subscribe();
    while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        if !online || queue.is_empty() {
            continue;
        }
        let report = queue.process_queue().await;
        info!(
            processed = report.processed,
            failed = report.failed,
            remaining = report.remaining,
            "Replayed offline queue after reconnect"
        );
    }
}

/// Act on the host's own decisions about the session.
async fn follow_host(mut events: broadcast::Receiver<HostEvent>, session: SessionManager) {
    loop {
        match events.recv().await {
            Ok(HostEvent::SessionTimedOut { session_id }) => {
                let current = session.current_session().map(|s| s.session_id);
                if session_id.is_none() || session_id == current {
                    info!("Host timer expired the session");
                    session.expire_now();
                }
            }
            Ok(HostEvent::RecordingDetected { tools }) => {
                warn!(tools = ?tools, "Host reported screen recording");
            }
            Err(RecvError::Lagged(missed)) => warn!(missed, "Host event follower fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn probe_connectivity(gateway: Arc<AuthGateway>, every: std::time::Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let online = gateway.probe_connectivity().await;
        debug!(online, "Connectivity probe");
    }
}
