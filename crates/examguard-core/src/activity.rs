//! User-activity tracking.
//!
//! The front-end forwards raw input events to an `ActivitySender`. A listener
//! task filters them by kind, throttles them, and turns the survivors into
//! `SessionManager::record_user_activity` calls plus a `user-activity` notice
//! for the host's mirrored timer.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::host::{HostBridge, HostNotice};
use crate::session::SessionManager;
use crate::Config;

/// Raw events buffered between the front-end and the listener. Extra events
/// are dropped; the throttle would discard most of them anyway.
const ACTIVITY_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputKind {
    PointerDown,
    KeyDown,
    TouchStart,
    Scroll,
}

impl InputKind {
    pub const ALL: [InputKind; 4] = [
        InputKind::PointerDown,
        InputKind::KeyDown,
        InputKind::TouchStart,
        InputKind::Scroll,
    ];
}

#[derive(Debug, Clone)]
pub struct ActivityConfig {
    /// Kinds that count as activity
    pub events: Vec<InputKind>,
    /// Minimum spacing between recorded activity
    pub throttle: Duration,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            events: InputKind::ALL.to_vec(),
            throttle: Duration::from_millis(1000),
        }
    }
}

impl ActivityConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            events: InputKind::ALL.to_vec(),
            throttle: config.activity_throttle(),
        }
    }
}

/// Front-end handle for reporting input. Cheap to clone.
#[derive(Clone)]
pub struct ActivitySender {
    tx: mpsc::Sender<InputKind>,
}

impl ActivitySender {
    /// Report an input event. Returns false if no listener is attached.
    pub fn record(&self, kind: InputKind) -> bool {
        match self.tx.try_send(kind) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct Installed {
    sender: ActivitySender,
    abort: AbortHandle,
}

pub struct ActivityTracker {
    session: SessionManager,
    bridge: Option<HostBridge>,
    config: ActivityConfig,
    installed: Mutex<Option<Installed>>,
}

impl ActivityTracker {
    pub fn new(session: SessionManager, bridge: Option<HostBridge>, config: ActivityConfig) -> Self {
        Self {
            session,
            bridge,
            config,
            installed: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Installed>> {
        self.installed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start listening, replacing any previous listener. The listener is tied
    /// to the current session and stops when it ends or expires.
    ///
    /// Must be called from within a tokio runtime.
    pub fn install(&self) -> ActivitySender {
        let (tx, rx) = mpsc::channel(ACTIVITY_CHANNEL_CAPACITY);
        let sender = ActivitySender { tx };

        let task = tokio::spawn(listen(
            rx,
            self.session.clone(),
            self.bridge.clone(),
            self.config.clone(),
        ));
        let abort = task.abort_handle();
        self.session.register_listener(abort.clone());

        if let Some(previous) = self.lock().replace(Installed {
            sender: sender.clone(),
            abort,
        }) {
            previous.abort.abort();
        }
        debug!("Activity listener installed");
        sender
    }

    pub fn uninstall(&self) {
        if let Some(installed) = self.lock().take() {
            installed.abort.abort();
            debug!("Activity listener removed");
        }
    }

    pub fn is_listening(&self) -> bool {
        self.lock()
            .as_ref()
            .map(|installed| !installed.abort.is_finished() && !installed.sender.is_closed())
            .unwrap_or(false)
    }

    /// Report an event to the current listener, if any.
    pub fn record(&self, kind: InputKind) -> bool {
        let sender = self.lock().as_ref().map(|installed| installed.sender.clone());
        match sender {
            Some(sender) => sender.record(kind),
            None => false,
        }
    }
}

impl Drop for ActivityTracker {
    fn drop(&mut self) {
        self.uninstall();
    }
}

async fn listen(
    mut rx: mpsc::Receiver<InputKind>,
    session: SessionManager,
    bridge: Option<HostBridge>,
    config: ActivityConfig,
) {
    let mut last: Option<Instant> = None;
    while let Some(kind) = rx.recv().await {
        if !config.events.contains(&kind) {
            continue;
        }
        let now = Instant::now();
        if last.is_some_and(|previous| now.duration_since(previous) < config.throttle) {
            continue;
        }
        last = Some(now);

        session.record_user_activity();
        if let Some(ref bridge) = bridge {
            bridge.notify(&HostNotice::UserActivity);
        }
    }
    debug!("Activity channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostMessage;
    use crate::session::{Role, SessionOptions, SessionTimeouts, UserProfile};
    use crate::storage::{MemoryKvBackend, SecureStore, StorageKey};
    use std::sync::Arc;

    fn session() -> SessionManager {
        let store = Arc::new(SecureStore::new(
            Arc::new(MemoryKvBackend::new()),
            &StorageKey::from_bytes([6u8; 32]),
        ));
        SessionManager::new(store, SessionTimeouts::default())
    }

    fn start(session: &SessionManager) {
        session.create_session(&UserProfile::new("alice", Role::Student), SessionOptions::default());
    }

    fn count_sends(rx: &mut mpsc::Receiver<HostMessage>) -> usize {
        let mut count = 0;
        while let Ok(message) = rx.try_recv() {
            if matches!(message, HostMessage::Send { ref channel, .. } if channel == "user-activity") {
                count += 1;
            }
        }
        count
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_events_are_throttled() {
        let session = session();
        start(&session);
        let (tx, mut rx) = mpsc::channel(16);
        let tracker = ActivityTracker::new(session.clone(), Some(HostBridge::new(tx)), ActivityConfig::default());

        let sender = tracker.install();
        assert!(sender.record(InputKind::KeyDown));
        assert!(sender.record(InputKind::PointerDown));
        assert!(sender.record(InputKind::Scroll));
        settle().await;

        assert_eq!(count_sends(&mut rx), 1);
        assert!(session.last_activity().is_some());
    }

    #[tokio::test]
    async fn test_unlisted_kinds_ignored() {
        let session = session();
        start(&session);
        let (tx, mut rx) = mpsc::channel(16);
        let config = ActivityConfig {
            events: vec![InputKind::KeyDown],
            throttle: Duration::ZERO,
        };
        let tracker = ActivityTracker::new(session, Some(HostBridge::new(tx)), config);

        tracker.install();
        tracker.record(InputKind::Scroll);
        tracker.record(InputKind::TouchStart);
        tracker.record(InputKind::KeyDown);
        tracker.record(InputKind::KeyDown);
        settle().await;

        assert_eq!(count_sends(&mut rx), 2);
    }

    #[tokio::test]
    async fn test_end_session_removes_listener() {
        let session = session();
        start(&session);
        let tracker = ActivityTracker::new(session.clone(), None, ActivityConfig::default());

        let sender = tracker.install();
        settle().await;
        assert!(tracker.is_listening());

        session.end_session();
        settle().await;
        assert!(!tracker.is_listening());
        assert!(!sender.record(InputKind::KeyDown));
    }

    #[tokio::test]
    async fn test_install_without_session_is_inert() {
        let session = session();
        let tracker = ActivityTracker::new(session, None, ActivityConfig::default());
        tracker.install();
        settle().await;
        assert!(!tracker.is_listening());
    }

    #[tokio::test]
    async fn test_reinstall_replaces_listener() {
        let session = session();
        start(&session);
        let tracker = ActivityTracker::new(session, None, ActivityConfig::default());

        let first = tracker.install();
        let second = tracker.install();
        settle().await;
        assert!(first.is_closed());
        assert!(!second.is_closed());

        tracker.uninstall();
        settle().await;
        assert!(!tracker.is_listening());
        assert!(!tracker.record(InputKind::KeyDown));
    }
}
