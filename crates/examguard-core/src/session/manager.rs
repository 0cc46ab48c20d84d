use std::sync::{Arc, Mutex, MutexGuard, Weak};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use super::record::{generate_session_id, Session, SessionOptions, UserProfile};
use super::SessionEvent;
use crate::storage::{keys, SecureStore};

/// Capacity of the lifecycle event channel. Subscribers that fall this far
/// behind miss events and see `RecvError::Lagged`.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Keys removed when a session ends, expires, or is invalidated.
const SESSION_KEYS: &[&str] = &[
    keys::SESSION,
    keys::SESSION_ID,
    keys::SESSION_EXPIRY,
    keys::LAST_ACTIVITY,
    keys::USER_ROLE,
    keys::REMEMBER_ME,
    keys::AUTH_TOKEN,
    keys::REFRESH_TOKEN,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Rolling window for non-persistent sessions
    pub inactivity: Duration,
    /// Fixed window for "remember me" sessions
    pub persistent: Duration,
    /// How long before expiry `Expiring` fires; zero disables it
    pub warning: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            inactivity: Duration::minutes(30),
            persistent: Duration::days(30),
            warning: Duration::minutes(5),
        }
    }
}

impl SessionTimeouts {
    pub fn from_config(config: &crate::Config) -> Self {
        Self {
            inactivity: config.inactivity_timeout(),
            persistent: config.remember_me_duration(),
            warning: config.expiry_warning(),
        }
    }

    /// Expiry window for a session of the given kind.
    pub fn window(&self, persistent: bool) -> Duration {
        if persistent {
            self.persistent
        } else {
            self.inactivity
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Active,
    Expiring,
    Expired,
    Ended,
}

struct State {
    phase: SessionState,
    session_id: Option<String>,
    persistent: bool,
    timer: Option<JoinHandle<()>>,
    listeners: Vec<AbortHandle>,
}

impl State {
    fn is_live(&self) -> bool {
        matches!(self.phase, SessionState::Active | SessionState::Expiring)
    }

    fn is_current(&self, session_id: &str) -> bool {
        self.is_live() && self.session_id.as_deref() == Some(session_id)
    }
}

struct Inner {
    store: Arc<SecureStore>,
    timeouts: SessionTimeouts,
    events: broadcast::Sender<SessionEvent>,
    state: Mutex<State>,
}

/// Owns the current session: its record in the secure store, its single
/// expiry timer, and the activity listeners attached to it.
///
/// Cloning is cheap and every clone refers to the same session. Nothing in
/// the public surface returns an error: storage failures are logged and read
/// back as "no session".
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(store: Arc<SecureStore>, timeouts: SessionTimeouts) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                timeouts,
                events,
                state: Mutex::new(State {
                    phase: SessionState::NoSession,
                    session_id: None,
                    persistent: false,
                    timer: None,
                    listeners: Vec::new(),
                }),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Publish an event on behalf of a collaborator.
    pub fn notify(&self, event: SessionEvent) {
        self.inner.emit(event);
    }

    pub fn timeouts(&self) -> SessionTimeouts {
        self.inner.timeouts
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().phase
    }

    /// Start a new session for `user`, replacing any existing one.
    pub fn create_session(&self, user: &UserProfile, options: SessionOptions) -> Session {
        let now = Utc::now();
        let session = Session {
            username: user.username.clone(),
            role: user.role,
            created_at: now,
            persistent: options.persistent,
            session_id: options.session_id.unwrap_or_else(generate_session_id),
            offline: options.offline,
        };
        let expires_at = now + self.inner.timeouts.window(session.persistent);

        {
            let mut state = self.inner.lock();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            for listener in state.listeners.drain(..) {
                listener.abort();
            }
            state.phase = SessionState::Active;
            state.session_id = Some(session.session_id.clone());
            state.persistent = session.persistent;
        }

        if let Err(e) = self.inner.write_session(&session, expires_at, now) {
            error!(error = %e, "Failed to persist session");
        }
        self.inner.arm_timer(&session.session_id, expires_at);

        info!(
            username = %session.username,
            role = %session.role,
            persistent = session.persistent,
            offline = session.offline,
            "Session created"
        );
        self.inner.emit(SessionEvent::Created {
            session_id: session.session_id.clone(),
            username: session.username.clone(),
            role: session.role,
            persistent: session.persistent,
        });
        session
    }

    /// Reload a session left by a previous run. An expired or unreadable
    /// session is cleared and `None` returned.
    pub fn restore(&self) -> Option<Session> {
        let session = self.inner.stored_session();
        let expires_at = self.inner.stored_expiry();

        let (session, expires_at) = match (session, expires_at) {
            (Some(session), Some(expires_at)) if Utc::now() < expires_at => (session, expires_at),
            (None, None) => return None,
            _ => {
                debug!("Stored session is expired or incomplete, clearing");
                self.inner.clear_keys();
                return None;
            }
        };

        {
            let mut state = self.inner.lock();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.phase = SessionState::Active;
            state.session_id = Some(session.session_id.clone());
            state.persistent = session.persistent;
        }
        self.inner.arm_timer(&session.session_id, expires_at);

        info!(username = %session.username, "Session restored");
        self.inner.emit(SessionEvent::Restored {
            session_id: session.session_id.clone(),
            username: session.username.clone(),
            role: session.role,
            persistent: session.persistent,
        });
        Some(session)
    }

    pub fn current_session(&self) -> Option<Session> {
        self.inner.stored_session()
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.inner.stored_expiry()
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.inner.stored_time(keys::LAST_ACTIVITY)
    }

    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.expiry().map(|expiry| (expiry - Utc::now()).max(Duration::zero()))
    }

    /// True iff a session is stored and its expiry is still in the future.
    pub fn is_authenticated(&self) -> bool {
        match (self.inner.stored_session(), self.inner.stored_expiry()) {
            (Some(_), Some(expiry)) => Utc::now() < expiry,
            _ => false,
        }
    }

    /// Note that the user did something.
    ///
    /// For a non-persistent session this rolls the expiry forward, unless the
    /// gap since the previous activity already exceeds the inactivity window,
    /// in which case the session expires now. Persistent sessions only record
    /// the timestamp.
    pub fn record_user_activity(&self) {
        let (session_id, persistent) = {
            let state = self.inner.lock();
            match (&state.session_id, state.is_live()) {
                (Some(id), true) => (id.clone(), state.persistent),
                _ => return,
            }
        };

        let now = Utc::now();
        let previous = self.last_activity().unwrap_or(now);
        if let Err(e) = self.inner.store.set(keys::LAST_ACTIVITY, &now.to_rfc3339()) {
            warn!(error = %e, "Failed to record activity");
        }

        if persistent {
            return;
        }

        let inactivity = self.inner.timeouts.inactivity;
        if now - previous > inactivity {
            info!(idle_secs = (now - previous).num_seconds(), "Inactivity window exceeded");
            self.inner.expire(&session_id, false);
            return;
        }

        self.inner.reschedule(&session_id, now + inactivity);
    }

    /// Push the expiry out by `duration` past the later of now and the
    /// current expiry. Returns false when there is no live session.
    pub fn extend_session(&self, duration: Duration) -> bool {
        let Some(session_id) = self.inner.live_session_id() else {
            return false;
        };
        let base = self.expiry().unwrap_or_else(Utc::now).max(Utc::now());
        self.inner.reschedule(&session_id, base + duration)
    }

    /// Set the expiry to `now + duration`. Returns false when there is no
    /// live session.
    pub fn update_session_expiry(&self, duration: Duration) -> bool {
        let Some(session_id) = self.inner.live_session_id() else {
            return false;
        };
        self.inner.reschedule(&session_id, Utc::now() + duration)
    }

    /// Attach an activity listener to the current session. It is aborted when
    /// the session ends or expires. With no live session it is aborted now.
    pub fn register_listener(&self, listener: AbortHandle) {
        let mut state = self.inner.lock();
        if state.is_live() {
            state.listeners.push(listener);
        } else {
            listener.abort();
        }
    }

    /// Explicit logout. Cancels the timer and listeners, clears every session
    /// key, and emits `Ended`. Calling it again is a no-op.
    pub fn end_session(&self) {
        if let Some(session_id) = self.inner.teardown(SessionState::Ended) {
            info!("Session ended");
            self.inner.emit(SessionEvent::Ended { session_id });
        }
    }

    /// Tear the session down because its credential was rejected.
    pub fn invalidate(&self) {
        if let Some(session_id) = self.inner.teardown(SessionState::Expired) {
            warn!("Session invalidated, credential rejected");
            self.inner.emit(SessionEvent::TokenExpired { session_id });
        }
    }

    /// Expire the live session immediately, as if its timer had run out.
    /// Used when another component (the host's mirrored timer) decides the
    /// session is over.
    pub fn expire_now(&self) {
        if let Some(session_id) = self.inner.live_session_id() {
            self.inner.expire(&session_id, false);
        }
    }

    /// Stop the timer without touching stored state, for process shutdown.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        for listener in state.listeners.drain(..) {
            listener.abort();
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        debug!(?event, "Session event");
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn live_session_id(&self) -> Option<String> {
        let state = self.lock();
        if state.is_live() {
            state.session_id.clone()
        } else {
            None
        }
    }

    fn stored_session(&self) -> Option<Session> {
        self.store.get_json(keys::SESSION)
    }

    fn stored_expiry(&self) -> Option<DateTime<Utc>> {
        self.stored_time(keys::SESSION_EXPIRY)
    }

    fn stored_time(&self, key: &str) -> Option<DateTime<Utc>> {
        let raw = self.store.get(key)?;
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(time) => Some(time.with_timezone(&Utc)),
            Err(e) => {
                warn!(key = key, error = %e, "Discarding unparseable timestamp");
                None
            }
        }
    }

    fn write_session(
        &self,
        session: &Session,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.store.set_json(keys::SESSION, session)?;
        self.store.set(keys::SESSION_ID, &session.session_id)?;
        self.store.set(keys::USER_ROLE, session.role.as_str())?;
        self.store.set(keys::REMEMBER_ME, if session.persistent { "true" } else { "false" })?;
        self.store.set(keys::SESSION_EXPIRY, &expires_at.to_rfc3339())?;
        self.store.set(keys::LAST_ACTIVITY, &now.to_rfc3339())?;
        Ok(())
    }

    fn clear_keys(&self) {
        for key in SESSION_KEYS {
            if let Err(e) = self.store.remove(key) {
                warn!(key = key, error = %e, "Failed to clear session key");
            }
        }
    }

    /// Write a new expiry and re-arm the timer, if `session_id` is still live.
    fn reschedule(self: &Arc<Self>, session_id: &str, expires_at: DateTime<Utc>) -> bool {
        {
            let mut state = self.lock();
            if !state.is_current(session_id) {
                return false;
            }
            state.phase = SessionState::Active;
        }
        if let Err(e) = self.store.set(keys::SESSION_EXPIRY, &expires_at.to_rfc3339()) {
            warn!(error = %e, "Failed to persist session expiry");
        }
        self.arm_timer(session_id, expires_at);
        true
    }

    /// Replace the running timer with one for `expires_at`. There is never
    /// more than one timer per manager.
    fn arm_timer(self: &Arc<Self>, session_id: &str, expires_at: DateTime<Utc>) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No async runtime, session expiry is checked lazily only");
                return;
            }
        };

        let weak = Arc::downgrade(self);
        let id = session_id.to_string();
        let warning = self.timeouts.warning;
        let timer = handle.spawn(run_timer(weak, id, expires_at, warning));

        let mut state = self.lock();
        if let Some(previous) = state.timer.replace(timer) {
            previous.abort();
        }
    }

    fn mark_expiring(&self, session_id: &str, expires_at: DateTime<Utc>) {
        {
            let mut state = self.lock();
            if !state.is_current(session_id) || state.phase == SessionState::Expiring {
                return;
            }
            state.phase = SessionState::Expiring;
        }
        let remaining_secs = (expires_at - Utc::now()).num_seconds().max(0);
        self.emit(SessionEvent::Expiring {
            session_id: session_id.to_string(),
            remaining_secs,
        });
    }

    /// Expire `session_id` if it is still the live session. Stale timers and
    /// duplicate triggers fall through without effect.
    fn expire(&self, session_id: &str, from_timer: bool) {
        let (timer, listeners) = {
            let mut state = self.lock();
            if !state.is_current(session_id) {
                return;
            }
            state.phase = SessionState::Expired;
            state.session_id = None;
            (state.timer.take(), std::mem::take(&mut state.listeners))
        };
        // Aborting from inside the timer task would cancel this very call
        if let Some(timer) = timer.filter(|_| !from_timer) {
            timer.abort();
        }
        for listener in listeners {
            listener.abort();
        }
        self.clear_keys();
        info!("Session expired");
        self.emit(SessionEvent::Expired {
            session_id: session_id.to_string(),
        });
    }

    /// Shared teardown for logout and invalidation. Returns the id of the
    /// session that was live, or `None` when there was nothing to end.
    fn teardown(&self, phase: SessionState) -> Option<String> {
        let (session_id, timer, listeners) = {
            let mut state = self.lock();
            let session_id = if state.is_live() { state.session_id.take() } else { None };
            if session_id.is_some() {
                state.phase = phase;
            }
            (session_id, state.timer.take(), std::mem::take(&mut state.listeners))
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        for listener in listeners {
            listener.abort();
        }
        // Clear even without a live session so leftovers from a crash go too
        self.clear_keys();
        session_id
    }
}

async fn run_timer(
    inner: Weak<Inner>,
    session_id: String,
    expires_at: DateTime<Utc>,
    warning: Duration,
) {
    // Armed inside the warning window: warn right away
    if warning > Duration::zero() && Utc::now() < expires_at {
        let until_warning = (expires_at - warning) - Utc::now();
        if until_warning > Duration::zero() {
            tokio::time::sleep(to_std(until_warning)).await;
        }
        match inner.upgrade() {
            Some(inner) => inner.mark_expiring(&session_id, expires_at),
            None => return,
        }
    }

    let remaining = expires_at - Utc::now();
    if remaining > Duration::zero() {
        tokio::time::sleep(to_std(remaining)).await;
    }
    if let Some(inner) = inner.upgrade() {
        inner.expire(&session_id, true);
    }
}

fn to_std(duration: Duration) -> std::time::Duration {
    duration.to_std().unwrap_or(std::time::Duration::ZERO)
}
