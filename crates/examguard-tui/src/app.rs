//! Application state for the examguard terminal front-end.
//!
//! `App` owns the core `AppContext` plus everything the screen needs: the
//! login form, the last guard status the host reported, and a status line.
//! Session and host events are drained once per frame in
//! `check_background_tasks`.

use std::time::{Duration, Instant};

use anyhow::Result;
use examguard_core::activity::InputKind;
use examguard_core::host::{AltTabFilter, GuardStatus, HostEvent, KeyChord};
use examguard_core::session::{Role, Session, SessionEvent, SessionState};
use examguard_core::{AppContext, Config};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

// ============================================================================
// Constants
// ============================================================================

/// How often the dashboard asks the host for fresh guard status.
const GUARD_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Overall application state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Normal,
    ShowingHelp,
    LoggingIn,
    ConfirmingQuit,
    Quitting,
}

/// Login form focus state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFocus {
    Username,
    Password,
    Role,
    RememberMe,
    Button,
}

impl LoginFocus {
    pub fn next(&self) -> Self {
        match self {
            LoginFocus::Username => LoginFocus::Password,
            LoginFocus::Password => LoginFocus::Role,
            LoginFocus::Role => LoginFocus::RememberMe,
            LoginFocus::RememberMe => LoginFocus::Button,
            LoginFocus::Button => LoginFocus::Username,
        }
    }

    pub fn prev(&self) -> Self {
        match self {
            LoginFocus::Username => LoginFocus::Button,
            LoginFocus::Password => LoginFocus::Username,
            LoginFocus::Role => LoginFocus::Password,
            LoginFocus::RememberMe => LoginFocus::Role,
            LoginFocus::Button => LoginFocus::RememberMe,
        }
    }
}

pub struct App {
    pub ctx: AppContext,
    pub state: AppState,

    // Login form state
    pub login_username: String,
    pub login_password: String,
    pub login_role: Role,
    pub login_remember: bool,
    pub login_focus: LoginFocus,
    pub login_error: Option<String>,

    pub status_message: Option<String>,
    pub guard_status: Option<GuardStatus>,
    /// Local copy of the host's alt-tab flag, consulted for every key
    pub alt_tab: AltTabFilter,
    /// Tools named by the last recording alert
    pub recording_alert: Vec<String>,

    session_events: broadcast::Receiver<SessionEvent>,
    host_events: Option<broadcast::Receiver<HostEvent>>,
    last_guard_refresh: Option<Instant>,
    /// Write `last_username` back to the config file after a login
    persist_config: bool,
}

impl App {
    /// Create the app from on-disk configuration and state.
    pub fn new(config: Config) -> Result<Self> {
        let ctx = AppContext::initialize(config)?;
        let mut app = Self::with_context(ctx);
        app.persist_config = true;
        Ok(app)
    }

    pub fn with_context(ctx: AppContext) -> Self {
        let session_events = ctx.session().subscribe();
        let host_events = ctx.subscribe_host();
        let login_username = ctx.config().last_username.clone().unwrap_or_default();
        let login_role = ctx
            .restored_session()
            .map(|session| session.role)
            .unwrap_or(Role::Student);

        Self {
            ctx,
            state: AppState::Normal,
            login_username,
            login_password: String::new(),
            login_role,
            login_remember: false,
            login_focus: LoginFocus::Username,
            login_error: None,
            status_message: None,
            guard_status: None,
            alt_tab: AltTabFilter::default(),
            recording_alert: Vec::new(),
            session_events,
            host_events,
            last_guard_refresh: None,
            persist_config: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.ctx.session().is_authenticated()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.ctx.session().current_session()
    }

    pub fn session_state(&self) -> SessionState {
        self.ctx.session().state()
    }

    /// Re-check a restored session with the backend.
    pub async fn validate_restored(&mut self) {
        if self.ctx.gateway().validate_token().await {
            if let Some(session) = self.current_session() {
                self.status_message = Some(format!("Welcome back, {}", session.username));
            }
        } else {
            info!("Restored session rejected");
            self.start_login();
            self.login_error = Some("Your session is no longer valid. Please log in.".to_string());
        }
    }

    // =========================================================================
    // Login / Logout
    // =========================================================================

    /// Start the login process (show login overlay)
    pub fn start_login(&mut self) {
        self.state = AppState::LoggingIn;
        self.login_focus = if self.login_username.is_empty() {
            LoginFocus::Username
        } else {
            LoginFocus::Password
        };
        self.login_error = None;
    }

    pub async fn attempt_login(&mut self) -> bool {
        self.login_error = None;
        let result = self
            .ctx
            .gateway()
            .login(
                &self.login_username,
                &self.login_password,
                self.login_role,
                self.login_remember,
            )
            .await;

        match result {
            Ok(success) => {
                self.login_password.clear();
                self.state = AppState::Normal;
                self.status_message = Some(if success.offline_login {
                    "Logged in offline with cached credentials".to_string()
                } else {
                    format!("Logged in as {}", success.user.display_name())
                });
                self.remember_username(&success.user.username);
                self.last_guard_refresh = None;
                true
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                self.login_error = Some(e.user_message());
                false
            }
        }
    }

    fn remember_username(&self, username: &str) {
        if !self.persist_config {
            return;
        }
        let mut config = self.ctx.config().clone();
        config.last_username = Some(username.to_string());
        if let Err(e) = config.save() {
            warn!(error = %e, "Failed to save config");
        }
    }

    pub fn logout(&mut self) {
        self.ctx.gateway().logout();
        self.start_login();
        self.status_message = Some("Logged out".to_string());
    }

    // =========================================================================
    // Dashboard actions
    // =========================================================================

    pub async fn sync(&mut self) {
        if self.ctx.queue().is_empty() {
            self.status_message = Some("Nothing to sync".to_string());
            return;
        }
        let report = self.ctx.queue().synchronize().await;
        self.status_message = Some(format!(
            "Synced {} operation(s), {} failed, {} remaining",
            report.processed, report.failed, report.remaining
        ));
    }

    pub async fn probe_connectivity(&mut self) {
        let online = self.ctx.gateway().probe_connectivity().await;
        self.status_message = Some(if online {
            "Backend reachable".to_string()
        } else {
            "Backend unreachable".to_string()
        });
    }

    pub async fn toggle_alt_tab(&mut self) {
        let wanted = !self.alt_tab.is_enabled();
        let enabled = match self.ctx.set_alt_tab_prevention(wanted).await {
            Some(enabled) => enabled,
            // No host: the filter still works inside this terminal
            None => wanted,
        };
        self.alt_tab.set_enabled(enabled);
        self.status_message = Some(format!(
            "Alt-tab prevention {}",
            if enabled { "on" } else { "off" }
        ));
        self.refresh_guard_status().await;
    }

    pub async fn refresh_guard_status(&mut self) {
        self.last_guard_refresh = Some(Instant::now());
        self.guard_status = self.ctx.guard_status().await;
        if let Some(ref status) = self.guard_status {
            self.alt_tab.set_enabled(status.alt_tab_prevention);
        }
    }

    // =========================================================================
    // Input forwarding
    // =========================================================================

    /// Report an input event to the activity tracker.
    pub fn record_input(&self, kind: InputKind) {
        if self.is_authenticated() {
            self.ctx.tracker().record(kind);
        }
    }

    pub fn should_swallow(&self, chord: &KeyChord) -> bool {
        self.alt_tab.should_swallow(chord)
    }

    // =========================================================================
    // Background events
    // =========================================================================

    pub async fn check_background_tasks(&mut self) {
        loop {
            match self.session_events.try_recv() {
                Ok(event) => self.process_session_event(event),
                Err(TryRecvError::Lagged(missed)) => {
                    debug!(missed, "Session events skipped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }

        let mut alerts = Vec::new();
        if let Some(ref mut rx) = self.host_events {
            loop {
                match rx.try_recv() {
                    Ok(HostEvent::RecordingDetected { tools }) => alerts.push(tools),
                    Ok(HostEvent::SessionTimedOut { .. }) => {}
                    Err(TryRecvError::Lagged(_)) => {}
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
        }
        if let Some(tools) = alerts.pop() {
            self.status_message = Some(format!("Screen recording detected: {}", tools.join(", ")));
            self.recording_alert = tools;
        }

        let due = self
            .last_guard_refresh
            .map_or(true, |at| at.elapsed() >= GUARD_REFRESH_INTERVAL);
        if due && self.ctx.host().is_some() {
            self.refresh_guard_status().await;
        }
    }

    fn process_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Expiring { remaining_secs, .. } => {
                self.status_message = Some(format!(
                    "Session expires in {} - press any key to stay logged in",
                    format_countdown(remaining_secs)
                ));
            }
            SessionEvent::Expired { .. } | SessionEvent::TokenExpired { .. } => {
                info!("Session expired");
                self.start_login();
                self.login_error = Some("Your session expired. Please log in again.".to_string());
            }
            SessionEvent::Ended { .. } => {
                if self.state != AppState::LoggingIn && self.state != AppState::Quitting {
                    self.start_login();
                }
            }
            SessionEvent::Created { .. } | SessionEvent::Restored { .. } => {}
        }
    }

    /// Time left before the session lapses, as `mm:ss`.
    pub fn expiry_countdown(&self) -> Option<String> {
        self.ctx
            .session()
            .time_until_expiry()
            .map(|left| format_countdown(left.num_seconds()))
    }
}

pub fn format_countdown(total_secs: i64) -> String {
    let total_secs = total_secs.max(0);
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use examguard_core::config::BackendKind;
    use examguard_core::storage::{MemoryKvBackend, StorageKey};
    use std::sync::Arc;

    fn app() -> App {
        let config = Config {
            backend: BackendKind::Mock,
            connectivity_probe_secs: 0,
            ..Config::default()
        };
        let ctx = AppContext::initialize_with(
            config,
            Arc::new(MemoryKvBackend::new()),
            StorageKey::from_bytes([3u8; 32]),
        )
        .unwrap();
        App::with_context(ctx)
    }

    #[test]
    fn test_format_countdown() {
        assert_eq!(format_countdown(0), "00:00");
        assert_eq!(format_countdown(-5), "00:00");
        assert_eq!(format_countdown(125), "02:05");
        assert_eq!(format_countdown(3 * 3600 + 7 * 60), "3h 07m");
    }

    #[test]
    fn test_login_focus_cycles() {
        let mut focus = LoginFocus::Username;
        for _ in 0..5 {
            focus = focus.next();
        }
        assert_eq!(focus, LoginFocus::Username);
        assert_eq!(LoginFocus::Username.prev(), LoginFocus::Button);
    }

    #[tokio::test]
    async fn test_login_and_logout() {
        let mut app = app();
        app.start_login();
        app.login_username = "alice".to_string();
        app.login_password = "secret".to_string();
        app.login_role = Role::Teacher;

        assert!(app.attempt_login().await);
        assert_eq!(app.state, AppState::Normal);
        assert!(app.login_password.is_empty());
        assert_eq!(app.current_session().unwrap().role, Role::Teacher);
        assert!(app.expiry_countdown().is_some());

        app.logout();
        assert_eq!(app.state, AppState::LoggingIn);
        assert!(!app.is_authenticated());
        assert_eq!(app.login_focus, LoginFocus::Password);
    }

    #[tokio::test]
    async fn test_failed_login_sets_error() {
        let mut app = app();
        app.start_login();
        app.login_username = "alice".to_string();

        assert!(!app.attempt_login().await);
        assert_eq!(app.state, AppState::LoggingIn);
        assert!(app.login_error.is_some());
    }

    #[tokio::test]
    async fn test_expiry_returns_to_login() {
        let mut app = app();
        app.login_username = "alice".to_string();
        app.login_password = "secret".to_string();
        assert!(app.attempt_login().await);

        app.ctx.session().expire_now();
        app.check_background_tasks().await;
        assert_eq!(app.state, AppState::LoggingIn);
        assert!(app.login_error.as_deref().unwrap().contains("expired"));
    }

    #[tokio::test]
    async fn test_alt_tab_toggle_without_host() {
        let mut app = app();
        assert!(!app.alt_tab.is_enabled());
        app.toggle_alt_tab().await;
        assert!(app.alt_tab.is_enabled());
        assert!(app.guard_status.is_none());
    }

    #[tokio::test]
    async fn test_sync_with_empty_queue() {
        let mut app = app();
        app.sync().await;
        assert_eq!(app.status_message.as_deref(), Some("Nothing to sync"));
    }
}
