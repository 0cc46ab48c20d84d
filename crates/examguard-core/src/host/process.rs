//! The host side of the bridge: one task that owns every guard.
//!
//! All state lives inside the task and is reached only through messages, so
//! nothing here is shared with the UI side.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::alt_tab::AltTabFilter;
use super::bridge::{HostBridge, HostMessage};
use super::channel::{is_invoke_channel, is_send_channel, HostCommand, HostNotice, HostReply};
use super::credentials::CredentialStore;
use super::permissions::{PermissionState, Permissions};
use super::policy::{ContentSecurityPolicy, NavigationPolicy};
use super::recording::{ProcessLister, RecordingDetector};
use super::PermissionKind;
use crate::api::ApiError;
use crate::Config;

/// Queue depth between the bridge and the host task.
const HOST_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the host event broadcast.
const HOST_EVENT_CAPACITY: usize = 16;

/// How often running processes are checked for capture tools.
pub const DEFAULT_RECORDING_SCAN_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct HostSettings {
    /// Mirrored inactivity timeout
    pub session_timeout: Duration,
    pub grantable_permissions: Vec<String>,
    pub allowed_origins: Vec<String>,
    /// Origin the exam window talks to, added to `connect-src`
    pub api_origin: Option<String>,
    /// `None` disables periodic scans; `force-check-recording` still works
    pub recording_scan_interval: Option<Duration>,
}

impl HostSettings {
    pub fn from_config(config: &Config) -> Self {
        let api_origin = reqwest::Url::parse(&config.api_base_url)
            .ok()
            .map(|url| url.origin())
            .filter(|origin| origin.is_tuple())
            .map(|origin| origin.ascii_serialization());
        Self {
            session_timeout: config
                .host_timeout()
                .to_std()
                .unwrap_or(Duration::from_secs(30 * 60)),
            grantable_permissions: config.grantable_permissions.clone(),
            allowed_origins: config.allowed_origins.clone(),
            api_origin,
            recording_scan_interval: Some(Duration::from_secs(DEFAULT_RECORDING_SCAN_SECS)),
        }
    }
}

/// Things the host tells the UI on its own initiative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// The mirrored timer ran out without activity
    SessionTimedOut { session_id: Option<String> },
    RecordingDetected { tools: Vec<String> },
}

/// Reply payload of `get-guard-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct GuardStatus {
    pub alt_tab_prevention: bool,
    pub permissions: Vec<(PermissionKind, PermissionState)>,
    pub recording_tools: Vec<String>,
    pub session_timer_armed: bool,
    pub content_security_policy: String,
}

/// The host's copy of the inactivity timer. It runs independently of the UI's
/// own timer so a wedged UI still loses its session.
///
/// Remember-me sessions have no inactivity deadline. Their fixed window is
/// enforced by the session manager alone.
struct MirroredTimer {
    timeout: Duration,
    deadline: Option<Instant>,
    session_id: Option<String>,
}

impl MirroredTimer {
    fn arm(&mut self, session_id: String, persistent: bool) {
        self.deadline = (!persistent).then(|| Instant::now() + self.timeout);
        self.session_id = Some(session_id);
    }

    /// Activity only matters while a session is being timed.
    fn touch(&mut self) {
        if self.deadline.is_some() {
            self.deadline = Some(Instant::now() + self.timeout);
        }
    }

    fn clear(&mut self) -> Option<String> {
        self.deadline = None;
        self.session_id.take()
    }
}

/// Handle owned by the UI side.
pub struct HostHandle {
    bridge: HostBridge,
    events: broadcast::Sender<HostEvent>,
    navigation: NavigationPolicy,
    content_security_policy: String,
    task: JoinHandle<()>,
}

impl HostHandle {
    pub fn bridge(&self) -> HostBridge {
        self.bridge.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    pub fn navigation(&self) -> &NavigationPolicy {
        &self.navigation
    }

    pub fn content_security_policy(&self) -> &str {
        &self.content_security_policy
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

pub struct HostProcess {
    timer: MirroredTimer,
    permissions: Permissions,
    alt_tab: AltTabFilter,
    recording: RecordingDetector,
    last_recording: Vec<String>,
    credentials: Arc<CredentialStore>,
    csp: String,
    events: broadcast::Sender<HostEvent>,
}

impl HostProcess {
    /// Start the host task. Must be called from within a tokio runtime.
    pub fn spawn(
        settings: HostSettings,
        credentials: Arc<CredentialStore>,
        lister: Box<dyn ProcessLister>,
    ) -> HostHandle {
        let (tx, rx) = mpsc::channel(HOST_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(HOST_EVENT_CAPACITY);

        let mut csp = ContentSecurityPolicy::default();
        if let Some(ref origin) = settings.api_origin {
            csp = csp.connect_to(origin);
        }
        let csp = csp.header_value();
        let navigation = NavigationPolicy::new(&settings.allowed_origins);

        let process = HostProcess {
            timer: MirroredTimer {
                timeout: settings.session_timeout,
                deadline: None,
                session_id: None,
            },
            permissions: Permissions::from_names(&settings.grantable_permissions),
            alt_tab: AltTabFilter::default(),
            recording: RecordingDetector::new(lister),
            last_recording: Vec::new(),
            credentials,
            csp: csp.clone(),
            events: events.clone(),
        };
        let task = tokio::spawn(process.run(rx, settings.recording_scan_interval));
        info!("Host process started");

        HostHandle {
            bridge: HostBridge::new(tx),
            events,
            navigation,
            content_security_policy: csp,
            task,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<HostMessage>, scan_every: Option<Duration>) {
        let mut scan = scan_every.map(tokio::time::interval);

        loop {
            let deadline = self.timer.deadline;
            let timeout = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => pending::<()>().await,
                }
            };
            let tick = async {
                match scan.as_mut() {
                    Some(interval) => {
                        interval.tick().await;
                    }
                    None => pending::<()>().await,
                }
            };

            tokio::select! {
                message = rx.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => break,
                },
                _ = timeout => self.on_timeout(),
                _ = tick => {
                    self.check_recording(false).await;
                }
            }
        }
        debug!("Host process stopped");
    }

    async fn handle(&mut self, message: HostMessage) {
        match message {
            HostMessage::Invoke {
                channel,
                payload,
                reply,
            } => {
                if !is_invoke_channel(&channel) {
                    warn!(channel = %channel, "Host refused invoke on unlisted channel");
                    return;
                }
                let response = match HostCommand::decode(&channel, payload) {
                    Ok(command) => self.execute(command).await,
                    Err(message) => HostReply::fault("bad_request", message).to_value(),
                };
                // The caller may have given up
                let _ = reply.send(response);
            }
            HostMessage::Send { channel, payload } => {
                if !is_send_channel(&channel) {
                    warn!(channel = %channel, "Host refused notice on unlisted channel");
                    return;
                }
                match HostNotice::decode(&channel, payload) {
                    Ok(notice) => self.apply(notice),
                    Err(message) => warn!(channel = %channel, %message, "Malformed host notice"),
                }
            }
        }
    }

    fn apply(&mut self, notice: HostNotice) {
        match notice {
            HostNotice::UserActivity => self.timer.touch(),
            HostNotice::SessionCreated {
                session_id,
                persistent,
            }
            | HostNotice::SessionRestored {
                session_id,
                persistent,
            } => {
                debug!(session_id = %session_id, persistent, "Host timer armed");
                self.timer.arm(session_id, persistent);
            }
            HostNotice::SessionExpired { .. } | HostNotice::SessionEnded { .. } => {
                self.timer.clear();
            }
        }
    }

    fn on_timeout(&mut self) {
        let session_id = self.timer.clear();
        warn!("Host session timer expired");
        let _ = self.events.send(HostEvent::SessionTimedOut { session_id });
    }

    async fn check_recording(&mut self, forced: bool) -> Vec<String> {
        let detector = self.recording.clone();
        let tools = match tokio::task::spawn_blocking(move || detector.scan()).await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(error = %e, "Recording scan task failed");
                Vec::new()
            }
        };
        if !tools.is_empty() && (forced || tools != self.last_recording) {
            warn!(tools = ?tools, "Screen recording software detected");
            let _ = self.events.send(HostEvent::RecordingDetected {
                tools: tools.clone(),
            });
        }
        self.last_recording = tools.clone();
        tools
    }

    fn status(&self) -> GuardStatus {
        GuardStatus {
            alt_tab_prevention: self.alt_tab.is_enabled(),
            permissions: self.permissions.snapshot().into_iter().collect(),
            recording_tools: self.last_recording.clone(),
            session_timer_armed: self.timer.deadline.is_some(),
            content_security_policy: self.csp.clone(),
        }
    }

    /// Run a credential-store call off the async workers; password hashing
    /// is deliberately slow.
    async fn with_credentials<T, F>(&self, call: F) -> Value
    where
        T: Serialize + Send + 'static,
        F: FnOnce(&CredentialStore) -> Result<T, ApiError> + Send + 'static,
    {
        let store = Arc::clone(&self.credentials);
        match tokio::task::spawn_blocking(move || call(&store)).await {
            Ok(Ok(data)) => match serde_json::to_value(data) {
                Ok(data) => HostReply::ok(data).to_value(),
                Err(e) => HostReply::fault("internal", e.to_string()).to_value(),
            },
            Ok(Err(e)) => HostReply::from_error(&e).to_value(),
            Err(e) => HostReply::fault("internal", e.to_string()).to_value(),
        }
    }

    async fn execute(&mut self, command: HostCommand) -> Value {
        match command {
            HostCommand::CheckPermission(kind) => {
                let state = self.permissions.check(kind);
                HostReply::ok(json!({ "permission": kind, "state": state })).to_value()
            }
            HostCommand::RequestPermission(kind) => {
                let state = self.permissions.request(kind);
                HostReply::ok(json!({ "permission": kind, "state": state })).to_value()
            }
            HostCommand::ToggleAltTabPrevention(enabled) => {
                self.alt_tab.set_enabled(enabled);
                info!(enabled, "Alt-tab prevention toggled");
                HostReply::ok(json!({ "enabled": enabled })).to_value()
            }
            HostCommand::ForceCheckRecording => {
                let tools = self.check_recording(true).await;
                HostReply::ok(json!({ "detected": !tools.is_empty(), "tools": tools })).to_value()
            }
            HostCommand::Login(request) => self.with_credentials(move |store| store.login(&request)).await,
            HostCommand::Logout { token } => {
                self.credentials.logout(&token);
                HostReply::ok(json!({})).to_value()
            }
            HostCommand::Validate { token } => {
                let valid = self.credentials.validate(&token);
                HostReply::ok(json!({ "valid": valid })).to_value()
            }
            HostCommand::Refresh {
                token,
                refresh_token,
            } => match self.credentials.refresh(&token, refresh_token.as_deref()) {
                Ok(pair) => HostReply::ok(json!(pair)).to_value(),
                Err(e) => HostReply::from_error(&e).to_value(),
            },
            HostCommand::Register(request) => {
                self.with_credentials(move |store| store.register(&request)).await
            }
            HostCommand::GuardStatus => match serde_json::to_value(self.status()) {
                Ok(status) => HostReply::ok(status).to_value(),
                Err(e) => HostReply::fault("internal", e.to_string()).to_value(),
            },
        }
    }
}
