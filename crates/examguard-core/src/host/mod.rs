//! The desktop host process and the guards it runs.
//!
//! The UI never touches host state directly. It holds a `HostBridge` and
//! exchanges allow-listed JSON messages with a single host task:
//! - `channel`: allow-lists, typed commands and notices, reply envelope
//! - `process`: the task itself, including the mirrored session timer
//! - `policy`: Content-Security-Policy and navigation rules
//! - `permissions`, `alt_tab`, `recording`: device and focus guards
//! - `credentials`: the host-side user store behind `auth:*`

pub mod alt_tab;
pub mod bridge;
pub mod channel;
pub mod credentials;
pub mod permissions;
pub mod policy;
pub mod process;
pub mod recording;

pub use alt_tab::{AltTabFilter, ChordKey, ChordModifiers, KeyChord};
pub use bridge::{HostBridge, HostMessage};
pub use channel::{HostCommand, HostNotice, HostReply, PermissionKind};
pub use credentials::CredentialStore;
pub use permissions::{PermissionState, Permissions};
pub use policy::{ContentSecurityPolicy, NavigationPolicy};
pub use process::{GuardStatus, HostEvent, HostHandle, HostProcess, HostSettings};
pub use recording::{ProcessLister, RecordingDetector, SystemProcessLister};
