use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::channel::PermissionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum PermissionState {
    Granted,
    Denied,
    /// Never asked for
    Prompt,
}

/// Device permissions held by the host on behalf of the exam window.
#[derive(Debug, Clone)]
pub struct Permissions {
    grantable: BTreeSet<PermissionKind>,
    states: BTreeMap<PermissionKind, PermissionState>,
}

impl Permissions {
    pub fn new(grantable: impl IntoIterator<Item = PermissionKind>) -> Self {
        Self {
            grantable: grantable.into_iter().collect(),
            states: BTreeMap::new(),
        }
    }

    /// Parse the configured list, ignoring names that are not permissions.
    pub fn from_names(names: &[String]) -> Self {
        Self::new(names.iter().filter_map(|name| PermissionKind::parse(name)))
    }

    pub fn check(&self, kind: PermissionKind) -> PermissionState {
        self.states
            .get(&kind)
            .copied()
            .unwrap_or(PermissionState::Prompt)
    }

    /// Grant `kind` if policy allows it, otherwise record the denial.
    pub fn request(&mut self, kind: PermissionKind) -> PermissionState {
        let state = if self.grantable.contains(&kind) {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        };
        self.states.insert(kind, state);
        info!(?kind, ?state, "Permission requested");
        state
    }

    pub fn snapshot(&self) -> BTreeMap<PermissionKind, PermissionState> {
        [
            PermissionKind::Camera,
            PermissionKind::Microphone,
            PermissionKind::Screen,
        ]
        .into_iter()
        .map(|kind| (kind, self.check(kind)))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_honours_grantable_list() {
        let mut permissions =
            Permissions::from_names(&["camera".to_string(), "microphone".to_string(), "gps".to_string()]);
        assert_eq!(permissions.check(PermissionKind::Camera), PermissionState::Prompt);
        assert_eq!(permissions.request(PermissionKind::Camera), PermissionState::Granted);
        assert_eq!(permissions.check(PermissionKind::Camera), PermissionState::Granted);
        assert_eq!(permissions.request(PermissionKind::Screen), PermissionState::Denied);
        assert_eq!(permissions.check(PermissionKind::Screen), PermissionState::Denied);
    }

    #[test]
    fn test_snapshot_covers_every_kind() {
        let permissions = Permissions::new([PermissionKind::Camera]);
        let snapshot = permissions.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.values().all(|state| *state == PermissionState::Prompt));
    }
}
