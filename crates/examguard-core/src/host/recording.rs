//! Screen-recording detection.
//!
//! A heuristic: the running process names are compared with a list of known
//! capture tools. Renamed binaries, browser-based recorders and hardware
//! capture all go unnoticed. Treat a hit as a signal, not as proof.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Process names of common screen capture tools, lowercase, without `.exe`.
pub const KNOWN_RECORDERS: &[&str] = &[
    "obs",
    "obs64",
    "obs32",
    "obs-studio",
    "simplescreenrecorder",
    "kazam",
    "vokoscreen",
    "vokoscreenng",
    "recordmydesktop",
    "peek",
    "kooha",
    "gnome-screencast",
    "camtasia",
    "camtasiastudio",
    "bandicam",
    "fraps",
    "sharex",
    "screenflow",
    "screenrec",
    "loom",
    "xsplit.core",
    "action_x64",
    "quicktime player",
];

/// Source of running process names.
pub trait ProcessLister: Send + Sync {
    fn process_names(&self) -> Result<Vec<String>>;
}

/// Lists processes from the operating system: `/proc` on Linux, `ps` on
/// other unixes, `tasklist` on Windows.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessLister;

impl ProcessLister for SystemProcessLister {
    #[cfg(target_os = "linux")]
    fn process_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir("/proc").context("Failed to read /proc")? {
            let Ok(entry) = entry else { continue };
            let file_name = entry.file_name();
            if !file_name.to_string_lossy().chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            // Processes can exit between listing and reading
            if let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) {
                names.push(comm.trim().to_string());
            }
        }
        Ok(names)
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    fn process_names(&self) -> Result<Vec<String>> {
        let output = std::process::Command::new("ps")
            .args(["-A", "-o", "comm="])
            .output()
            .context("Failed to run ps")?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    #[cfg(windows)]
    fn process_names(&self) -> Result<Vec<String>> {
        let output = std::process::Command::new("tasklist")
            .args(["/FO", "CSV", "/NH"])
            .output()
            .context("Failed to run tasklist")?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.split(',').next())
            .map(|name| name.trim_matches('"').to_string())
            .filter(|name| !name.is_empty())
            .collect())
    }
}

/// Reduce a process name or path to the form used in `KNOWN_RECORDERS`.
fn normalize(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let lower = base.trim().to_lowercase();
    lower
        .strip_suffix(".exe")
        .map(str::to_string)
        .unwrap_or(lower)
}

#[derive(Clone)]
pub struct RecordingDetector {
    lister: Arc<dyn ProcessLister>,
}

impl RecordingDetector {
    pub fn new(lister: Box<dyn ProcessLister>) -> Self {
        Self {
            lister: Arc::from(lister),
        }
    }

    /// Names of running capture tools, deduplicated, in listing order.
    /// A listing failure is logged and reported as nothing found.
    ///
    /// Blocks while the process table is read.
    pub fn scan(&self) -> Vec<String> {
        let names = match self.lister.process_names() {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Process listing failed, skipping recording check");
                return Vec::new();
            }
        };

        let mut found: Vec<String> = Vec::new();
        for name in names {
            let normalized = normalize(&name);
            if KNOWN_RECORDERS.contains(&normalized.as_str()) && !found.contains(&normalized) {
                found.push(normalized);
            }
        }
        debug!(count = found.len(), "Recording scan finished");
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLister(Vec<&'static str>);

    impl ProcessLister for FixedLister {
        fn process_names(&self) -> Result<Vec<String>> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
    }

    struct FailingLister;

    impl ProcessLister for FailingLister {
        fn process_names(&self) -> Result<Vec<String>> {
            anyhow::bail!("permission denied")
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("OBS64.EXE"), "obs64");
        assert_eq!(normalize("/usr/bin/obs"), "obs");
        assert_eq!(normalize("C:\\Program Files\\ShareX\\ShareX.exe"), "sharex");
    }

    #[test]
    fn test_known_tools_detected() {
        let detector = RecordingDetector::new(Box::new(FixedLister(vec![
            "bash",
            "obs",
            "/usr/bin/obs",
            "Bandicam.exe",
            "obsidian",
            "firefox",
        ])));
        assert_eq!(detector.scan(), vec!["obs".to_string(), "bandicam".to_string()]);
    }

    #[test]
    fn test_listing_failure_is_quiet() {
        let detector = RecordingDetector::new(Box::new(FailingLister));
        assert!(detector.scan().is_empty());
    }
}
