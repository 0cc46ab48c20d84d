use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Store file name in the data directory
pub const STORE_FILE: &str = "store.json";

/// A durable map of string keys to string values.
///
/// Implementations are shared across the whole process, so they must be safe
/// to call from any task.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;
}

/// Backend that keeps everything in one JSON object on disk.
///
/// The whole map is held in memory and rewritten on every mutation. The
/// values are small (tokens, timestamps, a short queue), so this stays cheap.
pub struct FileKvBackend {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileKvBackend {
    /// Open the store at `path`, creating parent directories as needed.
    /// An unreadable or corrupt file is treated as an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store directory {}", parent.display()))?;
        }

        let entries = match Self::read_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Store file unreadable, starting empty");
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), entries = entries.len(), "Opened store");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Open the default store file inside `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Result<Self> {
        Self::open(data_dir.join(STORE_FILE))
    }

    fn read_entries(path: &Path) -> Result<BTreeMap<String, String>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(path).context("Failed to read store file")?;
        serde_json::from_str(&contents).context("Failed to parse store file")
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let contents = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).context("Failed to write store file")?;
        std::fs::rename(&tmp, &self.path).context("Failed to replace store file")?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("Store lock poisoned"))
    }
}

impl KvBackend for FileKvBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.lock()?;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.lock()?;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}

/// Backend for tests and throwaway runs. Nothing survives the process.
#[derive(Default)]
pub struct MemoryKvBackend {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKvBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("Store lock poisoned"))
    }
}

impl KvBackend for MemoryKvBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_backend_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileKvBackend::open(&path).unwrap();
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        store.remove("a").unwrap();
        drop(store);

        let reopened = FileKvBackend::open(&path).unwrap();
        assert_eq!(reopened.get("a").unwrap(), None);
        assert_eq!(reopened.get("b").unwrap(), Some("2".to_string()));
        assert_eq!(reopened.keys().unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_file_backend_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileKvBackend::open(&path).unwrap();
        assert!(store.keys().unwrap().is_empty());

        // Writing replaces the corrupt file
        store.set("k", "v").unwrap();
        let reopened = FileKvBackend::open(&path).unwrap();
        assert_eq!(reopened.get("k").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn test_memory_backend() {
        let store = MemoryKvBackend::new();
        assert_eq!(store.get("missing").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some("v".to_string()));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }
}
