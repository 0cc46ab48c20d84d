use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::Engine;
use keyring::Entry;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, warn};

const SERVICE_NAME: &str = "examguard";
const KEY_ACCOUNT: &str = "storage-key";

/// Key file name used when the OS keychain is unavailable
const KEY_FILE: &str = "storage.key";

pub const STORAGE_KEY_BYTES: usize = 32;

/// The 256-bit key that seals everything in the secure store.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageKey([u8; STORAGE_KEY_BYTES]);

impl StorageKey {
    pub fn from_bytes(bytes: [u8; STORAGE_KEY_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; STORAGE_KEY_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; STORAGE_KEY_BYTES] {
        &self.0
    }

    fn encode(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    fn decode(encoded: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .context("storage key is not valid base64")?;
        if bytes.len() != STORAGE_KEY_BYTES {
            bail!("invalid storage key length: {}", bytes.len());
        }
        let mut key = [0u8; STORAGE_KEY_BYTES];
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StorageKey(..)")
    }
}

/// Somewhere a storage key can be loaded from, creating it on first use.
pub trait KeyProvider {
    fn load_or_create(&self) -> Result<StorageKey>;
}

/// Keeps the storage key in the OS keychain.
pub struct KeyringKeyProvider {
    service: String,
    account: String,
}

impl Default for KeyringKeyProvider {
    fn default() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
            account: KEY_ACCOUNT.to_string(),
        }
    }
}

impl KeyringKeyProvider {
    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, &self.account).context("Failed to create keyring entry")
    }

    /// Delete the stored key. Everything sealed with it becomes unreadable.
    pub fn delete(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete storage key from keychain"),
        }
    }
}

impl KeyProvider for KeyringKeyProvider {
    fn load_or_create(&self) -> Result<StorageKey> {
        match self.entry()?.get_password() {
            Ok(encoded) => return StorageKey::decode(&encoded),
            Err(keyring::Error::NoEntry) => {}
            Err(e) => return Err(e).context("Failed to read storage key from keychain"),
        }

        let key = StorageKey::generate();
        self.entry()?
            .set_password(&key.encode())
            .context("Failed to store storage key in keychain")?;

        // Some keychain builds accept writes but do not persist them. A fresh
        // entry must see the key or it is useless across restarts.
        let stored = self
            .entry()?
            .get_password()
            .context("Keychain did not retain the storage key")?;
        if StorageKey::decode(&stored)? != key {
            bail!("Keychain returned a different storage key");
        }
        debug!("Created storage key in OS keychain");
        Ok(key)
    }
}

/// Keeps the storage key in a file readable only by the current user.
pub struct FileKeyProvider {
    path: PathBuf,
}

impl FileKeyProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(KEY_FILE))
    }

    pub fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove key file {}", self.path.display())),
        }
    }
}

impl KeyProvider for FileKeyProvider {
    fn load_or_create(&self) -> Result<StorageKey> {
        if self.path.exists() {
            let encoded = std::fs::read_to_string(&self.path)
                .with_context(|| format!("Failed to read key file {}", self.path.display()))?;
            return StorageKey::decode(&encoded);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let key = StorageKey::generate();
        std::fs::write(&self.path, key.encode())
            .with_context(|| format!("Failed to write key file {}", self.path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(key)
    }
}

/// Load the storage key from the OS keychain, falling back to a key file in
/// `data_dir` when no usable keychain is available.
pub fn resolve_storage_key(data_dir: &Path) -> Result<StorageKey> {
    match KeyringKeyProvider::default().load_or_create() {
        Ok(key) => Ok(key),
        Err(e) => {
            warn!(error = %e, "OS keychain unavailable, using key file");
            FileKeyProvider::in_dir(data_dir).load_or_create()
        }
    }
}

/// Remove the storage key wherever it may live. The next start generates a
/// new key and finds an empty store.
pub fn forget_storage_key(data_dir: &Path) -> Result<()> {
    if let Err(e) = KeyringKeyProvider::default().delete() {
        warn!(error = %e, "Could not remove storage key from keychain");
    }
    FileKeyProvider::in_dir(data_dir).delete()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_key_provider_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileKeyProvider::in_dir(dir.path());
        let first = provider.load_or_create().unwrap();
        let second = provider.load_or_create().unwrap();
        assert_eq!(first, second);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_key_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        FileKeyProvider::in_dir(dir.path()).load_or_create().unwrap();
        let mode = std::fs::metadata(dir.path().join(KEY_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_deleted_key_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileKeyProvider::in_dir(dir.path());
        let first = provider.load_or_create().unwrap();

        provider.delete().unwrap();
        assert!(!dir.path().join(KEY_FILE).exists());
        // Deleting twice is fine
        provider.delete().unwrap();

        let second = provider.load_or_create().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_corrupt_key_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(KEY_FILE), "short").unwrap();
        assert!(FileKeyProvider::in_dir(dir.path()).load_or_create().is_err());
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let key = StorageKey::from_bytes([7u8; STORAGE_KEY_BYTES]);
        assert_eq!(format!("{:?}", key), "StorageKey(..)");
    }
}
