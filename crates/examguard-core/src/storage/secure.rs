use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::{KvBackend, StorageKey};

const NONCE_LEN: usize = 12;

/// Namespace prefix used for every examguard entry
pub const DEFAULT_NAMESPACE: &str = "examguard";

/// Encrypted, namespaced string storage.
///
/// Values are sealed with ChaCha20-Poly1305 under a fresh random nonce and
/// stored as base64 of `nonce || ciphertext`. The namespaced key is bound in
/// as associated data, so a value copied under another key fails to open.
///
/// Secrecy rests entirely on the storage key: anyone who can read the OS
/// keychain entry (or the fallback key file) can read the store.
pub struct SecureStore {
    backend: Arc<dyn KvBackend>,
    cipher: ChaCha20Poly1305,
    namespace: String,
}

impl SecureStore {
    pub fn new(backend: Arc<dyn KvBackend>, key: &StorageKey) -> Self {
        Self::with_namespace(backend, key, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(backend: Arc<dyn KvBackend>, key: &StorageKey, namespace: &str) -> Self {
        Self {
            backend,
            cipher: ChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
            namespace: namespace.to_string(),
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// Encrypt and persist `value` under `key`.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let full_key = self.storage_key(key);
        let sealed = self.seal(&full_key, value)?;
        self.backend
            .set(&full_key, &sealed)
            .with_context(|| format!("Failed to write secure entry {}", key))
    }

    /// Read and decrypt the value under `key`.
    ///
    /// Returns `None` if the entry is absent, unreadable, or fails to decrypt.
    pub fn get(&self, key: &str) -> Option<String> {
        let full_key = self.storage_key(key);
        let sealed = match self.backend.get(&full_key) {
            Ok(Some(sealed)) => sealed,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to read secure entry");
                return None;
            }
        };

        match self.open(&full_key, &sealed) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = key, error = %e, "Discarding undecryptable secure entry");
                None
            }
        }
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.backend
            .remove(&self.storage_key(key))
            .with_context(|| format!("Failed to remove secure entry {}", key))
    }

    /// Remove every entry in this store's namespace. Other namespaces sharing
    /// the backend are left alone.
    pub fn clear(&self) -> Result<()> {
        let prefix = format!("{}:", self.namespace);
        let mut removed = 0;
        for key in self.backend.keys()? {
            if key.starts_with(&prefix) {
                self.backend.remove(&key)?;
                removed += 1;
            }
        }
        debug!(namespace = %self.namespace, removed, "Cleared secure store");
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Serialize `value` as JSON and store it encrypted.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.set(key, &json)
    }

    /// Load a JSON value. A value that does not parse is treated as absent.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = self.get(key)?;
        match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = key, error = %e, "Discarding unparseable secure entry");
                None
            }
        }
    }

    fn seal(&self, aad: &str, plaintext: &str) -> Result<String> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| anyhow!("encryption failed"))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(sealed))
    }

    fn open(&self, aad: &str, sealed: &str) -> Result<String> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(sealed)
            .context("entry is not valid base64")?;
        if bytes.len() <= NONCE_LEN {
            return Err(anyhow!("entry too short"));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| anyhow!("decryption failed"))?;
        String::from_utf8(plaintext).context("entry is not valid UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvBackend;

    fn store_with_backend() -> (SecureStore, Arc<MemoryKvBackend>) {
        let backend = Arc::new(MemoryKvBackend::new());
        let store = SecureStore::new(backend.clone(), &StorageKey::from_bytes([42u8; 32]));
        (store, backend)
    }

    #[test]
    fn test_set_then_get_returns_value() {
        let (store, _) = store_with_backend();
        for value in ["", "pw", "mock-token-1234", "with spaces and !@#$%^&*()"] {
            store.set("k", value).unwrap();
            assert_eq!(store.get("k").as_deref(), Some(value));
        }
    }

    #[test]
    fn test_get_unset_key_is_none() {
        let (store, _) = store_with_backend();
        assert_eq!(store.get("never-set"), None);
    }

    #[test]
    fn test_value_is_not_stored_in_plaintext() {
        let (store, backend) = store_with_backend();
        store.set("auth_token", "secret-token").unwrap();
        let raw = backend.get("examguard:auth_token").unwrap().unwrap();
        assert!(!raw.contains("secret-token"));
        assert_ne!(raw, "secret-token");
    }

    #[test]
    fn test_corrupt_value_reads_as_none() {
        let (store, backend) = store_with_backend();
        backend.set("examguard:k", "not base64 at all!").unwrap();
        assert_eq!(store.get("k"), None);

        store.set("k", "value").unwrap();
        let mut raw = backend.get("examguard:k").unwrap().unwrap();
        // Flip one character inside the ciphertext
        let flipped = if raw.ends_with('A') { 'B' } else { 'A' };
        raw.pop();
        raw.push(flipped);
        backend.set("examguard:k", &raw).unwrap();
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn test_value_moved_to_other_key_fails_to_open() {
        let (store, backend) = store_with_backend();
        store.set("role", "teacher").unwrap();
        let raw = backend.get("examguard:role").unwrap().unwrap();
        backend.set("examguard:other", &raw).unwrap();
        assert_eq!(store.get("other"), None);
    }

    #[test]
    fn test_wrong_key_reads_as_none() {
        let backend = Arc::new(MemoryKvBackend::new());
        let writer = SecureStore::new(backend.clone(), &StorageKey::from_bytes([1u8; 32]));
        let reader = SecureStore::new(backend, &StorageKey::from_bytes([2u8; 32]));
        writer.set("k", "v").unwrap();
        assert_eq!(reader.get("k"), None);
    }

    #[test]
    fn test_clear_only_touches_namespace() {
        let backend = Arc::new(MemoryKvBackend::new());
        let key = StorageKey::from_bytes([9u8; 32]);
        let ours = SecureStore::with_namespace(backend.clone(), &key, "examguard");
        let theirs = SecureStore::with_namespace(backend.clone(), &key, "other");
        ours.set("a", "1").unwrap();
        ours.set("b", "2").unwrap();
        theirs.set("a", "3").unwrap();

        ours.clear().unwrap();
        assert_eq!(ours.get("a"), None);
        assert_eq!(ours.get("b"), None);
        assert_eq!(theirs.get("a").as_deref(), Some("3"));
    }

    #[test]
    fn test_remove() {
        let (store, _) = store_with_backend();
        store.set("k", "v").unwrap();
        store.remove("k").unwrap();
        assert!(!store.contains("k"));
        // Removing again is fine
        store.remove("k").unwrap();
    }

    #[test]
    fn test_json_helpers() {
        let (store, _) = store_with_backend();
        store.set_json("list", &vec![1, 2, 3]).unwrap();
        assert_eq!(store.get_json::<Vec<i32>>("list"), Some(vec![1, 2, 3]));

        store.set("list", "not json").unwrap();
        assert_eq!(store.get_json::<Vec<i32>>("list"), None);
    }
}
