use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use zeroize::Zeroizing;

use crate::CryptoError;

/// Trait for key storage. Abstracts over the actual backend.
///
/// `haven-keystore` implements this on an encrypted Stronghold snapshot.
/// This crate only defines the trait.
pub trait Keychain: Send + Sync {
    /// Store a key under a vault/key pair.
    fn store_key(&self, vault: &str, key: &str, data: &[u8]) -> Result<(), CryptoError>;

    /// Retrieve a key from a vault/key pair. The buffer is wiped on drop.
    fn load_key(&self, vault: &str, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError>;

    /// Delete a key from a vault/key pair.
    fn delete_key(&self, vault: &str, key: &str) -> Result<(), CryptoError>;

    /// Check if a key exists.
    fn key_exists(&self, vault: &str, key: &str) -> Result<bool, CryptoError>;

    /// Flush pending writes to durable storage.
    fn persist(&self) -> Result<(), CryptoError> {
        Ok(())
    }
}

/// Vault for end-to-end encryption material.
pub const VAULT_ENCRYPTION: &str = "encryption";
/// The serialized `EncryptionKeys` bundle.
pub const KEY_ENCRYPTION_KEYS: &str = "keys";

/// In-memory keychain.
///
/// Suitable for tests and development only: data is lost on process exit.
#[derive(Default)]
pub struct MemoryKeychain {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: Mutex<bool>,
    stall_next_write: Mutex<Option<Duration>>,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a storage error.
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    /// Block the next `store_key` call for `delay` before it writes.
    pub fn stall_next_write(&self, delay: Duration) {
        *self.stall_next_write.lock() = Some(delay);
    }

    fn entry_name(vault: &str, key: &str) -> String {
        format!("{vault}/{key}")
    }

    fn check_writable(&self) -> Result<(), CryptoError> {
        if *self.fail_writes.lock() {
            return Err(CryptoError::Storage("keychain is read-only".into()));
        }
        Ok(())
    }
}

impl Keychain for MemoryKeychain {
    fn store_key(&self, vault: &str, key: &str, data: &[u8]) -> Result<(), CryptoError> {
        self.check_writable()?;
        let stall = self.stall_next_write.lock().take();
        if let Some(delay) = stall {
            std::thread::sleep(delay);
        }
        self.entries
            .lock()
            .insert(Self::entry_name(vault, key), data.to_vec());
        Ok(())
    }

    fn load_key(&self, vault: &str, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError> {
        Ok(self
            .entries
            .lock()
            .get(&Self::entry_name(vault, key))
            .cloned()
            .map(Zeroizing::new))
    }

    fn delete_key(&self, vault: &str, key: &str) -> Result<(), CryptoError> {
        self.check_writable()?;
        self.entries.lock().remove(&Self::entry_name(vault, key));
        Ok(())
    }

    fn key_exists(&self, vault: &str, key: &str) -> Result<bool, CryptoError> {
        Ok(self
            .entries
            .lock()
            .contains_key(&Self::entry_name(vault, key)))
    }
}
