//! Async, time-bounded persistence of `EncryptionKeys` on top of a `Keychain`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

use crate::bundle::EncryptionKeys;
use crate::error::CryptoError;
use crate::keychain::{Keychain, KEY_ENCRYPTION_KEYS, VAULT_ENCRYPTION};

/// Reads and writes the key bundle through the secure store.
///
/// Keychain backends are synchronous and may block on disk or OS services,
/// so every call runs on the blocking pool and is bounded by `timeout`.
///
/// A call that times out cannot be cancelled and keeps running. Calls are
/// serialized: the next one first waits (within its own deadline) for the
/// abandoned call to finish, so a late write can never land on top of a
/// newer one.
#[derive(Clone)]
pub struct BundleStore {
    keychain: Arc<dyn Keychain>,
    timeout: Duration,
    abandoned: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl BundleStore {
    pub fn new(keychain: Arc<dyn Keychain>, timeout: Duration) -> Self {
        Self {
            keychain,
            timeout,
            abandoned: Arc::new(Mutex::new(None)),
        }
    }

    /// Load the persisted bundle, if any.
    pub async fn get_encryption_keys(&self) -> Result<Option<EncryptionKeys>, CryptoError> {
        let blob = self
            .run(|keychain| keychain.load_key(VAULT_ENCRYPTION, KEY_ENCRYPTION_KEYS))
            .await?;
        let Some(blob) = blob else {
            return Ok(None);
        };
        let mut keys: EncryptionKeys = serde_json::from_slice(&blob)?;
        keys.normalize();
        Ok(Some(keys))
    }

    /// Persist the bundle, replacing whatever was stored before.
    pub async fn set_encryption_keys(&self, keys: &EncryptionKeys) -> Result<(), CryptoError> {
        let blob = Zeroizing::new(serde_json::to_vec(keys)?);
        self.run(move |keychain| {
            keychain.store_key(VAULT_ENCRYPTION, KEY_ENCRYPTION_KEYS, &blob)?;
            keychain.persist()
        })
        .await
    }

    /// Remove the persisted bundle.
    pub async fn clear_encryption_keys(&self) -> Result<(), CryptoError> {
        self.run(|keychain| {
            keychain.delete_key(VAULT_ENCRYPTION, KEY_ENCRYPTION_KEYS)?;
            keychain.persist()
        })
        .await
    }

    async fn run<T, F>(&self, op: F) -> Result<T, CryptoError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Keychain) -> Result<T, CryptoError> + Send + 'static,
    {
        let mut abandoned = self.abandoned.lock().await;
        let deadline = tokio::time::Instant::now() + self.timeout;

        if let Some(mut previous) = abandoned.take() {
            if tokio::time::timeout_at(deadline, &mut previous).await.is_err() {
                *abandoned = Some(previous);
                return Err(self.timed_out("previous secure store call still running"));
            }
        }

        let keychain = Arc::clone(&self.keychain);
        let mut task = tokio::task::spawn_blocking(move || op(keychain.as_ref()));
        match tokio::time::timeout_at(deadline, &mut task).await {
            Err(_) => {
                *abandoned = Some(tokio::spawn(async move {
                    if let Ok(Err(e)) = task.await {
                        tracing::debug!(error = %e, "abandoned secure store call failed");
                    }
                }));
                Err(self.timed_out("secure store call timed out"))
            }
            Ok(Err(e)) => Err(CryptoError::Storage(format!("keychain task failed: {e}"))),
            Ok(Ok(result)) => result,
        }
    }

    fn timed_out(&self, reason: &str) -> CryptoError {
        let ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        tracing::warn!(timeout_ms = ms, "{reason}");
        CryptoError::StorageTimeout(ms)
    }
}
