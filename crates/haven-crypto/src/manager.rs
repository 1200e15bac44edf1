//! Lifecycle of one identity's key bundle: load-or-create, pre-key pool
//! consumption and refill, rotation.

use crate::bundle::{EncryptionKeys, OneTimePreKey};
use crate::config::KeyConfig;
use crate::error::CryptoError;
use crate::store::BundleStore;

/// Owns the in-memory key bundle and keeps the secure store in step with it.
///
/// Every mutation is applied to a copy, the copy is persisted, and only then
/// does it replace the in-memory bundle. A failed write therefore never
/// leaves memory ahead of the store.
///
/// A write that times out may still land later. Until the next successful
/// write the store may hold a bundle other than the in-memory one; see
/// [`Self::resync`].
pub struct KeyBundleManager {
    store: BundleStore,
    config: KeyConfig,
    keys: Option<EncryptionKeys>,
    store_may_diverge: bool,
}

impl KeyBundleManager {
    pub fn new(store: BundleStore, config: KeyConfig) -> Self {
        Self {
            store,
            config,
            keys: None,
            store_may_diverge: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.keys.is_some()
    }

    /// A write timed out since the last successful one.
    pub fn needs_resync(&self) -> bool {
        self.store_may_diverge && self.keys.is_some()
    }

    /// The current bundle. Fails before `initialize()`.
    pub fn keys(&self) -> Result<&EncryptionKeys, CryptoError> {
        self.keys.as_ref().ok_or(CryptoError::Initialization)
    }

    pub fn pool_size(&self) -> Result<usize, CryptoError> {
        Ok(self.keys()?.pool_size())
    }

    /// Generate a complete bundle without persisting it.
    pub fn generate_keys(&self) -> Result<EncryptionKeys, CryptoError> {
        EncryptionKeys::generate(self.config.initial_pre_key_count)
    }

    /// Load the persisted bundle, or create and persist one if none exists.
    pub async fn initialize(&mut self) -> Result<EncryptionKeys, CryptoError> {
        if let Some(keys) = &self.keys {
            return Ok(keys.clone());
        }

        let keys = if let Some(keys) = self.store.get_encryption_keys().await? {
            tracing::info!(
                identity = %keys.identity_key_pair.public_key_hex(),
                pool = keys.pool_size(),
                "loaded encryption keys"
            );
            self.store_may_diverge = false;
            keys
        } else {
            let keys = self.generate_keys()?;
            self.persist(&keys).await?;
            tracing::info!(
                identity = %keys.identity_key_pair.public_key_hex(),
                pool = keys.pool_size(),
                "generated encryption keys"
            );
            keys
        };

        self.keys = Some(keys.clone());
        Ok(keys)
    }

    /// Replace the whole bundle with a freshly generated one.
    ///
    /// Pre-keys already handed to peers stop working.
    pub async fn rotate_keys(&mut self) -> Result<EncryptionKeys, CryptoError> {
        let keys = self.generate_keys()?;
        self.persist(&keys).await?;
        self.keys = Some(keys.clone());
        Ok(keys)
    }

    /// Write the in-memory bundle back after a timed-out write, so that a
    /// late-landing write cannot outlive the bundle this device is using.
    pub async fn resync(&mut self) -> Result<(), CryptoError> {
        if !self.needs_resync() {
            return Ok(());
        }
        let keys = self.keys()?.clone();
        self.persist(&keys).await?;
        tracing::info!(
            identity = %keys.identity_key_pair.public_key_hex(),
            "rewrote key bundle after a timed-out write"
        );
        Ok(())
    }

    /// Remove the oldest one-time pre-key from the pool.
    ///
    /// `Ok(None)` means the pool is empty: replenish and retry.
    pub async fn consume_one_time_pre_key(&mut self) -> Result<Option<OneTimePreKey>, CryptoError> {
        if self.pool_size()? == 0 {
            return Ok(None);
        }
        let taken = self
            .update_and_save(|keys| Ok(keys.take_one_time_pre_key()))
            .await?;
        if let Some(key) = &taken {
            tracing::debug!(key_id = key.key_id, pool = self.pool_size()?, "consumed one-time pre-key");
        }
        Ok(taken)
    }

    /// Append `refill_count` pre-keys if the pool is below `threshold`.
    ///
    /// Returns how many keys were added. Never removes keys.
    pub async fn replenish_if_low(
        &mut self,
        threshold: usize,
        refill_count: usize,
    ) -> Result<usize, CryptoError> {
        let pool = self.pool_size()?;
        if pool >= threshold || refill_count == 0 {
            return Ok(0);
        }
        self.update_and_save(|keys| keys.append_one_time_pre_keys(refill_count))
            .await?;
        tracing::debug!(
            added = refill_count,
            pool = self.pool_size()?,
            "replenished one-time pre-keys"
        );
        Ok(refill_count)
    }

    /// Delete the persisted bundle and forget the in-memory one.
    pub async fn clear(&mut self) -> Result<(), CryptoError> {
        self.store.clear_encryption_keys().await?;
        self.keys = None;
        self.store_may_diverge = false;
        Ok(())
    }

    async fn update_and_save<T>(
        &mut self,
        mutate: impl FnOnce(&mut EncryptionKeys) -> Result<T, CryptoError>,
    ) -> Result<T, CryptoError> {
        let mut draft = self.keys()?.clone();
        let output = mutate(&mut draft)?;
        self.persist(&draft).await?;
        self.keys = Some(draft);
        Ok(output)
    }

    async fn persist(&mut self, keys: &EncryptionKeys) -> Result<(), CryptoError> {
        match self.store.set_encryption_keys(keys).await {
            Ok(()) => {
                self.store_may_diverge = false;
                Ok(())
            }
            Err(e) => {
                if matches!(e, CryptoError::StorageTimeout(_)) {
                    self.store_may_diverge = true;
                }
                Err(e)
            }
        }
    }
}
