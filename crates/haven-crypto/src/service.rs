//! The encryption entry point used by the rest of the application.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, MutexGuard};

use crate::bundle::EncryptionKeys;
use crate::config::KeyConfig;
use crate::error::CryptoError;
use crate::keychain::Keychain;
use crate::keys::KeyPair;
use crate::manager::KeyBundleManager;
use crate::message::{EncryptedMessage, PublicKeys};
use crate::session;
use crate::store::BundleStore;

const EVENT_CAPACITY: usize = 16;

/// Security-relevant changes to the local key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEvent {
    /// The whole bundle was replaced. Peers must fetch new public keys.
    Rotated { identity_key: Vec<u8> },
    PreKeysReplenished { added: usize, pool_size: usize },
    /// A peer asked for public keys and none could be produced.
    PreKeysExhausted,
}

/// End-to-end encryption service.
///
/// Construct one per installation at the composition root and share it
/// (e.g. behind an `Arc`). It starts uninitialized; `initialize()` must
/// complete before any other call, which otherwise fails with
/// `CryptoError::Initialization`.
///
/// Bundle mutations are serialized by an async mutex. Message encryption and
/// decryption hold it only long enough to read key material.
pub struct EncryptionService {
    manager: Mutex<KeyBundleManager>,
    config: KeyConfig,
    events: broadcast::Sender<KeyEvent>,
}

impl EncryptionService {
    pub fn new(keychain: Arc<dyn Keychain>, config: KeyConfig) -> Self {
        let store = BundleStore::new(keychain, config.store_timeout());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            manager: Mutex::new(KeyBundleManager::new(store, config.clone())),
            config,
            events,
        }
    }

    /// Subscribe to key lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<KeyEvent> {
        self.events.subscribe()
    }

    pub async fn is_ready(&self) -> bool {
        self.manager.lock().await.is_initialized()
    }

    /// Load the key bundle from the secure store, creating it on first run.
    pub async fn initialize(&self) -> Result<(), CryptoError> {
        self.manager.lock().await.initialize().await?;
        Ok(())
    }

    /// Generate a complete bundle without installing or persisting it.
    pub async fn generate_keys(&self) -> Result<EncryptionKeys, CryptoError> {
        self.manager.lock().await.generate_keys()
    }

    pub async fn identity_public_key(&self) -> Result<Vec<u8>, CryptoError> {
        let manager = self.ready_manager().await?;
        Ok(manager.keys()?.identity_public_key().to_vec())
    }

    pub async fn pool_size(&self) -> Result<usize, CryptoError> {
        self.ready_manager().await?.pool_size()
    }

    /// Encrypt `message` for the holder of `recipient_public_key`.
    ///
    /// A fresh ephemeral key pair is generated for this message alone and
    /// dropped (zeroized) before returning.
    pub async fn encrypt_message(
        &self,
        message: &str,
        recipient_public_key: &[u8],
    ) -> Result<EncryptedMessage, CryptoError> {
        self.ensure_ready().await?;

        let ephemeral = KeyPair::generate()?;
        let secret = session::derive_shared_secret(ephemeral.private_key(), recipient_public_key)?;
        let sealed = session::encrypt(message, &secret)?;
        let mac = session::compute_mac(
            &sealed.ciphertext,
            ephemeral.public_key(),
            recipient_public_key,
        );

        Ok(EncryptedMessage {
            ciphertext: sealed.ciphertext,
            ephemeral_key: ephemeral.public_key().to_vec(),
            iv: sealed.iv.to_vec(),
            mac: mac.to_vec(),
        })
    }

    /// Verify and decrypt a message addressed to this identity.
    ///
    /// `recipient_public_key` is the key the sender encrypted to, which the
    /// MAC binds. For messages addressed to this device that is
    /// [`Self::identity_public_key`]. A MAC mismatch fails with
    /// `CryptoError::Integrity` and no decryption is attempted.
    pub async fn decrypt_message(
        &self,
        message: &EncryptedMessage,
        recipient_public_key: &[u8],
    ) -> Result<String, CryptoError> {
        let identity = {
            let manager = self.ready_manager().await?;
            manager.keys()?.identity_key_pair.clone()
        };

        if !session::verify_mac(
            &message.mac,
            &message.ciphertext,
            &message.ephemeral_key,
            recipient_public_key,
        ) {
            tracing::warn!(
                ephemeral = %hex::encode(&message.ephemeral_key),
                "rejected message: MAC mismatch"
            );
            return Err(CryptoError::Integrity);
        }

        let secret = session::derive_shared_secret(identity.private_key(), &message.ephemeral_key)?;
        session::decrypt(&message.ciphertext, &secret, &message.iv)
    }

    /// Hand out this identity's public keys to a new peer.
    ///
    /// Consumes one one-time pre-key, then tops the pool up if it has fallen
    /// below the threshold. An empty pool is replenished and retried once.
    /// `Ok(None)` means no pre-key could be produced; retry later.
    pub async fn get_public_keys(&self) -> Result<Option<PublicKeys>, CryptoError> {
        let mut manager = self.ready_manager().await?;

        let mut taken = manager.consume_one_time_pre_key().await?;
        if taken.is_none() {
            self.replenish_locked(&mut manager).await?;
            taken = manager.consume_one_time_pre_key().await?;
        }
        let Some(one_time) = taken else {
            tracing::warn!("no one-time pre-keys available");
            let _ = self.events.send(KeyEvent::PreKeysExhausted);
            return Ok(None);
        };

        // The consumed key is already persisted; a refill failure here must
        // not lose it.
        if let Err(e) = self.replenish_locked(&mut manager).await {
            tracing::warn!(error = %e, "failed to replenish one-time pre-keys");
        }

        let keys = manager.keys()?;
        Ok(Some(PublicKeys {
            identity_key: keys.identity_public_key().to_vec(),
            signed_pre_key: keys.signed_pre_key.public_key().to_vec(),
            signed_pre_key_signature: keys.signed_pre_key.signature().to_vec(),
            one_time_pre_key: one_time.public_key().to_vec(),
            one_time_pre_key_id: one_time.key_id,
        }))
    }

    /// Refill the one-time pre-key pool if it is running low.
    pub async fn replenish_one_time_pre_keys(&self) -> Result<usize, CryptoError> {
        let mut manager = self.ready_manager().await?;
        self.replenish_locked(&mut manager).await
    }

    /// Replace all key material. Outstanding pre-keys held by peers stop
    /// working, so this is for suspected compromise or scheduled hygiene.
    pub async fn rotate_keys(&self) -> Result<(), CryptoError> {
        let mut manager = self.ready_manager().await?;
        let keys = manager.rotate_keys().await?;
        tracing::warn!(
            identity = %keys.identity_key_pair.public_key_hex(),
            "rotated encryption keys; outstanding pre-keys invalidated"
        );
        let _ = self.events.send(KeyEvent::Rotated {
            identity_key: keys.identity_public_key().to_vec(),
        });
        Ok(())
    }

    async fn ensure_ready(&self) -> Result<(), CryptoError> {
        if self.is_ready().await {
            Ok(())
        } else {
            Err(CryptoError::Initialization)
        }
    }

    async fn ready_manager(&self) -> Result<MutexGuard<'_, KeyBundleManager>, CryptoError> {
        let mut manager = self.manager.lock().await;
        if !manager.is_initialized() {
            return Err(CryptoError::Initialization);
        }
        if manager.needs_resync() {
            if let Err(e) = manager.resync().await {
                tracing::warn!(error = %e, "key bundle may differ from secure store");
            }
        }
        Ok(manager)
    }

    async fn replenish_locked(&self, manager: &mut KeyBundleManager) -> Result<usize, CryptoError> {
        let added = manager
            .replenish_if_low(self.config.replenish_threshold, self.config.refill_count)
            .await?;
        if added > 0 {
            let _ = self.events.send(KeyEvent::PreKeysReplenished {
                added,
                pool_size: manager.pool_size()?,
            });
        }
        Ok(added)
    }
}
