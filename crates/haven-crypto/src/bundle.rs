//! The key bundle: one identity's complete key material, and the unit of
//! persistence in the secure store.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::keys::{self, KeyPair};

/// Medium-lived pre-key whose public half is signed by the identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPreKey {
    /// Creation time in unix milliseconds.
    pub key_id: u64,
    #[serde(flatten)]
    key_pair: KeyPair,
    #[serde(with = "crate::encoding::base64_bytes")]
    signature: Vec<u8>,
}

impl SignedPreKey {
    /// Generate a pre-key and sign its public key with `identity`.
    pub fn generate(identity: &KeyPair) -> Result<Self, CryptoError> {
        let key_pair = KeyPair::generate()?;
        let signature = identity.sign(key_pair.public_key())?;
        Ok(Self {
            key_id: unix_millis(),
            key_pair,
            signature,
        })
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn public_key(&self) -> &[u8] {
        self.key_pair.public_key()
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Check that this pre-key is bound to the given identity.
    pub fn verify(&self, identity_public_key: &[u8]) -> Result<(), CryptoError> {
        keys::verify(self.public_key(), &self.signature, identity_public_key)
    }
}

/// Single-use pre-key handed to one new peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimePreKey {
    pub key_id: u32,
    #[serde(flatten)]
    key_pair: KeyPair,
}

impl OneTimePreKey {
    pub fn generate(key_id: u32) -> Result<Self, CryptoError> {
        Ok(Self {
            key_id,
            key_pair: KeyPair::generate()?,
        })
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn public_key(&self) -> &[u8] {
        self.key_pair.public_key()
    }
}

/// Identity key pair, signed pre-key and the one-time pre-key pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionKeys {
    pub identity_key_pair: KeyPair,
    pub signed_pre_key: SignedPreKey,
    pub one_time_pre_keys: Vec<OneTimePreKey>,
    /// Id for the next one-time pre-key. Never reused while this identity lives.
    #[serde(default)]
    pub next_pre_key_id: u32,
}

impl EncryptionKeys {
    /// Generate a fresh bundle with `one_time_count` one-time pre-keys.
    pub fn generate(one_time_count: usize) -> Result<Self, CryptoError> {
        let identity_key_pair = KeyPair::generate()?;
        let signed_pre_key = SignedPreKey::generate(&identity_key_pair)?;
        let mut keys = Self {
            identity_key_pair,
            signed_pre_key,
            one_time_pre_keys: Vec::with_capacity(one_time_count),
            next_pre_key_id: 0,
        };
        keys.append_one_time_pre_keys(one_time_count)?;
        Ok(keys)
    }

    pub fn identity_public_key(&self) -> &[u8] {
        self.identity_key_pair.public_key()
    }

    pub fn pool_size(&self) -> usize {
        self.one_time_pre_keys.len()
    }

    /// Append `count` freshly generated one-time pre-keys.
    ///
    /// All keys are generated before any is appended, so a generation failure
    /// leaves the pool as it was.
    pub fn append_one_time_pre_keys(&mut self, count: usize) -> Result<(), CryptoError> {
        let mut fresh = Vec::with_capacity(count);
        let mut key_id = self.next_pre_key_id;
        for _ in 0..count {
            fresh.push(OneTimePreKey::generate(key_id)?);
            key_id = key_id.wrapping_add(1);
        }
        self.one_time_pre_keys.extend(fresh);
        self.next_pre_key_id = key_id;
        Ok(())
    }

    /// Remove and return the oldest one-time pre-key, if any.
    pub fn take_one_time_pre_key(&mut self) -> Option<OneTimePreKey> {
        if self.one_time_pre_keys.is_empty() {
            None
        } else {
            Some(self.one_time_pre_keys.remove(0))
        }
    }

    /// Repair fields that older persisted bundles may lack.
    pub(crate) fn normalize(&mut self) {
        let floor = self
            .one_time_pre_keys
            .iter()
            .map(|k| k.key_id.wrapping_add(1))
            .max()
            .unwrap_or(0);
        if self.next_pre_key_id < floor {
            self.next_pre_key_id = floor;
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}
