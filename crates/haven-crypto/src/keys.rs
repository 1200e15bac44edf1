//! Key pair generation and detached signatures.
//!
//! Every key pair in a bundle (identity, signed pre-key, one-time pre-keys,
//! per-message ephemerals) is an Ed25519 key pair. The same 32-byte seed also
//! yields an X25519 scalar, and the public key maps onto the Montgomery curve,
//! so a single pair can both sign and take part in Diffie-Hellman.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const PRIVATE_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// An asymmetric key pair. The private half never leaves the device.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    #[zeroize(skip)]
    #[serde(with = "crate::encoding::base64_bytes")]
    public_key: Vec<u8>,
    #[serde(with = "crate::encoding::base64_bytes")]
    private_key: Vec<u8>,
}

impl KeyPair {
    /// Generate a new key pair from the OS randomness source.
    pub fn generate() -> Result<Self, CryptoError> {
        Self::generate_with(&mut OsRng)
    }

    /// Generate a key pair from the given RNG.
    ///
    /// An RNG failure is surfaced as `KeyGeneration`; there is no fallback.
    pub fn generate_with<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, CryptoError> {
        let mut seed = Zeroizing::new([0u8; PRIVATE_KEY_LEN]);
        rng.try_fill_bytes(seed.as_mut())
            .map_err(|e| CryptoError::KeyGeneration(format!("randomness unavailable: {e}")))?;
        Ok(Self::from_seed(&seed))
    }

    /// Rebuild a key pair from its private key.
    pub fn from_private_key(private_key: &[u8]) -> Result<Self, CryptoError> {
        let seed = seed_from_slice(private_key)?;
        Ok(Self::from_seed(&seed))
    }

    fn from_seed(seed: &[u8; PRIVATE_KEY_LEN]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self {
            public_key: signing_key.verifying_key().to_bytes().to_vec(),
            private_key: seed.to_vec(),
        }
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Raw private key bytes.
    ///
    /// # Security
    /// Handle with care. Only the secure store and local key agreement
    /// should ever see these.
    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(&self.public_key)
    }

    /// Sign `data` with this pair's private key.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        sign(data, &self.private_key)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// Derive the public key for a private key.
pub fn public_key_from_private(private_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    Ok(signing_key(private_key)?.verifying_key().to_bytes().to_vec())
}

/// Produce a detached signature over `data`.
pub fn sign(data: &[u8], private_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key = signing_key(private_key).map_err(|e| CryptoError::Signing(e.to_string()))?;
    Ok(key.sign(data).to_bytes().to_vec())
}

/// Verify a detached signature against a public key.
pub fn verify(data: &[u8], signature: &[u8], public_key: &[u8]) -> Result<(), CryptoError> {
    let verifying_key = verifying_key(public_key)?;
    let signature = Signature::from_slice(signature)
        .map_err(|e| CryptoError::Verification(format!("malformed signature: {e}")))?;
    verifying_key
        .verify(data, &signature)
        .map_err(|e| CryptoError::Verification(e.to_string()))
}

/// X25519 secret for a private key.
///
/// Uses the SHA-512-expanded Ed25519 scalar so that the matching public key
/// is exactly `x25519_public(public_key)`.
pub(crate) fn x25519_secret(private_key: &[u8]) -> Result<x25519_dalek::StaticSecret, CryptoError> {
    let mut scalar = signing_key(private_key)?.to_scalar_bytes();
    let secret = x25519_dalek::StaticSecret::from(scalar);
    scalar.zeroize();
    Ok(secret)
}

/// X25519 public key for an Ed25519 public key (Edwards to Montgomery, RFC 7748).
pub(crate) fn x25519_public(public_key: &[u8]) -> Result<x25519_dalek::PublicKey, CryptoError> {
    let montgomery = verifying_key(public_key)?.to_montgomery();
    Ok(x25519_dalek::PublicKey::from(montgomery.to_bytes()))
}

fn signing_key(private_key: &[u8]) -> Result<SigningKey, CryptoError> {
    let seed = seed_from_slice(private_key)?;
    Ok(SigningKey::from_bytes(&seed))
}

fn verifying_key(public_key: &[u8]) -> Result<VerifyingKey, CryptoError> {
    let bytes: [u8; PUBLIC_KEY_LEN] = public_key.try_into().map_err(|_| {
        CryptoError::InvalidKey(format!(
            "public key must be {PUBLIC_KEY_LEN} bytes, got {}",
            public_key.len()
        ))
    })?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| CryptoError::InvalidKey(format!("invalid Ed25519 public key: {e}")))
}

fn seed_from_slice(private_key: &[u8]) -> Result<Zeroizing<[u8; PRIVATE_KEY_LEN]>, CryptoError> {
    let seed: [u8; PRIVATE_KEY_LEN] = private_key.try_into().map_err(|_| {
        CryptoError::InvalidKey(format!(
            "private key must be {PRIVATE_KEY_LEN} bytes, got {}",
            private_key.len()
        ))
    })?;
    Ok(Zeroizing::new(seed))
}
