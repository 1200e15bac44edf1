//! Per-message key agreement, symmetric encryption and integrity tags.
//!
//! The shared secret is X25519 over the Ed25519 key pairs (see `keys`),
//! stretched with HKDF-SHA256. Payloads are sealed with AES-256-GCM under a
//! fresh random IV per message.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::keys;

/// AES-GCM nonce size.
pub const IV_LEN: usize = 12;
pub const MAC_LEN: usize = 32;

const HKDF_SALT: &[u8] = b"haven-e2e-hkdf-salt-v1";
const HKDF_INFO: &[u8] = b"haven-e2e-message-key-v1";
const MAC_DOMAIN: &[u8] = b"haven-e2e-mac-v1";

/// Symmetric key agreed between a sender's ephemeral key and a recipient key.
#[derive(ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Output of [`encrypt`].
#[derive(Debug, Clone)]
pub struct Sealed {
    /// AES-256-GCM ciphertext, auth tag appended.
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
}

/// Agree on a secret from a local private key and a remote public key.
///
/// `derive(a.private, b.public) == derive(b.private, a.public)` for any two
/// key pairs, which is what lets sender and recipient meet on one key.
pub fn derive_shared_secret(
    local_private_key: &[u8],
    remote_public_key: &[u8],
) -> Result<SharedSecret, CryptoError> {
    let local = keys::x25519_secret(local_private_key)?;
    let remote = keys::x25519_public(remote_public_key)?;
    let dh = local.diffie_hellman(&remote);
    if !dh.was_contributory() {
        return Err(CryptoError::InvalidKey(
            "remote public key is a low-order point".into(),
        ));
    }

    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), dh.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(HKDF_INFO, &mut key)
        .map_err(|e| CryptoError::InvalidKey(format!("HKDF expand failed: {e}")))?;
    let secret = SharedSecret(key);
    key.zeroize();
    Ok(secret)
}

/// Encrypt `plaintext` under a fresh random IV.
pub fn encrypt(plaintext: &str, secret: &SharedSecret) -> Result<Sealed, CryptoError> {
    seal(plaintext.as_bytes(), secret)
}

/// Decrypt and authenticate. Never returns unauthenticated or non-UTF-8 output.
pub fn decrypt(ciphertext: &[u8], secret: &SharedSecret, iv: &[u8]) -> Result<String, CryptoError> {
    if iv.len() != IV_LEN {
        return Err(CryptoError::Decryption(format!(
            "IV must be {IV_LEN} bytes, got {}",
            iv.len()
        )));
    }
    let cipher = Aes256Gcm::new_from_slice(secret.as_bytes())
        .map_err(|e| CryptoError::Decryption(e.to_string()))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::Decryption("ciphertext failed authentication".into()))?;
    String::from_utf8(plaintext).map_err(|e| {
        let mut bytes = e.into_bytes();
        bytes.zeroize();
        CryptoError::Decryption("plaintext is not valid UTF-8".into())
    })
}

/// Integrity tag over `(ciphertext, ephemeral_public_key, recipient_public_key)`.
///
/// Field order is fixed; each field is length-prefixed so boundaries cannot
/// shift between fields.
///
/// The tag is unkeyed: it catches corruption and misaddressed messages, but
/// anyone can recompute it. Authenticity comes from the AES-GCM tag checked
/// in [`decrypt`].
pub fn compute_mac(
    ciphertext: &[u8],
    ephemeral_public_key: &[u8],
    recipient_public_key: &[u8],
) -> [u8; MAC_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(MAC_DOMAIN);
    for field in [ciphertext, ephemeral_public_key, recipient_public_key] {
        let len = u64::try_from(field.len()).unwrap_or(u64::MAX);
        hasher.update(len.to_be_bytes());
        hasher.update(field);
    }
    hasher.finalize().into()
}

/// Constant-time check of a received tag.
pub fn verify_mac(
    mac: &[u8],
    ciphertext: &[u8],
    ephemeral_public_key: &[u8],
    recipient_public_key: &[u8],
) -> bool {
    let expected = compute_mac(ciphertext, ephemeral_public_key, recipient_public_key);
    expected.as_slice().ct_eq(mac).into()
}

fn seal(plaintext: &[u8], secret: &SharedSecret) -> Result<Sealed, CryptoError> {
    let mut iv = [0u8; IV_LEN];
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|e| CryptoError::KeyGeneration(format!("IV generation failed: {e}")))?;

    let cipher = Aes256Gcm::new_from_slice(secret.as_bytes())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(Sealed { ciphertext, iv })
}
