//! Payloads exchanged with peers through the transport.

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::keys;

/// An encrypted message as carried by the transport.
///
/// Each field is opaque bytes; the serde form is base64 text per field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedMessage {
    #[serde(with = "crate::encoding::base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// Sender's per-message public key.
    #[serde(with = "crate::encoding::base64_bytes")]
    pub ephemeral_key: Vec<u8>,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub mac: Vec<u8>,
}

impl EncryptedMessage {
    pub fn to_json(&self) -> Result<String, CryptoError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CryptoError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// The public values a new peer needs to start a conversation.
///
/// The one-time pre-key in here has already been removed from the local pool
/// and is never handed out again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeys {
    #[serde(with = "crate::encoding::base64_bytes")]
    pub identity_key: Vec<u8>,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub signed_pre_key: Vec<u8>,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub signed_pre_key_signature: Vec<u8>,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub one_time_pre_key: Vec<u8>,
    pub one_time_pre_key_id: u32,
}

impl PublicKeys {
    /// Check that the signed pre-key was signed by the identity key.
    pub fn verify_signed_pre_key(&self) -> Result<(), CryptoError> {
        keys::verify(
            &self.signed_pre_key,
            &self.signed_pre_key_signature,
            &self.identity_key,
        )
    }
}
