use thiserror::Error;

/// Shown to end users for any content that fails to open.
pub const UNREADABLE_CONTENT: &str = "Cannot read this content";

#[derive(Debug, Error)]
pub enum CryptoError {
    /// The randomness source was unavailable. Not retryable until the
    /// entropy source is investigated.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("verification failed: {0}")]
    Verification(String),

    /// An operation ran before `initialize()` completed.
    #[error("encryption service not initialized")]
    Initialization,

    /// MAC mismatch on an incoming message. Decryption was not attempted.
    #[error("message authentication failed: possible tampering or wrong key")]
    Integrity,

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// The MAC matched but the ciphertext did not open.
    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("key storage error: {0}")]
    Storage(String),

    #[error("key storage did not respond within {0} ms")]
    StorageTimeout(u64),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CryptoError {
    /// Whether the caller can retry the same operation later.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::StorageTimeout(_) | Self::Storage(_))
    }

    /// Text that is safe to surface to the end user.
    ///
    /// Integrity and decryption failures collapse into one generic message
    /// so nothing about the cryptographic cause leaks into the UI.
    pub fn user_message(&self) -> String {
        match self {
            Self::Integrity | Self::Decryption(_) | Self::InvalidKey(_) => {
                UNREADABLE_CONTENT.to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for CryptoError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
