pub mod bundle;
pub mod config;
pub mod encoding;
pub mod error;
pub mod keychain;
pub mod keys;
pub mod manager;
pub mod message;
pub mod service;
pub mod session;
pub mod store;

pub use bundle::{EncryptionKeys, OneTimePreKey, SignedPreKey};
pub use config::KeyConfig;
pub use error::CryptoError;
pub use keychain::{Keychain, MemoryKeychain};
pub use keys::KeyPair;
pub use manager::KeyBundleManager;
pub use message::{EncryptedMessage, PublicKeys};
pub use service::{EncryptionService, KeyEvent};
pub use store::BundleStore;
