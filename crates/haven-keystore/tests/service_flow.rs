//! End-to-end tests of the encryption service on a real Stronghold keystore.
//!
//! Each test works in a temp directory with a real encrypted snapshot and
//! real Ed25519/X25519/AES-GCM operations; nothing is mocked.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use haven_crypto::keychain::{KEY_ENCRYPTION_KEYS, VAULT_ENCRYPTION};
use haven_crypto::{CryptoError, EncryptedMessage, EncryptionService, KeyConfig, Keychain};
use haven_keystore::StrongholdKeystore;

const PASSPHRASE: &str = "correct horse battery staple";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("haven_crypto=debug")
        .with_test_writer()
        .try_init();
}

fn open_keystore(dir: &Path) -> Arc<StrongholdKeystore> {
    Arc::new(StrongholdKeystore::initialize(dir, PASSPHRASE).expect("keystore should open"))
}

/// Simulates an app launch: open the keystore and initialize the service.
async fn launch(dir: &Path, config: KeyConfig) -> EncryptionService {
    let service = EncryptionService::new(open_keystore(dir), config);
    service.initialize().await.expect("initialize should succeed");
    service
}

// ── Persistence ──────────────────────────────────────────────────────

#[tokio::test]
async fn bundle_survives_restart() {
    init_tracing();
    let dir = tempfile::TempDir::new().unwrap();

    let identity = {
        let service = launch(dir.path(), KeyConfig::default()).await;
        service.initialize().await.unwrap();
        service.identity_public_key().await.unwrap()
    };

    let service = launch(dir.path(), KeyConfig::default()).await;
    assert_eq!(service.identity_public_key().await.unwrap(), identity);
    assert_eq!(service.pool_size().await.unwrap(), 100);
}

#[tokio::test]
async fn consumed_pre_keys_stay_consumed_after_restart() {
    init_tracing();
    let dir = tempfile::TempDir::new().unwrap();

    let handed_out: Vec<Vec<u8>> = {
        let service = launch(dir.path(), KeyConfig::default()).await;
        let mut out = Vec::new();
        for _ in 0..3 {
            out.push(service.get_public_keys().await.unwrap().unwrap().one_time_pre_key);
        }
        out
    };

    let service = launch(dir.path(), KeyConfig::default()).await;
    assert_eq!(service.pool_size().await.unwrap(), 97);

    let next = service.get_public_keys().await.unwrap().unwrap();
    assert!(!handed_out.contains(&next.one_time_pre_key));
}

#[tokio::test]
async fn rotation_survives_restart() {
    init_tracing();
    let dir = tempfile::TempDir::new().unwrap();

    let (old, rotated) = {
        let service = launch(dir.path(), KeyConfig::default()).await;
        let old = service.identity_public_key().await.unwrap();
        service.rotate_keys().await.unwrap();
        (old, service.identity_public_key().await.unwrap())
    };
    assert_ne!(old, rotated);

    let service = launch(dir.path(), KeyConfig::default()).await;
    let keys = service.get_public_keys().await.unwrap().unwrap();
    assert_eq!(keys.identity_key, rotated);
    keys.verify_signed_pre_key().unwrap();
}

#[tokio::test]
async fn persisted_bundle_is_camel_case_json() {
    let dir = tempfile::TempDir::new().unwrap();
    let keystore = open_keystore(dir.path());
    let service = EncryptionService::new(keystore.clone(), KeyConfig::default());
    service.initialize().await.unwrap();

    let blob = keystore
        .load_key(VAULT_ENCRYPTION, KEY_ENCRYPTION_KEYS)
        .unwrap()
        .expect("bundle should be stored");
    let value: serde_json::Value = serde_json::from_slice(&blob).unwrap();
    assert!(value["identityKeyPair"]["privateKey"].is_string());
    assert_eq!(value["oneTimePreKeys"].as_array().map(Vec::len), Some(100));
}

#[tokio::test]
async fn wrong_passphrase_cannot_open_bundle() {
    let dir = tempfile::TempDir::new().unwrap();
    launch(dir.path(), KeyConfig::default()).await;

    let result = StrongholdKeystore::initialize(dir.path(), "not the passphrase");
    assert!(matches!(result, Err(CryptoError::Storage(_))));
}

// ── Messaging ────────────────────────────────────────────────────────

#[tokio::test]
async fn two_installations_exchange_messages() {
    init_tracing();
    let alice_dir = tempfile::TempDir::new().unwrap();
    let bob_dir = tempfile::TempDir::new().unwrap();
    let alice = launch(alice_dir.path(), KeyConfig::default()).await;
    let bob = launch(bob_dir.path(), KeyConfig::default()).await;

    let bob_keys = bob.get_public_keys().await.unwrap().unwrap();
    bob_keys.verify_signed_pre_key().unwrap();

    let sent = alice
        .encrypt_message("album shared with you", &bob_keys.identity_key)
        .await
        .unwrap();

    // Through the transport as JSON text.
    let wire = sent.to_json().unwrap();
    let received = EncryptedMessage::from_json(&wire).unwrap();

    let plaintext = bob
        .decrypt_message(&received, &bob_keys.identity_key)
        .await
        .unwrap();
    assert_eq!(plaintext, "album shared with you");
}

#[tokio::test]
async fn bob_decrypts_after_restart() {
    let alice_dir = tempfile::TempDir::new().unwrap();
    let bob_dir = tempfile::TempDir::new().unwrap();
    let alice = launch(alice_dir.path(), KeyConfig::default()).await;

    let (bob_key, sent) = {
        let bob = launch(bob_dir.path(), KeyConfig::default()).await;
        let bob_key = bob.identity_public_key().await.unwrap();
        let sent = alice.encrypt_message("still there?", &bob_key).await.unwrap();
        (bob_key, sent)
    };

    let bob = launch(bob_dir.path(), KeyConfig::default()).await;
    assert_eq!(bob.decrypt_message(&sent, &bob_key).await.unwrap(), "still there?");
}

#[tokio::test]
async fn tampered_wire_message_is_rejected() {
    let alice_dir = tempfile::TempDir::new().unwrap();
    let bob_dir = tempfile::TempDir::new().unwrap();
    let alice = launch(alice_dir.path(), KeyConfig::default()).await;
    let bob = launch(bob_dir.path(), KeyConfig::default()).await;
    let bob_key = bob.identity_public_key().await.unwrap();

    let mut message = alice.encrypt_message("do not alter", &bob_key).await.unwrap();
    let last = message.ciphertext.len() - 1;
    message.ciphertext[last] ^= 0x01;

    let err = bob.decrypt_message(&message, &bob_key).await.unwrap_err();
    assert!(matches!(err, CryptoError::Integrity));
    assert_eq!(err.user_message(), "Cannot read this content");
}

// ── Pre-key pool ─────────────────────────────────────────────────────

#[tokio::test]
async fn pool_refills_on_the_eighty_first_hand_out() {
    let dir = tempfile::TempDir::new().unwrap();
    let service = launch(dir.path(), KeyConfig::default()).await;

    let mut seen = HashSet::new();
    for _ in 0..81 {
        let keys = service.get_public_keys().await.unwrap().unwrap();
        assert!(seen.insert(keys.one_time_pre_key));
    }
    assert_eq!(service.pool_size().await.unwrap(), 119);

    drop(service);
    let service = launch(dir.path(), KeyConfig::default()).await;
    assert_eq!(service.pool_size().await.unwrap(), 119);
}

#[tokio::test]
async fn explicit_replenish_respects_threshold() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = KeyConfig {
        initial_pre_key_count: 19,
        ..KeyConfig::default()
    };
    let service = launch(dir.path(), config).await;

    assert_eq!(service.replenish_one_time_pre_keys().await.unwrap(), 100);
    assert_eq!(service.pool_size().await.unwrap(), 119);
    assert_eq!(service.replenish_one_time_pre_keys().await.unwrap(), 0);
    assert_eq!(service.pool_size().await.unwrap(), 119);
}
