use std::convert::TryFrom;
use std::path::Path;

use iota_stronghold::{KeyProvider, SnapshotPath, Stronghold};
use parking_lot::Mutex;
use zeroize::Zeroizing;

use haven_crypto::{CryptoError, Keychain};

const CLIENT_NAME: &[u8] = b"haven";
const SNAPSHOT_FILE: &str = "haven.stronghold";

/// A Stronghold-backed keystore for persisting key bundles at rest.
///
/// One snapshot per installation. Entries live in the client `Store`
/// (key-value pairs encrypted at rest in the snapshot file). The snapshot is
/// encrypted with an `Argon2id`-derived key from the installation passphrase.
pub struct StrongholdKeystore {
    stronghold: Stronghold,
    snapshot_path: SnapshotPath,
    keyprovider: KeyProvider,
    /// Serializes snapshot commits.
    commit_lock: Mutex<()>,
}

impl StrongholdKeystore {
    /// Open the installation keystore in `snapshot_dir`, loading any existing snapshot.
    pub fn initialize(snapshot_dir: &Path, passphrase: &str) -> Result<Self, CryptoError> {
        let snapshot_file = snapshot_dir.join(SNAPSHOT_FILE);
        let password_hash = derive_key(passphrase)?;
        let keyprovider = KeyProvider::try_from(password_hash)
            .map_err(|e| CryptoError::Storage(format!("key provider init: {e:?}")))?;
        let snapshot_path = SnapshotPath::from_path(&snapshot_file);

        let stronghold = Stronghold::default();

        if snapshot_file.exists() {
            stronghold
                .load_snapshot(&keyprovider, &snapshot_path)
                .map_err(|e| CryptoError::Storage(format!("load snapshot: {e}")))?;
        }

        stronghold
            .load_client(CLIENT_NAME)
            .or_else(|_| stronghold.create_client(CLIENT_NAME))
            .map_err(|e| CryptoError::Storage(format!("client init: {e}")))?;

        tracing::debug!(path = %snapshot_file.display(), "opened stronghold keystore");

        Ok(Self {
            stronghold,
            snapshot_path,
            keyprovider,
            commit_lock: Mutex::new(()),
        })
    }

    /// Write the client state into the encrypted snapshot file on disk.
    pub fn save(&self) -> Result<(), CryptoError> {
        let _guard = self.commit_lock.lock();
        self.stronghold
            .write_client(CLIENT_NAME)
            .map_err(|e| CryptoError::Storage(format!("write client: {e}")))?;
        self.stronghold
            .commit_with_keyprovider(&self.snapshot_path, &self.keyprovider)
            .map_err(|e| CryptoError::Storage(format!("commit snapshot: {e}")))?;
        Ok(())
    }
}

impl Keychain for StrongholdKeystore {
    fn store_key(&self, vault: &str, key: &str, data: &[u8]) -> Result<(), CryptoError> {
        let client = self
            .stronghold
            .get_client(CLIENT_NAME)
            .map_err(|e| CryptoError::Storage(format!("get client: {e}")))?;
        client
            .store()
            .insert(entry_name(vault, key), data.to_vec(), None)
            .map_err(|e| CryptoError::Storage(format!("store insert: {e}")))?;
        Ok(())
    }

    fn load_key(&self, vault: &str, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError> {
        let client = self
            .stronghold
            .get_client(CLIENT_NAME)
            .map_err(|e| CryptoError::Storage(format!("get client: {e}")))?;
        let entry = client
            .store()
            .get(&entry_name(vault, key))
            .map_err(|e| CryptoError::Storage(format!("store get: {e}")))?;
        Ok(entry.map(Zeroizing::new))
    }

    fn delete_key(&self, vault: &str, key: &str) -> Result<(), CryptoError> {
        let client = self
            .stronghold
            .get_client(CLIENT_NAME)
            .map_err(|e| CryptoError::Storage(format!("get client: {e}")))?;
        client
            .store()
            .delete(&entry_name(vault, key))
            .map_err(|e| CryptoError::Storage(format!("store delete: {e}")))?;
        Ok(())
    }

    fn key_exists(&self, vault: &str, key: &str) -> Result<bool, CryptoError> {
        let client = self
            .stronghold
            .get_client(CLIENT_NAME)
            .map_err(|e| CryptoError::Storage(format!("get client: {e}")))?;
        client
            .store()
            .contains_key(&entry_name(vault, key))
            .map_err(|e| CryptoError::Storage(format!("store contains: {e}")))
    }

    fn persist(&self) -> Result<(), CryptoError> {
        self.save()
    }
}

fn entry_name(vault: &str, key: &str) -> Vec<u8> {
    format!("{vault}/{key}").into_bytes()
}

/// Derive the 32-byte snapshot key from a passphrase using `Argon2id`.
///
/// Release: `m=65536, t=3, p=4`. Debug builds: `m=256, t=1, p=1`.
fn derive_key(passphrase: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    use argon2::{Algorithm, Argon2, Params, Version};

    let salt = b"haven-stronghold-salt";

    #[cfg(debug_assertions)]
    let params = Params::new(256, 1, 1, Some(32));
    #[cfg(not(debug_assertions))]
    let params = Params::new(65536, 3, 4, Some(32));
    let params = params.map_err(|e| CryptoError::Storage(format!("argon2 params: {e}")))?;

    let hasher = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new(vec![0u8; 32]);
    hasher
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::Storage(format!("argon2 hash: {e}")))?;
    Ok(key)
}
