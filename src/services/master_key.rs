//! Resolution of the 32-byte master key used to encrypt credentials at rest.
//!
//! Lookup order: platform secret store, then a fallback key file, then a freshly
//! generated key that is written to the fallback file exactly once. The key is
//! never rotated.

use crate::constants::app::{APP_NAME, MASTER_KEY_ENTRY};
use crate::constants::buffers::CRYPTO_KEY_SIZE;
use crate::errors::KenshoError;
use crate::services::logger::Logger;
use crate::services::secret_store::SecretStore;
use crate::utils::fs_atomic::ensure_dir_for_file;
use crate::utils::paths::resolve_key_path;
use base64::Engine;
use once_cell::sync::OnceCell;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type MasterKey = [u8; CRYPTO_KEY_SIZE];

fn decode_key(raw: &str, source: &str) -> Result<MasterKey, KenshoError> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(raw.trim().as_bytes())
        .map_err(|_| {
            KenshoError::key_unavailable(format!("Master key from {} is not valid base64", source))
        })?;
    MasterKey::try_from(decoded.as_slice()).map_err(|_| {
        KenshoError::key_unavailable(format!(
            "Master key from {} must be {} bytes, got {}",
            source,
            CRYPTO_KEY_SIZE,
            decoded.len()
        ))
    })
}

/// Short, non-reversible identifier of a key, safe to log or print.
pub fn key_fingerprint(key: &MasterKey) -> String {
    let digest = Sha256::digest(key);
    hex::encode(&digest[..8])
}

/// Resolves the master key without caching.
pub fn get_master_key(
    logger: &Logger,
    store: Option<&dyn SecretStore>,
    home_dir: Option<&Path>,
) -> Result<MasterKey, KenshoError> {
    if let Some(store) = store {
        match store.get(APP_NAME, MASTER_KEY_ENTRY) {
            Ok(raw) => return decode_key(&raw, "platform secret store"),
            Err(err) if err.is_not_found() => {
                logger.info("master key not in platform secret store, using key file", None);
            }
            Err(err) => {
                logger.warn(
                    "platform secret store failed, using key file",
                    Some(&serde_json::json!({ "error": err.message })),
                );
            }
        }
    }
    load_or_create_key_file(logger, &resolve_key_path(home_dir))
}

fn load_or_create_key_file(logger: &Logger, path: &Path) -> Result<MasterKey, KenshoError> {
    match fs::read_to_string(path) {
        Ok(raw) => return decode_key(&raw, "key file"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(KenshoError::key_unavailable(format!(
                "Failed to read master key file {}: {}",
                path.display(),
                err
            )))
        }
    }

    let mut generated = [0u8; CRYPTO_KEY_SIZE];
    OsRng.fill_bytes(&mut generated);
    let encoded = base64::engine::general_purpose::STANDARD.encode(generated);
    match write_key_once(path, &encoded) {
        Ok(true) => {
            logger.info(
                "generated new master key",
                Some(&serde_json::json!({ "path": path })),
            );
            Ok(generated)
        }
        // Another process won the race; its key is the one on disk.
        Ok(false) => {
            let raw = fs::read_to_string(path).map_err(|err| {
                KenshoError::key_unavailable(format!(
                    "Failed to read master key file {}: {}",
                    path.display(),
                    err
                ))
            })?;
            decode_key(&raw, "key file")
        }
        Err(err) => Err(KenshoError::key_unavailable(format!(
            "Failed to write master key file {}: {}",
            path.display(),
            err
        ))
        .with_hint("Make sure the Kensho home directory exists and is writable.")),
    }
}

/// Publishes the key file without ever replacing an existing one.
/// Returns `Ok(false)` when the file already exists.
fn write_key_once(path: &Path, encoded: &str) -> io::Result<bool> {
    ensure_dir_for_file(path)?;
    let tmp = path.with_extension(format!("{:016x}.tmp", OsRng.next_u64()));
    let staged = (|| {
        let mut options = fs::OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp)?;
        file.write_all(encoded.as_bytes())?;
        file.sync_all()
    })();
    if let Err(err) = staged {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    let linked = fs::hard_link(&tmp, path);
    let _ = fs::remove_file(&tmp);
    match linked {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err),
    }
}

/// Process-wide, lazily resolved master key.
pub struct MasterKeyProvider {
    logger: Logger,
    store: Option<Arc<dyn SecretStore>>,
    home_dir: Option<PathBuf>,
    cached: OnceCell<MasterKey>,
}

impl MasterKeyProvider {
    pub fn new(
        logger: Logger,
        store: Option<Arc<dyn SecretStore>>,
        home_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            logger: logger.child("master_key"),
            store,
            home_dir,
            cached: OnceCell::new(),
        }
    }

    pub fn master_key(&self) -> Result<MasterKey, KenshoError> {
        self.cached
            .get_or_try_init(|| {
                let key =
                    get_master_key(&self.logger, self.store.as_deref(), self.home_dir.as_deref())?;
                self.logger.debug(
                    "master key resolved",
                    Some(&serde_json::json!({ "fingerprint": key_fingerprint(&key) })),
                );
                Ok(key)
            })
            .copied()
    }

    pub fn key_path(&self) -> PathBuf {
        resolve_key_path(self.home_dir.as_deref())
    }

    pub fn is_resolved(&self) -> bool {
        self.cached.get().is_some()
    }
}
