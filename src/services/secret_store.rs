use crate::errors::KenshoError;
use crate::services::logger::Logger;

/// Small-secret key/value storage addressed by `(namespace, key)`.
///
/// `get` and `delete` fail with a `NotFound` error when the entry is absent;
/// every other backend failure is reported as `Persist`.
pub trait SecretStore: Send + Sync {
    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), KenshoError>;
    fn get(&self, namespace: &str, key: &str) -> Result<String, KenshoError>;
    fn delete(&self, namespace: &str, key: &str) -> Result<(), KenshoError>;
}

/// OS keychain backend (macOS Keychain, Windows Credential Manager, Secret Service on Linux).
///
/// The Linux backend must outlive reboots: saved hosts are read back from disk
/// and expect their credentials to still be there.
#[derive(Clone)]
pub struct KeyringSecretStore {
    logger: Logger,
}

impl KeyringSecretStore {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger: logger.child("keyring"),
        }
    }

    fn entry(&self, namespace: &str, key: &str) -> Result<keyring::Entry, KenshoError> {
        keyring::Entry::new(namespace, key).map_err(|err| map_keyring_error(err, namespace, key))
    }
}

fn map_keyring_error(err: keyring::Error, namespace: &str, key: &str) -> KenshoError {
    match err {
        keyring::Error::NoEntry => KenshoError::not_found(format!(
            "No secret stored for '{}' in '{}'",
            key, namespace
        )),
        other => KenshoError::persist(format!("Platform secret store failed: {}", other))
            .with_hint("Check that the OS keychain is unlocked and accessible to this user."),
    }
}

impl SecretStore for KeyringSecretStore {
    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), KenshoError> {
        self.logger.debug(
            "set",
            Some(&serde_json::json!({ "namespace": namespace, "key": key, "bytes": value.len() })),
        );
        self.entry(namespace, key)?
            .set_password(value)
            .map_err(|err| map_keyring_error(err, namespace, key))
    }

    fn get(&self, namespace: &str, key: &str) -> Result<String, KenshoError> {
        self.logger.debug(
            "get",
            Some(&serde_json::json!({ "namespace": namespace, "key": key })),
        );
        self.entry(namespace, key)?
            .get_password()
            .map_err(|err| map_keyring_error(err, namespace, key))
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), KenshoError> {
        self.logger.debug(
            "delete",
            Some(&serde_json::json!({ "namespace": namespace, "key": key })),
        );
        self.entry(namespace, key)?
            .delete_credential()
            .map_err(|err| map_keyring_error(err, namespace, key))
    }
}
