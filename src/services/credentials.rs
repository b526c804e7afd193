use crate::constants::app::APP_NAME;
use crate::constants::crypto::ENCRYPTED_VALUE_PREFIX;
use crate::errors::{ErrorKind, KenshoError};
use crate::services::encryption;
use crate::services::logger::Logger;
use crate::services::master_key::MasterKeyProvider;
use crate::services::secret_store::SecretStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Login secret for one host. `secret` is a password, or a private key
/// (PEM contents or a path to the key file) when `is_key_material` is set.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "key")]
    pub is_key_material: bool,
    pub user: String,
    pub secret: String,
}

impl Credential {
    pub fn password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            is_key_material: false,
            user: user.into(),
            secret: password.into(),
        }
    }

    pub fn key_material(user: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            is_key_material: true,
            user: user.into(),
            secret: key.into(),
        }
    }

    pub fn kind_label(&self) -> &'static str {
        if self.is_key_material {
            "key"
        } else {
            "password"
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("is_key_material", &self.is_key_material)
            .field("user", &self.user)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Per-host credentials kept in the platform secret store under `(namespace, host_id)`.
///
/// With a master key configured, values are written as
/// `enc:v1:<base64 AEAD blob>`. Unprefixed values are read as plain JSON, so
/// toggling encryption never strands existing entries.
#[derive(Clone)]
pub struct CredentialStore {
    logger: Logger,
    store: Arc<dyn SecretStore>,
    namespace: String,
    master_key: Option<Arc<MasterKeyProvider>>,
}

impl CredentialStore {
    pub fn new(
        logger: Logger,
        store: Arc<dyn SecretStore>,
        master_key: Option<Arc<MasterKeyProvider>>,
    ) -> Self {
        Self {
            logger: logger.child("credentials"),
            store,
            namespace: APP_NAME.to_string(),
            master_key,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.master_key.is_some()
    }

    pub fn add_credentials(&self, host_id: &str, credential: &Credential) -> Result<(), KenshoError> {
        self.logger
            .info("adding credentials", Some(&serde_json::json!({ "host_id": host_id })));
        let serialized = serde_json::to_string(credential).map_err(|err| {
            KenshoError::persist(format!("Failed to serialize credentials: {}", err))
        })?;
        let value = match &self.master_key {
            Some(provider) => {
                let key = provider.master_key()?;
                format!(
                    "{}{}",
                    ENCRYPTED_VALUE_PREFIX,
                    encryption::encrypt_text(&serialized, &key)?
                )
            }
            None => serialized,
        };
        self.store
            .set(&self.namespace, host_id, &value)
            .map_err(|err| match err.kind {
                ErrorKind::Persist => err,
                _ => KenshoError::persist(err.message),
            })
    }

    pub fn get_credentials(&self, host_id: &str) -> Result<Credential, KenshoError> {
        self.logger
            .debug("getting credentials", Some(&serde_json::json!({ "host_id": host_id })));
        let stored = self.store.get(&self.namespace, host_id)?;
        let serialized = match stored.strip_prefix(ENCRYPTED_VALUE_PREFIX) {
            Some(blob) => self.decrypt_value(host_id, blob)?,
            None => stored,
        };
        serde_json::from_str(&serialized).map_err(|err| {
            KenshoError::corrupt_data(format!(
                "Stored credentials for {} are unreadable: {}",
                host_id, err
            ))
        })
    }

    pub fn remove_credentials(&self, host_id: &str) -> Result<(), KenshoError> {
        self.logger
            .info("removing credentials", Some(&serde_json::json!({ "host_id": host_id })));
        self.store.delete(&self.namespace, host_id)
    }

    fn decrypt_value(&self, host_id: &str, blob: &str) -> Result<String, KenshoError> {
        let provider = self.master_key.as_ref().ok_or_else(|| {
            KenshoError::key_unavailable(format!(
                "Credentials for {} are encrypted but no master key is configured",
                host_id
            ))
            .with_hint("Enable KENSHO_CREDENTIAL_ENCRYPTION to read encrypted entries.")
        })?;
        let key = provider.master_key()?;
        encryption::decrypt_text(blob, &key).map_err(|err| {
            self.logger.warn(
                "stored credentials failed authentication",
                Some(&serde_json::json!({ "host_id": host_id })),
            );
            KenshoError::decrypt(format!(
                "Failed to decrypt credentials for {}: {}",
                host_id, err.message
            ))
        })
    }
}
