use crate::errors::KenshoError;
use crate::services::credentials::{Credential, CredentialStore};
use crate::services::logger::Logger;
use crate::stores::host_registry::HostRegistry;
use crate::utils::host_id::{join_host_port, normalize_host_id};
use std::sync::Arc;

/// Saved hosts: the registry and the credential store updated in lockstep.
///
/// When one side of a mutation succeeds and the other fails, the successful
/// side is compensated and a `PartialFailure` error reports what happened.
#[derive(Clone)]
pub struct HostDatabase {
    logger: Logger,
    registry: Arc<HostRegistry>,
    credentials: CredentialStore,
}

impl HostDatabase {
    pub fn new(logger: Logger, registry: Arc<HostRegistry>, credentials: CredentialStore) -> Self {
        Self {
            logger: logger.child("hosts"),
            registry,
            credentials,
        }
    }

    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Saves credentials for `host:port` and registers the host. Returns the HostID.
    pub fn add(
        &self,
        host: &str,
        port: u16,
        user: &str,
        secret: &str,
        is_key_material: bool,
    ) -> Result<String, KenshoError> {
        let host_id = join_host_port(host, port)?;
        let credential = Credential {
            is_key_material,
            user: user.to_string(),
            secret: secret.to_string(),
        };
        self.add_credential(&host_id, &credential)?;
        Ok(host_id)
    }

    /// The HostID is validated before either store is touched, and both stores
    /// receive the same normalized id.
    pub fn add_credential(&self, host_id: &str, credential: &Credential) -> Result<(), KenshoError> {
        let host_id = normalize_host_id(host_id)?;
        let host_id = host_id.as_str();
        self.credentials.add_credentials(host_id, credential)?;
        if let Err(err) = self.registry.add(host_id) {
            let compensated = self.credentials.remove_credentials(host_id).is_ok();
            self.logger.error(
                "registry update failed after saving credentials",
                Some(&serde_json::json!({
                    "host_id": host_id,
                    "error": err.message,
                    "compensated": compensated,
                })),
            );
            return Err(KenshoError::partial_failure(format!(
                "Saved credentials for {} but failed to register the host: {}",
                host_id, err.message
            ))
            .with_details(serde_json::json!({
                "host_id": host_id,
                "failed_stage": "registry",
                "cause": err.kind,
                "compensated": compensated,
            })));
        }
        Ok(())
    }

    pub fn remove(&self, host_id: &str) -> Result<(), KenshoError> {
        let host_id = normalize_host_id(host_id)?;
        let host_id = host_id.as_str();
        self.registry.delete(host_id)?;
        match self.credentials.remove_credentials(host_id) {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                self.logger.warn(
                    "host had no stored credentials",
                    Some(&serde_json::json!({ "host_id": host_id })),
                );
                Ok(())
            }
            Err(err) => {
                let compensated = self.registry.add(host_id).is_ok();
                self.logger.error(
                    "credential removal failed after deregistering host",
                    Some(&serde_json::json!({
                        "host_id": host_id,
                        "error": err.message,
                        "compensated": compensated,
                    })),
                );
                Err(KenshoError::partial_failure(format!(
                    "Removed {} from the registry but failed to delete its credentials: {}",
                    host_id, err.message
                ))
                .with_details(serde_json::json!({
                    "host_id": host_id,
                    "failed_stage": "credentials",
                    "cause": err.kind,
                    "compensated": compensated,
                })))
            }
        }
    }

    pub fn get(&self, host_id: &str) -> Result<Credential, KenshoError> {
        self.credentials.get_credentials(&normalize_host_id(host_id)?)
    }

    /// Registered hosts. Never touches the master key.
    pub fn list(&self) -> Vec<String> {
        self.registry.list()
    }
}
