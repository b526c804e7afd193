use crate::errors::KenshoError;
use crate::services::credentials::CredentialStore;
use crate::services::host_database::HostDatabase;
use crate::services::logger::Logger;
use crate::services::master_key::MasterKeyProvider;
use crate::services::node_api::NodeApi;
use crate::services::secret_store::{KeyringSecretStore, SecretStore};
use crate::stores::host_registry::HostRegistry;
use crate::stores::memory_secret_store::MemorySecretStore;
use crate::tunnel::{SshConnectOptions, SshTunnel, TunnelClient, TunnelConnection};
use crate::utils::feature_flags::{is_credential_encryption_enabled, resolve_secret_store_kind};
use crate::utils::paths::{ensure_dir_exists, resolve_app_home, resolve_registry_path};
use std::path::PathBuf;
use std::sync::Arc;

pub struct App {
    pub logger: Logger,
    pub home_dir: Option<PathBuf>,
    pub secret_store: Arc<dyn SecretStore>,
    pub master_key: Arc<MasterKeyProvider>,
    pub hosts: Arc<HostDatabase>,
    pub tunnel_client: TunnelClient,
}

impl App {
    fn select_secret_store(logger: &Logger) -> Result<Arc<dyn SecretStore>, KenshoError> {
        match resolve_secret_store_kind().as_str() {
            "keyring" => Ok(Arc::new(KeyringSecretStore::new(logger.clone()))),
            "memory" => {
                logger.warn("using in-memory secret store; nothing will persist", None);
                Ok(Arc::new(MemorySecretStore::new()))
            }
            other => Err(KenshoError::invalid_params(format!(
                "Unknown secret store: {}",
                other
            ))
            .with_hint("Set KENSHO_SECRET_STORE to keyring or memory.")),
        }
    }

    pub fn initialize() -> Result<Self, KenshoError> {
        let logger = Logger::new("kensho");
        let home_dir = resolve_app_home();
        if let Some(dir) = home_dir.as_ref() {
            if let Err(err) = ensure_dir_exists(dir) {
                logger.warn(
                    "failed to create application home",
                    Some(&serde_json::json!({ "path": dir, "error": err.to_string() })),
                );
            }
        }
        let secret_store = Self::select_secret_store(&logger)?;
        Self::build(logger, secret_store, home_dir, resolve_registry_path())
    }

    /// Wires every component from explicit parts.
    pub fn build(
        logger: Logger,
        secret_store: Arc<dyn SecretStore>,
        home_dir: Option<PathBuf>,
        registry_path: PathBuf,
    ) -> Result<Self, KenshoError> {
        let master_key = Arc::new(MasterKeyProvider::new(
            logger.clone(),
            Some(secret_store.clone()),
            home_dir.clone(),
        ));
        let registry = Arc::new(HostRegistry::open(logger.clone(), registry_path)?);
        let encryption = if is_credential_encryption_enabled() {
            Some(master_key.clone())
        } else {
            logger.info("credential encryption disabled", None);
            None
        };
        let credentials = CredentialStore::new(logger.clone(), secret_store.clone(), encryption);
        let hosts = Arc::new(HostDatabase::new(logger.clone(), registry, credentials));
        let tunnel_client = TunnelClient::new(logger.clone());

        Ok(Self {
            logger,
            home_dir,
            secret_store,
            master_key,
            hosts,
            tunnel_client,
        })
    }

    /// Opens an SSH tunnel to a saved host using its stored credentials.
    pub async fn connect(
        &self,
        host_id: &str,
        passphrase: Option<String>,
        host_key_fingerprint: Option<&str>,
    ) -> Result<Arc<SshTunnel>, KenshoError> {
        let credential = self.hosts.get(host_id)?;
        let options = SshConnectOptions::from_host_id(host_id)?
            .with_passphrase(passphrase)
            .with_host_key_fingerprint(host_key_fingerprint);
        SshTunnel::connect_async(self.logger.clone(), options, credential).await
    }

    pub fn node_api(&self, tunnel: Arc<dyn TunnelConnection>) -> Result<NodeApi, KenshoError> {
        NodeApi::with_default_port(self.tunnel_client.clone(), tunnel)
    }
}
