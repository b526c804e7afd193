use crate::errors::KenshoError;
use crate::services::logger::Logger;
use crate::utils::fs_atomic::atomic_write_text_file;
use crate::utils::host_id::normalize_host_id;
use std::collections::{BTreeSet, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable set of HostIDs backed by a one-entry-per-line text file.
///
/// Every mutation holds the lock across the in-memory change and the full-file
/// rewrite; a failed write rolls the in-memory change back, so the file always
/// mirrors the set once a call returns `Ok`.
pub struct HostRegistry {
    logger: Logger,
    file_path: PathBuf,
    hosts: Mutex<HashSet<String>>,
}

impl HostRegistry {
    pub fn open(logger: Logger, file_path: impl Into<PathBuf>) -> Result<Self, KenshoError> {
        let file_path = file_path.into();
        let hosts = load_from_file(&file_path)?;
        let logger = logger.child("registry");
        logger.debug(
            "opened",
            Some(&serde_json::json!({ "path": file_path, "hosts": hosts.len() })),
        );
        Ok(Self {
            logger,
            file_path,
            hosts: Mutex::new(hosts),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Idempotent: an already-registered host returns `Ok` without touching the file.
    pub fn add(&self, host_id: &str) -> Result<(), KenshoError> {
        let host_id = normalize_host_id(host_id)?;
        let mut hosts = self.lock();
        if hosts.contains(&host_id) {
            return Ok(());
        }
        hosts.insert(host_id.clone());
        if let Err(err) = self.save(&hosts) {
            hosts.remove(&host_id);
            return Err(err);
        }
        self.logger
            .info("host added", Some(&serde_json::json!({ "host_id": host_id })));
        Ok(())
    }

    pub fn delete(&self, host_id: &str) -> Result<(), KenshoError> {
        let host_id = normalize_host_id(host_id)?;
        let mut hosts = self.lock();
        if !hosts.remove(&host_id) {
            return Err(KenshoError::not_found(format!(
                "Host {} not found in registry",
                host_id
            )));
        }
        if let Err(err) = self.save(&hosts) {
            hosts.insert(host_id.clone());
            return Err(err);
        }
        self.logger
            .info("host deleted", Some(&serde_json::json!({ "host_id": host_id })));
        Ok(())
    }

    pub fn contains(&self, host_id: &str) -> bool {
        self.lock().contains(host_id.trim())
    }

    /// Snapshot of the registered hosts, sorted for stable presentation.
    pub fn list(&self) -> Vec<String> {
        let mut out: Vec<String> = self.lock().iter().cloned().collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.hosts.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn save(&self, hosts: &HashSet<String>) -> Result<(), KenshoError> {
        let sorted: BTreeSet<&String> = hosts.iter().collect();
        let mut content = String::new();
        for host in sorted {
            content.push_str(host);
            content.push('\n');
        }
        atomic_write_text_file(&self.file_path, &content, 0o600).map_err(|err| {
            self.logger.error(
                "failed to persist registry",
                Some(&serde_json::json!({ "path": self.file_path, "error": err.to_string() })),
            );
            KenshoError::registry_io(format!(
                "Failed to write host registry {}: {}",
                self.file_path.display(),
                err
            ))
        })
    }
}

fn load_from_file(path: &Path) -> Result<HashSet<String>, KenshoError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(err) => {
            return Err(KenshoError::registry_io(format!(
                "Failed to read host registry {}: {}",
                path.display(),
                err
            )))
        }
    };
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
