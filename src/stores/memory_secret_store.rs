use crate::errors::KenshoError;
use crate::services::secret_store::SecretStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Process-local secret store. Shares state between clones.
#[derive(Clone, Default)]
pub struct MemorySecretStore {
    entries: Arc<RwLock<HashMap<(String, String), String>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with a `Persist` error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), KenshoError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KenshoError::persist("Secret store is unavailable"));
        }
        Ok(())
    }
}

impl SecretStore for MemorySecretStore {
    fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), KenshoError> {
        self.check_available()?;
        self.entries
            .write()
            .unwrap_or_else(|err| err.into_inner())
            .insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<String, KenshoError> {
        self.check_available()?;
        self.entries
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| {
                KenshoError::not_found(format!("No secret stored for '{}' in '{}'", key, namespace))
            })
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), KenshoError> {
        self.check_available()?;
        self.entries
            .write()
            .unwrap_or_else(|err| err.into_inner())
            .remove(&(namespace.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or_else(|| {
                KenshoError::not_found(format!("No secret stored for '{}' in '{}'", key, namespace))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_are_isolated() {
        let store = MemorySecretStore::new();
        store.set("a", "k", "1").unwrap();
        store.set("b", "k", "2").unwrap();
        assert_eq!(store.get("a", "k").unwrap(), "1");
        assert_eq!(store.get("b", "k").unwrap(), "2");
        store.delete("a", "k").unwrap();
        assert!(store.get("a", "k").unwrap_err().is_not_found());
        assert!(store.delete("a", "k").unwrap_err().is_not_found());
    }

    #[test]
    fn unavailable_store_fails_every_call() {
        let store = MemorySecretStore::new();
        store.set_unavailable(true);
        assert!(store.set("a", "k", "v").is_err());
        assert!(!store.get("a", "k").unwrap_err().is_not_found());
    }
}
