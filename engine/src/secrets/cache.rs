use crate::secrets::string::SecretString;
use crate::secrets::SecretManager;
use sdk::errors::EngineError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// An in-memory cache for resolved secrets.
///
/// Adapters ask the cache on every request; only the first lookup per key
/// reaches the environment or keychain.
#[derive(Clone)]
pub struct SecretCache {
    manager: Arc<SecretManager>,
    cache: Arc<RwLock<HashMap<String, SecretString>>>,
}

impl SecretCache {
    /// Creates a new SecretCache wrapping the provided SecretManager
    pub fn new(manager: Arc<SecretManager>) -> Self {
        Self {
            manager,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Creates a cache pre-seeded with fixed values (no keychain access).
    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SecretString>,
    {
        let map = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            manager: Arc::new(SecretManager::new("sage")),
            cache: Arc::new(RwLock::new(map)),
        }
    }

    /// Retrieves a secret, checking the memory cache first.
    pub fn get_secret(&self, key: &str) -> Result<SecretString, EngineError> {
        {
            let cache = self
                .cache
                .read()
                .map_err(|_| EngineError::KeyringError("secret cache poisoned".to_string()))?;
            if let Some(secret) = cache.get(key) {
                return Ok(secret.clone());
            }
        }

        let secret = SecretString::new(self.manager.get_secret(key)?);

        {
            let mut cache = self
                .cache
                .write()
                .map_err(|_| EngineError::KeyringError("secret cache poisoned".to_string()))?;
            cache.insert(key.to_string(), secret.clone());
        }

        Ok(secret)
    }

    /// Whether a secret can be resolved right now
    pub fn has_secret(&self, key: &str) -> bool {
        let cached = self
            .cache
            .read()
            .map(|cache| cache.contains_key(key))
            .unwrap_or(false);
        cached || self.manager.has_secret(key)
    }
}
