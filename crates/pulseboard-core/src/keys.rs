//! Scraper API key pools, loaded from a YAML config file.
//!
//! Each provider gets an optional `premium` key (always tried first) and a
//! list of rotation keys. Keys are secrets; the types deliberately do not
//! implement `Display` and their `Debug` output is redacted.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::ConfigError;

/// Key pool for one provider.
#[derive(Clone, Deserialize)]
pub struct KeyPoolConfig {
    #[serde(default)]
    pub premium: Option<String>,
    #[serde(default)]
    pub keys: Vec<String>,
}

impl KeyPoolConfig {
    /// Total number of usable keys (premium plus pool).
    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.premium.is_some()) + self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for KeyPoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPoolConfig")
            .field("premium", &self.premium.as_ref().map(|_| "[redacted]"))
            .field("keys", &format!("[{} redacted]", self.keys.len()))
            .finish()
    }
}

/// The whole keys file: provider name → pool.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyPoolsFile {
    pub providers: HashMap<String, KeyPoolConfig>,
}

impl KeyPoolsFile {
    #[must_use]
    pub fn pool_for(&self, provider: &str) -> Option<&KeyPoolConfig> {
        self.providers.get(provider)
    }
}

/// Load and validate the key pools from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or any provider
/// entry has no keys at all.
pub fn load_key_pools(path: &Path) -> Result<KeyPoolsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::KeysFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let file: KeyPoolsFile = serde_yaml::from_str(&content)?;
    validate_key_pools(&file)?;
    Ok(file)
}

fn validate_key_pools(file: &KeyPoolsFile) -> Result<(), ConfigError> {
    for (provider, pool) in &file.providers {
        if pool.is_empty() {
            return Err(ConfigError::Validation(format!(
                "provider '{provider}' has no keys configured"
            )));
        }
        if pool
            .keys
            .iter()
            .chain(pool.premium.iter())
            .any(|k| k.trim().is_empty())
        {
            return Err(ConfigError::Validation(format!(
                "provider '{provider}' has a blank key entry"
            )));
        }
    }
    Ok(())
}
