//! Engine configuration loaded from a TOML file

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Deserialize;

use crate::error::{PathguardError, Result};

/// Environment variable naming the engine home directory.
pub const HOME_ENV: &str = "PATHGUARD_HOME";

const DEFAULT_STORE_DIR: &str = "runtime/data/cache";

/// Process-wide engine configuration. Install once with [`install`];
/// everything after that reads the same instance.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct EngineConfig {
    pub authorization: AuthorizationConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct AuthorizationConfig {
    /// When set, every permission check succeeds. Bootstrap only.
    pub disabled: bool,
    /// Log each permission check and the grants it resolved.
    pub verbose: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct CacheConfig {
    /// Disk store directory, relative to the engine home.
    pub file_store: String,
    /// Per-cache tuning, keyed by cache name. File values override
    /// whatever the constructing code asked for.
    pub tables: HashMap<String, CacheTuning>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file_store: DEFAULT_STORE_DIR.to_string(),
            tables: HashMap::new(),
        }
    }
}

/// Optional per-cache overrides; absent fields keep the constructor's
/// values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct CacheTuning {
    pub max_size: Option<usize>,
    pub max_in_memory: Option<usize>,
    pub expire_millis: Option<u64>,
    pub soft_values: Option<bool>,
    pub file_store: Option<bool>,
}

impl EngineConfig {
    /// Parse a TOML config file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PathguardError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| PathguardError::Config(e.to_string()))
    }

    /// The engine home directory, from `PATHGUARD_HOME` or the current
    /// directory.
    pub fn home() -> PathBuf {
        env::var(HOME_ENV).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Where disk-backed caches keep their store.
    pub fn store_dir(&self) -> PathBuf {
        Self::home().join(&self.cache.file_store)
    }

    pub fn cache_tuning(&self, name: &str) -> Option<&CacheTuning> {
        self.cache.tables.get(name)
    }
}

static CONFIG: OnceLock<EngineConfig> = OnceLock::new();

/// Install the process-wide configuration. Later installs are ignored.
pub fn install(config: EngineConfig) {
    let _ = CONFIG.set(config);
}

/// The installed configuration, or the defaults when none was installed.
pub fn get() -> &'static EngineConfig {
    CONFIG.get_or_init(EngineConfig::default)
}
