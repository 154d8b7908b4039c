use async_trait::async_trait;
use qnxtainer_common::{EndpointConfig, QnxtainerError, Result};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub const CONFIG_FILE_NAME: &str = "api-config.json";

/// Persistence for the endpoint descriptor.
///
/// `load` never fails: anything missing, unreadable or invalid yields the
/// built-in default. `save` reports failures, but the engine logs and
/// ignores them since the in-memory endpoint stays authoritative.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> EndpointConfig;
    async fn save(&self, config: &EndpointConfig) -> Result<()>;
}

/// Stores the endpoint as a single JSON record on disk.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at [`default_config_path`].
    pub fn default_location() -> Self {
        Self::new(default_config_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn load(&self) -> EndpointConfig {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no endpoint config at {}, using default", self.path.display());
                return EndpointConfig::default();
            }
            Err(e) => {
                warn!("failed to read {}: {}", self.path.display(), e);
                return EndpointConfig::default();
            }
        };

        let config = match serde_json::from_slice::<EndpointConfig>(&bytes) {
            Ok(config) => config,
            Err(e) => {
                warn!("ignoring malformed endpoint config {}: {}", self.path.display(), e);
                return EndpointConfig::default();
            }
        };
        if let Err(e) = config.validate() {
            warn!("ignoring endpoint config {}: {}", self.path.display(), e);
            return EndpointConfig::default();
        }
        config
    }

    async fn save(&self, config: &EndpointConfig) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(config)
            .map_err(|e| QnxtainerError::InvalidConfig(format!("serialize endpoint: {}", e)))?;

        // Write then rename so a crash never leaves a truncated record.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("saved endpoint {} to {}", config, self.path.display());
        Ok(())
    }
}

/// Keeps the endpoint in memory only.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    config: RwLock<Option<EndpointConfig>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EndpointConfig) -> Self {
        Self {
            config: RwLock::new(Some(config)),
        }
    }

    /// The last saved value, if any.
    pub async fn stored(&self) -> Option<EndpointConfig> {
        self.config.read().await.clone()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn load(&self) -> EndpointConfig {
        match self.config.read().await.as_ref() {
            Some(config) if config.validate().is_ok() => config.clone(),
            _ => EndpointConfig::default(),
        }
    }

    async fn save(&self, config: &EndpointConfig) -> Result<()> {
        *self.config.write().await = Some(config.clone());
        Ok(())
    }
}

/// `$QNXTAINER_CONFIG`, else `$XDG_CONFIG_HOME/qnxtainer/api-config.json`,
/// else `$HOME/.config/qnxtainer/api-config.json`, else `./api-config.json`.
pub fn default_config_path() -> PathBuf {
    config_path_from(|key| std::env::var_os(key))
}

fn config_path_from(lookup: impl Fn(&str) -> Option<OsString>) -> PathBuf {
    let var = |key: &str| lookup(key).filter(|value| !value.is_empty());

    if let Some(path) = var("QNXTAINER_CONFIG") {
        return PathBuf::from(path);
    }
    if let Some(dir) = var("XDG_CONFIG_HOME") {
        return PathBuf::from(dir).join("qnxtainer").join(CONFIG_FILE_NAME);
    }
    if let Some(home) = var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("qnxtainer")
            .join(CONFIG_FILE_NAME);
    }
    PathBuf::from(CONFIG_FILE_NAME)
}
