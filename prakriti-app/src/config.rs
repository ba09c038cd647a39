//! Client configuration
//!
//! Layered lowest to highest: built-in defaults, `client.toml` in the config
//! directory (or an explicit file), then `PRAKRITI_*` environment variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use config::{Config, Environment, File, FileFormat};
use prakriti_core::directory::Directory;
use serde::Deserialize;

use crate::auth::storage::{EncryptedFileStorage, PlainFileStorage, Storage};

pub const CONFIG_FILE_NAME: &str = "client.toml";
pub const ENV_PREFIX: &str = "PRAKRITI";
pub const DEFAULT_API_URL: &str = "http://localhost:3001/api/v1";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    pub api_url: String,
    /// Overall request timeout; unset keeps the transport default
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Refresh this long before the access token expires
    pub refresh_buffer_secs: u64,
    pub background_refresh_secs: u64,
    /// Where credentials and the session snapshot live
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
    pub encrypt_storage: bool,
}

impl ClientConfig {
    /// Load from the default config file location and the environment
    pub fn load() -> Result<Self> {
        let file = Directory::config_directory().map(|dir| dir.join(CONFIG_FILE_NAME));
        Self::load_with(file.as_deref(), None)
    }

    /// Load with an explicit file, failing if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("config file not found: {}", path.display());
        }
        Self::load_with(Some(path), None)
    }

    /// `env` replaces the process environment when given
    pub fn load_with(file: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("api_url", DEFAULT_API_URL)?
            .set_default("refresh_buffer_secs", 300)?
            .set_default("background_refresh_secs", 60)?
            .set_default("encrypt_storage", true)?;

        if let Some(file) = file {
            builder = builder.add_source(
                File::from(file)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        let config: ClientConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(env.map(|vars| vars.into_iter().collect())),
            )
            .build()?
            .try_deserialize()
            .context("invalid client configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.api_url)
            .with_context(|| format!("invalid api_url: {}", self.api_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("api_url must be http or https: {}", self.api_url);
        }
        if self.background_refresh_secs == 0 {
            bail!("background_refresh_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.refresh_buffer_secs)
    }

    pub fn background_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.background_refresh_secs)
    }

    pub fn storage_directory(&self) -> Result<PathBuf> {
        match &self.storage_dir {
            Some(dir) => Ok(dir.clone()),
            None => Directory::auth_directory().context("could not resolve data directory"),
        }
    }

    pub fn open_storage(&self) -> Result<Arc<dyn Storage>> {
        let dir = self.storage_directory()?;
        let storage: Arc<dyn Storage> = if self.encrypt_storage {
            Arc::new(EncryptedFileStorage::new(dir)?)
        } else {
            Arc::new(PlainFileStorage::new(dir)?)
        };
        Ok(storage)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: None,
            refresh_buffer_secs: 300,
            background_refresh_secs: 60,
            storage_dir: None,
            encrypt_storage: true,
        }
    }
}
