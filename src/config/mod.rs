use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};

pub mod defaults;
pub mod duration_serde;

use defaults::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub avatar: AvatarConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public base URL used when building avatar URLs
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

/// Avatar cache tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarConfig {
    /// Path segment the avatar endpoint is mounted under
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
    /// Number of fetches allowed to run at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Age after which a fetched avatar is refreshed in the background
    #[serde(default = "default_stale_after", with = "duration_serde::duration")]
    pub stale_after: Duration,
    /// Entries not read for this long are evicted by the sweep
    #[serde(default = "default_unused_after", with = "duration_serde::duration")]
    pub unused_after: Duration,
    #[serde(default = "default_connect_timeout", with = "duration_serde::duration")]
    pub connect_timeout: Duration,
    #[serde(default = "default_read_timeout", with = "duration_serde::duration")]
    pub read_timeout: Duration,
    /// Size served when the request carries no usable size
    #[serde(default = "default_size")]
    pub default_size: u32,
    /// Largest avatar body accepted from an origin, in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_mount_path() -> String {
    DEFAULT_MOUNT_PATH.to_string()
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_stale_after() -> Duration {
    DEFAULT_STALE_AFTER
}

fn default_unused_after() -> Duration {
    DEFAULT_UNUSED_AFTER
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_read_timeout() -> Duration {
    DEFAULT_READ_TIMEOUT
}

fn default_size() -> u32 {
    DEFAULT_AVATAR_SIZE
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
        }
    }
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            mount_path: default_mount_path(),
            concurrency: default_concurrency(),
            stale_after: default_stale_after(),
            unused_after: default_unused_after(),
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            default_size: default_size(),
            max_body_bytes: default_max_body_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

impl AvatarConfig {
    /// Validate values that would otherwise break the cache at runtime
    pub fn validate(&self) -> AppResult<()> {
        if self.concurrency == 0 {
            return Err(AppError::configuration("avatar.concurrency must be at least 1"));
        }
        let mount = self.mount_path.trim_matches('/');
        if mount.is_empty() || mount.contains('/') {
            return Err(AppError::configuration(format!(
                "avatar.mount_path must be a single path segment, got '{}'",
                self.mount_path
            )));
        }
        if !(crate::avatar_cache::MIN_SIZE..=crate::avatar_cache::MAX_SIZE)
            .contains(&self.default_size)
        {
            return Err(AppError::configuration(format!(
                "avatar.default_size must be between {} and {}",
                crate::avatar_cache::MIN_SIZE,
                crate::avatar_cache::MAX_SIZE
            )));
        }
        Ok(())
    }

    /// Mount path without surrounding slashes
    pub fn mount(&self) -> &str {
        self.mount_path.trim_matches('/')
    }
}

impl Config {
    /// Load configuration with layered priority: ENV > File > Defaults
    pub fn load_from_file(config_file: &str) -> AppResult<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if Path::new(config_file).exists() {
            info!("Loading configuration from {}", config_file);
            figment = figment.merge(Toml::file(config_file));
        } else {
            debug!("Config file {} not found, using defaults", config_file);
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment
            .extract()
            .map_err(|e| AppError::configuration(e.to_string()))?;
        config.avatar.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml_string(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| AppError::internal(e.to_string()))
    }
}
