/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
use std::time::Duration;

// Web server defaults
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

// Avatar cache defaults
pub const DEFAULT_MOUNT_PATH: &str = "avatar-cache";
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_UNUSED_AFTER: Duration = Duration::from_secs(2 * 60 * 60);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_AVATAR_SIZE: u32 = 48;
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

// Environment
pub const ENV_PREFIX: &str = "AVATAR_CACHE_";
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
