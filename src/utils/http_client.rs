//! HTTP client factory
//!
//! Builds the `reqwest` client shared by all URL fetch sources so every avatar
//! request carries the same user agent and timeouts.

use reqwest::Client;
use std::time::Duration;

use crate::config::AvatarConfig;
use crate::errors::{AppError, AppResult};

/// Factory for creating HTTP clients with the avatar fetch settings
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    connect_timeout: Duration,
    read_timeout: Duration,
    user_agent: String,
}

impl HttpClientFactory {
    pub fn new(connect_timeout: Duration, read_timeout: Duration, user_agent: impl Into<String>) -> Self {
        Self {
            connect_timeout,
            read_timeout,
            user_agent: user_agent.into(),
        }
    }

    pub fn from_config(config: &AvatarConfig) -> Self {
        Self::new(
            config.connect_timeout,
            config.read_timeout,
            config.user_agent.clone(),
        )
    }

    /// Create the client used for avatar fetches
    ///
    /// The read timeout bounds the whole request so no fetch can hold a worker
    /// slot indefinitely.
    pub fn create_client(&self) -> AppResult<Client> {
        tracing::debug!(
            "Creating avatar HTTP client (connect timeout {:?}, read timeout {:?})",
            self.connect_timeout,
            self.read_timeout
        );
        Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout)
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))
    }
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self::from_config(&AvatarConfig::default())
    }
}
