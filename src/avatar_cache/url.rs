//! Builds the public URLs avatars are served from
//!
//! Building a URL also registers the source with the store, which is what
//! starts the first fetch. The serving endpoint only ever sees the opaque key.

use reqwest::Client;
use std::sync::Arc;

use super::key::CacheKey;
use super::size::normalize_size_token;
use super::source::{FetchSource, UrlFetchSource};
use super::store::AvatarStore;
use crate::config::Config;
use crate::config::defaults::DEFAULT_MAX_BODY_BYTES;
use crate::errors::AvatarError;
use crate::utils::url::UrlUtils;

/// A built avatar URL together with the key it points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarUrl {
    pub url: String,
    pub key: CacheKey,
}

pub struct AvatarUrlBuilder {
    store: Arc<AvatarStore>,
    base_url: String,
    mount: String,
    client: Client,
    max_body_bytes: usize,
}

impl AvatarUrlBuilder {
    pub fn new(
        store: Arc<AvatarStore>,
        base_url: impl Into<String>,
        mount: impl Into<String>,
        client: Client,
    ) -> Self {
        Self {
            store,
            base_url: UrlUtils::sanitize_base(&base_url.into()),
            mount: mount.into().trim_matches('/').to_string(),
            client,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn from_config(store: Arc<AvatarStore>, config: &Config, client: Client) -> Self {
        Self {
            max_body_bytes: config.avatar.max_body_bytes,
            ..Self::new(store, &config.web.base_url, config.avatar.mount(), client)
        }
    }

    pub fn store(&self) -> &Arc<AvatarStore> {
        &self.store
    }

    /// Build the URL for an avatar identified by its source URL
    pub async fn build_url(&self, identity: &str, size: &str) -> Result<String, AvatarError> {
        Ok(self.build(identity, size).await?.url)
    }

    /// Like [`Self::build_url`], also returning the cache key
    pub async fn build(&self, identity: &str, size: &str) -> Result<AvatarUrl, AvatarError> {
        let source = UrlFetchSource::new(identity, self.client.clone())
            .with_max_body_bytes(self.max_body_bytes);
        self.build_for(Arc::new(source), size).await
    }

    /// Build the URL for an arbitrary fetch source
    pub async fn build_url_for(
        &self,
        source: Arc<dyn FetchSource>,
        size: &str,
    ) -> Result<String, AvatarError> {
        Ok(self.build_for(source, size).await?.url)
    }

    async fn build_for(
        &self,
        source: Arc<dyn FetchSource>,
        size: &str,
    ) -> Result<AvatarUrl, AvatarError> {
        if !UrlUtils::is_valid_base(&self.base_url) {
            return Err(AvatarError::MissingBaseUrl);
        }

        let key = source.cache_key();
        self.store.lookup(&key, Some(source)).await;

        let url = format!(
            "{}/{}/{}.png?size={}",
            self.base_url,
            self.mount,
            urlencoding::encode(key.as_str()),
            urlencoding::encode(normalize_size_token(size))
        );
        Ok(AvatarUrl { url, key })
    }
}

impl std::fmt::Debug for AvatarUrlBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarUrlBuilder")
            .field("base_url", &self.base_url)
            .field("mount", &self.mount)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar_cache::fetch::test_sources::StubSource;
    use crate::avatar_cache::store::StoreSettings;

    fn builder(base_url: &str) -> AvatarUrlBuilder {
        let store = Arc::new(AvatarStore::new(StoreSettings::default()));
        AvatarUrlBuilder::new(store, base_url, "avatar-cache", Client::new())
    }

    #[tokio::test]
    async fn test_build_url_for_unfetchable_identity() {
        let builder = builder("https://ci.example.com/");
        let url = builder.build_url("about:blank", "32x32").await.unwrap();

        let key = CacheKey::for_identity("about:blank");
        assert_eq!(
            url,
            format!("https://ci.example.com/avatar-cache/{}.png?size=32x32", key)
        );
        assert!(builder.store().contains(&key).await);
        assert_eq!(builder.store().pool().submitted(), 0);
    }

    #[tokio::test]
    async fn test_named_size_is_normalized() {
        let builder = builder("https://ci.example.com");
        let url = builder.build_url("about:blank", "icon-md").await.unwrap();
        assert!(url.ends_with(".png?size=24x24"));
    }

    #[tokio::test]
    async fn test_size_is_url_encoded() {
        let builder = builder("https://ci.example.com");
        let url = builder.build_url("about:blank", "32 x 32&x=1").await.unwrap();
        assert!(url.ends_with("?size=32%20x%2032%26x%3D1"));
    }

    #[tokio::test]
    async fn test_missing_base_url_is_an_error() {
        let builder = builder("");
        let err = builder.build_url("about:blank", "32x32").await.unwrap_err();
        assert_eq!(err, AvatarError::MissingBaseUrl);
        assert!(builder.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_build_url_for_custom_source_seeds_store() {
        let builder = builder("https://ci.example.com");
        let source = Arc::new(StubSource::image("user:alice", 16, 16));
        let url = builder.build_url_for(source.clone(), "16x16").await.unwrap();

        assert!(url.contains(source.cache_key().as_str()));
        assert!(builder.store().contains(&source.cache_key()).await);
        assert_eq!(builder.store().pool().submitted(), 1);
    }

    #[tokio::test]
    async fn test_same_identity_builds_same_url() {
        let builder = builder("https://ci.example.com");
        let a = builder.build("about:blank", "16x16").await.unwrap();
        let b = builder.build("about:blank", "16x16").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(builder.store().len().await, 1);
    }
}
