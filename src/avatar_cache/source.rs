//! Fetch sources: where avatar bytes come from

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED};
use std::fmt;
use tracing::trace;

use super::key::CacheKey;
use crate::config::defaults::DEFAULT_MAX_BODY_BYTES;
use crate::errors::{FetchError, FetchResult};
use crate::utils::url::UrlUtils;

/// Raw avatar bytes as returned by an origin
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Bytes,
    /// Modification time reported by the origin, if any
    pub last_modified: Option<DateTime<Utc>>,
}

/// Something that knows how to retrieve an avatar image.
///
/// `identity` must be stable: it is what the cache key is derived from.
#[async_trait]
pub trait FetchSource: Send + Sync + fmt::Debug {
    /// Stable identity of the avatar (usually its URL)
    fn identity(&self) -> &str;

    /// Whether `fetch` can ever produce an image.
    ///
    /// A `false` here is permanent; the cache will never call `fetch`.
    fn can_fetch(&self) -> bool;

    /// Retrieve the image bytes. `Ok(None)` means the origin has no avatar.
    async fn fetch(&self) -> FetchResult<Option<FetchedImage>>;

    /// Key under which this source is cached
    fn cache_key(&self) -> CacheKey {
        CacheKey::for_identity(self.identity())
    }
}

/// HTTP(S) URL avatar source
#[derive(Clone)]
pub struct UrlFetchSource {
    url: String,
    fetchable: bool,
    client: Client,
    max_body_bytes: usize,
}

impl UrlFetchSource {
    pub fn new(url: impl Into<String>, client: Client) -> Self {
        let url = url.into();
        Self {
            fetchable: UrlUtils::is_fetchable(&url),
            url,
            client,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Limit the body size accepted from the origin
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

impl fmt::Debug for UrlFetchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlFetchSource")
            .field("url", &UrlUtils::obfuscate_credentials(&self.url))
            .field("fetchable", &self.fetchable)
            .finish()
    }
}

fn parse_last_modified(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl FetchSource for UrlFetchSource {
    fn identity(&self) -> &str {
        &self.url
    }

    fn can_fetch(&self) -> bool {
        self.fetchable
    }

    async fn fetch(&self) -> FetchResult<Option<FetchedImage>> {
        if !self.fetchable {
            return Err(FetchError::Unfetchable {
                identity: self.url.clone(),
            });
        }

        let safe_url = UrlUtils::obfuscate_credentials(&self.url);
        let response = self.client.get(self.url.trim()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: safe_url,
            });
        }

        let headers = response.headers();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("image/") {
            return Err(FetchError::NotAnImage {
                content_type,
                url: safe_url,
            });
        }

        let declared_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if let Some(length) = declared_length
            && length > self.max_body_bytes
        {
            return Err(FetchError::TooLarge {
                size: length,
                max_size: self.max_body_bytes,
            });
        }

        let last_modified = headers
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_last_modified);

        let mut body = Vec::with_capacity(declared_length.unwrap_or(8 * 1024));
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(FetchError::TooLarge {
                    size: body.len() + chunk.len(),
                    max_size: self.max_body_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        trace!("Fetched {} bytes of avatar data from {}", body.len(), safe_url);

        if body.is_empty() {
            return Ok(None);
        }

        Ok(Some(FetchedImage {
            bytes: Bytes::from(body),
            last_modified,
        }))
    }
}
