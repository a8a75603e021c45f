//! Avatar serving endpoint
//!
//! `GET /{mount}/{key}.png?size=WxH` renders the cached state of a key:
//!
//! | state       | body                  | Cache-Control                          | Last-Modified |
//! |-------------|-----------------------|----------------------------------------|---------------|
//! | unfetchable | placeholder           | `max-age=365000000, immutable, public` | yes           |
//! | pending     | placeholder           | `no-cache, public`                     | no            |
//! | failed      | placeholder           | `max-age=3600, public`                 | yes           |
//! | ready       | scaled cached image   | `max-age=3600, public`                 | yes           |
//!
//! Conditional requests are answered with `304 Not Modified` whenever a
//! `Last-Modified` would be sent and the client copy is not older than it.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_extra::headers::{HeaderMapExt, IfModifiedSince, LastModified};
use chrono::{DateTime, SubsecRound, Utc};
use image::RgbaImage;
use serde::Deserialize;
use std::borrow::Cow;
use std::time::SystemTime;
use tracing::{debug, error};

use crate::avatar_cache::entry::{EntrySnapshot, EntryState};
use crate::avatar_cache::imaging::{encode_png, generate_placeholder, scale_image};
use crate::avatar_cache::key::CacheKey;
use crate::avatar_cache::size::parse_size;
use crate::web::AppState;

pub const CACHE_IMMUTABLE: &str = "max-age=365000000, immutable, public";
pub const CACHE_NO_CACHE: &str = "no-cache, public";
pub const CACHE_RETRY: &str = "max-age=3600, public";

#[derive(Debug, Default, Deserialize)]
pub struct AvatarQuery {
    pub size: Option<String>,
}

/// Serve the avatar stored under `{key}.png`
pub async fn serve_avatar(
    State(state): State<AppState>,
    Path(file): Path<String>,
    Query(query): Query<AvatarQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(raw_key) = file.strip_suffix(".png") else {
        debug!("Avatar request without .png suffix: {}", file);
        return StatusCode::NOT_FOUND.into_response();
    };
    let key = match CacheKey::parse(raw_key) {
        Ok(key) => key,
        Err(e) => {
            debug!("Rejected avatar request: {}", e);
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let Some(entry) = state.store.lookup(&key, None).await else {
        debug!("Avatar {} is not cached", key);
        return StatusCode::NOT_FOUND.into_response();
    };

    let size = parse_size(query.size.as_deref(), state.config.avatar.default_size);
    let since = headers.typed_get::<IfModifiedSince>();
    render_avatar(&entry, size, since.as_ref())
}

/// Build the response for an entry snapshot
pub fn render_avatar(
    entry: &EntrySnapshot,
    size: u32,
    since: Option<&IfModifiedSince>,
) -> Response {
    let last_modified = entry.last_modified;
    match entry.state() {
        EntryState::Unfetchable => {
            if is_unmodified(since, last_modified) {
                return not_modified(CACHE_IMMUTABLE, last_modified);
            }
            let placeholder = generate_placeholder(&entry.identity, size);
            png_response(&placeholder, CACHE_IMMUTABLE, Some(last_modified))
        }
        EntryState::Pending => {
            let placeholder = generate_placeholder(&entry.identity, size);
            png_response(&placeholder, CACHE_NO_CACHE, None)
        }
        EntryState::Failed => {
            if is_unmodified(since, last_modified) {
                return not_modified(CACHE_RETRY, last_modified);
            }
            let placeholder = generate_placeholder(&entry.identity, size);
            png_response(&placeholder, CACHE_RETRY, Some(last_modified))
        }
        EntryState::Ready => {
            if is_unmodified(since, last_modified) {
                return not_modified(CACHE_RETRY, last_modified);
            }
            let Some(image) = entry.image.as_deref() else {
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            };
            let scaled = if image.dimensions() == (size, size) {
                Cow::Borrowed(image)
            } else {
                Cow::Owned(scale_image(image, size))
            };
            png_response(&scaled, CACHE_RETRY, Some(last_modified))
        }
    }
}

/// HTTP dates carry whole seconds, so compare at that precision
fn is_unmodified(since: Option<&IfModifiedSince>, last_modified: DateTime<Utc>) -> bool {
    let last_modified = SystemTime::from(last_modified.trunc_subsecs(0));
    since.is_some_and(|since| !since.is_modified(last_modified))
}

fn base_headers(cache_control: &'static str, last_modified: Option<DateTime<Utc>>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache_control));
    if let Some(last_modified) = last_modified {
        headers.typed_insert(LastModified::from(SystemTime::from(last_modified)));
    }
    headers
}

fn not_modified(cache_control: &'static str, last_modified: DateTime<Utc>) -> Response {
    (
        StatusCode::NOT_MODIFIED,
        base_headers(cache_control, Some(last_modified)),
    )
        .into_response()
}

fn png_response(
    image: &RgbaImage,
    cache_control: &'static str,
    last_modified: Option<DateTime<Utc>>,
) -> Response {
    let body = match encode_png(image) {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to encode avatar PNG: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut headers = base_headers(cache_control, last_modified);
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    (StatusCode::OK, headers, body).into_response()
}
