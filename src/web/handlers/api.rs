//! JSON API for avatar URLs and cache statistics

use axum::{
    extract::{Query, State},
    response::Response,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AppError;
use crate::web::{
    AppState,
    responses::{handle_error, ok},
};

#[derive(Debug, Deserialize)]
pub struct AvatarUrlQuery {
    pub source: Option<String>,
    pub size: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AvatarUrlResponse {
    pub url: String,
    pub key: String,
}

/// `GET /api/v1/avatars/url?source=...&size=WxH`
///
/// Registers the source with the cache and returns the URL it is served from.
pub async fn get_avatar_url(
    State(state): State<AppState>,
    Query(query): Query<AvatarUrlQuery>,
) -> Response {
    let Some(source) = query.source.filter(|s| !s.trim().is_empty()) else {
        return handle_error(AppError::validation("query parameter 'source' is required"));
    };
    let size = query.size.unwrap_or_else(|| {
        let size = state.config.avatar.default_size;
        format!("{size}x{size}")
    });

    match state.url_builder.build(&source, &size).await {
        Ok(built) => {
            debug!("Built avatar URL {}", built.url);
            ok(AvatarUrlResponse {
                url: built.url,
                key: built.key.to_string(),
            })
        }
        Err(e) => handle_error(e.into()),
    }
}

/// `GET /api/v1/avatars/stats`
pub async fn get_avatar_stats(State(state): State<AppState>) -> Response {
    ok(state.store.stats().await)
}
