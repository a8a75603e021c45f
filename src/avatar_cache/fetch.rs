//! The body of a pooled avatar fetch

use chrono::{DateTime, Utc};
use futures::FutureExt;
use image::RgbaImage;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::imaging::{cap_retained, decode_image};
use super::source::FetchSource;
use crate::errors::FetchResult;
use crate::utils::url::UrlUtils;

/// What a finished fetch hands back to its cache entry
#[derive(Debug)]
pub struct FetchOutcome {
    /// Decoded image, already capped to the retained resolution
    pub image: Option<RgbaImage>,
    /// Modification time reported by the origin
    pub last_modified: Option<DateTime<Utc>>,
    /// When the fetch finished, not when the entry noticed
    pub completed_at: Instant,
}

impl FetchOutcome {
    /// A fetch that finished just now without an image
    pub fn empty() -> Self {
        Self {
            image: None,
            last_modified: None,
            completed_at: Instant::now(),
        }
    }
}

/// Handle on a fetch queued in the pool
#[derive(Debug)]
pub struct PendingFetch {
    receiver: oneshot::Receiver<FetchOutcome>,
}

/// Result of polling a [`PendingFetch`] without waiting
#[derive(Debug)]
pub enum FetchPoll {
    Running,
    /// The task finished; `None` when it died without reporting
    Finished(Option<FetchOutcome>),
}

impl PendingFetch {
    pub fn new(receiver: oneshot::Receiver<FetchOutcome>) -> Self {
        Self { receiver }
    }

    pub fn poll(&mut self) -> FetchPoll {
        match self.receiver.try_recv() {
            Ok(outcome) => FetchPoll::Finished(Some(outcome)),
            Err(TryRecvError::Empty) => FetchPoll::Running,
            Err(TryRecvError::Closed) => FetchPoll::Finished(None),
        }
    }
}

/// Fetch and decode one avatar.
///
/// Never fails: errors, undecodable payloads and panics inside the source all
/// collapse into an outcome without an image.
pub async fn fetch_avatar(source: Arc<dyn FetchSource>) -> FetchOutcome {
    let started = Instant::now();
    let identity = UrlUtils::obfuscate_credentials(source.identity());
    debug!("Fetching avatar {}", identity);

    let fetched = match AssertUnwindSafe(source.fetch()).catch_unwind().await {
        Ok(Ok(Some(fetched))) => fetched,
        Ok(Ok(None)) => {
            debug!("Origin has no avatar for {}", identity);
            return FetchOutcome::empty();
        }
        Ok(Err(e)) if e.is_permanent() => {
            debug!("Avatar {} cannot be fetched: {}", identity, e);
            return FetchOutcome::empty();
        }
        Ok(Err(e)) => {
            info!("Failed to fetch avatar {}: {}", identity, e);
            return FetchOutcome::empty();
        }
        Err(_) => {
            warn!("Avatar fetch for {} panicked", identity);
            return FetchOutcome::empty();
        }
    };

    let bytes = fetched.bytes;
    let decoded = tokio::task::spawn_blocking(move || -> FetchResult<RgbaImage> {
        Ok(cap_retained(decode_image(&bytes)?))
    })
    .await;

    let image = match decoded {
        Ok(Ok(image)) => image,
        Ok(Err(e)) => {
            info!("Could not use avatar {}: {}", identity, e);
            return FetchOutcome::empty();
        }
        Err(e) => {
            warn!("Avatar decode task for {} failed: {}", identity, e);
            return FetchOutcome::empty();
        }
    };

    debug!(
        "Fetched avatar {} ({}x{}) in {:?}",
        identity,
        image.width(),
        image.height(),
        started.elapsed()
    );

    FetchOutcome {
        image: Some(image),
        last_modified: fetched.last_modified,
        completed_at: Instant::now(),
    }
}
