//! A single cached avatar and the state it is served from

use chrono::{DateTime, Utc};
use image::RgbaImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::fetch::{FetchOutcome, FetchPoll, PendingFetch};
use super::source::FetchSource;

/// Cached state for one fetch source
#[derive(Debug)]
pub struct CacheEntry {
    source: Arc<dyn FetchSource>,
    image: Option<Arc<RgbaImage>>,
    last_modified: DateTime<Utc>,
    created_at: Instant,
    fetched_at: Instant,
    last_accessed: Option<Instant>,
    pending: Option<PendingFetch>,
}

impl CacheEntry {
    pub fn new(source: Arc<dyn FetchSource>) -> Self {
        let now = Instant::now();
        Self {
            source,
            image: None,
            last_modified: Utc::now(),
            created_at: now,
            fetched_at: now,
            last_accessed: None,
            pending: None,
        }
    }

    pub fn source(&self) -> &Arc<dyn FetchSource> {
        &self.source
    }

    pub fn can_fetch(&self) -> bool {
        self.source.can_fetch()
    }

    pub fn set_pending(&mut self, pending: PendingFetch) {
        self.pending = Some(pending);
    }

    /// Fold a finished fetch into the entry.
    ///
    /// Returns `true` while a fetch is still outstanding.
    pub fn drain_pending(&mut self) -> bool {
        let Some(pending) = self.pending.as_mut() else {
            return false;
        };
        match pending.poll() {
            FetchPoll::Running => true,
            FetchPoll::Finished(Some(outcome)) => {
                self.pending = None;
                self.fetched_at = outcome.completed_at;
                self.apply(outcome);
                false
            }
            // the task died without reporting
            FetchPoll::Finished(None) => {
                self.pending = None;
                self.fetched_at = Instant::now();
                false
            }
        }
    }

    fn apply(&mut self, outcome: FetchOutcome) {
        // a failed refresh keeps the previous image
        let Some(image) = outcome.image else {
            return;
        };
        if self.image.as_deref() == Some(&image) {
            return;
        }

        let now = Utc::now();
        let reported = outcome.last_modified.unwrap_or(now);
        // a changed image must never look older than what clients already hold
        let candidate = if reported > self.last_modified {
            reported
        } else {
            now
        };
        self.last_modified = self.last_modified.max(candidate);
        self.image = Some(Arc::new(image));
    }

    /// Whether the last fetch completed longer than `stale_after` ago
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        self.fetched_at.elapsed() > stale_after
    }

    /// Whether nobody has read the entry for longer than `unused_after`.
    ///
    /// Entries that were never read count from their creation.
    pub fn is_unused(&self, unused_after: Duration) -> bool {
        self.last_accessed
            .unwrap_or(self.created_at)
            .elapsed()
            > unused_after
    }

    pub fn touch(&mut self) {
        self.last_accessed = Some(Instant::now());
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            identity: self.source.identity().to_string(),
            can_fetch: self.can_fetch(),
            image: self.image.clone(),
            last_modified: self.last_modified,
            pending: self.pending.is_some(),
            fetched_at: self.fetched_at,
            last_accessed: self.last_accessed,
        }
    }
}

/// Point-in-time copy of an entry, safe to use without holding any lock
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub identity: String,
    pub can_fetch: bool,
    pub image: Option<Arc<RgbaImage>>,
    pub last_modified: DateTime<Utc>,
    pub pending: bool,
    pub fetched_at: Instant,
    pub last_accessed: Option<Instant>,
}

/// How an entry should be served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// The source can never produce an image
    Unfetchable,
    /// First fetch still running
    Pending,
    /// Fetching finished without an image
    Failed,
    /// An image is available, possibly while a refresh runs
    Ready,
}

impl EntrySnapshot {
    pub fn state(&self) -> EntryState {
        if !self.can_fetch {
            EntryState::Unfetchable
        } else if self.image.is_some() {
            EntryState::Ready
        } else if self.pending {
            EntryState::Pending
        } else {
            EntryState::Failed
        }
    }
}
