//! Avatar cache
//!
//! Avatars are registered through [`AvatarUrlBuilder`], fetched in the
//! background by a bounded [`FetchPool`] and kept in an [`AvatarStore`] keyed by
//! an opaque [`CacheKey`]. Until an image is available, and for sources that can
//! never produce one, a deterministic placeholder is served instead.

pub mod entry;
pub mod fetch;
pub mod imaging;
pub mod key;
pub mod pool;
pub mod size;
pub mod source;
pub mod store;
pub mod url;

/// Smallest edge length avatars are served at
pub const MIN_SIZE: u32 = 16;
/// Largest edge length avatars are served at
pub const MAX_SIZE: u32 = 128;
/// Fetched images are scaled down to fit this before they are retained
pub const MAX_RETAINED_SIZE: u32 = 128;

pub use entry::{EntrySnapshot, EntryState};
pub use key::CacheKey;
pub use pool::FetchPool;
pub use source::{FetchSource, FetchedImage, UrlFetchSource};
pub use store::{AvatarStore, StoreSettings, StoreStats};
pub use url::{AvatarUrl, AvatarUrlBuilder};
