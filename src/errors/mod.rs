//! Centralized error handling for the avatar cache
//!
//! # Error Categories
//!
//! - **Fetch Errors**: retrieving avatar bytes from an origin. These never leave
//!   the fetch task; they are logged and the entry is left without an image.
//! - **Avatar Errors**: misuse of the URL builder or malformed cache keys.
//! - **Application Errors**: configuration, startup and API failures.
//!
//! # Usage
//!
//! ```rust
//! use avatar_cache::errors::{AppError, AppResult};
//!
//! fn example_function() -> AppResult<String> {
//!     Ok("success".to_string())
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for fetch results
pub type FetchResult<T> = Result<T, FetchError>;
