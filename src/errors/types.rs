//! Error type definitions for the avatar cache

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Avatar cache usage errors
    #[error("Avatar error: {0}")]
    Avatar(#[from] AvatarError),

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors raised while retrieving avatar bytes from an origin.
///
/// These are swallowed at the fetch task boundary and only ever logged.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The source cannot be fetched at all (e.g. a non-HTTP URL)
    #[error("Source is not fetchable: {identity}")]
    Unfetchable { identity: String },

    /// Network level failure (connect, timeout, body read)
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Origin answered with a non-success status
    #[error("HTTP error: {status} - {url}")]
    Status { status: u16, url: String },

    /// Origin answered with something that is not an image
    #[error("Not an image: content type '{content_type}' from {url}")]
    NotAnImage { content_type: String, url: String },

    /// Body exceeds the accepted avatar size
    #[error("Payload too large: {size} bytes (max: {max_size})")]
    TooLarge { size: usize, max_size: usize },

    /// Bytes could not be decoded into a bitmap
    #[error("Decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Errors raised by the avatar URL builder and request parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AvatarError {
    /// URL building was attempted without a usable base URL
    #[error("No base URL available to build avatar URLs")]
    MissingBaseUrl,

    /// Request path does not carry a well-formed cache key
    #[error("Malformed cache key: {key}")]
    MalformedKey { key: String },
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a validation error with a custom message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl FetchError {
    /// Whether the failure is permanent for this source
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Unfetchable { .. })
    }
}
