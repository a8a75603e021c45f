//! Cache key derivation
//!
//! Keys are the lowercase hex SHA-256 of a fixed namespace and the fetch
//! source identity, so they are stable across restarts and reveal nothing about
//! the source they stand for.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::errors::AvatarError;

/// Namespace mixed into every key digest
pub const KEY_NAMESPACE: &str = "avatar-cache";

const KEY_HEX_LEN: usize = 64;

/// Opaque key identifying one avatar source in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a source identity
    pub fn for_identity(identity: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_NAMESPACE.as_bytes());
        hasher.update([0u8]);
        hasher.update(identity.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Parse a key received from a client
    pub fn parse(raw: &str) -> Result<Self, AvatarError> {
        let well_formed = raw.len() == KEY_HEX_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if well_formed {
            Ok(Self(raw.to_string()))
        } else {
            Err(AvatarError::MalformedKey {
                key: raw.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
