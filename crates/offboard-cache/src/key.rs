//! Cache keys derived from the scan scope.

use std::fmt::{self, Display, Formatter};

use sha2::{Digest, Sha256};

use crate::error::{CacheError, CacheResult};

const KEY_LEN: usize = 64;

/// Hex SHA-256 of the scan scope. Safe to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    #[must_use]
    /// Derive the key for a scan scope (account identity). The target
    /// principal never participates in the key.
    pub fn for_scope(scope: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(scope.trim().to_ascii_lowercase().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Rebuild a key from its hex form, e.g. a cache file stem.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidKey`] unless `value` is 64 lowercase hex
    /// characters.
    pub fn parse(value: &str) -> CacheResult<Self> {
        let valid = value.len() == KEY_LEN
            && value
                .bytes()
                .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte));
        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(CacheError::InvalidKey {
                value: value.to_string(),
            })
        }
    }

    #[must_use]
    /// Hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
