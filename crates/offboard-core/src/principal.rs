//! Validated identity of the principal whose access is being revoked.

use std::fmt::{self, Display, Formatter};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::model::{GranteeType, PermissionRecord};

static EMAIL: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$"));

/// Lowercased email address of the target principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal {
    email: String,
}

impl Principal {
    /// Validate and normalise a principal email address.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidPrincipal`] when the value is not a
    /// well-formed email address.
    pub fn parse(value: &str) -> ModelResult<Self> {
        let pattern = EMAIL.as_ref().map_err(|source| ModelError::PatternCompile {
            message: source.to_string(),
        })?;
        let email = value.trim().to_ascii_lowercase();
        if pattern.is_match(&email) {
            Ok(Self { email })
        } else {
            Err(ModelError::InvalidPrincipal {
                value: value.to_string(),
            })
        }
    }

    #[must_use]
    /// Normalised email address.
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    /// Domain part of the address.
    pub fn domain(&self) -> &str {
        self.email
            .rsplit_once('@')
            .map_or("", |(_, domain)| domain)
    }

    #[must_use]
    /// Whether `permission` grants access to this principal.
    ///
    /// User and group grants match on the full address, domain grants on the
    /// principal's domain; link grants never match.
    pub fn matches(&self, permission: &PermissionRecord) -> bool {
        let Some(grantee) = permission.grantee.as_deref().map(str::trim) else {
            return false;
        };
        match permission.grantee_type {
            GranteeType::User | GranteeType::Group => grantee.eq_ignore_ascii_case(&self.email),
            GranteeType::Domain => grantee.eq_ignore_ascii_case(self.domain()),
            GranteeType::Anyone => false,
        }
    }
}

impl Display for Principal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.email)
    }
}

impl TryFrom<String> for Principal {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Principal> for String {
    fn from(value: Principal) -> Self {
        value.email
    }
}
