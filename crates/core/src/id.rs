//! Product identifiers.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Storefront product identifier (e.g. `"com.example.pro.monthly"`).
///
/// The identifier is the stable key for everything: catalog lookups,
/// transaction routing and the persisted entitlement keys. Two products with
/// the same identifier are the same product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductIdentifier(String);

impl ProductIdentifier {
    /// Build an identifier, rejecting empty values and embedded whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::validation("product identifier must not be empty"));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(DomainError::validation(format!(
                "product identifier must not contain whitespace: {value:?}"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Persistence key for a per-product flag: `"<identifier><suffix>"`.
    pub fn key(&self, suffix: &str) -> String {
        let mut key = String::with_capacity(self.0.len() + suffix.len());
        key.push_str(&self.0);
        key.push_str(suffix);
        key
    }
}

impl core::fmt::Display for ProductIdentifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ProductIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ProductIdentifier {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for ProductIdentifier {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
