//! Domain error model.

use thiserror::Error;

use crate::id::ProductIdentifier;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// These are deterministic failures (validation, misuse of the catalog).
/// Storefront and receipt failures are modelled by their own error types in
/// the crates that talk to those collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed identifier).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The identifier is not part of the configured product catalog.
    #[error("unknown product identifier: {0}")]
    UnknownProduct(ProductIdentifier),

    /// An operation that only makes sense for auto-renewable subscriptions
    /// was requested for another product type.
    #[error("product is not an auto-renewable subscription: {0}")]
    NotAutoRenewable(ProductIdentifier),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unknown_product(id: &ProductIdentifier) -> Self {
        Self::UnknownProduct(id.clone())
    }

    pub fn not_auto_renewable(id: &ProductIdentifier) -> Self {
        Self::NotAutoRenewable(id.clone())
    }
}
