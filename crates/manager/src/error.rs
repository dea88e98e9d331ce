use thiserror::Error;

use iapkit_core::DomainError;

/// Construction-time failures. Once built, the manager reports problems
/// through logs and notifications only.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("invalid product catalog: {0}")]
    Catalog(#[from] DomainError),

    #[error("manager must be constructed inside a tokio runtime")]
    NoRuntime,
}
