//! Storefront boundary: catalog lookup, payments and the transaction queue.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use iapkit_catalog::CatalogMetadata;
use iapkit_core::ProductIdentifier;

/// Metadata for every identifier the storefront knows about.
pub type CatalogResponse = HashMap<ProductIdentifier, CatalogMetadata>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorefrontError {
    #[error("storefront unreachable: {0}")]
    Network(String),
    #[error("storefront unavailable: {0}")]
    Unavailable(String),
    #[error("invalid storefront response: {0}")]
    InvalidResponse(String),
    #[error("restore failed: {0}")]
    Restore(String),
}

/// Lifecycle state of a payment transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    /// Payment sheet is up; the storefront still owns the transaction.
    Purchasing,
    Purchased,
    Failed,
    Restored,
    /// Waiting on an external approval (e.g. parental consent).
    Deferred,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionErrorKind {
    Unknown,
    ClientInvalid,
    PaymentCancelled,
    PaymentInvalid,
    PaymentNotAllowed,
    ProductNotAvailable,
    NetworkFailure,
}

/// Why a transaction ended in [`TransactionState::Failed`].
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

impl TransactionError {
    pub fn new(kind: TransactionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(TransactionErrorKind::PaymentCancelled, "payment cancelled by user")
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == TransactionErrorKind::PaymentCancelled
    }
}

/// One transaction update delivered by the storefront.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub transaction_id: Uuid,
    pub product_identifier: ProductIdentifier,
    pub state: TransactionState,
    #[serde(default)]
    pub error: Option<TransactionError>,
}

impl TransactionEvent {
    pub fn new(product_identifier: ProductIdentifier, state: TransactionState) -> Self {
        Self {
            transaction_id: Uuid::now_v7(),
            product_identifier,
            state,
            error: None,
        }
    }

    pub fn purchased(product_identifier: ProductIdentifier) -> Self {
        Self::new(product_identifier, TransactionState::Purchased)
    }

    pub fn restored(product_identifier: ProductIdentifier) -> Self {
        Self::new(product_identifier, TransactionState::Restored)
    }

    pub fn failed(product_identifier: ProductIdentifier, error: TransactionError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(product_identifier, TransactionState::Failed)
        }
    }
}

/// Returned by observer handles whose manager no longer exists.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum HandleError {
    #[error("manager is no longer available")]
    Unavailable,
}

/// Callbacks the storefront invokes on the manager.
///
/// The storefront keeps whatever it is given here; implementations hand out
/// a non-owning handle so the storefront never keeps the manager alive.
pub trait TransactionObserver: Send + Sync {
    /// A batch of transaction updates. Every `Purchased`, `Restored` and
    /// `Failed` event in it gets finished exactly once.
    fn transactions_updated(&self, batch: Vec<TransactionEvent>) -> Result<(), HandleError>;

    fn restore_finished(&self) -> Result<(), HandleError>;

    fn restore_failed(&self, error: StorefrontError) -> Result<(), HandleError>;

    /// A purchase started outside the app (e.g. a promoted storefront
    /// listing). Returning `false` defers it.
    fn should_add_store_payment(&self, product: &ProductIdentifier) -> bool;
}

/// The storefront / payment backend.
#[async_trait]
pub trait Storefront: Send + Sync {
    /// Look up live metadata. Identifiers the storefront does not know are
    /// simply absent from the response.
    async fn fetch_catalog(
        &self,
        identifiers: HashSet<ProductIdentifier>,
    ) -> Result<CatalogResponse, StorefrontError>;

    /// Queue a payment. The outcome arrives later as a transaction batch.
    fn submit_payment(&self, product: &ProductIdentifier);

    /// Ask the storefront to replay completed transactions as `Restored`.
    fn restore_completed_transactions(&self);

    /// Acknowledge a transaction so it is not redelivered. Idempotent.
    fn finish_transaction(&self, event: &TransactionEvent);

    fn attach_observer(&self, observer: Arc<dyn TransactionObserver>);
}
