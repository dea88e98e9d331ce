//! Receipt boundary: the locally cached signed receipt and its refresh.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use iapkit_catalog::Receipt;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReceiptError {
    #[error("no receipt on this device")]
    NotFound,
    #[error("receipt failed validation: {0}")]
    Invalid(String),
    #[error("receipt refresh failed: {0}")]
    Refresh(String),
    #[error("receipt refresh did not finish within {0:?}")]
    Timeout(Duration),
}

/// Supplies verified receipts.
#[async_trait]
pub trait ReceiptSource: Send + Sync {
    /// Parse and verify the receipt already on disk.
    fn local_receipt(&self) -> Result<Receipt, ReceiptError>;

    /// Fetch a fresh receipt from the network. On success the next
    /// [`local_receipt`](Self::local_receipt) call sees it.
    async fn refresh(&self) -> Result<(), ReceiptError>;
}
