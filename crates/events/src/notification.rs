use serde::{Deserialize, Serialize};

/// Payload-free notifications fired towards observers.
///
/// Observers re-query state through the manager after receiving one; the
/// notification only says *what* happened.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreNotification {
    /// An operation needing the network was attempted while offline.
    InternetFailure,
    PurchaseSuccess,
    PurchaseFailed,
    PurchaseCancelled,
    RestoreSuccess,
    RestoreFailed,
    /// Auto-renewable subscriptions were reconciled against the receipt.
    RenewablesVerified,
    /// Storefront catalog metadata arrived.
    CatalogReceived,
}

impl StoreNotification {
    pub const ALL: [StoreNotification; 8] = [
        StoreNotification::InternetFailure,
        StoreNotification::PurchaseSuccess,
        StoreNotification::PurchaseFailed,
        StoreNotification::PurchaseCancelled,
        StoreNotification::RestoreSuccess,
        StoreNotification::RestoreFailed,
        StoreNotification::RenewablesVerified,
        StoreNotification::CatalogReceived,
    ];

    /// Stable notification name (e.g. `"purchase-success"`).
    pub fn name(&self) -> &'static str {
        match self {
            StoreNotification::InternetFailure => "internet-failure",
            StoreNotification::PurchaseSuccess => "purchase-success",
            StoreNotification::PurchaseFailed => "purchase-failed",
            StoreNotification::PurchaseCancelled => "purchase-cancelled",
            StoreNotification::RestoreSuccess => "restore-success",
            StoreNotification::RestoreFailed => "restore-failed",
            StoreNotification::RenewablesVerified => "renewables-verified",
            StoreNotification::CatalogReceived => "catalog-received",
        }
    }
}

impl core::fmt::Display for StoreNotification {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
