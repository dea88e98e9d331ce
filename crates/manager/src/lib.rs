//! `iapkit-manager`: in-app purchase entitlement management.
//!
//! The [`Manager`] facade coordinates four moving parts:
//! - [`CatalogRequestCoordinator`]: one catalog fetch at a time, queued price lookups replayed on arrival
//! - [`EntitlementReconciler`]: receipt-driven updates of auto-renewable flags
//! - [`TransactionRouter`]: storefront transaction batches into flag writes and notifications
//! - [`PendingQueue`]: FIFO holding requests until their data shows up
//!
//! Storefront, receipts, persistence and reachability are ports; in-memory
//! implementations live in [`in_memory`] and [`reachability`].

pub mod config;
pub mod coordinator;
pub mod error;
pub mod in_memory;
pub mod manager;
pub mod queue;
pub mod reachability;
pub mod receipt_source;
pub mod reconciler;
pub mod router;
pub mod storefront;

pub use config::{ManagerConfig, ManagerHooks, RECEIPT_MISSING_EXIT_CODE};
pub use coordinator::{CatalogRequestCoordinator, PriceKind};
pub use error::ManagerError;
pub use in_memory::{CatalogBehaviour, InMemoryReceiptSource, InMemoryStorefront, RefreshBehaviour};
pub use manager::{Collaborators, Manager, ManagerHandle};
pub use queue::{Gate, PendingQueue};
pub use reachability::{Reachability, StaticReachability};
pub use receipt_source::{ReceiptError, ReceiptSource};
pub use reconciler::{EntitlementReconciler, IntroStatus, ReconcileOutcome};
pub use router::{RouteSummary, TransactionRouter};
pub use storefront::{
    CatalogResponse, HandleError, Storefront, StorefrontError, TransactionError,
    TransactionErrorKind, TransactionEvent, TransactionObserver, TransactionState,
};
