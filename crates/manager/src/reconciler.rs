//! Receipt-driven reconciliation of auto-renewable entitlements.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use iapkit_catalog::{Product, ProductCatalog, Receipt};
use iapkit_events::{DeliveryContext, StoreNotification};

use crate::config::{ExitHook, RECEIPT_MISSING_EXIT_CODE};
use crate::queue::{Gate, PendingQueue};
use crate::receipt_source::{ReceiptError, ReceiptSource};

/// Answer to an intro-period status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntroStatus {
    pub is_intro_period_used: bool,
}

pub type StatusCompletion = Box<dyn FnOnce(IntroStatus) + Send + 'static>;

struct IntroStatusRequest {
    products: Vec<Arc<Product>>,
    completion: StatusCompletion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Receipt read and `verified` auto-renewables updated.
    Reconciled { verified: usize },
    /// Receipt read, but the scope held no auto-renewable product.
    NothingToVerify,
    /// Another reconciliation was already running; nothing was done.
    Coalesced,
    /// No receipt could be obtained. Stored flags are untouched.
    ReceiptUnavailable,
}

pub struct EntitlementReconciler {
    catalog: Arc<ProductCatalog>,
    receipts: Arc<dyn ReceiptSource>,
    delivery: DeliveryContext,
    runtime: Handle,
    refresh_timeout: Duration,
    receipt_required: bool,
    exit: ExitHook,
    in_progress: Gate,
    statuses: PendingQueue<IntroStatusRequest>,
}

impl core::fmt::Debug for EntitlementReconciler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EntitlementReconciler")
            .field("refresh_timeout", &self.refresh_timeout)
            .field("receipt_required", &self.receipt_required)
            .field("in_progress", &self.in_progress.is_closed())
            .field("statuses", &self.statuses)
            .finish()
    }
}

impl EntitlementReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<ProductCatalog>,
        receipts: Arc<dyn ReceiptSource>,
        delivery: DeliveryContext,
        runtime: Handle,
        refresh_timeout: Duration,
        receipt_required: bool,
        exit: ExitHook,
        pending_ttl: Option<Duration>,
    ) -> Self {
        Self {
            catalog,
            receipts,
            delivery,
            runtime,
            refresh_timeout,
            receipt_required,
            exit,
            in_progress: Gate::new(),
            statuses: PendingQueue::new("intro_status", pending_ttl),
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.is_closed()
    }

    pub fn pending_statuses(&self) -> usize {
        self.statuses.len()
    }

    /// Reconcile `scope` (every product when `None`) against the receipt.
    ///
    /// Only auto-renewables are touched. A call made while another is running
    /// returns [`ReconcileOutcome::Coalesced`] at once without waiting.
    pub async fn reconcile(&self, scope: Option<Vec<Arc<Product>>>) -> ReconcileOutcome {
        let Some(guard) = self.in_progress.enter() else {
            debug!("reconciliation already in progress");
            return ReconcileOutcome::Coalesced;
        };

        let receipt = match self.acquire_receipt().await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(error = %e, "no receipt available; entitlements left unchanged");
                drop(guard);
                if self.receipt_required {
                    error!(code = RECEIPT_MISSING_EXIT_CODE, "receipt required but unavailable; exiting");
                    (self.exit)(RECEIPT_MISSING_EXIT_CODE);
                }
                return ReconcileOutcome::ReceiptUnavailable;
            }
        };

        let products = scope.unwrap_or_else(|| self.catalog.products().to_vec());
        let now = Utc::now();
        let mut verified = 0;
        for product in products.iter().filter(|p| p.kind().is_auto_renewable()) {
            let status = receipt.renewable_status(product.identifier(), now);
            product.apply_renewable_status(&status);
            debug!(
                product = %product.identifier(),
                active = status.is_active(),
                intro_used = ?status.intro_period_used,
                "renewable verified"
            );
            verified += 1;
        }
        drop(guard);

        if verified == 0 {
            return ReconcileOutcome::NothingToVerify;
        }

        info!(verified, "verified renewables");
        self.drain_statuses();
        self.delivery.notify(StoreNotification::RenewablesVerified);
        ReconcileOutcome::Reconciled { verified }
    }

    /// Run [`reconcile`](Self::reconcile) on the background runtime and hand
    /// the outcome to `on_done`, which is called in every case.
    pub fn reconcile_in_background<F>(self: &Arc<Self>, scope: Option<Vec<Arc<Product>>>, on_done: F)
    where
        F: FnOnce(ReconcileOutcome) + Send + 'static,
    {
        let this = Arc::clone(self);
        self.runtime.spawn(async move {
            let outcome = this.reconcile(scope).await;
            on_done(outcome);
        });
    }

    /// Local receipt first, then one bounded refresh.
    ///
    /// The refresh runs as its own task; hitting the timeout abandons the
    /// wait but leaves the refresh running.
    async fn acquire_receipt(&self) -> Result<Receipt, ReceiptError> {
        match self.receipts.local_receipt() {
            Ok(receipt) => {
                info!(records = receipt.purchases().len(), "receipt loaded");
                return Ok(receipt);
            }
            Err(e) => debug!(error = %e, "no local receipt; refreshing"),
        }

        let receipts = Arc::clone(&self.receipts);
        let refresh = self.runtime.spawn(async move { receipts.refresh().await });

        match tokio::time::timeout(self.refresh_timeout, refresh).await {
            Err(_) => {
                warn!(timeout = ?self.refresh_timeout, "receipt refresh timed out");
                Err(ReceiptError::Timeout(self.refresh_timeout))
            }
            Ok(Err(join)) => Err(ReceiptError::Refresh(join.to_string())),
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "receipt refresh error");
                Err(e)
            }
            Ok(Ok(Ok(()))) => {
                let receipt = self.receipts.local_receipt()?;
                info!(records = receipt.purchases().len(), "receipt loaded after refresh");
                Ok(receipt)
            }
        }
    }

    /// Answer now when any product's flag is known, else queue the request
    /// and kick off a full reconciliation.
    pub fn request_intro_status(self: &Arc<Self>, products: Vec<Arc<Product>>, completion: StatusCompletion) {
        if let Some(used) = resolve_intro_status(&products) {
            self.deliver_status(used, completion);
            return;
        }

        self.statuses.push(IntroStatusRequest { products, completion });
        self.reconcile_in_background(None, |_| {});
    }

    fn drain_statuses(&self) {
        self.statuses.drain(|request| match resolve_intro_status(&request.products) {
            Some(used) => self.deliver_status(used, request.completion),
            None => debug!("intro status still unknown; request dropped"),
        });
    }

    fn deliver_status(&self, used: bool, completion: StatusCompletion) {
        let status = IntroStatus {
            is_intro_period_used: used,
        };
        self.delivery.deliver(move || completion(status));
    }
}

/// Combine the known intro flags of `products`. Any `true` wins; `None`
/// when no product's flag is known.
pub fn resolve_intro_status(products: &[Arc<Product>]) -> Option<bool> {
    let mut known = products.iter().filter_map(|p| p.intro_period_used()).peekable();
    known.peek()?;
    Some(known.any(|used| used))
}
