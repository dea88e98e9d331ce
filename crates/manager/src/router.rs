//! Routing of storefront transaction batches into entitlement changes.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use iapkit_catalog::{Product, ProductCatalog};
use iapkit_events::{DeliveryContext, StoreNotification};

use crate::reconciler::EntitlementReconciler;
use crate::storefront::{Storefront, StorefrontError, TransactionEvent, TransactionState};

/// Counts from one routed batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouteSummary {
    pub acknowledged: usize,
    pub purchased: usize,
    pub restored: usize,
    pub failed: usize,
    /// `Purchasing`/`Deferred` events and duplicates, left alone.
    pub ignored: usize,
}

pub struct TransactionRouter {
    catalog: Arc<ProductCatalog>,
    storefront: Arc<dyn Storefront>,
    reconciler: Arc<EntitlementReconciler>,
    delivery: DeliveryContext,
    lone_restore_as_purchase: bool,
    restore_in_progress: AtomicBool,
}

impl core::fmt::Debug for TransactionRouter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransactionRouter")
            .field("lone_restore_as_purchase", &self.lone_restore_as_purchase)
            .field("restore_in_progress", &self.is_restoring())
            .finish()
    }
}

impl TransactionRouter {
    pub fn new(
        catalog: Arc<ProductCatalog>,
        storefront: Arc<dyn Storefront>,
        reconciler: Arc<EntitlementReconciler>,
        delivery: DeliveryContext,
        lone_restore_as_purchase: bool,
    ) -> Self {
        Self {
            catalog,
            storefront,
            reconciler,
            delivery,
            lone_restore_as_purchase,
            restore_in_progress: AtomicBool::new(false),
        }
    }

    pub fn is_restoring(&self) -> bool {
        self.restore_in_progress.load(Ordering::Acquire)
    }

    pub fn begin_restore(&self) {
        self.restore_in_progress.store(true, Ordering::Release);
    }

    pub fn restore_finished(&self) {
        self.restore_in_progress.store(false, Ordering::Release);
        info!("restore finished");
        self.delivery.notify(StoreNotification::RestoreSuccess);
    }

    pub fn restore_failed(&self, error: &StorefrontError) {
        self.restore_in_progress.store(false, Ordering::Release);
        warn!(error = %error, "restore failed");
        self.delivery.notify(StoreNotification::RestoreFailed);
    }

    /// Apply one batch in three passes: purchased, then restored, then
    /// failed.
    ///
    /// Every terminal event is acknowledged exactly once, including events
    /// for products this manager does not know, which are then skipped.
    /// In-flight states are not acknowledged.
    pub fn route(&self, batch: Vec<TransactionEvent>) -> RouteSummary {
        let mut summary = RouteSummary::default();
        let mut seen: HashSet<Uuid> = HashSet::with_capacity(batch.len());

        let restored_count = batch
            .iter()
            .filter(|e| e.state == TransactionState::Restored)
            .count();
        let lone_restore = self.lone_restore_as_purchase && restored_count == 1 && !self.is_restoring();
        if lone_restore {
            debug!("lone restored transaction outside a restore; treating as purchase");
        }

        let mut purchased = Vec::new();
        let mut restored = Vec::new();
        let mut failed = Vec::new();
        for event in &batch {
            match event.state {
                TransactionState::Purchased => purchased.push(event),
                TransactionState::Restored if lone_restore => purchased.push(event),
                TransactionState::Restored => restored.push(event),
                TransactionState::Failed => failed.push(event),
                TransactionState::Purchasing | TransactionState::Deferred => {
                    debug!(product = %event.product_identifier, state = ?event.state, "transaction still pending");
                    summary.ignored += 1;
                }
            }
        }

        for event in purchased {
            if !self.acknowledge(event, &mut seen, &mut summary) {
                continue;
            }
            if let Some(product) = self.lookup(event) {
                self.confirm_purchase(product);
                summary.purchased += 1;
            }
        }

        let any_restored = !restored.is_empty();
        for event in restored {
            if !self.acknowledge(event, &mut seen, &mut summary) {
                continue;
            }
            if let Some(product) = self.lookup(event) {
                product.record_restore();
                summary.restored += 1;
            }
        }
        if any_restored {
            self.reconciler.reconcile_in_background(None, |_| {});
        }

        for event in failed {
            if !self.acknowledge(event, &mut seen, &mut summary) || self.lookup(event).is_none() {
                continue;
            }
            summary.failed += 1;
            match &event.error {
                Some(error) if error.is_cancellation() => {
                    info!(product = %event.product_identifier, "purchase cancelled");
                    self.delivery.notify(StoreNotification::PurchaseCancelled);
                }
                error => {
                    warn!(product = %event.product_identifier, error = ?error, "purchase failed");
                    self.delivery.notify(StoreNotification::PurchaseFailed);
                }
            }
        }

        summary
    }

    /// Finish `event` unless its transaction was already handled in this
    /// batch. Returns `false` for duplicates.
    fn acknowledge(
        &self,
        event: &TransactionEvent,
        seen: &mut HashSet<Uuid>,
        summary: &mut RouteSummary,
    ) -> bool {
        if !seen.insert(event.transaction_id) {
            debug!(transaction = %event.transaction_id, "duplicate transaction in batch");
            summary.ignored += 1;
            return false;
        }
        self.storefront.finish_transaction(event);
        summary.acknowledged += 1;
        true
    }

    fn lookup(&self, event: &TransactionEvent) -> Option<Arc<Product>> {
        let product = self.catalog.get(&event.product_identifier).cloned();
        if product.is_none() {
            warn!(product = %event.product_identifier, "wrong product identifier");
        }
        product
    }

    fn confirm_purchase(&self, product: Arc<Product>) {
        product.record_purchase(Utc::now());
        info!(product = %product.identifier(), "purchase success");

        if product.kind().is_auto_renewable() {
            let delivery = self.delivery.clone();
            self.reconciler
                .reconcile_in_background(Some(vec![product]), move |_| {
                    delivery.notify(StoreNotification::PurchaseSuccess)
                });
        } else {
            self.delivery.notify(StoreNotification::PurchaseSuccess);
        }
    }
}
