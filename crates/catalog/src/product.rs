use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use iapkit_core::{Entity, ProductIdentifier, ProductKind};

use crate::metadata::{CatalogMetadata, Price, PriceFormatter};
use crate::receipt::RenewableStatus;
use crate::store::{EntitlementStore, EntitlementValue, keys};

/// A configured product.
///
/// Identity is the identifier. Storefront metadata lives in memory and is
/// replaced on every successful catalog fetch; entitlement flags live in the
/// [`EntitlementStore`] and survive restarts.
///
/// Flag writes that touch more than one key go through an internal per-product
/// lock, so a reconciliation and a purchase confirmation for the same product
/// never interleave their writes. Different products never contend.
pub struct Product {
    identifier: ProductIdentifier,
    kind: ProductKind,
    store: Arc<dyn EntitlementStore>,
    metadata: RwLock<Option<CatalogMetadata>>,
    writes: Mutex<()>,
}

impl core::fmt::Debug for Product {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Product")
            .field("identifier", &self.identifier)
            .field("kind", &self.kind)
            .field("has_metadata", &self.has_metadata())
            .finish()
    }
}

impl PartialEq for Product {
    fn eq(&self, other: &Self) -> bool {
        self.same_entity(other)
    }
}

impl Eq for Product {}

impl core::hash::Hash for Product {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
    }
}

impl Entity for Product {
    type Id = ProductIdentifier;

    fn id(&self) -> &Self::Id {
        &self.identifier
    }
}

impl Product {
    pub fn new(
        identifier: ProductIdentifier,
        kind: ProductKind,
        store: Arc<dyn EntitlementStore>,
    ) -> Self {
        Self {
            identifier,
            kind,
            store,
            metadata: RwLock::new(None),
            writes: Mutex::new(()),
        }
    }

    pub fn identifier(&self) -> &ProductIdentifier {
        &self.identifier
    }

    pub fn kind(&self) -> ProductKind {
        self.kind
    }

    // ==================== Storefront metadata ====================

    pub fn metadata(&self) -> Option<CatalogMetadata> {
        self.metadata.read().ok()?.clone()
    }

    pub fn has_metadata(&self) -> bool {
        self.metadata.read().map(|m| m.is_some()).unwrap_or(false)
    }

    pub fn set_metadata(&self, metadata: Option<CatalogMetadata>) {
        if let Ok(mut slot) = self.metadata.write() {
            *slot = metadata;
        }
    }

    pub fn price(&self, multiplier: f64, formatter: &dyn PriceFormatter) -> Option<Price> {
        self.metadata()?.price(multiplier, formatter)
    }

    pub fn introductory_price(
        &self,
        multiplier: f64,
        formatter: &dyn PriceFormatter,
    ) -> Option<Price> {
        self.metadata()?.introductory_price(multiplier, formatter)
    }

    // ==================== Entitlement flags ====================

    /// Whether the product currently grants access.
    pub fn is_purchased(&self) -> bool {
        self.is_purchased_at(Utc::now())
    }

    /// Entitlement as of `now`:
    /// - consumables are never purchased
    /// - non-consumables and auto-renewables read the stored flag
    /// - non-renewing subscriptions are purchased while `now < purchase date + duration`
    pub fn is_purchased_at(&self, now: DateTime<Utc>) -> bool {
        match self.kind {
            ProductKind::Consumable => false,
            ProductKind::NonConsumable | ProductKind::AutoRenewable => self
                .store
                .get(&self.identifier.key(keys::PURCHASED))
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            ProductKind::NonRenewing { .. } => self
                .purchase_date()
                .and_then(|date| self.kind.expiration(date))
                .is_some_and(|expires| now < expires),
        }
    }

    /// Persist the purchased flag. Ignored for kinds whose flag is not stored.
    pub fn set_purchased(&self, purchased: bool) {
        if self.kind.stores_purchased_flag() {
            self.store.set(
                &self.identifier.key(keys::PURCHASED),
                EntitlementValue::Bool(purchased),
            );
        }
    }

    pub fn purchase_date(&self) -> Option<DateTime<Utc>> {
        self.store
            .get(&self.identifier.key(keys::PURCHASE_DATE))
            .and_then(|v| v.as_date())
    }

    pub fn set_purchase_date(&self, date: Option<DateTime<Utc>>) {
        let key = self.identifier.key(keys::PURCHASE_DATE);
        match date {
            Some(date) => self.store.set(&key, EntitlementValue::Date(date)),
            None => self.store.remove(&key),
        }
    }

    /// `None` while unknown (no reconciliation has seen this product yet).
    pub fn intro_period_used(&self) -> Option<bool> {
        self.store
            .get(&self.identifier.key(keys::INTRO_PERIOD_USED))
            .or_else(|| self.store.get(&self.identifier.key(keys::TRIAL_USED)))
            .and_then(|v| v.as_bool())
    }

    pub fn set_intro_period_used(&self, used: bool) {
        self.store.set(
            &self.identifier.key(keys::INTRO_PERIOD_USED),
            EntitlementValue::Bool(used),
        );
    }

    /// Confirmed purchase: non-consumables become owned, every kind records
    /// the purchase date.
    pub fn record_purchase(&self, at: DateTime<Utc>) {
        let _guard = self.writes.lock();
        if self.kind == ProductKind::NonConsumable {
            self.set_purchased(true);
        }
        self.set_purchase_date(Some(at));
    }

    /// Restored purchase. Only non-consumables carry ownership across a
    /// restore; subscriptions are settled by reconciliation.
    pub fn record_restore(&self) {
        let _guard = self.writes.lock();
        if self.kind == ProductKind::NonConsumable {
            self.set_purchased(true);
        }
    }

    /// Apply what the receipt says about this auto-renewable subscription.
    ///
    /// The purchase date is only overwritten when an active period exists,
    /// and the trial flag only when the receipt knows the product at all.
    pub fn apply_renewable_status(&self, status: &RenewableStatus) {
        let _guard = self.writes.lock();
        self.set_purchased(status.is_active());
        if let Some(since) = status.active_since {
            self.set_purchase_date(Some(since));
        }
        if let Some(used) = status.intro_period_used {
            self.set_intro_period_used(used);
        }
    }
}
