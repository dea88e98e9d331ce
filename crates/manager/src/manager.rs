//! The public facade.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use iapkit_catalog::{
    DefaultPriceFormatter, EntitlementStore, Price, PriceFormatter, Product, ProductCatalog,
    ProductDefinition,
};
use iapkit_core::{DomainError, DomainResult, ProductIdentifier};
use iapkit_events::{DeliveryContext, InMemoryEventBus, StoreNotification, Subscription};

use crate::config::{ManagerConfig, ManagerHooks};
use crate::coordinator::{CatalogRequestCoordinator, PriceKind};
use crate::error::ManagerError;
use crate::reachability::Reachability;
use crate::receipt_source::ReceiptSource;
use crate::reconciler::{EntitlementReconciler, IntroStatus};
use crate::router::TransactionRouter;
use crate::storefront::{
    HandleError, Storefront, StorefrontError, TransactionEvent, TransactionObserver,
};

/// External services a manager talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub storefront: Arc<dyn Storefront>,
    pub receipts: Arc<dyn ReceiptSource>,
    pub store: Arc<dyn EntitlementStore>,
    pub reachability: Arc<dyn Reachability>,
    pub formatter: Arc<dyn PriceFormatter>,
}

impl Collaborators {
    pub fn new(
        storefront: Arc<dyn Storefront>,
        receipts: Arc<dyn ReceiptSource>,
        store: Arc<dyn EntitlementStore>,
        reachability: Arc<dyn Reachability>,
    ) -> Self {
        Self {
            storefront,
            receipts,
            store,
            reachability,
            formatter: Arc::new(DefaultPriceFormatter),
        }
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn PriceFormatter>) -> Self {
        self.formatter = formatter;
        self
    }
}

struct ManagerInner {
    catalog: Arc<ProductCatalog>,
    storefront: Arc<dyn Storefront>,
    reachability: Arc<dyn Reachability>,
    delivery: DeliveryContext,
    coordinator: Arc<CatalogRequestCoordinator>,
    reconciler: Arc<EntitlementReconciler>,
    router: TransactionRouter,
    hooks: ManagerHooks,
    config: ManagerConfig,
}

/// In-app purchase manager.
///
/// Construction starts the first catalog fetch and a full reconciliation in
/// the background. Results reach callers through continuations and
/// [`StoreNotification`]s, all delivered in one ordered stream; no method
/// blocks or returns an error once the manager exists.
pub struct Manager {
    inner: Arc<ManagerInner>,
}

impl core::fmt::Debug for Manager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Manager")
            .field("products", &self.inner.catalog.len())
            .field("config", &self.inner.config)
            .field("coordinator", &self.inner.coordinator)
            .field("reconciler", &self.inner.reconciler)
            .field("router", &self.inner.router)
            .finish()
    }
}

impl Manager {
    /// Build a manager with the default hooks. Must run inside a tokio
    /// runtime.
    pub fn new(
        products: Vec<ProductDefinition>,
        collaborators: Collaborators,
        config: ManagerConfig,
    ) -> Result<Self, ManagerError> {
        Self::with_hooks(products, collaborators, config, ManagerHooks::default())
    }

    pub fn with_hooks(
        products: Vec<ProductDefinition>,
        collaborators: Collaborators,
        config: ManagerConfig,
        hooks: ManagerHooks,
    ) -> Result<Self, ManagerError> {
        let runtime = Handle::try_current().map_err(|_| ManagerError::NoRuntime)?;
        let catalog = Arc::new(ProductCatalog::new(products, Arc::clone(&collaborators.store))?);
        let delivery = DeliveryContext::spawn(Arc::new(InMemoryEventBus::new()));

        let coordinator = Arc::new(CatalogRequestCoordinator::new(
            Arc::clone(&collaborators.storefront),
            Arc::clone(&catalog),
            delivery.clone(),
            collaborators.formatter,
            runtime.clone(),
            config.catalog_retry_interval,
            config.pending_request_ttl,
        ));
        let reconciler = Arc::new(EntitlementReconciler::new(
            Arc::clone(&catalog),
            collaborators.receipts,
            delivery.clone(),
            runtime,
            config.receipt_refresh_timeout,
            config.receipt_required,
            Arc::clone(&hooks.exit),
            config.pending_request_ttl,
        ));
        let router = TransactionRouter::new(
            Arc::clone(&catalog),
            Arc::clone(&collaborators.storefront),
            Arc::clone(&reconciler),
            delivery.clone(),
            config.lone_restore_as_purchase,
        );

        let inner = Arc::new(ManagerInner {
            catalog,
            storefront: collaborators.storefront,
            reachability: collaborators.reachability,
            delivery,
            coordinator,
            reconciler,
            router,
            hooks,
            config,
        });

        inner
            .storefront
            .attach_observer(Arc::new(ManagerHandle::new(&inner)));
        inner.coordinator.request_catalog(true);
        inner.reconciler.reconcile_in_background(None, |_| {});
        info!(products = inner.catalog.len(), "manager started");

        Ok(Self { inner })
    }

    /// Start a purchase. Unknown products are logged and ignored.
    ///
    /// Without metadata the catalog is fetched first and the purchase retried
    /// once; if metadata is still missing, `PurchaseFailed` is notified.
    pub fn purchase(&self, id: &ProductIdentifier) {
        self.inner.purchase(id, true);
    }

    pub fn restore_purchases(&self) {
        if !self.inner.is_online() {
            return;
        }
        info!("restoring purchases");
        self.inner.router.begin_restore();
        self.inner.storefront.restore_completed_transactions();
    }

    /// Current entitlement. No I/O; unknown products are never purchased.
    pub fn is_purchased(&self, id: &ProductIdentifier) -> bool {
        self.inner
            .product(id)
            .map(|p| p.is_purchased())
            .unwrap_or(false)
    }

    pub fn purchase_date(&self, id: &ProductIdentifier) -> Option<DateTime<Utc>> {
        self.inner.product(id)?.purchase_date()
    }

    /// Deliver `multiplier` times the product's price. Waits for the first
    /// successful catalog fetch; dropped if the product has no price then.
    pub fn get_price<F>(&self, id: &ProductIdentifier, multiplier: f64, completion: F)
    where
        F: FnOnce(Price) + Send + 'static,
    {
        self.inner
            .request_price(PriceKind::Regular, id, multiplier, Box::new(completion));
    }

    pub fn get_introductory_price<F>(&self, id: &ProductIdentifier, multiplier: f64, completion: F)
    where
        F: FnOnce(Price) + Send + 'static,
    {
        self.inner
            .request_price(PriceKind::Introductory, id, multiplier, Box::new(completion));
    }

    /// Whether an introductory offer was already used on any of `ids`.
    ///
    /// Every product must be an auto-renewable subscription; otherwise the
    /// call is logged and dropped.
    pub fn get_intro_period_status<F>(&self, ids: &[ProductIdentifier], completion: F)
    where
        F: FnOnce(IntroStatus) + Send + 'static,
    {
        match self.inner.intro_products(ids) {
            Ok(products) => self
                .inner
                .reconciler
                .request_intro_status(products, Box::new(completion)),
            Err(e) => warn!(error = %e, "intro status misuse"),
        }
    }

    pub fn subscribe(&self) -> Subscription<StoreNotification> {
        self.inner.delivery.subscribe()
    }

    pub fn catalog(&self) -> &ProductCatalog {
        &self.inner.catalog
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn has_loaded_catalog(&self) -> bool {
        self.inner.coordinator.has_loaded()
    }

    /// A non-owning observer handle, the same kind the storefront receives.
    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle::new(&self.inner)
    }
}

impl ManagerInner {
    fn product(&self, id: &ProductIdentifier) -> Option<&Arc<Product>> {
        let product = self.catalog.get(id);
        if product.is_none() {
            warn!(product = %id, "wrong product identifier");
        }
        product
    }

    fn is_online(&self) -> bool {
        let online = self.reachability.is_connected();
        if !online {
            warn!("no internet connection");
            self.delivery.notify(StoreNotification::InternetFailure);
        }
        online
    }

    fn purchase(self: &Arc<Self>, id: &ProductIdentifier, retry_after_fetch: bool) {
        let Some(product) = self.product(id) else {
            return;
        };
        if !self.is_online() {
            self.coordinator.clear_completion_hook();
            return;
        }

        if product.has_metadata() {
            info!(product = %id, "submitting payment");
            self.storefront.submit_payment(id);
            return;
        }

        if retry_after_fetch {
            debug!(product = %id, "no metadata yet; fetching catalog before purchase");
            let weak = Arc::downgrade(self);
            let id = id.clone();
            self.coordinator.set_completion_hook(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.purchase(&id, false);
                }
            }));
            self.coordinator.request_catalog(false);
        } else {
            warn!(product = %id, "purchase failed; product unavailable in storefront");
            self.delivery.notify(StoreNotification::PurchaseFailed);
        }
    }

    fn request_price(
        self: &Arc<Self>,
        kind: PriceKind,
        id: &ProductIdentifier,
        multiplier: f64,
        completion: Box<dyn FnOnce(Price) + Send + 'static>,
    ) {
        if let Some(product) = self.product(id) {
            self.coordinator
                .request_price(kind, Arc::clone(product), multiplier, completion);
        }
    }

    fn intro_products(&self, ids: &[ProductIdentifier]) -> DomainResult<Vec<Arc<Product>>> {
        if ids.is_empty() {
            return Err(DomainError::validation("no products given"));
        }
        ids.iter()
            .map(|id| {
                let product = self.catalog.require(id)?;
                if !product.kind().is_auto_renewable() {
                    return Err(DomainError::not_auto_renewable(id));
                }
                Ok(Arc::clone(product))
            })
            .collect()
    }
}

/// Observer handle given to the storefront.
///
/// Holds the manager weakly: once the manager is dropped every callback
/// returns [`HandleError::Unavailable`] and store payments are declined.
#[derive(Clone)]
pub struct ManagerHandle {
    inner: Weak<ManagerInner>,
}

impl core::fmt::Debug for ManagerHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ManagerHandle")
            .field("available", &self.is_available())
            .finish()
    }
}

impl ManagerHandle {
    fn new(inner: &Arc<ManagerInner>) -> Self {
        Self {
            inner: Arc::downgrade(inner),
        }
    }

    pub fn is_available(&self) -> bool {
        self.inner.strong_count() > 0
    }

    fn upgrade(&self) -> Result<Arc<ManagerInner>, HandleError> {
        self.inner.upgrade().ok_or(HandleError::Unavailable)
    }
}

impl TransactionObserver for ManagerHandle {
    fn transactions_updated(&self, batch: Vec<TransactionEvent>) -> Result<(), HandleError> {
        let inner = self.upgrade()?;
        let summary = inner.router.route(batch);
        debug!(?summary, "transaction batch routed");
        Ok(())
    }

    fn restore_finished(&self) -> Result<(), HandleError> {
        self.upgrade()?.router.restore_finished();
        Ok(())
    }

    fn restore_failed(&self, error: StorefrontError) -> Result<(), HandleError> {
        self.upgrade()?.router.restore_failed(&error);
        Ok(())
    }

    fn should_add_store_payment(&self, product: &ProductIdentifier) -> bool {
        match self.upgrade() {
            Ok(inner) => (inner.hooks.store_payment)(product),
            Err(_) => false,
        }
    }
}
