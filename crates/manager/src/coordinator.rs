//! Catalog request coordination.
//!
//! At most one catalog fetch is in flight at a time. Callers that arrive
//! while one is running do not start another; they either queue a price
//! lookup (replayed when the fetch lands) or register the one-shot
//! completion hook.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use iapkit_catalog::{Price, PriceFormatter, Product, ProductCatalog};
use iapkit_events::{DeliveryContext, StoreNotification};

use crate::queue::{Gate, PendingQueue};
use crate::storefront::{CatalogResponse, Storefront, StorefrontError};

pub type PriceCompletion = Box<dyn FnOnce(Price) + Send + 'static>;
pub type CompletionHook = Box<dyn FnOnce() + Send + 'static>;

/// Which price of a product is being asked for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PriceKind {
    Regular,
    Introductory,
}

/// A price lookup waiting for the first successful catalog fetch.
pub struct PriceRequest {
    pub product: Arc<Product>,
    pub multiplier: f64,
    pub completion: PriceCompletion,
}

pub struct CatalogRequestCoordinator {
    storefront: Arc<dyn Storefront>,
    catalog: Arc<ProductCatalog>,
    delivery: DeliveryContext,
    formatter: Arc<dyn PriceFormatter>,
    runtime: Handle,
    retry_interval: Duration,
    in_flight: Gate,
    loaded: AtomicBool,
    on_complete: Mutex<Option<CompletionHook>>,
    prices: PendingQueue<PriceRequest>,
    intro_prices: PendingQueue<PriceRequest>,
}

impl core::fmt::Debug for CatalogRequestCoordinator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CatalogRequestCoordinator")
            .field("in_flight", &self.in_flight.is_closed())
            .field("loaded", &self.has_loaded())
            .field("prices", &self.prices)
            .field("intro_prices", &self.intro_prices)
            .finish()
    }
}

impl CatalogRequestCoordinator {
    pub fn new(
        storefront: Arc<dyn Storefront>,
        catalog: Arc<ProductCatalog>,
        delivery: DeliveryContext,
        formatter: Arc<dyn PriceFormatter>,
        runtime: Handle,
        retry_interval: Duration,
        pending_ttl: Option<Duration>,
    ) -> Self {
        Self {
            storefront,
            catalog,
            delivery,
            formatter,
            runtime,
            retry_interval,
            in_flight: Gate::new(),
            loaded: AtomicBool::new(false),
            on_complete: Mutex::new(None),
            prices: PendingQueue::new("prices", pending_ttl),
            intro_prices: PendingQueue::new("intro_prices", pending_ttl),
        }
    }

    /// At least one fetch has succeeded during this manager's lifetime.
    pub fn has_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_closed()
    }

    pub fn pending_prices(&self) -> usize {
        self.prices.len() + self.intro_prices.len()
    }

    /// Install the one-shot hook run after the next fetch finishes, whether
    /// it succeeds or fails. Replaces any hook already installed.
    pub fn set_completion_hook(&self, hook: CompletionHook) {
        if let Ok(mut slot) = self.on_complete.lock() {
            *slot = Some(hook);
        }
    }

    pub fn clear_completion_hook(&self) {
        if let Ok(mut slot) = self.on_complete.lock() {
            slot.take();
        }
    }

    /// Start a catalog fetch unless one is already running.
    ///
    /// Only a failed `is_first_attempt` request is retried, once, after the
    /// configured interval.
    pub fn request_catalog(self: &Arc<Self>, is_first_attempt: bool) {
        if !self.in_flight.try_close() {
            debug!("catalog request already in flight");
            return;
        }

        info!(first = is_first_attempt, "requesting catalog");
        let this = Arc::clone(self);
        self.runtime.spawn(async move {
            let identifiers = this.catalog.identifiers();
            match this.storefront.fetch_catalog(identifiers).await {
                Ok(response) => this.complete_success(response),
                Err(error) => this.complete_failure(error, is_first_attempt),
            }
        });
    }

    fn complete_success(&self, response: CatalogResponse) {
        let matched = self.catalog.apply_metadata(&response);
        let mut received: Vec<_> = response.keys().map(|id| id.as_str()).collect();
        received.sort_unstable();
        info!(matched, identifiers = ?received, "catalog received");

        self.loaded.store(true, Ordering::Release);
        self.in_flight.open();
        self.delivery.notify(StoreNotification::CatalogReceived);

        self.drain_prices();
        self.run_completion_hook();
    }

    fn complete_failure(self: &Arc<Self>, error: StorefrontError, is_first_attempt: bool) {
        warn!(error = %error, first = is_first_attempt, "catalog request failed");
        self.in_flight.open();
        self.run_completion_hook();

        if is_first_attempt {
            let weak: Weak<Self> = Arc::downgrade(self);
            let delay = self.retry_interval;
            self.runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                match weak.upgrade() {
                    Some(this) => this.request_catalog(false),
                    None => debug!("manager dropped before catalog retry"),
                }
            });
        }
    }

    fn run_completion_hook(&self) {
        let hook = self.on_complete.lock().ok().and_then(|mut slot| slot.take());
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Resolve a price now if the catalog has loaded, else queue it and
    /// trigger a fetch.
    pub fn request_price(
        self: &Arc<Self>,
        kind: PriceKind,
        product: Arc<Product>,
        multiplier: f64,
        completion: PriceCompletion,
    ) {
        let request = PriceRequest {
            product,
            multiplier,
            completion,
        };

        if !self.has_loaded() {
            self.queue(kind).push(request);
            self.request_catalog(false);
            return;
        }

        self.deliver_price(kind, request);
    }

    fn queue(&self, kind: PriceKind) -> &PendingQueue<PriceRequest> {
        match kind {
            PriceKind::Regular => &self.prices,
            PriceKind::Introductory => &self.intro_prices,
        }
    }

    fn drain_prices(&self) {
        for kind in [PriceKind::Regular, PriceKind::Introductory] {
            let delivered = self.queue(kind).drain(|request| self.deliver_price(kind, request));
            if delivered > 0 {
                debug!(?kind, delivered, "replayed queued price requests");
            }
        }
    }

    /// Hand the price to the delivery context. Unavailable prices are
    /// dropped silently.
    fn deliver_price(&self, kind: PriceKind, request: PriceRequest) {
        let formatter = self.formatter.as_ref();
        let price = match kind {
            PriceKind::Regular => request.product.price(request.multiplier, formatter),
            PriceKind::Introductory => request.product.introductory_price(request.multiplier, formatter),
        };

        match price {
            Some(price) => {
                let completion = request.completion;
                self.delivery.deliver(move || completion(price));
            }
            None => debug!(product = %request.product.identifier(), ?kind, "no price available; request dropped"),
        }
    }
}
