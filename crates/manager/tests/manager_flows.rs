use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use iapkit_catalog::{
    CatalogMetadata, EntitlementStore, EntitlementValue, InMemoryEntitlementStore,
    ProductDefinition, Receipt, ReceiptPurchaseRecord,
};
use iapkit_core::{ProductIdentifier, ProductKind};
use iapkit_events::{DeliveryContext, InMemoryEventBus, StoreNotification, Subscription};
use iapkit_manager::{
    Collaborators, EntitlementReconciler, HandleError, InMemoryReceiptSource, InMemoryStorefront,
    Manager, ManagerConfig, ManagerHooks, ReconcileOutcome, RefreshBehaviour, StaticReachability,
    StorefrontError, TransactionEvent, TransactionObserver,
};

const ANNUAL: &str = "pro.annual";
const COINS: &str = "coins";
const UNLOCK: &str = "unlock";
const PASS: &str = "pass.week";

fn id(s: &str) -> ProductIdentifier {
    ProductIdentifier::new(s).unwrap()
}

fn products() -> Vec<ProductDefinition> {
    vec![
        ProductDefinition::new(id(ANNUAL), ProductKind::AutoRenewable),
        ProductDefinition::new(id(COINS), ProductKind::Consumable),
        ProductDefinition::new(id(UNLOCK), ProductKind::NonConsumable),
        ProductDefinition::new(
            id(PASS),
            ProductKind::NonRenewing {
                duration: 7,
                unit: iapkit_core::DurationUnit::Days,
            },
        ),
    ]
}

fn full_catalog() -> HashMap<ProductIdentifier, CatalogMetadata> {
    HashMap::from([
        (
            id(ANNUAL),
            CatalogMetadata::new(4999, "USD", "en_US").with_introductory_price(999),
        ),
        (id(COINS), CatalogMetadata::new(99, "USD", "en_US")),
        (id(UNLOCK), CatalogMetadata::new(499, "USD", "en_US")),
        (id(PASS), CatalogMetadata::new(299, "USD", "en_US")),
    ])
}

fn trial_receipt() -> Receipt {
    let now = Utc::now();
    Receipt::new(vec![
        ReceiptPurchaseRecord::new(id(ANNUAL), now - ChronoDuration::days(1))
            .expiring_at(now + ChronoDuration::days(6))
            .trial(),
    ])
}

/// A manager over in-memory collaborators, plus handles on all of them.
struct Harness {
    manager: Manager,
    storefront: Arc<InMemoryStorefront>,
    receipts: Arc<InMemoryReceiptSource>,
    reachability: Arc<StaticReachability>,
    notifications: Subscription<StoreNotification>,
    exit_code: Arc<AtomicI32>,
}

impl Harness {
    fn start(
        storefront: Arc<InMemoryStorefront>,
        receipts: Arc<InMemoryReceiptSource>,
        store: Arc<InMemoryEntitlementStore>,
        config: ManagerConfig,
    ) -> Self {
        Self::start_with_hooks(storefront, receipts, store, config, ManagerHooks::default())
    }

    fn start_with_hooks(
        storefront: Arc<InMemoryStorefront>,
        receipts: Arc<InMemoryReceiptSource>,
        store: Arc<InMemoryEntitlementStore>,
        config: ManagerConfig,
        hooks: ManagerHooks,
    ) -> Self {
        let exit_code = Arc::new(AtomicI32::new(0));
        let recorded = Arc::clone(&exit_code);
        let hooks = hooks.with_exit(move |code| recorded.store(code, Ordering::SeqCst));
        let reachability = Arc::new(StaticReachability::online());

        let manager = Manager::with_hooks(
            products(),
            Collaborators::new(
                storefront.clone(),
                receipts.clone(),
                store,
                reachability.clone(),
            ),
            config,
            hooks,
        )
        .unwrap();
        let notifications = manager.subscribe();

        Self {
            manager,
            storefront,
            receipts,
            reachability,
            notifications,
            exit_code,
        }
    }

    /// Catalog loads instantly; no receipt anywhere.
    fn loaded() -> Self {
        let storefront = Arc::new(InMemoryStorefront::new());
        storefront.respond_with(full_catalog());
        Self::start(
            storefront,
            Arc::new(InMemoryReceiptSource::new()),
            Arc::new(InMemoryEntitlementStore::new()),
            ManagerConfig::default(),
        )
    }

    fn notifications(&self) -> Vec<StoreNotification> {
        self.notifications.drain()
    }
}

/// Let spawned tasks and the delivery context run.
async fn settle() {
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

fn collector<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Send + Clone + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |value| sink.lock().unwrap().push(value))
}

#[tokio::test(start_paused = true)]
async fn first_catalog_failure_is_retried_exactly_once() {
    let storefront = Arc::new(InMemoryStorefront::new());
    storefront.fail_with(StorefrontError::Network("no route to host".into()));
    let h = Harness::start(
        storefront,
        Arc::new(InMemoryReceiptSource::new()),
        Arc::new(InMemoryEntitlementStore::new()),
        ManagerConfig::default(),
    );

    settle().await;
    assert_eq!(h.storefront.fetch_count(), 1);

    tokio::time::sleep(Duration::from_millis(2900)).await;
    assert_eq!(h.storefront.fetch_count(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.storefront.fetch_count(), 2);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.storefront.fetch_count(), 2);
    assert!(!h.manager.has_loaded_catalog());
}

#[tokio::test(start_paused = true)]
async fn lone_restore_outside_restore_counts_as_purchase() {
    let storefront = Arc::new(InMemoryStorefront::new());
    storefront.respond_with(full_catalog());
    let h = Harness::start(
        storefront,
        Arc::new(InMemoryReceiptSource::new()),
        Arc::new(InMemoryEntitlementStore::new()),
        ManagerConfig::default().with_lone_restore_as_purchase(true),
    );
    settle().await;
    h.notifications();

    h.storefront
        .deliver(vec![TransactionEvent::restored(id(UNLOCK))])
        .unwrap();
    settle().await;

    assert!(h.manager.is_purchased(&id(UNLOCK)));
    let seen = h.notifications();
    assert!(seen.contains(&StoreNotification::PurchaseSuccess));
    assert!(!seen.contains(&StoreNotification::RestoreSuccess));
}

#[tokio::test(start_paused = true)]
async fn intro_status_waits_for_reconciliation() {
    let receipts = Arc::new(InMemoryReceiptSource::new());
    receipts.set_latency(Duration::from_millis(100));
    receipts.set_refresh(RefreshBehaviour::Install(trial_receipt()));
    let storefront = Arc::new(InMemoryStorefront::new());
    storefront.respond_with(full_catalog());
    let h = Harness::start(
        storefront,
        receipts,
        Arc::new(InMemoryEntitlementStore::new()),
        ManagerConfig::default(),
    );

    let (seen, sink) = collector();
    h.manager
        .get_intro_period_status(&[id(ANNUAL)], move |status| sink(status.is_intro_period_used));
    settle().await;
    assert!(seen.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(*seen.lock().unwrap(), vec![true]);
    assert_eq!(h.receipts.refresh_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn intro_status_stays_unanswered_without_receipt_history() {
    let receipts = Arc::new(InMemoryReceiptSource::with_receipt(Receipt::new(vec![
        ReceiptPurchaseRecord::new(id(UNLOCK), Utc::now() - ChronoDuration::days(3)),
    ])));
    let storefront = Arc::new(InMemoryStorefront::new());
    storefront.respond_with(full_catalog());
    let h = Harness::start(
        storefront,
        receipts,
        Arc::new(InMemoryEntitlementStore::new()),
        ManagerConfig::default(),
    );
    settle().await;
    assert_eq!(h.receipts.local_reads(), 1);

    let (seen, sink) = collector();
    for expected_reads in [2, 3] {
        let sink = sink.clone();
        h.manager
            .get_intro_period_status(&[id(ANNUAL)], move |status| sink(status.is_intro_period_used));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.receipts.local_reads(), expected_reads);
    }

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(seen.lock().unwrap().is_empty());
    let annual = h.manager.catalog().get(&id(ANNUAL)).unwrap();
    assert_eq!(annual.intro_period_used(), None);
    assert!(!annual.is_purchased());
    assert_eq!(h.receipts.refresh_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn intro_status_rejects_non_renewables() {
    let h = Harness::loaded();
    settle().await;

    let (seen, sink) = collector();
    h.manager
        .get_intro_period_status(&[id(ANNUAL), id(UNLOCK)], move |status| sink(status));
    settle().await;
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn queued_price_for_product_missing_from_response_is_dropped() {
    let storefront = Arc::new(InMemoryStorefront::new());
    storefront.set_latency(Duration::from_millis(100));
    let mut response = full_catalog();
    response.remove(&id(UNLOCK));
    storefront.respond_with(response);
    let h = Harness::start(
        storefront,
        Arc::new(InMemoryReceiptSource::new()),
        Arc::new(InMemoryEntitlementStore::new()),
        ManagerConfig::default(),
    );

    let (seen, sink) = collector();
    let missing = sink.clone();
    h.manager
        .get_price(&id(UNLOCK), 2.0, move |price| missing((UNLOCK, price.amount_minor)));
    h.manager
        .get_price(&id(COINS), 2.0, move |price| sink((COINS, price.amount_minor)));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.storefront.fetch_count(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![(COINS, 198)]);
}

#[tokio::test(start_paused = true)]
async fn queued_prices_are_delivered_in_request_order() {
    let storefront = Arc::new(InMemoryStorefront::new());
    storefront.set_latency(Duration::from_millis(100));
    storefront.respond_with(full_catalog());
    let h = Harness::start(
        storefront,
        Arc::new(InMemoryReceiptSource::new()),
        Arc::new(InMemoryEntitlementStore::new()),
        ManagerConfig::default(),
    );

    let (seen, sink) = collector();
    for multiplier in 1..=5 {
        let sink = sink.clone();
        h.manager
            .get_price(&id(UNLOCK), multiplier as f64, move |price| sink(price.amount_minor));
    }
    let intro = sink.clone();
    h.manager
        .get_introductory_price(&id(ANNUAL), 1.0, move |price| intro(price.amount_minor));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(*seen.lock().unwrap(), vec![499, 998, 1497, 1996, 2495, 999]);

    // Once loaded, prices resolve from cached metadata.
    h.manager
        .get_price(&id(PASS), 1.0, move |price| sink(price.amount_minor));
    settle().await;
    assert_eq!(seen.lock().unwrap().last(), Some(&299));
    assert_eq!(h.storefront.fetch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn expired_price_requests_are_skipped() {
    let storefront = Arc::new(InMemoryStorefront::new());
    storefront.set_latency(Duration::from_secs(10));
    storefront.respond_with(full_catalog());
    let h = Harness::start(
        storefront,
        Arc::new(InMemoryReceiptSource::new()),
        Arc::new(InMemoryEntitlementStore::new()),
        ManagerConfig::default().with_pending_request_ttl(Some(Duration::from_secs(5))),
    );

    let (seen, sink) = collector();
    h.manager
        .get_price(&id(UNLOCK), 1.0, move |price| sink(price.amount_minor));

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(h.manager.has_loaded_catalog());
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_reconciliations_share_one_receipt_fetch() {
    let catalog = Arc::new(
        iapkit_catalog::ProductCatalog::new(products(), Arc::new(InMemoryEntitlementStore::new()))
            .unwrap(),
    );
    let receipts = Arc::new(InMemoryReceiptSource::new());
    receipts.set_latency(Duration::from_millis(500));
    receipts.set_refresh(RefreshBehaviour::Install(trial_receipt()));
    let reconciler = Arc::new(EntitlementReconciler::new(
        catalog,
        receipts.clone(),
        DeliveryContext::spawn(Arc::new(InMemoryEventBus::new())),
        tokio::runtime::Handle::current(),
        Duration::from_secs(8),
        false,
        Arc::new(|_: i32| {}),
        None,
    ));

    let (outcomes, sink) = collector();
    for _ in 0..8 {
        let sink = sink.clone();
        reconciler.reconcile_in_background(None, move |outcome| sink(outcome));
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(receipts.refresh_calls(), 1);
    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 8);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, ReconcileOutcome::Reconciled { .. }))
            .count(),
        1
    );
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == ReconcileOutcome::Coalesced)
            .count(),
        7
    );
}

#[tokio::test(start_paused = true)]
async fn unknown_products_are_acknowledged_exactly_once() {
    let h = Harness::loaded();
    settle().await;
    h.notifications();

    let batch = vec![
        TransactionEvent::purchased(id("ghost")),
        TransactionEvent::restored(id("ghost")),
        TransactionEvent::failed(id("ghost"), iapkit_manager::TransactionError::cancelled()),
    ];
    let mut expected: Vec<_> = batch.iter().map(|e| e.transaction_id).collect();
    h.storefront.deliver(batch).unwrap();
    settle().await;

    let mut finished = h.storefront.finished();
    finished.sort();
    expected.sort();
    assert_eq!(finished, expected);

    let seen = h.notifications();
    assert!(!seen.contains(&StoreNotification::PurchaseSuccess));
    assert!(!seen.contains(&StoreNotification::PurchaseCancelled));
}

#[tokio::test(start_paused = true)]
async fn failed_reconciliation_keeps_stored_flags() {
    let store = Arc::new(InMemoryEntitlementStore::new());
    store.set("pro.annual.purchased", EntitlementValue::Bool(true));
    store.set("pro.annual.introPeriodUsed", EntitlementValue::Bool(true));
    let receipts = Arc::new(InMemoryReceiptSource::new());
    receipts.set_refresh(RefreshBehaviour::Hang);
    let storefront = Arc::new(InMemoryStorefront::new());
    storefront.respond_with(full_catalog());
    let h = Harness::start(storefront, receipts, store.clone(), ManagerConfig::default());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(h.manager.is_purchased(&id(ANNUAL)));
    assert_eq!(
        store.get("pro.annual.introPeriodUsed"),
        Some(EntitlementValue::Bool(true))
    );
    assert!(!h.notifications().contains(&StoreNotification::RenewablesVerified));
    assert_eq!(h.exit_code.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn required_receipt_missing_exits_with_173() {
    let receipts = Arc::new(InMemoryReceiptSource::new());
    receipts.set_refresh(RefreshBehaviour::Fail("not signed in".into()));
    let storefront = Arc::new(InMemoryStorefront::new());
    storefront.respond_with(full_catalog());
    let h = Harness::start(
        storefront,
        receipts,
        Arc::new(InMemoryEntitlementStore::new()),
        ManagerConfig::default().with_receipt_required(true),
    );

    settle().await;
    assert_eq!(h.exit_code.load(Ordering::SeqCst), 173);
}

#[tokio::test(start_paused = true)]
async fn offline_purchase_and_restore_notify_internet_failure() {
    let h = Harness::loaded();
    settle().await;
    h.notifications();
    h.reachability.set_connected(false);

    h.manager.purchase(&id(UNLOCK));
    h.manager.restore_purchases();
    settle().await;

    assert!(h.storefront.submitted().is_empty());
    assert_eq!(h.storefront.restore_requests(), 0);
    assert_eq!(
        h.notifications(),
        vec![
            StoreNotification::InternetFailure,
            StoreNotification::InternetFailure
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn purchase_before_catalog_waits_for_fetch() {
    let storefront = Arc::new(InMemoryStorefront::new());
    storefront.set_latency(Duration::from_millis(100));
    storefront.respond_with(full_catalog());
    let h = Harness::start(
        storefront,
        Arc::new(InMemoryReceiptSource::new()),
        Arc::new(InMemoryEntitlementStore::new()),
        ManagerConfig::default(),
    );

    h.manager.purchase(&id(UNLOCK));
    assert!(h.storefront.submitted().is_empty());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.storefront.submitted(), vec![id(UNLOCK)]);

    assert_eq!(h.storefront.approve_payments().unwrap(), 1);
    settle().await;
    assert!(h.manager.is_purchased(&id(UNLOCK)));
    assert!(h.manager.purchase_date(&id(UNLOCK)).is_some());
    assert!(h.notifications().contains(&StoreNotification::PurchaseSuccess));
}

#[tokio::test(start_paused = true)]
async fn purchase_fails_when_catalog_stays_unavailable() {
    let storefront = Arc::new(InMemoryStorefront::new());
    storefront.fail_with(StorefrontError::Unavailable("maintenance".into()));
    let h = Harness::start(
        storefront,
        Arc::new(InMemoryReceiptSource::new()),
        Arc::new(InMemoryEntitlementStore::new()),
        ManagerConfig::default(),
    );

    h.manager.purchase(&id(UNLOCK));
    settle().await;

    assert!(h.storefront.submitted().is_empty());
    assert_eq!(h.notifications(), vec![StoreNotification::PurchaseFailed]);
}

#[tokio::test(start_paused = true)]
async fn auto_renewable_purchase_notifies_after_verification() {
    let receipts = Arc::new(InMemoryReceiptSource::with_receipt(trial_receipt()));
    let storefront = Arc::new(InMemoryStorefront::new());
    storefront.respond_with(full_catalog());
    let h = Harness::start(
        storefront,
        receipts,
        Arc::new(InMemoryEntitlementStore::new()),
        ManagerConfig::default(),
    );
    settle().await;
    h.notifications();

    h.manager.purchase(&id(ANNUAL));
    h.storefront.approve_payments().unwrap();
    settle().await;

    assert!(h.manager.is_purchased(&id(ANNUAL)));
    assert_eq!(
        h.notifications(),
        vec![
            StoreNotification::RenewablesVerified,
            StoreNotification::PurchaseSuccess
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn non_renewing_pass_expires_after_its_duration() {
    let h = Harness::loaded();
    settle().await;

    h.manager.purchase(&id(PASS));
    h.storefront.approve_payments().unwrap();
    settle().await;
    assert!(h.manager.is_purchased(&id(PASS)));

    let product = h.manager.catalog().get(&id(PASS)).unwrap();
    let bought = product.purchase_date().unwrap();
    assert!(!product.is_purchased_at(bought + ChronoDuration::days(7)));
}

#[tokio::test(start_paused = true)]
async fn restore_flow_notifies_and_grants_non_consumables() {
    let h = Harness::loaded();
    settle().await;
    h.notifications();

    h.manager.restore_purchases();
    assert_eq!(h.storefront.restore_requests(), 1);

    h.storefront
        .deliver(vec![
            TransactionEvent::restored(id(UNLOCK)),
            TransactionEvent::restored(id(COINS)),
        ])
        .unwrap();
    h.storefront.finish_restore().unwrap();
    settle().await;

    assert!(h.manager.is_purchased(&id(UNLOCK)));
    assert!(!h.manager.is_purchased(&id(COINS)));
    assert_eq!(h.notifications(), vec![StoreNotification::RestoreSuccess]);

    h.manager.restore_purchases();
    h.storefront
        .fail_restore(StorefrontError::Restore("account mismatch".into()))
        .unwrap();
    settle().await;
    assert_eq!(h.notifications(), vec![StoreNotification::RestoreFailed]);
}

#[tokio::test(start_paused = true)]
async fn store_payments_follow_the_configured_handler() {
    let storefront = Arc::new(InMemoryStorefront::new());
    storefront.respond_with(full_catalog());
    let h = Harness::start_with_hooks(
        storefront,
        Arc::new(InMemoryReceiptSource::new()),
        Arc::new(InMemoryEntitlementStore::new()),
        ManagerConfig::default(),
        ManagerHooks::default().with_store_payment_handler(|id| id.as_str() != COINS),
    );

    assert!(h.storefront.promote(&id(UNLOCK)).unwrap());
    assert!(!h.storefront.promote(&id(COINS)).unwrap());
    assert_eq!(h.storefront.submitted(), vec![id(UNLOCK)]);
}

#[tokio::test(start_paused = true)]
async fn handle_reports_unavailable_after_manager_drop() {
    let h = Harness::loaded();
    settle().await;
    let handle = h.manager.handle();
    assert!(handle.is_available());

    let Harness { manager, storefront, .. } = h;
    drop(manager);

    assert!(!handle.is_available());
    assert_eq!(
        handle.transactions_updated(vec![TransactionEvent::purchased(id(UNLOCK))]),
        Err(HandleError::Unavailable)
    );
    assert!(!handle.should_add_store_payment(&id(UNLOCK)));
    assert_eq!(storefront.finish_restore(), Err(HandleError::Unavailable));
}

#[tokio::test]
async fn construction_rejects_invalid_catalogs() {
    let collaborators = || {
        Collaborators::new(
            Arc::new(InMemoryStorefront::new()),
            Arc::new(InMemoryReceiptSource::new()),
            Arc::new(InMemoryEntitlementStore::new()),
            Arc::new(StaticReachability::online()),
        )
    };

    assert!(Manager::new(Vec::new(), collaborators(), ManagerConfig::default()).is_err());

    let duplicated = vec![
        ProductDefinition::new(id(UNLOCK), ProductKind::NonConsumable),
        ProductDefinition::new(id(UNLOCK), ProductKind::Consumable),
    ];
    assert!(Manager::new(duplicated, collaborators(), ManagerConfig::default()).is_err());
}

#[test]
fn construction_outside_a_runtime_fails() {
    let result = Manager::new(
        products(),
        Collaborators::new(
            Arc::new(InMemoryStorefront::new()),
            Arc::new(InMemoryReceiptSource::new()),
            Arc::new(InMemoryEntitlementStore::new()),
            Arc::new(StaticReachability::online()),
        ),
        ManagerConfig::default(),
    );
    assert!(matches!(result, Err(iapkit_manager::ManagerError::NoRuntime)));
}
