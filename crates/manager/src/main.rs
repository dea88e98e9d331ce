use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;

use iapkit_catalog::{
    CatalogMetadata, EntitlementStore, FileEntitlementStore, InMemoryEntitlementStore,
    ProductDefinition, Receipt, ReceiptPurchaseRecord,
};
use iapkit_core::{ProductIdentifier, ProductKind};
use iapkit_manager::{
    Collaborators, InMemoryReceiptSource, InMemoryStorefront, Manager, ManagerConfig,
    StaticReachability,
};

const UNLOCK: &str = "com.example.unlock";
const COINS: &str = "com.example.coins";
const PRO_MONTHLY: &str = "com.example.pro.monthly";

/// Scripted session against in-memory collaborators. Set
/// `IAPKIT_STORE_PATH` to persist flags to a JSON file between runs.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    iapkit_observability::init();

    let unlock = ProductIdentifier::new(UNLOCK)?;
    let coins = ProductIdentifier::new(COINS)?;
    let pro = ProductIdentifier::new(PRO_MONTHLY)?;

    let store: Arc<dyn EntitlementStore> = match std::env::var("IAPKIT_STORE_PATH") {
        Ok(path) => Arc::new(
            FileEntitlementStore::open(&path)
                .with_context(|| format!("opening entitlement store at {path}"))?,
        ),
        Err(_) => Arc::new(InMemoryEntitlementStore::new()),
    };

    let storefront = Arc::new(InMemoryStorefront::new());
    storefront.respond_with(HashMap::from([
        (unlock.clone(), CatalogMetadata::new(499, "USD", "en_US")),
        (coins.clone(), CatalogMetadata::new(99, "USD", "en_US")),
        (
            pro.clone(),
            CatalogMetadata::new(999, "USD", "en_US").with_introductory_price(199),
        ),
    ]));

    let now = Utc::now();
    let receipts = Arc::new(InMemoryReceiptSource::with_receipt(Receipt::new(vec![
        ReceiptPurchaseRecord::new(pro.clone(), now - chrono::Duration::days(2))
            .expiring_at(now + chrono::Duration::days(5))
            .trial(),
    ])));

    let manager = Manager::new(
        vec![
            ProductDefinition::new(unlock.clone(), ProductKind::NonConsumable),
            ProductDefinition::new(coins.clone(), ProductKind::Consumable),
            ProductDefinition::new(pro.clone(), ProductKind::AutoRenewable),
        ],
        Collaborators::new(
            storefront.clone(),
            receipts,
            store,
            Arc::new(StaticReachability::online()),
        ),
        ManagerConfig::from_env(),
    )?;
    let notifications = manager.subscribe();

    manager.get_price(&unlock, 1.0, |price| println!("price: {}", price.localized));
    manager.get_introductory_price(&pro, 1.0, |price| println!("intro price: {}", price.localized));
    manager.get_intro_period_status(&[pro.clone()], |status| {
        println!("intro period used: {}", status.is_intro_period_used)
    });
    settle().await;

    manager.purchase(&unlock);
    manager.purchase(&coins);
    storefront
        .approve_payments()
        .context("storefront lost its observer")?;
    settle().await;

    manager.restore_purchases();
    storefront
        .finish_restore()
        .context("storefront lost its observer")?;
    settle().await;

    for id in [&unlock, &coins, &pro] {
        println!("{id}: purchased={}", manager.is_purchased(id));
    }
    for notification in notifications.drain() {
        println!("notification: {}", serde_json::to_string(&notification)?);
    }

    Ok(())
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
