//! Parsed purchase receipts.
//!
//! Signature verification happens before a `Receipt` exists; by the time the
//! manager sees one it is trusted, read-only purchase history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use iapkit_core::{ProductIdentifier, ValueObject};

/// One in-app purchase entry of a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptPurchaseRecord {
    pub product_identifier: ProductIdentifier,
    pub purchased_at: DateTime<Utc>,
    /// End of the subscription period (auto-renewables only).
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Set when the storefront refunded or revoked the purchase.
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_trial_period: bool,
    #[serde(default)]
    pub is_intro_price_period: bool,
}

impl ValueObject for ReceiptPurchaseRecord {}

impl ReceiptPurchaseRecord {
    pub fn new(product_identifier: ProductIdentifier, purchased_at: DateTime<Utc>) -> Self {
        Self {
            product_identifier,
            purchased_at,
            expires_at: None,
            cancelled_at: None,
            is_trial_period: false,
            is_intro_price_period: false,
        }
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn cancelled(mut self, cancelled_at: DateTime<Utc>) -> Self {
        self.cancelled_at = Some(cancelled_at);
        self
    }

    pub fn trial(mut self) -> Self {
        self.is_trial_period = true;
        self
    }

    pub fn intro_price(mut self) -> Self {
        self.is_intro_price_period = true;
        self
    }

    /// Subscription period covers `at` and was not cancelled.
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.cancelled_at.is_none()
            && self.purchased_at <= at
            && self.expires_at.is_some_and(|expires| at < expires)
    }

    /// A free trial or discounted introductory period was consumed.
    pub fn used_intro_offer(&self) -> bool {
        self.is_trial_period || self.is_intro_price_period
    }
}

/// What a receipt says about one auto-renewable subscription at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewableStatus {
    /// Purchase date of the active period, if any period is active.
    pub active_since: Option<DateTime<Utc>>,
    /// `None` when the receipt has no record at all for the product.
    pub intro_period_used: Option<bool>,
}

impl RenewableStatus {
    pub fn is_active(&self) -> bool {
        self.active_since.is_some()
    }
}

/// A verified receipt: the full purchase history of the account on this device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    purchases: Vec<ReceiptPurchaseRecord>,
}

impl Receipt {
    pub fn new(purchases: Vec<ReceiptPurchaseRecord>) -> Self {
        Self { purchases }
    }

    pub fn purchases(&self) -> &[ReceiptPurchaseRecord] {
        &self.purchases
    }

    pub fn purchases_of<'a, 'b>(
        &'a self,
        id: &'b ProductIdentifier,
    ) -> impl Iterator<Item = &'a ReceiptPurchaseRecord> + use<'a, 'b> {
        self.purchases
            .iter()
            .filter(move |p| &p.product_identifier == id)
    }

    /// The most recently purchased period of `id` that is active at `at`.
    pub fn active_auto_renewable_purchase(
        &self,
        id: &ProductIdentifier,
        at: DateTime<Utc>,
    ) -> Option<&ReceiptPurchaseRecord> {
        self.purchases
            .iter()
            .filter(|p| &p.product_identifier == id && p.is_active_at(at))
            .max_by_key(|p| p.purchased_at)
    }

    pub fn renewable_status(&self, id: &ProductIdentifier, at: DateTime<Utc>) -> RenewableStatus {
        let mut records = self.purchases_of(id).peekable();
        let intro_period_used = if records.peek().is_none() {
            None
        } else {
            Some(records.any(ReceiptPurchaseRecord::used_intro_offer))
        };

        RenewableStatus {
            active_since: self
                .active_auto_renewable_purchase(id, at)
                .map(|p| p.purchased_at),
            intro_period_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn id(s: &str) -> ProductIdentifier {
        ProductIdentifier::new(s).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn active_requires_unexpired_uncancelled_period() {
        let monthly = id("pro.monthly");
        let record = ReceiptPurchaseRecord::new(monthly.clone(), t0())
            .expiring_at(t0() + Duration::days(30));

        assert!(record.is_active_at(t0()));
        assert!(record.is_active_at(t0() + Duration::days(29)));
        assert!(!record.is_active_at(t0() + Duration::days(30)));
        assert!(!record.is_active_at(t0() - Duration::seconds(1)));

        let refunded = record.clone().cancelled(t0() + Duration::days(2));
        assert!(!refunded.is_active_at(t0() + Duration::days(3)));

        let no_expiry = ReceiptPurchaseRecord::new(monthly, t0());
        assert!(!no_expiry.is_active_at(t0()));
    }

    #[test]
    fn latest_active_period_wins() {
        let monthly = id("pro.monthly");
        let receipt = Receipt::new(vec![
            ReceiptPurchaseRecord::new(monthly.clone(), t0()).expiring_at(t0() + Duration::days(60)),
            ReceiptPurchaseRecord::new(monthly.clone(), t0() + Duration::days(30))
                .expiring_at(t0() + Duration::days(60)),
        ]);

        let active = receipt
            .active_auto_renewable_purchase(&monthly, t0() + Duration::days(31))
            .unwrap();
        assert_eq!(active.purchased_at, t0() + Duration::days(30));
    }

    #[test]
    fn found_records_outlive_the_queried_identifier() {
        let receipt = Receipt::new(vec![
            ReceiptPurchaseRecord::new(id("pro.monthly"), t0()).expiring_at(t0() + Duration::days(30)),
            ReceiptPurchaseRecord::new(id("pro.yearly"), t0()),
        ]);

        let (active, history) = {
            let query = id("pro.monthly");
            let active = receipt.active_auto_renewable_purchase(&query, t0() + Duration::days(1));
            let history: Vec<&ReceiptPurchaseRecord> = receipt.purchases_of(&query).collect();
            (active, history)
        };

        assert_eq!(active.map(|p| p.purchased_at), Some(t0()));
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].product_identifier, id("pro.monthly"));
    }

    #[test]
    fn intro_status_distinguishes_unknown_from_unused() {
        let monthly = id("pro.monthly");
        let yearly = id("pro.yearly");
        let other = id("pro.weekly");
        let receipt = Receipt::new(vec![
            ReceiptPurchaseRecord::new(monthly.clone(), t0()).expiring_at(t0() + Duration::days(7)),
            ReceiptPurchaseRecord::new(monthly.clone(), t0() + Duration::days(7))
                .expiring_at(t0() + Duration::days(37))
                .trial(),
            ReceiptPurchaseRecord::new(yearly.clone(), t0()).expiring_at(t0() + Duration::days(365)),
        ]);

        let now = t0() + Duration::days(10);
        let m = receipt.renewable_status(&monthly, now);
        assert_eq!(m.intro_period_used, Some(true));
        assert_eq!(m.active_since, Some(t0() + Duration::days(7)));

        let y = receipt.renewable_status(&yearly, now);
        assert_eq!(y.intro_period_used, Some(false));
        assert!(y.is_active());

        let o = receipt.renewable_status(&other, now);
        assert_eq!(o.intro_period_used, None);
        assert!(!o.is_active());
    }
}
