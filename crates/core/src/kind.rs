//! Product types and subscription durations.

use chrono::{DateTime, Days, Months, Utc};
use serde::{Deserialize, Serialize};

/// Calendar unit of a non-renewing subscription period.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    Days,
    Months,
    Years,
}

impl DurationUnit {
    /// Add `count` units to `start` using calendar arithmetic.
    ///
    /// Month and year additions clamp to the last day of the target month
    /// (Jan 31 + 1 month = Feb 28/29). Returns `None` on overflow.
    pub fn add_to(self, start: DateTime<Utc>, count: u32) -> Option<DateTime<Utc>> {
        match self {
            DurationUnit::Days => start.checked_add_days(Days::new(u64::from(count))),
            DurationUnit::Months => start.checked_add_months(Months::new(count)),
            DurationUnit::Years => start.checked_add_months(Months::new(count.checked_mul(12)?)),
        }
    }
}

/// How a product grants (or does not grant) an entitlement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProductKind {
    /// Used up once bought; never entitlement-gated.
    Consumable,
    /// Bought once, owned forever.
    NonConsumable,
    /// Subscription renewed by the storefront; verified against the receipt.
    AutoRenewable,
    /// Fixed-length access starting at the purchase date.
    NonRenewing { duration: u32, unit: DurationUnit },
}

impl ProductKind {
    pub fn is_auto_renewable(&self) -> bool {
        matches!(self, ProductKind::AutoRenewable)
    }

    /// Whether the purchased flag is persisted directly (as opposed to being
    /// derived or always false).
    pub fn stores_purchased_flag(&self) -> bool {
        matches!(self, ProductKind::NonConsumable | ProductKind::AutoRenewable)
    }

    /// Expiration of a non-renewing period bought at `purchased_at`.
    ///
    /// `None` for every other kind, or when the date overflows.
    pub fn expiration(&self, purchased_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            ProductKind::NonRenewing { duration, unit } => unit.add_to(purchased_at, duration),
            _ => None,
        }
    }
}
