//! Storefront pricing metadata and price formatting.

use serde::{Deserialize, Serialize};

use iapkit_core::ValueObject;

/// Live product metadata returned by a catalog fetch.
///
/// Prices are kept in the currency's smallest unit (e.g. cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogMetadata {
    pub price_minor: u64,
    /// ISO currency code (e.g. "USD", "EUR").
    pub currency: String,
    /// Locale the storefront wants prices rendered in (e.g. "en_US").
    pub locale: String,
    /// Number of minor-unit digits of the currency (2 for USD, 0 for JPY).
    #[serde(default = "default_fraction_digits")]
    pub fraction_digits: u8,
    #[serde(default)]
    pub introductory_price_minor: Option<u64>,
}

fn default_fraction_digits() -> u8 {
    2
}

impl CatalogMetadata {
    pub fn new(price_minor: u64, currency: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            price_minor,
            currency: currency.into(),
            locale: locale.into(),
            fraction_digits: default_fraction_digits(),
            introductory_price_minor: None,
        }
    }

    pub fn with_introductory_price(mut self, price_minor: u64) -> Self {
        self.introductory_price_minor = Some(price_minor);
        self
    }

    pub fn with_fraction_digits(mut self, digits: u8) -> Self {
        self.fraction_digits = digits;
        self
    }

    /// Regular price scaled by `multiplier`.
    pub fn price(&self, multiplier: f64, formatter: &dyn PriceFormatter) -> Option<Price> {
        self.build_price(self.price_minor, multiplier, formatter)
    }

    /// Introductory price scaled by `multiplier`, if the product has one.
    pub fn introductory_price(
        &self,
        multiplier: f64,
        formatter: &dyn PriceFormatter,
    ) -> Option<Price> {
        self.build_price(self.introductory_price_minor?, multiplier, formatter)
    }

    fn build_price(
        &self,
        base_minor: u64,
        multiplier: f64,
        formatter: &dyn PriceFormatter,
    ) -> Option<Price> {
        let amount_minor = scale_minor(base_minor, multiplier)?;
        Some(Price {
            amount_minor,
            currency: self.currency.clone(),
            fraction_digits: self.fraction_digits,
            localized: formatter.format(amount_minor, self),
        })
    }
}

/// Multiply a minor-unit amount, rounding half away from zero.
///
/// Rejects negative, NaN and infinite multipliers, and results that do not
/// fit in `u64`.
fn scale_minor(minor: u64, multiplier: f64) -> Option<u64> {
    if !multiplier.is_finite() || multiplier < 0.0 {
        return None;
    }
    let scaled = (minor as f64 * multiplier).round();
    if scaled >= u64::MAX as f64 {
        return None;
    }
    Some(scaled as u64)
}

/// A price ready to hand to the caller: numeric value plus display string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub amount_minor: u64,
    pub currency: String,
    pub fraction_digits: u8,
    pub localized: String,
}

impl ValueObject for Price {}

impl Price {
    /// Amount in major units (e.g. dollars). For display math only.
    pub fn amount(&self) -> f64 {
        self.amount_minor as f64 / 10f64.powi(i32::from(self.fraction_digits))
    }
}

/// Renders an amount for display. Currency formatting is opaque to the
/// manager; apps plug in whatever their UI layer uses.
pub trait PriceFormatter: Send + Sync {
    fn format(&self, amount_minor: u64, metadata: &CatalogMetadata) -> String;
}

/// `"<CODE> <major>.<minor>"`, e.g. `"USD 4.99"`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPriceFormatter;

impl PriceFormatter for DefaultPriceFormatter {
    fn format(&self, amount_minor: u64, metadata: &CatalogMetadata) -> String {
        let digits = u32::from(metadata.fraction_digits);
        if digits == 0 {
            return format!("{} {}", metadata.currency, amount_minor);
        }
        match 10u64.checked_pow(digits) {
            Some(base) => format!(
                "{} {}.{:0width$}",
                metadata.currency,
                amount_minor / base,
                amount_minor % base,
                width = digits as usize
            ),
            None => format!("{} {}", metadata.currency, amount_minor),
        }
    }
}
