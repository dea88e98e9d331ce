//! `iapkit-catalog`: the configured products and everything derived from them.
//!
//! - [`Product`]: identity, kind, storefront metadata and persisted entitlement flags
//! - [`ProductCatalog`]: the fixed product list, indexed by identifier
//! - [`EntitlementStore`]: key/value persistence behind the flags
//! - [`Receipt`]: the signed purchase history as seen after parsing

pub mod catalog;
pub mod metadata;
pub mod product;
pub mod receipt;
pub mod store;

pub use catalog::{ProductCatalog, ProductDefinition};
pub use metadata::{CatalogMetadata, DefaultPriceFormatter, Price, PriceFormatter};
pub use product::Product;
pub use receipt::{Receipt, ReceiptPurchaseRecord, RenewableStatus};
pub use store::{EntitlementStore, EntitlementValue, FileEntitlementStore, InMemoryEntitlementStore};
