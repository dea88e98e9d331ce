//! The fixed product list a manager is constructed with.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use iapkit_core::{DomainError, DomainResult, ProductIdentifier, ProductKind};

use crate::metadata::CatalogMetadata;
use crate::product::Product;
use crate::store::EntitlementStore;

/// Identifier + kind, as configured by the app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDefinition {
    pub identifier: ProductIdentifier,
    pub kind: ProductKind,
}

impl ProductDefinition {
    pub fn new(identifier: ProductIdentifier, kind: ProductKind) -> Self {
        Self { identifier, kind }
    }
}

/// Products indexed by identifier, in configuration order.
#[derive(Debug)]
pub struct ProductCatalog {
    products: Vec<Arc<Product>>,
    index: HashMap<ProductIdentifier, usize>,
}

impl ProductCatalog {
    /// Build the catalog. Rejects an empty list and duplicate identifiers.
    pub fn new(
        definitions: Vec<ProductDefinition>,
        store: Arc<dyn EntitlementStore>,
    ) -> DomainResult<Self> {
        if definitions.is_empty() {
            return Err(DomainError::validation("product catalog must not be empty"));
        }

        let mut products = Vec::with_capacity(definitions.len());
        let mut index = HashMap::with_capacity(definitions.len());

        for def in definitions {
            if index.contains_key(&def.identifier) {
                return Err(DomainError::validation(format!(
                    "duplicate product identifier: {}",
                    def.identifier
                )));
            }
            index.insert(def.identifier.clone(), products.len());
            products.push(Arc::new(Product::new(def.identifier, def.kind, Arc::clone(&store))));
        }

        Ok(Self { products, index })
    }

    pub fn get(&self, id: &ProductIdentifier) -> Option<&Arc<Product>> {
        self.index.get(id).map(|&i| &self.products[i])
    }

    pub fn require(&self, id: &ProductIdentifier) -> DomainResult<&Arc<Product>> {
        self.get(id).ok_or_else(|| DomainError::unknown_product(id))
    }

    pub fn contains(&self, id: &ProductIdentifier) -> bool {
        self.index.contains_key(id)
    }

    pub fn products(&self) -> &[Arc<Product>] {
        &self.products
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn identifiers(&self) -> HashSet<ProductIdentifier> {
        self.index.keys().cloned().collect()
    }

    /// Replace every product's metadata from a catalog response.
    ///
    /// Products missing from the response lose their metadata. Returns how
    /// many products matched.
    pub fn apply_metadata(&self, response: &HashMap<ProductIdentifier, CatalogMetadata>) -> usize {
        let mut matched = 0;
        for product in &self.products {
            let metadata = response.get(product.identifier()).cloned();
            if metadata.is_some() {
                matched += 1;
            } else {
                debug!(product = %product.identifier(), "product absent from catalog response");
            }
            product.set_metadata(metadata);
        }
        matched
    }
}
