//! Entitlement persistence.
//!
//! Flags are stored per product under `"<identifier><suffix>"` keys so the
//! layout stays compatible with plain key/value backends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Storage key suffixes.
pub mod keys {
    pub const PURCHASED: &str = ".purchased";
    /// Older key for the trial flag; read as a fallback only.
    pub const TRIAL_USED: &str = ".trialUsed";
    pub const INTRO_PERIOD_USED: &str = ".introPeriodUsed";
    pub const PURCHASE_DATE: &str = ".purchaseDate";
}

/// A persisted flag value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum EntitlementValue {
    Bool(bool),
    Date(DateTime<Utc>),
}

impl EntitlementValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EntitlementValue::Bool(b) => Some(*b),
            EntitlementValue::Date(_) => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            EntitlementValue::Date(d) => Some(*d),
            EntitlementValue::Bool(_) => None,
        }
    }
}

/// Durable key → value persistence for entitlement flags.
///
/// Each call must be atomic on its own; callers that update several keys of
/// one product serialize through that product.
pub trait EntitlementStore: Send + Sync {
    fn get(&self, key: &str) -> Option<EntitlementValue>;

    fn set(&self, key: &str, value: EntitlementValue);

    fn remove(&self, key: &str);
}

/// In-memory store. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryEntitlementStore {
    values: RwLock<HashMap<String, EntitlementValue>>,
}

impl InMemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored key/value pair.
    pub fn snapshot(&self) -> HashMap<String, EntitlementValue> {
        self.values.read().map(|v| v.clone()).unwrap_or_default()
    }
}

impl EntitlementStore for InMemoryEntitlementStore {
    fn get(&self, key: &str) -> Option<EntitlementValue> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: EntitlementValue) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_string(), value);
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut values) = self.values.write() {
            values.remove(key);
        }
    }
}

/// JSON-file store: the whole map is rewritten on every change.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct FileEntitlementStore {
    path: PathBuf,
    cache: RwLock<HashMap<String, EntitlementValue>>,
}

impl FileEntitlementStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create entitlement store directory at {parent:?}"))?;
        }

        let cache = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read entitlement store at {path:?}"))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("entitlement store at {path:?} is not valid JSON"))?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, values: &HashMap<String, EntitlementValue>) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(values).context("failed to encode entitlements")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).with_context(|| format!("failed to write {tmp:?}"))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to move {tmp:?} into place"))?;
        Ok(())
    }

    fn mutate(&self, f: impl FnOnce(&mut HashMap<String, EntitlementValue>)) {
        let Ok(mut values) = self.cache.write() else {
            warn!(path = ?self.path, "entitlement store lock poisoned; change dropped");
            return;
        };
        f(&mut values);
        if let Err(e) = self.save(&values) {
            warn!(path = ?self.path, error = ?e, "failed to persist entitlements");
        }
    }
}

impl EntitlementStore for FileEntitlementStore {
    fn get(&self, key: &str) -> Option<EntitlementValue> {
        self.cache.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: EntitlementValue) {
        self.mutate(|values| {
            values.insert(key.to_string(), value);
        });
    }

    fn remove(&self, key: &str) {
        self.mutate(|values| {
            values.remove(key);
        });
    }
}
