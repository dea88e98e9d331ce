//! Manager configuration and capability hooks.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use iapkit_core::ProductIdentifier;

/// Delay before the single retry of the first catalog request.
pub const DEFAULT_CATALOG_RETRY_INTERVAL: Duration = Duration::from_secs(3);
/// Upper bound on waiting for a receipt refresh.
pub const DEFAULT_RECEIPT_REFRESH_TIMEOUT: Duration = Duration::from_secs(8);
/// Exit status used when a required receipt cannot be obtained.
pub const RECEIPT_MISSING_EXIT_CODE: i32 = 173;

/// Manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    pub catalog_retry_interval: Duration,
    pub receipt_refresh_timeout: Duration,
    /// Fail closed: terminate the process when no receipt can be obtained.
    pub receipt_required: bool,
    /// Treat a lone `Restored` transaction arriving outside an explicit
    /// restore as a purchase. Some storefronts report fresh purchases that way.
    pub lone_restore_as_purchase: bool,
    /// Expiry for queued price/status requests. `None` waits forever.
    pub pending_request_ttl: Option<Duration>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            catalog_retry_interval: DEFAULT_CATALOG_RETRY_INTERVAL,
            receipt_refresh_timeout: DEFAULT_RECEIPT_REFRESH_TIMEOUT,
            receipt_required: false,
            lone_restore_as_purchase: false,
            pending_request_ttl: None,
        }
    }
}

impl ManagerConfig {
    /// Defaults overlaid with `IAPKIT_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    pub fn with_catalog_retry_interval(mut self, interval: Duration) -> Self {
        self.catalog_retry_interval = interval;
        self
    }

    pub fn with_receipt_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_refresh_timeout = timeout;
        self
    }

    pub fn with_receipt_required(mut self, required: bool) -> Self {
        self.receipt_required = required;
        self
    }

    pub fn with_lone_restore_as_purchase(mut self, enabled: bool) -> Self {
        self.lone_restore_as_purchase = enabled;
        self
    }

    pub fn with_pending_request_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.pending_request_ttl = ttl;
        self
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(secs) = parse_var(&lookup, "IAPKIT_CATALOG_RETRY_SECS", parse_secs) {
            self.catalog_retry_interval = secs;
        }
        if let Some(secs) = parse_var(&lookup, "IAPKIT_RECEIPT_REFRESH_TIMEOUT_SECS", parse_secs) {
            self.receipt_refresh_timeout = secs;
        }
        if let Some(flag) = parse_var(&lookup, "IAPKIT_RECEIPT_REQUIRED", parse_flag) {
            self.receipt_required = flag;
        }
        if let Some(flag) = parse_var(&lookup, "IAPKIT_LONE_RESTORE_AS_PURCHASE", parse_flag) {
            self.lone_restore_as_purchase = flag;
        }
        if let Some(secs) = parse_var(&lookup, "IAPKIT_PENDING_REQUEST_TTL_SECS", parse_secs) {
            self.pending_request_ttl = Some(secs);
        }
        self
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = lookup(key)?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        warn!(key, value = %raw, "ignoring unparsable configuration value");
    }
    parsed
}

fn parse_secs(raw: &str) -> Option<Duration> {
    raw.parse::<u64>().ok().map(Duration::from_secs)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub type ExitHook = Arc<dyn Fn(i32) + Send + Sync>;
pub type StorePaymentHandler = Arc<dyn Fn(&ProductIdentifier) -> bool + Send + Sync>;

/// Capability callbacks fixed at construction.
#[derive(Clone)]
pub struct ManagerHooks {
    /// Invoked with [`RECEIPT_MISSING_EXIT_CODE`] under `receipt_required`.
    pub exit: ExitHook,
    /// Decides whether storefront-initiated purchases proceed.
    pub store_payment: StorePaymentHandler,
}

impl Default for ManagerHooks {
    fn default() -> Self {
        Self {
            exit: Arc::new(exit_process),
            store_payment: Arc::new(|_: &ProductIdentifier| true),
        }
    }
}

fn exit_process(code: i32) {
    std::process::exit(code)
}

impl core::fmt::Debug for ManagerHooks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ManagerHooks")
            .field("exit", &"<fn>")
            .field("store_payment", &"<fn>")
            .finish()
    }
}

impl ManagerHooks {
    pub fn with_exit<F>(mut self, exit: F) -> Self
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        self.exit = Arc::new(exit);
        self
    }

    pub fn with_store_payment_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ProductIdentifier) -> bool + Send + Sync + 'static,
    {
        self.store_payment = Arc::new(handler);
        self
    }
}
