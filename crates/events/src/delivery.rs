//! Ordered delivery of continuations and notifications.
//!
//! Work produced on background tasks (catalog fetches, receipt refreshes,
//! transaction batches) never calls user code directly. It hands a closure
//! to the [`DeliveryContext`], whose single task runs closures one at a time
//! in submission order. Notifications travel the same path, so an observer
//! never sees `CatalogReceived` after a price continuation that was queued
//! behind it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::bus::{EventBus, Subscription};
use crate::in_memory_bus::InMemoryEventBus;
use crate::notification::StoreNotification;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to the delivery task. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    tx: mpsc::UnboundedSender<Job>,
    bus: Arc<InMemoryEventBus<StoreNotification>>,
}

impl DeliveryContext {
    /// Spawn the delivery task on the current tokio runtime.
    ///
    /// The task stops once every clone of the returned handle is dropped.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn(bus: Arc<InMemoryEventBus<StoreNotification>>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            debug!("delivery context started");
            while let Some(job) = rx.recv().await {
                // A panicking continuation must not take the whole queue down.
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("continuation panicked on the delivery context");
                }
            }
            debug!("delivery context stopped");
        });

        Self { tx, bus }
    }

    /// Queue a continuation. Returns `false` if the delivery task is gone.
    pub fn deliver<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(job)).is_ok()
    }

    /// Queue a notification for all bus subscribers.
    pub fn notify(&self, notification: StoreNotification) {
        let bus = Arc::clone(&self.bus);
        let queued = self.deliver(move || {
            if let Err(e) = bus.publish(notification) {
                warn!(notification = %notification, error = ?e, "failed to publish notification");
            }
        });
        if !queued {
            warn!(notification = %notification, "delivery context closed; notification dropped");
        }
    }

    pub fn subscribe(&self) -> Subscription<StoreNotification> {
        self.bus.subscribe()
    }
}
