//! Observer notifications and their delivery.
//!
//! Everything the manager tells the outside world goes through this crate:
//! the [`StoreNotification`] vocabulary, the pub/sub [`EventBus`], and the
//! [`DeliveryContext`] that runs caller continuations in a single ordered
//! stream.

pub mod bus;
pub mod delivery;
pub mod in_memory_bus;
pub mod notification;

pub use bus::{EventBus, Subscription};
pub use delivery::DeliveryContext;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use notification::StoreNotification;
