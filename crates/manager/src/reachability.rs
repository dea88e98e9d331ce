use std::sync::atomic::{AtomicBool, Ordering};

/// Network reachability check, consulted before purchases and restores.
pub trait Reachability: Send + Sync {
    fn is_connected(&self) -> bool;
}

/// Reachability switched by hand. Intended for tests/dev.
#[derive(Debug)]
pub struct StaticReachability {
    connected: AtomicBool,
}

impl StaticReachability {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
        }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl Reachability for StaticReachability {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
