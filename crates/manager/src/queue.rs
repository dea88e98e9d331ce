//! Pending-request queues and coalescing gates.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

struct Pending<T> {
    enqueued_at: Instant,
    request: T,
}

/// FIFO of requests waiting for data that has not arrived yet.
///
/// - `push` may be called from any thread at any time.
/// - `drain` hands entries to the caller strictly in insertion order; a
///   second concurrent drain waits for the first to finish.
/// - A drained entry is gone. Nothing is ever put back.
///
/// With a TTL, entries older than the TTL are pruned on every push and
/// skipped on drain. Without one they wait forever.
pub struct PendingQueue<T> {
    name: &'static str,
    ttl: Option<Duration>,
    entries: Mutex<VecDeque<Pending<T>>>,
    drain_lock: Mutex<()>,
}

impl<T> core::fmt::Debug for PendingQueue<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PendingQueue")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("len", &self.len())
            .finish()
    }
}

impl<T> PendingQueue<T> {
    pub fn new(name: &'static str, ttl: Option<Duration>) -> Self {
        Self {
            name,
            ttl,
            entries: Mutex::new(VecDeque::new()),
            drain_lock: Mutex::new(()),
        }
    }

    pub fn push(&self, request: T) {
        let now = Instant::now();
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };

        if let Some(ttl) = self.ttl {
            let before = entries.len();
            entries.retain(|p| now.duration_since(p.enqueued_at) < ttl);
            let pruned = before - entries.len();
            if pruned > 0 {
                debug!(queue = self.name, pruned, "expired pending requests pruned");
            }
        }

        entries.push_back(Pending {
            enqueued_at: now,
            request,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pop every entry in order and pass it to `handle`.
    ///
    /// `handle` runs without the entry lock held, so it may push to this
    /// queue; such entries are drained by the same call.
    pub fn drain(&self, mut handle: impl FnMut(T)) -> usize {
        let _serial = self.drain_lock.lock();
        let mut handled = 0;

        loop {
            let next = match self.entries.lock() {
                Ok(mut entries) => entries.pop_front(),
                Err(_) => None,
            };
            let Some(pending) = next else {
                break;
            };

            if self.is_expired(&pending) {
                debug!(queue = self.name, "expired pending request skipped");
                continue;
            }

            handle(pending.request);
            handled += 1;
        }

        handled
    }

    fn is_expired(&self, pending: &Pending<T>) -> bool {
        self.ttl
            .is_some_and(|ttl| pending.enqueued_at.elapsed() >= ttl)
    }
}

/// A single-holder flag with atomic test-and-set.
///
/// Used to coalesce concurrent catalog fetches and reconciliations: whoever
/// closes the gate does the work, everyone else backs off.
#[derive(Debug, Default)]
pub struct Gate {
    closed: AtomicBool,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the gate. `false` if it was already closed.
    pub fn try_close(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn open(&self) {
        self.closed.store(false, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the gate for the lifetime of the returned guard.
    pub fn enter(&self) -> Option<GateGuard<'_>> {
        self.try_close().then(|| GateGuard { gate: self })
    }
}

/// Reopens its gate on drop, including on early return.
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a Gate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.open();
    }
}
