//! In-memory storefront and receipt source for tests and local runs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use iapkit_catalog::Receipt;
use iapkit_core::ProductIdentifier;

use crate::receipt_source::{ReceiptError, ReceiptSource};
use crate::storefront::{
    CatalogResponse, HandleError, Storefront, StorefrontError, TransactionEvent,
    TransactionObserver,
};

/// How [`InMemoryStorefront::fetch_catalog`] answers.
#[derive(Debug, Clone)]
pub enum CatalogBehaviour {
    Respond(CatalogResponse),
    Fail(StorefrontError),
    /// Never completes.
    Hang,
}

#[derive(Default)]
struct StorefrontState {
    behaviour: Option<CatalogBehaviour>,
    latency: Duration,
    submitted: Vec<ProductIdentifier>,
    awaiting_approval: Vec<ProductIdentifier>,
    finished: Vec<Uuid>,
    restore_requests: usize,
    observer: Option<Arc<dyn TransactionObserver>>,
}

/// Scriptable storefront. Payments are held until
/// [`approve_payments`](Self::approve_payments) delivers them.
#[derive(Default)]
pub struct InMemoryStorefront {
    state: Mutex<StorefrontState>,
    fetches: AtomicUsize,
}

impl core::fmt::Debug for InMemoryStorefront {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryStorefront")
            .field("fetches", &self.fetch_count())
            .finish_non_exhaustive()
    }
}

impl InMemoryStorefront {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_with(&self, response: CatalogResponse) {
        self.set_behaviour(CatalogBehaviour::Respond(response));
    }

    pub fn fail_with(&self, error: StorefrontError) {
        self.set_behaviour(CatalogBehaviour::Fail(error));
    }

    pub fn hang(&self) {
        self.set_behaviour(CatalogBehaviour::Hang);
    }

    pub fn set_behaviour(&self, behaviour: CatalogBehaviour) {
        if let Ok(mut state) = self.state.lock() {
            state.behaviour = Some(behaviour);
        }
    }

    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.latency = latency;
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<ProductIdentifier> {
        self.read(|s| s.submitted.clone())
    }

    /// Transaction ids passed to `finish_transaction`, in call order.
    pub fn finished(&self) -> Vec<Uuid> {
        self.read(|s| s.finished.clone())
    }

    pub fn restore_requests(&self) -> usize {
        self.read(|s| s.restore_requests)
    }

    pub fn has_observer(&self) -> bool {
        self.read(|s| s.observer.is_some())
    }

    fn read<T: Default>(&self, f: impl FnOnce(&StorefrontState) -> T) -> T {
        self.state.lock().map(|s| f(&s)).unwrap_or_default()
    }

    fn observer(&self) -> Result<Arc<dyn TransactionObserver>, HandleError> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.observer.clone())
            .ok_or(HandleError::Unavailable)
    }

    /// Push a transaction batch to the attached observer.
    pub fn deliver(&self, batch: Vec<TransactionEvent>) -> Result<(), HandleError> {
        self.observer()?.transactions_updated(batch)
    }

    /// Deliver every held payment as one `Purchased` batch.
    pub fn approve_payments(&self) -> Result<usize, HandleError> {
        let pending = self
            .state
            .lock()
            .map(|mut s| std::mem::take(&mut s.awaiting_approval))
            .unwrap_or_default();
        let count = pending.len();
        if count > 0 {
            self.deliver(pending.into_iter().map(TransactionEvent::purchased).collect())?;
        }
        Ok(count)
    }

    pub fn finish_restore(&self) -> Result<(), HandleError> {
        self.observer()?.restore_finished()
    }

    pub fn fail_restore(&self, error: StorefrontError) -> Result<(), HandleError> {
        self.observer()?.restore_failed(error)
    }

    /// A purchase started from the storefront itself. Queued only when the
    /// observer accepts it.
    pub fn promote(&self, product: &ProductIdentifier) -> Result<bool, HandleError> {
        let accepted = self.observer()?.should_add_store_payment(product);
        if accepted {
            self.submit_payment(product);
        }
        Ok(accepted)
    }
}

#[async_trait]
impl Storefront for InMemoryStorefront {
    async fn fetch_catalog(
        &self,
        identifiers: HashSet<ProductIdentifier>,
    ) -> Result<CatalogResponse, StorefrontError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let (behaviour, latency) = self
            .state
            .lock()
            .map(|s| (s.behaviour.clone(), s.latency))
            .map_err(|_| StorefrontError::Unavailable("state poisoned".into()))?;

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match behaviour.unwrap_or_else(|| CatalogBehaviour::Respond(CatalogResponse::new())) {
            CatalogBehaviour::Respond(mut response) => {
                response.retain(|id, _| identifiers.contains(id));
                Ok(response)
            }
            CatalogBehaviour::Fail(error) => Err(error),
            CatalogBehaviour::Hang => std::future::pending().await,
        }
    }

    fn submit_payment(&self, product: &ProductIdentifier) {
        if let Ok(mut state) = self.state.lock() {
            state.submitted.push(product.clone());
            state.awaiting_approval.push(product.clone());
        }
    }

    fn restore_completed_transactions(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.restore_requests += 1;
        }
    }

    fn finish_transaction(&self, event: &TransactionEvent) {
        if let Ok(mut state) = self.state.lock() {
            state.finished.push(event.transaction_id);
        }
    }

    fn attach_observer(&self, observer: Arc<dyn TransactionObserver>) {
        if let Ok(mut state) = self.state.lock() {
            state.observer = Some(observer);
        }
    }
}

/// How [`InMemoryReceiptSource::refresh`] answers.
#[derive(Debug, Clone)]
pub enum RefreshBehaviour {
    /// Succeed and make this receipt the local one.
    Install(Receipt),
    Fail(String),
    /// Never completes.
    Hang,
}

struct ReceiptState {
    local: Option<Receipt>,
    refresh: RefreshBehaviour,
    latency: Duration,
}

/// Scriptable receipt source. With no receipt installed, refreshes fail.
pub struct InMemoryReceiptSource {
    state: Mutex<ReceiptState>,
    local_reads: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl Default for InMemoryReceiptSource {
    fn default() -> Self {
        Self {
            state: Mutex::new(ReceiptState {
                local: None,
                refresh: RefreshBehaviour::Fail("no receipt available".into()),
                latency: Duration::ZERO,
            }),
            local_reads: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
        }
    }
}

impl core::fmt::Debug for InMemoryReceiptSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryReceiptSource")
            .field("local_reads", &self.local_reads())
            .field("refresh_calls", &self.refresh_calls())
            .finish_non_exhaustive()
    }
}

impl InMemoryReceiptSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_receipt(receipt: Receipt) -> Self {
        let source = Self::default();
        source.set_local(Some(receipt));
        source
    }

    pub fn set_local(&self, receipt: Option<Receipt>) {
        if let Ok(mut state) = self.state.lock() {
            state.local = receipt;
        }
    }

    pub fn set_refresh(&self, behaviour: RefreshBehaviour) {
        if let Ok(mut state) = self.state.lock() {
            state.refresh = behaviour;
        }
    }

    /// Delay applied to every refresh.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.latency = latency;
        }
    }

    pub fn local_reads(&self) -> usize {
        self.local_reads.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReceiptSource for InMemoryReceiptSource {
    fn local_receipt(&self) -> Result<Receipt, ReceiptError> {
        self.local_reads.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .ok()
            .and_then(|s| s.local.clone())
            .ok_or(ReceiptError::NotFound)
    }

    async fn refresh(&self) -> Result<(), ReceiptError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let (behaviour, latency) = self
            .state
            .lock()
            .map(|s| (s.refresh.clone(), s.latency))
            .map_err(|_| ReceiptError::Refresh("state poisoned".into()))?;

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match behaviour {
            RefreshBehaviour::Install(receipt) => {
                self.set_local(Some(receipt));
                Ok(())
            }
            RefreshBehaviour::Fail(message) => Err(ReceiptError::Refresh(message)),
            RefreshBehaviour::Hang => std::future::pending().await,
        }
    }
}
