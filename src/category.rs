// ===============================
// src/category.rs
// ===============================
//
// Category repository: root node, one-level fetches, in-flight de-duplication.
//
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use ahash::AHashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tracing::debug;

use crate::domain::CategoryNode;
use crate::error::{Cancelled, FetchResult};
use crate::gateway::{CancelHandle, Endpoint, FetchGateway};
use crate::metrics::CATEGORY_DEDUP_HITS;
use crate::wire;

type CategoryOutput = Result<FetchResult<Arc<CategoryNode>>, Cancelled>;

/// Pending fetch of one category. Clones await the same request.
#[derive(Clone)]
pub struct CategoryFetch {
    id: String,
    ticket: u64,
    inner: Shared<BoxFuture<'static, CategoryOutput>>,
}

impl CategoryFetch {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Debug for CategoryFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategoryFetch")
            .field("id", &self.id)
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}

impl Future for CategoryFetch {
    type Output = CategoryOutput;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

struct Inflight {
    ticket: u64,
    handle: CancelHandle,
    fetch: CategoryFetch,
    interest: usize,
}

impl Inflight {
    /// Joinable until the shared result resolves, even after the transport
    /// has answered.
    fn is_live(&self) -> bool {
        self.fetch.inner.peek().is_none() && !self.handle.is_cancelled()
    }
}

type InflightTable = Arc<Mutex<AHashMap<String, Inflight>>>;

fn lock(table: &InflightTable) -> MutexGuard<'_, AHashMap<String, Inflight>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct CategoryRepository {
    gateway: FetchGateway,
    root_id: String,
    inflight: InflightTable,
    next_ticket: Arc<AtomicU64>,
}

impl CategoryRepository {
    pub fn new(gateway: FetchGateway, root_id: impl Into<String>) -> Self {
        Self {
            gateway,
            root_id: root_id.into(),
            inflight: Arc::default(),
            next_ticket: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Shallow root, no network.
    pub fn root_category(&self) -> CategoryNode {
        CategoryNode::root(self.root_id.clone())
    }

    /// Fetches `id` with its immediate children.
    ///
    /// While a fetch for the same id is still pending, the pending one is
    /// returned and no request is issued.
    pub fn fetch_category(&self, id: &str) -> CategoryFetch {
        let mut table = lock(&self.inflight);
        if let Some(entry) = table.get_mut(id) {
            if entry.is_live() {
                entry.interest += 1;
                CATEGORY_DEDUP_HITS.inc();
                debug!(category_id = %id, interest = entry.interest, "joined inflight category fetch");
                return entry.fetch.clone();
            }
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (handle, response) = self.gateway.request(Endpoint::Category { id: id.to_string() });

        let key = id.to_string();
        let done_table = Arc::clone(&self.inflight);
        let inner = async move {
            let out = response
                .await
                .map(|r| r.and_then(|raw| wire::category_from_raw(&key, raw)).map(Arc::new));
            let mut table = lock(&done_table);
            if table.get(&key).is_some_and(|e| e.ticket == ticket) {
                table.remove(&key);
            }
            out
        }
        .boxed()
        .shared();

        let fetch = CategoryFetch { id: id.to_string(), ticket, inner };
        table.insert(
            id.to_string(),
            Inflight { ticket, handle, fetch: fetch.clone(), interest: 1 },
        );
        fetch
    }

    /// Drops one caller's interest in `fetch`. The request is cancelled once
    /// nobody is interested any more. Returns true if that happened.
    pub fn release(&self, fetch: &CategoryFetch) -> bool {
        let mut table = lock(&self.inflight);
        let Some(entry) = table.get_mut(&fetch.id) else {
            return false;
        };
        if entry.ticket != fetch.ticket {
            return false;
        }
        entry.interest = entry.interest.saturating_sub(1);
        if entry.interest > 0 {
            return false;
        }
        let cancelled = entry.handle.cancel();
        table.remove(&fetch.id);
        cancelled
    }

    /// Cancels the fetch for `id` regardless of how many callers wait on it.
    pub fn cancel(&self, id: &str) -> bool {
        match lock(&self.inflight).remove(id) {
            Some(entry) => entry.handle.cancel(),
            None => false,
        }
    }

    pub fn inflight_count(&self) -> usize {
        lock(&self.inflight)
            .values()
            .filter(|e| e.is_live())
            .count()
    }
}
