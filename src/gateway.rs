// ===============================
// src/gateway.rs
// ===============================
//
// Fetch gateway: one spawned task per request, a cancel handle per request.
//
// - request()  : (CancelHandle, Response), the Response is a future
// - dispatch() : posts the completion into an owning context's mailbox
//
// Once CancelHandle::cancel() has returned, the paired Response never yields
// a result and nothing is posted. Delivery and cancellation take the same
// lock, so there is no window between the two.
//
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::debug;

use crate::config::{ApiConfig, ApiMode};
use crate::domain::ListingsQuery;
use crate::error::{Cancelled, ConfigError, FetchError, FetchResult};
use crate::gateway_http::HttpTransport;
use crate::gateway_mock::MockTransport;
use crate::metrics::{CANCELLED, FETCHES, FETCH_LATENCY_MS};

/// Logical catalog endpoints. URL building is the transport's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Category { id: String },
    Listings(ListingsQuery),
    ListingDetails { id: u64 },
    Thumbnail { url: String },
}

impl Endpoint {
    pub fn label(&self) -> &'static str {
        match self {
            Endpoint::Category { .. } => "category",
            Endpoint::Listings(_) => "listings",
            Endpoint::ListingDetails { .. } => "details",
            Endpoint::Thumbnail { .. } => "thumbnail",
        }
    }
}

/// Decoded transport payload: JSON for API endpoints, bytes for images.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResponse {
    Json(Value),
    Bytes(Vec<u8>),
}

impl RawResponse {
    pub fn into_json(self) -> FetchResult<Value> {
        match self {
            RawResponse::Json(v) => Ok(v),
            RawResponse::Bytes(_) => Err(FetchError::invalid_data("expected a JSON body")),
        }
    }

    pub fn into_bytes(self) -> FetchResult<Vec<u8>> {
        match self {
            RawResponse::Bytes(b) => Ok(b),
            RawResponse::Json(_) => Err(FetchError::invalid_data("expected a binary body")),
        }
    }
}

/// Wire-level transport behind the gateway (HTTP or in-memory mock).
pub trait Transport: Send + Sync + 'static {
    fn send(&self, endpoint: Endpoint) -> BoxFuture<'static, FetchResult<RawResponse>>;
}

#[derive(Clone)]
pub struct FetchGateway {
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for FetchGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchGateway").finish_non_exhaustive()
    }
}

impl FetchGateway {
    pub fn new(transport: impl Transport) -> Self {
        Self { transport: Arc::new(transport) }
    }

    /// Picks the transport for the configured mode.
    pub fn from_config(cfg: &ApiConfig) -> Result<Self, ConfigError> {
        match cfg.mode {
            ApiMode::Mock => Ok(Self::new(MockTransport::new(cfg.mock_latency_ms))),
            ApiMode::Sandbox | ApiMode::Production => Ok(Self::new(HttpTransport::new(cfg)?)),
        }
    }

    /// Issues one request. Must be called from within a tokio runtime.
    /// Never retries.
    pub fn request(&self, endpoint: Endpoint) -> (CancelHandle, Response) {
        let (tx, rx) = oneshot::channel();
        let handle = CancelHandle::new(tx, endpoint.label());
        let label = endpoint.label();
        debug!(endpoint = ?endpoint, "fetch issued");

        let fut = self.transport.send(endpoint);
        let delivery = handle.clone();
        let started = Instant::now();
        let task = tokio::spawn(async move {
            let result = fut.await;
            let outcome = match &result {
                Ok(_) => "ok",
                Err(e) => e.kind().label(),
            };
            FETCHES.with_label_values(&[label, outcome]).inc();
            FETCH_LATENCY_MS
                .with_label_values(&[label])
                .observe(started.elapsed().as_secs_f64() * 1000.0);
            if !delivery.deliver(result) {
                debug!(endpoint = label, "completion suppressed, request was cancelled");
            }
        });
        handle.attach(task.abort_handle());

        let response = Response { rx, slot: Arc::clone(&handle.slot) };
        (handle, response)
    }

    /// Issues one request and posts `wrap(result)` into `mailbox` when it
    /// completes. Nothing is posted for a cancelled request.
    pub fn dispatch<M, F>(&self, endpoint: Endpoint, mailbox: mpsc::UnboundedSender<M>, wrap: F) -> CancelHandle
    where
        M: Send + 'static,
        F: FnOnce(FetchResult<RawResponse>) -> M + Send + 'static,
    {
        let (handle, response) = self.request(endpoint);
        let poster = handle.clone();
        tokio::spawn(async move {
            let Ok(result) = response.await else { return };
            let msg = wrap(result);
            let posted = poster.post_unless_cancelled(|| {
                // receiver gone: the owning context has shut down
                let _ = mailbox.send(msg);
            });
            if !posted {
                debug!(endpoint = poster.endpoint, "post suppressed, request was cancelled");
            }
        });
        handle
    }
}

struct Slot {
    reply: Option<oneshot::Sender<FetchResult<RawResponse>>>,
    abort: Option<AbortHandle>,
    cancelled: bool,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cancels one request. Cheap to clone; all clones act on the same request.
#[derive(Clone)]
pub struct CancelHandle {
    slot: Arc<Mutex<Slot>>,
    endpoint: &'static str,
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("endpoint", &self.endpoint)
            .field("pending", &self.is_pending())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelHandle {
    fn new(reply: oneshot::Sender<FetchResult<RawResponse>>, endpoint: &'static str) -> Self {
        let slot = Slot { reply: Some(reply), abort: None, cancelled: false };
        Self { slot: Arc::new(Mutex::new(slot)), endpoint }
    }

    fn attach(&self, abort: AbortHandle) {
        let mut slot = lock(&self.slot);
        if slot.cancelled {
            abort.abort();
        } else if slot.reply.is_some() {
            slot.abort = Some(abort);
        }
    }

    fn deliver(&self, result: FetchResult<RawResponse>) -> bool {
        let mut slot = lock(&self.slot);
        slot.abort = None;
        match slot.reply.take() {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Runs `post` under the slot lock unless the request was cancelled, so a
    /// `cancel()` either happens before the post or not at all.
    fn post_unless_cancelled(&self, post: impl FnOnce()) -> bool {
        let slot = lock(&self.slot);
        if slot.cancelled {
            return false;
        }
        post();
        true
    }

    /// Cancels the request. Returns true if it was still in flight.
    /// After this returns, the paired response never yields a result.
    pub fn cancel(&self) -> bool {
        let mut slot = lock(&self.slot);
        slot.cancelled = true;
        let was_pending = slot.reply.take().is_some();
        if let Some(abort) = slot.abort.take() {
            abort.abort();
        }
        if was_pending {
            CANCELLED.with_label_values(&[self.endpoint]).inc();
            debug!(endpoint = self.endpoint, "fetch cancelled");
        }
        was_pending
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.slot).cancelled
    }

    /// True until the transport has answered or the request was cancelled.
    pub fn is_pending(&self) -> bool {
        let slot = lock(&self.slot);
        !slot.cancelled && slot.reply.is_some()
    }
}

/// Future side of a request.
pub struct Response {
    rx: oneshot::Receiver<FetchResult<RawResponse>>,
    slot: Arc<Mutex<Slot>>,
}

impl Future for Response {
    type Output = Result<FetchResult<RawResponse>, Cancelled>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if lock(&self.slot).cancelled {
            return Poll::Ready(Err(Cancelled));
        }
        Pin::new(&mut self.rx).poll(cx).map(|r| r.map_err(|_| Cancelled))
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::FutureExt;
    use serde_json::json;

    use super::testing::Script;
    use super::*;
    use crate::error::FetchErrorKind;

    #[tokio::test]
    async fn response_carries_transport_result() {
        let (gateway, script) = Script::gateway();
        let (handle, response) = gateway.request(Endpoint::ListingDetails { id: 6215751 });
        assert!(handle.is_pending());
        assert_eq!(script.calls(), 1);

        script.respond_json(0, json!({ "ListingId": 6215751 }));
        let result = response.await.unwrap().unwrap();
        assert_eq!(result, RawResponse::Json(json!({ "ListingId": 6215751 })));
        assert!(!handle.is_pending());
    }

    #[tokio::test]
    async fn cancelled_request_never_yields() {
        let (gateway, script) = Script::gateway();
        let (handle, response) = gateway.request(Endpoint::Category { id: "0001".into() });

        assert!(handle.cancel());
        script.respond_json(0, json!({ "Number": "0001" }));
        assert_eq!(response.await, Err(Cancelled));
        assert!(!handle.cancel(), "second cancel is a no-op");
    }

    #[tokio::test]
    async fn cancel_after_delivery_still_suppresses() {
        let (gateway, script) = Script::gateway();
        let (handle, response) = gateway.request(Endpoint::Category { id: "0001".into() });

        script.respond_json(0, json!({ "Number": "0001" }));
        while handle.is_pending() {
            tokio::task::yield_now().await;
        }
        assert!(!handle.cancel());
        assert_eq!(response.await, Err(Cancelled));
    }

    #[tokio::test]
    async fn dispatch_posts_into_mailbox() {
        let (gateway, script) = Script::gateway();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _first = gateway.dispatch(Endpoint::ListingDetails { id: 1 }, tx.clone(), |r| (1, r));
        let second = gateway.dispatch(Endpoint::ListingDetails { id: 2 }, tx, |r| (2, r));
        second.cancel();

        script.fail(1, FetchErrorKind::Network);
        script.fail(0, FetchErrorKind::RateLimited);

        let (tag, result) = rx.recv().await.unwrap();
        assert_eq!(tag, 1);
        assert_eq!(result.unwrap_err().kind(), FetchErrorKind::RateLimited);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(rx.try_recv().is_err(), "cancelled request must not post");
    }

    struct Immediate;

    impl Transport for Immediate {
        fn send(&self, _endpoint: Endpoint) -> BoxFuture<'static, FetchResult<RawResponse>> {
            futures_util::future::ready(Ok(RawResponse::Bytes(Vec::new()))).boxed()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn dispatch_never_posts_after_cancel_returns() {
        let gateway = FetchGateway::new(Immediate);
        let mut late = 0;
        for i in 0..500u64 {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let handle = gateway.dispatch(Endpoint::ListingDetails { id: i }, tx, |r| {
                std::thread::sleep(Duration::from_micros(200));
                r
            });
            std::thread::sleep(Duration::from_micros(i % 300));
            handle.cancel();

            // anything posted before cancel() returned is already queued
            let _ = rx.try_recv();
            // channel closes once the dispatch task is done
            if rx.recv().await.is_some() {
                late += 1;
            }
        }
        assert_eq!(late, 0, "posts delivered after cancel() returned");
    }
}
