// ===============================
// src/details.rs
// ===============================
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tracing::warn;

use crate::domain::ListingDetails;
use crate::error::{Cancelled, FetchError, FetchResult};
use crate::gateway::{CancelHandle, Endpoint, FetchGateway, Response};
use crate::wire;

/// Pending listing details fetch. Nothing is cached.
pub struct DetailsFetch {
    listing_id: u64,
    response: Response,
}

impl Future for DetailsFetch {
    type Output = Result<FetchResult<ListingDetails>, Cancelled>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let listing_id = self.listing_id;
        Pin::new(&mut self.response).poll(cx).map(|out| {
            out.map(|r| {
                r.and_then(wire::details_from_raw).inspect_err(|e| {
                    warn!(listing_id, kind = e.kind().label(), detail = ?e.detail(), "details fetch failed");
                })
            })
        })
    }
}

pub fn request_details(gateway: &FetchGateway, listing_id: u64) -> (CancelHandle, DetailsFetch) {
    let (handle, response) = gateway.request(Endpoint::ListingDetails { id: listing_id });
    (handle, DetailsFetch { listing_id, response })
}

/// One-shot details fetch for callers that never cancel.
pub async fn fetch_details(gateway: &FetchGateway, listing_id: u64) -> FetchResult<ListingDetails> {
    let (_handle, fetch) = request_details(gateway, listing_id);
    fetch
        .await
        .unwrap_or_else(|Cancelled| Err(FetchError::network("request aborted")))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::error::FetchErrorKind;
    use crate::gateway::testing::Script;

    #[tokio::test]
    async fn details_are_free_form() {
        let (gateway, script) = Script::gateway();
        let (_h, fetch) = request_details(&gateway, 6215751);
        assert_eq!(script.endpoint(0), Endpoint::ListingDetails { id: 6215751 });
        script.respond_json(0, json!({ "ListingId": 6215751, "Title": "Pro1 OMEGA 0012", "BidCount": 4 }));

        let details = fetch.await.unwrap().unwrap();
        assert_eq!(details.id, 6215751);
        assert_eq!(details.get("BidCount"), Some(&json!(4)));
    }

    #[tokio::test]
    async fn errors_and_cancellation() {
        let (gateway, script) = Script::gateway();

        let (_h, fetch) = request_details(&gateway, 1);
        script.respond_json(0, json!(["not", "an", "object"]));
        assert_eq!(fetch.await.unwrap().unwrap_err().kind(), FetchErrorKind::InvalidDataFormat);

        let (handle, fetch) = request_details(&gateway, 2);
        handle.cancel();
        assert!(matches!(fetch.await, Err(Cancelled)));

        let pending = tokio::spawn({
            let gateway = gateway.clone();
            async move { fetch_details(&gateway, 3).await }
        });
        while script.calls() < 3 {
            tokio::task::yield_now().await;
        }
        script.fail(2, FetchErrorKind::PlannedOutage);
        assert_eq!(pending.await.unwrap().unwrap_err().kind(), FetchErrorKind::PlannedOutage);
    }
}
