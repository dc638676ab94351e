// ===============================
// src/gateway_mock.rs
// ===============================
//
// In-memory marketplace for CATALOG_MODE=mock.
// Same wire shapes as the REST API, so the whole pipeline (wire mapping,
// error taxonomy, cancellation) runs offline. Latency is jittered around
// MOCK_LATENCY_MS.
//
use std::cmp::Reverse;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use once_cell::sync::Lazy;
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::domain::{Condition, ListingsQuery, SortOrder, PAGE_SIZE, ROOT_CATEGORY_NAME};
use crate::error::{FetchError, FetchErrorKind, FetchResult};
use crate::gateway::{Endpoint, RawResponse, Transport};
use crate::wire::{CategoryWire, ListingWire, ListingsWire};

pub const THUMBNAIL_SCHEME: &str = "mock://thumb/";
const FIRST_LISTING_ID: u64 = 6_215_740;

// (id, name, parent, listings generated directly in it)
const CATEGORIES: &[(&str, &str, Option<&str>, usize)] = &[
    ("0", ROOT_CATEGORY_NAME, None, 0),
    ("0001", "Cars", Some("0"), 0),
    ("0001-0268", "Motorbikes", Some("0001"), 9),
    ("0001-0268-0301", "Scooters", Some("0001-0268"), 14),
    ("0001-0270", "Car parts", Some("0001"), 33),
    ("0002", "Computers", Some("0"), 0),
    ("0002-0350", "Laptops", Some("0002"), 27),
    ("0002-0351", "Desktops", Some("0002"), 6),
    ("0003", "Home & living", Some("0"), 12),
    ("0003-0410", "Furniture", Some("0003"), 0),
];

const ADJECTIVES: &[&str] = &["Pro1 OMEGA", "Classic", "Vintage", "Compact", "Deluxe", "Turbo"];

#[derive(Debug, Clone)]
struct MockListing {
    id: u64,
    category: &'static str,
    title: String,
    price_cents: u64,
    buy_now_cents: u64,
    bids: u32,
    is_new: bool,
    featured: bool,
    closes_in_hours: i64,
    has_photo: bool,
}

static LISTINGS: Lazy<Vec<MockListing>> = Lazy::new(|| {
    let mut out = Vec::new();
    let mut id = FIRST_LISTING_ID;
    for &(cat, name, _, n) in CATEGORIES {
        for i in 0..n {
            let seed = id * 7919;
            out.push(MockListing {
                id,
                category: cat,
                title: format!("{} {} {:04}", ADJECTIVES[(seed % 6) as usize], name, i + 1),
                price_cents: 500 + (seed % 97) * 250,
                buy_now_cents: 900 + (seed % 89) * 300,
                bids: (seed % 13) as u32,
                is_new: id % 3 == 0,
                featured: id % 7 == 0,
                closes_in_hours: ((seed % 240) + 1) as i64,
                has_photo: id % 5 != 0,
            });
            id += 1;
        }
    }
    out
});

fn category(id: &str) -> Option<&'static (&'static str, &'static str, Option<&'static str>, usize)> {
    CATEGORIES.iter().find(|c| c.0 == id)
}

fn children_of(id: &str) -> impl Iterator<Item = &'static (&'static str, &'static str, Option<&'static str>, usize)> + '_ {
    CATEGORIES.iter().filter(move |c| c.2 == Some(id))
}

/// True when `cat` is `ancestor` or sits below it.
fn within(cat: &str, ancestor: &str) -> bool {
    let mut cur = Some(cat);
    while let Some(id) = cur {
        if id == ancestor {
            return true;
        }
        cur = category(id).and_then(|c| c.2);
    }
    false
}

fn category_path(id: &str) -> String {
    let mut names = Vec::new();
    let mut cur = category(id);
    while let Some(&(_, name, parent, _)) = cur {
        if parent.is_none() {
            break;
        }
        names.push(name);
        cur = parent.and_then(category);
    }
    names.iter().rev().map(|n| format!("/{n}")).collect()
}

fn subtree_count(id: &str) -> u64 {
    LISTINGS.iter().filter(|l| within(l.category, id)).count() as u64
}

fn not_found(what: &str) -> FetchError {
    FetchError::new(FetchErrorKind::InvalidRequest)
        .with_status(404)
        .with_detail(format!("{what} not found"))
}

fn to_json<T: Serialize>(wire: &T) -> FetchResult<RawResponse> {
    serde_json::to_value(wire)
        .map(RawResponse::Json)
        .map_err(|e| FetchError::invalid_data(e.to_string()))
}

fn category_response(id: &str) -> FetchResult<RawResponse> {
    let &(number, name, _, _) = category(id).ok_or_else(|| not_found(&format!("category {id}")))?;
    let subcategories = children_of(number)
        .map(|&(cid, cname, _, _)| CategoryWire {
            number: cid.to_string(),
            name: cname.to_string(),
            path: category_path(cid),
            count: Some(subtree_count(cid)),
            is_leaf: Some(children_of(cid).next().is_none()),
            subcategories: None,
        })
        .collect();
    to_json(&CategoryWire {
        number: number.to_string(),
        name: name.to_string(),
        path: category_path(number),
        count: Some(subtree_count(number)),
        is_leaf: None,
        subcategories: Some(subcategories),
    })
}

fn listings_response(query: &ListingsQuery) -> FetchResult<RawResponse> {
    if category(query.category_id()).is_none() {
        return Err(not_found(&format!("category {}", query.category_id())));
    }
    let needle = query.search_string().trim().to_lowercase();
    let mut hits: Vec<&MockListing> = LISTINGS
        .iter()
        .filter(|l| within(l.category, query.category_id()))
        .filter(|l| needle.is_empty() || l.title.to_lowercase().contains(&needle))
        .filter(|l| match query.condition() {
            Condition::All => true,
            Condition::New => l.is_new,
            Condition::Used => !l.is_new,
        })
        .collect();

    match query.sort() {
        SortOrder::FeaturedFirst => hits.sort_by_key(|l| (!l.featured, l.id)),
        SortOrder::LowestPrice => hits.sort_by_key(|l| (l.price_cents, l.id)),
        SortOrder::HighestPrice => hits.sort_by_key(|l| (Reverse(l.price_cents), l.id)),
        SortOrder::LowestBuyNow => hits.sort_by_key(|l| (l.buy_now_cents, l.id)),
        SortOrder::HighestBuyNow => hits.sort_by_key(|l| (Reverse(l.buy_now_cents), l.id)),
        SortOrder::MostBids => hits.sort_by_key(|l| (Reverse(l.bids), l.id)),
        SortOrder::LatestListings => hits.sort_by_key(|l| Reverse(l.id)),
        SortOrder::ClosingSoon => hits.sort_by_key(|l| (l.closes_in_hours, l.id)),
        SortOrder::Title => hits.sort_by(|a, b| a.title.cmp(&b.title)),
    }

    let total = hits.len() as u64;
    let skip = (query.page() as usize - 1).saturating_mul(PAGE_SIZE);
    let list = hits
        .into_iter()
        .skip(skip)
        .take(PAGE_SIZE)
        .map(|l| ListingWire {
            listing_id: l.id,
            title: l.title.clone(),
            picture_href: l.has_photo.then(|| format!("{THUMBNAIL_SCHEME}{}", l.id)),
        })
        .collect();

    to_json(&ListingsWire {
        total_count: total,
        page: Some(query.page()),
        page_size: Some(PAGE_SIZE as u32),
        list,
    })
}

fn listing(id: u64) -> FetchResult<&'static MockListing> {
    LISTINGS
        .iter()
        .find(|l| l.id == id)
        .ok_or_else(|| not_found(&format!("listing {id}")))
}

fn details_response(id: u64) -> FetchResult<RawResponse> {
    let l = listing(id)?;
    let closes = Utc::now() + chrono::Duration::hours(l.closes_in_hours);
    let mut v = json!({
        "ListingId": l.id,
        "Title": l.title,
        "Category": l.category,
        "CategoryPath": category_path(l.category),
        "StartPrice": l.price_cents as f64 / 100.0,
        "BuyNowPrice": l.buy_now_cents as f64 / 100.0,
        "PriceDisplay": format!("${:.2}", l.price_cents as f64 / 100.0),
        "BidCount": l.bids,
        "IsNew": l.is_new,
        "IsFeatured": l.featured,
        "EndDate": closes.to_rfc3339(),
        "Body": format!("{} in good order. Pick up or courier.", l.title),
    });
    if l.has_photo {
        v["PictureHref"] = Value::String(format!("{THUMBNAIL_SCHEME}{}", l.id));
    }
    Ok(RawResponse::Json(v))
}

fn thumbnail_response(url: &str) -> FetchResult<RawResponse> {
    let id = url
        .strip_prefix(THUMBNAIL_SCHEME)
        .ok_or_else(|| FetchError::invalid_request(format!("bad thumbnail url `{url}`")))?
        .parse::<u64>()
        .map_err(|_| FetchError::invalid_request(format!("bad thumbnail url `{url}`")))?;
    let l = listing(id)?;
    if !l.has_photo {
        return Err(not_found(&format!("photo for listing {id}")));
    }
    // fake JPEG SOI marker + id, enough for byte-level checks
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
    bytes.extend_from_slice(&id.to_be_bytes());
    Ok(RawResponse::Bytes(bytes))
}

/// Offline marketplace transport.
#[derive(Debug, Clone)]
pub struct MockTransport {
    latency_ms: u64,
}

impl MockTransport {
    pub fn new(latency_ms: u64) -> Self {
        Self { latency_ms }
    }

    fn respond(endpoint: &Endpoint) -> FetchResult<RawResponse> {
        match endpoint {
            Endpoint::Category { id } => category_response(id),
            Endpoint::Listings(query) => listings_response(query),
            Endpoint::ListingDetails { id } => details_response(*id),
            Endpoint::Thumbnail { url } => thumbnail_response(url),
        }
    }
}

impl Transport for MockTransport {
    fn send(&self, endpoint: Endpoint) -> BoxFuture<'static, FetchResult<RawResponse>> {
        // jangan simpan ThreadRng melewati .await
        let delay = if self.latency_ms == 0 {
            0
        } else {
            let lo = self.latency_ms / 2;
            rand::thread_rng().gen_range(lo..=self.latency_ms + lo)
        };
        async move {
            if delay > 0 {
                sleep(Duration::from_millis(delay)).await;
            }
            MockTransport::respond(&endpoint)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::wire::{category_from_raw, details_from_raw, image_from_raw, listings_from_raw};

    fn send(endpoint: Endpoint) -> FetchResult<RawResponse> {
        MockTransport::respond(&endpoint)
    }

    #[test]
    fn root_lists_top_level_categories() {
        let node = category_from_raw("0", send(Endpoint::Category { id: "0".into() }).unwrap()).unwrap();
        let ids: Vec<&str> = node.children().unwrap().iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec!["0001", "0002", "0003"]);
        assert_eq!(node.listings_count(), LISTINGS.len() as u64);
    }

    #[test]
    fn category_counts_cover_subtree() {
        let node =
            category_from_raw("0001", send(Endpoint::Category { id: "0001".into() }).unwrap()).unwrap();
        assert_eq!(node.name(), "Cars");
        assert_eq!(node.path(), "/Cars");
        assert_eq!(node.listings_count(), 9 + 14 + 33);

        let children = node.children().unwrap();
        let bikes = node.child("0001-0268").unwrap();
        assert!(bikes.children().is_none(), "has subcategories, left shallow");
        assert_eq!(bikes.path(), "/Cars/Motorbikes");
        assert!(children.iter().any(|c| c.id() == "0001-0270" && c.is_leaf()));
    }

    #[test]
    fn unknown_category_is_invalid_request() {
        let err = send(Endpoint::Category { id: "9999".into() }).unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::InvalidRequest);
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn listings_are_paged_and_filtered() {
        let q = ListingsQuery::new("0001");
        let page1 = listings_from_raw(send(Endpoint::Listings(q.clone())).unwrap()).unwrap();
        assert_eq!(page1.total_count, 56);
        assert_eq!(page1.items.len(), PAGE_SIZE);

        let page3 = listings_from_raw(send(Endpoint::Listings(q.clone().with_page(3))).unwrap()).unwrap();
        assert_eq!(page3.items.len(), 16);

        let used = listings_from_raw(
            send(Endpoint::Listings(q.clone().with_condition(Condition::Used))).unwrap(),
        )
        .unwrap();
        assert!(used.total_count < page1.total_count);

        let searched = listings_from_raw(
            send(Endpoint::Listings(q.with_search_string("scooters 0001"))).unwrap(),
        )
        .unwrap();
        assert_eq!(searched.total_count, 1);
    }

    #[test]
    fn lowest_price_sorts_ascending() {
        let q = ListingsQuery::new("0002").with_sort(SortOrder::LowestPrice);
        let result = listings_from_raw(send(Endpoint::Listings(q)).unwrap()).unwrap();
        let prices: Vec<u64> = result
            .items
            .iter()
            .map(|i| listing(i.id).unwrap().price_cents)
            .collect();
        assert!(prices.windows(2).all(|w| w[0] <= w[1]), "{prices:?}");
    }

    #[test]
    fn details_and_thumbnails_resolve() {
        let with_photo = LISTINGS.iter().find(|l| l.has_photo).unwrap();
        let details = details_from_raw(send(Endpoint::ListingDetails { id: with_photo.id }).unwrap()).unwrap();
        assert_eq!(details.id, with_photo.id);
        assert_eq!(details.get_str("Title"), Some(with_photo.title.as_str()));

        let url = format!("{THUMBNAIL_SCHEME}{}", with_photo.id);
        let image = image_from_raw(send(Endpoint::Thumbnail { url }).unwrap()).unwrap();
        assert_eq!(&image.as_bytes()[..2], &[0xFF, 0xD8]);

        let err = send(Endpoint::Thumbnail { url: "https://elsewhere/x.jpg".into() }).unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn transport_answers_after_latency() {
        let transport = MockTransport::new(5);
        let raw = transport.send(Endpoint::Category { id: "0003".into() }).await.unwrap();
        assert!(category_from_raw("0003", raw).unwrap().child("0003-0410").unwrap().is_leaf());
    }
}
