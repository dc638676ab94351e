// ===============================
// src/wire.rs
// ===============================
//
// Wire models for the catalog REST API and their mapping into domain types.
// Field names follow the API (PascalCase JSON). The same structs are
// serialized by the mock transport, so both directions stay in sync.
//
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::domain::{CategoryNode, Image, ListingDetails, ListingItem, ListingsResult, PAGE_SIZE};
use crate::error::{FetchError, FetchResult};
use crate::gateway::RawResponse;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CategoryWire {
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_leaf: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategories: Option<Vec<CategoryWire>>,
}

impl CategoryWire {
    /// Node for the requested category, one level of children materialized.
    /// The root answers with an empty `Number`, so the node always carries
    /// the id it was requested by.
    fn into_node(self, requested_id: &str) -> CategoryNode {
        let children = self
            .subcategories
            .unwrap_or_default()
            .into_iter()
            .map(CategoryWire::into_child)
            .collect();
        CategoryNode::new(
            requested_id,
            self.name,
            self.path,
            self.count.unwrap_or(0),
            Some(children),
        )
    }

    fn into_child(self) -> CategoryNode {
        let children = match self.is_leaf {
            Some(true) => Some(Vec::new()),
            _ => None,
        };
        CategoryNode::new(self.number, self.name, self.path, self.count.unwrap_or(0), children)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListingsWire {
    pub total_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub list: Vec<ListingWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListingWire {
    pub listing_id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture_href: Option<String>,
}

fn decode<T: DeserializeOwned>(raw: RawResponse, what: &str) -> FetchResult<T> {
    let value = raw.into_json()?;
    serde_json::from_value(value)
        .map_err(|e| FetchError::invalid_data(format!("malformed {what} payload: {e}")))
}

pub fn category_from_raw(requested_id: &str, raw: RawResponse) -> FetchResult<CategoryNode> {
    let wire: CategoryWire = decode(raw, "category")?;
    Ok(wire.into_node(requested_id))
}

pub fn listings_from_raw(raw: RawResponse) -> FetchResult<ListingsResult> {
    let wire: ListingsWire = decode(raw, "listings")?;
    let mut items: Vec<ListingItem> = wire
        .list
        .into_iter()
        .map(|l| ListingItem {
            id: l.listing_id,
            title: l.title,
            thumbnail_url: l.picture_href.filter(|u| !u.is_empty()),
        })
        .collect();
    if items.len() > PAGE_SIZE {
        warn!(received = items.len(), page_size = PAGE_SIZE, "listings page too long, truncating");
        items.truncate(PAGE_SIZE);
    }
    Ok(ListingsResult {
        total_count: wire.total_count,
        items,
        fetched_at: Utc::now(),
    })
}

pub fn details_from_raw(raw: RawResponse) -> FetchResult<ListingDetails> {
    let value = raw.into_json()?;
    let Value::Object(fields) = value else {
        return Err(FetchError::invalid_data("listing details is not an object"));
    };
    let id = fields
        .get("ListingId")
        .and_then(Value::as_u64)
        .ok_or_else(|| FetchError::invalid_data("listing details without ListingId"))?;
    Ok(ListingDetails { id, fields })
}

pub fn image_from_raw(raw: RawResponse) -> FetchResult<Image> {
    let bytes = raw.into_bytes()?;
    if bytes.is_empty() {
        return Err(FetchError::invalid_data("empty image body"));
    }
    Ok(Image::new(bytes))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::error::FetchErrorKind;

    #[test]
    fn category_children_are_shallow_or_confirmed_leaves() {
        let raw = RawResponse::Json(json!({
            "Number": "0001",
            "Name": "Cars",
            "Path": "/Cars",
            "Count": 120,
            "Subcategories": [
                { "Number": "0001-0268", "Name": "Motorbikes", "Path": "/Cars/Motorbikes", "Count": 80 },
                { "Number": "0001-0270", "Name": "Parts", "Path": "/Cars/Parts", "Count": 40, "IsLeaf": true,
                  "Subcategories": [ { "Number": "x", "Name": "ignored" } ] }
            ]
        }));
        let node = category_from_raw("0001", raw).unwrap();

        assert_eq!(node.name(), "Cars");
        assert_eq!(node.listings_count(), 120);
        let children = node.children().unwrap();
        assert_eq!(children.len(), 2);
        assert!(children[0].children().is_none());
        assert!(children[1].is_leaf());
    }

    #[test]
    fn category_without_subcategories_is_leaf() {
        let raw = RawResponse::Json(json!({
            "Number": "0001", "Name": "Cars", "Path": "/Cars", "Count": 120, "Subcategories": []
        }));
        assert!(category_from_raw("0001", raw).unwrap().is_leaf());

        let raw = RawResponse::Json(json!({ "Number": "0002", "Name": "Boats", "Path": "/Boats" }));
        assert!(category_from_raw("0002", raw).unwrap().is_leaf());
    }

    #[test]
    fn root_keeps_requested_id() {
        let raw = RawResponse::Json(json!({ "Number": "", "Name": "Root", "Path": "", "Subcategories": [] }));
        assert_eq!(category_from_raw("0", raw).unwrap().id(), "0");
    }

    #[test]
    fn listings_map_and_truncate() {
        let list: Vec<Value> = (0..25)
            .map(|i| json!({ "ListingId": 6215751 + i, "Title": format!("Pro1 OMEGA {i:04}"), "PictureHref": "" }))
            .collect();
        let raw = RawResponse::Json(json!({ "TotalCount": 32, "List": list }));
        let result = listings_from_raw(raw).unwrap();

        assert_eq!(result.total_count, 32);
        assert_eq!(result.items.len(), PAGE_SIZE);
        assert_eq!(result.items[0].id, 6215751);
        assert_eq!(result.items[0].thumbnail_url, None);
    }

    #[test]
    fn wrong_shape_is_invalid_data_format() {
        let raw = RawResponse::Json(json!({ "List": "nope" }));
        let err = listings_from_raw(raw).unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::InvalidDataFormat);

        let raw = RawResponse::Json(json!({ "Title": "no id" }));
        assert_eq!(details_from_raw(raw).unwrap_err().kind(), FetchErrorKind::InvalidDataFormat);
    }

    #[test]
    fn details_keep_all_fields() {
        let raw = RawResponse::Json(json!({ "ListingId": 6215751, "Title": "Pro1 OMEGA 0025", "Bids": 3 }));
        let details = details_from_raw(raw).unwrap();
        assert_eq!(details.id, 6215751);
        assert_eq!(details.get_str("Title"), Some("Pro1 OMEGA 0025"));
        assert_eq!(details.get("Bids"), Some(&json!(3)));
    }
}
