// ===============================
// src/domain.rs
// ===============================
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{FetchError, NavigationError, ParseEnumError};

/// Fixed listings page size, part of the query contract.
pub const PAGE_SIZE: usize = 20;

pub const ROOT_CATEGORY_NAME: &str = "All categories";

// ---- Categories ----

/// One node of the category tree.
///
/// `children == None` means nothing was materialized (the category may still
/// have subcategories server-side); `Some(vec![])` means the server confirmed
/// it is a leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryNode {
    id: String,
    name: String,
    path: String,
    listings_count: u64,
    children: Option<Vec<CategoryNode>>,
}

impl CategoryNode {
    pub(crate) fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<String>,
        listings_count: u64,
        children: Option<Vec<CategoryNode>>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: path.into(),
            listings_count,
            children,
        }
    }

    pub(crate) fn root(id: impl Into<String>) -> Self {
        Self::new(id, ROOT_CATEGORY_NAME, "", 0, None)
    }

    /// Stand-in for a category known only by id, until its fetch completes.
    pub(crate) fn placeholder(id: impl Into<String>) -> Self {
        Self::new(id, "", "", 0, None)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn listings_count(&self) -> u64 {
        self.listings_count
    }

    pub fn children(&self) -> Option<&[CategoryNode]> {
        self.children.as_deref()
    }

    pub fn child(&self, id: &str) -> Option<&CategoryNode> {
        self.children.as_ref()?.iter().find(|c| c.id == id)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.children.as_deref(), Some([]))
    }

    /// Same scalar fields, children dropped. `self` is untouched.
    pub fn copy_without_children(&self) -> CategoryNode {
        CategoryNode {
            id: self.id.clone(),
            name: self.name.clone(),
            path: self.path.clone(),
            listings_count: self.listings_count,
            children: None,
        }
    }
}

/// Chain of shallow nodes from the root to the selected category.
/// Never empty; ids are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryPath {
    nodes: Vec<CategoryNode>,
}

impl CategoryPath {
    pub fn new(root: &CategoryNode) -> Self {
        Self { nodes: vec![root.copy_without_children()] }
    }

    pub fn root(&self) -> &CategoryNode {
        &self.nodes[0]
    }

    pub fn current(&self) -> &CategoryNode {
        &self.nodes[self.nodes.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false; kept for the usual `len`/`is_empty` pairing.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_at_root(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CategoryNode> {
        self.nodes.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    pub(crate) fn push(&mut self, node: &CategoryNode) -> Result<(), NavigationError> {
        if self.contains(&node.id) {
            return Err(NavigationError::DuplicateId(node.id.clone()));
        }
        self.nodes.push(node.copy_without_children());
        Ok(())
    }

    /// Removes the tail. The root is never removed.
    pub(crate) fn pop(&mut self) -> Option<CategoryNode> {
        if self.is_at_root() {
            return None;
        }
        self.nodes.pop()
    }

    /// Refreshes the tail's scalar fields from a fetched node with the same id.
    pub(crate) fn refresh_current(&mut self, node: &CategoryNode) -> bool {
        let last = self.nodes.len() - 1;
        if self.nodes[last].id != node.id {
            return false;
        }
        self.nodes[last] = node.copy_without_children();
        true
    }
}

// ---- Listings query ----

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Condition {
    #[default]
    All,
    New,
    Used,
}

impl Condition {
    pub const ALL: [Condition; 3] = [Condition::All, Condition::New, Condition::Used];

    pub fn as_param(&self) -> &'static str {
        match self {
            Condition::All => "All",
            Condition::New => "New",
            Condition::Used => "Used",
        }
    }
}

impl FromStr for Condition {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "any" => Ok(Condition::All),
            "new" => Ok(Condition::New),
            "used" => Ok(Condition::Used),
            _ => Err(ParseEnumError { what: "condition", value: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum SortOrder {
    #[default]
    FeaturedFirst,
    LowestPrice,
    HighestPrice,
    LowestBuyNow,
    HighestBuyNow,
    MostBids,
    LatestListings,
    ClosingSoon,
    Title,
}

impl SortOrder {
    pub const ALL: [SortOrder; 9] = [
        SortOrder::FeaturedFirst,
        SortOrder::LowestPrice,
        SortOrder::HighestPrice,
        SortOrder::LowestBuyNow,
        SortOrder::HighestBuyNow,
        SortOrder::MostBids,
        SortOrder::LatestListings,
        SortOrder::ClosingSoon,
        SortOrder::Title,
    ];

    /// Value of the `sort_order` search parameter.
    pub fn as_param(&self) -> &'static str {
        match self {
            SortOrder::FeaturedFirst => "Default",
            SortOrder::LowestPrice => "PriceAsc",
            SortOrder::HighestPrice => "PriceDesc",
            SortOrder::LowestBuyNow => "BuyNowAsc",
            SortOrder::HighestBuyNow => "BuyNowDesc",
            SortOrder::MostBids => "BidsMost",
            SortOrder::LatestListings => "ExpiryDesc",
            SortOrder::ClosingSoon => "ExpiryAsc",
            SortOrder::Title => "TitleAsc",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortOrder::FeaturedFirst => "Featured first",
            SortOrder::LowestPrice => "Lowest price",
            SortOrder::HighestPrice => "Highest price",
            SortOrder::LowestBuyNow => "Lowest Buy Now",
            SortOrder::HighestBuyNow => "Highest Buy Now",
            SortOrder::MostBids => "Most bids",
            SortOrder::LatestListings => "Latest listings",
            SortOrder::ClosingSoon => "Closing soon",
            SortOrder::Title => "Title",
        }
    }
}

impl FromStr for SortOrder {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let found = match wanted.as_str() {
            "featured" | "featured_first" | "default" => Some(SortOrder::FeaturedFirst),
            "lowest_price" | "price_asc" => Some(SortOrder::LowestPrice),
            "highest_price" | "price_desc" => Some(SortOrder::HighestPrice),
            "lowest_buy_now" | "buynow_asc" => Some(SortOrder::LowestBuyNow),
            "highest_buy_now" | "buynow_desc" => Some(SortOrder::HighestBuyNow),
            "most_bids" | "bids" => Some(SortOrder::MostBids),
            "latest" | "latest_listings" => Some(SortOrder::LatestListings),
            "closing_soon" | "closing" => Some(SortOrder::ClosingSoon),
            "title" => Some(SortOrder::Title),
            _ => None,
        };
        found.ok_or_else(|| ParseEnumError { what: "sort order", value: s.to_string() })
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Filter/sort/page specification for one listings page.
///
/// Changing anything but `page` puts the query back on page 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ListingsQuery {
    category_id: String,
    search_string: String,
    condition: Condition,
    sort: SortOrder,
    page: u32,
}

impl ListingsQuery {
    pub fn new(category_id: impl Into<String>) -> Self {
        Self {
            category_id: category_id.into(),
            search_string: String::new(),
            condition: Condition::default(),
            sort: SortOrder::default(),
            page: 1,
        }
    }

    pub fn category_id(&self) -> &str {
        &self.category_id
    }

    pub fn search_string(&self) -> &str {
        &self.search_string
    }

    pub fn condition(&self) -> Condition {
        self.condition
    }

    pub fn sort(&self) -> SortOrder {
        self.sort
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    pub fn set_category_id(&mut self, category_id: impl Into<String>) {
        self.category_id = category_id.into();
        self.page = 1;
    }

    pub fn set_search_string(&mut self, search_string: impl Into<String>) {
        self.search_string = search_string.into();
        self.page = 1;
    }

    pub fn set_condition(&mut self, condition: Condition) {
        self.condition = condition;
        self.page = 1;
    }

    pub fn set_sort(&mut self, sort: SortOrder) {
        self.sort = sort;
        self.page = 1;
    }

    /// Pages are 1-based; 0 is clamped to 1.
    pub fn set_page(&mut self, page: u32) {
        self.page = page.max(1);
    }

    pub fn with_search_string(mut self, search_string: impl Into<String>) -> Self {
        self.set_search_string(search_string);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.set_condition(condition);
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.set_sort(sort);
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.set_page(page);
        self
    }
}

// ---- Listings result ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingItem {
    pub id: u64,
    pub title: String,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingsResult {
    pub total_count: u64,
    pub items: Vec<ListingItem>,
    pub fetched_at: DateTime<Utc>,
}

impl ListingsResult {
    pub fn page_count(&self) -> u32 {
        let pages = self.total_count.div_ceil(PAGE_SIZE as u64);
        u32::try_from(pages).unwrap_or(u32::MAX)
    }

    pub fn item(&self, id: u64) -> Option<&ListingItem> {
        self.items.iter().find(|i| i.id == id)
    }
}

/// Raw image bytes as downloaded; decoding is left to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image(Arc<[u8]>);

impl Image {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ThumbnailState {
    #[default]
    NotLoaded,
    Loading,
    Loaded(Image),
    Failed(FetchError),
}

// ---- Listing details ----

/// Free-form detail record; only `id` has a fixed meaning.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingDetails {
    pub id: u64,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl ListingDetails {
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }
}
