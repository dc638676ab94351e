// ===============================
// src/lib.rs
// ===============================
pub mod browser;
pub mod category;
pub mod config;
pub mod details;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod gateway_http;  // marketplace REST (reqwest)
pub mod gateway_mock;  // offline marketplace
pub mod listings;
pub mod metrics;
pub mod thumbnails;
pub mod wire;

pub use browser::{BrowseIntent, BrowseState, CategoryBrowser};
pub use category::{CategoryFetch, CategoryRepository};
pub use details::{fetch_details, request_details, DetailsFetch};
pub use domain::{
    CategoryNode, CategoryPath, Condition, Image, ListingDetails, ListingItem, ListingsQuery,
    ListingsResult, SortOrder, ThumbnailState, PAGE_SIZE,
};
pub use error::{Cancelled, ConfigError, FetchError, FetchErrorKind, FetchResult, NavigationError};
pub use gateway::{CancelHandle, Endpoint, FetchGateway, RawResponse, Response, Transport};
pub use listings::{ListingsIntent, ListingsSession, SessionEvent, SessionState, ThumbnailRequest};
pub use thumbnails::{ThumbnailCache, ThumbnailUpdate};
