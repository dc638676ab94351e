// ===============================
// src/listings.rs
// ===============================
//
// Listings session: one query, one result, one in-flight fetch at a time.
//
// Every query change is a single transition: cancel the previous fetch,
// bump the ticket, publish Loading(snapshot), dispatch. A completion is
// applied only when its ticket and snapshot are still current.
//
use std::sync::Arc;

use ahash::AHashSet;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::domain::{
    Condition, Image, ListingsQuery, ListingsResult, SortOrder, ThumbnailState,
};
use crate::error::{FetchError, FetchResult};
use crate::gateway::{CancelHandle, Endpoint, FetchGateway};
use crate::metrics::STALE_COMPLETIONS;
use crate::thumbnails::{ThumbnailCache, ThumbnailUpdate};
use crate::wire;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Loading { query: ListingsQuery },
    Loaded { query: ListingsQuery, result: Arc<ListingsResult> },
    Failed { query: ListingsQuery, error: FetchError },
}

impl SessionState {
    pub fn result(&self) -> Option<&Arc<ListingsResult>> {
        match self {
            SessionState::Loaded { result, .. } => Some(result),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum Completion {
    Listings {
        ticket: u64,
        query: ListingsQuery,
        result: FetchResult<ListingsResult>,
    },
    Thumbnail {
        item_id: u64,
        ticket: u64,
        result: FetchResult<Image>,
    },
}

/// What applying a completion changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Listings,
    Thumbnail(u64),
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailRequest {
    Started,
    AlreadyLoading,
    AlreadyLoaded,
    NoThumbnail,
    UnknownItem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingsIntent {
    SetCategory(String),
    SetSearch(String),
    SetCondition(Condition),
    SetSort(SortOrder),
    SetPage(u32),
    Reload,
    LoadThumbnail(u64),
    CancelThumbnail(u64),
}

pub struct ListingsSession {
    gateway: FetchGateway,
    query: ListingsQuery,
    ticket: u64,
    inflight: Option<CancelHandle>,
    state_tx: watch::Sender<SessionState>,
    thumbnails: ThumbnailCache,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl ListingsSession {
    /// Idle session; nothing is fetched until the first change or `reload()`.
    pub fn new(gateway: FetchGateway, query: ListingsQuery) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            gateway,
            query,
            ticket: 0,
            inflight: None,
            state_tx,
            thumbnails: ThumbnailCache::new(),
            tx,
            rx,
        }
    }

    pub fn query(&self) -> &ListingsQuery {
        &self.query
    }

    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn thumbnail_updates(&self) -> broadcast::Receiver<ThumbnailUpdate> {
        self.thumbnails.subscribe()
    }

    pub fn thumbnail_state(&self, item_id: u64) -> ThumbnailState {
        self.thumbnails.state(item_id)
    }

    pub fn is_loading(&self) -> bool {
        self.inflight.is_some()
    }

    pub fn set_category_id(&mut self, category_id: impl Into<String>) {
        let category_id = category_id.into();
        self.update(|q| q.set_category_id(category_id));
    }

    pub fn set_search_string(&mut self, search_string: impl Into<String>) {
        let search_string = search_string.into();
        self.update(|q| q.set_search_string(search_string));
    }

    pub fn set_condition(&mut self, condition: Condition) {
        self.update(|q| q.set_condition(condition));
    }

    pub fn set_sort(&mut self, sort: SortOrder) {
        self.update(|q| q.set_sort(sort));
    }

    pub fn set_page(&mut self, page: u32) {
        self.update(|q| q.set_page(page));
    }

    /// Applies several field changes as one transition (one fetch).
    pub fn update(&mut self, change: impl FnOnce(&mut ListingsQuery)) {
        change(&mut self.query);
        self.commit();
    }

    pub fn replace_query(&mut self, query: ListingsQuery) {
        self.query = query;
        self.commit();
    }

    /// Refetches the current query, e.g. after a failure.
    pub fn reload(&mut self) {
        self.commit();
    }

    fn commit(&mut self) {
        if let Some(handle) = self.inflight.take() {
            if handle.cancel() {
                debug!(ticket = self.ticket, "superseded listings fetch cancelled");
            }
        }
        self.ticket += 1;
        let ticket = self.ticket;
        let snapshot = self.query.clone();
        self.state_tx.send_replace(SessionState::Loading { query: snapshot.clone() });

        let handle = self.gateway.dispatch(
            Endpoint::Listings(snapshot.clone()),
            self.tx.clone(),
            move |raw| Completion::Listings {
                ticket,
                query: snapshot,
                result: raw.and_then(wire::listings_from_raw),
            },
        );
        self.inflight = Some(handle);
    }

    pub fn apply(&mut self, completion: Completion) -> SessionEvent {
        match completion {
            Completion::Listings { ticket, query, result } => {
                if ticket != self.ticket || query != self.query {
                    STALE_COMPLETIONS.with_label_values(&["listings"]).inc();
                    debug!(ticket, current = self.ticket, "stale listings completion dropped");
                    return SessionEvent::Stale;
                }
                self.inflight = None;
                match result {
                    Ok(result) => {
                        let keep: AHashSet<u64> = result.items.iter().map(|i| i.id).collect();
                        self.thumbnails.retain(&keep);
                        info!(
                            category_id = %query.category_id(),
                            page = query.page(),
                            items = result.items.len(),
                            total = result.total_count,
                            "listings loaded"
                        );
                        self.state_tx.send_replace(SessionState::Loaded {
                            query,
                            result: Arc::new(result),
                        });
                    }
                    Err(error) => {
                        warn!(
                            category_id = %query.category_id(),
                            kind = error.kind().label(),
                            detail = ?error.detail(),
                            "listings fetch failed"
                        );
                        self.state_tx.send_replace(SessionState::Failed { query, error });
                    }
                }
                SessionEvent::Listings
            }
            Completion::Thumbnail { item_id, ticket, result } => {
                if self.thumbnails.complete(item_id, ticket, result) {
                    SessionEvent::Thumbnail(item_id)
                } else {
                    SessionEvent::Stale
                }
            }
        }
    }

    /// Starts loading the thumbnail of an item in the current result.
    pub fn request_thumbnail(&mut self, item_id: u64) -> ThumbnailRequest {
        let url = {
            let state = self.state_tx.borrow();
            let Some(item) = state.result().and_then(|r| r.item(item_id)) else {
                return ThumbnailRequest::UnknownItem;
            };
            match &item.thumbnail_url {
                Some(url) => url.clone(),
                None => return ThumbnailRequest::NoThumbnail,
            }
        };
        match self.thumbnails.state(item_id) {
            ThumbnailState::Loading => return ThumbnailRequest::AlreadyLoading,
            ThumbnailState::Loaded(_) => return ThumbnailRequest::AlreadyLoaded,
            ThumbnailState::NotLoaded | ThumbnailState::Failed(_) => {}
        }

        let ticket = self.thumbnails.start(item_id);
        let handle = self.gateway.dispatch(Endpoint::Thumbnail { url }, self.tx.clone(), move |raw| {
            Completion::Thumbnail { item_id, ticket, result: raw.and_then(wire::image_from_raw) }
        });
        self.thumbnails.attach(item_id, ticket, handle);
        ThumbnailRequest::Started
    }

    pub fn cancel_thumbnail(&mut self, item_id: u64) -> bool {
        self.thumbnails.cancel(item_id)
    }

    fn has_pending(&self) -> bool {
        self.inflight.is_some() || self.thumbnails.inflight_count() > 0
    }

    /// Waits for and applies the next completion. None when nothing is pending.
    pub async fn settle(&mut self) -> Option<SessionEvent> {
        if let Some(event) = self.try_settle() {
            return Some(event);
        }
        if !self.has_pending() {
            return None;
        }
        let completion = self.rx.recv().await?;
        Some(self.apply(completion))
    }

    pub fn try_settle(&mut self) -> Option<SessionEvent> {
        let completion = self.rx.try_recv().ok()?;
        Some(self.apply(completion))
    }

    /// Cancels everything in flight. The session keeps its last state.
    pub fn close(&mut self) {
        if let Some(handle) = self.inflight.take() {
            handle.cancel();
        }
        self.thumbnails.cancel_all();
    }

    pub async fn run(mut self, mut intents: mpsc::Receiver<ListingsIntent>) -> Self {
        loop {
            tokio::select! {
                intent = intents.recv() => {
                    let Some(intent) = intent else { break };
                    match intent {
                        ListingsIntent::SetCategory(id) => self.set_category_id(id),
                        ListingsIntent::SetSearch(s) => self.set_search_string(s),
                        ListingsIntent::SetCondition(c) => self.set_condition(c),
                        ListingsIntent::SetSort(s) => self.set_sort(s),
                        ListingsIntent::SetPage(p) => self.set_page(p),
                        ListingsIntent::Reload => self.reload(),
                        ListingsIntent::LoadThumbnail(id) => {
                            let outcome = self.request_thumbnail(id);
                            debug!(item_id = id, ?outcome, "thumbnail requested");
                        }
                        ListingsIntent::CancelThumbnail(id) => {
                            self.cancel_thumbnail(id);
                        }
                    }
                }
                Some(completion) = self.rx.recv() => {
                    self.apply(completion);
                }
            }
        }
        self.close();
        self
    }
}
