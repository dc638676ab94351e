// ===============================
// src/thumbnails.rs
// ===============================
use ahash::{AHashMap, AHashSet};
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::{Image, ThumbnailState};
use crate::error::FetchResult;
use crate::gateway::CancelHandle;
use crate::metrics::{STALE_COMPLETIONS, THUMBNAILS};

/// Broadcast on every state change of one item's thumbnail.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailUpdate {
    pub item_id: u64,
    pub state: ThumbnailState,
}

#[derive(Debug)]
struct Entry {
    state: ThumbnailState,
    ticket: u64,
    handle: Option<CancelHandle>,
}

/// Per-item thumbnail state for one listings session. Missing entry means
/// `NotLoaded`.
#[derive(Debug)]
pub struct ThumbnailCache {
    entries: AHashMap<u64, Entry>,
    next_ticket: u64,
    updates: broadcast::Sender<ThumbnailUpdate>,
}

impl Default for ThumbnailCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ThumbnailCache {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(256);
        Self { entries: AHashMap::new(), next_ticket: 0, updates }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ThumbnailUpdate> {
        self.updates.subscribe()
    }

    pub fn state(&self, item_id: u64) -> ThumbnailState {
        self.entries
            .get(&item_id)
            .map(|e| e.state.clone())
            .unwrap_or_default()
    }

    pub fn inflight_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.state == ThumbnailState::Loading)
            .count()
    }

    fn publish(&self, item_id: u64, state: ThumbnailState) {
        // no subscribers is fine
        let _ = self.updates.send(ThumbnailUpdate { item_id, state });
    }

    /// Marks `item_id` as loading and returns the ticket its completion must carry.
    pub(crate) fn start(&mut self, item_id: u64) -> u64 {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let previous = self.entries.insert(
            item_id,
            Entry { state: ThumbnailState::Loading, ticket, handle: None },
        );
        if let Some(handle) = previous.and_then(|e| e.handle) {
            handle.cancel();
        }
        self.publish(item_id, ThumbnailState::Loading);
        ticket
    }

    pub(crate) fn attach(&mut self, item_id: u64, ticket: u64, handle: CancelHandle) {
        match self.entries.get_mut(&item_id) {
            Some(entry) if entry.ticket == ticket && entry.state == ThumbnailState::Loading => {
                entry.handle = Some(handle);
            }
            _ => {
                handle.cancel();
            }
        }
    }

    /// Applies a finished load. False (and nothing changes) when the load was
    /// cancelled or superseded.
    pub(crate) fn complete(&mut self, item_id: u64, ticket: u64, result: FetchResult<Image>) -> bool {
        let Some(entry) = self.entries.get_mut(&item_id) else {
            STALE_COMPLETIONS.with_label_values(&["thumbnail"]).inc();
            return false;
        };
        if entry.ticket != ticket || entry.state != ThumbnailState::Loading {
            STALE_COMPLETIONS.with_label_values(&["thumbnail"]).inc();
            debug!(item_id, ticket, current = entry.ticket, "stale thumbnail completion dropped");
            return false;
        }

        entry.handle = None;
        entry.state = match result {
            Ok(image) => {
                THUMBNAILS.with_label_values(&["loaded"]).inc();
                ThumbnailState::Loaded(image)
            }
            Err(e) => {
                THUMBNAILS.with_label_values(&[e.kind().label()]).inc();
                debug!(item_id, kind = e.kind().label(), "thumbnail failed");
                ThumbnailState::Failed(e)
            }
        };
        let state = entry.state.clone();
        self.publish(item_id, state);
        true
    }

    /// Cancels an in-flight load; the item goes back to `NotLoaded`.
    pub(crate) fn cancel(&mut self, item_id: u64) -> bool {
        let loading = self
            .entries
            .get(&item_id)
            .is_some_and(|e| e.state == ThumbnailState::Loading);
        if !loading {
            return false;
        }
        if let Some(handle) = self.entries.remove(&item_id).and_then(|e| e.handle) {
            handle.cancel();
        }
        THUMBNAILS.with_label_values(&["cancelled"]).inc();
        self.publish(item_id, ThumbnailState::NotLoaded);
        true
    }

    /// Keeps entries for `ids` only; loads for the rest are cancelled. Every
    /// dropped item is published as `NotLoaded`.
    pub(crate) fn retain(&mut self, ids: &AHashSet<u64>) {
        let dropped: Vec<u64> = self
            .entries
            .keys()
            .copied()
            .filter(|id| !ids.contains(id))
            .collect();
        for id in dropped {
            let Some(entry) = self.entries.remove(&id) else { continue };
            if let Some(handle) = entry.handle {
                if handle.cancel() {
                    THUMBNAILS.with_label_values(&["cancelled"]).inc();
                }
            }
            self.publish(id, ThumbnailState::NotLoaded);
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            if let Some(handle) = entry.handle {
                handle.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::{FetchError, FetchErrorKind};

    #[test]
    fn lifecycle_and_updates() {
        let mut cache = ThumbnailCache::new();
        let mut updates = cache.subscribe();
        assert_eq!(cache.state(7), ThumbnailState::NotLoaded);

        let t = cache.start(7);
        assert_eq!(cache.inflight_count(), 1);
        assert!(cache.complete(7, t, Ok(Image::new(vec![1, 2, 3]))));
        assert_eq!(cache.state(7), ThumbnailState::Loaded(Image::new(vec![1, 2, 3])));

        assert_eq!(updates.try_recv().unwrap().state, ThumbnailState::Loading);
        assert_eq!(
            updates.try_recv().unwrap(),
            ThumbnailUpdate { item_id: 7, state: ThumbnailState::Loaded(Image::new(vec![1, 2, 3])) }
        );
    }

    #[test]
    fn superseded_and_cancelled_loads_are_ignored() {
        let mut cache = ThumbnailCache::new();
        let first = cache.start(7);
        assert!(cache.cancel(7));
        assert_eq!(cache.state(7), ThumbnailState::NotLoaded);
        assert!(!cache.complete(7, first, Ok(Image::new(vec![1]))));

        let second = cache.start(7);
        let third = cache.start(7);
        assert!(!cache.complete(7, second, Err(FetchError::new(FetchErrorKind::Network))));
        assert!(cache.complete(7, third, Err(FetchError::new(FetchErrorKind::Network))));
        assert!(matches!(cache.state(7), ThumbnailState::Failed(e) if e.kind() == FetchErrorKind::Network));
        assert!(!cache.cancel(7), "only loading entries can be cancelled");
    }

    #[test]
    fn retain_drops_missing_ids() {
        let mut cache = ThumbnailCache::new();
        let a = cache.start(1);
        cache.complete(1, a, Ok(Image::new(vec![9])));
        cache.start(2);
        cache.start(3);

        let keep: AHashSet<u64> = [1, 3].into_iter().collect();
        let mut updates = cache.subscribe();
        cache.retain(&keep);
        assert!(matches!(cache.state(1), ThumbnailState::Loaded(_)));
        assert_eq!(cache.state(2), ThumbnailState::NotLoaded);
        assert_eq!(cache.state(3), ThumbnailState::Loading);

        assert_eq!(
            updates.try_recv().unwrap(),
            ThumbnailUpdate { item_id: 2, state: ThumbnailState::NotLoaded }
        );
        assert!(updates.try_recv().is_err(), "kept items publish nothing");
    }
}
