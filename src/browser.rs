// ===============================
// src/browser.rs
// ===============================
//
// One hierarchical browsing context: CategoryPath + state for its tail.
//
// Owned by a single task. Fetch completions come back through the browser's
// own mailbox and are applied with apply()/settle() or inside run().
// Completions for an older ticket or a different tail are dropped.
//
use std::sync::Arc;

use ahash::AHashMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::category::{CategoryFetch, CategoryRepository};
use crate::domain::{CategoryNode, CategoryPath};
use crate::error::{FetchError, FetchResult, NavigationError};
use crate::metrics::{CATEGORY_LEVEL_HITS, STALE_COMPLETIONS};

#[derive(Debug, Clone, PartialEq)]
pub enum BrowseState {
    Idle,
    Loading { id: String },
    Loaded(Arc<CategoryNode>),
    Failed { id: String, error: FetchError },
}

#[derive(Debug)]
pub struct BrowseCompletion {
    ticket: u64,
    id: String,
    result: FetchResult<Arc<CategoryNode>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseIntent {
    Descend(String),
    Ascend,
    Refresh,
}

pub struct CategoryBrowser {
    repo: CategoryRepository,
    path: CategoryPath,
    // loaded node per id on the path, nothing else
    levels: AHashMap<String, Arc<CategoryNode>>,
    state_tx: watch::Sender<BrowseState>,
    path_tx: watch::Sender<CategoryPath>,
    ticket: u64,
    inflight: Option<(u64, CategoryFetch)>,
    tx: mpsc::UnboundedSender<BrowseCompletion>,
    rx: mpsc::UnboundedReceiver<BrowseCompletion>,
}

impl CategoryBrowser {
    pub fn new(repo: CategoryRepository) -> Self {
        let path = CategoryPath::new(&repo.root_category());
        let (state_tx, _) = watch::channel(BrowseState::Idle);
        let (path_tx, _) = watch::channel(path.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            repo,
            path,
            levels: AHashMap::new(),
            state_tx,
            path_tx,
            ticket: 0,
            inflight: None,
            tx,
            rx,
        }
    }

    pub fn path(&self) -> &CategoryPath {
        &self.path
    }

    pub fn state(&self) -> BrowseState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BrowseState> {
        self.state_tx.subscribe()
    }

    pub fn watch_path(&self) -> watch::Receiver<CategoryPath> {
        self.path_tx.subscribe()
    }

    /// Loaded node of the path tail, if any.
    pub fn current(&self) -> Option<Arc<CategoryNode>> {
        self.levels.get(self.path.current().id()).cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.inflight.is_some()
    }

    /// Fetches the tail unless it is already loaded. True if a fetch was issued.
    pub fn load(&mut self) -> bool {
        if let Some(node) = self.current() {
            self.state_tx.send_replace(BrowseState::Loaded(node));
            return false;
        }
        self.fetch_tail();
        true
    }

    pub fn refresh(&mut self) {
        self.fetch_tail();
    }

    pub fn descend(&mut self, child_id: &str) -> Result<(), NavigationError> {
        if self.path.contains(child_id) {
            return Err(NavigationError::DuplicateId(child_id.to_string()));
        }
        let parent_id = self.path.current().id().to_string();
        let child = match self.levels.get(&parent_id).and_then(|p| p.children().map(|_| p)) {
            Some(parent) => parent.child(child_id).cloned().ok_or_else(|| {
                NavigationError::UnknownChild { parent: parent_id.clone(), child: child_id.to_string() }
            })?,
            // parent never loaded, id comes from outside
            None => CategoryNode::placeholder(child_id),
        };

        self.path.push(&child)?;
        self.path_tx.send_replace(self.path.clone());
        debug!(from = %parent_id, to = %child_id, depth = self.path.len(), "descend");
        self.fetch_tail();
        Ok(())
    }

    /// Pops the tail. The parent is restored from the level cache when it was
    /// loaded before. False at the root.
    pub fn ascend(&mut self) -> bool {
        if self.path.is_at_root() {
            return false;
        }
        self.cancel_inflight();
        // invalidates completions already queued for the popped tail
        self.ticket += 1;
        if let Some(popped) = self.path.pop() {
            self.levels.remove(popped.id());
        }
        self.path_tx.send_replace(self.path.clone());

        match self.current() {
            Some(node) => {
                CATEGORY_LEVEL_HITS.inc();
                debug!(category_id = %node.id(), "ascend served from level cache");
                self.state_tx.send_replace(BrowseState::Loaded(node));
            }
            None => self.fetch_tail(),
        }
        true
    }

    fn cancel_inflight(&mut self) {
        if let Some((_, fetch)) = self.inflight.take() {
            self.repo.release(&fetch);
        }
    }

    fn fetch_tail(&mut self) {
        self.cancel_inflight();
        self.ticket += 1;
        let ticket = self.ticket;
        let id = self.path.current().id().to_string();
        self.state_tx.send_replace(BrowseState::Loading { id: id.clone() });

        let fetch = self.repo.fetch_category(&id);
        let waiter = fetch.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if let Ok(result) = waiter.await {
                let _ = tx.send(BrowseCompletion { ticket, id, result });
            }
        });
        self.inflight = Some((ticket, fetch));
    }

    /// Applies one completion. False if it was stale.
    pub fn apply(&mut self, completion: BrowseCompletion) -> bool {
        let BrowseCompletion { ticket, id, result } = completion;
        if ticket != self.ticket || id != self.path.current().id() {
            STALE_COMPLETIONS.with_label_values(&["category"]).inc();
            debug!(category_id = %id, ticket, current = self.ticket, "stale category completion dropped");
            return false;
        }
        self.inflight = None;

        match result {
            Ok(node) => {
                self.path.refresh_current(&node);
                self.path_tx.send_replace(self.path.clone());
                self.levels.insert(id, Arc::clone(&node));
                info!(
                    category_id = %node.id(),
                    name = %node.name(),
                    children = node.children().map_or(0, <[CategoryNode]>::len),
                    "category loaded"
                );
                self.state_tx.send_replace(BrowseState::Loaded(node));
            }
            Err(error) => {
                warn!(category_id = %id, kind = error.kind().label(), detail = ?error.detail(), "category fetch failed");
                self.state_tx.send_replace(BrowseState::Failed { id, error });
            }
        }
        true
    }

    /// Waits for and applies the next completion. None when nothing is pending.
    pub async fn settle(&mut self) -> Option<bool> {
        if let Some(applied) = self.try_settle() {
            return Some(applied);
        }
        self.inflight.as_ref()?;
        let completion = self.rx.recv().await?;
        Some(self.apply(completion))
    }

    pub fn try_settle(&mut self) -> Option<bool> {
        let completion = self.rx.try_recv().ok()?;
        Some(self.apply(completion))
    }

    /// Actor loop: UI intents in, completions applied as they arrive.
    /// Returns the browser once the intent channel closes.
    pub async fn run(mut self, mut intents: mpsc::Receiver<BrowseIntent>) -> Self {
        loop {
            tokio::select! {
                intent = intents.recv() => {
                    let Some(intent) = intent else { break };
                    match intent {
                        BrowseIntent::Descend(id) => {
                            if let Err(e) = self.descend(&id) {
                                warn!(error = %e, "descend rejected");
                            }
                        }
                        BrowseIntent::Ascend => {
                            self.ascend();
                        }
                        BrowseIntent::Refresh => self.refresh(),
                    }
                }
                Some(completion) = self.rx.recv() => {
                    self.apply(completion);
                }
            }
        }
        self.cancel_inflight();
        self
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::error::FetchErrorKind;
    use crate::gateway::testing::Script;
    use crate::gateway::Endpoint;

    fn browser() -> (CategoryBrowser, Script) {
        let (gateway, script) = Script::gateway();
        (CategoryBrowser::new(CategoryRepository::new(gateway, "0")), script)
    }

    fn root_json() -> serde_json::Value {
        json!({
            "Number": "", "Name": "All categories", "Path": "", "Count": 176,
            "Subcategories": [
                { "Number": "0001", "Name": "Cars", "Path": "/Cars", "Count": 120 },
                { "Number": "0002", "Name": "Computers", "Path": "/Computers", "Count": 56 }
            ]
        })
    }

    fn cars_json() -> serde_json::Value {
        json!({ "Number": "0001", "Name": "Cars", "Path": "/Cars", "Count": 120, "Subcategories": [] })
    }

    #[tokio::test]
    async fn descend_from_unloaded_root() {
        let (mut b, script) = browser();
        b.descend("0001").unwrap();
        assert_eq!(b.state(), BrowseState::Loading { id: "0001".into() });
        assert_eq!(script.endpoint(0), Endpoint::Category { id: "0001".into() });

        script.respond_json(0, cars_json());
        assert_eq!(b.settle().await, Some(true));

        assert_eq!(b.path().ids(), vec!["0", "0001"]);
        let tail = b.path().current();
        assert_eq!((tail.name(), tail.path(), tail.listings_count()), ("Cars", "/Cars", 120));
        assert!(tail.children().is_none());
        match b.state() {
            BrowseState::Loaded(node) => assert!(node.is_leaf()),
            other => panic!("expected Loaded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ascend_restores_parent_without_fetch() {
        let (mut b, script) = browser();
        assert!(b.load());
        script.respond_json(0, root_json());
        assert_eq!(b.settle().await, Some(true));
        assert!(!b.load(), "already loaded");

        b.descend("0001").unwrap();
        script.respond_json(1, cars_json());
        b.settle().await;

        assert!(b.ascend());
        assert_eq!(script.calls(), 2);
        assert_eq!(b.path().ids(), vec!["0"]);
        match b.state() {
            BrowseState::Loaded(node) => assert_eq!(node.children().unwrap().len(), 2),
            other => panic!("expected Loaded root, got {other:?}"),
        }
        assert!(!b.ascend(), "root is never popped");
    }

    #[tokio::test]
    async fn rejected_navigation() {
        let (mut b, script) = browser();
        b.load();
        script.respond_json(0, root_json());
        b.settle().await;

        assert_eq!(b.descend("0"), Err(NavigationError::DuplicateId("0".into())));
        assert_eq!(
            b.descend("9999"),
            Err(NavigationError::UnknownChild { parent: "0".into(), child: "9999".into() })
        );
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test]
    async fn ascend_while_loading_drops_completion() {
        let (mut b, script) = browser();
        b.load();
        script.respond_json(0, root_json());
        b.settle().await;

        b.descend("0002").unwrap();
        assert!(b.ascend());
        script.respond_json(1, cars_json());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(b.try_settle(), None);
        assert_eq!(b.settle().await, None, "nothing pending after ascend");
        assert_eq!(b.path().ids(), vec!["0"]);
        assert!(matches!(b.state(), BrowseState::Loaded(n) if n.id() == "0"));
    }

    #[tokio::test]
    async fn descend_while_loading_drops_parent_completion() {
        let (mut b, script) = browser();
        b.load();
        script.respond_json(0, root_json());
        b.settle().await;

        b.descend("0001").unwrap();
        b.descend("0001-0268").unwrap();
        assert_eq!(script.calls(), 3);
        assert_eq!(script.endpoint(2), Endpoint::Category { id: "0001-0268".into() });

        // parent answers late
        script.respond_json(1, cars_json());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(b.try_settle(), None);
        assert_eq!(b.state(), BrowseState::Loading { id: "0001-0268".into() });

        script.respond_json(
            2,
            json!({ "Number": "0001-0268", "Name": "Motorbikes", "Path": "/Cars/Motorbikes", "Count": 9, "Subcategories": [] }),
        );
        assert_eq!(b.settle().await, Some(true));
        assert_eq!(b.path().ids(), vec!["0", "0001", "0001-0268"]);
        assert!(matches!(b.state(), BrowseState::Loaded(n) if n.name() == "Motorbikes"));
        assert!(b.levels.get("0001").is_none(), "parent result never cached");
    }

    #[tokio::test]
    async fn stale_ticket_is_dropped() {
        let (mut b, script) = browser();
        b.refresh();
        b.refresh();
        assert_eq!(script.calls(), 2, "second refresh cancels the first and refetches");

        let old = BrowseCompletion {
            ticket: 1,
            id: "0".into(),
            result: Err(FetchError::new(FetchErrorKind::Network)),
        };
        assert!(!b.apply(old));
        assert!(matches!(b.state(), BrowseState::Loading { .. }));

        script.fail(1, FetchErrorKind::RateLimited);
        assert_eq!(b.settle().await, Some(true));
        match b.state() {
            BrowseState::Failed { id, error } => {
                assert_eq!(id, "0");
                assert_eq!(error.kind(), FetchErrorKind::RateLimited);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_loop_applies_intents() {
        let (b, script) = browser();
        let mut states = b.subscribe();
        let (tx, rx) = mpsc::channel(8);
        let actor = tokio::spawn(b.run(rx));

        tx.send(BrowseIntent::Descend("0001".into())).await.unwrap();
        states.wait_for(|s| matches!(s, BrowseState::Loading { .. })).await.unwrap();
        script.respond_json(0, cars_json());
        states.wait_for(|s| matches!(s, BrowseState::Loaded(_))).await.unwrap();

        drop(tx);
        let b = actor.await.unwrap();
        assert_eq!(b.path().ids(), vec!["0", "0001"]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Descend(u8),
        Ascend,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(0u8..5).prop_map(Op::Descend), Just(Op::Ascend)]
    }

    proptest! {
        #[test]
        fn root_stays_first(ops in prop::collection::vec(op(), 0..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let (mut b, _script) = browser();
                for op in ops {
                    match op {
                        Op::Descend(n) => {
                            let _ = b.descend(&format!("{n:04}"));
                        }
                        Op::Ascend => {
                            b.ascend();
                        }
                    }
                    let ids = b.path().ids();
                    prop_assert_eq!(ids[0], "0");
                    let mut unique = ids.clone();
                    unique.sort_unstable();
                    unique.dedup();
                    prop_assert_eq!(unique.len(), ids.len());
                }
                Ok(())
            })?;
        }
    }
}
