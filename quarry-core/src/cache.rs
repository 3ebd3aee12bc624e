//! Keyed cache of backend reads
//!
//! Every read the client performs is addressed by a [`ResourceKey`] and
//! stored as a [`CacheEntry`]. The store guarantees:
//!
//! - at most one entry, and at most one in-flight fetch, per key:
//!   concurrent callers coalesce onto the pending fetch and share its
//!   eventual result
//! - stale-while-revalidate: previously fetched data stays visible while
//!   a refresh is in flight; only entries that have never succeeded show
//!   `Loading` with no data
//! - a fetch dispatched before an invalidation can never overwrite data
//!   fetched after it: each invalidation bumps the entry's generation and
//!   responses carrying an older generation are discarded and re-fetched
//!
//! Change propagation is an explicit subscribe/notify channel. Views (or
//! pollers) hold a [`Subscription`] and await [`Subscription::changed`];
//! dropping the subscription unregisters it.
//!
//! Cached payloads are raw `serde_json::Value`s decoded at the edges,
//! which keeps the store monomorphic across resource types.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::urlstate::SearchState;

/// Future returned by a fetcher.
pub type FetchFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>;

/// Fetch closure registered per key, re-run on invalidation.
pub type Fetcher = Arc<dyn Fn() -> FetchFuture + Send + Sync>;

/// Wrap an async closure as a [`Fetcher`].
pub fn fetcher<F, Fut>(f: F) -> Fetcher
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

// ============================================
// Keys
// ============================================

/// Normalized address of a cacheable backend read.
///
/// Keys compare structurally: two searches for the same trimmed query
/// and tag set collapse to one key regardless of how the caller built
/// their filter map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    DocumentList,
    Document(String),
    Search { query: String, tags: Vec<String> },
    ConversationList,
    Conversation(String),
    AdminStats,
}

impl ResourceKey {
    /// Key for a search, normalized so equivalent requests collapse.
    pub fn search(state: &SearchState) -> Self {
        let normalized = state.normalized();
        let tags = normalized.selected_tags();
        ResourceKey::Search {
            query: normalized.query,
            tags,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceKey::DocumentList => ResourceKind::DocumentList,
            ResourceKey::Document(_) => ResourceKind::Document,
            ResourceKey::Search { .. } => ResourceKind::Search,
            ResourceKey::ConversationList => ResourceKind::ConversationList,
            ResourceKey::Conversation(_) => ResourceKind::Conversation,
            ResourceKey::AdminStats => ResourceKind::AdminStats,
        }
    }
}

/// Resource type of a key, for predicate-style invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    DocumentList,
    Document,
    Search,
    ConversationList,
    Conversation,
    AdminStats,
}

// ============================================
// Entries
// ============================================

/// Freshness of a cache entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheStatus {
    /// Created but never fetched
    #[default]
    Idle,
    /// First fetch in flight, no data yet
    Loading,
    /// Last fetch succeeded
    Success,
    /// Last fetch failed (previous data, if any, is still present)
    Error,
}

/// A snapshot of one cached read.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: ResourceKey,
    /// Most recently fetched payload; survives later fetch errors
    pub data: Option<serde_json::Value>,
    pub status: CacheStatus,
    /// Error from the most recent fetch, cleared on success
    pub error: Option<Error>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Set by invalidation until the next successful or failed re-fetch
    pub stale: bool,
    generation: u64,
}

impl CacheEntry {
    fn new(key: ResourceKey) -> Self {
        Self {
            key,
            data: None,
            status: CacheStatus::Idle,
            error: None,
            last_fetched_at: None,
            stale: false,
            generation: 0,
        }
    }

    fn apply(&mut self, result: Result<serde_json::Value>) {
        self.last_fetched_at = Some(Utc::now());
        self.stale = false;
        match result {
            Ok(value) => {
                self.data = Some(value);
                self.status = CacheStatus::Success;
                self.error = None;
            }
            Err(err) => {
                // previously fetched data stays visible next to the error
                self.status = CacheStatus::Error;
                self.error = Some(err);
            }
        }
    }

    /// Decode the cached payload, if any.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match &self.data {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Resolve to the freshest data, or the stored error when nothing
    /// has ever been fetched successfully.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T> {
        if let Some(value) = self.data {
            return serde_json::from_value(value).map_err(Into::into);
        }
        Err(self
            .error
            .unwrap_or_else(|| Error::Transport("no data fetched".to_string())))
    }
}

// ============================================
// Store
// ============================================

struct EntryState {
    entry: CacheEntry,
    /// Canonical fetcher, registered by the most recent query
    fetcher: Option<Fetcher>,
    in_flight: bool,
}

impl EntryState {
    fn new(key: ResourceKey) -> Self {
        Self {
            entry: CacheEntry::new(key),
            fetcher: None,
            in_flight: false,
        }
    }
}

struct StoreState {
    entries: HashMap<ResourceKey, EntryState>,
    /// Active subscription counts; kept outside the entries so removal
    /// of an entry does not lose its watchers
    watchers: HashMap<ResourceKey, usize>,
}

struct StoreInner {
    state: Mutex<StoreState>,
    events: broadcast::Sender<ResourceKey>,
}

/// The shared cache store; cheap to clone, one per application session.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

enum Begin {
    /// Entry is fresh, nothing to do
    Fresh(CacheEntry),
    /// We own the fetch dispatched at this generation
    Dispatched { generation: u64, snapshot: CacheEntry },
    /// Another caller's fetch is in flight
    InFlight(CacheEntry),
}

enum Applied {
    Done(CacheEntry),
    Superseded(u64),
    Removed,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState {
                    entries: HashMap::new(),
                    watchers: HashMap::new(),
                }),
                events,
            }),
        }
    }

    /// Current snapshot of a key, without triggering a fetch.
    pub fn peek(&self, key: &ResourceKey) -> Option<CacheEntry> {
        let state = self.inner.state.lock().unwrap();
        state.entries.get(key).map(|st| st.entry.clone())
    }

    /// Return the current entry immediately, dispatching a background
    /// fetch if the entry is absent, stale, or errored.
    ///
    /// Subscribers observe the fetch settling; callers that need the
    /// settled result use [`fetch`](Self::fetch) instead.
    pub fn query(&self, key: ResourceKey, fetcher: Fetcher) -> CacheEntry {
        match self.begin(&key, &fetcher, false) {
            Begin::Fresh(entry) | Begin::InFlight(entry) => entry,
            Begin::Dispatched {
                generation,
                snapshot,
            } => {
                let store = self.clone();
                tokio::spawn(async move {
                    store.drive(&key, &fetcher, generation).await;
                });
                snapshot
            }
        }
    }

    /// Fetch a key and wait until the fetch settles.
    ///
    /// If a fetch for the same key is already in flight the call attaches
    /// to it rather than dispatching a duplicate request, and both callers
    /// receive the same eventual result.
    pub async fn fetch(&self, key: ResourceKey, fetcher: Fetcher) -> CacheEntry {
        self.fetch_inner(key, fetcher, false).await
    }

    /// Re-fetch a key even if its entry is fresh, waiting for the result.
    ///
    /// Used by pollers: each tick revalidates. A fetch already in flight
    /// is joined instead of duplicated, so ticks can never pile up
    /// requests behind a slow backend.
    pub async fn refresh(&self, key: ResourceKey, fetcher: Fetcher) -> CacheEntry {
        self.fetch_inner(key, fetcher, true).await
    }

    async fn fetch_inner(&self, key: ResourceKey, fetcher: Fetcher, force: bool) -> CacheEntry {
        // Subscribe before inspecting state so a settle between the check
        // and the wait cannot be missed.
        let mut rx = self.inner.events.subscribe();
        // Only the first attempt is forced; re-attempts after a removal
        // dispatch anyway because the fresh entry is Idle.
        let mut force = force;

        loop {
            let force_now = force;
            force = false;

            match self.begin(&key, &fetcher, force_now) {
                Begin::Fresh(entry) => return entry,
                Begin::Dispatched { generation, .. } => {
                    match self.drive(&key, &fetcher, generation).await {
                        Some(entry) => return entry,
                        // Entry removed mid-flight; dispatch fresh
                        None => continue,
                    }
                }
                Begin::InFlight(_) => {
                    let settled = 'wait: loop {
                        match rx.recv().await {
                            Ok(k) if k == key => {}
                            Ok(_) => continue,
                            Err(broadcast::error::RecvError::Lagged(_)) => {}
                            Err(broadcast::error::RecvError::Closed) => break 'wait None,
                        }
                        let state = self.inner.state.lock().unwrap();
                        match state.entries.get(&key) {
                            // Removed while we waited; re-begin
                            None => break 'wait None,
                            Some(st) if !st.in_flight => break 'wait Some(st.entry.clone()),
                            Some(_) => {}
                        }
                    };
                    match settled {
                        Some(entry) => return entry,
                        None => continue,
                    }
                }
            }
        }
    }

    /// Mark one key stale, re-fetching it if it has active subscribers.
    pub fn invalidate(&self, key: &ResourceKey) {
        self.invalidate_where(|k| k == key);
    }

    /// Mark every key of a kind stale.
    pub fn invalidate_kind(&self, kind: ResourceKind) {
        self.invalidate_where(|k| k.kind() == kind);
    }

    /// Mark every key matching the predicate stale.
    ///
    /// Stale entries keep their data visible. Keys with active
    /// subscribers are re-fetched immediately using the fetcher their
    /// last query registered; for the rest the next query re-fetches.
    pub fn invalidate_where<F: Fn(&ResourceKey) -> bool>(&self, pred: F) {
        let mut touched = Vec::new();
        let mut refetch = Vec::new();
        {
            let mut state = self.inner.state.lock().unwrap();
            let StoreState { entries, watchers } = &mut *state;

            for (key, st) in entries.iter_mut() {
                if !pred(key) {
                    continue;
                }
                st.entry.stale = true;
                st.entry.generation += 1;
                touched.push(key.clone());

                let watched = watchers.get(key).copied().unwrap_or(0) > 0;
                if watched && !st.in_flight {
                    if let Some(fetcher) = &st.fetcher {
                        st.in_flight = true;
                        if st.entry.data.is_none() {
                            st.entry.status = CacheStatus::Loading;
                        }
                        refetch.push((key.clone(), fetcher.clone(), st.entry.generation));
                    }
                }
            }
        }

        for key in &touched {
            self.notify(key);
        }
        for (key, fetcher, generation) in refetch {
            let store = self.clone();
            tokio::spawn(async move {
                store.drive(&key, &fetcher, generation).await;
            });
        }
    }

    /// Drop an entry entirely (deleted resources).
    ///
    /// A fetch in flight for the key discards its result on arrival; the
    /// next fetch dispatches fresh and surfaces whatever the backend now
    /// says, typically a not-found error.
    pub fn remove(&self, key: &ResourceKey) {
        let removed = {
            let mut state = self.inner.state.lock().unwrap();
            state.entries.remove(key).is_some()
        };
        if removed {
            self.notify(key);
        }
    }

    /// Register interest in a key's changes.
    pub fn subscribe(&self, key: ResourceKey) -> Subscription {
        {
            let mut state = self.inner.state.lock().unwrap();
            *state.watchers.entry(key.clone()).or_insert(0) += 1;
        }
        Subscription {
            key,
            store: self.clone(),
            rx: self.inner.events.subscribe(),
        }
    }

    /// Mark a fetch as ours, or report why we cannot.
    ///
    /// `force` dispatches even when the entry is fresh (poller ticks);
    /// an in-flight fetch always wins over a forced dispatch.
    fn begin(&self, key: &ResourceKey, fetcher: &Fetcher, force: bool) -> Begin {
        let (generation, snapshot) = {
            let mut state = self.inner.state.lock().unwrap();
            let st = state
                .entries
                .entry(key.clone())
                .or_insert_with(|| EntryState::new(key.clone()));

            // The most recently registered fetcher is canonical
            st.fetcher = Some(fetcher.clone());

            if st.in_flight {
                return Begin::InFlight(st.entry.clone());
            }
            if !force && st.entry.status == CacheStatus::Success && !st.entry.stale {
                return Begin::Fresh(st.entry.clone());
            }

            st.in_flight = true;
            if st.entry.data.is_none() {
                st.entry.status = CacheStatus::Loading;
            }
            (st.entry.generation, st.entry.clone())
        };
        self.notify(key);
        Begin::Dispatched {
            generation,
            snapshot,
        }
    }

    /// Run the fetcher and apply its result in dispatch order.
    ///
    /// A result whose generation no longer matches the entry was
    /// invalidated while in flight: it is discarded (never surfaced) and
    /// the fetch re-dispatched, so the caller's resolution always
    /// reflects post-invalidation state. Returns None when the entry was
    /// removed mid-flight.
    async fn drive(
        &self,
        key: &ResourceKey,
        fetcher: &Fetcher,
        mut generation: u64,
    ) -> Option<CacheEntry> {
        loop {
            let result = fetcher().await;
            let applied = {
                let mut state = self.inner.state.lock().unwrap();
                match state.entries.get_mut(key) {
                    None => Applied::Removed,
                    Some(st) if st.entry.generation != generation => {
                        Applied::Superseded(st.entry.generation)
                    }
                    Some(st) => {
                        st.in_flight = false;
                        st.entry.apply(result);
                        Applied::Done(st.entry.clone())
                    }
                }
            };
            match applied {
                Applied::Done(entry) => {
                    self.notify(key);
                    return Some(entry);
                }
                Applied::Superseded(next) => {
                    tracing::debug!(key = ?key, "discarding response superseded by invalidation");
                    generation = next;
                }
                Applied::Removed => {
                    tracing::debug!(key = ?key, "discarding response for removed entry");
                    self.notify(key);
                    return None;
                }
            }
        }
    }

    fn notify(&self, key: &ResourceKey) {
        // No receivers is fine
        let _ = self.inner.events.send(key.clone());
    }
}

// ============================================
// Subscriptions
// ============================================

/// Live binding between a view and a key.
///
/// Await [`changed`](Self::changed) for notifications; drop the
/// subscription to unregister.
pub struct Subscription {
    key: ResourceKey,
    store: CacheStore,
    rx: broadcast::Receiver<ResourceKey>,
}

impl Subscription {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Current snapshot of the subscribed entry.
    pub fn entry(&self) -> Option<CacheEntry> {
        self.store.peek(&self.key)
    }

    /// Wait for the next change to the subscribed entry.
    ///
    /// Returns the entry snapshot after the change, or None when the
    /// entry was removed.
    pub async fn changed(&mut self) -> Option<CacheEntry> {
        loop {
            match self.rx.recv().await {
                Ok(k) if k == self.key => return self.store.peek(&self.key),
                Ok(_) => continue,
                // Missed notifications; resync from the current snapshot
                Err(broadcast::error::RecvError::Lagged(_)) => return self.store.peek(&self.key),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut state = self.store.inner.state.lock().unwrap();
        if let Some(count) = state.watchers.get_mut(&self.key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.watchers.remove(&self.key);
            }
        }
    }
}
