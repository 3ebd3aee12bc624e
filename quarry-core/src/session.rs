//! Application session
//!
//! [`Session`] is the one explicitly injected handle the rest of the
//! application passes around: it owns the gateway and the cache store,
//! is created once per application session, and dies with it. There is
//! no module-level state anywhere in this crate.
//!
//! Each read operation registers the canonical fetcher for its key, so
//! later invalidations know how to refresh the entry.

use std::sync::Arc;
use std::time::Duration;

use crate::api::{ApiClient, Gateway, SearchRequest};
use crate::cache::{fetcher, CacheEntry, CacheStore, Fetcher, ResourceKey, Subscription};
use crate::config::{Config, SyncConfig};
use crate::error::Result;
use crate::mutation::MutationCoordinator;
use crate::poll::{self, PollHandle};
use crate::suggest::{suggest_fetcher, SuggestChannel};
use crate::types::{AdminStats, ChatRequest, Conversation, Document, SearchResponse};
use crate::urlstate::{self, SearchState};

/// One application session's worth of synchronization state.
#[derive(Clone)]
pub struct Session {
    api: Arc<dyn Gateway>,
    store: CacheStore,
    tuning: SyncConfig,
}

impl Session {
    /// Build a session backed by the real HTTP gateway.
    pub fn new(config: &Config) -> Result<Self> {
        let api = Arc::new(ApiClient::new(&config.api)?);
        Ok(Self::with_gateway(api, config.sync.clone()))
    }

    /// Build a session over an arbitrary gateway (tests use a stub).
    pub fn with_gateway(api: Arc<dyn Gateway>, tuning: SyncConfig) -> Self {
        Self {
            api,
            store: CacheStore::new(),
            tuning,
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn api(&self) -> &Arc<dyn Gateway> {
        &self.api
    }

    pub fn tuning(&self) -> &SyncConfig {
        &self.tuning
    }

    /// Coordinator for write operations against this session's cache.
    pub fn coordinator(&self) -> MutationCoordinator {
        MutationCoordinator::new(Arc::clone(&self.api), self.store.clone())
    }

    /// Chat request carrying this session's configured context window.
    pub fn chat_request(&self, message: &str, conversation_id: Option<String>) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            conversation_id,
            context_window: self.tuning.context_window,
        }
    }

    // ============================================
    // Reads
    // ============================================

    pub async fn documents(&self) -> Result<Vec<Document>> {
        self.fetch(ResourceKey::DocumentList).await.into_result()
    }

    pub async fn document(&self, id: &str) -> Result<Document> {
        self.fetch(ResourceKey::Document(id.to_string()))
            .await
            .into_result()
    }

    pub async fn search(&self, state: &SearchState) -> Result<SearchResponse> {
        self.fetch(ResourceKey::search(state)).await.into_result()
    }

    pub async fn conversations(&self) -> Result<Vec<Conversation>> {
        self.fetch(ResourceKey::ConversationList)
            .await
            .into_result()
    }

    pub async fn conversation(&self, id: &str) -> Result<Conversation> {
        self.fetch(ResourceKey::Conversation(id.to_string()))
            .await
            .into_result()
    }

    pub async fn admin_stats(&self) -> Result<AdminStats> {
        self.fetch(ResourceKey::AdminStats).await.into_result()
    }

    /// Immediate snapshot, with a background fetch if the entry is not fresh.
    pub fn query(&self, key: ResourceKey) -> CacheEntry {
        let f = self.fetcher_for(&key);
        self.store.query(key, f)
    }

    /// Fetch a key through the cache and wait for it to settle.
    pub async fn fetch(&self, key: ResourceKey) -> CacheEntry {
        let f = self.fetcher_for(&key);
        self.store.fetch(key, f).await
    }

    // ============================================
    // Subscriptions and polling
    // ============================================

    pub fn subscribe(&self, key: ResourceKey) -> Subscription {
        self.store.subscribe(key)
    }

    /// Poll a key at its configured cadence.
    ///
    /// Document detail polls stop on their own once processing reaches a
    /// terminal state (or the document is gone); everything else polls
    /// for as long as the handle lives.
    pub fn poll(&self, key: ResourceKey) -> PollHandle {
        let every = self.default_interval(&key);
        self.poll_every(key, every)
    }

    /// Poll a key at an explicit cadence.
    pub fn poll_every(&self, key: ResourceKey, every: Duration) -> PollHandle {
        let f = self.fetcher_for(&key);
        let predicate = continue_predicate(&key);
        poll::start(self.store.clone(), key, f, every, predicate)
    }

    fn default_interval(&self, key: &ResourceKey) -> Duration {
        let secs = match key {
            ResourceKey::Document(_) => self.tuning.document_poll_secs,
            ResourceKey::DocumentList | ResourceKey::Search { .. } => {
                self.tuning.document_list_poll_secs
            }
            ResourceKey::Conversation(_) => self.tuning.conversation_poll_secs,
            ResourceKey::ConversationList => self.tuning.conversation_list_poll_secs,
            ResourceKey::AdminStats => self.tuning.stats_poll_secs,
        };
        Duration::from_secs(secs)
    }

    /// Suggestion channel tuned from this session's config.
    pub fn suggest_channel(&self) -> SuggestChannel {
        let api = Arc::clone(&self.api);
        let limit = self.tuning.suggest_limit;
        SuggestChannel::new(
            suggest_fetcher(move |text| {
                let api = Arc::clone(&api);
                async move { api.suggest(&text, limit).await }
            }),
            Duration::from_millis(self.tuning.suggest_debounce_ms),
            self.tuning.suggest_min_chars,
        )
    }

    /// Search flow bound to this session.
    pub fn search_session(&self) -> SearchSession {
        SearchSession::new(self)
    }

    /// The canonical fetcher for a key.
    pub fn fetcher_for(&self, key: &ResourceKey) -> Fetcher {
        let api = Arc::clone(&self.api);
        match key {
            ResourceKey::DocumentList => {
                let limit = self.tuning.document_page_size;
                fetcher(move || {
                    let api = Arc::clone(&api);
                    async move {
                        let docs = api.list_documents(0, limit, None).await?;
                        Ok(serde_json::to_value(docs)?)
                    }
                })
            }
            ResourceKey::Document(id) => {
                let id = id.clone();
                fetcher(move || {
                    let api = Arc::clone(&api);
                    let id = id.clone();
                    async move {
                        let doc = api.get_document(&id).await?;
                        Ok(serde_json::to_value(doc)?)
                    }
                })
            }
            ResourceKey::Search { query, tags } => {
                let request = SearchRequest::new(query.clone(), tags.clone(), self.tuning.search_limit);
                fetcher(move || {
                    let api = Arc::clone(&api);
                    let request = request.clone();
                    async move {
                        let response = api.search(&request).await?;
                        Ok(serde_json::to_value(response)?)
                    }
                })
            }
            ResourceKey::ConversationList => {
                let limit = self.tuning.conversation_page_size;
                fetcher(move || {
                    let api = Arc::clone(&api);
                    async move {
                        let conversations = api.list_conversations(0, limit).await?;
                        Ok(serde_json::to_value(conversations)?)
                    }
                })
            }
            ResourceKey::Conversation(id) => {
                let id = id.clone();
                fetcher(move || {
                    let api = Arc::clone(&api);
                    let id = id.clone();
                    async move {
                        let conversation = api.get_conversation(&id).await?;
                        Ok(serde_json::to_value(conversation)?)
                    }
                })
            }
            ResourceKey::AdminStats => fetcher(move || {
                let api = Arc::clone(&api);
                async move {
                    let stats = api.admin_stats().await?;
                    Ok(serde_json::to_value(stats)?)
                }
            }),
        }
    }

    /// Record a committed search query for the suggestion corpus.
    ///
    /// Fire and forget: failures are logged and never surfaced.
    fn spawn_record_query(&self, query: &str) {
        let query = query.trim().to_string();
        if query.is_empty() {
            return;
        }
        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            if let Err(err) = api.record_query(&query).await {
                tracing::warn!(error = %err, "failed to record search query");
            }
        });
    }
}

/// Continue predicate for a poll on this key.
fn continue_predicate(key: &ResourceKey) -> Box<dyn Fn(&CacheEntry) -> bool + Send> {
    match key {
        ResourceKey::Document(_) => Box::new(|entry: &CacheEntry| {
            // Gone is as terminal as processed
            if entry
                .error
                .as_ref()
                .is_some_and(crate::error::Error::is_not_found)
            {
                return false;
            }
            match entry.decode::<Document>() {
                Ok(Some(doc)) => !doc.is_terminal(),
                _ => true,
            }
        }),
        _ => Box::new(|_| true),
    }
}

// ============================================
// Search flow
// ============================================

/// How the view should write the encoded state into browser history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    /// New history entry (the first user-initiated search)
    Push,
    /// Replace the current entry (incremental query/filter changes)
    Replace,
}

/// An encoded search state the owning view should reflect into the URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlUpdate {
    pub mode: HistoryMode,
    pub query_string: String,
}

/// The search view's committed state and its URL round-trip.
///
/// The URL is always a valid serialization of the last committed state:
/// every committed change produces a [`UrlUpdate`] for the view to
/// apply, and hydrating from a URL that carries a query triggers the
/// same fetch path as a user-submitted search.
pub struct SearchSession {
    session: Session,
    state: SearchState,
    committed: bool,
    pending_url: Option<UrlUpdate>,
}

impl SearchSession {
    pub fn new(session: &Session) -> Self {
        Self {
            session: session.clone(),
            state: SearchState::default(),
            committed: false,
            pending_url: None,
        }
    }

    /// Rebuild search state from a URL query string.
    ///
    /// A URL carrying a query behaves exactly as if the user had typed
    /// it and pressed search: the search fetch is dispatched through the
    /// cache and the query is recorded on success. No [`UrlUpdate`] is
    /// produced, the view is already at this URL.
    pub fn hydrate(session: &Session, query_string: &str) -> Result<Self> {
        let state = urlstate::decode(query_string)?;
        let mut this = Self {
            session: session.clone(),
            state,
            committed: false,
            pending_url: None,
        };

        if !this.state.is_empty() {
            this.committed = true;
            let session = this.session.clone();
            let state = this.state.clone();
            tokio::spawn(async move {
                if session.search(&state).await.is_ok() {
                    session.spawn_record_query(&state.query);
                }
            });
        }

        Ok(this)
    }

    pub fn state(&self) -> &SearchState {
        &self.state
    }

    /// Cache key for the current state.
    pub fn key(&self) -> ResourceKey {
        ResourceKey::search(&self.state)
    }

    /// Commit a new query and run the search.
    pub async fn submit(&mut self, query: &str) -> Result<SearchResponse> {
        self.state.query = query.trim().to_string();
        self.run().await
    }

    /// Toggle a tag filter.
    ///
    /// Re-runs the search only once a search has been committed; before
    /// that, filter changes just accumulate.
    pub async fn set_filter(&mut self, tag: &str, selected: bool) -> Result<Option<SearchResponse>> {
        self.state.filters.insert(tag.to_string(), selected);
        if self.committed {
            Ok(Some(self.run().await?))
        } else {
            Ok(None)
        }
    }

    /// Re-run the search for the current committed state.
    pub async fn refresh(&mut self) -> Result<SearchResponse> {
        self.run().await
    }

    /// The URL update produced by the last committed change, if the view
    /// has not consumed it yet.
    pub fn take_url_update(&mut self) -> Option<UrlUpdate> {
        self.pending_url.take()
    }

    async fn run(&mut self) -> Result<SearchResponse> {
        let state = self.state.normalized();
        let mode = if self.committed {
            HistoryMode::Replace
        } else {
            HistoryMode::Push
        };
        self.committed = true;
        self.pending_url = Some(UrlUpdate {
            mode,
            query_string: urlstate::encode(&state),
        });

        let response = self.session.search(&state).await?;
        self.session.spawn_record_query(&state.query);
        Ok(response)
    }
}
