//! Integration tests for the quarry synchronization layer
//!
//! These tests drive the cache store, poller, suggestion channel, and
//! mutation coordinator against a scripted in-memory gateway. Time is
//! paused (`start_paused`), so debounce windows and poll intervals run
//! deterministically and instantly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use quarry_core::api::{Gateway, SearchRequest};
use quarry_core::cache::{fetcher, CacheStatus, CacheStore, ResourceKey, ResourceKind};
use quarry_core::config::SyncConfig;
use quarry_core::error::{Error, Result};
use quarry_core::mutation::{Mutation, MutationOutput, Navigation};
use quarry_core::session::{HistoryMode, SearchSession, Session};
use quarry_core::suggest::{suggest_fetcher, SuggestChannel};
use quarry_core::types::{
    AdminStats, ChatReply, ChatRequest, Conversation, CrawlRequest, Document, DocumentCreate,
    DocumentUpdate, DocumentUpload, Message, MessageRole, SearchResponse,
};

// ============================================
// Scripted gateway
// ============================================

#[derive(Default, Clone)]
struct CallLog {
    search: usize,
    suggest: Vec<String>,
    recorded: Vec<String>,
    list_documents: usize,
    get_document: usize,
    stats: usize,
}

#[derive(Default)]
struct StubState {
    documents: Vec<Document>,
    conversations: Vec<Conversation>,
    calls: CallLog,
    /// Latency injected into document detail fetches, in milliseconds
    get_document_delay_ms: u64,
    /// Latency injected into stats fetches; the reported value is
    /// captured before the delay, so a slow response carries stale data
    stats_delay_ms: u64,
    fail_next_delete: bool,
}

#[derive(Default)]
struct StubGateway {
    state: Mutex<StubState>,
}

impl StubGateway {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push_document(&self, doc: Document) {
        self.state.lock().unwrap().documents.push(doc);
    }

    fn set_processed(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(doc) = state.documents.iter_mut().find(|d| d.id == id) {
            doc.processed = true;
        }
    }

    fn set_get_document_delay(&self, ms: u64) {
        self.state.lock().unwrap().get_document_delay_ms = ms;
    }

    fn set_stats_delay(&self, ms: u64) {
        self.state.lock().unwrap().stats_delay_ms = ms;
    }

    fn fail_next_delete(&self) {
        self.state.lock().unwrap().fail_next_delete = true;
    }

    fn calls(&self) -> CallLog {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl Gateway for StubGateway {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let mut state = self.state.lock().unwrap();
        state.calls.search += 1;
        Ok(SearchResponse {
            results: Vec::new(),
            total: 0,
            query: request.query.clone(),
            search_time: 0.01,
        })
    }

    async fn suggest(&self, prefix: &str, _limit: usize) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.calls.suggest.push(prefix.to_string());
        Ok(vec![format!("{} suggestion", prefix)])
    }

    async fn record_query(&self, query: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.recorded.push(query.to_string());
        Ok(())
    }

    async fn list_documents(
        &self,
        _skip: usize,
        _limit: usize,
        _tag: Option<&str>,
    ) -> Result<Vec<Document>> {
        let mut state = self.state.lock().unwrap();
        state.calls.list_documents += 1;
        Ok(state.documents.clone())
    }

    async fn get_document(&self, id: &str) -> Result<Document> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.calls.get_document += 1;
            state.get_document_delay_ms
        };
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let state = self.state.lock().unwrap();
        state
            .documents
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))
    }

    async fn create_document(&self, create: &DocumentCreate) -> Result<Document> {
        let doc = doc(&format!("doc-{}", create.title), &create.title, false);
        self.state.lock().unwrap().documents.push(doc.clone());
        Ok(doc)
    }

    async fn update_document(&self, id: &str, update: &DocumentUpdate) -> Result<Document> {
        let mut state = self.state.lock().unwrap();
        let doc = state
            .documents
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))?;
        if let Some(title) = &update.title {
            doc.title = title.clone();
        }
        if let Some(tags) = &update.tags {
            doc.tags = tags.clone();
        }
        Ok(doc.clone())
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_delete {
            state.fail_next_delete = false;
            return Err(Error::Validation {
                status: 403,
                detail: "delete forbidden".to_string(),
            });
        }
        state.documents.retain(|d| d.id != id);
        Ok(())
    }

    async fn upload_document(&self, upload: &DocumentUpload) -> Result<Document> {
        let doc = doc(&format!("doc-{}", upload.file_name), &upload.file_name, false);
        self.state.lock().unwrap().documents.push(doc.clone());
        Ok(doc)
    }

    async fn crawl_document(&self, crawl: &CrawlRequest) -> Result<Document> {
        let doc = doc("doc-crawled", crawl.title.as_deref().unwrap_or(&crawl.url), false);
        self.state.lock().unwrap().documents.push(doc.clone());
        Ok(doc)
    }

    async fn list_conversations(&self, _skip: usize, _limit: usize) -> Result<Vec<Conversation>> {
        Ok(self.state.lock().unwrap().conversations.clone())
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation> {
        let state = self.state.lock().unwrap();
        state
            .conversations
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("conversation {}", id)))
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        self.state.lock().unwrap().conversations.retain(|c| c.id != id);
        Ok(())
    }

    async fn send_message(&self, request: &ChatRequest) -> Result<ChatReply> {
        let mut state = self.state.lock().unwrap();
        let id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| "abc".to_string());

        let user = message("m-user", MessageRole::User, &request.message);
        let assistant = message("m-assistant", MessageRole::Assistant, "an answer");

        match state.conversations.iter_mut().find(|c| c.id == id) {
            Some(conversation) => {
                conversation.messages.push(user);
                conversation.messages.push(assistant.clone());
            }
            None => {
                state.conversations.push(Conversation {
                    id: id.clone(),
                    title: request.message.clone(),
                    messages: vec![user, assistant.clone()],
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                });
            }
        }

        Ok(ChatReply {
            conversation_id: id,
            message: assistant,
            sources: Vec::new(),
        })
    }

    async fn admin_stats(&self) -> Result<AdminStats> {
        // Capture the value before sleeping so a slow response carries
        // data from dispatch time, like a real in-flight request would
        let (count, delay) = {
            let mut state = self.state.lock().unwrap();
            state.calls.stats += 1;
            (state.documents.len() as u64, state.stats_delay_ms)
        };
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        Ok(AdminStats {
            document_count: count,
            processed_count: count,
            error_count: 0,
            chunk_count: 0,
            vector_count: 0,
            recent_documents: Vec::new(),
            top_tags: Vec::new(),
        })
    }

    async fn reset(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.documents.clear();
        state.conversations.clear();
        Ok("reset initiated".to_string())
    }

    async fn reindex(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        for doc in &mut state.documents {
            doc.processed = false;
        }
        Ok("reindex initiated".to_string())
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.0; 3])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.0; 3]).collect())
    }
}

fn doc(id: &str, title: &str, processed: bool) -> Document {
    Document {
        id: id.to_string(),
        title: title.to_string(),
        url: None,
        tags: Vec::new(),
        metadata: HashMap::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        processed,
        chunk_count: 0,
        error: None,
    }
}

fn message(id: &str, role: MessageRole, content: &str) -> Message {
    Message {
        id: id.to_string(),
        role,
        content: content.to_string(),
        created_at: Utc::now(),
    }
}

fn session_over(stub: &Arc<StubGateway>) -> Session {
    Session::with_gateway(stub.clone(), SyncConfig::default())
}

// ============================================
// Cache store: coalescing and staleness
// ============================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_fetches_coalesce() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let f = {
        let calls = calls.clone();
        fetcher(move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(serde_json::json!({"value": 1}))
            }
        })
    };

    let key = ResourceKey::DocumentList;
    let (a, b) = tokio::join!(
        store.fetch(key.clone(), f.clone()),
        store.fetch(key.clone(), f.clone())
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1, "second caller must attach");
    assert_eq!(a.status, CacheStatus::Success);
    assert_eq!(b.status, CacheStatus::Success);
    assert_eq!(a.data, b.data);
}

#[tokio::test(start_paused = true)]
async fn test_stale_entry_serves_old_data_while_revalidating() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let f = {
        let calls = calls.clone();
        fetcher(move || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(serde_json::json!({"version": n}))
            }
        })
    };

    let key = ResourceKey::AdminStats;
    let first = store.fetch(key.clone(), f.clone()).await;
    assert_eq!(first.data, Some(serde_json::json!({"version": 1})));

    store.invalidate(&key);

    // The immediate snapshot still shows version 1 while the refresh runs
    let snapshot = store.query(key.clone(), f.clone());
    assert_eq!(snapshot.status, CacheStatus::Success);
    assert!(snapshot.stale);
    assert_eq!(snapshot.data, Some(serde_json::json!({"version": 1})));

    let settled = store.fetch(key.clone(), f.clone()).await;
    assert_eq!(settled.data, Some(serde_json::json!({"version": 2})));
    assert!(!settled.stale);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_error_keeps_cached_data() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let f = {
        let calls = calls.clone();
        fetcher(move || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    Ok(serde_json::json!({"version": 1}))
                } else {
                    Err(Error::Transport("connection reset".to_string()))
                }
            }
        })
    };

    let key = ResourceKey::DocumentList;
    store.fetch(key.clone(), f.clone()).await;
    store.invalidate(&key);

    let entry = store.fetch(key.clone(), f.clone()).await;
    assert_eq!(entry.status, CacheStatus::Error);
    assert!(entry.error.as_ref().unwrap().is_transport());
    assert_eq!(
        entry.data,
        Some(serde_json::json!({"version": 1})),
        "failed refresh must not clear cached data"
    );
}

#[tokio::test(start_paused = true)]
async fn test_subscriber_sees_entry_settle() {
    let store = CacheStore::new();
    let key = ResourceKey::ConversationList;

    let f = fetcher(move || async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(serde_json::json!([]))
    });

    let mut sub = store.subscribe(key.clone());
    store.query(key.clone(), f);

    loop {
        let entry = sub.changed().await.expect("entry should exist");
        if entry.status == CacheStatus::Success {
            break;
        }
    }
}

// ============================================
// Debounced suggestions
// ============================================

fn recording_suggest_fetcher(
    log: Arc<Mutex<Vec<String>>>,
    slow_input: &'static str,
    slow_ms: u64,
) -> quarry_core::suggest::SuggestFetcher {
    suggest_fetcher(move |text: String| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(text.clone());
            if text == slow_input {
                tokio::time::sleep(Duration::from_millis(slow_ms)).await;
            }
            Ok(vec![format!("{} suggestion", text)])
        }
    })
}

#[tokio::test(start_paused = true)]
async fn test_debounce_issues_single_fetch_for_final_input() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let channel = SuggestChannel::new(
        recording_suggest_fetcher(log.clone(), "", 0),
        Duration::from_millis(300),
        2,
    );
    let rx = channel.suggestions();

    // "ca" then "cat" within 100ms: only one request, for "cat"
    channel.on_input("ca");
    tokio::time::sleep(Duration::from_millis(100)).await;
    channel.on_input("cat");
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(*log.lock().unwrap(), vec!["cat".to_string()]);
    assert_eq!(*rx.borrow(), vec!["cat suggestion".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_short_input_clears_suggestions_without_fetch() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let channel = SuggestChannel::new(
        recording_suggest_fetcher(log.clone(), "", 0),
        Duration::from_millis(300),
        2,
    );
    let rx = channel.suggestions();

    channel.on_input("cat");
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(*rx.borrow(), vec!["cat suggestion".to_string()]);

    // One character: clears synchronously, no network call
    channel.on_input("c");
    assert!(rx.borrow().is_empty());
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_suggestion_response_is_discarded() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let channel = SuggestChannel::new(
        recording_suggest_fetcher(log.clone(), "slowquery", 1000),
        Duration::from_millis(300),
        2,
    );
    let rx = channel.suggestions();

    // The slow fetch dispatches at t=300 and resolves at t=1300
    channel.on_input("slowquery");
    tokio::time::sleep(Duration::from_millis(350)).await;

    // Newer input dispatches at t=650 and resolves immediately
    channel.on_input("fast");
    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert_eq!(log.lock().unwrap().len(), 2);
    assert_eq!(
        *rx.borrow(),
        vec!["fast suggestion".to_string()],
        "late response for superseded input must not overwrite"
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_suggestion_fetch_clears_silently() {
    let channel = SuggestChannel::new(
        suggest_fetcher(|_text: String| async move {
            Err(Error::Transport("suggest backend down".to_string()))
        }),
        Duration::from_millis(300),
        2,
    );
    let rx = channel.suggestions();

    channel.on_input("cat");
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(rx.borrow().is_empty());
}

// ============================================
// Polling
// ============================================

#[tokio::test(start_paused = true)]
async fn test_document_poll_stops_at_terminal_state() {
    let stub = StubGateway::new();
    stub.push_document(doc("d1", "Processing", false));
    let session = session_over(&stub);

    let handle = session.poll(ResourceKey::Document("d1".to_string()));

    // A few ticks while the document is still processing
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(stub.calls().get_document >= 2);
    assert!(!handle.is_finished());

    stub.set_processed("d1");
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(handle.is_finished(), "poll must stop once processed");

    let after_stop = stub.calls().get_document;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
        stub.calls().get_document,
        after_stop,
        "no fetch may be scheduled after the terminal state"
    );
}

#[tokio::test(start_paused = true)]
async fn test_dropping_poll_handle_cancels_ticks() {
    let stub = StubGateway::new();
    let session = session_over(&stub);

    let handle = session.poll(ResourceKey::DocumentList);
    tokio::time::sleep(Duration::from_secs(11)).await;
    let while_running = stub.calls().list_documents;
    assert!(while_running >= 2);

    drop(handle);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(
        stub.calls().list_documents,
        while_running,
        "no fetch may be issued after teardown"
    );
}

// ============================================
// Mutations
// ============================================

#[tokio::test(start_paused = true)]
async fn test_delete_document_removes_it_from_list_and_detail() {
    let stub = StubGateway::new();
    stub.push_document(doc("d1", "First", true));
    stub.push_document(doc("d2", "Second", true));
    let session = session_over(&stub);

    let docs = session.documents().await.unwrap();
    assert_eq!(docs.len(), 2);

    let outcome = session
        .coordinator()
        .execute(Mutation::DeleteDocument {
            id: "d1".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(outcome.navigation, Navigation::ToDocumentList);

    let docs = session.documents().await.unwrap();
    assert!(
        !docs.iter().any(|d| d.id == "d1"),
        "list must not contain the deleted id"
    );

    let err = session.document("d1").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test(start_paused = true)]
async fn test_detail_fetch_in_flight_across_delete_resolves_not_found() {
    let stub = StubGateway::new();
    stub.push_document(doc("d1", "Doomed", false));
    stub.set_get_document_delay(100);
    let session = session_over(&stub);

    // Dispatch a detail fetch that will still be in flight when the
    // delete lands
    let fetch_task = {
        let session = session.clone();
        tokio::spawn(async move { session.fetch(ResourceKey::Document("d1".to_string())).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    session
        .coordinator()
        .execute(Mutation::DeleteDocument {
            id: "d1".to_string(),
        })
        .await
        .unwrap();

    let entry = fetch_task.await.unwrap();
    assert!(
        entry.error.as_ref().is_some_and(Error::is_not_found),
        "in-flight response must not resurrect the deleted document"
    );
    assert!(entry.data.is_none(), "stale data must not be served");
}

#[tokio::test(start_paused = true)]
async fn test_chat_message_adopts_server_conversation_id() {
    let stub = StubGateway::new();
    let session = session_over(&stub);

    // Prime the conversation list cache while it is empty
    assert!(session.conversations().await.unwrap().is_empty());

    let outcome = session
        .coordinator()
        .execute(Mutation::SendMessage(
            session.chat_request("What is semantic search?", None),
        ))
        .await
        .unwrap();

    assert_eq!(
        outcome.navigation,
        Navigation::ToConversation("abc".to_string()),
        "a new conversation adopts the server-returned id"
    );
    let MutationOutput::Chat(reply) = outcome.output else {
        panic!("expected chat output");
    };
    assert_eq!(reply.conversation_id, "abc");

    // The list entry was invalidated: the next read shows the conversation
    let conversations = session.conversations().await.unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].id, "abc");

    // Subsequent reads use the adopted key
    let conversation = session.conversation("abc").await.unwrap();
    assert_eq!(conversation.messages.len(), 2);

    // A follow-up in the same conversation does not navigate
    let outcome = session
        .coordinator()
        .execute(Mutation::SendMessage(
            session.chat_request("Tell me more", Some("abc".to_string())),
        ))
        .await
        .unwrap();
    assert_eq!(outcome.navigation, Navigation::Stay);
}

#[tokio::test(start_paused = true)]
async fn test_reset_invalidates_exactly_its_dependents() {
    let stub = StubGateway::new();
    stub.push_document(doc("d1", "One", true));
    let session = session_over(&stub);

    // Prime document list, a search, admin stats, and the conversation list
    session.documents().await.unwrap();
    let search_key = ResourceKey::Search {
        query: "rust".to_string(),
        tags: Vec::new(),
    };
    session.fetch(search_key.clone()).await;
    session.admin_stats().await.unwrap();
    session.conversations().await.unwrap();

    session
        .coordinator()
        .execute(Mutation::Reset)
        .await
        .unwrap();

    let store = session.store();
    assert!(store.peek(&ResourceKey::DocumentList).unwrap().stale);
    assert!(store.peek(&search_key).unwrap().stale);
    assert!(store.peek(&ResourceKey::AdminStats).unwrap().stale);
    assert!(
        !store.peek(&ResourceKey::ConversationList).unwrap().stale,
        "reset must not invalidate unrelated caches"
    );
}

#[tokio::test(start_paused = true)]
async fn test_stats_poll_in_flight_at_reset_resolves_to_fresh_values() {
    let stub = StubGateway::new();
    stub.push_document(doc("d1", "One", true));
    stub.push_document(doc("d2", "Two", true));
    stub.push_document(doc("d3", "Three", true));
    let session = session_over(&stub);

    // Prime the stats entry, then make stats fetches slow so the next
    // poll tick is still in flight when the reset lands
    let stats = session.admin_stats().await.unwrap();
    assert_eq!(stats.document_count, 3);
    stub.set_stats_delay(100);

    let _handle = session.poll(ResourceKey::AdminStats);
    // First tick dispatches immediately and sleeps inside the stub,
    // carrying the pre-reset count of 3
    tokio::time::sleep(Duration::from_millis(10)).await;

    session
        .coordinator()
        .execute(Mutation::Reset)
        .await
        .unwrap();

    // Let the in-flight response arrive, be discarded, and re-fetch
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stats: AdminStats = session
        .store()
        .peek(&ResourceKey::AdminStats)
        .unwrap()
        .decode()
        .unwrap()
        .unwrap();
    assert_eq!(
        stats.document_count, 0,
        "the poll's next resolution must reflect post-reset values"
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_mutation_invalidates_nothing() {
    let stub = StubGateway::new();
    stub.push_document(doc("d1", "Kept", true));
    let session = session_over(&stub);

    session.documents().await.unwrap();
    session.document("d1").await.unwrap();

    stub.fail_next_delete();
    let err = session
        .coordinator()
        .execute(Mutation::DeleteDocument {
            id: "d1".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::Validation {
            status: 403,
            detail: "delete forbidden".to_string()
        }
    );

    let store = session.store();
    assert!(!store.peek(&ResourceKey::DocumentList).unwrap().stale);
    assert!(
        store
            .peek(&ResourceKey::Document("d1".to_string()))
            .is_some(),
        "failure must leave the detail entry in place"
    );
}

#[tokio::test(start_paused = true)]
async fn test_reindex_invalidates_document_list_and_stays() {
    let stub = StubGateway::new();
    stub.push_document(doc("d1", "One", true));
    let session = session_over(&stub);

    session.documents().await.unwrap();
    let outcome = session
        .coordinator()
        .execute(Mutation::Reindex)
        .await
        .unwrap();

    assert_eq!(outcome.navigation, Navigation::Stay);
    assert!(session.store().peek(&ResourceKey::DocumentList).unwrap().stale);

    let docs = session.documents().await.unwrap();
    assert!(docs.iter().all(|d| !d.processed), "reindex restarts processing");
}

#[tokio::test(start_paused = true)]
async fn test_upload_navigates_to_new_document() {
    let stub = StubGateway::new();
    let session = session_over(&stub);

    session.documents().await.unwrap();
    let outcome = session
        .coordinator()
        .execute(Mutation::UploadDocument(DocumentUpload {
            file_name: "notes.pdf".to_string(),
            bytes: vec![1, 2, 3],
            title: Some("Notes".to_string()),
            tags: Vec::new(),
            metadata: HashMap::new(),
        }))
        .await
        .unwrap();

    let Navigation::ToDocument(id) = outcome.navigation else {
        panic!("upload must navigate to the new document");
    };
    assert!(session.store().peek(&ResourceKey::DocumentList).unwrap().stale);
    assert!(session.documents().await.unwrap().iter().any(|d| d.id == id));
}

// ============================================
// Search state and URL round-tripping
// ============================================

#[tokio::test(start_paused = true)]
async fn test_search_session_emits_push_then_replace() {
    let stub = StubGateway::new();
    let session = session_over(&stub);
    let mut search = session.search_session();

    search.submit("rust async").await.unwrap();
    let update = search.take_url_update().unwrap();
    assert_eq!(update.mode, HistoryMode::Push);
    assert_eq!(update.query_string, "q=rust%20async");

    search.set_filter("tutorial", true).await.unwrap();
    let update = search.take_url_update().unwrap();
    assert_eq!(update.mode, HistoryMode::Replace);
    assert!(update.query_string.contains("filters="));

    // Round trip: the emitted URL decodes back to the committed state
    let decoded = quarry_core::urlstate::decode(&update.query_string).unwrap();
    assert_eq!(decoded, search.state().normalized());
}

#[tokio::test(start_paused = true)]
async fn test_filter_change_before_first_search_does_not_fetch() {
    let stub = StubGateway::new();
    let session = session_over(&stub);
    let mut search = session.search_session();

    let result = search.set_filter("tutorial", true).await.unwrap();
    assert!(result.is_none());
    assert_eq!(stub.calls().search, 0);
    assert!(search.take_url_update().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_hydrating_url_triggers_search_and_records_query() {
    let stub = StubGateway::new();
    let session = session_over(&stub);

    let search = SearchSession::hydrate(&session, "q=vector%20databases").unwrap();
    assert_eq!(search.state().query, "vector databases");

    // The hydration fetch runs in the background through the same path
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stub.calls().search, 1);
    assert_eq!(stub.calls().recorded, vec!["vector databases".to_string()]);

    let entry = session.store().peek(&search.key()).unwrap();
    assert_eq!(entry.status, CacheStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn test_hydrating_empty_url_is_inert() {
    let stub = StubGateway::new();
    let session = session_over(&stub);

    let _search = SearchSession::hydrate(&session, "").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stub.calls().search, 0);
    assert!(stub.calls().recorded.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_identical_searches_share_one_cache_entry() {
    let stub = StubGateway::new();
    let session = session_over(&stub);

    let state = quarry_core::SearchState::new("rust");
    session.search(&state).await.unwrap();
    session.search(&state).await.unwrap();

    assert_eq!(
        stub.calls().search,
        1,
        "an unchanged search must be served from cache"
    );

    // Invalidation forces the next search back to the backend
    session.store().invalidate_kind(ResourceKind::Search);
    session.search(&state).await.unwrap();
    assert_eq!(stub.calls().search, 2);
}
