//! Core domain types for quarry
//!
//! These types mirror the backend's wire contract. The backend owns every
//! identifier and timestamp; the client never mints ids of its own.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Document** | A searchable unit of content (uploaded file, crawled page, or pasted text) |
//! | **Chunk** | A slice of a document the backend embeds for retrieval; clients only see counts |
//! | **Conversation** | An ordered exchange of user and assistant messages |
//! | **Source** | A chunk the assistant cited when answering |
//! | **Hit** | A single search result, scored against the query |
//!
//! Documents are processed asynchronously: they are created with
//! `processed == false` and the backend later flips `processed` to true,
//! with `error` set if processing failed. Either way the state is terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// String-keyed metadata attached to documents and search hits
pub type Metadata = HashMap<String, serde_json::Value>;

// ============================================
// Documents
// ============================================

/// A document as reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Backend-assigned identifier
    pub id: String,
    /// Human-readable title
    pub title: String,
    /// Source URL for crawled documents
    #[serde(default)]
    pub url: Option<String>,
    /// User-assigned tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Extensible metadata
    #[serde(default)]
    pub metadata: Metadata,
    /// When the document was created
    pub created_at: DateTime<Utc>,
    /// When the document was last modified
    pub updated_at: DateTime<Utc>,
    /// Whether asynchronous processing has finished
    #[serde(default)]
    pub processed: bool,
    /// Number of chunks the backend produced
    #[serde(default)]
    pub chunk_count: u32,
    /// Processing error, if processing finished unsuccessfully
    #[serde(default)]
    pub error: Option<String>,
}

impl Document {
    /// Processing is terminal once `processed` is set, error or not.
    pub fn is_terminal(&self) -> bool {
        self.processed
    }
}

/// Payload for creating a document from pasted content or a URL reference.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentCreate {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Metadata,
}

/// Partial update of a document; unset fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Payload for a multipart file upload.
///
/// `tags` and `metadata` travel as JSON-encoded text parts next to the
/// file part, per the backend's upload contract.
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Metadata,
}

/// Payload for asking the backend to crawl a URL into a document.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlRequest {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Metadata,
}

// ============================================
// Search
// ============================================

/// A single scored search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: String,
    pub chunk_id: String,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub score: f64,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub highlights: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

/// Response to a search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub total: usize,
    pub query: String,
    /// Backend-measured search time in seconds
    pub search_time: f64,
}

// ============================================
// Chat
// ============================================

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            _ => Err(format!("unknown message role: {}", s)),
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A conversation with its full message history.
///
/// Conversations grow only by appending a user message followed by the
/// assistant's reply; they are deleted as a whole, never edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for sending a chat message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub message: String,
    /// None starts a new conversation; the backend returns the new id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub context_window: u32,
}

/// A chunk the assistant cited when answering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub document_id: String,
    pub chunk_id: String,
    pub title: String,
    #[serde(default)]
    pub content_snippet: Option<String>,
    pub score: f64,
}

/// Response to a chat message: the conversation it landed in, the
/// assistant's reply, and the sources it drew from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub conversation_id: String,
    pub message: Message,
    #[serde(default)]
    pub sources: Vec<Source>,
}

// ============================================
// Admin
// ============================================

/// Tag usage count in admin statistics.
///
/// The backend's aggregation emits the tag under `_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagCount {
    #[serde(rename = "_id")]
    pub tag: String,
    pub count: u64,
}

/// Slim document projection carried inside admin statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentDocument {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub processed: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// System-wide statistics from `/admin/stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminStats {
    pub document_count: u64,
    pub processed_count: u64,
    pub error_count: u64,
    pub chunk_count: u64,
    pub vector_count: u64,
    #[serde(default)]
    pub recent_documents: Vec<RecentDocument>,
    #[serde(default)]
    pub top_tags: Vec<TagCount>,
}
