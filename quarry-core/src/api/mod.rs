//! HTTP gateway to the search backend
//!
//! All backend reads and writes go through a single typed client so the
//! rest of the crate never touches raw HTTP. The backend contract is a
//! fixed set of request/response pairs; every request carries the
//! configured `X-API-Key` header.
//!
//! The [`Gateway`] trait is the seam between the synchronization layer
//! and the transport: production code uses [`ApiClient`], tests swap in
//! a scripted stub.

mod client;

pub use client::{ApiClient, SearchFilters, SearchRequest};

use crate::error::Result;
use crate::types::{
    AdminStats, ChatReply, ChatRequest, Conversation, CrawlRequest, Document, DocumentCreate,
    DocumentUpdate, DocumentUpload, SearchResponse,
};
use async_trait::async_trait;

/// Typed access to every backend operation.
#[async_trait]
pub trait Gateway: Send + Sync {
    // Search
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse>;
    async fn suggest(&self, prefix: &str, limit: usize) -> Result<Vec<String>>;
    async fn record_query(&self, query: &str) -> Result<()>;

    // Documents
    async fn list_documents(
        &self,
        skip: usize,
        limit: usize,
        tag: Option<&str>,
    ) -> Result<Vec<Document>>;
    async fn get_document(&self, id: &str) -> Result<Document>;
    async fn create_document(&self, create: &DocumentCreate) -> Result<Document>;
    async fn update_document(&self, id: &str, update: &DocumentUpdate) -> Result<Document>;
    async fn delete_document(&self, id: &str) -> Result<()>;
    async fn upload_document(&self, upload: &DocumentUpload) -> Result<Document>;
    async fn crawl_document(&self, crawl: &CrawlRequest) -> Result<Document>;

    // Chat
    async fn list_conversations(&self, skip: usize, limit: usize) -> Result<Vec<Conversation>>;
    async fn get_conversation(&self, id: &str) -> Result<Conversation>;
    async fn delete_conversation(&self, id: &str) -> Result<()>;
    async fn send_message(&self, request: &ChatRequest) -> Result<ChatReply>;

    // Admin
    async fn admin_stats(&self) -> Result<AdminStats>;
    async fn reset(&self) -> Result<String>;
    async fn reindex(&self) -> Result<String>;

    // Embeddings
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
