//! HTTP client for the search backend API
//!
//! One method per backend operation, each a plain request/response
//! exchange. Responses are classified by status: 404 becomes
//! [`Error::NotFound`], other 4xx become [`Error::Validation`] with the
//! backend's `detail` string preserved verbatim, and network failures or
//! 5xx become [`Error::Transport`]. Transport errors are never retried
//! here; retrying is a user action.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::multipart;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::types::{
    AdminStats, ChatReply, ChatRequest, Conversation, CrawlRequest, Document, DocumentCreate,
    DocumentUpdate, DocumentUpload, SearchResponse,
};

use super::Gateway;

/// Request body for POST /search
#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<SearchFilters>,
    pub limit: usize,
    pub offset: usize,
    pub min_score: f64,
    pub include_content: bool,
}

/// Filter clause of a search request.
#[derive(Debug, Clone, Serialize)]
pub struct SearchFilters {
    pub tags: Vec<String>,
}

impl SearchRequest {
    /// Build a request with the backend's default scoring and paging.
    pub fn new(query: impl Into<String>, tags: Vec<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            filters: if tags.is_empty() {
                None
            } else {
                Some(SearchFilters { tags })
            },
            limit,
            offset: 0,
            min_score: 0.0,
            include_content: true,
        }
    }
}

/// HTTP client for the search backend
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new client from configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config.base_url.trim_end_matches('/').to_string();

        // Build default headers
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &config.api_key {
            headers.insert(
                "X-API-Key",
                HeaderValue::from_str(api_key)
                    .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Parse a response, mapping non-success statuses onto the error taxonomy.
    async fn parse<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        resource: &str,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Transport(format!("failed to parse response: {}", e)))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(status, &body, resource))
        }
    }

    /// Like [`parse`](Self::parse) but discards the response body.
    async fn parse_ack(&self, response: reqwest::Response, resource: &str) -> Result<()> {
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(status, &body, resource))
        }
    }
}

#[async_trait]
impl Gateway for ApiClient {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let response = self
            .http_client
            .post(self.url("/search"))
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        self.parse(response, "search").await
    }

    async fn suggest(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        let response = self
            .http_client
            .post(self.url("/search/suggest"))
            .json(&SuggestRequest { prefix, limit })
            .send()
            .await
            .map_err(transport)?;
        let body: SuggestResponse = self.parse(response, "suggestions").await?;
        Ok(body.suggestions)
    }

    async fn record_query(&self, query: &str) -> Result<()> {
        let url = format!(
            "{}/search/record-query?query={}",
            self.base_url,
            urlencoding::encode(query)
        );
        let response = self.http_client.post(&url).send().await.map_err(transport)?;
        self.parse_ack(response, "query record").await
    }

    async fn list_documents(
        &self,
        skip: usize,
        limit: usize,
        tag: Option<&str>,
    ) -> Result<Vec<Document>> {
        let mut params = vec![("skip", skip.to_string()), ("limit", limit.to_string())];
        if let Some(tag) = tag {
            params.push(("tag", tag.to_string()));
        }

        let response = self
            .http_client
            .get(self.url("/documents"))
            .query(&params)
            .send()
            .await
            .map_err(transport)?;
        self.parse(response, "documents").await
    }

    async fn get_document(&self, id: &str) -> Result<Document> {
        let url = format!("{}/documents/{}", self.base_url, urlencoding::encode(id));
        let response = self.http_client.get(&url).send().await.map_err(transport)?;
        self.parse(response, &format!("document {}", id)).await
    }

    async fn create_document(&self, create: &DocumentCreate) -> Result<Document> {
        let response = self
            .http_client
            .post(self.url("/documents"))
            .json(create)
            .send()
            .await
            .map_err(transport)?;
        self.parse(response, "document").await
    }

    async fn update_document(&self, id: &str, update: &DocumentUpdate) -> Result<Document> {
        let url = format!("{}/documents/{}", self.base_url, urlencoding::encode(id));
        let response = self
            .http_client
            .put(&url)
            .json(update)
            .send()
            .await
            .map_err(transport)?;
        self.parse(response, &format!("document {}", id)).await
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        let url = format!("{}/documents/{}", self.base_url, urlencoding::encode(id));
        let response = self
            .http_client
            .delete(&url)
            .send()
            .await
            .map_err(transport)?;
        self.parse_ack(response, &format!("document {}", id)).await
    }

    async fn upload_document(&self, upload: &DocumentUpload) -> Result<Document> {
        // tags and metadata travel as JSON-encoded text parts
        let tags_json = serde_json::to_string(&upload.tags)?;
        let metadata_json = serde_json::to_string(&upload.metadata)?;

        let mut form = multipart::Form::new()
            .part(
                "file",
                multipart::Part::bytes(upload.bytes.clone()).file_name(upload.file_name.clone()),
            )
            .text("tags", tags_json)
            .text("metadata", metadata_json);
        if let Some(title) = &upload.title {
            form = form.text("title", title.clone());
        }

        let response = self
            .http_client
            .post(self.url("/documents/upload"))
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        self.parse(response, "document upload").await
    }

    async fn crawl_document(&self, crawl: &CrawlRequest) -> Result<Document> {
        let response = self
            .http_client
            .post(self.url("/documents/crawl"))
            .json(crawl)
            .send()
            .await
            .map_err(transport)?;
        self.parse(response, "document crawl").await
    }

    async fn list_conversations(&self, skip: usize, limit: usize) -> Result<Vec<Conversation>> {
        let params = [("skip", skip.to_string()), ("limit", limit.to_string())];
        let response = self
            .http_client
            .get(self.url("/chat/conversations"))
            .query(&params)
            .send()
            .await
            .map_err(transport)?;
        self.parse(response, "conversations").await
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation> {
        let url = format!(
            "{}/chat/conversations/{}",
            self.base_url,
            urlencoding::encode(id)
        );
        let response = self.http_client.get(&url).send().await.map_err(transport)?;
        self.parse(response, &format!("conversation {}", id)).await
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        let url = format!(
            "{}/chat/conversations/{}",
            self.base_url,
            urlencoding::encode(id)
        );
        let response = self
            .http_client
            .delete(&url)
            .send()
            .await
            .map_err(transport)?;
        self.parse_ack(response, &format!("conversation {}", id))
            .await
    }

    async fn send_message(&self, request: &ChatRequest) -> Result<ChatReply> {
        let response = self
            .http_client
            .post(self.url("/chat"))
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        self.parse(response, "chat").await
    }

    async fn admin_stats(&self) -> Result<AdminStats> {
        let response = self
            .http_client
            .get(self.url("/admin/stats"))
            .send()
            .await
            .map_err(transport)?;
        self.parse(response, "admin stats").await
    }

    async fn reset(&self) -> Result<String> {
        let response = self
            .http_client
            .post(self.url("/admin/reset"))
            .send()
            .await
            .map_err(transport)?;
        let ack: AckResponse = self.parse(response, "reset").await?;
        Ok(ack.status)
    }

    async fn reindex(&self) -> Result<String> {
        let response = self
            .http_client
            .post(self.url("/admin/reindex"))
            .send()
            .await
            .map_err(transport)?;
        let ack: AckResponse = self.parse(response, "reindex").await?;
        Ok(ack.status)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .http_client
            .post(self.url("/embeddings"))
            .json(&EmbedRequest { text })
            .send()
            .await
            .map_err(transport)?;
        let body: EmbedResponse = self.parse(response, "embedding").await?;
        Ok(body.embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .http_client
            .post(self.url("/embeddings/batch"))
            .json(&EmbedBatchRequest { texts })
            .send()
            .await
            .map_err(transport)?;
        let body: EmbedBatchResponse = self.parse(response, "embeddings").await?;
        Ok(body.embeddings)
    }
}

/// Request body for POST /search/suggest
#[derive(Serialize)]
struct SuggestRequest<'a> {
    prefix: &'a str,
    limit: usize,
}

/// Response from POST /search/suggest
#[derive(Deserialize)]
struct SuggestResponse {
    suggestions: Vec<String>,
}

/// Response from POST /admin/reset and /admin/reindex
#[derive(Deserialize)]
struct AckResponse {
    status: String,
}

/// Request body for POST /embeddings
#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

/// Response from POST /embeddings
#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Request body for POST /embeddings/batch
#[derive(Serialize)]
struct EmbedBatchRequest<'a> {
    texts: &'a [String],
}

/// Response from POST /embeddings/batch
#[derive(Deserialize)]
struct EmbedBatchResponse {
    embeddings: Vec<Vec<f32>>,
}

fn transport(err: reqwest::Error) -> Error {
    Error::Transport(format!("HTTP request failed: {}", err))
}

/// Map a non-success status onto the error taxonomy.
fn classify_status(status: StatusCode, body: &str, resource: &str) -> Error {
    if status == StatusCode::NOT_FOUND {
        return Error::NotFound(resource.to_string());
    }

    let detail = extract_detail(body).unwrap_or_else(|| {
        if body.is_empty() {
            "unknown".to_string()
        } else {
            body.to_string()
        }
    });

    if status.is_client_error() {
        Error::Validation {
            status: status.as_u16(),
            detail,
        }
    } else {
        Error::Transport(format!("API error ({}): {}", status, detail))
    }
}

/// Pull the `detail` field out of an error body, if there is one.
fn extract_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
