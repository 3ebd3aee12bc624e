//! Write operations with declared cache effects
//!
//! Every write goes through [`MutationCoordinator::execute`], which
//! issues exactly one backend request and, strictly after the success
//! response, applies that mutation's invalidation set to the cache store
//! and reports a [`Navigation`] effect for the owning view to perform.
//!
//! Ordering matters: invalidation before the success response would let
//! a concurrent poll resurrect pre-mutation data as fresh. On failure
//! nothing is invalidated and the error propagates to the caller; other
//! cached entries are untouched.

use std::sync::Arc;

use crate::api::Gateway;
use crate::cache::{CacheStore, ResourceKey, ResourceKind};
use crate::error::Result;
use crate::types::{
    ChatReply, ChatRequest, CrawlRequest, Document, DocumentCreate, DocumentUpdate, DocumentUpload,
};

/// A write against the backend.
#[derive(Debug, Clone)]
pub enum Mutation {
    CreateDocument(DocumentCreate),
    UploadDocument(DocumentUpload),
    CrawlDocument(CrawlRequest),
    UpdateDocument { id: String, update: DocumentUpdate },
    DeleteDocument { id: String },
    Reindex,
    Reset,
    SendMessage(ChatRequest),
    DeleteConversation { id: String },
}

/// Where the owning view should go after a successful mutation.
///
/// The library reports the effect; performing it is the view's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// Stay where you are (e.g. exit edit mode in place)
    Stay,
    ToDocument(String),
    ToDocumentList,
    /// Switch the active conversation to this id (new conversations
    /// adopt the server-returned id)
    ToConversation(String),
    /// Clear the active conversation and return to the chat root
    ToChatRoot,
}

/// Typed response payload of a successful mutation.
#[derive(Debug, Clone)]
pub enum MutationOutput {
    Document(Document),
    Chat(ChatReply),
    Ack(String),
    Deleted,
}

/// Result of a successful mutation.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub navigation: Navigation,
    pub output: MutationOutput,
}

/// Executes writes and applies their declared invalidation sets.
#[derive(Clone)]
pub struct MutationCoordinator {
    api: Arc<dyn Gateway>,
    store: CacheStore,
}

impl MutationCoordinator {
    pub fn new(api: Arc<dyn Gateway>, store: CacheStore) -> Self {
        Self { api, store }
    }

    /// Issue one write; on success invalidate dependents and report the
    /// navigation effect, on failure change nothing.
    pub async fn execute(&self, mutation: Mutation) -> Result<MutationOutcome> {
        match mutation {
            Mutation::CreateDocument(create) => {
                let doc = self.api.create_document(&create).await?;
                self.document_arrived(doc)
            }
            Mutation::UploadDocument(upload) => {
                let doc = self.api.upload_document(&upload).await?;
                self.document_arrived(doc)
            }
            Mutation::CrawlDocument(crawl) => {
                let doc = self.api.crawl_document(&crawl).await?;
                self.document_arrived(doc)
            }
            Mutation::UpdateDocument { id, update } => {
                let doc = self.api.update_document(&id, &update).await?;
                self.store.invalidate(&ResourceKey::Document(id));
                Ok(MutationOutcome {
                    navigation: Navigation::Stay,
                    output: MutationOutput::Document(doc),
                })
            }
            Mutation::DeleteDocument { id } => {
                self.api.delete_document(&id).await?;
                self.store.invalidate_kind(ResourceKind::DocumentList);
                // Drop the detail entry so an in-flight poll cannot
                // resurrect it; its next fetch surfaces the backend 404
                self.store.remove(&ResourceKey::Document(id));
                Ok(MutationOutcome {
                    navigation: Navigation::ToDocumentList,
                    output: MutationOutput::Deleted,
                })
            }
            Mutation::Reindex => {
                let status = self.api.reindex().await?;
                self.store.invalidate_kind(ResourceKind::DocumentList);
                Ok(MutationOutcome {
                    navigation: Navigation::Stay,
                    output: MutationOutput::Ack(status),
                })
            }
            Mutation::Reset => {
                let status = self.api.reset().await?;
                self.store.invalidate_where(|key| {
                    matches!(
                        key.kind(),
                        ResourceKind::DocumentList | ResourceKind::Search | ResourceKind::AdminStats
                    )
                });
                Ok(MutationOutcome {
                    navigation: Navigation::Stay,
                    output: MutationOutput::Ack(status),
                })
            }
            Mutation::SendMessage(request) => {
                let started_new = request.conversation_id.is_none();
                let reply = self.api.send_message(&request).await?;

                self.store.invalidate_kind(ResourceKind::ConversationList);
                self.store
                    .invalidate(&ResourceKey::Conversation(reply.conversation_id.clone()));

                let navigation = if started_new {
                    Navigation::ToConversation(reply.conversation_id.clone())
                } else {
                    Navigation::Stay
                };
                Ok(MutationOutcome {
                    navigation,
                    output: MutationOutput::Chat(reply),
                })
            }
            Mutation::DeleteConversation { id } => {
                self.api.delete_conversation(&id).await?;
                self.store.invalidate_kind(ResourceKind::ConversationList);
                self.store.remove(&ResourceKey::Conversation(id));
                Ok(MutationOutcome {
                    navigation: Navigation::ToChatRoot,
                    output: MutationOutput::Deleted,
                })
            }
        }
    }

    /// Shared tail of the three document-creating mutations.
    fn document_arrived(&self, doc: Document) -> Result<MutationOutcome> {
        self.store.invalidate_kind(ResourceKind::DocumentList);
        Ok(MutationOutcome {
            navigation: Navigation::ToDocument(doc.id.clone()),
            output: MutationOutput::Document(doc),
        })
    }
}
