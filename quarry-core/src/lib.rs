//! # quarry-core
//!
//! Core library for quarry - a client for an asynchronous document
//! search and chat backend.
//!
//! This library provides:
//! - A typed HTTP gateway for the backend's fixed request/response contract
//! - A keyed cache store with single-flight fetches and subscribe/notify
//! - Polling that stops on terminal states, and debounced suggestion fetches
//! - A mutation coordinator applying declared invalidation sets
//! - URL round-tripping for search state
//!
//! ## Architecture
//!
//! The backend processes work asynchronously (document ingestion, chat
//! generation); this crate keeps client-side state consistent with it
//! while the user issues overlapping, cancellable requests. All reads
//! flow through the [`cache::CacheStore`]; polling and suggestions are
//! specialized read paths layered on the same store, and writes go
//! through the [`mutation::MutationCoordinator`] so cache invalidation
//! happens strictly after backend confirmation.
//!
//! ## Example
//!
//! ```rust,no_run
//! use quarry_core::{Config, Session};
//!
//! # async fn run() -> quarry_core::Result<()> {
//! // Load configuration and create the one session handle
//! let config = Config::load()?;
//! let session = Session::new(&config)?;
//!
//! // Reads go through the cache store
//! let documents = session.documents().await?;
//! println!("{} documents", documents.len());
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use cache::{CacheEntry, CacheStatus, CacheStore, ResourceKey, ResourceKind, Subscription};
pub use config::Config;
pub use error::{Error, Result};
pub use mutation::{Mutation, MutationCoordinator, MutationOutcome, MutationOutput, Navigation};
pub use session::{HistoryMode, SearchSession, Session, UrlUpdate};
pub use urlstate::SearchState;

// Public modules
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod mutation;
pub mod poll;
pub mod session;
pub mod suggest;
pub mod types;
pub mod urlstate;
