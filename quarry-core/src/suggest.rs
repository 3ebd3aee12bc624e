//! Debounced suggestion fetching for incremental search input
//!
//! Keystrokes arrive much faster than suggestion fetches should. The
//! channel turns a burst of [`on_input`](SuggestChannel::on_input) calls
//! into at most one in-flight request: a fetch is dispatched only after
//! the input has been quiet for the debounce period, a newer input
//! cancels the pending timer outright, and every dispatch carries a
//! sequence number so a slow response for superseded input is discarded
//! instead of overwriting newer suggestions.
//!
//! Inputs shorter than the minimum length clear suggestions synchronously
//! with no network call. A failed fetch clears suggestions and is
//! otherwise silent; suggestions are advisory, never blocking.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Future returned by a suggestion fetcher.
pub type SuggestFuture = Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send>>;

/// Fetch closure invoked with the debounced input text.
pub type SuggestFetcher = Arc<dyn Fn(String) -> SuggestFuture + Send + Sync>;

/// Wrap an async closure as a [`SuggestFetcher`].
pub fn suggest_fetcher<F, Fut>(f: F) -> SuggestFetcher
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<String>>> + Send + 'static,
{
    Arc::new(move |text| Box::pin(f(text)))
}

struct SuggestInner {
    fetcher: SuggestFetcher,
    debounce: Duration,
    min_chars: usize,
    /// Sequence number of the most recent input; a response applies only
    /// if its sequence still matches at arrival time
    seq: AtomicU64,
    /// Timer task for the input currently waiting out its quiet period
    pending: Mutex<Option<JoinHandle<()>>>,
    tx: watch::Sender<Vec<String>>,
}

impl Drop for SuggestInner {
    fn drop(&mut self) {
        if let Some(task) = self.pending.lock().unwrap().take() {
            task.abort();
        }
    }
}

/// Debounced, superseding suggestion channel.
#[derive(Clone)]
pub struct SuggestChannel {
    inner: Arc<SuggestInner>,
}

impl SuggestChannel {
    pub fn new(fetcher: SuggestFetcher, debounce: Duration, min_chars: usize) -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(SuggestInner {
                fetcher,
                debounce,
                min_chars,
                seq: AtomicU64::new(0),
                pending: Mutex::new(None),
                tx,
            }),
        }
    }

    /// Receiver for the currently visible suggestions.
    pub fn suggestions(&self) -> watch::Receiver<Vec<String>> {
        self.inner.tx.subscribe()
    }

    /// Feed the next input value.
    ///
    /// Schedules a fetch after the quiet period; any fetch previously
    /// scheduled but not yet dispatched is cancelled and never issued.
    pub fn on_input(&self, text: &str) {
        let inner = &self.inner;
        let seq = inner.seq.fetch_add(1, Ordering::SeqCst) + 1;

        // Cancel the pending timer for the superseded input
        if let Some(task) = inner.pending.lock().unwrap().take() {
            task.abort();
        }

        let text = text.trim().to_string();
        if text.chars().count() < inner.min_chars {
            inner.tx.send_replace(Vec::new());
            return;
        }

        // The task holds only a weak handle so dropping the channel
        // cancels everything scheduled
        let weak: Weak<SuggestInner> = Arc::downgrade(inner);
        let debounce = inner.debounce;
        let task = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let Some(inner) = weak.upgrade() else { return };

            let result = (inner.fetcher)(text.clone()).await;

            // Only the response for the latest dispatched input may apply
            if inner.seq.load(Ordering::SeqCst) != seq {
                tracing::debug!(input = %text, "discarding superseded suggestion response");
                return;
            }

            match result {
                Ok(suggestions) => {
                    inner.tx.send_replace(suggestions);
                }
                Err(err) => {
                    // Non-blocking for the primary search action
                    tracing::debug!(input = %text, error = %err, "suggestion fetch failed");
                    inner.tx.send_replace(Vec::new());
                }
            }
        });

        *self.inner.pending.lock().unwrap() = Some(task);
    }
}
