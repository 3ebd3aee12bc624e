//! Interval re-fetching of cached reads
//!
//! A poll re-runs a key's fetch on a fixed cadence until a continue
//! predicate says the resource reached a terminal state, or until the
//! handle is dropped. Ticks that come due while a fetch is still in
//! flight are skipped, not queued, so a slow backend never builds a
//! backlog of requests.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::{CacheEntry, CacheStore, Fetcher, ResourceKey};

/// Owner handle for a running poll.
///
/// Dropping the handle cancels the pending timer immediately; no further
/// fetches are issued after teardown.
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Stop the poll. Equivalent to dropping the handle.
    pub fn stop(&self) {
        self.task.abort();
    }

    /// True once the poll has stopped, either because its predicate
    /// returned false or because it was cancelled.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start polling a key.
///
/// The first fetch happens immediately (a new subscription wants data
/// now, not one interval from now). After each settled fetch the
/// predicate is evaluated on the latest entry; returning false stops the
/// poll permanently.
pub fn start<P>(
    store: CacheStore,
    key: ResourceKey,
    fetcher: Fetcher,
    every: Duration,
    continue_predicate: P,
) -> PollHandle
where
    P: Fn(&CacheEntry) -> bool + Send + 'static,
{
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let entry = store.refresh(key.clone(), fetcher.clone()).await;
            if !continue_predicate(&entry) {
                tracing::debug!(key = ?key, "poll reached terminal state");
                break;
            }
        }
    });

    PollHandle { task }
}
