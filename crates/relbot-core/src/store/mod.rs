//! Release Store: the authoritative local record of releases, phases,
//! notification threads and the stuck tasks each thread tracks.
//!
//! The [`ReleaseRepository`] trait is the only way the reconciler and the
//! command handler touch tracked state, so the backend can be swapped
//! without changing either. [`RedbReleaseStore`] is the durable backend.

mod redb_store;

pub use redb_store::RedbReleaseStore;

use std::sync::Arc;

use crate::error::{RelbotError, Result};
use crate::model::{NotificationThread, Phase, Release, UpstreamRelease};

/// Every method is one atomic unit: it either fully applies or leaves the
/// store untouched.
pub trait ReleaseRepository: Send + Sync {
    /// Upsert releases and phases from a fresh upstream listing, delete
    /// releases no longer listed (with their phases and threads), and
    /// return the full current set.
    ///
    /// Calling it twice with the same input leaves the same state.
    fn sync(&self, upstream: &[UpstreamRelease]) -> Result<Vec<Release>>;

    fn list_releases(&self) -> Result<Vec<Release>>;

    fn get_release(&self, name: &str) -> Result<Option<Release>>;

    /// Last triggered phase in pipeline order, if any.
    fn current_phase(&self, release: &str) -> Result<Option<Phase>> {
        Ok(self
            .get_release(release)?
            .and_then(|r| r.current_phase().cloned()))
    }

    fn threads_for(&self, release: &str) -> Result<Vec<NotificationThread>> {
        Ok(self
            .get_release(release)?
            .map(|r| r.threads)
            .unwrap_or_default())
    }

    fn is_task_tracked(&self, taskid: &str, release: &str) -> Result<bool> {
        Ok(self
            .get_release(release)?
            .is_some_and(|r| r.is_task_tracked(taskid)))
    }

    /// Start tracking `taskids` under a new thread. Task ids already tracked
    /// by another open thread of the same release are skipped; if the thread
    /// already exists the remaining ids are added to it.
    fn open_thread(&self, release: &str, threadid: &str, taskids: &[String]) -> Result<()>;

    /// Replace the tracked-task set of a thread.
    fn update_thread_tasks(&self, threadid: &str, taskids: &[String]) -> Result<()>;

    /// Delete threads of `release` that track nothing. Returns how many were removed.
    fn prune_empty_threads(&self, release: &str) -> Result<usize>;

    /// One-way `done` transition. Returns `false` (and changes nothing) when
    /// the phase is unknown, untriggered or already done.
    fn mark_phase_done(&self, release: &str, phase: &str) -> Result<bool>;
}

/// Run a store operation on the blocking pool so async callers never hold up
/// the runtime on disk I/O.
pub async fn run_blocking<S, T, F>(store: &Arc<S>, f: F) -> Result<T>
where
    S: ReleaseRepository + 'static,
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| RelbotError::Storage(format!("store task failed: {e}")))?
}
