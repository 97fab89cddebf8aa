use std::sync::Arc;
use std::time::Duration;

use relbot_core::{ChatTransport, Reconciler, ReleaseRepository, ReleaseSource, TaskGraphSource};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, warn};

/// Run a reconciliation cycle every `every`, starting immediately.
///
/// A cycle that overruns delays the next tick instead of bunching ticks up.
/// Cycle errors are logged and the loop carries on: the next tick is the retry.
pub async fn run<R, G, S, C>(reconciler: Arc<Reconciler<R, G, S, C>>, every: Duration)
where
    R: ReleaseSource,
    G: TaskGraphSource,
    S: ReleaseRepository + 'static,
    C: ChatTransport,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match reconciler.run_cycle().await {
            Ok(_) => {}
            Err(e) if e.is_fatal() => error!(error = %e, "reconciliation cycle failed"),
            Err(e) => warn!(error = %e, "reconciliation cycle skipped"),
        }
    }
}

pub fn spawn<R, G, S, C>(reconciler: Arc<Reconciler<R, G, S, C>>, every: Duration) -> JoinHandle<()>
where
    R: ReleaseSource + 'static,
    G: TaskGraphSource + 'static,
    S: ReleaseRepository + 'static,
    C: ChatTransport + 'static,
{
    tokio::spawn(run(reconciler, every))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use relbot_core::render::{Links, Renderer};
    use relbot_core::{
        Destination, Message, Notifier, RedbReleaseStore, RelbotError, Result, TaskRecord,
        TaskStatus, UpstreamRelease,
    };
    use tempfile::TempDir;

    /// Fails the first two listings (one transient, one fatal), then succeeds.
    #[derive(Default)]
    struct FlakyReleases {
        calls: AtomicUsize,
    }

    impl ReleaseSource for FlakyReleases {
        async fn fetch_releases(&self) -> Result<Vec<UpstreamRelease>> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(RelbotError::fetch("releases", "HTTP 503")),
                1 => Err(RelbotError::Configuration("token revoked".into())),
                _ => Ok(Vec::new()),
            }
        }
    }

    struct NoGraphs;

    impl TaskGraphSource for NoGraphs {
        async fn fetch_group(&self, groupid: &str) -> Result<Vec<TaskRecord>> {
            Err(RelbotError::NotFound(groupid.to_string()))
        }

        async fn fetch_task_status(&self, taskid: &str) -> Result<TaskStatus> {
            Err(RelbotError::NotFound(taskid.to_string()))
        }
    }

    #[derive(Default)]
    struct Silent {
        posts: Mutex<Vec<Message>>,
    }

    impl ChatTransport for Silent {
        async fn post(&self, _to: &Destination, message: &Message) -> Result<String> {
            self.posts.lock().unwrap().push(message.clone());
            Ok("1600000000.000100".into())
        }
    }

    fn renderer() -> Renderer {
        Renderer {
            links: Links {
                taskcluster_root_url: "https://tc.example.com".into(),
                treeherder_url: "https://th.example.com".into(),
            },
            mention: "releaseduty".into(),
            command_prefix: "shipit".into(),
            poll_interval_secs: 60,
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn failed_cycles_do_not_stop_the_loop() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RedbReleaseStore::open(&dir.path().join("relbot.redb")).unwrap());
        let releases = Arc::new(FlakyReleases::default());
        let chat = Arc::new(Silent::default());
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&releases),
            Arc::new(NoGraphs),
            store,
            Notifier::new(Arc::clone(&chat), renderer(), "#releng-notifications"),
        ));

        let handle = spawn(reconciler, Duration::from_secs(60));
        // Ticks at 0s, 60s and 120s.
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(!handle.is_finished());
        assert!(releases.calls.load(Ordering::SeqCst) >= 3);
        assert!(chat.posts.lock().unwrap().is_empty());
        handle.abort();
    }
}
