//! Reconciler: the per-cycle decision algorithm.
//!
//! One cycle syncs the store with upstream, then for every release sweeps its
//! open notification threads for tasks that went green, inspects the current
//! phase's task graph, reports tasks that became stuck since the last report
//! and marks the phase done once its graph completes.
//!
//! Failure scope:
//! - the upstream release listing or a storage error aborts the whole cycle;
//! - anything else aborts only the release being processed, which is
//!   recorded in [`CycleReport::failures`] and retried next cycle.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{RelbotError, Result};
use crate::graph::{TaskGraph, TaskRecord};
use crate::model::{Phase, Release};
use crate::notify::{DiagnosticCause, Intent, Notifier};
use crate::source::{ChatTransport, ReleaseSource, TaskGraphSource};
use crate::store::{run_blocking, ReleaseRepository};

/// What one cycle saw and did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    /// Releases in the store after sync.
    pub releases: usize,
    /// Releases whose task graph was fetched.
    pub inspected: usize,
    /// `(kind, release)` of every notification actually delivered.
    pub notifications: Vec<(&'static str, String)>,
    /// `(release, error)` for releases skipped this cycle.
    pub failures: Vec<(String, String)>,
}

pub struct Reconciler<R, G, S, C> {
    releases: Arc<R>,
    graphs: Arc<G>,
    store: Arc<S>,
    notifier: Notifier<C>,
    /// Cycles never overlap.
    cycle: Mutex<()>,
}

impl<R, G, S, C> Reconciler<R, G, S, C>
where
    R: ReleaseSource,
    G: TaskGraphSource,
    S: ReleaseRepository + 'static,
    C: ChatTransport,
{
    pub fn new(releases: Arc<R>, graphs: Arc<G>, store: Arc<S>, notifier: Notifier<C>) -> Self {
        Self {
            releases,
            graphs,
            store,
            notifier,
            cycle: Mutex::new(()),
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _guard = self.cycle.lock().await;

        let upstream = self.releases.fetch_releases().await?;
        let releases = run_blocking(&self.store, move |s| s.sync(&upstream)).await?;

        let mut report = CycleReport {
            releases: releases.len(),
            ..CycleReport::default()
        };
        for release in &releases {
            if let Err(e) = self.reconcile_release(release, &mut report).await {
                if e.is_fatal() {
                    error!(release = %release.name, error = %e, "reconciliation cycle aborted");
                    return Err(e);
                }
                warn!(release = %release.name, error = %e, "release skipped this cycle");
                report.failures.push((release.name.clone(), e.to_string()));
            }
        }

        info!(
            releases = report.releases,
            inspected = report.inspected,
            notifications = report.notifications.len(),
            failures = report.failures.len(),
            "reconciliation cycle finished"
        );
        Ok(report)
    }

    async fn reconcile_release(&self, release: &Release, report: &mut CycleReport) -> Result<()> {
        self.sweep_threads(release, report).await?;

        let Some(phase) = release.current_phase() else {
            debug!(release = %release.name, "no phase triggered yet");
            return Ok(());
        };
        if phase.done {
            return Ok(());
        }
        let Some(groupid) = phase.groupid.as_deref() else {
            debug!(release = %release.name, phase = %phase.name, "triggered phase has no task group");
            return Ok(());
        };

        report.inspected += 1;
        let graph = match self.graphs.fetch_group(groupid).await {
            Ok(records) => TaskGraph::classify(records),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                let cause = match &e {
                    RelbotError::NotFound(_) => DiagnosticCause::NotFound,
                    other => DiagnosticCause::Unreachable(other.to_string()),
                };
                let intent = Intent::Diagnostic {
                    release: release.name.clone(),
                    groupid: groupid.to_string(),
                    cause,
                };
                self.notify(&intent, report).await;
                return Err(e);
            }
        };
        debug!(
            release = %release.name,
            groupid,
            total = graph.total(),
            percent = graph.percent_resolved(),
            "task graph classified"
        );

        self.report_stuck(release, phase, &graph, report).await?;

        if graph.is_complete() {
            let name = release.name.clone();
            let phase_name = phase.name.clone();
            let marked = run_blocking(&self.store, move |s| s.mark_phase_done(&name, &phase_name)).await?;
            if marked {
                let intent = Intent::Complete {
                    release: release.name.clone(),
                    phase: phase.name.clone(),
                };
                self.notify(&intent, report).await;
            }
        }
        Ok(())
    }

    /// Post a stuck report for tasks not already tracked and open a thread
    /// tracking them. A failed post leaves nothing tracked, so the same tasks
    /// are reported again next cycle.
    async fn report_stuck(
        &self,
        release: &Release,
        phase: &Phase,
        graph: &TaskGraph,
        report: &mut CycleReport,
    ) -> Result<()> {
        let name = release.name.clone();
        let tracked: BTreeSet<String> = run_blocking(&self.store, move |s| s.get_release(&name))
            .await?
            .map(|r| r.tracked_tasks())
            .unwrap_or_default();

        let newly_stuck = newly_stuck(graph, &tracked);
        if newly_stuck.is_empty() {
            return Ok(());
        }

        let taskids: Vec<String> = newly_stuck.iter().map(|t| t.taskid.clone()).collect();
        let intent = Intent::Stuck {
            release: release.clone(),
            phase: phase.name.clone(),
            graph: graph.clone(),
            tasks: newly_stuck,
        };
        let Some(threadid) = self.notifier.emit(&intent).await? else {
            return Ok(());
        };
        report.notifications.push((intent.kind(), release.name.clone()));

        let name = release.name.clone();
        run_blocking(&self.store, move |s| s.open_thread(&name, &threadid, &taskids)).await
    }

    /// Re-check every tracked task; drop the ones no longer stuck and say so
    /// in their thread. Tasks the service no longer knows are dropped quietly.
    async fn sweep_threads(&self, release: &Release, report: &mut CycleReport) -> Result<()> {
        if release.threads.is_empty() {
            return Ok(());
        }

        for thread in &release.threads {
            let mut keep = Vec::new();
            let mut resolved = Vec::new();
            for taskid in &thread.tasks {
                match self.graphs.fetch_task_status(taskid).await {
                    Ok(status) if status.state.is_stuck() => keep.push(taskid.clone()),
                    Ok(status) => {
                        debug!(taskid = %taskid, state = %status.state, "tracked task resolved");
                        resolved.push(taskid.clone());
                    }
                    Err(RelbotError::NotFound(_)) => {
                        debug!(taskid = %taskid, "tracked task no longer exists");
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(taskid = %taskid, error = %e, "could not refresh tracked task");
                        keep.push(taskid.clone());
                    }
                }
            }
            if keep.len() == thread.tasks.len() {
                continue;
            }

            let threadid = thread.threadid.clone();
            run_blocking(&self.store, move |s| s.update_thread_tasks(&threadid, &keep)).await?;
            for taskid in resolved {
                let intent = Intent::Resolved {
                    release: release.name.clone(),
                    threadid: thread.threadid.clone(),
                    taskid,
                };
                self.notify(&intent, report).await;
            }
        }

        let name = release.name.clone();
        let pruned = run_blocking(&self.store, move |s| s.prune_empty_threads(&name)).await?;
        if pruned > 0 {
            debug!(release = %release.name, pruned, "closed empty notification threads");
        }
        Ok(())
    }

    /// Deliver a notification whose loss must not affect tracked state.
    async fn notify(&self, intent: &Intent, report: &mut CycleReport) {
        match self.notifier.emit(intent).await {
            Ok(_) => report
                .notifications
                .push((intent.kind(), intent.release().to_string())),
            Err(e) => warn!(
                kind = intent.kind(),
                release = intent.release(),
                error = %e,
                "notification not delivered"
            ),
        }
    }
}

/// Failed and exception tasks not yet tracked for the release, in report order.
pub fn newly_stuck(graph: &TaskGraph, tracked: &BTreeSet<String>) -> Vec<TaskRecord> {
    graph
        .stuck()
        .filter(|t| !tracked.contains(&t.taskid))
        .cloned()
        .collect()
}
