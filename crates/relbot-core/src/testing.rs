//! In-memory fakes of the outside world for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{RelbotError, Result};
use crate::graph::{TaskRecord, TaskState, TaskStatus};
use crate::model::{UpstreamPhase, UpstreamRelease};
use crate::render::{Links, Message, Renderer};
use crate::source::{ChatTransport, Destination, ReleaseSource, TaskGraphSource};

pub fn renderer() -> Renderer {
    Renderer {
        links: Links {
            taskcluster_root_url: "https://tc.example.com".into(),
            treeherder_url: "https://th.example.com".into(),
        },
        mention: "releaseduty".into(),
        command_prefix: "shipit".into(),
        poll_interval_secs: 120,
    }
}

pub fn upstream(name: &str, product: &str, phases: &[(&str, Option<&str>)]) -> UpstreamRelease {
    UpstreamRelease {
        name: name.into(),
        product: product.into(),
        version: "10.0".into(),
        project: "mozilla-release".into(),
        revision: "deadbeef".into(),
        phases: phases
            .iter()
            .map(|(phase, groupid)| UpstreamPhase {
                name: (*phase).into(),
                action_task_id: groupid.map(str::to_string),
                submitted: groupid.is_some(),
                completed: groupid.is_some(),
            })
            .collect(),
    }
}

pub fn task(taskid: &str, state: TaskState) -> TaskRecord {
    TaskRecord {
        taskid: taskid.into(),
        label: format!("label-{taskid}"),
        worker_type: "b-linux".into(),
        state,
    }
}

#[derive(Default)]
pub struct FakeReleases {
    releases: Mutex<Vec<UpstreamRelease>>,
    fail: AtomicBool,
}

impl FakeReleases {
    pub fn new(releases: Vec<UpstreamRelease>) -> Self {
        Self {
            releases: Mutex::new(releases),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set(&self, releases: Vec<UpstreamRelease>) {
        *self.releases.lock().unwrap() = releases;
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl ReleaseSource for FakeReleases {
    async fn fetch_releases(&self) -> Result<Vec<UpstreamRelease>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelbotError::fetch("releases", "HTTP 503"));
        }
        Ok(self.releases.lock().unwrap().clone())
    }
}

/// Task groups keyed by group id. A task's status is its state in whichever
/// group lists it, unless overridden.
#[derive(Default)]
pub struct FakeGraphs {
    groups: Mutex<HashMap<String, Vec<TaskRecord>>>,
    overrides: Mutex<HashMap<String, TaskState>>,
    broken: Mutex<HashMap<String, String>>,
    pub group_fetches: Mutex<Vec<String>>,
}

impl FakeGraphs {
    pub fn set_group(&self, groupid: &str, tasks: Vec<TaskRecord>) {
        self.groups.lock().unwrap().insert(groupid.into(), tasks);
    }

    pub fn set_status(&self, taskid: &str, state: TaskState) {
        self.overrides.lock().unwrap().insert(taskid.into(), state);
    }

    /// Make fetching `groupid` fail with a transient error.
    pub fn break_group(&self, groupid: &str, message: &str) {
        self.broken.lock().unwrap().insert(groupid.into(), message.into());
    }

    pub fn fetch_count(&self, groupid: &str) -> usize {
        self.group_fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|g| g.as_str() == groupid)
            .count()
    }
}

impl TaskGraphSource for FakeGraphs {
    async fn fetch_group(&self, groupid: &str) -> Result<Vec<TaskRecord>> {
        self.group_fetches.lock().unwrap().push(groupid.into());
        if let Some(message) = self.broken.lock().unwrap().get(groupid) {
            return Err(RelbotError::fetch(format!("task group {groupid}"), message));
        }
        self.groups
            .lock()
            .unwrap()
            .get(groupid)
            .cloned()
            .ok_or_else(|| RelbotError::NotFound(format!("task group {groupid}")))
    }

    async fn fetch_task_status(&self, taskid: &str) -> Result<TaskStatus> {
        if let Some(state) = self.overrides.lock().unwrap().get(taskid) {
            return Ok(TaskStatus {
                state: *state,
                resolved: None,
            });
        }
        self.groups
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|t| t.taskid == taskid)
            .map(|t| TaskStatus {
                state: t.state,
                resolved: None,
            })
            .ok_or_else(|| RelbotError::NotFound(format!("task {taskid}")))
    }
}

#[derive(Default)]
pub struct RecordingChat {
    pub posts: Mutex<Vec<(Destination, Message)>>,
    next_ts: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingChat {
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn texts(&self) -> Vec<String> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.text.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.posts.lock().unwrap().clear();
    }
}

impl ChatTransport for RecordingChat {
    async fn post(&self, to: &Destination, message: &Message) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelbotError::Chat("channel_not_found".into()));
        }
        let n = self.next_ts.fetch_add(1, Ordering::SeqCst);
        self.posts
            .lock()
            .unwrap()
            .push((to.clone(), message.clone()));
        Ok(format!("1600000000.{n:06}"))
    }
}
