//! Boundaries to the outside world: the release API, the task-execution
//! service and the chat transport. `relbot-clients` provides the HTTP
//! implementations; tests use in-memory fakes.

use std::future::Future;

use crate::error::Result;
use crate::graph::{TaskRecord, TaskStatus};
use crate::model::UpstreamRelease;
use crate::render::Message;

pub trait ReleaseSource: Send + Sync {
    /// Releases currently in flight, ignored products already removed.
    fn fetch_releases(&self) -> impl Future<Output = Result<Vec<UpstreamRelease>>> + Send;
}

pub trait TaskGraphSource: Send + Sync {
    /// Every task of a task group, across all pages.
    fn fetch_group(&self, groupid: &str) -> impl Future<Output = Result<Vec<TaskRecord>>> + Send;

    fn fetch_task_status(&self, taskid: &str) -> impl Future<Output = Result<TaskStatus>> + Send;
}

/// Where a chat message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub channel: String,
    /// Reply inside this thread instead of posting top-level.
    pub thread: Option<String>,
}

impl Destination {
    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            thread: None,
        }
    }

    pub fn thread(channel: impl Into<String>, thread: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            thread: Some(thread.into()),
        }
    }
}

pub trait ChatTransport: Send + Sync {
    /// Post a message and return the transport-assigned message id, which
    /// doubles as the thread id for replies.
    fn post(
        &self,
        to: &Destination,
        message: &Message,
    ) -> impl Future<Output = Result<String>> + Send;
}
