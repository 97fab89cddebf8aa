//! Notifier: turns the reconciler's decisions into chat posts.
//!
//! No decision logic lives here. An [`Intent`] says what happened; the
//! notifier picks the rendering and the destination and hands the result to
//! the [`ChatTransport`].

use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::graph::{TaskGraph, TaskRecord};
use crate::model::Release;
use crate::render::{Message, Renderer};
use crate::source::{ChatTransport, Destination};

#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticCause {
    /// The execution service does not know the group.
    NotFound,
    /// The group could not be fetched this cycle.
    Unreachable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// `tasks` are the newly stuck tasks, not every stuck task in the graph.
    Stuck {
        release: Release,
        phase: String,
        graph: TaskGraph,
        tasks: Vec<TaskRecord>,
    },
    Complete {
        release: String,
        phase: String,
    },
    Resolved {
        release: String,
        threadid: String,
        taskid: String,
    },
    Diagnostic {
        release: String,
        groupid: String,
        cause: DiagnosticCause,
    },
}

impl Intent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stuck { .. } => "stuck",
            Self::Complete { .. } => "complete",
            Self::Resolved { .. } => "resolved",
            Self::Diagnostic { .. } => "diagnostic",
        }
    }

    pub fn release(&self) -> &str {
        match self {
            Self::Stuck { release, .. } => &release.name,
            Self::Complete { release, .. }
            | Self::Resolved { release, .. }
            | Self::Diagnostic { release, .. } => release,
        }
    }
}

pub struct Notifier<C> {
    transport: Arc<C>,
    renderer: Renderer,
    channel: String,
}

impl<C: ChatTransport> Notifier<C> {
    pub fn new(transport: Arc<C>, renderer: Renderer, channel: impl Into<String>) -> Self {
        Self {
            transport,
            renderer,
            channel: channel.into(),
        }
    }

    /// Render and post `intent`. Returns the new thread id for top-level
    /// posts, `None` for in-thread replies.
    pub async fn emit(&self, intent: &Intent) -> Result<Option<String>> {
        let (to, message) = self.prepare(intent);
        let ts = self.transport.post(&to, &message).await?;
        info!(
            kind = intent.kind(),
            release = intent.release(),
            ts = %ts,
            "notification sent"
        );
        Ok(to.thread.is_none().then_some(ts))
    }

    /// Post an arbitrary message, e.g. a command reply.
    pub async fn send(&self, to: &Destination, message: &Message) -> Result<String> {
        self.transport.post(to, message).await
    }

    fn prepare(&self, intent: &Intent) -> (Destination, Message) {
        let r = &self.renderer;
        match intent {
            Intent::Stuck {
                release,
                graph,
                tasks,
                ..
            } => (self.top_level(), r.stuck(release, graph, tasks)),
            Intent::Complete { release, phase } => {
                (self.top_level(), r.phase_complete(release, phase))
            }
            Intent::Resolved {
                threadid, taskid, ..
            } => (
                Destination::thread(&self.channel, threadid),
                r.task_resolved(taskid),
            ),
            Intent::Diagnostic {
                release,
                groupid,
                cause,
            } => {
                let message = match cause {
                    DiagnosticCause::NotFound => r.group_not_found(release, groupid),
                    DiagnosticCause::Unreachable(e) => r.group_unreachable(release, groupid, e),
                };
                (self.top_level(), message)
            }
        }
    }

    fn top_level(&self) -> Destination {
        Destination::channel(&self.channel)
    }
}
