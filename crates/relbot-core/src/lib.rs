pub mod command;
pub mod config;
pub mod error;
pub mod graph;
pub mod model;
pub mod notify;
pub mod reconcile;
pub mod render;
pub mod source;
pub mod store;

#[cfg(test)]
mod testing;

pub use command::{Command, CommandHandler};
pub use config::Config;
pub use error::{RelbotError, Result};
pub use graph::{TaskGraph, TaskRecord, TaskState, TaskStatus};
pub use model::{Phase, Release, UpstreamPhase, UpstreamRelease};
pub use notify::{Intent, Notifier};
pub use reconcile::{CycleReport, Reconciler};
pub use render::{Message, Renderer};
pub use source::{ChatTransport, Destination, ReleaseSource, TaskGraphSource};
pub use store::{RedbReleaseStore, ReleaseRepository};
